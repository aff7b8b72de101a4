//! Append-only segment files.
//!
//! A segment holds a prefix of the write-ahead log as a sequence of frames:
//! `[len:u32_le][crc32c:u32_le][record bytes]`. The checksum covers exactly
//! the record bytes. A frame that fails the length or checksum test marks
//! the end of the segment; nothing after a torn tail is trusted.
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{QError, QResult};
use crate::record::{self, Record};

/// Default per-segment ceiling (64 MiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

/// Frames longer than this are treated as corruption, not data.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

const FRAME_HEADER_LEN: u64 = 8;

pub(crate) fn segment_file_name(id: u64) -> String {
	format!("{:06}.wal", id)
}

/// A single write-ahead segment file.
pub struct Segment {
	id: u64,
	path: PathBuf,
	writer: BufWriter<File>,
	size: u64,
	max_size: u64,
	fsync: bool,
}

impl Segment {
	/// Opens (or creates) the segment for appending.
	pub fn create(dir: &Path, id: u64, max_size: u64, fsync: bool) -> QResult<Self> {
		Self::create_at(dir.join(segment_file_name(id)), id, max_size, fsync)
	}

	pub(crate) fn create_at(path: PathBuf, id: u64, max_size: u64, fsync: bool) -> QResult<Self> {
		let file = OpenOptions::new().create(true).append(true).open(&path)?;
		let size = file.metadata()?.len();

		Ok(Self { id, path, writer: BufWriter::new(file), size, max_size, fsync })
	}

	/// Frames and appends one record.
	///
	/// The user-space buffer is flushed before returning; when `fsync` is
	/// configured the file is also synced, so success implies durability
	/// under the configured policy.
	pub fn append(&mut self, rec: &Record) -> QResult<()> {
		let data = rec.encode();
		let crc = record::checksum(&data);

		let write_frame = |writer: &mut BufWriter<File>| -> std::io::Result<()> {
			writer.write_all(&(data.len() as u32).to_le_bytes())?;
			writer.write_all(&crc.to_le_bytes())?;
			writer.write_all(&data)?;
			writer.flush()
		};
		write_frame(&mut self.writer).map_err(|error| QError::Durability(error.to_string()))?;

		if self.fsync {
			self.writer
				.get_ref()
				.sync_data()
				.map_err(|error| QError::Durability(error.to_string()))?;
		}

		self.size += FRAME_HEADER_LEN + data.len() as u64;

		Ok(())
	}

	/// Flushes and syncs any buffered frames.
	pub fn sync(&mut self) -> QResult<()> {
		self.writer.flush().map_err(|error| QError::Durability(error.to_string()))?;
		self.writer
			.get_ref()
			.sync_data()
			.map_err(|error| QError::Durability(error.to_string()))
	}

	pub fn is_full(&self) -> bool {
		self.size >= self.max_size
	}

	pub fn size(&self) -> u64 {
		self.size
	}

	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn reader(&self) -> QResult<SegmentReader> {
		SegmentReader::new(&self.path)
	}
}

/// Sequential reader over a segment's frames.
pub struct SegmentReader {
	reader: BufReader<File>,
	offset: u64,
}

impl SegmentReader {
	pub fn new(path: &Path) -> QResult<Self> {
		let file = File::open(path)?;

		Ok(Self { reader: BufReader::new(file), offset: 0 })
	}

	/// Byte offset just past the last fully verified frame.
	pub fn offset(&self) -> u64 {
		self.offset
	}

	/// Returns the next record in append order.
	///
	/// `Ok(None)` is a clean end of segment. A torn or corrupted frame is
	/// reported as [QError::InvalidRecord]; the caller must not read past it.
	pub fn read_next(&mut self) -> QResult<Option<Record>> {
		let mut len_buf = [0u8; 4];
		let n = read_fully(&mut self.reader, &mut len_buf)?;
		if n == 0 {
			return Ok(None);
		}
		if n < len_buf.len() {
			return Err(QError::InvalidRecord("torn frame header".into()));
		}

		let len = u32::from_le_bytes(len_buf);
		if len > MAX_FRAME_LEN {
			return Err(QError::InvalidRecord(format!("frame length out of range: {}", len)));
		}

		let mut crc_buf = [0u8; 4];
		if read_fully(&mut self.reader, &mut crc_buf)? < crc_buf.len() {
			return Err(QError::InvalidRecord("torn frame header".into()));
		}
		let expected = u32::from_le_bytes(crc_buf);

		let mut data = vec![0u8; len as usize];
		if read_fully(&mut self.reader, &mut data)? < data.len() {
			return Err(QError::InvalidRecord("torn frame body".into()));
		}

		if !record::verify_checksum(&data, expected) {
			return Err(QError::InvalidRecord("checksum mismatch".into()));
		}

		let rec = Record::decode(&data)?;
		self.offset += FRAME_HEADER_LEN + len as u64;

		Ok(Some(rec))
	}
}

/// Returns the byte length of the valid frame prefix of a segment file.
pub(crate) fn valid_frame_prefix(path: &Path) -> QResult<u64> {
	let mut reader = SegmentReader::new(path)?;

	loop {
		match reader.read_next() {
			Ok(Some(_)) => {},
			Ok(None) => return Ok(reader.offset()),
			Err(QError::InvalidRecord(_)) => return Ok(reader.offset()),
			Err(error) => return Err(error),
		}
	}
}

/// Reads until `buf` is full or the stream ends; returns the bytes read.
fn read_fully(reader: &mut impl Read, buf: &mut [u8]) -> QResult<usize> {
	let mut filled = 0;
	while filled < buf.len() {
		match reader.read(&mut buf[filled..]) {
			Ok(0) => break,
			Ok(n) => filled += n,
			Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
			Err(error) => return Err(error.into()),
		}
	}

	Ok(filled)
}
