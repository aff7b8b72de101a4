//! Segmented write-ahead log.
//!
//! The log is the source of truth for every queue: a directory of
//! `NNNNNN.wal` files ordered by a monotonically increasing id. Appends go
//! to the active (highest-id) segment and rotate when it is full. Replay
//! walks segments in ascending id order; a corrupted tail ends that segment
//! but not the replay.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{info, warn};

use crate::error::{QError, QResult};
use crate::record::{Record, RecordType};
use crate::segment::{self, segment_file_name, Segment, DEFAULT_SEGMENT_SIZE};

/// Write-ahead log settings.
#[derive(Debug, Clone)]
pub struct WalConfig {
	/// Directory holding the segment files; created if missing.
	pub dir: PathBuf,
	/// Per-segment size ceiling in bytes.
	pub segment_size: u64,
	/// Force a disk sync on every append.
	pub fsync: bool,
}

impl Default for WalConfig {
	fn default() -> Self {
		Self { dir: PathBuf::from("./_wal"), segment_size: DEFAULT_SEGMENT_SIZE, fsync: true }
	}
}

struct WalInner {
	segments: Vec<Segment>,
	next_id: u64,
}

/// The ordered collection of segments in a directory.
pub struct Wal {
	dir: PathBuf,
	segment_size: u64,
	fsync: bool,
	inner: Mutex<WalInner>,
}

impl Wal {
	/// Opens the log, discovering existing segments and creating the first
	/// one when the directory is empty.
	pub fn open(config: WalConfig) -> QResult<Self> {
		std::fs::create_dir_all(&config.dir)?;

		let mut ids = Vec::new();
		for entry in std::fs::read_dir(&config.dir)? {
			let entry = entry?;
			let name = entry.file_name();
			let name = name.to_string_lossy();
			if let Some(stem) = name.strip_suffix(".wal") {
				match stem.parse::<u64>() {
					Ok(id) => ids.push(id),
					Err(_) => warn!("WAL: invalid segment filename: {}", name),
				}
			}
		}
		ids.sort_unstable();

		// Repair the active segment before reopening it for appends: frames
		// written after a torn tail would be unreachable on replay.
		if let Some(last_id) = ids.last() {
			let path = config.dir.join(segment_file_name(*last_id));
			let valid = segment::valid_frame_prefix(&path)?;
			let actual = std::fs::metadata(&path)?.len();
			if valid < actual {
				warn!(
					"WAL: truncating torn tail of segment {} [{} -> {} bytes]",
					last_id, actual, valid
				);
				let file = std::fs::OpenOptions::new().write(true).open(&path)?;
				file.set_len(valid)?;
			}
		}

		let mut segments = Vec::with_capacity(ids.len());
		for id in &ids {
			segments.push(Segment::create(&config.dir, *id, config.segment_size, config.fsync)?);
		}

		let next_id = ids.last().map(|last| last + 1).unwrap_or(0);
		let mut inner = WalInner { segments, next_id };

		if inner.segments.is_empty() {
			let segment =
				Segment::create(&config.dir, inner.next_id, config.segment_size, config.fsync)?;
			inner.segments.push(segment);
			inner.next_id += 1;
		}

		info!("WAL: open in {} [segments={}]", config.dir.display(), inner.segments.len());

		Ok(Self {
			dir: config.dir,
			segment_size: config.segment_size,
			fsync: config.fsync,
			inner: Mutex::new(inner),
		})
	}

	/// Appends one record to the active segment, rotating first when it is
	/// full. Appends are serialized; success implies the record is durably
	/// accepted under the configured sync policy.
	pub fn append(&self, rec: &Record) -> QResult<()> {
		let mut inner = self.inner.lock().unwrap();

		if inner.segments.last().map(Segment::is_full).unwrap_or(true) {
			let id = inner.next_id;
			let segment = Segment::create(&self.dir, id, self.segment_size, self.fsync)
				.map_err(|error| QError::Durability(error.to_string()))?;
			inner.segments.push(segment);
			inner.next_id += 1;
		}

		inner.segments.last_mut().unwrap().append(rec)
	}

	/// Replays every segment in ascending id order, invoking `callback` for
	/// each record in append order.
	///
	/// A corrupted frame discards the rest of that segment and moves on to
	/// the next one. Callback errors and I/O failures abort the replay.
	pub fn replay(&self, mut callback: impl FnMut(Record) -> QResult<()>) -> QResult<()> {
		let inner = self.inner.lock().unwrap();

		for segment in &inner.segments {
			let mut reader = segment.reader()?;
			loop {
				match reader.read_next() {
					Ok(Some(rec)) => callback(rec)?,
					Ok(None) => break,
					Err(QError::InvalidRecord(msg)) => {
						warn!(
							"WAL: corrupted record in segment {}, skipping rest ({})",
							segment.id(),
							msg
						);
						break;
					},
					Err(error) => return Err(error),
				}
			}
		}

		Ok(())
	}

	/// Rewrites history down to the live set.
	///
	/// All non-active segments are folded into a single new segment holding
	/// only the `ENQUEUE` records of jobs in `live_ids`, then removed. The
	/// active segment is untouched. The compacted segment takes the id just
	/// below the active one (freed by the removal) so replay order is
	/// preserved across restarts.
	pub fn compact(&self, live_ids: &HashSet<String>) -> QResult<()> {
		let mut inner = self.inner.lock().unwrap();

		if inner.segments.len() <= 1 {
			return Ok(());
		}

		info!("WAL: compaction start [segments={}]", inner.segments.len());

		let active = inner.segments.pop().unwrap();
		let compacted_id = active.id() - 1;

		let mut live_records = 0;
		let result = (|| -> QResult<Option<Segment>> {
			let live = collect_live(&inner.segments, live_ids)?;
			live_records = live.len();

			if live.is_empty() {
				return Ok(None);
			}

			let tmp_path = self.dir.join(format!("{}.tmp", segment_file_name(compacted_id)));
			let final_path = self.dir.join(segment_file_name(compacted_id));

			let mut segment =
				Segment::create_at(tmp_path.clone(), compacted_id, self.segment_size, false)?;
			for rec in &live {
				segment.append(rec)?;
			}
			segment.sync()?;
			drop(segment);

			// Rename before removing the originals: a crash in between
			// leaves superseded segments whose replay converges anyway.
			std::fs::rename(&tmp_path, &final_path)?;

			Ok(Some(Segment::create(&self.dir, compacted_id, self.segment_size, self.fsync)?))
		})();

		let compacted = match result {
			Ok(compacted) => compacted,
			Err(error) => {
				inner.segments.push(active);
				return Err(error);
			},
		};

		let old: Vec<Segment> = inner.segments.drain(..).collect();
		for segment in old {
			if segment.id() == compacted_id && compacted.is_some() {
				continue; // Replaced by the rename above.
			}
			if let Err(error) = std::fs::remove_file(segment.path()) {
				warn!("WAL: failed to remove segment {}: {}", segment.id(), error);
			}
		}

		if let Some(segment) = compacted {
			inner.segments.push(segment);
		}
		inner.segments.push(active);

		info!(
			"WAL: compaction done [segments={} live_records={}]",
			inner.segments.len(),
			live_records
		);

		Ok(())
	}

	pub fn segment_count(&self) -> usize {
		self.inner.lock().unwrap().segments.len()
	}

	pub fn total_size(&self) -> u64 {
		self.inner.lock().unwrap().segments.iter().map(Segment::size).sum()
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}
}

/// Gathers the `ENQUEUE` records of live jobs from the given segments.
fn collect_live(segments: &[Segment], live_ids: &HashSet<String>) -> QResult<Vec<Record>> {
	let mut live = Vec::new();

	for segment in segments {
		let mut reader = segment.reader()?;
		loop {
			match reader.read_next() {
				Ok(Some(rec)) => {
					if rec.record_type == RecordType::Enqueue && live_ids.contains(&rec.job_id) {
						live.push(rec);
					}
				},
				Ok(None) => break,
				Err(QError::InvalidRecord(_)) => break,
				Err(error) => return Err(error),
			}
		}
	}

	Ok(live)
}
