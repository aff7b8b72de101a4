//! Write-ahead record type and codec.
//!
//! Every state transition is described by one flat record. The on-disk body
//! is little-endian: a type byte followed by length-prefixed variable
//! fields. Types that do not use a field still carry its zero or empty
//! representation, which keeps the codec a single linear pass.
use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{QError, QResult};
use crate::jobs::Job;

/// Computes the CRC-32C (Castagnoli) checksum of `data`.
pub fn checksum(data: &[u8]) -> u32 {
	crc32c::crc32c(data)
}

/// Verifies `data` against a stored checksum.
pub fn verify_checksum(data: &[u8], expected: u32) -> bool {
	checksum(data) == expected
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
	Enqueue = 1,
	Ack = 2,
	Nack = 3,
	Requeue = 4,
	Tombstone = 5,
}

impl TryFrom<u8> for RecordType {
	type Error = QError;

	fn try_from(value: u8) -> QResult<Self> {
		match value {
			1 => Ok(RecordType::Enqueue),
			2 => Ok(RecordType::Ack),
			3 => Ok(RecordType::Nack),
			4 => Ok(RecordType::Requeue),
			5 => Ok(RecordType::Tombstone),
			other => Err(QError::InvalidRecord(format!("unknown record type: {}", other))),
		}
	}
}

/// One write-ahead entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
	pub record_type: RecordType,
	pub queue: String,
	pub job_id: String,
	pub priority: u8,
	pub attempts: u32,
	pub max_attempts: u32,
	/// Absolute unix milliseconds; earliest delivery instant.
	pub scheduled_ms: u64,
	pub payload: Bytes,
	pub headers: HashMap<String, String>,
	pub lease_token: String,
	pub reason: String,
}

impl Default for Record {
	fn default() -> Self {
		Self {
			record_type: RecordType::Enqueue,
			queue: String::new(),
			job_id: String::new(),
			priority: 0,
			attempts: 0,
			max_attempts: 0,
			scheduled_ms: 0,
			payload: Bytes::new(),
			headers: HashMap::new(),
			lease_token: String::new(),
			reason: String::new(),
		}
	}
}

impl Record {
	/// Builds a record carrying the full descriptor of `job`.
	pub fn for_job(record_type: RecordType, job: &Job) -> Self {
		Self {
			record_type,
			queue: job.queue.clone(),
			job_id: job.id.clone(),
			priority: job.priority,
			attempts: job.attempts,
			max_attempts: job.max_attempts,
			scheduled_ms: job.scheduled_ms,
			payload: job.payload.clone(),
			headers: job.headers.clone(),
			..Default::default()
		}
	}

	/// Serializes the record body.
	pub fn encode(&self) -> Bytes {
		let mut size = 1 + 2 + self.queue.len() + 2 + self.job_id.len() + 1 + 4 + 4 + 8;
		size += 4 + self.payload.len() + 2;
		for (k, v) in &self.headers {
			size += 2 + k.len() + 2 + v.len();
		}
		size += 2 + self.lease_token.len() + 2 + self.reason.len();

		let mut buf = BytesMut::with_capacity(size);
		buf.put_u8(self.record_type as u8);
		put_str16(&mut buf, &self.queue);
		put_str16(&mut buf, &self.job_id);
		buf.put_u8(self.priority);
		buf.put_u32_le(self.attempts);
		buf.put_u32_le(self.max_attempts);
		buf.put_u64_le(self.scheduled_ms);
		buf.put_u32_le(self.payload.len() as u32);
		buf.put_slice(&self.payload);
		buf.put_u16_le(self.headers.len() as u16);
		for (k, v) in &self.headers {
			put_str16(&mut buf, k);
			put_str16(&mut buf, v);
		}
		put_str16(&mut buf, &self.lease_token);
		put_str16(&mut buf, &self.reason);

		buf.freeze()
	}

	/// Parses a record body, rejecting truncated input and unknown types.
	pub fn decode(data: &[u8]) -> QResult<Self> {
		let mut cur = Cursor::new(data);

		let record_type = RecordType::try_from(cur.take_u8()?)?;
		let queue = cur.take_str16()?;
		let job_id = cur.take_str16()?;
		let priority = cur.take_u8()?;
		let attempts = cur.take_u32()?;
		let max_attempts = cur.take_u32()?;
		let scheduled_ms = cur.take_u64()?;

		let payload_len = cur.take_u32()? as usize;
		let payload = Bytes::copy_from_slice(cur.take_bytes(payload_len)?);

		let headers_count = cur.take_u16()?;
		let mut headers = HashMap::with_capacity(headers_count as usize);
		for _ in 0..headers_count {
			let key = cur.take_str16()?;
			let value = cur.take_str16()?;
			headers.insert(key, value);
		}

		let lease_token = cur.take_str16()?;
		let reason = cur.take_str16()?;

		Ok(Self {
			record_type,
			queue,
			job_id,
			priority,
			attempts,
			max_attempts,
			scheduled_ms,
			payload,
			headers,
			lease_token,
			reason,
		})
	}
}

fn put_str16(buf: &mut BytesMut, value: &str) {
	buf.put_u16_le(value.len() as u16);
	buf.put_slice(value.as_bytes());
}

/// Bounds-checked little-endian reader over a record body.
struct Cursor<'a> {
	data: &'a [u8],
	offset: usize,
}

impl<'a> Cursor<'a> {
	fn new(data: &'a [u8]) -> Self {
		Self { data, offset: 0 }
	}

	fn take_bytes(&mut self, len: usize) -> QResult<&'a [u8]> {
		let end = self
			.offset
			.checked_add(len)
			.filter(|end| *end <= self.data.len())
			.ok_or_else(|| QError::InvalidRecord("truncated record".into()))?;
		let slice = &self.data[self.offset..end];
		self.offset = end;
		Ok(slice)
	}

	fn take_u8(&mut self) -> QResult<u8> {
		Ok(self.take_bytes(1)?[0])
	}

	fn take_u16(&mut self) -> QResult<u16> {
		Ok(u16::from_le_bytes(self.take_bytes(2)?.try_into().unwrap()))
	}

	fn take_u32(&mut self) -> QResult<u32> {
		Ok(u32::from_le_bytes(self.take_bytes(4)?.try_into().unwrap()))
	}

	fn take_u64(&mut self) -> QResult<u64> {
		Ok(u64::from_le_bytes(self.take_bytes(8)?.try_into().unwrap()))
	}

	fn take_str16(&mut self) -> QResult<String> {
		let len = self.take_u16()? as usize;
		let bytes = self.take_bytes(len)?;
		String::from_utf8(bytes.to_vec())
			.map_err(|_| QError::InvalidRecord("non-utf8 string field".into()))
	}
}
