//! Common result and error
use std::fmt::{Display, Formatter, Result};

pub type QResult<T> = std::result::Result<T, QError>;

/// Error kinds surfaced by the queue engine.
///
/// Operations are all-or-nothing: on error, no write-ahead record exists and
/// the in-memory state is untouched.
#[derive(Debug, PartialEq)]
pub enum QError {
	/// The queue token bucket refused the operation; the caller may retry.
	RateLimited(String),
	/// A write-ahead append failed; the operation had no effect.
	Durability(String),
	/// Ack or nack referred to a job id that is not currently leased.
	NotInflight(String),
	/// The presented lease token did not match the stored one.
	BadLease(String),
	/// A record could not be decoded (truncation, bad checksum, unknown type).
	InvalidRecord(String),
	/// Input validation failed (priority out of range, negative delay, ...).
	InvalidArgument(String),
	/// The named queue or job does not exist.
	NotFound(String),
	/// The key-value index reported an error.
	StoreError(String),
	/// Filesystem error outside of the append path.
	IoError(String),
}

impl std::error::Error for QError {}

impl From<std::io::Error> for QError {
	fn from(value: std::io::Error) -> Self {
		Self::IoError(value.to_string())
	}
}

impl Display for QError {
	fn fmt(&self, f: &mut Formatter) -> Result {
		match self {
			QError::RateLimited(queue) => {
				write!(f, "Rate limit exceeded for queue: {}", queue)
			},
			QError::Durability(msg) => {
				write!(f, "Durability failure: {}", msg)
			},
			QError::NotInflight(job_id) => {
				write!(f, "Job not found or not in flight: {}", job_id)
			},
			QError::BadLease(job_id) => {
				write!(f, "Invalid lease token for job: {}", job_id)
			},
			QError::InvalidRecord(msg) => {
				write!(f, "Invalid record: {}", msg)
			},
			QError::InvalidArgument(msg) => {
				write!(f, "Invalid argument: {}", msg)
			},
			QError::NotFound(name) => {
				write!(f, "Not found: {}", name)
			},
			QError::StoreError(msg) => {
				write!(f, "Store error: {}", msg)
			},
			QError::IoError(msg) => {
				write!(f, "I/O error: {}", msg)
			},
		}
	}
}
