//! Job data structures
use std::collections::HashMap;

use bytes::Bytes;
use getset::Setters;
use serde::{Deserialize, Serialize};

/// Highest admissible priority; enqueue rejects anything above it.
pub const MAX_PRIORITY: u8 = 9;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A unit of work owned by exactly one named queue.
///
/// The job carries an opaque payload and the scheduling fields used by the
/// ready-set ordering: priority (higher first), scheduled time, enqueue time
/// and finally the job id as a deterministic tie-break.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
	pub id: String,
	pub queue: String,
	pub payload: Bytes,
	pub headers: HashMap<String, String>,
	pub priority: u8,
	pub attempts: u32,
	pub max_attempts: u32,
	/// Earliest delivery instant, absolute unix milliseconds.
	pub scheduled_ms: u64,
	/// First admission instant, absolute unix milliseconds. Immutable.
	pub enqueued_ms: u64,
	/// Empty unless the job is in flight.
	pub lease_token: String,
	/// Zero unless the job is in flight.
	pub lease_deadline_ms: u64,
	pub status: JobStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
	Ready,
	InFlight,
	Dead,
}

impl Job {
	/// True when the job may be handed to a consumer at `now_ms`.
	pub fn is_deliverable(&self, now_ms: u64) -> bool {
		self.status == JobStatus::Ready && self.scheduled_ms <= now_ms
	}

	/// True while the attempt budget allows another delivery.
	pub fn should_retry(&self) -> bool {
		self.attempts <= self.max_attempts
	}

	pub(crate) fn clear_lease(&mut self) {
		self.lease_token = String::new();
		self.lease_deadline_ms = 0;
	}
}

/// Retry budget supplied at enqueue time.
///
/// Only the attempt ceiling travels with the job; the backoff curve is a
/// service-wide setting (see [BackoffConfig](crate::backoff::BackoffConfig)).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Setters)]
#[getset(set = "pub")]
pub struct RetryPolicy {
	/// Number of delivery attempts allowed before dead-lettering.
	pub max_attempts: u32,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self { max_attempts: DEFAULT_MAX_ATTEMPTS }
	}
}

/// Consumer view of a leased job.
///
/// The lease token must be presented back on ack or nack within the
/// visibility window.
#[derive(Debug, Clone)]
pub struct LeasedJob {
	pub id: String,
	pub queue: String,
	pub payload: Bytes,
	pub headers: HashMap<String, String>,
	pub priority: u8,
	pub attempts: u32,
	pub lease_token: String,
	pub lease_deadline_ms: u64,
}

impl From<&Job> for LeasedJob {
	fn from(job: &Job) -> Self {
		Self {
			id: job.id.clone(),
			queue: job.queue.clone(),
			payload: job.payload.clone(),
			headers: job.headers.clone(),
			priority: job.priority,
			attempts: job.attempts,
			lease_token: job.lease_token.clone(),
			lease_deadline_ms: job.lease_deadline_ms,
		}
	}
}
