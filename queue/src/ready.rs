//! Priority-ordered ready set.
//!
//! One instance per queue. Jobs are kept in a total order: higher priority
//! first, then earlier scheduled time, earlier enqueue time and finally the
//! job id as a deterministic tie-break. Delivery additionally requires the
//! scheduled time to have arrived, so the deliverable lookups walk the
//! order and skip entries that are not yet due.
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::jobs::Job;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ReadyKey {
	priority: u8,
	scheduled_ms: u64,
	enqueued_ms: u64,
	job_id: String,
}

impl ReadyKey {
	fn of(job: &Job) -> Self {
		Self {
			priority: job.priority,
			scheduled_ms: job.scheduled_ms,
			enqueued_ms: job.enqueued_ms,
			job_id: job.id.clone(),
		}
	}
}

impl Ord for ReadyKey {
	fn cmp(&self, other: &Self) -> Ordering {
		// Higher priority sorts first; everything else ascending.
		other
			.priority
			.cmp(&self.priority)
			.then_with(|| self.scheduled_ms.cmp(&other.scheduled_ms))
			.then_with(|| self.enqueued_ms.cmp(&other.enqueued_ms))
			.then_with(|| self.job_id.cmp(&other.job_id))
	}
}

impl PartialOrd for ReadyKey {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

/// Ordered container of `READY` jobs for a single queue.
#[derive(Debug, Default)]
pub struct ReadyQueue {
	ordered: BTreeMap<ReadyKey, Job>,
	keys: HashMap<String, ReadyKey>,
}

impl ReadyQueue {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts a job; a job id already present is left untouched.
	pub fn insert(&mut self, job: Job) {
		if self.keys.contains_key(&job.id) {
			return;
		}

		let key = ReadyKey::of(&job);
		self.keys.insert(job.id.clone(), key.clone());
		self.ordered.insert(key, job);
	}

	/// Returns the most-preferred job whose scheduled time has arrived.
	pub fn peek_deliverable(&self, now_ms: u64) -> Option<&Job> {
		self.ordered
			.iter()
			.find(|(key, _)| key.scheduled_ms <= now_ms)
			.map(|(_, job)| job)
	}

	/// Removes and returns the most-preferred deliverable job.
	pub fn pop_deliverable(&mut self, now_ms: u64) -> Option<Job> {
		let key = self
			.ordered
			.iter()
			.find(|(key, _)| key.scheduled_ms <= now_ms)
			.map(|(key, _)| key.clone())?;

		self.keys.remove(&key.job_id);
		self.ordered.remove(&key)
	}

	/// Removes a specific job, wherever it sits in the order.
	pub fn remove(&mut self, job_id: &str) -> Option<Job> {
		let key = self.keys.remove(job_id)?;
		self.ordered.remove(&key)
	}

	/// Ids of all jobs currently in the set, in no particular order.
	pub fn job_ids(&self) -> impl Iterator<Item = &String> {
		self.keys.keys()
	}

	pub fn len(&self) -> usize {
		self.ordered.len()
	}

	pub fn is_empty(&self) -> bool {
		self.ordered.is_empty()
	}
}
