//! # Work Queue Services
//!
//! Ferrite Work Queue Services offer durable, priority-ordered work queues
//! for competing consumers on a single node.
//!
//! ## Features
//!
//! - Priority-ordered delivery with per-job scheduled execute times
//! - Time-bounded leases with automatic reclamation on expiry
//! - Negative acknowledgement with exponential backoff and dead-lettering
//! - A segmented write-ahead log as the source of truth: the in-memory
//!   state is rebuilt by replay after a restart
//! - Per-queue token-bucket rate limiting and idempotent enqueues
//!
//! See the [ferrite-rpc] crate for a networked server implementation.
//!
//! ## Example
//!
//! ```no_run
//! use ferrite_queue::{ServiceConfig, WorkQueueService};
//! use ferrite_queue::jobs::RetryPolicy;
//!
//! let service = WorkQueueService::open(ServiceConfig::default()).unwrap();
//! let work_queue = service.queue();
//!
//! // Producer enqueues a job
//! let job_id = work_queue
//!     .enqueue("q1", b"payload".as_ref().into(), Default::default(), 5, 0, RetryPolicy::default(), "")
//!     .unwrap();
//!
//! // Consumer leases, processes and acknowledges it
//! for job in work_queue.lease("q1", 1, 30_000).unwrap() {
//!     assert_eq!(job.id, job_id);
//!     work_queue.ack(&job.id, &job.lease_token).unwrap();
//! }
//! ```
//!
//! [ferrite-rpc]: crate::ferrite_rpc
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{bounded, select, Receiver, Sender};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::{self, BackoffConfig};
use crate::error::{QError, QResult};
use crate::index::RocksIndex;
use crate::jobs::{Job, JobStatus, LeasedJob, RetryPolicy, MAX_PRIORITY};
use crate::now_millis;
use crate::ratelimit::RateLimiter;
use crate::ready::ReadyQueue;
use crate::record::{Record, RecordType};
use crate::segment::DEFAULT_SEGMENT_SIZE;
use crate::wal::{Wal, WalConfig};

const DEFAULT_RECLAIM_INTERVAL_MS: u64 = 1_000;

/// Engine settings.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
	/// Root data directory; the WAL and the index live underneath it.
	pub data_dir: PathBuf,
	/// Per-segment size ceiling in bytes.
	pub segment_size: u64,
	/// Force a disk sync on every WAL append and index write.
	pub fsync: bool,
	/// Retry delay curve applied on nack and lease expiry.
	pub backoff: BackoffConfig,
	/// How often the reclaimer scans for expired leases.
	pub reclaim_interval: Duration,
}

impl Default for ServiceConfig {
	fn default() -> Self {
		Self {
			data_dir: PathBuf::from("./_data"),
			segment_size: DEFAULT_SEGMENT_SIZE,
			fsync: true,
			backoff: BackoffConfig::default(),
			reclaim_interval: Duration::from_millis(DEFAULT_RECLAIM_INTERVAL_MS),
		}
	}
}

/// Counters for one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
	pub ready: usize,
	pub in_flight: usize,
	pub dead: usize,
}

/// State of a single named queue.
///
/// A job lives in exactly one of the three containers, matching its status.
/// One mutex guards all three; it is never held across a WAL append.
#[derive(Debug, Default)]
struct QueueState {
	ready: ReadyQueue,
	inflight: HashMap<String, Job>,
	dead: HashMap<String, Job>,
}

/// Ferrite Work Queue.
///
/// The WorkQueue struct exposes the public interface for job producers and
/// consumers: enqueue, lease, ack, nack, plus the administrative accessors.
/// The write-ahead log is the source of truth; every state transition is
/// appended there before the in-memory containers change, so concurrent
/// operations on the same queue are ordered by append order.
///
/// Thread safety is guaranteed for concurrent producers and competing
/// consumers. A leased [LeasedJob] is expected to be processed by a single
/// consumer within its visibility window.
pub struct WorkQueue {
	wal: Wal,
	index: RocksIndex,
	queues: DashMap<String, Mutex<QueueState>>,
	limiter: RateLimiter,
	backoff: BackoffConfig,
	shutdown: AtomicBool,
	shutdown_chan: (Sender<bool>, Receiver<bool>),
}

impl WorkQueue {
	/// Opens the engine under `config.data_dir` without replaying history.
	///
	/// [WorkQueueService::open] is the usual entry point; it replays the WAL
	/// and starts the reclaimer.
	pub fn open(config: &ServiceConfig) -> QResult<Self> {
		let wal = Wal::open(WalConfig {
			dir: config.data_dir.join("wal"),
			segment_size: config.segment_size,
			fsync: config.fsync,
		})?;
		let index = RocksIndex::open(&config.data_dir.join("index"), config.fsync)?;

		Ok(Self {
			wal,
			index,
			queues: DashMap::new(),
			limiter: RateLimiter::new(),
			backoff: config.backoff,
			shutdown: AtomicBool::new(false),
			shutdown_chan: bounded(1),
		})
	}

	/// Rebuilds the in-memory state from the write-ahead log.
	///
	/// Bounded corruption (a torn segment tail) is tolerated; any other
	/// replay failure is fatal.
	pub fn start(&self) -> QResult<()> {
		info!("Queue Services: replaying WAL");

		self.wal.replay(|rec| self.apply(rec))?;

		info!("Queue Services: start [queues={}]", self.queues.len());

		Ok(())
	}

	/// Folds one record into the in-memory state.
	///
	/// This is the single transition function shared by startup replay;
	/// the live operations perform the equivalent mutation after their own
	/// append succeeds.
	fn apply(&self, rec: Record) -> QResult<()> {
		match rec.record_type {
			RecordType::Enqueue => {
				let job = Job {
					id: rec.job_id,
					queue: rec.queue.clone(),
					payload: rec.payload,
					headers: rec.headers,
					priority: rec.priority,
					attempts: rec.attempts,
					max_attempts: rec.max_attempts,
					scheduled_ms: rec.scheduled_ms,
					// The record does not carry the admission instant;
					// the scheduled time preserves relative order and
					// keeps replay deterministic.
					enqueued_ms: rec.scheduled_ms,
					lease_token: String::new(),
					lease_deadline_ms: 0,
					status: JobStatus::Ready,
				};

				let queue = self
					.queues
					.entry(rec.queue)
					.or_insert_with(|| Mutex::new(QueueState::default()));
				queue.lock().unwrap().ready.insert(job);
			},
			RecordType::Ack | RecordType::Tombstone => {
				if let Some(queue) = self.queues.get(&rec.queue) {
					let mut state = queue.lock().unwrap();
					if state.inflight.remove(&rec.job_id).is_none()
						&& state.ready.remove(&rec.job_id).is_none()
					{
						state.dead.remove(&rec.job_id);
					}
				}
			},
			RecordType::Nack | RecordType::Requeue => {
				if let Some(queue) = self.queues.get(&rec.queue) {
					let mut state = queue.lock().unwrap();
					let found = state
						.inflight
						.remove(&rec.job_id)
						.or_else(|| state.ready.remove(&rec.job_id));

					if let Some(mut job) = found {
						job.attempts = rec.attempts;
						job.scheduled_ms = rec.scheduled_ms;
						job.clear_lease();

						if job.should_retry() {
							job.status = JobStatus::Ready;
							state.ready.insert(job);
						} else {
							job.status = JobStatus::Dead;
							state.dead.insert(job.id.clone(), job);
						}
					}
				}
			},
		}

		Ok(())
	}

	/// Admits a job into a queue.
	///
	/// Parameters:
	/// - `queue_name`: the queue to admit into; created on first use.
	/// - `payload`: opaque bytes, never interpreted by the engine.
	/// - `headers`: optional short string metadata, opaque to the engine.
	/// - `priority`: 0–9, higher is more urgent.
	/// - `delay_ms`: earliest delivery is `now + delay_ms`.
	/// - `retry`: attempt ceiling before dead-lettering.
	/// - `idempotency_key`: optional external key; a repeated key returns
	///   the previously admitted job id without creating a new job.
	///
	/// Returns the job id. The job is durable when this returns: the
	/// `ENQUEUE` record is accepted by the WAL before the in-memory insert,
	/// and a failed append leaves no trace.
	pub fn enqueue(
		&self,
		queue_name: &str,
		payload: Bytes,
		headers: HashMap<String, String>,
		priority: u8,
		delay_ms: i64,
		retry: RetryPolicy,
		idempotency_key: &str,
	) -> QResult<String> {
		if priority > MAX_PRIORITY {
			return Err(QError::InvalidArgument(format!(
				"priority must be in 0..={}, got {}",
				MAX_PRIORITY, priority
			)));
		}
		if delay_ms < 0 {
			return Err(QError::InvalidArgument(format!("negative delay: {}", delay_ms)));
		}

		if !idempotency_key.is_empty() {
			if let Some(existing) = self.index.get_idempotency_key(idempotency_key)? {
				debug!(
					"Idempotent enqueue, returning existing job: {} [key={}]",
					existing, idempotency_key
				);
				return Ok(existing);
			}
		}

		if !self.limiter.allow(queue_name) {
			return Err(QError::RateLimited(queue_name.to_string()));
		}

		let now = now_millis();
		let job = Job {
			id: Uuid::new_v4().to_string(),
			queue: queue_name.to_string(),
			payload,
			headers,
			priority,
			attempts: 0,
			max_attempts: retry.max_attempts,
			scheduled_ms: now + delay_ms as u64,
			enqueued_ms: now,
			lease_token: String::new(),
			lease_deadline_ms: 0,
			status: JobStatus::Ready,
		};

		self.wal.append(&Record::for_job(RecordType::Enqueue, &job))?;

		if let Err(error) = self.index.put_job(&job) {
			warn!("Failed to checkpoint job metadata: {}", error);
		}

		let job_id = job.id.clone();
		{
			let queue = self
				.queues
				.entry(queue_name.to_string())
				.or_insert_with(|| Mutex::new(QueueState::default()));
			queue.lock().unwrap().ready.insert(job);
		}

		// Duplicate prevention is best-effort across a crash between the
		// append above and this write.
		if !idempotency_key.is_empty() {
			if let Err(error) = self.index.set_idempotency_key(idempotency_key, &job_id) {
				error!("Failed to store idempotency key: {}", error);
			}
		}

		debug!("Job enqueued: {} [queue={} priority={}]", job_id, queue_name, priority);

		Ok(job_id)
	}

	/// Leases up to `max_jobs` deliverable jobs for `visibility_ms`.
	///
	/// Leases are in-memory state only: there is no WAL write here, and on
	/// a crash every in-flight job reverts to ready through replay. A lease
	/// that is neither acked nor nacked before its deadline is reclaimed as
	/// an implicit nack.
	///
	/// `max_jobs` of zero is treated as one; `visibility_ms` must be
	/// positive.
	pub fn lease(
		&self,
		queue_name: &str,
		max_jobs: usize,
		visibility_ms: i64,
	) -> QResult<Vec<LeasedJob>> {
		if visibility_ms <= 0 {
			return Err(QError::InvalidArgument(format!(
				"visibility must be positive, got {}",
				visibility_ms
			)));
		}
		let max_jobs = max_jobs.max(1);

		let queue = self
			.queues
			.get(queue_name)
			.ok_or_else(|| QError::NotFound(queue_name.to_string()))?;

		let now = now_millis();
		let deadline = now + visibility_ms as u64;
		let mut leased = Vec::new();

		let mut state = queue.lock().unwrap();
		while leased.len() < max_jobs {
			let mut job = match state.ready.pop_deliverable(now) {
				Some(job) => job,
				None => break,
			};

			job.status = JobStatus::InFlight;
			job.lease_token = Uuid::new_v4().to_string();
			job.lease_deadline_ms = deadline;

			debug!("Job leased: {} [lease={}]", job.id, job.lease_token);

			leased.push(LeasedJob::from(&job));
			state.inflight.insert(job.id.clone(), job);
		}

		Ok(leased)
	}

	/// Acknowledges a completed job and drops it.
	///
	/// The caller does not name the queue; the job is located across all
	/// in-flight maps. Fails with [QError::NotInflight] when the id is not
	/// currently leased and [QError::BadLease] on a token mismatch.
	pub fn ack(&self, job_id: &str, lease_token: &str) -> QResult<()> {
		let (queue_name, _) = self.locate_inflight(job_id, lease_token)?;

		let rec = Record {
			record_type: RecordType::Ack,
			queue: queue_name.clone(),
			job_id: job_id.to_string(),
			lease_token: lease_token.to_string(),
			..Default::default()
		};
		self.wal.append(&rec)?;

		if let Some(queue) = self.queues.get(&queue_name) {
			let mut state = queue.lock().unwrap();
			let held =
				matches!(state.inflight.get(job_id), Some(job) if job.lease_token == lease_token);
			if held {
				state.inflight.remove(job_id);
			} else {
				// Reclaimed between the append and here; the ack record
				// wins, as it will on replay.
				state.ready.remove(job_id);
			}
		}

		if let Err(error) = self.index.delete_job(job_id) {
			warn!("Failed to drop job metadata: {}", error);
		}

		debug!("Job acknowledged: {}", job_id);

		Ok(())
	}

	/// Negatively acknowledges a job.
	///
	/// The attempt counter is incremented and the job is either requeued
	/// with an exponential-backoff delay or, once the attempt ceiling is
	/// exceeded, moved to the queue's dead-letter set.
	pub fn nack(&self, job_id: &str, lease_token: &str, reason: &str) -> QResult<()> {
		let (queue_name, mut job) = self.locate_inflight(job_id, lease_token)?;

		job.attempts += 1;
		job.scheduled_ms =
			now_millis() + backoff::delay_for(&self.backoff, job.attempts).as_millis() as u64;
		job.clear_lease();

		let mut rec = Record::for_job(RecordType::Nack, &job);
		rec.payload = Bytes::new();
		rec.headers = HashMap::new();
		rec.lease_token = lease_token.to_string();
		rec.reason = reason.to_string();
		self.wal.append(&rec)?;

		self.finish_requeue(&queue_name, job, lease_token);

		Ok(())
	}

	/// Moves a job out of in-flight after its requeue record is durable.
	///
	/// Shared by [Self::nack] and the reclaimer. The in-flight entry is
	/// re-checked under the lock because it was released across the append.
	fn finish_requeue(&self, queue_name: &str, mut job: Job, lease_token: &str) {
		let retry = job.should_retry();

		if let Some(queue) = self.queues.get(queue_name) {
			let mut state = queue.lock().unwrap();

			let held =
				matches!(state.inflight.get(&job.id), Some(held) if held.lease_token == lease_token);
			if held {
				state.inflight.remove(&job.id);
			} else if state.ready.remove(&job.id).is_none() {
				return;
			}

			if retry {
				debug!("Job requeued: {} [attempts={}]", job.id, job.attempts);
				job.status = JobStatus::Ready;
				state.ready.insert(job);
			} else {
				warn!("Job dead-lettered: {} [attempts={}]", job.id, job.attempts);
				job.status = JobStatus::Dead;
				state.dead.insert(job.id.clone(), job);
			}
		}
	}

	fn locate_inflight(&self, job_id: &str, lease_token: &str) -> QResult<(String, Job)> {
		for entry in self.queues.iter() {
			let state = entry.value().lock().unwrap();
			if let Some(job) = state.inflight.get(job_id) {
				if job.lease_token != lease_token {
					return Err(QError::BadLease(job_id.to_string()));
				}
				return Ok((entry.key().clone(), job.clone()));
			}
		}

		Err(QError::NotInflight(job_id.to_string()))
	}

	/// One reclaimer pass: every expired lease is treated as an implicit
	/// nack, recorded as `REQUEUE` so replay can tell timeout-driven from
	/// operator-driven requeues.
	fn reclaim_tick(&self) {
		let now = now_millis();
		let names: Vec<String> = self.queues.iter().map(|entry| entry.key().clone()).collect();

		for name in names {
			let expired: Vec<Job> = match self.queues.get(&name) {
				Some(queue) => {
					let state = queue.lock().unwrap();
					state
						.inflight
						.values()
						.filter(|job| job.lease_deadline_ms < now)
						.cloned()
						.collect()
				},
				None => continue,
			};

			for mut job in expired {
				warn!("Lease expired, requeueing: {}", job.id);

				let token = job.lease_token.clone();
				job.attempts += 1;
				job.scheduled_ms =
					now + backoff::delay_for(&self.backoff, job.attempts).as_millis() as u64;
				job.clear_lease();

				let mut rec = Record::for_job(RecordType::Requeue, &job);
				rec.payload = Bytes::new();
				rec.headers = HashMap::new();

				if let Err(error) = self.wal.append(&rec) {
					// Leave the job in flight; the next tick retries.
					error!("Failed to append requeue record: {}", error);
					continue;
				}

				self.finish_requeue(&name, job, &token);
			}
		}
	}

	/// Returns the next deliverable job without leasing it.
	pub fn peek(&self, queue_name: &str) -> QResult<Option<Job>> {
		let queue = self
			.queues
			.get(queue_name)
			.ok_or_else(|| QError::NotFound(queue_name.to_string()))?;
		let state = queue.lock().unwrap();

		Ok(state.ready.peek_deliverable(now_millis()).cloned())
	}

	/// Removes a dead-lettered job. Administrative operation; the decision
	/// of when dead jobs are purged belongs to the surrounding system.
	pub fn remove_dead(&self, queue_name: &str, job_id: &str) -> QResult<()> {
		{
			let queue = self
				.queues
				.get(queue_name)
				.ok_or_else(|| QError::NotFound(queue_name.to_string()))?;
			let state = queue.lock().unwrap();
			if !state.dead.contains_key(job_id) {
				return Err(QError::NotFound(job_id.to_string()));
			}
		}

		let rec = Record {
			record_type: RecordType::Tombstone,
			queue: queue_name.to_string(),
			job_id: job_id.to_string(),
			..Default::default()
		};
		self.wal.append(&rec)?;

		if let Some(queue) = self.queues.get(queue_name) {
			queue.lock().unwrap().dead.remove(job_id);
		}

		if let Err(error) = self.index.delete_job(job_id) {
			warn!("Failed to drop job metadata: {}", error);
		}

		info!("Dead-lettered job removed: {} [queue={}]", job_id, queue_name);

		Ok(())
	}

	/// Folds all non-active WAL segments down to the live job set.
	/// Operator-triggered; the engine never compacts on its own.
	pub fn compact(&self) -> QResult<()> {
		let mut live = HashSet::new();
		for entry in self.queues.iter() {
			let state = entry.value().lock().unwrap();
			live.extend(state.ready.job_ids().cloned());
			live.extend(state.inflight.keys().cloned());
			live.extend(state.dead.keys().cloned());
		}

		self.wal.compact(&live)
	}

	pub fn stats(&self, queue_name: &str) -> QResult<QueueStats> {
		let queue = self
			.queues
			.get(queue_name)
			.ok_or_else(|| QError::NotFound(queue_name.to_string()))?;
		let state = queue.lock().unwrap();

		Ok(QueueStats {
			ready: state.ready.len(),
			in_flight: state.inflight.len(),
			dead: state.dead.len(),
		})
	}

	pub fn list_queues(&self) -> Vec<String> {
		let mut names: Vec<String> =
			self.queues.iter().map(|entry| entry.key().clone()).collect();
		names.sort();

		names
	}

	pub fn set_rate_limit(&self, queue_name: &str, capacity: f64, refill_rate: f64) {
		self.limiter.set_rate(queue_name, capacity, refill_rate);
	}

	/// Returns `(capacity, refill_rate)` or `None` when unlimited.
	pub fn get_rate_limit(&self, queue_name: &str) -> Option<(f64, f64)> {
		self.limiter.get_rate(queue_name)
	}

	pub fn wal_segment_count(&self) -> usize {
		self.wal.segment_count()
	}

	pub fn wal_total_size(&self) -> u64 {
		self.wal.total_size()
	}

	fn is_running(&self) -> bool {
		!self.shutdown.load(Ordering::Relaxed)
	}

	fn stop(&self) {
		info!("Queue Services: stop");

		self.shutdown.store(true, Ordering::Relaxed);
		let _ = self.shutdown_chan.0.try_send(true);
	}
}

/// Provides shared access to a running [WorkQueue] with its reclaimer.
pub struct WorkQueueService {
	q: Arc<WorkQueue>,
}

impl WorkQueueService {
	/// Opens the engine, replays the WAL and starts the reclaimer task.
	pub fn open(config: ServiceConfig) -> QResult<Self> {
		let q = Arc::new(WorkQueue::open(&config)?);
		q.start()?;

		std::thread::spawn({
			let q = Arc::clone(&q);
			let interval = config.reclaim_interval;
			move || Self::reclaim_task(q, interval)
		});

		Ok(Self { q })
	}

	fn reclaim_task(q: Arc<WorkQueue>, interval: Duration) {
		while q.is_running() {
			select!(
				recv(q.shutdown_chan.1) -> _ => {},
				default(interval) => {
					debug!("tick: reclaim");
					q.reclaim_tick();
				}
			)
		}
	}

	pub fn queue(&self) -> Arc<WorkQueue> {
		Arc::clone(&self.q)
	}
}

impl Drop for WorkQueueService {
	fn drop(&mut self) {
		debug!("drop: queue service");

		self.q.stop();
	}
}
