//! This crate provides access to the [Ferrite Work Queue Services](queue).
//!
use std::sync::OnceLock;
use std::time::{Instant, UNIX_EPOCH};

pub mod backoff;
pub mod error;
pub mod index;
pub mod jobs;
pub mod ratelimit;
pub mod ready;
pub mod record;
pub mod segment;
pub mod wal;

pub mod queue;
pub use queue::{QueueStats, ServiceConfig, WorkQueue, WorkQueueService};

/// Milliseconds since the unix epoch, monotonic within this process.
///
/// Anchored to the wall clock once at first use and advanced by a monotonic
/// timer, so scheduled-time and lease-deadline comparisons never move
/// backwards on wall-clock jumps. Persisted values stay absolute.
pub(crate) fn now_millis() -> u64 {
	static ANCHOR: OnceLock<(u64, Instant)> = OnceLock::new();

	let (wall, started) = ANCHOR
		.get_or_init(|| (UNIX_EPOCH.elapsed().unwrap().as_millis() as u64, Instant::now()));

	wall + started.elapsed().as_millis() as u64
}
