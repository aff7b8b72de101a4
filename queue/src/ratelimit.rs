//! Per-queue token bucket rate limiting.
use std::sync::Mutex;
use std::time::Instant;

use dashmap::DashMap;

/// A token bucket: `capacity` tokens refilled at `refill_rate` per second.
///
/// A capacity or rate of zero (or below) disables the bucket entirely.
#[derive(Debug)]
pub struct TokenBucket {
	state: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
	capacity: f64,
	refill_rate: f64,
	tokens: f64,
	last_refill: Instant,
	enabled: bool,
}

impl Bucket {
	fn refill(&mut self) {
		let now = Instant::now();
		let elapsed = now.duration_since(self.last_refill).as_secs_f64();

		self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
		self.last_refill = now;
	}
}

impl TokenBucket {
	pub fn new(capacity: f64, refill_rate: f64) -> Self {
		Self {
			state: Mutex::new(Bucket {
				capacity,
				refill_rate,
				tokens: capacity,
				last_refill: Instant::now(),
				enabled: capacity > 0.0 && refill_rate > 0.0,
			}),
		}
	}

	/// Refills from elapsed time and tries to take one token.
	pub fn allow(&self) -> bool {
		self.allow_n(1.0)
	}

	pub fn allow_n(&self, n: f64) -> bool {
		let mut state = self.state.lock().unwrap();

		if !state.enabled {
			return true;
		}

		state.refill();

		if state.tokens >= n {
			state.tokens -= n;
			true
		} else {
			false
		}
	}

	/// Replaces the limits, preserving tokens already consumed.
	pub fn set_rate(&self, capacity: f64, refill_rate: f64) {
		let mut state = self.state.lock().unwrap();

		// Settle the balance under the old rate first.
		state.refill();

		state.capacity = capacity;
		state.refill_rate = refill_rate;
		state.enabled = capacity > 0.0 && refill_rate > 0.0;

		if state.tokens > state.capacity {
			state.tokens = state.capacity;
		}
	}

	pub fn rate(&self) -> (f64, f64) {
		let state = self.state.lock().unwrap();

		(state.capacity, state.refill_rate)
	}

	/// Current balance after refill.
	pub fn tokens(&self) -> f64 {
		let mut state = self.state.lock().unwrap();
		state.refill();

		state.tokens
	}
}

/// Rate limiters for all queues; queues without a bucket admit everything.
#[derive(Debug, Default)]
pub struct RateLimiter {
	buckets: DashMap<String, TokenBucket>,
}

impl RateLimiter {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn allow(&self, queue: &str) -> bool {
		match self.buckets.get(queue) {
			Some(bucket) => bucket.allow(),
			None => true,
		}
	}

	pub fn set_rate(&self, queue: &str, capacity: f64, refill_rate: f64) {
		match self.buckets.get(queue) {
			Some(bucket) => bucket.set_rate(capacity, refill_rate),
			None => {
				self.buckets
					.insert(queue.to_string(), TokenBucket::new(capacity, refill_rate));
			},
		}
	}

	pub fn get_rate(&self, queue: &str) -> Option<(f64, f64)> {
		self.buckets.get(queue).map(|bucket| bucket.rate())
	}

	pub fn tokens(&self, queue: &str) -> Option<f64> {
		self.buckets.get(queue).map(|bucket| bucket.tokens())
	}
}
