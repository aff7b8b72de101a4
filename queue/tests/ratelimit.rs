use std::thread;
use std::time::Duration;

use ferrite_queue::ratelimit::{RateLimiter, TokenBucket};

#[test]
fn bucket_allows_up_to_capacity() {
	let bucket = TokenBucket::new(10.0, 1.0);

	for _ in 0..10 {
		assert!(bucket.allow());
	}

	assert!(!bucket.allow());
}

#[test]
fn bucket_refills_over_time() {
	let bucket = TokenBucket::new(10.0, 10.0);

	for _ in 0..10 {
		bucket.allow();
	}
	assert!(!bucket.allow());

	// ~2 tokens refill in 200ms.
	thread::sleep(Duration::from_millis(200));

	assert!(bucket.allow());
}

#[test]
fn zero_capacity_disables_limiting() {
	let bucket = TokenBucket::new(0.0, 0.0);

	for _ in 0..100 {
		assert!(bucket.allow());
	}
}

#[test]
fn set_rate_preserves_consumption() {
	let bucket = TokenBucket::new(10.0, 0.001);

	for _ in 0..8 {
		assert!(bucket.allow());
	}

	// Shrinking the capacity below the remaining balance clamps it.
	bucket.set_rate(1.0, 0.001);
	assert_eq!(bucket.rate(), (1.0, 0.001));

	assert!(bucket.allow());
	assert!(!bucket.allow());
}

#[test]
fn limiter_defaults_to_unlimited() {
	let limiter = RateLimiter::new();

	assert!(limiter.allow("queue1"));
	assert_eq!(limiter.get_rate("queue1"), None);

	limiter.set_rate("queue1", 5.0, 0.001);

	for _ in 0..5 {
		assert!(limiter.allow("queue1"));
	}
	assert!(!limiter.allow("queue1"));

	// Other queues stay unlimited.
	assert!(limiter.allow("queue2"));

	assert_eq!(limiter.get_rate("queue1"), Some((5.0, 0.001)));
	assert!(limiter.tokens("queue1").unwrap() < 1.0);
	assert_eq!(limiter.tokens("queue2"), None);
}
