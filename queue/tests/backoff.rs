use std::time::Duration;

use ferrite_queue::backoff::{default_delay, delay_for, BackoffConfig};

#[test]
fn exponential_curve_without_jitter() {
	let config = BackoffConfig {
		base_delay: Duration::from_millis(100),
		max_delay: Duration::from_secs(10),
		multiplier: 2.0,
		jitter: 0.0,
	};

	let expected = [
		(0u32, Duration::ZERO),
		(1, Duration::from_millis(100)),
		(2, Duration::from_millis(200)),
		(3, Duration::from_millis(400)),
		(4, Duration::from_millis(800)),
		(5, Duration::from_millis(1_600)),
	];

	for (attempts, delay) in expected {
		assert_eq!(delay_for(&config, attempts), delay, "attempts {}", attempts);
	}
}

#[test]
fn capped_at_max_delay() {
	let config = BackoffConfig {
		base_delay: Duration::from_secs(1),
		max_delay: Duration::from_secs(5),
		multiplier: 2.0,
		jitter: 0.0,
	};

	assert_eq!(delay_for(&config, 10), Duration::from_secs(5));
}

#[test]
fn jitter_varies_within_bounds() {
	let config = BackoffConfig {
		base_delay: Duration::from_millis(100),
		max_delay: Duration::from_secs(10),
		multiplier: 2.0,
		jitter: 0.1,
	};

	let results: Vec<Duration> = (0..10).map(|_| delay_for(&config, 3)).collect();

	// Should vary between runs.
	assert!(results.iter().any(|delay| *delay != results[0]));

	// Every sample within 400ms ± 10%.
	for delay in results {
		assert!(delay >= Duration::from_millis(360), "too short: {:?}", delay);
		assert!(delay <= Duration::from_millis(440), "too long: {:?}", delay);
	}
}

#[test]
fn default_curve_starts_at_base() {
	assert_eq!(default_delay(0), Duration::ZERO);

	let first = default_delay(1);
	assert!(first >= Duration::from_millis(90));
	assert!(first <= Duration::from_millis(110));
}
