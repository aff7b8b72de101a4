//! Exponential backoff with jitter.
use std::time::Duration;

use getset::Setters;
use rand::Rng;

const DEFAULT_BASE_DELAY_MS: u64 = 100;
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
const DEFAULT_MULTIPLIER: f64 = 2.0;
const DEFAULT_JITTER: f64 = 0.1;

/// Shape of the retry delay curve.
#[derive(Debug, Clone, Copy, Setters)]
#[getset(set = "pub")]
pub struct BackoffConfig {
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub multiplier: f64,
	/// Jitter fraction in [0, 1]; the delay varies by ±(jitter × delay).
	pub jitter: f64,
}

impl Default for BackoffConfig {
	fn default() -> Self {
		Self {
			base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
			max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
			multiplier: DEFAULT_MULTIPLIER,
			jitter: DEFAULT_JITTER,
		}
	}
}

/// Computes the delay before the given attempt is retried.
///
/// `raw = base × multiplier^(attempts − 1)` capped at `max_delay`, then
/// jittered uniformly by ±(jitter × raw). Attempt zero waits nothing.
pub fn delay_for(config: &BackoffConfig, attempts: u32) -> Duration {
	if attempts == 0 {
		return Duration::ZERO;
	}

	let mut delay =
		config.base_delay.as_secs_f64() * config.multiplier.powi(attempts as i32 - 1);

	let max = config.max_delay.as_secs_f64();
	if delay > max {
		delay = max;
	}

	if config.jitter > 0.0 {
		let range = delay * config.jitter;
		delay += rand::thread_rng().gen_range(-range..=range);
	}

	if delay < 0.0 {
		delay = 0.0;
	}

	Duration::from_secs_f64(delay)
}

/// [delay_for] with the default curve.
pub fn default_delay(attempts: u32) -> Duration {
	delay_for(&BackoffConfig::default(), attempts)
}
