//! Retry policy: up to `max_attempts`, exponential backoff capped at
//! `max_delay`, ±20% jitter. Grounded in `http/client/retry.go`.

use std::time::Duration;

use rand::Rng;

use crate::error::HttpError;

#[derive(Debug, Clone)]
pub struct RetryOn {
	pub status_codes: Vec<u16>,
	pub network_errors: bool,
	pub timeouts: bool,
}

impl Default for RetryOn {
	fn default() -> Self {
		Self {
			status_codes: vec![429, 500, 502, 503, 504],
			network_errors: true,
			timeouts: true,
		}
	}
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
	pub max_attempts: u32,
	pub initial_delay: Duration,
	pub max_delay: Duration,
	pub backoff_multiplier: f64,
	pub retry_on: RetryOn,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			initial_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(10),
			backoff_multiplier: 2.0,
			retry_on: RetryOn::default(),
		}
	}
}

pub struct Retrier {
	config: RetryConfig,
}

impl Retrier {
	pub fn new(config: RetryConfig) -> Self {
		Self { config }
	}

	pub fn should_retry_status(&self, status: u16) -> bool {
		self.config.retry_on.status_codes.contains(&status)
	}

	pub fn should_retry_error(&self, err: &HttpError) -> bool {
		(self.config.retry_on.network_errors && err.is_network())
			|| (self.config.retry_on.timeouts && err.is_timeout())
	}

	pub fn max_attempts(&self) -> u32 {
		self.config.max_attempts
	}

	/// `delay = min(initial_delay * multiplier^(attempt-1), max_delay)`, then
	/// ±20% jitter. `attempt` is 1-indexed.
	pub fn backoff(&self, attempt: u32) -> Duration {
		let exp = self.config.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
		let base = self.config.initial_delay.mul_f64(exp);
		let capped = base.min(self.config.max_delay);
		let jitter = rand::rng().random_range(-0.2..=0.2);
		capped.mul_f64(1.0 + jitter).max(Duration::ZERO)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn backoff_is_monotonic_ignoring_jitter() {
		let retrier = Retrier::new(RetryConfig {
			initial_delay: Duration::from_millis(100),
			max_delay: Duration::from_secs(1),
			backoff_multiplier: 2.0,
			..Default::default()
		});
		// Compare the unjittered bases directly since jitter can invert ordering
		// for any single draw.
		let base = |attempt: u32| {
			Duration::from_millis(100)
				.mul_f64(2f64.powi(attempt.saturating_sub(1) as i32))
				.min(Duration::from_secs(1))
		};
		assert!(base(1) <= base(2));
		assert!(base(2) <= base(3));
		assert_eq!(base(10), Duration::from_secs(1));
		let _ = retrier.backoff(1);
	}

	#[test]
	fn retry_on_configured_status_codes_only() {
		let retrier = Retrier::new(RetryConfig::default());
		assert!(retrier.should_retry_status(503));
		assert!(!retrier.should_retry_status(200));
	}
}
