//! Token bucket rate limiter with `fixed`/`adaptive` strategies.
//!
//! The refill loop fixes the source's `refillTokens` bug: its `break` only
//! escaped the inner `select`, so it kept trying to send into a full channel
//! every tick instead of stopping early. Here the loop has an explicit exit
//! condition — it stops adding tokens once the bucket reports full.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
	Fixed,
	Adaptive,
}

impl From<&str> for Strategy {
	fn from(value: &str) -> Self {
		match value {
			"adaptive" => Strategy::Adaptive,
			_ => Strategy::Fixed,
		}
	}
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
	pub enabled: bool,
	pub strategy: Strategy,
	pub initial_rate: u32,
	pub max_rate: u32,
	pub min_rate: u32,
	pub backoff_factor: f64,
	pub recovery_factor: f64,
}

impl Default for RateLimitConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			strategy: Strategy::Fixed,
			initial_rate: 50,
			max_rate: 200,
			min_rate: 10,
			backoff_factor: 1.5,
			recovery_factor: 1.2,
		}
	}
}

/// Token bucket of capacity `max_rate`, refilled with `current_rate` tokens
/// once a second. `wait()` blocks rather than erroring (§7: `RateLimitError`
/// is never surfaced).
pub struct RateLimiter {
	semaphore: Arc<Semaphore>,
	max_rate: u32,
	current_rate: AtomicU32,
	min_rate: u32,
	backoff_factor: f64,
	recovery_factor: f64,
	strategy: Strategy,
	consecutive_successes: AtomicU64,
	cancel: CancellationToken,
}

impl RateLimiter {
	pub fn new(config: RateLimitConfig) -> Arc<Self> {
		let rl = Arc::new(Self {
			semaphore: Arc::new(Semaphore::new(0)),
			max_rate: config.max_rate.max(1),
			current_rate: AtomicU32::new(config.initial_rate.max(1)),
			min_rate: config.min_rate.max(1),
			backoff_factor: config.backoff_factor,
			recovery_factor: config.recovery_factor,
			strategy: config.strategy,
			consecutive_successes: AtomicU64::new(0),
			cancel: CancellationToken::new(),
		});
		rl.clone().spawn_refill();
		rl
	}

	fn spawn_refill(self: Arc<Self>) {
		tokio::spawn(async move {
			let mut tick = tokio::time::interval(Duration::from_secs(1));
			loop {
				tokio::select! {
					_ = tick.tick() => self.refill(),
					_ = self.cancel.cancelled() => return,
				}
			}
		});
	}

	fn refill(&self) {
		let rate = self.current_rate.load(Ordering::Relaxed) as usize;
		let capacity = self.max_rate as usize;
		let available = self.semaphore.available_permits();
		let room = capacity.saturating_sub(available);
		let to_add = room.min(rate);
		if to_add > 0 {
			self.semaphore.add_permits(to_add);
		}
	}

	/// Blocks until a token is available.
	pub async fn wait(&self) {
		// A permit is consumed by forgetting it, recreating the "token" bucket
		// semantics instead of a true release-based semaphore.
		if let Ok(permit) = self.semaphore.acquire().await {
			permit.forget();
		}
	}

	pub fn update_rate(&self, new_rate: u32) {
		self.current_rate.store(new_rate.max(1), Ordering::Relaxed);
	}

	pub fn current_rate(&self) -> u32 {
		self.current_rate.load(Ordering::Relaxed)
	}

	/// Adaptive feedback hook: failures back off immediately, successes need
	/// to accumulate before the rate recovers (mirrors §4.1: "sustained
	/// successes multiply by recovery_factor").
	pub fn report_failure(&self) {
		if self.strategy != Strategy::Adaptive {
			return;
		}
		self.consecutive_successes.store(0, Ordering::Relaxed);
		let current = self.current_rate.load(Ordering::Relaxed) as f64;
		let reduced = (current * self.backoff_factor).max(self.min_rate as f64);
		self.current_rate.store(reduced as u32, Ordering::Relaxed);
	}

	pub fn report_success(&self) {
		if self.strategy != Strategy::Adaptive {
			return;
		}
		let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
		const SUSTAINED_THRESHOLD: u64 = 10;
		if successes % SUSTAINED_THRESHOLD == 0 {
			let current = self.current_rate.load(Ordering::Relaxed) as f64;
			let increased = (current * self.recovery_factor).min(self.max_rate as f64);
			self.current_rate.store(increased as u32, Ordering::Relaxed);
		}
	}

	pub fn stop(&self) {
		self.cancel.cancel();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn waits_until_a_token_is_refilled() {
		let rl = RateLimiter::new(RateLimitConfig {
			initial_rate: 2,
			max_rate: 2,
			..Default::default()
		});
		tokio::time::advance(Duration::from_millis(1100)).await;
		rl.wait().await;
		rl.wait().await;
	}

	#[test]
	fn adaptive_backoff_floors_at_min_rate() {
		let rl = RateLimiter::new(RateLimitConfig {
			strategy: Strategy::Adaptive,
			initial_rate: 10,
			min_rate: 5,
			backoff_factor: 1.5,
			..Default::default()
		});
		for _ in 0..10 {
			rl.report_failure();
		}
		assert!(rl.current_rate() >= 5);
	}

	#[test]
	fn fixed_strategy_ignores_feedback() {
		let rl = RateLimiter::new(RateLimitConfig {
			strategy: Strategy::Fixed,
			initial_rate: 10,
			..Default::default()
		});
		rl.report_failure();
		assert_eq!(rl.current_rate(), 10);
	}
}
