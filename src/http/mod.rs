pub mod client;
pub mod ratelimit;
pub mod retry;

pub use client::{ClientConfig, ProbeClient};
pub use ratelimit::{RateLimitConfig, RateLimiter, Strategy as RateLimitStrategy};
pub use retry::{RetryConfig, RetryOn, Retrier};
