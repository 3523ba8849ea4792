//! Prometheus registry and per-component counters, exposed over an `axum`
//! `/metrics` endpoint. `Deferred`/`DeferRecorder` are carried over verbatim
//! from the teacher's `metrics.rs`/`mtrcs.rs` (record-on-drop RAII pattern).

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use parking_lot::RwLock;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use tracing::error;

/// Creates the scanner's metrics sub registry.
pub fn sub_registry(registry: &mut Registry) -> &mut Registry {
	registry.sub_registry_with_prefix("vulnscan_worker")
}

pub struct Deferred<'a, F, T>
where
	F: FnOnce(&'a T),
	T: ?Sized,
{
	param: &'a T,
	deferred_fn: Option<F>,
}

impl<'a, F, T> Deferred<'a, F, T>
where
	F: FnOnce(&'a T),
	T: ?Sized,
{
	pub fn new(param: &'a T, deferred_fn: F) -> Self {
		Self {
			param,
			deferred_fn: Some(deferred_fn),
		}
	}
}

impl<'a, F, T> Drop for Deferred<'a, F, T>
where
	F: FnOnce(&'a T),
	T: ?Sized,
{
	fn drop(&mut self) {
		if let Some(deferred_fn) = mem::take(&mut self.deferred_fn) {
			(deferred_fn)(self.param);
		} else {
			error!("defer deferred record failed, event is gone");
		}
	}
}

pub trait DeferRecorder {
	#[must_use = "metric will be dropped (and thus recorded) immediately if not assigned"]
	/// Perform a record operation on this object when the returned [Deferred] object is dropped.
	fn defer_record<'a, F>(&'a self, record: F) -> Deferred<'a, F, Self>
	where
		F: FnOnce(&'a Self),
	{
		Deferred::new(self, record)
	}
}

/// Counters for the worker pool and task processor, the two components the
/// `GetScanStatus`/`Heartbeat` RPCs report on.
#[derive(Clone)]
pub struct TaskMetrics {
	pub tasks_processed: Counter,
	pub tasks_failed: Counter,
	pub tasks_pending: Arc<AtomicU64>,
	durations_ms: Arc<RwLock<Vec<f64>>>,
}

impl Default for TaskMetrics {
	fn default() -> Self {
		Self::new()
	}
}

impl TaskMetrics {
	pub fn new() -> Self {
		Self {
			tasks_processed: Counter::default(),
			tasks_failed: Counter::default(),
			tasks_pending: Arc::new(AtomicU64::new(0)),
			durations_ms: Arc::new(RwLock::new(Vec::with_capacity(100))),
		}
	}

	pub fn record_duration_ms(&self, duration_ms: f64) {
		let mut buf = self.durations_ms.write();
		if buf.len() >= 100 {
			buf.remove(0);
		}
		buf.push(duration_ms);
	}

	pub fn average_duration_ms(&self) -> f64 {
		let buf = self.durations_ms.read();
		if buf.is_empty() {
			0.0
		} else {
			buf.iter().sum::<f64>() / buf.len() as f64
		}
	}

	pub fn snapshot(&self) -> TaskMetricsSnapshot {
		TaskMetricsSnapshot {
			tasks_processed: self.tasks_processed.get(),
			tasks_failed: self.tasks_failed.get(),
			tasks_pending: self.tasks_pending.load(Ordering::Relaxed),
			average_duration_ms: self.average_duration_ms(),
		}
	}
}

#[derive(Debug, Clone, Copy)]
pub struct TaskMetricsSnapshot {
	pub tasks_processed: u64,
	pub tasks_failed: u64,
	pub tasks_pending: u64,
	pub average_duration_ms: f64,
}

/// Cache hit/miss counters, registered on the Prometheus registry like every
/// other component counter (§9.4) rather than kept as unregistered atomics.
#[derive(Clone, Default)]
pub struct CacheMetrics {
	hits: Counter,
	misses: Counter,
}

impl CacheMetrics {
	pub fn record_hit(&self) {
		self.hits.inc();
	}
	pub fn record_miss(&self) {
		self.misses.inc();
	}
	pub fn hit_rate(&self) -> f64 {
		let hits = self.hits.get();
		let misses = self.misses.get();
		let total = hits + misses;
		if total == 0 {
			0.0
		} else {
			hits as f64 / total as f64
		}
	}
}

#[derive(Clone)]
pub struct Metrics {
	pub tasks: TaskMetrics,
	pub cache: CacheMetrics,
	pub retry_attempts: Counter,
	pub rate_limiter_waits: Counter,
	pub proxy_blacklist_events: Counter,
	pub probe_duration: Histogram,
}

impl Metrics {
	pub fn new(registry: &mut Registry) -> Self {
		let sub = sub_registry(registry);
		let tasks = TaskMetrics::new();
		let cache = CacheMetrics::default();
		let retry_attempts = Counter::default();
		let rate_limiter_waits = Counter::default();
		let proxy_blacklist_events = Counter::default();
		let probe_duration = Histogram::new(
			[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0].into_iter(),
		);

		sub.register(
			"tasks_processed",
			"total tasks processed",
			tasks.tasks_processed.clone(),
		);
		sub.register(
			"tasks_failed",
			"total tasks failed",
			tasks.tasks_failed.clone(),
		);
		sub.register(
			"retry_attempts",
			"total probe retry attempts",
			retry_attempts.clone(),
		);
		sub.register(
			"rate_limiter_waits",
			"total times a probe waited on the rate limiter",
			rate_limiter_waits.clone(),
		);
		sub.register(
			"proxy_blacklist_events",
			"total proxies moved to the blacklist",
			proxy_blacklist_events.clone(),
		);
		sub.register(
			"probe_duration_seconds",
			"probe request duration",
			probe_duration.clone(),
		);
		sub.register("cache_hits", "total payload cache hits", cache.hits.clone());
		sub.register("cache_misses", "total payload cache misses", cache.misses.clone());

		Self {
			tasks,
			cache,
			retry_attempts,
			rate_limiter_waits,
			proxy_blacklist_events,
			probe_duration,
		}
	}
}

#[derive(Clone)]
pub struct App {
	registry: Arc<Registry>,
}

impl App {
	pub fn new(registry: Arc<Registry>) -> Self {
		Self { registry }
	}
	pub fn router(&self) -> Router {
		Router::new()
			.route("/metrics", get(metrics_handler))
			.with_state(self.clone())
	}
}

async fn metrics_handler(State(app): State<App>) -> Result<String, StatusCode> {
	let mut buffer = String::new();
	match encode(&mut buffer, &app.registry) {
		Ok(()) => Ok(buffer),
		Err(e) => {
			error!("error encoding metrics: {e:?}");
			Err(StatusCode::INTERNAL_SERVER_ERROR)
		},
	}
}
