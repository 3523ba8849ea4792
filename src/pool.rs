//! Worker pool: bounded task queue, N worker fibres, a result channel, and a
//! cancellation signal. Grounded in `engine/worker/pool.go` and
//! `engine/worker/worker.go`, but sized by dedicated `workers`/`queue_size`
//! fields instead of reusing `max_retries` for both (the original conflates
//! retry count with worker count and queue depth).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::error::PoolError;
use crate::http::client::ProbeClient;
use crate::metrics::Metrics;
use crate::model::{ScanResult, ScanTask};
use crate::processor::process_task;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
	pub workers: usize,
	pub queue_size: usize,
	pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
	fn default() -> Self {
		Self {
			workers: 5,
			queue_size: 100,
			shutdown_timeout: Duration::from_secs(30),
		}
	}
}

/// A task queued alongside an optional dedicated reply channel. Callers that
/// need their own result stream (e.g. one `StreamResults` RPC among several
/// concurrent ones) pass a reply sender so their results never end up
/// interleaved with another caller's on the pool's shared result channel.
struct QueuedTask {
	task: ScanTask,
	reply: Option<mpsc::Sender<ScanResult>>,
}

/// `pending -> running -> {completed, failed}` per task; the caller observes
/// this through `tasks_processed`/`tasks_failed` and the results drained
/// from [`WorkerPool::recv_result`] (or, for a caller that submitted with its
/// own reply channel via [`WorkerPool::submit_with_reply`], from that channel).
pub struct WorkerPool {
	task_tx: mpsc::Sender<QueuedTask>,
	result_rx: Mutex<mpsc::Receiver<ScanResult>>,
	cancel: CancellationToken,
	workers: Mutex<JoinSet<()>>,
	shutdown_timeout: Duration,
	metrics: Arc<Metrics>,
}

impl WorkerPool {
	/// Starts `config.workers` worker fibres pulling from a queue bounded at
	/// `config.queue_size`.
	pub fn start(config: WorkerPoolConfig, probe: Arc<ProbeClient>, metrics: Arc<Metrics>) -> Arc<Self> {
		let (task_tx, task_rx) = mpsc::channel(config.queue_size.max(1));
		let (result_tx, result_rx) = mpsc::channel(config.queue_size.max(1));
		let cancel = CancellationToken::new();
		let task_rx = Arc::new(Mutex::new(task_rx));

		let mut workers = JoinSet::new();
		for id in 0..config.workers.max(1) {
			let task_rx = task_rx.clone();
			let result_tx = result_tx.clone();
			let cancel = cancel.clone();
			let probe = probe.clone();
			let metrics = metrics.clone();
			workers.spawn(worker_loop(id, task_rx, result_tx, cancel, probe, metrics));
		}

		Arc::new(Self {
			task_tx,
			result_rx: Mutex::new(result_rx),
			cancel,
			workers: Mutex::new(workers),
			shutdown_timeout: config.shutdown_timeout,
			metrics,
		})
	}

	/// Enqueues `task`; blocks while the queue is full. Fails immediately
	/// once the pool has begun shutting down. Counts the task as pending
	/// until a worker fibre finishes processing it. The result is published
	/// to the pool's shared result channel — use [`Self::submit_with_reply`]
	/// when the caller needs its own, uncontended result path.
	pub async fn submit(&self, task: ScanTask) -> Result<(), PoolError> {
		self.submit_queued(QueuedTask { task, reply: None }).await
	}

	/// Like [`Self::submit`], but the result is delivered to `reply` instead
	/// of the shared result channel. Used by callers (e.g. one `StreamResults`
	/// RPC among several concurrent ones) that must not observe another
	/// caller's results.
	pub async fn submit_with_reply(&self, task: ScanTask, reply: mpsc::Sender<ScanResult>) -> Result<(), PoolError> {
		self.submit_queued(QueuedTask { task, reply: Some(reply) }).await
	}

	async fn submit_queued(&self, queued: QueuedTask) -> Result<(), PoolError> {
		let result = tokio::select! {
			biased;
			_ = self.cancel.cancelled() => Err(PoolError::ShuttingDown),
			result = self.task_tx.send(queued) => result.map_err(|_| PoolError::ShuttingDown),
		};
		if result.is_ok() {
			self.metrics.tasks.tasks_pending.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
		}
		result
	}

	/// Drains one processed result. Returns `None` once every worker has
	/// exited and the channel is drained.
	pub async fn recv_result(&self) -> Option<ScanResult> {
		self.result_rx.lock().await.recv().await
	}

	/// Signals cancellation, then waits up to `shutdown_timeout` for every
	/// worker fibre to finish; any still running past the deadline are left
	/// to terminate on their own.
	pub async fn stop(&self) {
		self.cancel.cancel();
		let mut workers = self.workers.lock().await;
		let _ = tokio::time::timeout(self.shutdown_timeout, async {
			while workers.join_next().await.is_some() {}
		})
		.await;
	}
}

async fn worker_loop(
	id: usize,
	task_rx: Arc<Mutex<mpsc::Receiver<QueuedTask>>>,
	result_tx: mpsc::Sender<ScanResult>,
	cancel: CancellationToken,
	probe: Arc<ProbeClient>,
	metrics: Arc<Metrics>,
) {
	loop {
		let queued = {
			let mut rx = task_rx.lock().await;
			tokio::select! {
				biased;
				_ = cancel.cancelled() => None,
				queued = rx.recv() => queued,
			}
		};
		let Some(QueuedTask { task, reply }) = queued else { break };

		let outcome = process_task(&task, &probe, &metrics).await;
		metrics.tasks.tasks_pending.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
		match outcome {
			Ok(result) => match reply {
				// A dedicated reply channel going away (its caller disconnected)
				// is local to that one submission, not a pool-wide shutdown.
				Some(reply) => {
					let _ = reply.send(result).await;
				},
				None => {
					if result_tx.send(result).await.is_err() {
						break;
					}
				},
			},
			Err(err) => {
				metrics.tasks.tasks_failed.inc();
				error!(worker_id = id, task_id = %task.id, error = %err, "task processing failed");
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::http::client::ClientConfig;
	use crate::http::ratelimit::{RateLimitConfig, RateLimiter};
	use crate::http::retry::{Retrier, RetryConfig};
	use crate::model::Target;
	use prometheus_client::registry::Registry;
	use wiremock::matchers::method;
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn probe() -> Arc<ProbeClient> {
		Arc::new(
			ProbeClient::new(
				ClientConfig::default(),
				RateLimiter::new(RateLimitConfig {
					initial_rate: 1000,
					max_rate: 1000,
					..Default::default()
				}),
				Retrier::new(RetryConfig::default()),
				None,
				metrics(),
			)
			.unwrap(),
		)
	}

	fn metrics() -> Arc<Metrics> {
		let mut registry = Registry::default();
		Arc::new(Metrics::new(&mut registry))
	}

	#[tokio::test]
	async fn processes_submitted_task_and_yields_a_result() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.respond_with(ResponseTemplate::new(200))
			.mount(&server)
			.await;

		let pool = WorkerPool::start(
			WorkerPoolConfig {
				workers: 2,
				queue_size: 4,
				shutdown_timeout: Duration::from_secs(1),
			},
			probe(),
			metrics(),
		);

		let task = ScanTask {
			id: "t1".to_string(),
			target: Target {
				url: server.uri(),
				method: "GET".to_string(),
				protocol_hint: String::new(),
			},
			rule_context: Some(crate::model::RuleContext {
				id: "r1".to_string(),
				category: "xss".to_string(),
				severity: Default::default(),
			}),
			..Default::default()
		};

		pool.submit(task).await.unwrap();
		let result = pool.recv_result().await.unwrap();
		assert_eq!(result.task_id, "t1");

		pool.stop().await;
	}

	#[tokio::test]
	async fn tasks_pending_returns_to_zero_after_completion() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.respond_with(ResponseTemplate::new(200))
			.mount(&server)
			.await;

		let metrics = metrics();
		let pool = WorkerPool::start(
			WorkerPoolConfig {
				workers: 1,
				queue_size: 4,
				shutdown_timeout: Duration::from_secs(1),
			},
			probe(),
			metrics.clone(),
		);

		let task = ScanTask {
			id: "t1".to_string(),
			target: Target {
				url: server.uri(),
				method: "GET".to_string(),
				protocol_hint: String::new(),
			},
			rule_context: Some(crate::model::RuleContext {
				id: "r1".to_string(),
				category: "xss".to_string(),
				severity: Default::default(),
			}),
			..Default::default()
		};

		pool.submit(task).await.unwrap();
		assert_eq!(metrics.tasks.snapshot().tasks_pending, 1);
		pool.recv_result().await.unwrap();
		assert_eq!(metrics.tasks.snapshot().tasks_pending, 0);

		pool.stop().await;
	}

	#[tokio::test]
	async fn submit_fails_once_shutdown_begins() {
		let pool = WorkerPool::start(
			WorkerPoolConfig {
				workers: 1,
				queue_size: 1,
				shutdown_timeout: Duration::from_millis(100),
			},
			probe(),
			metrics(),
		);
		pool.stop().await;
		let err = pool.submit(ScanTask::default()).await.unwrap_err();
		assert!(matches!(err, PoolError::ShuttingDown));
	}

	#[tokio::test]
	async fn submit_with_reply_keeps_results_off_the_shared_channel() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.respond_with(ResponseTemplate::new(200))
			.mount(&server)
			.await;

		let pool = WorkerPool::start(
			WorkerPoolConfig {
				workers: 2,
				queue_size: 4,
				shutdown_timeout: Duration::from_secs(1),
			},
			probe(),
			metrics(),
		);

		let task = |id: &str| ScanTask {
			id: id.to_string(),
			target: Target {
				url: server.uri(),
				method: "GET".to_string(),
				protocol_hint: String::new(),
			},
			rule_context: Some(crate::model::RuleContext {
				id: "r1".to_string(),
				category: "xss".to_string(),
				severity: Default::default(),
			}),
			..Default::default()
		};

		let (reply_tx, mut reply_rx) = mpsc::channel(4);
		pool.submit_with_reply(task("own-reply"), reply_tx).await.unwrap();
		pool.submit(task("shared")).await.unwrap();

		let own = reply_rx.recv().await.unwrap();
		assert_eq!(own.task_id, "own-reply");

		let shared = pool.recv_result().await.unwrap();
		assert_eq!(shared.task_id, "shared");

		pool.stop().await;
	}
}
