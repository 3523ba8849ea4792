//! `ScannerService` gRPC implementation. Grounded in `service.go` for the
//! method shapes; `StreamResults` follows the wire contract in
//! `proto/scanner.proto` (client streams `ScanTask`, server streams `ScanResult`).

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{error, info};

use crate::error::ScanError;
use crate::http::client::ProbeClient;
use crate::metrics::Metrics;
use crate::model::now_unix;
use crate::pool::WorkerPool;
use crate::processor::process_task;
use crate::rpc::convert::scan_task_from_proto;
use crate::rpc::proto as pb;
use crate::rpc::proto::scanner_service_server::ScannerService;

/// Tracks the last known state of each task submitted through this service,
/// so `GetTaskStatus` has something to answer with.
#[derive(Default)]
struct TaskStatusStore {
	states: RwLock<HashMap<String, (String, String)>>,
}

impl TaskStatusStore {
	fn set(&self, task_id: &str, state: &str, detail: &str) {
		self.states
			.write()
			.insert(task_id.to_string(), (state.to_string(), detail.to_string()));
	}

	fn get(&self, task_id: &str) -> Option<(String, String)> {
		self.states.read().get(task_id).cloned()
	}
}

pub struct Service {
	probe: Arc<ProbeClient>,
	pool: Arc<WorkerPool>,
	metrics: Arc<Metrics>,
	node_id: String,
	status: TaskStatusStore,
}

impl Service {
	pub fn new(probe: Arc<ProbeClient>, pool: Arc<WorkerPool>, metrics: Arc<Metrics>, node_id: String) -> Self {
		Self {
			probe,
			pool,
			metrics,
			node_id,
			status: TaskStatusStore::default(),
		}
	}

	async fn run_task(&self, task: pb::ScanTask) -> Result<pb::ScanResult, Status> {
		let domain_task = scan_task_from_proto(task).map_err(|e| Status::from(ScanError::Validation(e)))?;
		self.status.set(&domain_task.id, "running", "");

		match process_task(&domain_task, &self.probe, &self.metrics).await {
			Ok(result) => {
				self.status.set(&domain_task.id, "completed", "");
				Ok(result.into())
			},
			Err(err) => {
				error!(task_id = %domain_task.id, error = %err, "task processing failed");
				self.status.set(&domain_task.id, "failed", &err.to_string());
				Err(Status::from(err))
			},
		}
	}
}

#[tonic::async_trait]
impl ScannerService for Service {
	async fn execute_scan(&self, request: Request<pb::ScanTask>) -> Result<Response<pb::ScanResult>, Status> {
		let result = self.run_task(request.into_inner()).await?;
		Ok(Response::new(result))
	}

	type StreamResultsStream = Pin<Box<dyn futures::Stream<Item = Result<pb::ScanResult, Status>> + Send + 'static>>;

	/// Client-streamed `ScanTask`s are handed to the worker pool's bounded
	/// queue (the same dispatch path the pool's own fibres service), so a
	/// flood of streamed tasks gets the same backpressure and concurrency
	/// limits as any other submission. Each submission carries this call's
	/// own reply channel (`submit_with_reply`) rather than the pool's shared
	/// result channel, so two `StreamResults` calls in flight at once each
	/// only ever see their own results — the shared channel has no per-call
	/// correlation and would let one caller's results leak to another's.
	/// A submission that fails validation or hits a shutting-down pool is
	/// reported in place without consuming a slot.
	async fn stream_results(
		&self,
		request: Request<Streaming<pb::ScanTask>>,
	) -> Result<Response<Self::StreamResultsStream>, Status> {
		let mut incoming = request.into_inner();
		let (tx, rx) = mpsc::channel(16);
		let (reply_tx, mut reply_rx) = mpsc::channel(16);

		let pool = self.pool.clone();

		tokio::spawn(async move {
			let mut submitted = 0usize;
			while let Some(next) = incoming.message().await.transpose() {
				let task = match next {
					Ok(task) => task,
					Err(status) => {
						let _ = tx.send(Err(status)).await;
						break;
					},
				};

				match scan_task_from_proto(task) {
					Ok(domain_task) => match pool.submit_with_reply(domain_task, reply_tx.clone()).await {
						Ok(()) => submitted += 1,
						Err(err) => {
							if tx.send(Err(Status::from(ScanError::from(err)))).await.is_err() {
								return;
							}
						},
					},
					Err(err) => {
						if tx.send(Err(Status::from(ScanError::Validation(err)))).await.is_err() {
							return;
						}
					},
				}
			}
			drop(reply_tx);

			for _ in 0..submitted {
				match reply_rx.recv().await {
					Some(result) => {
						if tx.send(Ok(result.into())).await.is_err() {
							break;
						}
					},
					None => break,
				}
			}
		});

		Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
	}

	async fn get_task_status(&self, request: Request<pb::TaskStatusRequest>) -> Result<Response<pb::TaskStatus>, Status> {
		let task_id = request.into_inner().task_id;
		let (state, detail) = self.status.get(&task_id).unwrap_or_else(|| ("unknown".to_string(), String::new()));
		Ok(Response::new(pb::TaskStatus {
			task_id,
			state,
			detail,
		}))
	}

	async fn get_scan_status(&self, _request: Request<pb::StatusRequest>) -> Result<Response<pb::ScanStatus>, Status> {
		let snapshot = self.metrics.tasks.snapshot();
		Ok(Response::new(pb::ScanStatus {
			tasks_processed: snapshot.tasks_processed as i64,
			tasks_failed: snapshot.tasks_failed as i64,
			tasks_pending: snapshot.tasks_pending as i64,
			average_duration_ms: snapshot.average_duration_ms,
		}))
	}

	async fn heartbeat(&self, request: Request<pb::HeartbeatRequest>) -> Result<Response<pb::HeartbeatResponse>, Status> {
		let requested_node = request.into_inner().node_id;
		info!(node_id = %requested_node, self_node_id = %self.node_id, "heartbeat received");
		let mut metadata = HashMap::new();
		metadata.insert("node_id".to_string(), self.node_id.clone());
		Ok(Response::new(pb::HeartbeatResponse {
			healthy: true,
			timestamp: now_unix(),
			metadata,
		}))
	}
}
