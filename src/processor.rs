//! Task processor: turns a `ScanTask` into a `ScanResult` by running the
//! detector over every insertion point. Grounded in
//! `engine/processor/task_processor.go`.

use std::time::Instant;

use tracing::{error, info};
use uuid::Uuid;

use crate::detector::detect_vulnerability;
use crate::error::{ScanError, ValidationError};
use crate::http::client::ProbeClient;
use crate::metrics::Metrics;
use crate::model::{DetectionContext, Finding, InsertionPoint, ScanResult, ScanTask};

fn validate_task(task: &ScanTask) -> Result<(), ValidationError> {
	if task.id.is_empty() {
		return Err(ValidationError::MissingField("task.id"));
	}
	if task.target.url.is_empty() {
		return Err(ValidationError::MissingField("task.target.url"));
	}
	match &task.rule_context {
		Some(rc) if !rc.id.is_empty() => {},
		_ => return Err(ValidationError::MissingRuleContext),
	}
	Ok(())
}

fn context_for(task: &ScanTask, point: &InsertionPoint, payload_value: Option<&str>) -> DetectionContext {
	let mut payload = task.payload.clone();
	if let Some(value) = payload_value {
		payload.value = value.to_string();
	}
	DetectionContext {
		target: task.target.clone(),
		auth_context: task.auth_context.clone().unwrap_or_default(),
		insertion_point: point.clone(),
		payload,
		validation: task.validation.clone().unwrap_or_default(),
	}
}

/// `jwt_none` points get a single detector call with the template already
/// encoded in the point (no payload). Every other point iterates
/// `point.payloads` in order, stopping at the first `validated` evidence.
async fn process_insertion_point(
	task: &ScanTask,
	point: &InsertionPoint,
	probe: &ProbeClient,
) -> Result<Option<Finding>, ScanError> {
	let rule_id = task.rule_context.as_ref().map(|rc| rc.id.clone()).unwrap_or_default();
	let severity = task.rule_context.as_ref().map(|rc| rc.severity.clone()).unwrap_or_default();

	if point.is_jwt_none() {
		let ctx = context_for(task, point, None);
		let evidence = detect_vulnerability(&ctx, probe).await?;
		return Ok(Some(Finding {
			id: Uuid::new_v4().to_string(),
			rule_id,
			severity,
			title: "JWT none algorithm vulnerability".to_string(),
			details: "Successfully bypassed JWT signature verification using 'none' algorithm".to_string(),
			evidence: vec![evidence],
			..Default::default()
		}));
	}

	for payload_value in &point.payloads {
		let ctx = context_for(task, point, Some(payload_value));
		let evidence = match detect_vulnerability(&ctx, probe).await {
			Ok(evidence) => evidence,
			Err(_) => continue,
		};
		if evidence.validated {
			return Ok(Some(Finding {
				id: Uuid::new_v4().to_string(),
				rule_id,
				severity,
				title: format!("Vulnerability found in {}", point.location),
				details: format!("Successfully exploited using payload in {}", point.location),
				evidence: vec![evidence],
				..Default::default()
			}));
		}
	}

	Ok(None)
}

/// Validates `task`, runs the detector over every insertion point in
/// submission order, and assembles the `ScanResult`. `success` is true iff
/// at least one `Finding` was produced.
pub async fn process_task(task: &ScanTask, probe: &ProbeClient, metrics: &Metrics) -> Result<ScanResult, ScanError> {
	let started = Instant::now();
	validate_task(task)?;

	info!(task_id = %task.id, target = %task.target.url, method = %task.target.method, "processing scan task");

	let mut findings = Vec::new();
	for point in &task.insertion_points {
		match process_insertion_point(task, point, probe).await {
			Ok(Some(finding)) => findings.push(finding),
			Ok(None) => {},
			Err(err) => {
				error!(location = %point.location, kind = %point.kind, error = %err, "failed to process insertion point");
			},
		}
	}

	metrics.tasks.tasks_processed.inc();
	metrics
		.tasks
		.record_duration_ms(started.elapsed().as_secs_f64() * 1000.0);

	let scan_type = task.rule_context.as_ref().map(|rc| rc.category.clone()).unwrap_or_default();
	let mut result = ScanResult {
		task_id: task.id.clone(),
		success: !findings.is_empty(),
		findings,
		evidence: None,
		timestamp: crate::model::now_unix(),
		metadata: Default::default(),
	};
	result.metadata.insert("scanner_version".to_string(), "1.0.0".to_string());
	result.metadata.insert("scan_type".to_string(), scan_type);
	result
		.metadata
		.insert("duration_ms".to_string(), (started.elapsed().as_secs_f64() * 1000.0).to_string());

	Ok(result)
}
