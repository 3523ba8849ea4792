//! Conversions between the generated prost types and the domain model in
//! [`crate::model`]. The wire `Payload` message nests `insertion_points`;
//! the domain `ScanTask` keeps them as a sibling field, so converting a task
//! flattens that nesting rather than carrying a matching `Payload.insertion_points`.

use crate::error::ValidationError;
use crate::model;
use crate::rpc::proto as pb;

impl From<pb::Target> for model::Target {
	fn from(t: pb::Target) -> Self {
		Self {
			url: t.url,
			method: t.method,
			protocol_hint: t.protocol_hint,
		}
	}
}

impl From<pb::AuthContext> for model::AuthContext {
	fn from(a: pb::AuthContext) -> Self {
		Self {
			kind: a.r#type,
			token: a.token,
			expires_at: a.expires_at,
			headers: a.headers,
		}
	}
}

impl From<pb::InsertionPoint> for model::InsertionPoint {
	fn from(p: pb::InsertionPoint) -> Self {
		Self {
			location: p.location,
			kind: p.r#type,
			payloads: p.payloads,
			encoding: p.encoding,
		}
	}
}

impl From<pb::RuleContext> for model::RuleContext {
	fn from(r: pb::RuleContext) -> Self {
		Self {
			id: r.id,
			category: r.category,
			severity: r.severity.parse().unwrap_or_default(),
		}
	}
}

impl From<pb::SuccessConditions> for model::SuccessConditions {
	fn from(s: pb::SuccessConditions) -> Self {
		Self {
			status_codes: s.status_codes,
			response_patterns: s.response_patterns,
		}
	}
}

impl From<pb::Validation> for model::Validation {
	fn from(v: pb::Validation) -> Self {
		Self {
			success_conditions: v.success_conditions.map(Into::into),
		}
	}
}

impl From<pb::TaskConfig> for model::TaskConfig {
	fn from(c: pb::TaskConfig) -> Self {
		Self {
			timeout_ms: c.timeout_ms,
			max_retries: c.max_retries,
		}
	}
}

impl From<pb::HttpRequest> for model::HttpRequest {
	fn from(r: pb::HttpRequest) -> Self {
		Self {
			url: r.url,
			method: r.method,
			headers: r.headers,
		}
	}
}

impl From<model::HttpRequest> for pb::HttpRequest {
	fn from(r: model::HttpRequest) -> Self {
		Self {
			url: r.url,
			method: r.method,
			headers: r.headers,
		}
	}
}

impl From<pb::HttpResponse> for model::HttpResponse {
	fn from(r: pb::HttpResponse) -> Self {
		Self {
			status_code: r.status_code,
			headers: r.headers,
			body: r.body,
			response_time_ms: r.response_time_ms,
		}
	}
}

impl From<model::HttpResponse> for pb::HttpResponse {
	fn from(r: model::HttpResponse) -> Self {
		Self {
			status_code: r.status_code,
			headers: r.headers,
			body: r.body,
			response_time_ms: r.response_time_ms,
		}
	}
}

impl From<model::Evidence> for pb::Evidence {
	fn from(e: model::Evidence) -> Self {
		Self {
			data: e.data,
			validated: e.validated,
			timestamp: e.timestamp,
			request: Some(e.request.into()),
			response: Some(e.response.into()),
			matched_rules: e.matched_rules,
		}
	}
}

impl From<model::Finding> for pb::Finding {
	fn from(f: model::Finding) -> Self {
		Self {
			id: f.id,
			rule_id: f.rule_id,
			r#type: f.kind,
			matched_pattern: f.matched_pattern,
			severity: f.severity.to_string(),
			confidence: f.confidence,
			title: f.title,
			details: f.details,
			evidence: f.evidence.into_iter().map(Into::into).collect(),
			timestamp: f.timestamp,
			metadata: f.metadata,
		}
	}
}

impl From<model::ScanResult> for pb::ScanResult {
	fn from(r: model::ScanResult) -> Self {
		Self {
			task_id: r.task_id,
			success: r.success,
			findings: r.findings.into_iter().map(Into::into).collect(),
			evidence: r.evidence.map(Into::into),
			timestamp: r.timestamp,
			metadata: r.metadata,
		}
	}
}

/// Boundary validation per the RPC contract: non-null `task`, non-null
/// `target`, non-empty `target.url`, non-null `rule_context`.
pub fn scan_task_from_proto(task: pb::ScanTask) -> Result<model::ScanTask, ValidationError> {
	let target: model::Target = task.target.ok_or(ValidationError::MissingField("target"))?.into();
	if target.url.is_empty() {
		return Err(ValidationError::MissingField("target.url"));
	}
	let rule_context: model::RuleContext = task.rule_context.ok_or(ValidationError::MissingRuleContext)?.into();

	let payload_msg = task.payload.unwrap_or_default();
	let insertion_points = payload_msg.insertion_points.into_iter().map(Into::into).collect();
	let payload = model::Payload {
		id: String::new(),
		kind: String::new(),
		value: String::from_utf8_lossy(&payload_msg.body).into_owned(),
		headers: payload_msg.headers,
		metadata: payload_msg.query_params,
		encoded: false,
	};

	Ok(model::ScanTask {
		id: task.id,
		target,
		auth_context: task.auth_context.map(Into::into),
		rule_context: Some(rule_context),
		payload,
		insertion_points,
		validation: task.validation.map(Into::into),
		config: task.config.map(Into::into).unwrap_or_default(),
	})
}
