//! Evidence assembly and header sanitisation. Grounded in
//! `engine/detector/utils.go` (`collectRequestData`, `collectResponseData`,
//! `sanitizeHeaderValue`, `generateID`, `calculateConfidence`).

use std::collections::HashMap;

use crate::model::{DetectionPattern, Evidence, HttpRequest, HttpResponse, Validation, now_unix, now_unix_nanos};

/// Keeps only ASCII printable bytes (`0x20..0x7E`), dropping everything else.
pub fn sanitize_header_value(value: &str) -> String {
	value.chars().filter(|c| (*c as u32) >= 32 && (*c as u32) < 127).collect()
}

pub fn generate_id() -> String {
	format!("FINDING-{}", now_unix_nanos())
}

/// Assembles an [`Evidence`] record. `validated` starts `true`; the detector
/// recomputes it against the task's [`Validation`] contract afterwards.
pub fn collect_evidence(request: &HttpRequest, response: &HttpResponse, response_time_ms: i64) -> Evidence {
	let mut data = HashMap::new();
	data.insert("response_time_ms".to_string(), response_time_ms.to_string());
	data.insert("response_body_length".to_string(), response.body.len().to_string());
	data.insert("status_code".to_string(), response.status_code.to_string());
	data.insert(
		"content_type".to_string(),
		response.headers.get("content-type").cloned().unwrap_or_default(),
	);

	let sanitized_request = HttpRequest {
		url: request.url.clone(),
		method: request.method.clone(),
		headers: request
			.headers
			.iter()
			.map(|(k, v)| (k.clone(), sanitize_header_value(v)))
			.collect(),
	};
	let sanitized_response = HttpResponse {
		status_code: response.status_code,
		headers: response
			.headers
			.iter()
			.map(|(k, v)| (k.clone(), sanitize_header_value(v)))
			.collect(),
		body: response.body.clone(),
		response_time_ms,
	};

	Evidence {
		data,
		validated: true,
		timestamp: now_unix(),
		request: sanitized_request,
		response: sanitized_response,
		matched_rules: Vec::new(),
		observations: HashMap::new(),
	}
}

/// The evidence-level `validated` flag used for the detector's success
/// condition: status code in the allowed set AND at least one response
/// pattern present as a substring of the body. Null validation/conditions → false.
pub fn compute_validated(response: &HttpResponse, validation: Option<&Validation>) -> bool {
	let Some(conditions) = validation.and_then(|v| v.success_conditions.as_ref()) else {
		return false;
	};

	let status_ok = conditions.status_codes.iter().any(|code| *code == response.status_code);
	let pattern_ok = conditions
		.response_patterns
		.iter()
		.any(|pattern| response.body.contains(pattern.as_str()));

	status_ok && pattern_ok
}

/// `base_confidence * 1.2 if response_time > 0 * 1.1 if observations non-empty`, capped at 1.0.
pub fn calculate_confidence(pattern: &DetectionPattern, evidence: &Evidence) -> f64 {
	let mut confidence = pattern.base_confidence;
	if evidence.response.response_time_ms > 0 {
		confidence *= 1.2;
	}
	if !evidence.observations.is_empty() {
		confidence *= 1.1;
	}
	confidence.min(1.0)
}
