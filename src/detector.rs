//! Single-probe vulnerability detector. Grounded in `engine/detector/detector.go`.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{info, warn};

use crate::analyser::evidence::{collect_evidence, compute_validated};
use crate::error::{HttpError, ScanError, ValidationError};
use crate::http::client::ProbeClient;
use crate::model::{AuthContext, DetectionContext, Evidence, HttpRequest};

/// Validates `ctx.target`; `auth_context`/`insertion_point`/`validation` are
/// always present (non-`Option`) on [`DetectionContext`], so the Go
/// original's null-coercion step is satisfied structurally.
fn validate_context(ctx: &DetectionContext) -> Result<(), ValidationError> {
	ctx.target.validate()
}

/// Forwards caller-supplied credentials (spec's only in-scope auth
/// behaviour): an explicit `Authorization` header in `auth.headers` always
/// wins; otherwise a `bearer`/`jwt` token is forwarded as a bearer header.
fn apply_auth(headers: &mut HashMap<String, String>, auth: &AuthContext) {
	if headers.contains_key("Authorization") || auth.token.is_empty() {
		return;
	}
	match auth.kind.as_str() {
		"bearer" | "jwt" => {
			headers.insert("Authorization".to_string(), format!("Bearer {}", auth.token));
		},
		_ => {},
	}
}

/// Reads (without verifying) the `alg` field of a JWT's header segment for
/// a `jwt_none` insertion point, for evidence only. `jsonwebtoken`'s
/// `Algorithm` enum has no `none` variant, so the header is decoded by hand
/// rather than through the crate — this never validates a signature.
fn jwt_alg_observation(token: &str) -> Option<String> {
	use base64::Engine as _;
	let header_b64 = token.split('.').next()?;
	let header_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(header_b64).ok()?;
	let header: serde_json::Value = serde_json::from_slice(&header_bytes).ok()?;
	header.get("alg")?.as_str().map(str::to_string)
}

/// Splits `location` into `area.name` and applies `payload` at that point.
/// `path` substitutes the literal `{name}` placeholder; `query` sets a query
/// parameter; `header` sets a header. Any other area is unsupported.
fn insert_payload(url: &mut url::Url, headers: &mut HashMap<String, String>, location: &str, payload: &str) -> Result<(), HttpError> {
	let (area, name) = location
		.split_once('.')
		.ok_or_else(|| HttpError::UnsupportedInsertionPoint(location.to_string()))?;

	match area {
		"header" => {
			headers.insert(name.to_string(), payload.to_string());
		},
		"query" => {
			let pairs: Vec<(String, String)> = url
				.query_pairs()
				.filter(|(k, _)| k != name)
				.map(|(k, v)| (k.into_owned(), v.into_owned()))
				.collect();
			let mut serializer = url::form_urlencoded::Serializer::new(String::new());
			for (k, v) in &pairs {
				serializer.append_pair(k, v);
			}
			serializer.append_pair(name, payload);
			url.set_query(Some(&serializer.finish()));
		},
		"path" => {
			let placeholder = format!("{{{name}}}");
			let replaced = url.path().replace(&placeholder, payload);
			url.set_path(&replaced);
		},
		_ => return Err(HttpError::UnsupportedInsertionPoint(location.to_string())),
	}
	Ok(())
}

/// Builds a request from `ctx`, injects the payload, sends it through
/// `probe`, and produces [`Evidence`] with `validated` computed against
/// `ctx.validation`.
pub async fn detect_vulnerability(ctx: &DetectionContext, probe: &ProbeClient) -> Result<Evidence, ScanError> {
	validate_context(ctx)?;

	info!(url = %ctx.target.url, method = %ctx.target.method, location = %ctx.insertion_point.location, "starting vulnerability detection");

	let mut url = url::Url::parse(&ctx.target.url).map_err(|_| ValidationError::InvalidUrl(ctx.target.url.clone()))?;
	let mut headers = ctx.auth_context.headers.clone();
	apply_auth(&mut headers, &ctx.auth_context);

	if !ctx.insertion_point.location.is_empty() {
		insert_payload(&mut url, &mut headers, &ctx.insertion_point.location, &ctx.payload.value)?;
	}

	let request = HttpRequest {
		url: url.to_string(),
		method: ctx.target.method.clone(),
		headers,
	};

	let started = Instant::now();
	let (status, response_headers, body, elapsed) = probe.do_request(&request).await.map_err(ScanError::Http)?;
	let _ = started;

	let response = crate::model::HttpResponse {
		status_code: status.as_u16() as i32,
		headers: response_headers,
		body: String::from_utf8_lossy(&body).into_owned(),
		response_time_ms: elapsed.as_millis() as i64,
	};

	let mut evidence = collect_evidence(&request, &response, elapsed.as_millis() as i64);
	evidence.validated = compute_validated(&response, Some(&ctx.validation));

	if ctx.insertion_point.is_jwt_none() {
		if let Some(alg) = jwt_alg_observation(&ctx.auth_context.token) {
			evidence.observations.insert("jwt_alg".to_string(), alg);
		} else {
			warn!(location = %ctx.insertion_point.location, "jwt_none insertion point carried an undecodable token");
		}
	}

	info!(status_code = response.status_code, validated = evidence.validated, "vulnerability detection completed");

	Ok(evidence)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::http::ratelimit::{RateLimitConfig, RateLimiter};
	use crate::http::retry::{Retrier, RetryConfig};
	use crate::http::client::ClientConfig;
	use crate::metrics::Metrics;
	use crate::model::{AuthContext, InsertionPoint, Payload, SuccessConditions, Target, Validation};
	use prometheus_client::registry::Registry;
	use std::sync::Arc;
	use wiremock::matchers::{header, method, query_param};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn probe() -> ProbeClient {
		let mut registry = Registry::default();
		let metrics = Arc::new(Metrics::new(&mut registry));
		ProbeClient::new(
			ClientConfig::default(),
			RateLimiter::new(RateLimitConfig {
				initial_rate: 1000,
				max_rate: 1000,
				..Default::default()
			}),
			Retrier::new(RetryConfig::default()),
			None,
			metrics,
		)
		.unwrap()
	}

	#[tokio::test]
	async fn injects_payload_into_query_and_validates() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(query_param("q", "'OR 1=1"))
			.respond_with(ResponseTemplate::new(200).set_body_string("welcome admin"))
			.mount(&server)
			.await;

		let ctx = DetectionContext {
			target: Target {
				url: server.uri(),
				method: "GET".to_string(),
				protocol_hint: String::new(),
			},
			auth_context: AuthContext::default(),
			insertion_point: InsertionPoint {
				location: "query.q".to_string(),
				kind: "parameter".to_string(),
				payloads: vec![],
				encoding: String::new(),
			},
			payload: Payload {
				value: "'OR 1=1".to_string(),
				..Default::default()
			},
			validation: Validation {
				success_conditions: Some(SuccessConditions {
					status_codes: vec![200],
					response_patterns: vec!["admin".to_string()],
				}),
			},
		};

		let evidence = detect_vulnerability(&ctx, &probe()).await.unwrap();
		assert!(evidence.validated);
		assert_eq!(evidence.response.status_code, 200);
	}

	#[tokio::test]
	async fn injects_payload_into_header() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(header("x-forwarded-for", "127.0.0.1'"))
			.respond_with(ResponseTemplate::new(200))
			.mount(&server)
			.await;

		let ctx = DetectionContext {
			target: Target {
				url: server.uri(),
				method: "GET".to_string(),
				protocol_hint: String::new(),
			},
			insertion_point: InsertionPoint {
				location: "header.x-forwarded-for".to_string(),
				..Default::default()
			},
			payload: Payload {
				value: "127.0.0.1'".to_string(),
				..Default::default()
			},
			..Default::default()
		};

		let evidence = detect_vulnerability(&ctx, &probe()).await.unwrap();
		assert_eq!(evidence.response.status_code, 200);
	}

	#[tokio::test]
	async fn unsupported_area_fails() {
		let ctx = DetectionContext {
			target: Target {
				url: "http://example.invalid".to_string(),
				method: "GET".to_string(),
				protocol_hint: String::new(),
			},
			insertion_point: InsertionPoint {
				location: "body.field".to_string(),
				..Default::default()
			},
			..Default::default()
		};
		let err = detect_vulnerability(&ctx, &probe()).await.unwrap_err();
		assert!(matches!(err, ScanError::Http(HttpError::UnsupportedInsertionPoint(_))));
	}

	#[test]
	fn empty_url_fails_validation() {
		let ctx = DetectionContext::default();
		assert!(validate_context(&ctx).is_err());
	}
}
