//! Core data model shared by every component: targets, payloads, evidence,
//! findings, and the rule/template definitions that drive detection.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub fn now_unix() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs() as i64)
		.unwrap_or(0)
}

pub fn now_unix_nanos() -> i128 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_nanos() as i128)
		.unwrap_or(0)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
	Critical,
	High,
	Medium,
	Low,
	#[default]
	Info,
}

impl std::fmt::Display for Severity {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			Severity::Critical => "CRITICAL",
			Severity::High => "HIGH",
			Severity::Medium => "MEDIUM",
			Severity::Low => "LOW",
			Severity::Info => "INFO",
		};
		f.write_str(s)
	}
}

impl std::str::FromStr for Severity {
	type Err = std::convert::Infallible;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(match s.to_ascii_uppercase().as_str() {
			"CRITICAL" => Severity::Critical,
			"HIGH" => Severity::High,
			"MEDIUM" => Severity::Medium,
			"LOW" => Severity::Low,
			_ => Severity::Info,
		})
	}
}

/// Immutable probe destination. Invariant: `url` has a non-empty scheme and host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Target {
	pub url: String,
	pub method: String,
	pub protocol_hint: String,
}

impl Target {
	pub fn validate(&self) -> Result<(), crate::error::ValidationError> {
		if self.url.is_empty() {
			return Err(crate::error::ValidationError::MissingField("target.url"));
		}
		let parsed = url::Url::parse(&self.url)
			.map_err(|_| crate::error::ValidationError::InvalidUrl(self.url.clone()))?;
		if parsed.scheme().is_empty() || parsed.host_str().is_none_or(str::is_empty) {
			return Err(crate::error::ValidationError::InvalidUrl(self.url.clone()));
		}
		Ok(())
	}
}

/// Auth material forwarded as-is; never authenticated or refreshed here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthContext {
	#[serde(rename = "type")]
	pub kind: String,
	pub token: String,
	pub expires_at: i64,
	pub headers: HashMap<String, String>,
}

/// `location` is always `<area>.<name>`; `type` is an open tag (e.g. `parameter`, `jwt_none`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsertionPoint {
	pub location: String,
	#[serde(rename = "type")]
	pub kind: String,
	pub payloads: Vec<String>,
	pub encoding: String,
}

impl InsertionPoint {
	pub fn is_jwt_none(&self) -> bool {
		self.kind == "jwt_none"
	}

	/// Splits `location` into `(area, name)`.
	pub fn area_and_name(&self) -> Option<(&str, &str)> {
		self.location.split_once('.')
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Payload {
	pub id: String,
	#[serde(rename = "type")]
	pub kind: String,
	pub value: String,
	pub headers: HashMap<String, String>,
	pub metadata: HashMap<String, String>,
	pub encoded: bool,
}

/// A template has at most one of `template`, `templates`, `pattern` — each materialised
/// into its own [`Payload`] by the generator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayloadTemplate {
	pub id: String,
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub template: Option<String>,
	#[serde(default)]
	pub templates: Option<Vec<String>>,
	#[serde(default)]
	pub pattern: Option<String>,
	#[serde(default)]
	pub variables: HashMap<String, Vec<String>>,
	#[serde(default)]
	pub encoding: Vec<String>,
	#[serde(default)]
	pub description: String,
}

impl PayloadTemplate {
	pub fn has_content(&self) -> bool {
		self.template.is_some() || self.templates.is_some() || self.pattern.is_some()
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuccessConditions {
	pub status_codes: Vec<i32>,
	pub response_patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Validation {
	pub success_conditions: Option<SuccessConditions>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
	pub timeout_ms: i64,
	pub max_retries: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpRequest {
	pub url: String,
	pub method: String,
	pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpResponse {
	pub status_code: i32,
	pub headers: HashMap<String, String>,
	pub body: String,
	pub response_time_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Evidence {
	pub data: HashMap<String, String>,
	pub validated: bool,
	pub timestamp: i64,
	pub request: HttpRequest,
	pub response: HttpResponse,
	pub matched_rules: Vec<String>,
	/// Free-form scanner observations, distinct from `data`; non-empty feeds the
	/// confidence multiplier in the analyser.
	pub observations: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Finding {
	pub id: String,
	pub rule_id: String,
	#[serde(rename = "type")]
	pub kind: String,
	pub matched_pattern: String,
	pub severity: Severity,
	pub confidence: f64,
	pub title: String,
	pub details: String,
	pub evidence: Vec<Evidence>,
	pub timestamp: i64,
	pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleContext {
	pub id: String,
	pub category: String,
	pub severity: Severity,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanTask {
	pub id: String,
	pub target: Target,
	pub auth_context: Option<AuthContext>,
	pub rule_context: Option<RuleContext>,
	pub payload: Payload,
	pub insertion_points: Vec<InsertionPoint>,
	pub validation: Option<Validation>,
	pub config: TaskConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanResult {
	pub task_id: String,
	pub success: bool,
	pub findings: Vec<Finding>,
	pub evidence: Option<Evidence>,
	pub timestamp: i64,
	pub metadata: HashMap<String, String>,
}

/// One accepted proxy URL. Identity for dedup purposes is the normalized URL string.
#[derive(Debug, Clone)]
pub struct ProxyEntry {
	pub url: url::Url,
	pub failures: u32,
	pub last_used: i64,
	pub last_check: i64,
}

impl ProxyEntry {
	pub fn key(&self) -> String {
		self.url.to_string()
	}
}

#[derive(Debug, Clone)]
pub struct DetectionPattern {
	pub id: String,
	pub regex_source: String,
	pub kind: String,
	pub description: String,
	pub base_confidence: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationCriteria {
	pub status_codes: Vec<i32>,
	pub required_headers: Vec<String>,
	pub content_substrings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Rule {
	pub id: String,
	pub name: String,
	pub kind: String,
	pub severity: Severity,
	pub cvss: f64,
	pub cwe: String,
	pub references: Vec<String>,
	pub patterns: Vec<DetectionPattern>,
	pub validation: ValidationCriteria,
}

/// A fully-resolved detection context: everything [`crate::detector`] needs for one probe.
#[derive(Debug, Clone, Default)]
pub struct DetectionContext {
	pub target: Target,
	pub auth_context: AuthContext,
	pub insertion_point: InsertionPoint,
	pub payload: Payload,
	pub validation: Validation,
}
