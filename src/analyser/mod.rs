//! Response analyser: pattern matching, rule validation, and evidence
//! assembly. Grounded in `engine/detector/analyzer.go`.

pub mod evidence;
pub mod patterns;
pub mod rules;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use crate::error::AnalyserError;
use crate::model::{DetectionPattern, Evidence, Finding, HttpRequest, HttpResponse, Rule};

#[derive(Debug, Default)]
pub struct StatisticsSnapshot {
	pub total_scans: u64,
	pub total_findings: u64,
	pub average_duration: Duration,
}

/// Ring buffer of at most 100 recent scan durations, average computed under read lock.
#[derive(Default)]
struct Statistics {
	total_scans: AtomicU64,
	total_findings: AtomicU64,
	durations: RwLock<Vec<Duration>>,
}

impl Statistics {
	fn record(&self, duration: Duration, findings: usize) {
		self.total_scans.fetch_add(1, Ordering::Relaxed);
		self.total_findings.fetch_add(findings as u64, Ordering::Relaxed);
		let mut durations = self.durations.write();
		durations.push(duration);
		if durations.len() > 100 {
			durations.remove(0);
		}
	}

	fn average_duration(&self) -> Duration {
		let durations = self.durations.read();
		if durations.is_empty() {
			return Duration::ZERO;
		}
		durations.iter().sum::<Duration>() / durations.len() as u32
	}

	fn snapshot(&self) -> StatisticsSnapshot {
		StatisticsSnapshot {
			total_scans: self.total_scans.load(Ordering::Relaxed),
			total_findings: self.total_findings.load(Ordering::Relaxed),
			average_duration: self.average_duration(),
		}
	}
}

/// Holds registered detection patterns and rules, scans responses, and
/// tracks running statistics. Shared across workers behind an `Arc`.
pub struct Analyser {
	patterns: RwLock<Vec<DetectionPattern>>,
	rules: RwLock<HashMap<String, Rule>>,
	stats: Statistics,
}

impl Default for Analyser {
	fn default() -> Self {
		Self::new()
	}
}

impl Analyser {
	pub fn new() -> Self {
		Self {
			patterns: RwLock::new(Vec::new()),
			rules: RwLock::new(HashMap::new()),
			stats: Statistics::default(),
		}
	}

	pub fn add_pattern(&self, pattern: DetectionPattern) {
		self.patterns.write().push(pattern);
	}

	pub fn register_rule(&self, rule: Rule) -> Result<(), AnalyserError> {
		if rule.id.is_empty() {
			return Err(AnalyserError::InvalidRequest("rule id cannot be empty".to_string()));
		}
		self.rules.write().insert(rule.id.clone(), rule);
		Ok(())
	}

	pub fn rules_count(&self) -> usize {
		self.rules.read().len()
	}

	pub fn get_rule(&self, id: &str) -> Option<Rule> {
		self.rules.read().get(id).cloned()
	}

	pub fn stats(&self) -> StatisticsSnapshot {
		self.stats.snapshot()
	}

	/// Collects evidence from `request`/`response`, then scans the response
	/// body against every registered pattern. Always produces evidence, even
	/// when no pattern matches.
	pub fn analyze(
		&self,
		request: &HttpRequest,
		response: &HttpResponse,
		response_time: Duration,
	) -> (Vec<Finding>, Evidence) {
		let started = std::time::Instant::now();
		let evidence_record = evidence::collect_evidence(request, response, response_time.as_millis() as i64);

		let patterns = self.patterns.read().clone();
		let findings = patterns::scan(&patterns, &response.body, &evidence_record);

		self.stats.record(started.elapsed(), findings.len());
		(findings, evidence_record)
	}

	pub fn validate_rule_response(&self, rule_id: &str, response: &HttpResponse) -> bool {
		match self.get_rule(rule_id) {
			Some(rule) => rules::validate_response(&rule, response),
			None => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{DetectionPattern, Severity, ValidationCriteria};

	fn pattern() -> DetectionPattern {
		DetectionPattern {
			id: "p1".to_string(),
			regex_source: "alert\\(".to_string(),
			kind: "xss".to_string(),
			description: String::new(),
			base_confidence: 0.6,
		}
	}

	#[test]
	fn analyze_reports_findings_and_updates_stats() {
		let analyser = Analyser::new();
		analyser.add_pattern(pattern());

		let request = HttpRequest::default();
		let response = HttpResponse {
			status_code: 200,
			body: "<script>alert(1)</script>".to_string(),
			..Default::default()
		};
		let (findings, evidence) = analyser.analyze(&request, &response, Duration::from_millis(5));
		assert_eq!(findings.len(), 1);
		assert!(evidence.validated);
		assert_eq!(analyser.stats().total_scans, 1);
		assert_eq!(analyser.stats().total_findings, 1);
	}

	#[test]
	fn register_rule_rejects_empty_id() {
		let analyser = Analyser::new();
		let rule = Rule {
			id: String::new(),
			name: String::new(),
			kind: String::new(),
			severity: Severity::default(),
			cvss: 0.0,
			cwe: String::new(),
			references: vec![],
			patterns: vec![],
			validation: ValidationCriteria::default(),
		};
		assert!(analyser.register_rule(rule).is_err());
	}
}
