//! Pattern compilation and scanning. Grounded in `engine/detector/analyzer.go::Analyze`
//! (the pattern-matching loop over `a.patterns`).

use regex::Regex;
use tracing::warn;

use crate::analyser::evidence::{calculate_confidence, generate_id};
use crate::model::{DetectionPattern, Evidence, Finding, Severity};

/// Compiles `pattern.regex_source`, logging and skipping (not aborting) on
/// an invalid expression — mirrors the Go loop's `continue` on compile error.
pub fn compile(pattern: &DetectionPattern) -> Option<Regex> {
	match Regex::new(&pattern.regex_source) {
		Ok(re) => Some(re),
		Err(err) => {
			warn!(pattern_id = %pattern.id, error = %err, "skipping invalid detection pattern");
			None
		},
	}
}

/// Scans `body` against every pattern, emitting one [`Finding`] per pattern
/// with at least one match. Invalid patterns are skipped, not fatal.
pub fn scan(patterns: &[DetectionPattern], body: &str, evidence: &Evidence) -> Vec<Finding> {
	let mut findings = Vec::new();
	for pattern in patterns {
		let Some(re) = compile(pattern) else { continue };
		if !re.is_match(body) {
			continue;
		}
		let matched = re.find(body).map(|m| m.as_str().to_string()).unwrap_or_default();
		findings.push(Finding {
			id: generate_id(),
			rule_id: String::new(),
			kind: pattern.kind.clone(),
			matched_pattern: pattern.regex_source.clone(),
			severity: Severity::default(),
			confidence: calculate_confidence(pattern, evidence),
			title: String::new(),
			details: matched,
			evidence: vec![evidence.clone()],
			timestamp: evidence.timestamp,
			metadata: Default::default(),
		});
	}
	findings
}
