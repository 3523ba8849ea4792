//! Rule-level response validation. Grounded in
//! `engine/detector/analyzer.go::Rule.ValidateResponse`.

use crate::model::{HttpResponse, Rule};

/// A response matches the rule iff (a) its status code is in
/// `validation.status_codes` when that set is non-empty, AND (b) every
/// header named in `validation.required_headers` is present and non-empty.
pub fn validate_response(rule: &Rule, response: &HttpResponse) -> bool {
	let codes = &rule.validation.status_codes;
	if !codes.is_empty() && !codes.iter().any(|code| *code == response.status_code) {
		return false;
	}

	for header in &rule.validation.required_headers {
		match response.headers.get(header) {
			Some(value) if !value.is_empty() => {},
			_ => return false,
		}
	}

	true
}
