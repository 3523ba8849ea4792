//! Template rendering: `{{var}}` + helper functions via `minijinja` for the
//! `template`/`templates` content forms, literal substring substitution for
//! `pattern`. Grounded in `engine/payload/generator.go::getTemplateFuncs`.

use std::collections::HashMap;

use minijinja::Environment;
use minijinja::value::Value;
use once_cell::sync::Lazy;

use crate::error::TemplateError;
use crate::model::PayloadTemplate;

/// The environment's helper functions are fixed, so it is built once and
/// shared across every `render_template` call instead of per-call.
static TEMPLATE_ENV: Lazy<Environment<'static>> = Lazy::new(|| {
	let mut env = Environment::new();
	env.add_function("join", |items: Vec<String>, sep: String| items.join(&sep));
	env.add_function("index", |items: Vec<String>, i: i64| {
		if i >= 0 && (i as usize) < items.len() {
			items[i as usize].clone()
		} else {
			String::new()
		}
	});
	env.add_function("concat", |items: Vec<String>, sep: String| items.join(&sep));
	env.add_function("replace", |s: String, from: String, to: String| s.replace(&from, &to));
	env.add_function("lower", |s: String| s.to_lowercase());
	env.add_function("upper", |s: String| s.to_uppercase());
	env
});

fn data_to_value(data: &HashMap<String, String>) -> Value {
	Value::from_iter(data.iter().map(|(k, v)| (k.clone(), Value::from(v.clone()))))
}

pub fn render_template(name: &str, source: &str, data: &HashMap<String, String>) -> Result<String, TemplateError> {
	let tmpl = TEMPLATE_ENV
		.template_from_str(source)
		.map_err(|e| TemplateError::RenderFailed(name.to_string(), e.to_string()))?;
	tmpl
		.render(data_to_value(data))
		.map_err(|e| TemplateError::RenderFailed(name.to_string(), e.to_string()))
}

/// Literal substring substitution only, no function support: each
/// `{{key}}` is replaced by the stringification of `data[key]`.
pub fn render_pattern(pattern: &str, data: &HashMap<String, String>) -> String {
	let mut rendered = pattern.to_string();
	for (key, value) in data {
		rendered = rendered.replace(&format!("{{{{{key}}}}}"), value);
	}
	rendered
}

/// `sqli` is the one template type with required-variable validation.
pub fn validate_required_variables(
	tmpl: &PayloadTemplate,
	data: &HashMap<String, String>,
) -> Result<(), TemplateError> {
	if tmpl.kind == "sqli" {
		for required in ["table", "columns"] {
			if !data.contains_key(required) {
				return Err(TemplateError::MissingVariable(
					tmpl.id.clone(),
					required.to_string(),
				));
			}
		}
	}
	Ok(())
}

/// Default variable values (first element of each `variables` list) seed the
/// map; explicit call-site `data` overrides per key.
pub fn merge_template_data(
	tmpl: &PayloadTemplate,
	data: &HashMap<String, String>,
) -> HashMap<String, String> {
	let mut merged = HashMap::new();
	for (key, values) in &tmpl.variables {
		if let Some(first) = values.first() {
			merged.insert(key.clone(), first.clone());
		}
	}
	for (key, value) in data {
		merged.insert(key.clone(), value.clone());
	}
	merged
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn renders_var_interpolation() {
		let mut data = HashMap::new();
		data.insert("name".to_string(), "world".to_string());
		let out = render_template("t", "hello {{ name }}", &data).unwrap();
		assert_eq!(out, "hello world");
	}

	#[test]
	fn renders_helper_functions() {
		let mut data = HashMap::new();
		data.insert("name".to_string(), "ADMIN".to_string());
		let out = render_template("t", "{{ lower(name) }}", &data).unwrap();
		assert_eq!(out, "admin");
	}

	#[test]
	fn pattern_substitution_is_literal_only() {
		let mut data = HashMap::new();
		data.insert("table".to_string(), "users".to_string());
		let out = render_pattern("SELECT * FROM {{table}}", &data);
		assert_eq!(out, "SELECT * FROM users");
	}

	#[test]
	fn merge_prefers_explicit_data_over_defaults() {
		let tmpl = PayloadTemplate {
			variables: HashMap::from([("table".to_string(), vec!["users".to_string()])]),
			..Default::default()
		};
		let mut data = HashMap::new();
		data.insert("table".to_string(), "accounts".to_string());
		let merged = merge_template_data(&tmpl, &data);
		assert_eq!(merged.get("table"), Some(&"accounts".to_string()));
	}

	#[test]
	fn sqli_requires_table_and_columns() {
		let tmpl = PayloadTemplate {
			kind: "sqli".to_string(),
			..Default::default()
		};
		assert!(validate_required_variables(&tmpl, &HashMap::new()).is_err());
		let mut data = HashMap::new();
		data.insert("table".to_string(), "users".to_string());
		data.insert("columns".to_string(), "*".to_string());
		assert!(validate_required_variables(&tmpl, &data).is_ok());
	}
}
