//! `Generate(template_id, data) → [Payload]` pipeline: validate, check
//! cache, render every content form present, post-process, cache. Grounded
//! in `engine/payload/generator.go`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::error::TemplateError;
use crate::metrics::CacheMetrics;
use crate::model::{Payload, PayloadTemplate, now_unix_nanos};
use crate::payload::cache::{Cache, cache_key};
use crate::payload::template::{merge_template_data, render_pattern, render_template, validate_required_variables};

pub struct Generator {
	templates: RwLock<HashMap<String, PayloadTemplate>>,
	cache: Cache,
}

impl Generator {
	pub fn new(cache_capacity: usize, cache_metrics: CacheMetrics) -> Arc<Self> {
		Arc::new(Self {
			templates: RwLock::new(HashMap::new()),
			cache: Cache::new(cache_capacity, cache_metrics),
		})
	}

	pub fn load_template(&self, tmpl: PayloadTemplate) -> Result<(), TemplateError> {
		if tmpl.id.is_empty() {
			return Err(TemplateError::NoContentForm("<empty id>".to_string()));
		}
		self.templates.write().insert(tmpl.id.clone(), tmpl);
		Ok(())
	}

	pub fn get_template(&self, id: &str) -> Option<PayloadTemplate> {
		self.templates.read().get(id).cloned()
	}

	pub fn cache_hit_rate(&self) -> f64 {
		self.cache.hit_rate()
	}

	pub fn generate(
		&self,
		template_id: &str,
		data: Option<HashMap<String, String>>,
	) -> Result<Vec<Payload>, TemplateError> {
		let data = data.unwrap_or_default();
		let key = cache_key(template_id, &data);
		if let Some(cached) = self.cache.get(&key) {
			return Ok(cached);
		}

		let tmpl = self
			.templates
			.read()
			.get(template_id)
			.cloned()
			.ok_or_else(|| TemplateError::NotFound(template_id.to_string()))?;

		if tmpl.kind.is_empty() || !tmpl.has_content() {
			return Err(TemplateError::NoContentForm(template_id.to_string()));
		}

		let merged = merge_template_data(&tmpl, &data);
		validate_required_variables(&tmpl, &merged)?;

		let mut payloads = Vec::new();
		let mut errors: Vec<String> = Vec::new();

		if let Some(source) = &tmpl.template {
			match render_template(&tmpl.id, source, &merged) {
				Ok(value) => payloads.push(build_payload(&tmpl, value, &merged)),
				Err(e) => errors.push(e.to_string()),
			}
		}

		if let Some(sources) = &tmpl.templates {
			for (i, source) in sources.iter().enumerate() {
				if source.is_empty() {
					continue;
				}
				match render_template(&format!("{}-{i}", tmpl.id), source, &merged) {
					Ok(value) => payloads.push(build_payload(&tmpl, value, &merged)),
					Err(e) => errors.push(e.to_string()),
				}
			}
		}

		if let Some(pattern) = &tmpl.pattern {
			let value = render_pattern(pattern, &merged);
			payloads.push(build_payload(&tmpl, value, &merged));
		}

		if payloads.is_empty() {
			return if errors.is_empty() {
				Err(TemplateError::NoPayloadsGenerated(
					template_id.to_string(),
					"no payloads generated".to_string(),
				))
			} else {
				Err(TemplateError::NoPayloadsGenerated(
					template_id.to_string(),
					errors.join("; "),
				))
			};
		}
		for e in &errors {
			warn!(template_id, error = %e, "payload generation partially failed");
		}

		let processed = post_process(payloads);
		self.cache.set(key, processed.clone());
		Ok(processed)
	}
}

fn build_payload(tmpl: &PayloadTemplate, value: String, data: &HashMap<String, String>) -> Payload {
	Payload {
		id: format!("{}-{}", tmpl.id, now_unix_nanos()),
		kind: tmpl.kind.clone(),
		value,
		headers: HashMap::new(),
		metadata: data.clone(),
		encoded: false,
	}
}

/// Stamps `generated_at`, suffixes ids with index, drops empty-valued payloads.
fn post_process(payloads: Vec<Payload>) -> Vec<Payload> {
	payloads
		.into_iter()
		.enumerate()
		.filter(|(_, p)| !p.value.is_empty())
		.map(|(i, mut p)| {
			p.metadata
				.insert("generated_at".to_string(), now_unix_nanos().to_string());
			p.id = format!("{}-{i}", p.id);
			p
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn generator() -> Arc<Generator> {
		Generator::new(16, CacheMetrics::default())
	}

	#[test]
	fn generates_from_template_form() {
		let gen = generator();
		gen.load_template(PayloadTemplate {
			id: "t1".to_string(),
			kind: "xss".to_string(),
			template: Some("<script>{{ payload }}</script>".to_string()),
			..Default::default()
		})
		.unwrap();
		let mut data = HashMap::new();
		data.insert("payload".to_string(), "alert(1)".to_string());
		let payloads = gen.generate("t1", Some(data)).unwrap();
		assert_eq!(payloads.len(), 1);
		assert!(payloads[0].value.contains("alert(1)"));
	}

	#[test]
	fn repeated_generate_hits_cache() {
		let gen = generator();
		gen.load_template(PayloadTemplate {
			id: "t1".to_string(),
			kind: "xss".to_string(),
			pattern: Some("payload".to_string()),
			..Default::default()
		})
		.unwrap();
		let first = gen.generate("t1", None).unwrap();
		let second = gen.generate("t1", None).unwrap();
		assert_eq!(first.len(), second.len());
		assert!(gen.cache_hit_rate() > 0.0);
	}

	#[test]
	fn missing_template_errors() {
		let gen = generator();
		assert!(matches!(
			gen.generate("missing", None),
			Err(TemplateError::NotFound(_))
		));
	}

	#[test]
	fn sqli_without_required_variables_fails() {
		let gen = generator();
		gen.load_template(PayloadTemplate {
			id: "sqli1".to_string(),
			kind: "sqli".to_string(),
			pattern: Some("SELECT * FROM {{table}}".to_string()),
			..Default::default()
		})
		.unwrap();
		assert!(gen.generate("sqli1", None).is_err());
	}
}
