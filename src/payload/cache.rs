//! Bounded payload cache, pick-any eviction when full. Faithful to
//! `engine/payload/types.go::Cache` — the Non-goals never asked for an LRU
//! upgrade, so eviction stays arbitrary (§9 explicitly allows this).

use std::collections::HashMap;

use itertools::Itertools;
use parking_lot::RwLock;

use crate::metrics::CacheMetrics;
use crate::model::Payload;

pub struct Cache {
	data: RwLock<HashMap<String, Vec<Payload>>>,
	capacity: usize,
	metrics: CacheMetrics,
}

impl Cache {
	pub fn new(capacity: usize, metrics: CacheMetrics) -> Self {
		Self {
			data: RwLock::new(HashMap::new()),
			capacity: capacity.max(1),
			metrics,
		}
	}

	pub fn get(&self, key: &str) -> Option<Vec<Payload>> {
		let found = self.data.read().get(key).cloned();
		if found.is_some() {
			self.metrics.record_hit();
		} else {
			self.metrics.record_miss();
		}
		found
	}

	pub fn set(&self, key: String, payloads: Vec<Payload>) {
		let mut data = self.data.write();
		if data.len() >= self.capacity && !data.contains_key(&key) {
			if let Some(evict_key) = data.keys().next().cloned() {
				data.remove(&evict_key);
			}
		}
		data.insert(key, payloads);
	}

	pub fn len(&self) -> usize {
		self.data.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn hit_rate(&self) -> f64 {
		self.metrics.hit_rate()
	}
}

/// Cache key = `template_id + "|" + "key=value"` parts joined, sorted by key.
pub fn cache_key(template_id: &str, data: &HashMap<String, String>) -> String {
	let mut key = template_id.to_string();
	for (k, v) in data.iter().sorted_by_key(|(k, _)| *k) {
		key.push('|');
		key.push_str(k);
		key.push('=');
		key.push_str(v);
	}
	key
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cache_key_is_order_invariant() {
		let mut a = HashMap::new();
		a.insert("b".to_string(), "2".to_string());
		a.insert("a".to_string(), "1".to_string());
		let mut b = HashMap::new();
		b.insert("a".to_string(), "1".to_string());
		b.insert("b".to_string(), "2".to_string());
		assert_eq!(cache_key("tmpl", &a), cache_key("tmpl", &b));
	}

	#[test]
	fn evicts_one_entry_when_full() {
		let cache = Cache::new(1, CacheMetrics::default());
		cache.set("a".to_string(), vec![]);
		assert_eq!(cache.len(), 1);
		cache.set("b".to_string(), vec![]);
		assert_eq!(cache.len(), 1);
	}

	#[test]
	fn hit_and_miss_are_counted() {
		let cache = Cache::new(10, CacheMetrics::default());
		assert!(cache.get("missing").is_none());
		cache.set("present".to_string(), vec![Payload::default()]);
		assert!(cache.get("present").is_some());
		assert!((cache.hit_rate() - 0.5).abs() < 1e-9);
	}
}
