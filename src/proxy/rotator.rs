//! Per-worker view over the proxy pool. Grounded in `http/proxy/rotator.go`.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use parking_lot::RwLock;
use rand::Rng;

use crate::error::ProxyError;
use crate::model::now_unix;
use crate::proxy::manager::{ProxyHandle, ProxyManager};

pub struct ProxyRotator {
	manager: Arc<ProxyManager>,
	proxies: Vec<Arc<ProxyHandle>>,
	current: RwLock<Option<Arc<ProxyHandle>>>,
}

impl ProxyRotator {
	pub fn new(manager: Arc<ProxyManager>, worker_id: u32) -> Self {
		let proxies = manager.assign_proxies_to_worker(worker_id);
		Self {
			manager,
			proxies,
			current: RwLock::new(None),
		}
	}

	/// Returns `Ok(None)` when proxying is disabled or this worker has no
	/// assigned proxies — the probe client proceeds without one.
	pub fn get_next(&self) -> Result<Option<url::Url>, ProxyError> {
		if !self.manager.enabled() || self.proxies.is_empty() {
			return Ok(None);
		}

		let threshold = self.manager.blacklist_threshold();
		let available: Vec<&Arc<ProxyHandle>> = self
			.proxies
			.iter()
			.filter(|p| p.failures.load(Ordering::SeqCst) < threshold)
			.collect();
		if available.is_empty() {
			return Err(ProxyError::Exhausted);
		}

		let current = self.current.read().clone();
		let selected = match self.manager.rotation_strategy() {
			"random" => available[rand::rng().random_range(0..available.len())],
			_ => available
				.iter()
				.find(|p| current.as_ref().is_none_or(|c| c.url != p.url))
				.copied()
				.unwrap_or(available[0]),
		};

		selected.last_used.store(now_unix(), Ordering::SeqCst);
		*self.current.write() = Some(selected.clone());
		Ok(Some(selected.url.clone()))
	}

	/// Returns `true` if this failure is the one that crossed the blacklist
	/// threshold (so the caller can count a blacklist event exactly once).
	pub fn report_failure(&self, url: &url::Url) -> bool {
		let Some(entry) = self.proxies.iter().find(|p| &p.url == url) else {
			return false;
		};
		let failures = entry.failures.fetch_add(1, Ordering::SeqCst) + 1;
		let threshold = self.manager.blacklist_threshold();
		let just_blacklisted = failures == threshold;
		if just_blacklisted {
			self.manager.blacklist_now(url);
		}
		let mut current = self.current.write();
		if current.as_ref().is_some_and(|c| &c.url == url) {
			*current = None;
		}
		just_blacklisted
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::proxy::manager::ProxyManagerConfig;

	fn manager(strategy: &str) -> Arc<ProxyManager> {
		ProxyManager::new(ProxyManagerConfig {
			enabled: true,
			proxies: vec!["http://a:1".into(), "http://b:2".into()],
			blacklist_threshold: 1,
			rotation: crate::proxy::manager::RotationConfig {
				strategy: strategy.to_string(),
				per_worker: true,
			},
			..Default::default()
		})
		.unwrap()
	}

	#[test]
	fn round_robin_avoids_repeating_current() {
		let m = manager("round-robin");
		let rotator = ProxyRotator::new(m, 0);
		if rotator.proxies.len() < 2 {
			return;
		}
		let first = rotator.get_next().unwrap().unwrap();
		let second = rotator.get_next().unwrap().unwrap();
		assert_ne!(first, second);
	}

	#[test]
	fn failover_after_report_failure() {
		let m = manager("round-robin");
		let rotator = ProxyRotator::new(m, 0);
		if rotator.proxies.is_empty() {
			return;
		}
		let first = rotator.get_next().unwrap().unwrap();
		rotator.report_failure(&first);
		let remaining = rotator
			.proxies
			.iter()
			.filter(|p| p.failures.load(Ordering::SeqCst) < rotator.manager.blacklist_threshold())
			.count();
		if remaining == 0 {
			assert!(matches!(rotator.get_next(), Err(ProxyError::Exhausted)));
		} else {
			let next = rotator.get_next().unwrap().unwrap();
			assert_ne!(next, first);
		}
	}

	#[test]
	fn disabled_proxy_returns_none() {
		let m = ProxyManager::new(ProxyManagerConfig::default()).unwrap();
		let rotator = ProxyRotator::new(m, 0);
		assert_eq!(rotator.get_next().unwrap(), None);
	}

	#[test]
	fn report_failure_increments_failures_exactly_once_per_call() {
		let m = ProxyManager::new(ProxyManagerConfig {
			enabled: true,
			proxies: vec!["http://a:1".into()],
			blacklist_threshold: 3,
			rotation: crate::proxy::manager::RotationConfig {
				strategy: "round-robin".to_string(),
				per_worker: true,
			},
			..Default::default()
		})
		.unwrap();
		let rotator = ProxyRotator::new(m, 0);
		let url = url::Url::parse("http://a:1").unwrap();

		assert!(!rotator.report_failure(&url));
		assert_eq!(rotator.proxies[0].failures.load(Ordering::SeqCst), 1);
		assert!(!rotator.report_failure(&url));
		assert_eq!(rotator.proxies[0].failures.load(Ordering::SeqCst), 2);
		assert!(rotator.report_failure(&url));
		assert_eq!(rotator.proxies[0].failures.load(Ordering::SeqCst), 3);
	}
}
