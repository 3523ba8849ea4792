//! Proxy pool: accepted proxy list, blacklist map, per-worker assignment
//! memo, background health-check task. Grounded in `http/proxy/manager.go`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::model::now_unix;

#[derive(Debug, Clone)]
pub struct RotationConfig {
	pub strategy: String,
	pub per_worker: bool,
}

impl Default for RotationConfig {
	fn default() -> Self {
		Self {
			strategy: "round-robin".to_string(),
			per_worker: true,
		}
	}
}

#[derive(Debug, Clone)]
pub struct ProxyManagerConfig {
	pub enabled: bool,
	pub proxies: Vec<String>,
	pub check_interval: Duration,
	pub blacklist_threshold: u32,
	pub blacklist_duration: Duration,
	pub rotation: RotationConfig,
}

impl Default for ProxyManagerConfig {
	fn default() -> Self {
		Self {
			enabled: false,
			proxies: Vec::new(),
			check_interval: Duration::from_secs(5 * 60),
			blacklist_threshold: 3,
			blacklist_duration: Duration::from_secs(30 * 60),
			rotation: RotationConfig::default(),
		}
	}
}

/// A proxy entry's mutable state, shared between the manager and every
/// rotator that was handed this entry.
pub struct ProxyHandle {
	pub url: url::Url,
	pub failures: AtomicU32,
	pub last_used: AtomicI64,
	pub last_check: AtomicI64,
}

impl ProxyHandle {
	fn key(&self) -> String {
		self.url.to_string()
	}
}

fn is_valid_proxy_url(url: &url::Url) -> bool {
	matches!(url.scheme(), "http" | "https" | "socks5") && url.host_str().is_some_and(|h| !h.is_empty())
}

pub struct ProxyManager {
	config: ProxyManagerConfig,
	proxies: RwLock<Vec<Arc<ProxyHandle>>>,
	blacklist: RwLock<HashMap<String, i64>>,
	workers: RwLock<HashMap<u32, Vec<Arc<ProxyHandle>>>>,
	cancel: CancellationToken,
}

impl ProxyManager {
	pub fn new(config: ProxyManagerConfig) -> Result<Arc<Self>, ConfigError> {
		let pm = Arc::new(Self {
			config: config.clone(),
			proxies: RwLock::new(Vec::new()),
			blacklist: RwLock::new(HashMap::new()),
			workers: RwLock::new(HashMap::new()),
			cancel: CancellationToken::new(),
		});

		if !config.enabled || config.proxies.is_empty() {
			return Ok(pm);
		}

		let mut any_valid = false;
		for raw in &config.proxies {
			if let Ok(parsed) = url::Url::parse(raw) {
				if is_valid_proxy_url(&parsed) {
					pm.add_proxy(parsed);
					any_valid = true;
				}
			}
		}
		if !any_valid {
			return Err(ConfigError::ProxyEnabledWithoutUrls);
		}

		pm.clone().spawn_health_check();
		Ok(pm)
	}

	pub fn add_proxy(&self, url: url::Url) {
		let mut proxies = self.proxies.write();
		let key = url.to_string();
		if proxies.iter().any(|p| p.key() == key) {
			return;
		}
		proxies.push(Arc::new(ProxyHandle {
			url,
			failures: AtomicU32::new(0),
			last_used: AtomicI64::new(0),
			last_check: AtomicI64::new(now_unix()),
		}));
	}

	pub fn report_failure(&self, url: &url::Url) {
		let key = url.to_string();
		let proxies = self.proxies.read();
		let Some(entry) = proxies.iter().find(|p| p.key() == key) else {
			return;
		};
		let failures = entry.failures.fetch_add(1, Ordering::SeqCst) + 1;
		if failures >= self.config.blacklist_threshold {
			self.blacklist.write().insert(key, now_unix());
		}
	}

	/// Inserts `url` into the blacklist map without touching its failure
	/// count — used by a rotator that already incremented the count itself
	/// and only needs the manager to record the blacklist entry.
	pub fn blacklist_now(&self, url: &url::Url) {
		self.blacklist.write().insert(url.to_string(), now_unix());
	}

	/// ~30% independent inclusion probability; falls back to one uniformly
	/// random proxy if the draw comes up empty. Memoised per worker id.
	pub fn assign_proxies_to_worker(&self, worker_id: u32) -> Vec<Arc<ProxyHandle>> {
		if !self.config.enabled {
			return Vec::new();
		}
		if let Some(existing) = self.workers.read().get(&worker_id) {
			return existing.clone();
		}

		let proxies = self.proxies.read();
		let mut rng = rand::rng();
		let mut assigned: Vec<Arc<ProxyHandle>> = proxies
			.iter()
			.filter(|_| rng.random::<f32>() < 0.3)
			.cloned()
			.collect();
		if assigned.is_empty() && !proxies.is_empty() {
			let idx = rng.random_range(0..proxies.len());
			assigned.push(proxies[idx].clone());
		}
		drop(proxies);

		self.workers.write().insert(worker_id, assigned.clone());
		assigned
	}

	pub fn blacklist_threshold(&self) -> u32 {
		self.config.blacklist_threshold
	}

	pub fn rotation_strategy(&self) -> &str {
		&self.config.rotation.strategy
	}

	pub fn enabled(&self) -> bool {
		self.config.enabled
	}

	fn spawn_health_check(self: Arc<Self>) {
		// Floored to >= 1 minute at spawn time, not at config-parse time.
		let interval = self.config.check_interval.max(Duration::from_secs(60));
		tokio::spawn(async move {
			let mut tick = tokio::time::interval(interval);
			loop {
				tokio::select! {
					_ = tick.tick() => self.clear_expired_blacklist_entries(),
					_ = self.cancel.cancelled() => return,
				}
			}
		});
	}

	fn clear_expired_blacklist_entries(&self) {
		let now = now_unix();
		let duration_secs = self.config.blacklist_duration.as_secs() as i64;
		let proxies = self.proxies.read();
		let mut blacklist = self.blacklist.write();
		for entry in proxies.iter() {
			if entry.failures.load(Ordering::SeqCst) < self.config.blacklist_threshold {
				continue;
			}
			let key = entry.key();
			if let Some(&blacklisted_at) = blacklist.get(&key) {
				if now - blacklisted_at > duration_secs {
					entry.failures.store(0, Ordering::SeqCst);
					blacklist.remove(&key);
					debug!(proxy = %key, "proxy removed from blacklist");
				}
			}
		}
	}

	pub fn stop(&self) {
		self.cancel.cancel();
		info!("proxy manager health check stopped");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn handle(url: &str) -> Arc<ProxyHandle> {
		Arc::new(ProxyHandle {
			url: url::Url::parse(url).unwrap(),
			failures: AtomicU32::new(0),
			last_used: AtomicI64::new(0),
			last_check: AtomicI64::new(0),
		})
	}

	#[test]
	fn rejects_duplicate_proxies() {
		let pm = ProxyManager::new(ProxyManagerConfig {
			enabled: true,
			proxies: vec![
				"http://proxy-a:8080".into(),
				"http://proxy-a:8080".into(),
			],
			..Default::default()
		})
		.unwrap();
		assert_eq!(pm.proxies.read().len(), 1);
	}

	#[test]
	fn blacklists_after_threshold_failures() {
		let pm = ProxyManager::new(ProxyManagerConfig {
			enabled: true,
			proxies: vec!["http://proxy-a:8080".into()],
			blacklist_threshold: 2,
			..Default::default()
		})
		.unwrap();
		let url = url::Url::parse("http://proxy-a:8080").unwrap();
		pm.report_failure(&url);
		assert!(pm.blacklist.read().is_empty());
		pm.report_failure(&url);
		assert!(pm.blacklist.read().contains_key(&url.to_string()));
	}

	#[test]
	fn worker_assignment_is_memoised() {
		let pm = ProxyManager::new(ProxyManagerConfig {
			enabled: true,
			proxies: vec!["http://a:1".into(), "http://b:2".into(), "http://c:3".into()],
			..Default::default()
		})
		.unwrap();
		let first = pm.assign_proxies_to_worker(1);
		let second = pm.assign_proxies_to_worker(1);
		assert_eq!(first.len(), second.len());
		for (a, b) in first.iter().zip(second.iter()) {
			assert_eq!(a.key(), b.key());
		}
	}

	#[test]
	fn disabled_manager_assigns_nothing() {
		let pm = ProxyManager::new(ProxyManagerConfig::default()).unwrap();
		assert!(pm.assign_proxies_to_worker(0).is_empty());
	}

	#[test]
	fn rejects_invalid_scheme() {
		assert!(!is_valid_proxy_url(&url::Url::parse("ftp://proxy:21").unwrap()));
		assert!(is_valid_proxy_url(&url::Url::parse("socks5://proxy:1080").unwrap()));
	}

	#[test]
	fn handle_key_normalises_to_url_string() {
		let h = handle("http://x:1");
		assert_eq!(h.key(), "http://x:1/");
	}
}
