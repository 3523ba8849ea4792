//! Structured configuration document (§6): `engine`, `grpc`, `http`,
//! `proxy`, `retry`, `nodes[]`, `logging`. Loaded with `serde_yaml`, checked
//! with [`Config::validate`] before the engine is constructed, mirroring
//! `original_source`'s `ConfigValidator`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn duration_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
	D: serde::Deserializer<'de>,
{
	let secs = f64::deserialize(deserializer)?;
	Ok(Duration::from_secs_f64(secs))
}

mod serde_duration_secs {
	use super::*;
	pub fn serialize<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		s.serialize_f64(d.as_secs_f64())
	}
	pub fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		duration_secs(d)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
	pub workers: u32,
	pub max_retries: u32,
	#[serde(with = "serde_duration_secs")]
	pub timeout: Duration,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			workers: 5,
			max_retries: 3,
			timeout: Duration::from_secs(30),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepAliveConfig {
	pub enabled: bool,
	#[serde(with = "serde_duration_secs")]
	pub time: Duration,
	#[serde(with = "serde_duration_secs")]
	pub timeout: Duration,
	#[serde(with = "serde_duration_secs")]
	pub idle_timeout: Duration,
	#[serde(with = "serde_duration_secs")]
	pub max_age: Duration,
	#[serde(with = "serde_duration_secs")]
	pub grace_period: Duration,
	pub permit_without_stream: bool,
}

impl Default for KeepAliveConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			time: Duration::from_secs(30),
			timeout: Duration::from_secs(10),
			idle_timeout: Duration::from_secs(15 * 60),
			max_age: Duration::from_secs(30 * 60),
			grace_period: Duration::from_secs(5),
			permit_without_stream: true,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionPoolConfig {
	pub max_size: u32,
	pub min_idle: u32,
	pub max_idle: u32,
	#[serde(with = "serde_duration_secs")]
	pub idle_timeout: Duration,
}

impl Default for ConnectionPoolConfig {
	fn default() -> Self {
		Self {
			max_size: 50,
			min_idle: 5,
			max_idle: 20,
			idle_timeout: Duration::from_secs(5 * 60),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
	pub enabled: bool,
	pub cert_file: String,
	pub key_file: String,
}

impl Default for TlsConfig {
	fn default() -> Self {
		Self {
			enabled: false,
			cert_file: String::new(),
			key_file: String::new(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrpcConfig {
	pub address: String,
	pub port: u16,
	pub max_message_size: u32,
	pub max_workers: u32,
	#[serde(with = "serde_duration_secs")]
	pub timeout: Duration,
	pub keep_alive: KeepAliveConfig,
	pub connection_pool: ConnectionPoolConfig,
	pub tls: TlsConfig,
}

impl Default for GrpcConfig {
	fn default() -> Self {
		Self {
			address: "0.0.0.0:50051".to_string(),
			port: 50051,
			max_message_size: 10 * 1024 * 1024,
			max_workers: 50,
			timeout: Duration::from_secs(30),
			keep_alive: KeepAliveConfig::default(),
			connection_pool: ConnectionPoolConfig::default(),
			tls: TlsConfig::default(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
	pub follow_redirects: bool,
	pub max_redirects: u32,
	#[serde(with = "serde_duration_secs")]
	pub request_timeout: Duration,
	#[serde(with = "serde_duration_secs")]
	pub retry_delay: Duration,
	pub user_agent: String,
	pub verify_certs: bool,
	pub compression: bool,
}

impl Default for HttpConfig {
	fn default() -> Self {
		Self {
			follow_redirects: true,
			max_redirects: 10,
			request_timeout: Duration::from_secs(30),
			retry_delay: Duration::from_secs(1),
			user_agent: "vulnscan-worker/1.0".to_string(),
			verify_certs: true,
			compression: true,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyRotationConfig {
	pub strategy: String,
	#[serde(with = "serde_duration_secs")]
	pub interval: Duration,
	pub per_worker: bool,
}

impl Default for ProxyRotationConfig {
	fn default() -> Self {
		Self {
			strategy: "round-robin".to_string(),
			interval: Duration::from_secs(5 * 60),
			per_worker: true,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
	pub enabled: bool,
	pub proxies: Vec<String>,
	#[serde(with = "serde_duration_secs")]
	pub check_interval: Duration,
	#[serde(with = "serde_duration_secs")]
	pub timeout: Duration,
	pub blacklist_threshold: u32,
	#[serde(with = "serde_duration_secs")]
	pub blacklist_duration: Duration,
	pub rotation: ProxyRotationConfig,
}

impl Default for ProxyConfig {
	fn default() -> Self {
		Self {
			enabled: false,
			proxies: Vec::new(),
			check_interval: Duration::from_secs(5 * 60),
			timeout: Duration::from_secs(10),
			blacklist_threshold: 3,
			blacklist_duration: Duration::from_secs(30 * 60),
			rotation: ProxyRotationConfig::default(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOnConfig {
	pub status_codes: Vec<u16>,
	pub network_errors: bool,
	pub timeouts: bool,
}

impl Default for RetryOnConfig {
	fn default() -> Self {
		Self {
			status_codes: vec![429, 500, 502, 503, 504],
			network_errors: true,
			timeouts: true,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
	pub max_attempts: u32,
	#[serde(with = "serde_duration_secs")]
	pub initial_delay: Duration,
	#[serde(with = "serde_duration_secs")]
	pub max_delay: Duration,
	pub backoff_multiplier: f64,
	pub retry_on: RetryOnConfig,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			initial_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(10),
			backoff_multiplier: 2.0,
			retry_on: RetryOnConfig::default(),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeIdentity {
	pub id: String,
	pub name: String,
	pub region: String,
	pub tags: Vec<String>,
	pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkLimits {
	pub bandwidth_limit: u32,
	pub connections_limit: u32,
}

impl Default for NetworkLimits {
	fn default() -> Self {
		Self {
			bandwidth_limit: 100,
			connections_limit: 200,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
	pub cpu_limit: u32,
	pub memory_limit: u32,
	pub network: NetworkLimits,
}

impl Default for PerformanceConfig {
	fn default() -> Self {
		Self {
			cpu_limit: 50,
			memory_limit: 512,
			network: NetworkLimits::default(),
		}
	}
}

impl PerformanceConfig {
	/// `max_workers = min(cpu_limit/2, connections_limit/10)` clamped to `[1,100]`.
	pub fn calculate_max_workers(&self) -> u32 {
		let cpu_based = self.cpu_limit / 2;
		let conn_based = self.network.connections_limit / 10;
		cpu_based.min(conn_based).clamp(1, 100)
	}

	/// `(min, max)` queue size bounds for a given worker count.
	pub fn calculate_queue_size_limits(&self, workers: u32) -> (u32, u32) {
		let min = workers * 2;
		let max = ((self.memory_limit * 1024) / 10).min(10_000).max(min);
		(min, max)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
	pub size: u32,
	pub queue_size: u32,
	pub batch_size: u32,
	pub retry_count: u32,
	#[serde(with = "serde_duration_secs")]
	pub retry_delay: Duration,
	#[serde(with = "serde_duration_secs")]
	pub health_check_interval: Duration,
	pub metrics_enabled: bool,
	#[serde(with = "serde_duration_secs")]
	pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
	fn default() -> Self {
		Self {
			size: 5,
			queue_size: 100,
			batch_size: 50,
			retry_count: 3,
			retry_delay: Duration::from_secs(1),
			health_check_interval: Duration::from_secs(30),
			metrics_enabled: true,
			shutdown_timeout: Duration::from_secs(30),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitingConfig {
	pub enabled: bool,
	pub strategy: String,
	pub initial_rate: u32,
	pub max_rate: u32,
	pub min_rate: u32,
	pub backoff_factor: f64,
	pub recovery_factor: f64,
}

impl Default for RateLimitingConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			strategy: "fixed".to_string(),
			initial_rate: 50,
			max_rate: 200,
			min_rate: 10,
			backoff_factor: 1.5,
			recovery_factor: 1.2,
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfiguration {
	pub node: NodeIdentity,
	pub performance: PerformanceConfig,
	pub worker_pool: WorkerPoolConfig,
	pub http_client: HttpConfig,
	pub rate_limiting: RateLimitingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentLog {
	pub log_path: String,
	pub level: String,
}

impl Default for ComponentLog {
	fn default() -> Self {
		Self {
			log_path: String::new(),
			level: "info".to_string(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
	pub level: String,
	pub log_path: String,
	pub buffer_size: u32,
	pub queue_size: u32,
	pub async_write: bool,
	pub components: HashMap<String, ComponentLog>,
}

impl Default for LoggingConfig {
	fn default() -> Self {
		Self {
			level: "info".to_string(),
			log_path: String::new(),
			buffer_size: 4096,
			queue_size: 1000,
			async_write: true,
			components: HashMap::new(),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	pub engine: EngineConfig,
	pub grpc: GrpcConfig,
	pub http: HttpConfig,
	pub proxy: ProxyConfig,
	pub retry: RetryConfig,
	pub nodes: Vec<NodeConfiguration>,
	pub logging: LoggingConfig,
}

impl Config {
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let data = std::fs::read_to_string(path)?;
		let cfg: Config = serde_yaml::from_str(&data)?;
		cfg.validate()?;
		Ok(cfg)
	}

	/// Aggregate validation, grounded in `ConfigValidator` of the system this
	/// worker participates in: basic checks, then per-node checks.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.nodes.is_empty() {
			return Err(ConfigError::NoNodes);
		}
		if self.grpc.address.is_empty() {
			return Err(ConfigError::EmptyGrpcAddress);
		}
		if self.grpc.max_message_size == 0 {
			return Err(ConfigError::InvalidMaxMessageSize);
		}
		if self.grpc.keep_alive.enabled {
			let ka = &self.grpc.keep_alive;
			if ka.time.is_zero()
				|| ka.timeout.is_zero()
				|| ka.idle_timeout.is_zero()
				|| ka.max_age.is_zero()
				|| ka.grace_period.is_zero()
			{
				return Err(ConfigError::InvalidKeepAlive);
			}
		}
		let pool = &self.grpc.connection_pool;
		if pool.min_idle > pool.max_size {
			return Err(ConfigError::InvalidConnectionPoolMinIdle);
		}
		if pool.max_idle > pool.max_size {
			return Err(ConfigError::InvalidConnectionPoolMaxIdle);
		}

		for node in &self.nodes {
			let label = if node.node.id.is_empty() {
				"<unnamed>".to_string()
			} else {
				node.node.id.clone()
			};
			if node.performance.cpu_limit == 0 || node.performance.cpu_limit > 100 {
				return Err(ConfigError::InvalidCpuLimit(label));
			}
			if node.performance.memory_limit == 0 {
				return Err(ConfigError::InvalidMemoryLimit(label));
			}
			if node.worker_pool.size == 0 || node.worker_pool.queue_size == 0 {
				return Err(ConfigError::InvalidWorkerPool(label));
			}
		}

		if self.proxy.enabled {
			let mut any_valid = false;
			for raw in &self.proxy.proxies {
				match url::Url::parse(raw) {
					Ok(parsed)
						if matches!(parsed.scheme(), "http" | "https" | "socks5")
							&& parsed.host_str().is_some_and(|h| !h.is_empty()) =>
					{
						any_valid = true;
					},
					_ => {},
				}
			}
			if !any_valid {
				return Err(ConfigError::ProxyEnabledWithoutUrls);
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_config_is_valid_once_a_node_is_added() {
		let mut cfg = Config::default();
		assert!(matches!(cfg.validate(), Err(ConfigError::NoNodes)));
		cfg.nodes.push(NodeConfiguration::default());
		cfg.nodes[0].node.id = "scanner-01".to_string();
		assert!(cfg.validate().is_ok());
	}

	#[test]
	fn rejects_proxy_enabled_without_urls() {
		let mut cfg = Config::default();
		cfg.nodes.push(NodeConfiguration {
			node: NodeIdentity {
				id: "n1".into(),
				..Default::default()
			},
			..Default::default()
		});
		cfg.proxy.enabled = true;
		assert!(matches!(
			cfg.validate(),
			Err(ConfigError::ProxyEnabledWithoutUrls)
		));
		cfg.proxy.proxies.push("http://proxy.example:8080".to_string());
		assert!(cfg.validate().is_ok());
	}

	#[test]
	fn load_reads_and_validates_a_yaml_file_from_disk() {
		let yaml = r#"
grpc:
  address: "0.0.0.0:50051"
nodes:
  - node:
      id: scanner-01
"#;
		let mut file = tempfile::NamedTempFile::new().unwrap();
		std::io::Write::write_all(&mut file, yaml.as_bytes()).unwrap();
		let cfg = Config::load(file.path()).unwrap();
		assert_eq!(cfg.nodes[0].node.id, "scanner-01");
		assert_eq!(cfg.grpc.address, "0.0.0.0:50051");
	}

	#[test]
	fn load_surfaces_missing_file_as_error() {
		let err = Config::load("/nonexistent/path/to/config.yaml").unwrap_err();
		assert!(matches!(err, ConfigError::Io(_)));
	}

	#[test]
	fn calculates_max_workers_and_queue_bounds() {
		let perf = PerformanceConfig {
			cpu_limit: 80,
			memory_limit: 2048,
			network: NetworkLimits {
				bandwidth_limit: 100,
				connections_limit: 500,
			},
		};
		assert_eq!(perf.calculate_max_workers(), 40);
		let (min, max) = perf.calculate_queue_size_limits(40);
		assert_eq!(min, 80);
		assert_eq!(max, 10_000.min(2048 * 1024 / 10));
	}
}
