//! HTTP probe client: composes the rate limiter, proxy rotator, and retry
//! policy around a `reqwest::Client`. Grounded in `http/client/client.go`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::HttpError;
use crate::http::ratelimit::RateLimiter;
use crate::http::retry::Retrier;
use crate::metrics::Metrics;
use crate::model::HttpRequest as ProbeRequest;
use crate::proxy::ProxyRotator;

#[derive(Debug, Clone)]
pub struct ClientConfig {
	pub user_agent: String,
	pub follow_redirects: bool,
	pub max_redirects: u32,
	pub verify_certs: bool,
	pub connect_timeout: Duration,
	pub read_timeout: Duration,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			user_agent: "vulnscan-worker/1.0".to_string(),
			follow_redirects: true,
			max_redirects: 10,
			verify_certs: true,
			connect_timeout: Duration::from_secs(5),
			read_timeout: Duration::from_secs(30),
		}
	}
}

fn build_reqwest_client(
	config: &ClientConfig,
	proxy: Option<url::Url>,
) -> Result<reqwest::Client, HttpError> {
	let redirect = if config.follow_redirects {
		reqwest::redirect::Policy::limited(config.max_redirects as usize)
	} else {
		reqwest::redirect::Policy::none()
	};

	let mut builder = reqwest::Client::builder()
		.user_agent(config.user_agent.clone())
		.redirect(redirect)
		.danger_accept_invalid_certs(!config.verify_certs)
		.connect_timeout(config.connect_timeout)
		.timeout(config.connect_timeout + config.read_timeout)
		.pool_max_idle_per_host(10)
		.pool_idle_timeout(Duration::from_secs(90));

	if let Some(proxy_url) = proxy {
		let proxy = reqwest::Proxy::all(proxy_url.as_str())
			.map_err(|_| HttpError::Proxy(crate::error::ProxyError::InvalidUrl(proxy_url.to_string())))?;
		builder = builder.proxy(proxy);
	}

	builder.build().map_err(HttpError::Network)
}

/// Executes one probe request honoring rate limiting, proxy rotation, and
/// retry-with-backoff. `rotator` is `None` when this worker has no proxies.
pub struct ProbeClient {
	config: ClientConfig,
	base_client: reqwest::Client,
	rate_limiter: Arc<RateLimiter>,
	retrier: Retrier,
	rotator: Option<Arc<ProxyRotator>>,
	metrics: Arc<Metrics>,
}

impl ProbeClient {
	pub fn new(
		config: ClientConfig,
		rate_limiter: Arc<RateLimiter>,
		retrier: Retrier,
		rotator: Option<Arc<ProxyRotator>>,
		metrics: Arc<Metrics>,
	) -> Result<Self, HttpError> {
		let base_client = build_reqwest_client(&config, None)?;
		Ok(Self {
			config,
			base_client,
			rate_limiter,
			retrier,
			rotator,
			metrics,
		})
	}

	/// Sends `request`, returning the response status/headers/body and the
	/// elapsed wall-clock time of the final attempt.
	pub async fn do_request(
		&self,
		request: &ProbeRequest,
	) -> Result<(reqwest::StatusCode, HashMap<String, String>, bytes::Bytes, Duration), HttpError> {
		let max_attempts = self.retrier.max_attempts().max(1);
		let mut last_err: Option<HttpError> = None;

		for attempt in 1..=max_attempts {
			self.metrics.rate_limiter_waits.inc();
			self.rate_limiter.wait().await;

			let proxy_url = match &self.rotator {
				Some(rotator) => match rotator.get_next() {
					Ok(url) => url,
					Err(proxy_err) => {
						// No available proxy: treated as a network error for retry
						// purposes (spec §5/§7 — "surfaced as a retryable network error").
						self.rate_limiter.report_failure();
						let err = HttpError::Proxy(proxy_err);
						let retryable = attempt < max_attempts && self.retrier.should_retry_error(&err);
						last_err = Some(err);
						if retryable {
							self.metrics.retry_attempts.inc();
							tokio::time::sleep(self.retrier.backoff(attempt)).await;
							continue;
						}
						break;
					},
				},
				None => None,
			};

			let client = if proxy_url.is_some() {
				build_reqwest_client(&self.config, proxy_url.clone())?
			} else {
				self.base_client.clone()
			};

			let start = Instant::now();
			let result = self.send_once(&client, request).await;
			let elapsed = start.elapsed();
			self.metrics.probe_duration.observe(elapsed.as_secs_f64());

			match result {
				Ok((status, headers, body)) => {
					self.rate_limiter.report_success();
					if attempt < max_attempts && self.retrier.should_retry_status(status.as_u16()) {
						self.metrics.retry_attempts.inc();
						tokio::time::sleep(self.retrier.backoff(attempt)).await;
						continue;
					}
					return Ok((status, headers, body, elapsed));
				},
				Err(err) => {
					self.rate_limiter.report_failure();
					if let (Some(rotator), Some(proxy)) = (&self.rotator, &proxy_url) {
						if rotator.report_failure(proxy) {
							self.metrics.proxy_blacklist_events.inc();
						}
					}
					let retryable = attempt < max_attempts && self.retrier.should_retry_error(&err);
					last_err = Some(err);
					if retryable {
						self.metrics.retry_attempts.inc();
						tokio::time::sleep(self.retrier.backoff(attempt)).await;
						continue;
					}
					break;
				},
			}
		}

		Err(last_err.unwrap_or(HttpError::Timeout))
	}

	async fn send_once(
		&self,
		client: &reqwest::Client,
		request: &ProbeRequest,
	) -> Result<(reqwest::StatusCode, HashMap<String, String>, bytes::Bytes), HttpError> {
		let method = reqwest::Method::from_bytes(request.method.as_bytes())
			.map_err(|_| HttpError::InvalidRequest(format!("invalid method {}", request.method)))?;
		let mut builder = client.request(method, &request.url);
		for (name, value) in &request.headers {
			builder = builder.header(name, value);
		}
		if !request.headers.contains_key("User-Agent") {
			builder = builder.header("User-Agent", &self.config.user_agent);
		}

		let response = builder.send().await.map_err(|e| {
			if e.is_timeout() {
				HttpError::Timeout
			} else {
				HttpError::Network(e)
			}
		})?;

		let status = response.status();
		let headers = response
			.headers()
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
			.collect();
		let body = response.bytes().await.map_err(HttpError::Network)?;
		Ok((status, headers, body))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::http::ratelimit::{RateLimitConfig, RateLimiter};
	use crate::http::retry::RetryConfig;
	use prometheus_client::registry::Registry;
	use wiremock::matchers::method;
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn metrics() -> Arc<Metrics> {
		let mut registry = Registry::default();
		Arc::new(Metrics::new(&mut registry))
	}

	#[tokio::test]
	async fn successful_probe_returns_status_and_body() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.respond_with(ResponseTemplate::new(200).set_body_string("ok"))
			.mount(&server)
			.await;

		let client = ProbeClient::new(
			ClientConfig::default(),
			RateLimiter::new(RateLimitConfig {
				initial_rate: 1000,
				max_rate: 1000,
				..Default::default()
			}),
			Retrier::new(RetryConfig::default()),
			None,
			metrics(),
		)
		.unwrap();

		let request = ProbeRequest {
			url: server.uri(),
			method: "GET".to_string(),
			headers: HashMap::new(),
		};
		let (status, _headers, body, _elapsed) = client.do_request(&request).await.unwrap();
		assert_eq!(status.as_u16(), 200);
		assert_eq!(&body[..], b"ok");
	}

	#[tokio::test]
	async fn retries_on_configured_status_then_succeeds() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.respond_with(ResponseTemplate::new(503))
			.up_to_n_times(2)
			.mount(&server)
			.await;
		Mock::given(method("GET"))
			.respond_with(ResponseTemplate::new(200).set_body_string("done"))
			.mount(&server)
			.await;

		let client = ProbeClient::new(
			ClientConfig::default(),
			RateLimiter::new(RateLimitConfig {
				initial_rate: 1000,
				max_rate: 1000,
				..Default::default()
			}),
			Retrier::new(RetryConfig {
				max_attempts: 3,
				initial_delay: Duration::from_millis(1),
				max_delay: Duration::from_millis(5),
				..Default::default()
			}),
			None,
			metrics(),
		)
		.unwrap();

		let request = ProbeRequest {
			url: server.uri(),
			method: "GET".to_string(),
			headers: HashMap::new(),
		};
		let (status, ..) = client.do_request(&request).await.unwrap();
		assert_eq!(status.as_u16(), 200);
	}

	#[tokio::test]
	async fn exhausted_proxy_pool_surfaces_as_a_network_error() {
		use crate::proxy::{ProxyManager, ProxyManagerConfig, ProxyRotator};

		// blacklist_threshold of 0 means no proxy is ever "available" (failures < 0 is never true).
		let manager = ProxyManager::new(ProxyManagerConfig {
			enabled: true,
			proxies: vec!["http://proxy.invalid:8080".to_string()],
			blacklist_threshold: 0,
			..Default::default()
		})
		.unwrap();
		let rotator = Arc::new(ProxyRotator::new(manager, 0));

		let client = ProbeClient::new(
			ClientConfig::default(),
			RateLimiter::new(RateLimitConfig {
				initial_rate: 1000,
				max_rate: 1000,
				..Default::default()
			}),
			Retrier::new(RetryConfig {
				max_attempts: 2,
				initial_delay: Duration::from_millis(1),
				max_delay: Duration::from_millis(2),
				..Default::default()
			}),
			Some(rotator),
			metrics(),
		)
		.unwrap();

		let request = ProbeRequest {
			url: "http://example.invalid".to_string(),
			method: "GET".to_string(),
			headers: HashMap::new(),
		};
		let err = client.do_request(&request).await.unwrap_err();
		assert!(matches!(err, HttpError::Proxy(crate::error::ProxyError::Exhausted)));
	}

	#[tokio::test]
	async fn successful_probe_counts_one_rate_limiter_wait() {
		let server = MockServer::start().await;
		Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

		let metrics = metrics();
		let client = ProbeClient::new(
			ClientConfig::default(),
			RateLimiter::new(RateLimitConfig {
				initial_rate: 1000,
				max_rate: 1000,
				..Default::default()
			}),
			Retrier::new(RetryConfig::default()),
			None,
			metrics.clone(),
		)
		.unwrap();

		let request = ProbeRequest {
			url: server.uri(),
			method: "GET".to_string(),
			headers: HashMap::new(),
		};
		client.do_request(&request).await.unwrap();
		assert_eq!(metrics.rate_limiter_waits.get(), 1);
	}

	#[tokio::test]
	async fn proxy_crossing_blacklist_threshold_counts_one_event() {
		use crate::proxy::{ProxyManager, ProxyManagerConfig, ProxyRotator};

		let manager = ProxyManager::new(ProxyManagerConfig {
			enabled: true,
			proxies: vec!["http://127.0.0.1:1".to_string()],
			blacklist_threshold: 1,
			..Default::default()
		})
		.unwrap();
		let rotator = Arc::new(ProxyRotator::new(manager, 0));

		let metrics = metrics();
		let client = ProbeClient::new(
			ClientConfig::default(),
			RateLimiter::new(RateLimitConfig {
				initial_rate: 1000,
				max_rate: 1000,
				..Default::default()
			}),
			Retrier::new(RetryConfig {
				max_attempts: 1,
				initial_delay: Duration::from_millis(1),
				max_delay: Duration::from_millis(2),
				..Default::default()
			}),
			Some(rotator),
			metrics.clone(),
		)
		.unwrap();

		let request = ProbeRequest {
			url: "http://example.invalid".to_string(),
			method: "GET".to_string(),
			headers: HashMap::new(),
		};
		let _ = client.do_request(&request).await;
		assert_eq!(metrics.proxy_blacklist_events.get(), 1);
	}
}
