//! CLI entry point: `scanner --config <path>` per spec.md §6. Loads config,
//! builds the engine (rate limiter, proxy manager, probe client, worker
//! pool), serves the `ScannerService` gRPC surface alongside a metrics HTTP
//! endpoint, and waits for SIGINT/SIGTERM to drive graceful shutdown.
//! Grounded in the teacher's `main.rs` (`Args`, `tracing_subscriber::fmt()`
//! init, `JoinSet` for sibling servers) and `original_source/cmd/scanner/main.go`
//! (signal handling, exit codes).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use prometheus_client::registry::Registry;
use tokio::task::JoinSet;
use tracing::{error, info};

use vulnscan_worker::config::Config;
use vulnscan_worker::http::client::{ClientConfig, ProbeClient};
use vulnscan_worker::http::ratelimit::{RateLimitConfig, RateLimiter, Strategy as RateLimitStrategy};
use vulnscan_worker::http::retry::{RetryConfig, RetryOn, Retrier};
use vulnscan_worker::metrics::{self, Metrics};
use vulnscan_worker::pool::{WorkerPool, WorkerPoolConfig};
use vulnscan_worker::proxy::{ProxyManager, ProxyManagerConfig, ProxyRotator, RotationConfig};
use vulnscan_worker::rpc::{ScannerServiceServer, Service};
use vulnscan_worker::telemetry;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
	/// Path to the YAML configuration document (spec.md §6).
	#[arg(long, value_name = "path")]
	config: PathBuf,
}

fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	telemetry::init("info");

	let config = match Config::load(&args.config) {
		Ok(config) => config,
		Err(err) => {
			eprintln!("failed to load config: {err}");
			std::process::exit(1);
		},
	};

	let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
	match runtime.block_on(run(config)) {
		Ok(()) => Ok(()),
		Err(err) => {
			error!(error = %err, "scanner exited with error");
			std::process::exit(1);
		},
	}
}

async fn run(config: Config) -> anyhow::Result<()> {
	let node = config
		.nodes
		.first()
		.cloned()
		.context("config must carry at least one node")?;

	let mut registry = Registry::default();
	let metrics = Arc::new(Metrics::new(&mut registry));

	let rate_limit_config = RateLimitConfig {
		enabled: node.rate_limiting.enabled,
		strategy: RateLimitStrategy::from(node.rate_limiting.strategy.as_str()),
		initial_rate: node.rate_limiting.initial_rate,
		max_rate: node.rate_limiting.max_rate,
		min_rate: node.rate_limiting.min_rate,
		backoff_factor: node.rate_limiting.backoff_factor,
		recovery_factor: node.rate_limiting.recovery_factor,
	};
	let rate_limiter = RateLimiter::new(rate_limit_config);

	let proxy_manager = ProxyManager::new(ProxyManagerConfig {
		enabled: config.proxy.enabled,
		proxies: config.proxy.proxies.clone(),
		check_interval: config.proxy.check_interval,
		blacklist_threshold: config.proxy.blacklist_threshold,
		blacklist_duration: config.proxy.blacklist_duration,
		rotation: RotationConfig {
			strategy: config.proxy.rotation.strategy.clone(),
			per_worker: config.proxy.rotation.per_worker,
		},
	})
	.context("invalid proxy configuration")?;

	let rotator = if proxy_manager.enabled() {
		Some(Arc::new(ProxyRotator::new(proxy_manager.clone(), 0)))
	} else {
		None
	};

	let retrier = Retrier::new(RetryConfig {
		max_attempts: config.retry.max_attempts,
		initial_delay: config.retry.initial_delay,
		max_delay: config.retry.max_delay,
		backoff_multiplier: config.retry.backoff_multiplier,
		retry_on: RetryOn {
			status_codes: config.retry.retry_on.status_codes.clone(),
			network_errors: config.retry.retry_on.network_errors,
			timeouts: config.retry.retry_on.timeouts,
		},
	});

	let client_config = ClientConfig {
		user_agent: node.http_client.user_agent.clone(),
		follow_redirects: node.http_client.follow_redirects,
		max_redirects: node.http_client.max_redirects,
		verify_certs: node.http_client.verify_certs,
		connect_timeout: node.http_client.request_timeout,
		read_timeout: node.http_client.request_timeout,
	};

	let probe = Arc::new(
		ProbeClient::new(client_config, rate_limiter.clone(), retrier, rotator, metrics.clone())
			.context("failed to build HTTP probe client")?,
	);

	let pool = WorkerPool::start(
		WorkerPoolConfig {
			workers: node.worker_pool.size as usize,
			queue_size: node.worker_pool.queue_size as usize,
			shutdown_timeout: node.worker_pool.shutdown_timeout,
		},
		probe.clone(),
		metrics.clone(),
	);

	let service = Service::new(probe.clone(), pool.clone(), metrics.clone(), node.node.id.clone());

	let grpc_addr = config
		.grpc
		.address
		.parse()
		.with_context(|| format!("invalid grpc address {}", config.grpc.address))?;

	let max_concurrent_rpcs = config.grpc.max_workers.max(1) as usize;
	let mut servers = JoinSet::new();

	servers.spawn(async move {
		info!(%grpc_addr, max_concurrent_rpcs, "starting gRPC server");
		tonic::transport::Server::builder()
			.layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent_rpcs))
			.add_service(ScannerServiceServer::new(service))
			.serve(grpc_addr)
			.await
			.context("gRPC server failed")
	});

	let metrics_app = metrics::App::new(Arc::new(registry));
	let metrics_addr = "0.0.0.0:9090".to_string();
	servers.spawn(async move {
		info!(address = %metrics_addr, "starting metrics server");
		let listener = tokio::net::TcpListener::bind(&metrics_addr)
			.await
			.context("failed to bind metrics listener")?;
		axum::serve(listener, metrics_app.router())
			.await
			.context("metrics server failed")
	});

	tokio::select! {
		_ = wait_for_shutdown_signal() => {
			info!("shutdown signal received, stopping worker pool");
		}
		Some(result) = servers.join_next() => {
			result.context("server task panicked")??;
		}
	}

	pool.stop().await;
	proxy_manager.stop();
	rate_limiter.stop();
	servers.shutdown().await;

	info!("scanner shut down cleanly");
	Ok(())
}

async fn wait_for_shutdown_signal() {
	let ctrl_c = async {
		let _ = tokio::signal::ctrl_c().await;
	};

	#[cfg(unix)]
	let terminate = async {
		let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler");
		signal.recv().await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
