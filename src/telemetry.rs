//! Logging initialisation, matching the teacher's `main.rs` pattern exactly:
//! `tracing_subscriber::fmt` with an env filter, stderr writer, no ANSI.

use tracing_subscriber::EnvFilter;

pub fn init(default_level: &str) {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
		)
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.init();
}
