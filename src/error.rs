//! Typed error taxonomy, one `thiserror` enum per component composing into
//! [`ScanError`] at the RPC boundary. Mirrors `proxy::ProxyError` from the
//! gateway side of this codebase: flat enums, `#[error("...")]`, `#[from]`.

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
	#[error("failed to read config file: {0}")]
	Io(#[from] std::io::Error),
	#[error("failed to parse config: {0}")]
	Parse(#[from] serde_yaml::Error),
	#[error("config requires at least one node")]
	NoNodes,
	#[error("node {0}: cpu_limit must be in (0, 100]")]
	InvalidCpuLimit(String),
	#[error("node {0}: memory_limit must be positive")]
	InvalidMemoryLimit(String),
	#[error("node {0}: worker pool size and queue_size must be positive")]
	InvalidWorkerPool(String),
	#[error("grpc address must not be empty")]
	EmptyGrpcAddress,
	#[error("grpc max_message_size must be positive")]
	InvalidMaxMessageSize,
	#[error("keep_alive durations must all be positive when keep_alive is enabled")]
	InvalidKeepAlive,
	#[error("connection_pool.min_idle must be <= max_size")]
	InvalidConnectionPoolMinIdle,
	#[error("connection_pool.max_idle must be <= max_size")]
	InvalidConnectionPoolMaxIdle,
	#[error("proxy is enabled but no valid proxy URL was configured")]
	ProxyEnabledWithoutUrls,
	#[error("invalid proxy url {0}: {1}")]
	InvalidProxyUrl(String, String),
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum ValidationError {
	#[error("missing required field: {0}")]
	MissingField(&'static str),
	#[error("invalid url: {0}")]
	InvalidUrl(String),
	#[error("task rule_context is missing or has an empty id")]
	MissingRuleContext,
}

#[derive(thiserror::Error, Debug)]
pub enum AnalyserError {
	#[error("invalid detection pattern {id}: {source}")]
	InvalidPattern { id: String, source: regex::Error },
	#[error("invalid request: {0}")]
	InvalidRequest(String),
	#[error("invalid response: {0}")]
	InvalidResponse(String),
}

#[derive(thiserror::Error, Debug)]
pub enum TemplateError {
	#[error("template {0} not found")]
	NotFound(String),
	#[error("template {0} has no content form (template/templates/pattern)")]
	NoContentForm(String),
	#[error("template {0} is missing required variable {1}")]
	MissingVariable(String, String),
	#[error("template {0} failed to render: {1}")]
	RenderFailed(String, String),
	#[error("template {0} produced no payloads: {1}")]
	NoPayloadsGenerated(String, String),
	#[error("unknown transform encoder: {0}")]
	UnknownEncoder(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
	#[error("invalid proxy url {0}")]
	InvalidUrl(String),
	#[error("no proxies available")]
	Exhausted,
}

#[derive(thiserror::Error, Debug)]
pub enum HttpError {
	#[error("network error: {0}")]
	Network(#[from] reqwest::Error),
	#[error("request timed out")]
	Timeout,
	#[error("too many redirects (max {0})")]
	TooManyRedirects(u32),
	#[error(transparent)]
	Proxy(#[from] ProxyError),
	#[error("unsupported insertion point location: {0}")]
	UnsupportedInsertionPoint(String),
	#[error("invalid request: {0}")]
	InvalidRequest(String),
}

impl HttpError {
	pub fn is_network(&self) -> bool {
		matches!(self, HttpError::Network(_) | HttpError::Proxy(_))
	}

	pub fn is_timeout(&self) -> bool {
		matches!(self, HttpError::Timeout) || matches!(self, HttpError::Network(e) if e.is_timeout())
	}
}

#[derive(thiserror::Error, Debug)]
pub enum PoolError {
	#[error("pool is shutting down")]
	ShuttingDown,
}

#[derive(thiserror::Error, Debug)]
pub enum ScanError {
	#[error(transparent)]
	Validation(#[from] ValidationError),
	#[error(transparent)]
	Analyser(#[from] AnalyserError),
	#[error(transparent)]
	Template(#[from] TemplateError),
	#[error(transparent)]
	Http(#[from] HttpError),
	#[error(transparent)]
	Pool(#[from] PoolError),
	#[error("task context cancelled")]
	Cancelled,
}

impl From<&ScanError> for tonic::Code {
	fn from(value: &ScanError) -> Self {
		match value {
			ScanError::Validation(_) => tonic::Code::InvalidArgument,
			ScanError::Pool(PoolError::ShuttingDown) => tonic::Code::Unavailable,
			ScanError::Cancelled => tonic::Code::Cancelled,
			ScanError::Analyser(_) | ScanError::Template(_) | ScanError::Http(_) => tonic::Code::Internal,
		}
	}
}

impl From<ScanError> for tonic::Status {
	fn from(value: ScanError) -> Self {
		let code = tonic::Code::from(&value);
		tonic::Status::new(code, value.to_string())
	}
}
