pub mod analyser;
pub mod config;
pub mod detector;
pub mod error;
pub mod http;
pub mod metrics;
pub mod model;
pub mod payload;
pub mod pool;
pub mod processor;
pub mod proxy;
pub mod rpc;
pub mod telemetry;
