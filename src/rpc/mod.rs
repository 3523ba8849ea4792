pub mod convert;
pub mod proto;
pub mod service;

pub use proto::scanner_service_server::ScannerServiceServer;
pub use service::Service;
