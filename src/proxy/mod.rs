pub mod manager;
pub mod rotator;

pub use manager::{ProxyHandle, ProxyManager, ProxyManagerConfig, RotationConfig};
pub use rotator::ProxyRotator;
