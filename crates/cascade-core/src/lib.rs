pub mod config;
pub mod error;
pub mod host;

pub use config::{CollectorConfig, HealthProbeConfig, DEFAULT_HEALTH_PORT, DEFAULT_OTLP_PORT};
pub use error::{ConfigError, ConfigResult};
pub use host::resolve_local_host;
