//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section.

pub mod client;
pub mod logging;
pub mod server;
pub mod session;

use serde::{Deserialize, Serialize};

pub use self::client::ClientConfig;
pub use self::logging::LoggingConfig;
pub use self::server::{ServerConfig, TlsConfig};
pub use self::session::SessionConfig;

use crate::error::AppError;

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listener addresses and TLS material.
    #[serde(default)]
    pub server: ServerConfig,
    /// Session registry settings.
    #[serde(default)]
    pub session: SessionConfig,
    /// Outbound reconnecting client settings.
    #[serde(default)]
    pub client: ClientConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges `{dir}/default.toml` with an environment-specific overlay
    /// `{dir}/{env}.toml` and environment variables prefixed with `WIREHUB__`
    /// (nested keys separated by `__`). Missing files are skipped.
    pub fn load(dir: &str, env: &str) -> Result<Self, AppError> {
        let dir = dir.trim_end_matches('/');
        let config = config::Config::builder()
            .add_source(config::File::with_name(&format!("{dir}/default")).required(false))
            .add_source(config::File::with_name(&format!("{dir}/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("WIREHUB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}
