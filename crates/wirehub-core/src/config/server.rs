//! Listener configuration.

use serde::{Deserialize, Serialize};

/// Listener addresses for the TCP and WebSocket servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address of the length-prefixed TCP listener.
    #[serde(default = "default_tcp_addr")]
    pub tcp_addr: String,
    /// Bind address of the plain WebSocket listener.
    #[serde(default = "default_ws_addr")]
    pub ws_addr: String,
    /// Secure WebSocket listener; disabled when absent.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tcp_addr: default_tcp_addr(),
            ws_addr: default_ws_addr(),
            tls: None,
        }
    }
}

/// TLS listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Bind address of the secure WebSocket listener.
    #[serde(default = "default_wss_addr")]
    pub addr: String,
    /// Path to the PEM certificate chain.
    pub cert_path: String,
    /// Path to the PEM private key.
    pub key_path: String,
}

fn default_tcp_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_ws_addr() -> String {
    "0.0.0.0:8081".to_string()
}

fn default_wss_addr() -> String {
    "0.0.0.0:8443".to_string()
}
