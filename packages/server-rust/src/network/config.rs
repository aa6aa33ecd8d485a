//! Network configuration types for the gatehouse server.

use std::time::Duration;

use gatehouse_core::AppConfig;

/// Every role listens on all interfaces.
pub const BIND_HOST: &str = "0.0.0.0";

/// Top-level network configuration for one listener.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Per-connection settings.
    pub connection: ConnectionConfig,
    /// Maximum time to wait for a request to complete.
    pub request_timeout: Duration,
    /// Upper bound on how long shutdown waits for in-flight requests.
    pub drain_timeout: Duration,
    /// Whether shutdown drains in-flight requests or terminates at once.
    pub graceful_shutdown: bool,
}

impl NetworkConfig {
    /// Network settings for a resolved process configuration listening on `port`.
    #[must_use]
    pub fn from_app(config: &AppConfig, port: u16) -> Self {
        Self {
            host: BIND_HOST.to_string(),
            port,
            connection: ConnectionConfig::default(),
            request_timeout: config.request_timeout,
            drain_timeout: config.drain_timeout,
            graceful_shutdown: config.policy.graceful_shutdown,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: BIND_HOST.to_string(),
            port: 0,
            connection: ConnectionConfig::default(),
            request_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(30),
            graceful_shutdown: true,
        }
    }
}

/// Per-connection configuration controlling backpressure.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bounded mpsc channel capacity for outbound messages per connection.
    pub outbound_channel_capacity: usize,
    /// WebSocket write buffer size in bytes.
    pub ws_write_buffer_size: usize,
    /// Maximum WebSocket write buffer size in bytes.
    pub ws_max_write_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_channel_capacity: 256,
            ws_write_buffer_size: 131_072,     // 128 KB
            ws_max_write_buffer_size: 524_288, // 512 KB
        }
    }
}
