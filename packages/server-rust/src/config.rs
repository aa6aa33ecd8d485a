//! Command-line and environment configuration.
//!
//! Every setting can be given as a flag or through its environment
//! variable. Values are only collected here; [`AppConfig::resolve`]
//! validates them.

use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::Parser;
use gatehouse_core::{AppConfig, ConfigError, RawConfig};

use crate::telemetry::LogFormat;

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "gatehouse", version, about = "Gatehouse gateway and worker server")]
pub struct ServerArgs {
    /// Process role: `gateway` or `worker`.
    #[arg(long, env = "APP_ROLE")]
    pub role: Option<String>,

    /// Gateway listen port.
    #[arg(long, env = "APP_PORT")]
    pub port: Option<u16>,

    /// Worker listen port.
    #[arg(long, env = "APP_WORKER_PORT")]
    pub worker_port: Option<u16>,

    /// Allowed CORS origin, exact or `/regex/`.
    #[arg(long, env = "APP_CORS_ORIGIN")]
    pub cors_origin: Option<String>,

    /// Environment tag: `local`, `staging` or `production`.
    #[arg(long, env = "NODE_ENV")]
    pub node_env: Option<String>,

    /// Behind a TLS-terminating proxy; also trusts `X-Forwarded-For`.
    #[arg(long, env = "APP_IS_HTTPS", value_parser = BoolishValueParser::new())]
    pub is_https: Option<bool>,

    #[arg(long, env = "AUTH_SECRET", hide_env_values = true)]
    pub auth_secret: Option<String>,

    /// Broker URL; `memory://` runs a single process without Redis.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, env = "ADMIN_USERNAME")]
    pub admin_username: Option<String>,

    #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true)]
    pub admin_password: Option<String>,

    #[arg(long, env = "ADMIN_GATE_ENABLED", value_parser = BoolishValueParser::new())]
    pub admin_gate: Option<bool>,

    #[arg(long, env = "GRACEFUL_SHUTDOWN", value_parser = BoolishValueParser::new())]
    pub graceful_shutdown: Option<bool>,

    #[arg(long, env = "API_REFERENCE_ENABLED", value_parser = BoolishValueParser::new())]
    pub api_reference: Option<bool>,

    /// Directory served under `/public`.
    #[arg(long, env = "STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    #[arg(long, env = "DRAIN_TIMEOUT_SECS")]
    pub drain_timeout_secs: Option<u64>,

    #[arg(long, env = "REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    /// Identifier stamped on fan-out envelopes.
    #[arg(long, env = "NODE_ID")]
    pub node_id: Option<String>,

    #[arg(long, env = "LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,
}

impl ServerArgs {
    #[must_use]
    pub fn to_raw(&self) -> RawConfig {
        RawConfig {
            role: self.role.clone(),
            http_port: self.port,
            worker_port: self.worker_port,
            cors_origin: self.cors_origin.clone(),
            node_env: self.node_env.clone(),
            is_https: self.is_https.unwrap_or(false),
            auth_secret: self.auth_secret.clone(),
            broker_url: self.redis_url.clone(),
            admin_username: self.admin_username.clone(),
            admin_password: self.admin_password.clone(),
            admin_gate: self.admin_gate,
            graceful_shutdown: self.graceful_shutdown,
            api_reference: self.api_reference,
            static_dir: self.static_dir.clone(),
            drain_timeout_secs: self.drain_timeout_secs,
            request_timeout_secs: self.request_timeout_secs,
            node_id: self.node_id.clone(),
        }
    }

    /// Validates the collected values.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn resolve(&self) -> Result<AppConfig, ConfigError> {
        AppConfig::resolve(self.to_raw())
    }
}
