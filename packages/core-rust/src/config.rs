//! Process-wide configuration model.
//!
//! [`RawConfig`] carries values exactly as they were read from the process
//! environment. [`AppConfig::resolve`] validates them once and produces the
//! immutable configuration that every component receives by reference. No
//! component reads the environment after this point.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Default port for the gateway role.
pub const DEFAULT_HTTP_PORT: u16 = 3000;
/// Default port for the worker role.
pub const DEFAULT_WORKER_PORT: u16 = 3001;
/// Default broker connection string.
pub const DEFAULT_BROKER_URL: &str = "redis://127.0.0.1:6379";
/// Default directory served under the public static prefix.
pub const DEFAULT_STATIC_DIR: &str = "tmp/file-uploads";
/// Default bound on how long shutdown waits for in-flight requests.
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;
/// Default maximum request processing time.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fatal configuration problems detected before any module graph is built.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("role is not configured (expected `gateway` or `worker`)")]
    MissingRole,
    #[error("invalid role `{0}` (expected `gateway` or `worker`)")]
    InvalidRole(String),
    #[error("invalid environment tag `{0}` (expected `local`, `staging` or `production`)")]
    InvalidNodeEnv(String),
    #[error("CORS origin is not configured")]
    MissingCorsOrigin,
    #[error("CORS origin must not be a wildcard when credentials are allowed")]
    WildcardCorsOrigin,
    #[error("invalid CORS origin `{origin}`: {reason}")]
    InvalidCorsOrigin { origin: String, reason: String },
    #[error("auth secret is not configured")]
    MissingAuthSecret,
    #[error("administrative gate is enabled but admin credentials are not configured")]
    MissingAdminCredentials,
    #[error("HTTP port and worker port must differ (both set to {0})")]
    ConflictingPorts(u16),
    #[error("{name} must be greater than zero")]
    InvalidTimeout { name: &'static str },
}

// ---------------------------------------------------------------------------
// Role / NodeEnv
// ---------------------------------------------------------------------------

/// Runtime role of a process instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Serves HTTP and real-time traffic.
    Gateway,
    /// Consumes background jobs.
    Worker,
}

impl Role {
    /// Lowercase name used in configuration and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gateway => "gateway",
            Self::Worker => "worker",
        }
    }
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "gateway" => Ok(Self::Gateway),
            "worker" => Ok(Self::Worker),
            other => Err(ConfigError::InvalidRole(other.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment environment tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeEnv {
    Local,
    Staging,
    Production,
}

impl NodeEnv {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl FromStr for NodeEnv {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "local" => Ok(Self::Local),
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            other => Err(ConfigError::InvalidNodeEnv(other.to_string())),
        }
    }
}

impl fmt::Display for NodeEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CorsOrigin
// ---------------------------------------------------------------------------

fn exact_origin_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https?://[A-Za-z0-9](?:[A-Za-z0-9.-]*[A-Za-z0-9])?(?::[0-9]{1,5})?$")
            .unwrap_or_else(|e| unreachable!("static origin regex is valid: {e}"))
    })
}

/// The single origin allowed to make credentialed cross-origin requests.
///
/// Either an exact `scheme://host[:port]` string, or a pattern written as a
/// slash-delimited regular expression (`/^https://.*\.example\.com$/`).
#[derive(Debug, Clone)]
pub enum CorsOrigin {
    Exact(String),
    Pattern(Regex),
}

impl CorsOrigin {
    /// Parses a configured origin value.
    ///
    /// # Errors
    ///
    /// Rejects empty values, wildcards, malformed origins, and patterns that
    /// do not compile.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConfigError::MissingCorsOrigin);
        }
        if raw == "*" {
            return Err(ConfigError::WildcardCorsOrigin);
        }

        if raw.len() > 2 && raw.starts_with('/') && raw.ends_with('/') {
            let body = &raw[1..raw.len() - 1];
            return Regex::new(body)
                .map(Self::Pattern)
                .map_err(|e| ConfigError::InvalidCorsOrigin {
                    origin: raw.to_string(),
                    reason: e.to_string(),
                });
        }

        if exact_origin_regex().is_match(raw) {
            Ok(Self::Exact(raw.to_string()))
        } else {
            Err(ConfigError::InvalidCorsOrigin {
                origin: raw.to_string(),
                reason: "expected scheme://host[:port] without path or trailing slash".to_string(),
            })
        }
    }

    /// Returns `true` if a request `Origin` header value is allowed.
    #[must_use]
    pub fn matches(&self, origin: &str) -> bool {
        match self {
            Self::Exact(allowed) => allowed == origin,
            Self::Pattern(re) => re.is_match(origin),
        }
    }

    /// Value to emit in `Access-Control-Allow-Origin` for a response.
    ///
    /// An exact origin is always emitted. A pattern echoes the request origin
    /// only when it matches; otherwise nothing is emitted.
    #[must_use]
    pub fn allow_origin_for(&self, request_origin: Option<&str>) -> Option<String> {
        match self {
            Self::Exact(allowed) => Some(allowed.clone()),
            Self::Pattern(re) => request_origin
                .filter(|origin| re.is_match(origin))
                .map(str::to_string),
        }
    }
}

impl fmt::Display for CorsOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(origin) => f.write_str(origin),
            Self::Pattern(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

// ---------------------------------------------------------------------------
// Secrets and credentials
// ---------------------------------------------------------------------------

/// Opaque secret string. `Debug` output never contains the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret value. Callers must not log it.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Secondary credentials for administrative surfaces.
#[derive(Debug, Clone)]
pub struct AdminCredentials {
    pub username: String,
    pub password: Secret,
}

/// Switchable operational policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Require secondary credentials on administrative prefixes.
    pub admin_gate: bool,
    /// Drain in-flight requests before exiting.
    pub graceful_shutdown: bool,
    /// Serve the API reference surface.
    pub api_reference: bool,
}

impl PolicyConfig {
    /// Policy defaults for an environment tag.
    #[must_use]
    pub fn defaults_for(env: NodeEnv) -> Self {
        Self {
            admin_gate: true,
            graceful_shutdown: env != NodeEnv::Local,
            api_reference: env != NodeEnv::Production,
        }
    }
}

// ---------------------------------------------------------------------------
// RawConfig / AppConfig
// ---------------------------------------------------------------------------

/// Unvalidated configuration values as read from the process environment.
#[derive(Debug, Clone, Default)]
pub struct RawConfig {
    pub role: Option<String>,
    pub http_port: Option<u16>,
    pub worker_port: Option<u16>,
    pub cors_origin: Option<String>,
    pub node_env: Option<String>,
    pub is_https: bool,
    pub auth_secret: Option<String>,
    pub broker_url: Option<String>,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub admin_gate: Option<bool>,
    pub graceful_shutdown: Option<bool>,
    pub api_reference: Option<bool>,
    pub static_dir: Option<PathBuf>,
    pub drain_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub node_id: Option<String>,
}

/// Fully resolved, immutable process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub role: Role,
    pub http_port: u16,
    pub worker_port: u16,
    pub cors_origin: CorsOrigin,
    pub node_env: NodeEnv,
    /// Deployed behind a TLS-terminating proxy whose forwarding headers are trusted.
    pub is_https: bool,
    pub auth_secret: Secret,
    pub broker_url: String,
    /// Present whenever the administrative gate is enabled.
    pub admin: Option<AdminCredentials>,
    pub policy: PolicyConfig,
    pub static_dir: PathBuf,
    pub drain_timeout: Duration,
    pub request_timeout: Duration,
    /// Identifier of this process instance on the shared broker.
    pub node_id: String,
}

/// Random per-process identifier. Process ids repeat across containers, so
/// they cannot tell instances apart on a shared broker.
fn generated_node_id() -> String {
    format!("node-{}", uuid::Uuid::new_v4().simple())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Validates raw values and produces the process configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found. A missing or unknown role is
    /// always reported, regardless of other fields.
    pub fn resolve(raw: RawConfig) -> Result<Self, ConfigError> {
        let role: Role = non_empty(raw.role)
            .ok_or(ConfigError::MissingRole)?
            .parse()?;

        let node_env = non_empty(raw.node_env)
            .map(|v| v.parse::<NodeEnv>())
            .transpose()?
            .unwrap_or(NodeEnv::Local);

        let cors_origin = CorsOrigin::parse(
            &non_empty(raw.cors_origin).ok_or(ConfigError::MissingCorsOrigin)?,
        )?;

        let auth_secret =
            Secret::new(non_empty(raw.auth_secret).ok_or(ConfigError::MissingAuthSecret)?);

        let defaults = PolicyConfig::defaults_for(node_env);
        let policy = PolicyConfig {
            admin_gate: raw.admin_gate.unwrap_or(defaults.admin_gate),
            graceful_shutdown: raw.graceful_shutdown.unwrap_or(defaults.graceful_shutdown),
            api_reference: raw.api_reference.unwrap_or(defaults.api_reference),
        };

        let admin = match (non_empty(raw.admin_username), non_empty(raw.admin_password)) {
            (Some(username), Some(password)) => Some(AdminCredentials {
                username,
                password: Secret::new(password),
            }),
            _ if policy.admin_gate => return Err(ConfigError::MissingAdminCredentials),
            _ => None,
        };

        let drain_secs = raw.drain_timeout_secs.unwrap_or(DEFAULT_DRAIN_TIMEOUT_SECS);
        if drain_secs == 0 {
            return Err(ConfigError::InvalidTimeout {
                name: "drain timeout",
            });
        }
        let request_secs = raw
            .request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        if request_secs == 0 {
            return Err(ConfigError::InvalidTimeout {
                name: "request timeout",
            });
        }

        let http_port = raw.http_port.unwrap_or(DEFAULT_HTTP_PORT);
        let worker_port = raw.worker_port.unwrap_or(DEFAULT_WORKER_PORT);
        if http_port == worker_port && http_port != 0 {
            return Err(ConfigError::ConflictingPorts(http_port));
        }

        Ok(Self {
            role,
            http_port,
            worker_port,
            cors_origin,
            node_env,
            is_https: raw.is_https,
            auth_secret,
            broker_url: non_empty(raw.broker_url)
                .unwrap_or_else(|| DEFAULT_BROKER_URL.to_string()),
            admin,
            policy,
            static_dir: raw
                .static_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR)),
            drain_timeout: Duration::from_secs(drain_secs),
            request_timeout: Duration::from_secs(request_secs),
            node_id: non_empty(raw.node_id).unwrap_or_else(generated_node_id),
        })
    }
}
