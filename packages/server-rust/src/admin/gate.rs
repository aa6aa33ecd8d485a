//! Pre-routing gate for administrative paths.
//!
//! The gate wraps the whole router service, so it sees every request before
//! route matching. Requests under an administrative prefix must carry HTTP
//! Basic credentials matching the configured admin account; everything else
//! passes through untouched.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use gatehouse_core::{AdminCredentials, AppConfig};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tower::Layer;
use tracing::{debug, warn};

use crate::network::client_addr::{client_ip, RemoteAddr};
use crate::network::ApiError;

/// Queue dashboard mount point.
pub const QUEUE_DASHBOARD_PREFIX: &str = "/api/queues";
/// API reference mount point.
pub const API_REFERENCE_PREFIX: &str = "/api/auth/reference";
/// Every gated prefix. Nothing else is gated.
pub const ADMIN_PREFIXES: [&str; 2] = [QUEUE_DASHBOARD_PREFIX, API_REFERENCE_PREFIX];

const CHALLENGE: &str = "Basic realm=\"admin\"";

/// SHA-256 digests of the admin account, so comparison time does not depend
/// on credential length.
struct CredentialDigest {
    username: [u8; 32],
    password: [u8; 32],
}

impl CredentialDigest {
    fn new(username: &str, password: &str) -> Self {
        Self {
            username: Sha256::digest(username.as_bytes()).into(),
            password: Sha256::digest(password.as_bytes()).into(),
        }
    }

    fn matches(&self, username: &str, password: &str) -> bool {
        let candidate = Self::new(username, password);
        let user_ok = self.username.ct_eq(&candidate.username);
        let pass_ok = self.password.ct_eq(&candidate.password);
        (user_ok & pass_ok).into()
    }
}

#[derive(Clone)]
pub struct AdminGate {
    prefixes: Vec<&'static str>,
    credentials: Option<Arc<CredentialDigest>>,
    enabled: bool,
    /// Take the client IP for logs from `X-Forwarded-For`.
    trust_proxy: bool,
}

impl std::fmt::Debug for AdminGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminGate")
            .field("prefixes", &self.prefixes)
            .field("enabled", &self.enabled)
            .field("has_credentials", &self.credentials.is_some())
            .finish_non_exhaustive()
    }
}

impl AdminGate {
    #[must_use]
    pub fn new(credentials: Option<&AdminCredentials>, enabled: bool, trust_proxy: bool) -> Self {
        Self {
            prefixes: ADMIN_PREFIXES.to_vec(),
            credentials: credentials.map(|c| {
                Arc::new(CredentialDigest::new(&c.username, c.password.expose()))
            }),
            enabled,
            trust_proxy,
        }
    }

    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.admin.as_ref(),
            config.policy.admin_gate,
            config.is_https,
        )
    }

    /// `true` when `path` is an administrative prefix or lies below one.
    /// `/api/queuesx` is not below `/api/queues`.
    #[must_use]
    pub fn is_protected(&self, path: &str) -> bool {
        self.prefixes.iter().any(|prefix| {
            path.strip_prefix(prefix)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }

    /// Checks `Authorization: Basic ...` against the admin account. Fails
    /// closed when no account is configured.
    #[must_use]
    pub fn authorize(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.credentials else {
            return false;
        };
        let Some((username, password)) = basic_credentials(headers) else {
            return false;
        };
        expected.matches(&username, &password)
    }
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

fn challenge() -> Response {
    let mut response = ApiError::unauthorized("admin authentication required").into_response();
    response
        .headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static(CHALLENGE));
    response
}

/// Middleware body of the gate.
pub async fn admin_gate(State(gate): State<Arc<AdminGate>>, request: Request, next: Next) -> Response {
    if !gate.enabled || !gate.is_protected(request.uri().path()) {
        return next.run(request).await;
    }
    if gate.authorize(request.headers()) {
        debug!(path = %request.uri().path(), "administrative request authorized");
        return next.run(request).await;
    }

    let ip = client_ip(
        request.headers(),
        RemoteAddr::from_extensions(request.extensions()),
        gate.trust_proxy,
    );
    warn!(
        path = %request.uri().path(),
        client_ip = ip.as_deref().unwrap_or("unknown"),
        "rejected administrative request"
    );
    challenge()
}

/// Wraps the whole router with the gate, ahead of route matching.
pub fn protect(router: Router, gate: AdminGate) -> Router {
    let gated = from_fn_with_state(Arc::new(gate), admin_gate).layer(router);
    Router::new().fallback_service(gated)
}
