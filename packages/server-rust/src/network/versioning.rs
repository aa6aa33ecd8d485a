//! URI versioning of the API surface.
//!
//! The API router is mounted once per supported version under `/api/v{N}`.
//! Anything else under `/api` is a routing miss and answers `404`, before
//! any body is read or validated.

use axum::extract::OriginalUri;
use axum::http::Method;
use axum::Router;

use super::error::ApiError;

/// Versions served, newest last.
pub const SUPPORTED_API_VERSIONS: &[&str] = &["1"];

/// Path prefix of one API version.
#[must_use]
pub fn version_prefix(version: &str) -> String {
    format!("/api/v{version}")
}

/// Mounts `api` under every supported version prefix.
pub fn versioned<S>(api: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    SUPPORTED_API_VERSIONS
        .iter()
        .fold(Router::new(), |router, version| {
            router.nest(&version_prefix(version), api.clone())
        })
}

/// Fallback for every unmatched route. Reports the path as the client sent
/// it, not as seen inside a nested router.
pub async fn route_miss(method: Method, OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::not_found(format!("Cannot {method} {}", uri.path()))
}
