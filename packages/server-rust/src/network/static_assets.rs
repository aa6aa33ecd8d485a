//! Static file serving under `/public`.
//!
//! Assets are fetched cross-origin by the frontend, so every response
//! carries its own CORS and resource-policy headers instead of going through
//! the API's CORS layer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ORIGIN,
};
use axum::http::HeaderValue;
use axum::middleware::{from_fn_with_state, Next};
use axum::response::Response;
use axum::Router;
use gatehouse_core::CorsOrigin;
use tower_http::services::ServeDir;
use tracing::debug;

use super::security::CROSS_ORIGIN_RESOURCE_POLICY;

/// Mount point of the static directory.
pub const STATIC_PREFIX: &str = "/public";
/// Methods advertised on static responses.
pub const STATIC_ALLOW_METHODS: &str = "GET,HEAD,OPTIONS";

/// Makes sure the static directory exists.
///
/// # Errors
///
/// Returns the I/O error when the directory cannot be created or the path
/// exists but is not a directory.
pub fn prepare_static_dir(dir: &Path) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    if !dir.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is not a directory", dir.display()),
        ));
    }
    Ok(dir.to_path_buf())
}

async fn inject_asset_headers(
    State(origin): State<Arc<CorsOrigin>>,
    request: Request,
    next: Next,
) -> Response {
    let request_origin = request
        .headers()
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    match origin
        .allow_origin_for(request_origin.as_deref())
        .and_then(|value| HeaderValue::from_str(&value).ok())
    {
        Some(value) => {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
        None => debug!(origin = ?request_origin, "static request from unmatched origin"),
    }
    headers.insert(
        ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(STATIC_ALLOW_METHODS),
    );
    headers.insert(
        CROSS_ORIGIN_RESOURCE_POLICY,
        HeaderValue::from_static("cross-origin"),
    );
    response
}

/// Router serving `dir` under [`STATIC_PREFIX`].
pub fn static_router<S>(dir: &Path, origin: Arc<CorsOrigin>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let assets = Router::new()
        .fallback_service(ServeDir::new(dir))
        .layer(from_fn_with_state(origin, inject_asset_headers));
    Router::new().nest_service(STATIC_PREFIX, assets)
}
