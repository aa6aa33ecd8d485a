//! HTTP middleware stack for the gatehouse server.
//!
//! Middleware ordering follows the outer-to-inner convention: the first
//! layer listed is the outermost (processes the request first on the way
//! in, and the response last on the way out).

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{HeaderName, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use gatehouse_core::CorsOrigin;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::config::NetworkConfig;
use super::error::ApiError;
use super::shutdown::ShutdownController;

/// Request header carrying the per-request UUID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The composed Tower layer type produced by [`build_http_layers`].
type HttpLayers = tower::layer::util::Stack<
    PropagateRequestIdLayer,
    tower::layer::util::Stack<
        TimeoutLayer,
        tower::layer::util::Stack<
            TraceLayer<
                tower_http::classify::SharedClassifier<
                    tower_http::classify::ServerErrorsAsFailures,
                >,
            >,
            tower::layer::util::Stack<
                SetRequestIdLayer<MakeRequestUuid>,
                tower::layer::util::Identity,
            >,
        >,
    >,
>;

/// Builds the transport-level middleware shared by both roles.
///
/// **Middleware ordering (outermost to innermost):**
/// 1. `SetRequestId` -- assigns a UUID v4 `X-Request-Id` to every incoming request
/// 2. `Tracing` -- logs request/response with structured trace spans
/// 3. `Timeout` -- enforces a maximum request processing duration
/// 4. `PropagateRequestId` -- copies `X-Request-Id` from the request to the response
#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> HttpLayers {
    let x_request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(
            x_request_id.clone(),
            MakeRequestUuid,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

/// Methods the API accepts cross-origin.
pub const CORS_METHODS: [Method; 7] = [
    Method::GET,
    Method::PATCH,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
    Method::HEAD,
];

/// Builds the API's CORS layer for the configured origin.
///
/// An exact origin becomes a one-element allow list; a pattern becomes a
/// predicate over the request `Origin`. Credentials are always allowed, so
/// a wildcard origin is never produced.
///
/// # Errors
///
/// Returns an error if an exact origin is not a valid header value.
pub fn build_cors_layer(
    origin: &CorsOrigin,
) -> Result<CorsLayer, axum::http::header::InvalidHeaderValue> {
    let allow_origin = match origin {
        CorsOrigin::Exact(exact) => AllowOrigin::list([HeaderValue::from_str(exact)?]),
        CorsOrigin::Pattern(_) => {
            let origin = origin.clone();
            AllowOrigin::predicate(move |value: &HeaderValue, _parts| {
                value.to_str().is_ok_and(|v| origin.matches(v))
            })
        }
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(CORS_METHODS)
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("x-requested-with"),
            ACCEPT,
        ])
        .allow_credentials(true))
}

/// Counts each request as in flight and refuses new ones once draining.
///
/// Health probes are exempt so orchestrators can observe the drain.
pub async fn track_in_flight(
    State(shutdown): State<Arc<ShutdownController>>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path().starts_with("/health") {
        return next.run(request).await;
    }
    if shutdown.is_draining() {
        return ApiError::service_unavailable("server is shutting down").into_response();
    }
    let _guard = shutdown.in_flight_guard();
    next.run(request).await
}
