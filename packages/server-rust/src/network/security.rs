//! Content security policy and baseline hardening headers.

use axum::http::header::{
    CONTENT_SECURITY_POLICY, CONTENT_TYPE, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS,
    X_DNS_PREFETCH_CONTROL, X_FRAME_OPTIONS,
};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::map_response;
use axum::response::Response;
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;

/// Policy attached to every HTML response. The only script source besides
/// `'self'` is the API reference bundle.
pub const CSP_POLICY: &str = "default-src 'self'; \
     base-uri 'self'; \
     font-src 'self' https: data:; \
     form-action 'self'; \
     frame-ancestors 'self'; \
     img-src 'self' data:; \
     object-src 'none'; \
     script-src 'self' https://cdn.jsdelivr.net/npm/@scalar/api-reference; \
     script-src-attr 'none'; \
     style-src 'self' https: 'unsafe-inline'; \
     upgrade-insecure-requests";

pub const CROSS_ORIGIN_RESOURCE_POLICY: HeaderName =
    HeaderName::from_static("cross-origin-resource-policy");

fn is_html(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("text/html"))
}

async fn apply_csp(mut response: Response) -> Response {
    if is_html(&response) {
        response
            .headers_mut()
            .entry(CONTENT_SECURITY_POLICY)
            .or_insert(HeaderValue::from_static(CSP_POLICY));
    }
    response
}

/// Wraps a router with the CSP stage and the hardening headers.
///
/// Headers a handler or an inner layer already set are left alone.
pub fn with_security_headers<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(map_response(apply_csp))
        .layer(SetResponseHeaderLayer::if_not_present(
            X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            X_DNS_PREFETCH_CONTROL,
            HeaderValue::from_static("off"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            CROSS_ORIGIN_RESOURCE_POLICY,
            HeaderValue::from_static("same-origin"),
        ))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use axum::response::{Html, IntoResponse};
    use axum::routing::get;
    use axum::Json;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        with_security_headers(
            Router::new()
                .route("/page", get(|| async { Html("<h1>hi</h1>") }))
                .route("/data", get(|| async { Json(json!({"ok": true})) }))
                .route(
                    "/shared",
                    get(|| async {
                        (
                            [(CROSS_ORIGIN_RESOURCE_POLICY, "cross-origin")],
                            "asset",
                        )
                            .into_response()
                    }),
                ),
        )
    }

    async fn get_headers(path: &str) -> axum::http::HeaderMap {
        app()
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .headers()
            .clone()
    }

    #[tokio::test]
    async fn html_gets_csp_without_inline_scripts() {
        let headers = get_headers("/page").await;
        let csp = headers[CONTENT_SECURITY_POLICY].to_str().unwrap();
        assert!(csp.starts_with("default-src 'self';"));
        assert!(csp.contains("script-src 'self' https://cdn.jsdelivr.net/npm/@scalar/api-reference;"));
        let script_src = csp
            .split(';')
            .find(|d| d.trim().starts_with("script-src "))
            .unwrap();
        assert!(!script_src.contains("unsafe-inline"));
    }

    #[tokio::test]
    async fn json_gets_no_csp_but_hardening_headers() {
        let headers = get_headers("/data").await;
        assert!(headers.get(CONTENT_SECURITY_POLICY).is_none());
        assert_eq!(headers[X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(headers[X_FRAME_OPTIONS], "SAMEORIGIN");
        assert_eq!(headers[REFERRER_POLICY], "no-referrer");
        assert_eq!(headers[X_DNS_PREFETCH_CONTROL], "off");
        assert_eq!(headers[&CROSS_ORIGIN_RESOURCE_POLICY], "same-origin");
    }

    #[tokio::test]
    async fn existing_header_is_preserved() {
        let headers = get_headers("/shared").await;
        assert_eq!(headers[&CROSS_ORIGIN_RESOURCE_POLICY], "cross-origin");
    }
}
