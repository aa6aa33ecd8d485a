//! The gateway request pipeline, driven through the assembled router.

mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use gatehouse_server::fanout::MemoryBroker;
use gatehouse_server::jobs::MemoryJobQueue;
use gatehouse_server::network::security::CSP_POLICY;
use gatehouse_server::start;
use proptest::prelude::*;
use serde_json::Value;
use tower::ServiceExt;

use common::{basic_auth, config, ORIGIN};

async fn gateway(dir: &std::path::Path) -> Router {
    start(
        config("gateway", "gateway-pipeline", dir),
        Arc::new(MemoryBroker::new()),
        Arc::new(MemoryJobQueue::new()),
    )
    .await
    .unwrap()
    .router()
}

async fn json_body(response: Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn post_json(path: &str, body: &str) -> Request<Body> {
    Request::post(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn undeclared_field_is_named_in_422() {
    let dir = tempfile::tempdir().unwrap();
    let response = gateway(dir.path())
        .await
        .oneshot(post_json(
            "/api/v1/resource",
            r#"{"name":"widget","quantity":1,"isAdmin":true}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = json_body(response).await;
    assert_eq!(json["statusCode"], 422);
    assert_eq!(json["error"], "Unprocessable Entity");
    let fields: Vec<&str> = json["errors"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["field"].as_str())
        .collect();
    assert_eq!(fields, vec!["isAdmin"]);
}

#[tokio::test]
async fn every_failing_field_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let response = gateway(dir.path())
        .await
        .oneshot(post_json("/api/v1/resource", r#"{"quantity":-1}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = json_body(response).await;
    let fields: Vec<&str> = json["errors"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["field"].as_str())
        .collect();
    assert!(fields.contains(&"name"));
    assert!(fields.contains(&"quantity"));
}

#[tokio::test]
async fn numeric_strings_are_coerced_and_secrets_stay_private() {
    let dir = tempfile::tempdir().unwrap();
    let response = gateway(dir.path())
        .await
        .oneshot(post_json(
            "/api/v1/resource",
            r#"{"name":"widget","quantity":"7","ownerSecret":"hunter22-secret"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = json_body(response).await;
    assert_eq!(json["quantity"], 7);
    assert!(json.get("ownerSecret").is_none());
}

#[tokio::test]
async fn unknown_version_is_a_404_not_a_422() {
    let dir = tempfile::tempdir().unwrap();
    let app = gateway(dir.path()).await;

    let response = app
        .clone()
        .oneshot(
            Request::get("/api/v1/nonexistent-version2/resource")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = json_body(response).await;
    assert_eq!(json["statusCode"], 404);
    assert_eq!(json["error"], "Not Found");

    // An invalid body under an unsupported version never reaches validation.
    let response = app
        .oneshot(post_json("/api/v2/resource", r#"{"bogus":true}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn foreign_origin_gets_no_cors_headers() {
    let dir = tempfile::tempdir().unwrap();
    let app = gateway(dir.path()).await;

    let preflight = |origin: &str| {
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/v1/resource")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap()
    };

    let response = app.clone().oneshot(preflight(ORIGIN)).await.unwrap();
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], ORIGIN);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
        "true"
    );

    let response = app.oneshot(preflight("http://evil.example")).await.unwrap();
    assert!(!response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}

#[tokio::test]
async fn static_assets_carry_their_own_headers() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("logo.txt"), "gatehouse").unwrap();
    let response = gateway(dir.path())
        .await
        .oneshot(Request::get("/public/logo.txt").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "GET,HEAD,OPTIONS");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], ORIGIN);
    assert_eq!(headers["cross-origin-resource-policy"], "cross-origin");
}

#[tokio::test]
async fn admin_prefix_without_credentials_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = gateway(dir.path()).await;

    let response = app
        .clone()
        .oneshot(Request::get("/api/queues").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    assert_eq!(
        json_body(response).await["message"],
        "admin authentication required"
    );

    let response = app
        .oneshot(
            Request::get("/api/auth/reference")
                .header(header::AUTHORIZATION, basic_auth())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_SECURITY_POLICY], CSP_POLICY);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn any_undeclared_field_is_rejected(field in "[a-z]{3,12}") {
        prop_assume!(!["name", "quantity", "tags"].contains(&field.as_str()));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let (status, json) = runtime.block_on(async {
            let response = gateway(dir.path())
                .await
                .oneshot(post_json(
                    "/api/v1/resource",
                    &format!(r#"{{"name":"widget","quantity":1,"{field}":1}}"#),
                ))
                .await
                .unwrap();
            (response.status(), json_body(response).await)
        });
        prop_assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        prop_assert_eq!(json["errors"][0]["field"].as_str(), Some(field.as_str()));
    }
}
