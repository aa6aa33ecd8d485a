//! Validating JSON extractor.

use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use gatehouse_core::{decode, FieldError, Validate};
use serde_json::Value;

use super::error::ApiError;

/// JSON body checked against the payload type's schema before it reaches a
/// handler.
///
/// Undeclared fields, type mismatches after coercion and constraint
/// violations are all collected into one `422` response. A body that is not
/// JSON at all is also a `422`; a missing JSON content type is a `415`.
#[derive(Debug, Clone)]
pub struct ValidatedJson<T>(pub T);

fn has_json_content_type(headers: &HeaderMap) -> bool {
    let Some(value) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let essence = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json"
        || (essence.starts_with("application/") && essence.ends_with("+json"))
}

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if !has_json_content_type(req.headers()) {
            return Err(ApiError::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "expected request with `Content-Type: application/json`",
            ));
        }

        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::new(rejection.status(), rejection.body_text()))?;

        let body: Value = serde_json::from_slice(&bytes).map_err(|e| {
            ApiError::validation(vec![FieldError::body(format!("malformed JSON: {e}"))])
        })?;

        decode::<T>(body).map(Self).map_err(ApiError::validation)
    }
}
