//! Allow-listed JSON responders.
//!
//! Handlers return domain objects through these wrappers instead of
//! `axum::Json`, so only the fields named in [`Exposed::PUBLIC_FIELDS`]
//! reach the wire.

use axum::response::{IntoResponse, Response};
use axum::Json;
use gatehouse_core::{expose, expose_all, Exposed};

use super::error::ApiError;

/// One exposed object.
#[derive(Debug, Clone)]
pub struct PublicJson<T>(pub T);

/// A JSON array of exposed objects.
#[derive(Debug, Clone)]
pub struct PublicList<T>(pub Vec<T>);

impl<T: Exposed> IntoResponse for PublicJson<T> {
    fn into_response(self) -> Response {
        match expose(&self.0) {
            Ok(value) => Json(value).into_response(),
            Err(e) => ApiError::internal(e).into_response(),
        }
    }
}

impl<T: Exposed> IntoResponse for PublicList<T> {
    fn into_response(self) -> Response {
        match expose_all(&self.0) {
            Ok(value) => Json(value).into_response(),
            Err(e) => ApiError::internal(e).into_response(),
        }
    }
}
