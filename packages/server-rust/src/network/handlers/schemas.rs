//! OpenAPI schema definitions for the API's wire shapes.
//!
//! Domain types stay free of `ToSchema`; these mirrors describe only what a
//! client can actually see or send. In particular the resource view lists
//! the exposed fields and never the owner secret.

use utoipa::ToSchema;

/// A resource as returned by the API.
#[derive(ToSchema)]
#[schema(as = Resource, rename_all = "camelCase")]
#[expect(dead_code, reason = "Used only for OpenAPI schema generation via utoipa")]
pub struct ResourceSchema {
    #[schema(example = "3fa85f64-5717-4562-b3fc-2c963f66afa6")]
    id: String,
    #[schema(example = "Hex bolt")]
    name: String,
    #[schema(example = 12)]
    quantity: i64,
    tags: Vec<String>,
    /// Milliseconds since the Unix epoch.
    created_at: u64,
}

/// Body of a resource creation request.
#[derive(ToSchema)]
#[schema(as = CreateResource, rename_all = "camelCase")]
#[expect(dead_code, reason = "Used only for OpenAPI schema generation via utoipa")]
pub struct CreateResourceSchema {
    /// 1 to 100 characters.
    name: String,
    /// Integer between 0 and 1,000,000. Numeric strings are accepted.
    quantity: i64,
    /// At most 20 entries.
    tags: Option<Vec<String>>,
    /// 8 to 128 characters. Stored, never returned.
    owner_secret: Option<String>,
}

/// Body of a room message publication.
#[derive(ToSchema)]
#[schema(as = RoomMessage)]
#[expect(dead_code, reason = "Used only for OpenAPI schema generation via utoipa")]
pub struct RoomMessageSchema {
    /// 1 to 64 characters.
    #[schema(example = "chat")]
    event: String,
    #[schema(value_type = Object)]
    data: Option<serde_json::Value>,
}

/// Result of a room message publication.
#[derive(ToSchema)]
#[schema(as = PublishReceipt)]
#[expect(dead_code, reason = "Used only for OpenAPI schema generation via utoipa")]
pub struct PublishReceiptSchema {
    /// Connections on the receiving node the message was handed to.
    delivered: usize,
}

/// One failing field in a rejected payload.
#[derive(ToSchema)]
#[schema(as = FieldError)]
#[expect(dead_code, reason = "Used only for OpenAPI schema generation via utoipa")]
pub struct FieldErrorSchema {
    #[schema(example = "isAdmin")]
    field: String,
    #[schema(example = "unknown_field")]
    code: String,
    #[schema(example = "property isAdmin should not exist")]
    message: String,
}

/// Error envelope shared by every endpoint.
#[derive(ToSchema)]
#[schema(as = ApiError, rename_all = "camelCase")]
#[expect(dead_code, reason = "Used only for OpenAPI schema generation via utoipa")]
pub struct ApiErrorSchema {
    #[schema(example = 422)]
    status_code: u16,
    #[schema(example = "Unprocessable Entity")]
    error: String,
    #[schema(example = "validation failed")]
    message: String,
    errors: Option<Vec<FieldErrorSchema>>,
}
