//! API reference: the OpenAPI document and a page rendering it.
//!
//! The page loads the Scalar bundle from the one CDN script source the
//! content security policy allows; it carries no inline script code.

use axum::response::Html;
use axum::Json;
use utoipa::OpenApi;

use super::gate::API_REFERENCE_PREFIX;
use crate::network::handlers::schemas::{
    ApiErrorSchema, CreateResourceSchema, FieldErrorSchema, PublishReceiptSchema, ResourceSchema,
    RoomMessageSchema,
};

/// Script bundle rendering the reference page.
pub const SCALAR_BUNDLE: &str = "https://cdn.jsdelivr.net/npm/@scalar/api-reference";

/// OpenAPI document for the gateway's HTTP surface.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Gatehouse API",
        description = "Versioned resource API, room publication, and health probes.",
        license(name = "Apache-2.0", url = "https://www.apache.org/licenses/LICENSE-2.0.html")
    ),
    paths(
        crate::network::handlers::resources::create_resource,
        crate::network::handlers::resources::list_resources,
        crate::network::handlers::resources::get_resource,
        crate::network::handlers::rooms::publish_room_message,
        crate::network::handlers::rooms::room_members,
        crate::network::handlers::health::health_handler,
        crate::network::handlers::health::liveness_handler,
        crate::network::handlers::health::readiness_handler,
    ),
    components(schemas(
        ResourceSchema,
        CreateResourceSchema,
        RoomMessageSchema,
        PublishReceiptSchema,
        FieldErrorSchema,
        ApiErrorSchema
    )),
    tags(
        (name = "resources", description = "Sample resource API"),
        (name = "rooms", description = "Real-time room publication"),
        (name = "health", description = "Endpoints for health checks")
    )
)]
pub struct ApiDoc;

/// `GET /api/auth/reference`
pub async fn reference_page() -> Html<String> {
    Html(format!(
        "<!doctype html>\
         <html lang=\"en\"><head><meta charset=\"utf-8\"><title>Gatehouse API reference</title></head>\
         <body>\
         <script id=\"api-reference\" data-url=\"{API_REFERENCE_PREFIX}/openapi.json\"></script>\
         <script src=\"{SCALAR_BUNDLE}\"></script>\
         </body></html>"
    ))
}

/// `GET /api/auth/reference/openapi.json`
pub async fn openapi_document() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
