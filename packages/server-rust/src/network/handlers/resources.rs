//! Resource API handlers.
//!
//! ```text
//! POST /api/v1/resource {"name":"bolt","quantity":12,"tags":["steel"]}
//! GET  /api/v1/resource
//! GET  /api/v1/resource/{id}
//! ```

use axum::extract::{Path, State};
use axum::http::StatusCode;
use gatehouse_core::expose;
use tracing::warn;

use super::schemas::{ApiErrorSchema, CreateResourceSchema, ResourceSchema};
use super::ApiState;
use crate::domain::{CreateResource, Resource};
use crate::jobs::handlers::RESOURCE_CREATED;
use crate::jobs::{new_job, RESOURCES_QUEUE};
use crate::network::error::ApiError;
use crate::network::serialize::{PublicJson, PublicList};
use crate::network::validation::ValidatedJson;

/// Creates a resource and queues a `resource.created` job for the worker.
///
/// A queue failure is logged; the resource is still created.
#[utoipa::path(
    post,
    path = "/api/v1/resource",
    request_body = CreateResourceSchema,
    responses(
        (status = 201, description = "Resource created", body = ResourceSchema),
        (status = 415, description = "Body is not JSON", body = ApiErrorSchema),
        (status = 422, description = "Validation failed", body = ApiErrorSchema)
    ),
    tags = ["resources"],
    operation_id = "createResource"
)]
pub async fn create_resource(
    State(state): State<ApiState>,
    ValidatedJson(input): ValidatedJson<CreateResource>,
) -> Result<(StatusCode, PublicJson<Resource>), ApiError> {
    let resource = state.resources.create(input);

    let payload = expose(&resource).map_err(ApiError::internal)?;
    if let Err(e) = state
        .queue
        .push(new_job(RESOURCES_QUEUE, RESOURCE_CREATED, payload))
        .await
    {
        warn!(id = %resource.id, error = %e, "failed to enqueue resource.created job");
    }

    Ok((StatusCode::CREATED, PublicJson(resource)))
}

/// Lists resources in creation order.
#[utoipa::path(
    get,
    path = "/api/v1/resource",
    responses((status = 200, description = "Resources", body = [ResourceSchema])),
    tags = ["resources"],
    operation_id = "listResources"
)]
pub async fn list_resources(State(state): State<ApiState>) -> PublicList<Resource> {
    PublicList(state.resources.list())
}

#[utoipa::path(
    get,
    path = "/api/v1/resource/{id}",
    params(("id" = String, Path, description = "Resource identifier")),
    responses(
        (status = 200, description = "Resource", body = ResourceSchema),
        (status = 404, description = "Unknown resource", body = ApiErrorSchema)
    ),
    tags = ["resources"],
    operation_id = "getResource"
)]
pub async fn get_resource(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<PublicJson<Resource>, ApiError> {
    state
        .resources
        .get(&id)
        .map(PublicJson)
        .ok_or_else(|| ApiError::not_found(format!("resource {id} not found")))
}
