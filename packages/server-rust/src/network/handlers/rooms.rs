//! Room publication over HTTP.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use gatehouse_core::{FieldError, FieldErrorCode, RoomName};
use serde_json::{json, Value};

use super::schemas::{ApiErrorSchema, PublishReceiptSchema, RoomMessageSchema};
use super::ApiState;
use crate::domain::RoomMessage;
use crate::network::error::ApiError;
use crate::network::validation::ValidatedJson;

fn room_param(raw: String) -> Result<RoomName, ApiError> {
    RoomName::new(raw).map_err(|e| {
        ApiError::validation(vec![FieldError::new(
            "room",
            FieldErrorCode::InvalidType,
            e.to_string(),
        )])
    })
}

/// Publishes a message to every member of a room, on every gateway node.
#[utoipa::path(
    post,
    path = "/api/v1/rooms/{room}/messages",
    params(("room" = String, Path, description = "Room name")),
    request_body = RoomMessageSchema,
    responses(
        (status = 202, description = "Accepted for fan-out", body = PublishReceiptSchema),
        (status = 422, description = "Validation failed", body = ApiErrorSchema)
    ),
    tags = ["rooms"],
    operation_id = "publishRoomMessage"
)]
pub async fn publish_room_message(
    State(state): State<ApiState>,
    Path(room): Path<String>,
    ValidatedJson(message): ValidatedJson<RoomMessage>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let room = room_param(room)?;
    let delivered = state
        .fanout
        .publish(&room, &message.event, message.data)
        .await;
    Ok((StatusCode::ACCEPTED, Json(json!({ "delivered": delivered }))))
}

/// Room members across every gateway node, as `node:connection` pairs.
#[utoipa::path(
    get,
    path = "/api/v1/rooms/{room}/members",
    params(("room" = String, Path, description = "Room name")),
    responses(
        (status = 200, description = "Members", body = [String]),
        (status = 500, description = "Broker unavailable", body = ApiErrorSchema)
    ),
    tags = ["rooms"],
    operation_id = "roomMembers"
)]
pub async fn room_members(
    State(state): State<ApiState>,
    Path(room): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    let room = room_param(room)?;
    state
        .fanout
        .room_members(&room)
        .await
        .map(Json)
        .map_err(ApiError::internal)
}
