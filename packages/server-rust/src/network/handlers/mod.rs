//! HTTP and WebSocket handler definitions for the gatehouse server.
//!
//! Each surface carries only the state it needs: [`AppState`] for the
//! health probes both roles expose, [`ApiState`] for the gateway's API and
//! WebSocket endpoint.

pub mod health;
pub mod resources;
pub mod rooms;
pub mod schemas;
pub mod websocket;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use resources::{create_resource, get_resource, list_resources};
pub use rooms::{publish_room_message, room_members};
pub use websocket::ws_upgrade_handler;

use std::sync::Arc;
use std::time::Instant;

use gatehouse_core::AppConfig;

use super::{ConnectionConfig, ConnectionRegistry, ShutdownController};
use crate::domain::ResourceStore;
use crate::fanout::FanoutAdapter;
use crate::jobs::JobQueue;

/// State of the health surface, shared by both roles.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// Registry of all active WebSocket connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}

/// State of the gateway's versioned API and WebSocket endpoint.
#[derive(Clone)]
pub struct ApiState {
    pub resources: Arc<ResourceStore>,
    pub queue: Arc<dyn JobQueue>,
    pub fanout: Arc<FanoutAdapter>,
    pub registry: Arc<ConnectionRegistry>,
    pub connection: ConnectionConfig,
}
