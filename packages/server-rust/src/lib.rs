//! Gatehouse server: one process image running either the HTTP gateway or
//! the background worker.
//!
//! The gateway serves the versioned API, static assets, and WebSocket rooms
//! whose messages fan out across nodes through a shared broker. The worker
//! drains job queues. Both expose health probes and the gated
//! administrative surfaces.

pub mod admin;
pub mod bootstrap;
pub mod config;
pub mod domain;
pub mod error;
pub mod fanout;
pub mod jobs;
pub mod network;
pub mod service;
pub mod telemetry;

pub use bootstrap::{run, select, start, PipelineStage, RunningService, Selection};
pub use config::ServerArgs;
pub use error::StartupError;
