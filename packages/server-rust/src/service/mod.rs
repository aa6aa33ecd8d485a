//! Provider lifecycle for a role's module graph.
//!
//! - [`registry`]: named providers, initialized in registration order and
//!   shut down in reverse
//! - [`worker`]: periodic background tasks owned by a provider

pub mod registry;
pub mod worker;

pub use registry::{ManagedService, ServiceContext, ServiceRegistry};
pub use worker::{BackgroundRunnable, BackgroundWorker};
