//! Request pipeline, connection management, and the server lifecycle.
//!
//! Pipeline stages, each in its own module: payload validation
//! ([`validation`]), URI versioning ([`versioning`]), CORS and transport
//! layers ([`middleware`]), security headers ([`security`]), static assets
//! ([`static_assets`]), and allow-listed serialization ([`serialize`]).

pub mod client_addr;
pub mod config;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod security;
pub mod serialize;
pub mod shutdown;
pub mod static_assets;
pub mod validation;
pub mod versioning;

pub use config::*;
pub use connection::*;
pub use error::ApiError;
pub use handlers::{ApiState, AppState};
pub use module::NetworkModule;
pub use serialize::{PublicJson, PublicList};
pub use shutdown::*;
pub use validation::ValidatedJson;
pub use versioning::SUPPORTED_API_VERSIONS;
