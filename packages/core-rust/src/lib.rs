//! Gatehouse core: configuration model, payload schemas, exposure rules, and
//! the wire messages shared by the gateway and worker roles.

pub mod config;
pub mod exposure;
pub mod messages;
pub mod schema;

pub use config::{
    AdminCredentials, AppConfig, ConfigError, CorsOrigin, NodeEnv, PolicyConfig, RawConfig, Role,
    Secret,
};
pub use exposure::{expose, expose_all, Exposed};
pub use messages::{ClientFrame, Envelope, JobEnvelope, RoomName, ServerFrame};
pub use schema::{decode, FieldDef, FieldError, FieldErrorCode, FieldKind, PayloadSchema, Validate};
