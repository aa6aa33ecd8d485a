//! Wire message schemas shared by both process roles.
//!
//! - [`realtime`]: JSON WebSocket frames between clients and gateway nodes
//! - [`fanout`]: `MsgPack` envelopes forwarded between gateway nodes via the broker
//! - [`job`]: background job records passed from gateway to worker

pub mod fanout;
pub mod job;
pub mod realtime;

pub use fanout::Envelope;
pub use job::JobEnvelope;
pub use realtime::{ClientFrame, InvalidRoomName, RoomName, ServerFrame, MAX_ROOM_NAME_LEN};
