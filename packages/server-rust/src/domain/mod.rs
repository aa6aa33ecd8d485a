//! Sample domain served by the gateway API.
//!
//! Stands in for the business modules the module graph would normally carry:
//! one in-memory store registered as a shared provider in both roles.

pub mod resources;

pub use resources::{CreateResource, Resource, ResourceStore, RoomMessage};
