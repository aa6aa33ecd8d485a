use async_trait::async_trait;
use gatehouse_core::{JobEnvelope, RoomName};
use tracing::info;

use super::{JobHandler, RESOURCES_QUEUE};
use crate::fanout::RoomEmitter;

/// Job name pushed by the gateway after a resource is created.
pub const RESOURCE_CREATED: &str = "resource.created";
/// Room that receives resource lifecycle events.
pub const RESOURCES_ROOM: &str = "resources";

/// Announces newly created resources to real-time clients in the
/// `resources` room.
#[derive(Debug)]
pub struct ResourceCreatedHandler {
    emitter: RoomEmitter,
    room: RoomName,
}

impl ResourceCreatedHandler {
    /// # Errors
    ///
    /// Returns an error if the room name is rejected.
    pub fn new(emitter: RoomEmitter) -> anyhow::Result<Self> {
        Ok(Self {
            emitter,
            room: RoomName::new(RESOURCES_ROOM)?,
        })
    }
}

#[async_trait]
impl JobHandler for ResourceCreatedHandler {
    fn queue(&self) -> &'static str {
        RESOURCES_QUEUE
    }

    async fn handle(&self, job: &JobEnvelope) -> anyhow::Result<()> {
        if job.name != RESOURCE_CREATED {
            anyhow::bail!("unexpected job `{}` on queue `{}`", job.name, job.queue);
        }
        self.emitter
            .emit(&self.room, RESOURCE_CREATED, job.payload.clone())
            .await?;
        info!(job_id = %job.id, "resource creation announced");
        Ok(())
    }
}
