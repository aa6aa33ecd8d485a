use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use async_trait::async_trait;
use dashmap::DashMap;
use gatehouse_core::{Exposed, FieldDef, PayloadSchema, Validate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::fanout::now_millis;
use crate::service::{ManagedService, ServiceContext};

/// A stored resource. `owner_secret` never leaves the process.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub name: String,
    pub quantity: i64,
    pub tags: Vec<String>,
    pub owner_secret: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    #[serde(skip)]
    seq: u64,
}

impl Exposed for Resource {
    const PUBLIC_FIELDS: &'static [&'static str] = &["id", "name", "quantity", "tags", "createdAt"];
}

/// Body of `POST /api/v1/resource`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateResource {
    pub name: String,
    pub quantity: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub owner_secret: Option<String>,
}

impl Validate for CreateResource {
    fn schema() -> &'static PayloadSchema {
        static SCHEMA: OnceLock<PayloadSchema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            PayloadSchema::new(vec![
                FieldDef::string("name").required().length(1, 100),
                FieldDef::integer("quantity")
                    .required()
                    .range(0.0, 1_000_000.0),
                FieldDef::string_list("tags").length(0, 20),
                FieldDef::string("ownerSecret").length(8, 128),
            ])
        })
    }
}

/// Body of `POST /api/v1/rooms/{room}/messages`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoomMessage {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Validate for RoomMessage {
    fn schema() -> &'static PayloadSchema {
        static SCHEMA: OnceLock<PayloadSchema> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            PayloadSchema::new(vec![
                FieldDef::string("event").required().length(1, 64),
                FieldDef::any("data"),
            ])
        })
    }
}

/// In-memory resource store, listed in creation order.
#[derive(Debug, Default)]
pub struct ResourceStore {
    resources: DashMap<String, Resource>,
    next_seq: AtomicU64,
}

impl ResourceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, input: CreateResource) -> Resource {
        let resource = Resource {
            id: Uuid::new_v4().to_string(),
            name: input.name,
            quantity: input.quantity,
            tags: input.tags,
            owner_secret: input.owner_secret,
            created_at: now_millis(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        self.resources
            .insert(resource.id.clone(), resource.clone());
        debug!(id = %resource.id, "resource created");
        resource
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Resource> {
        self.resources.get(id).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn list(&self) -> Vec<Resource> {
        let mut all: Vec<Resource> = self
            .resources
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(|r| r.seq);
        all
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[async_trait]
impl ManagedService for ResourceStore {
    fn name(&self) -> &'static str {
        "resources"
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        self.resources.clear();
        Ok(())
    }
}
