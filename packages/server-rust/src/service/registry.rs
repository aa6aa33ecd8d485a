use std::any::{Any, TypeId};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use gatehouse_core::AppConfig;
use parking_lot::RwLock;

// ---------------------------------------------------------------------------
// ServiceContext
// ---------------------------------------------------------------------------

/// Context handed to every service during initialization.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub config: Arc<AppConfig>,
}

// ---------------------------------------------------------------------------
// ManagedService trait
// ---------------------------------------------------------------------------

/// A provider in a role's module graph.
///
/// Services are initialized in registration order and shut down in reverse
/// order. The `Any` bound enables lookup by concrete type.
#[async_trait]
pub trait ManagedService: Send + Sync + Any {
    /// Unique name of this service within its graph (e.g. `"fanout"`).
    fn name(&self) -> &'static str;

    async fn init(&self, ctx: &ServiceContext) -> anyhow::Result<()>;

    /// Shut down the service. If `terminate` is true, skip graceful cleanup.
    async fn shutdown(&self, terminate: bool) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// The providers of one role's module graph.
///
/// Lookup works by `name()` and by concrete type.
pub struct ServiceRegistry {
    by_name: DashMap<&'static str, Arc<dyn ManagedService>>,
    by_type: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    init_order: RwLock<Vec<&'static str>>,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            by_type: DashMap::new(),
            init_order: RwLock::new(Vec::new()),
        }
    }

    /// Registers a service and returns a shared handle to it.
    pub fn register<T: ManagedService>(&self, service: T) -> Arc<T> {
        let arc = Arc::new(service);
        self.register_shared(Arc::clone(&arc));
        arc
    }

    /// Registers a service that is already shared with other components.
    pub fn register_shared<T: ManagedService>(&self, service: Arc<T>) {
        let name = service.name();
        self.by_name.insert(name, service.clone());
        self.by_type.insert(TypeId::of::<T>(), service);
        self.init_order.write().push(name);
    }

    pub fn get<T: ManagedService>(&self) -> Option<Arc<T>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn ManagedService>> {
        self.by_name.get(name).map(|entry| entry.value().clone())
    }

    /// Service names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.init_order.read().clone()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Initializes all services in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first `init()` failure; later services are not initialized.
    pub async fn init_all(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        for name in self.names() {
            if let Some(service) = self.get_by_name(name) {
                service
                    .init(ctx)
                    .await
                    .map_err(|e| e.context(format!("service `{name}` failed to initialize")))?;
            }
        }
        Ok(())
    }

    /// Shuts down all services in reverse registration order.
    ///
    /// Every service is asked to shut down even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the first `shutdown()` failure.
    pub async fn shutdown_all(&self, terminate: bool) -> anyhow::Result<()> {
        let mut first_error = None;
        for name in self.names().into_iter().rev() {
            if let Some(service) = self.get_by_name(name) {
                if let Err(e) = service.shutdown(terminate).await {
                    tracing::warn!(service = name, error = %e, "service shutdown failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
