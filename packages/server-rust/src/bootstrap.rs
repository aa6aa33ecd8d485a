//! Role selection and module-graph assembly.
//!
//! A process runs exactly one role. [`start`] picks the role's composition
//! function, which registers the role's providers and builds its router;
//! [`RunningService::bind`] and [`RunningService::serve`] then drive the
//! listener through the network module's deferred lifecycle.

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use gatehouse_core::{AppConfig, ConfigError, Role};
use tracing::info;

use crate::admin::{admin_router, protect, AdminGate, AdminState};
use crate::domain::ResourceStore;
use crate::error::StartupError;
use crate::fanout::{
    Broker, FanoutAdapter, FanoutConfig, FanoutError, MemoryBroker, RedisBroker, RoomEmitter,
};
use crate::jobs::{
    JobDispatcher, JobQueue, MemoryJobQueue, QueueConsumerService, QueueProvider, RedisJobQueue,
    ResourceCreatedHandler, RESOURCES_QUEUE,
};
use crate::network::handlers::{
    create_resource, get_resource, health_handler, list_resources, liveness_handler,
    publish_room_message, readiness_handler, room_members, ws_upgrade_handler,
};
use crate::network::middleware::{build_cors_layer, build_http_layers, track_in_flight};
use crate::network::security::with_security_headers;
use crate::network::static_assets::{prepare_static_dir, static_router};
use crate::network::versioning::{route_miss, versioned};
use crate::network::{
    ApiState, AppState, ConnectionRegistry, NetworkConfig, NetworkModule, ShutdownController,
};
use crate::service::{ServiceContext, ServiceRegistry};

/// Broker URL scheme that keeps the broker and job queue in process.
pub const MEMORY_BROKER_URL: &str = "memory://";

/// The role a process runs and the address it listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub role: Role,
    pub bind: SocketAddr,
}

/// Picks the role and its listen address. Every role listens on all
/// interfaces; the worker uses its own port.
#[must_use]
pub fn select(config: &AppConfig) -> Selection {
    let port = match config.role {
        Role::Worker => config.worker_port,
        Role::Gateway => config.http_port,
    };
    Selection {
        role: config.role,
        bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
    }
}

/// Request pipeline stages a role's router carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Validation,
    Versioning,
    Cors,
    SecurityHeaders,
    StaticAssets,
    Serialization,
}

/// Gateway stages, in pipeline order.
pub const GATEWAY_STAGES: &[PipelineStage] = &[
    PipelineStage::Validation,
    PipelineStage::Versioning,
    PipelineStage::Cors,
    PipelineStage::SecurityHeaders,
    PipelineStage::StaticAssets,
    PipelineStage::Serialization,
];

/// The worker serves no API, so it carries none of the stages.
pub const WORKER_STAGES: &[PipelineStage] = &[];

/// One role's providers, router, and listener.
pub struct ModuleGraph {
    pub services: Arc<ServiceRegistry>,
    pub router: Router,
    network: NetworkModule,
}

impl std::fmt::Debug for ModuleGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleGraph")
            .field("services", &self.services.names())
            .field("port", &self.network.config().port)
            .finish_non_exhaustive()
    }
}

/// A started role, tagged by which composition built it.
#[derive(Debug)]
pub enum RunningService {
    Gateway(ModuleGraph),
    Worker(ModuleGraph),
}

impl RunningService {
    fn graph(&self) -> &ModuleGraph {
        match self {
            Self::Gateway(graph) | Self::Worker(graph) => graph,
        }
    }

    fn graph_mut(&mut self) -> &mut ModuleGraph {
        match self {
            Self::Gateway(graph) | Self::Worker(graph) => graph,
        }
    }

    fn into_graph(self) -> ModuleGraph {
        match self {
            Self::Gateway(graph) | Self::Worker(graph) => graph,
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        match self {
            Self::Gateway(_) => Role::Gateway,
            Self::Worker(_) => Role::Worker,
        }
    }

    #[must_use]
    pub fn stages(&self) -> &'static [PipelineStage] {
        match self {
            Self::Gateway(_) => GATEWAY_STAGES,
            Self::Worker(_) => WORKER_STAGES,
        }
    }

    #[must_use]
    pub fn fanout_attached(&self) -> bool {
        self.graph().services.get::<FanoutAdapter>().is_some()
    }

    /// A handle on the assembled router, for driving it without a listener.
    #[must_use]
    pub fn router(&self) -> Router {
        self.graph().router.clone()
    }

    #[must_use]
    pub fn services(&self) -> Arc<ServiceRegistry> {
        Arc::clone(&self.graph().services)
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        self.graph().network.shutdown_controller()
    }

    #[must_use]
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.graph().network.registry()
    }

    /// Binds the role's listener.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::Bind`] if the address cannot be bound.
    pub async fn bind(&mut self) -> Result<SocketAddr, StartupError> {
        let network = &mut self.graph_mut().network;
        let addr = format!("{}:{}", network.config().host, network.config().port);
        network
            .start()
            .await
            .map_err(|source| StartupError::Bind { addr, source })
    }

    /// Serves until `shutdown` resolves, then shuts the providers down in
    /// reverse registration order.
    ///
    /// # Errors
    ///
    /// Returns an error if [`bind`](Self::bind) was not called, the server
    /// fails, or a provider fails to shut down.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let graph = self.into_graph();
        let terminate = !graph.network.config().graceful_shutdown;
        let served = graph.network.serve(graph.router, shutdown).await;
        let stopped = graph.services.shutdown_all(terminate).await;
        served.and(stopped)
    }
}

/// Assembles and initializes the module graph of the configured role.
///
/// # Errors
///
/// Returns a [`StartupError`] when the static directory is unusable, the
/// CORS origin cannot be turned into a header, the fan-out adapter cannot
/// attach, or a provider fails to initialize.
pub async fn start(
    config: Arc<AppConfig>,
    broker: Arc<dyn Broker>,
    queue: Arc<dyn JobQueue>,
) -> Result<RunningService, StartupError> {
    let selection = select(&config);
    let network = NetworkModule::new(NetworkConfig::from_app(&config, selection.bind.port()));

    let service = match selection.role {
        Role::Gateway => {
            RunningService::Gateway(assemble_gateway(&config, broker, queue, network).await?)
        }
        Role::Worker => RunningService::Worker(assemble_worker(&config, broker, queue, network)?),
    };

    let ctx = ServiceContext {
        config: Arc::clone(&config),
    };
    service
        .graph()
        .services
        .init_all(&ctx)
        .await
        .map_err(StartupError::Service)?;

    info!(
        role = %selection.role,
        services = ?service.graph().services.names(),
        "module graph initialized"
    );
    Ok(service)
}

fn health_router(config: &Arc<AppConfig>, network: &NetworkModule) -> Router {
    let state = AppState {
        config: Arc::clone(config),
        registry: network.registry(),
        shutdown: network.shutdown_controller(),
        start_time: Instant::now(),
    };
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .with_state(state)
}

/// Layers shared by both roles: the admin gate ahead of routing, in-flight
/// tracking, and the transport layers.
fn finish(app: Router, config: &AppConfig, network: &NetworkModule) -> Router {
    protect(app, AdminGate::from_config(config))
        .layer(from_fn_with_state(
            network.shutdown_controller(),
            track_in_flight,
        ))
        .layer(build_http_layers(network.config()))
}

/// Gateway graph: resources, queue, fan-out adapter, and the full request
/// pipeline.
///
/// # Errors
///
/// See [`start`].
pub async fn assemble_gateway(
    config: &Arc<AppConfig>,
    broker: Arc<dyn Broker>,
    queue: Arc<dyn JobQueue>,
    network: NetworkModule,
) -> Result<ModuleGraph, StartupError> {
    let static_dir =
        prepare_static_dir(&config.static_dir).map_err(|source| StartupError::Static {
            path: config.static_dir.clone(),
            source,
        })?;
    let cors = build_cors_layer(&config.cors_origin).map_err(|e| {
        ConfigError::InvalidCorsOrigin {
            origin: config.cors_origin.to_string(),
            reason: e.to_string(),
        }
    })?;

    let services = Arc::new(ServiceRegistry::new());
    let resources = services.register(ResourceStore::new());
    services.register(QueueProvider::new(Arc::clone(&queue)));
    let fanout = FanoutAdapter::attach(
        broker,
        network.registry(),
        FanoutConfig::new(config.node_id.clone()),
    )
    .await?;
    services.register_shared(Arc::clone(&fanout));

    let api_state = ApiState {
        resources,
        queue: Arc::clone(&queue),
        fanout,
        registry: network.registry(),
        connection: network.config().connection.clone(),
    };

    let api = Router::new()
        .route("/resource", get(list_resources).post(create_resource))
        .route("/resource/{id}", get(get_resource))
        .route("/rooms/{room}/messages", post(publish_room_message))
        .route("/rooms/{room}/members", get(room_members))
        .with_state(api_state.clone());
    let api = versioned(api).layer(cors);

    let admin = admin_router(
        AdminState {
            queue,
            queue_names: vec![RESOURCES_QUEUE],
            role: Role::Gateway,
        },
        config.policy.api_reference,
    );

    let app = Router::new()
        .merge(api)
        .route("/ws", get(ws_upgrade_handler).with_state(api_state))
        .merge(health_router(config, &network))
        .merge(static_router(
            &static_dir,
            Arc::new(config.cors_origin.clone()),
        ))
        .merge(admin)
        .fallback(route_miss);

    // Hardening sits outside the gate so its challenges carry the headers too.
    let router = with_security_headers(finish(app, config, &network));
    info!(static_dir = %static_dir.display(), origin = %config.cors_origin, "gateway assembled");

    Ok(ModuleGraph {
        services,
        router,
        network,
    })
}

/// Worker graph: resources, queue, and the job consumer. No fan-out
/// adapter and no API pipeline.
///
/// # Errors
///
/// See [`start`].
pub fn assemble_worker(
    config: &Arc<AppConfig>,
    broker: Arc<dyn Broker>,
    queue: Arc<dyn JobQueue>,
    network: NetworkModule,
) -> Result<ModuleGraph, StartupError> {
    let emitter = RoomEmitter::new(broker, FanoutConfig::new(config.node_id.clone()));
    let handler = ResourceCreatedHandler::new(emitter).map_err(StartupError::Service)?;
    let dispatcher = JobDispatcher::new().with_handler(Arc::new(handler));

    let services = Arc::new(ServiceRegistry::new());
    services.register(ResourceStore::new());
    services.register(QueueProvider::new(Arc::clone(&queue)));
    let consumer = services.register(QueueConsumerService::new(Arc::clone(&queue), dispatcher));

    let admin = admin_router(
        AdminState {
            queue,
            queue_names: consumer.queues(),
            role: Role::Worker,
        },
        false,
    );

    let app = Router::new()
        .merge(health_router(config, &network))
        .merge(admin)
        .fallback(route_miss);

    Ok(ModuleGraph {
        services,
        router: finish(app, config, &network),
        network,
    })
}

/// Connects the broker and job queue named by `broker_url`.
///
/// # Errors
///
/// Returns [`StartupError::Broker`] when the broker is unreachable.
pub async fn connect_backends(
    config: &AppConfig,
) -> Result<(Arc<dyn Broker>, Arc<dyn JobQueue>), StartupError> {
    if config.broker_url.starts_with(MEMORY_BROKER_URL) {
        info!("using in-process broker and job queue");
        return Ok((Arc::new(MemoryBroker::new()), Arc::new(MemoryJobQueue::new())));
    }
    let broker = RedisBroker::connect(&config.broker_url)
        .await
        .map_err(FanoutError::from)?;
    let queue = RedisJobQueue::new(broker.pool());
    Ok((Arc::new(broker), Arc::new(queue)))
}

/// Runs the configured role until `shutdown` resolves.
///
/// # Errors
///
/// Returns the first fatal [`StartupError`]; nothing listens when one is
/// returned before binding. Failures after the banner are
/// [`StartupError::Runtime`].
pub async fn run(
    config: Arc<AppConfig>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), StartupError> {
    let (broker, queue) = connect_backends(&config).await?;
    let mut service = start(Arc::clone(&config), broker, queue).await?;
    let addr = service.bind().await?;

    let scheme = if config.is_https { "https" } else { "http" };
    match service.role() {
        Role::Gateway => info!("Gateway server running at {scheme}://{addr}"),
        Role::Worker => info!("Worker server running at {scheme}://{addr}"),
    }

    service.serve(shutdown).await.map_err(StartupError::Runtime)
}
