//! Network module with deferred startup lifecycle.
//!
//! Implements the deferred startup pattern: `new()` creates resources,
//! `start()` binds the TCP listener, and `serve()` starts accepting
//! connections. The role's module graph is assembled between `new()` and
//! `serve()` so it can share the registry and shutdown controller.

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::connection::{ConnectionRegistry, OutboundMessage};
use super::shutdown::ShutdownController;

/// Manages the HTTP/WebSocket server lifecycle of one role.
///
/// 1. `new()` -- allocates shared state (registry, shutdown controller)
/// 2. `start()` -- binds the TCP listener to the configured address
/// 3. `serve()` -- accepts connections until shutdown is signalled
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Creates a new network module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            listener: None,
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Returns a shared reference to the connection registry.
    #[must_use]
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Returns a shared reference to the shutdown controller.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound address, whose port differs from the
    /// configured one when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;

        info!("TCP listener bound to {addr}");

        self.listener = Some(listener);
        Ok(addr)
    }

    /// Serves `app` until the shutdown signal fires.
    ///
    /// After the signal:
    /// 1. Health state transitions to Draining and new requests get `503`
    /// 2. All WebSocket connections receive a Close frame
    /// 3. With graceful shutdown enabled, in-flight requests get up to the
    ///    drain timeout to finish; otherwise the server stops at once
    /// 4. Health state transitions to Stopped
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first or the server
    /// fails with an I/O error.
    pub async fn serve(
        self,
        app: Router,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Some(listener) = self.listener else {
            anyhow::bail!("start() must be called before serve()");
        };
        let ctrl = self.shutdown;
        let config = self.config;

        let signal_ctrl = Arc::clone(&ctrl);
        let registry = self.registry;
        let graceful = async move {
            shutdown.await;
            signal_ctrl.trigger_shutdown();
            close_connections(&registry);
        };

        ctrl.set_ready();

        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(graceful)
        .into_future();
        let mut server = std::pin::pin!(server);

        tokio::select! {
            result = &mut server => result?,
            () = ctrl.triggered() => {
                if config.graceful_shutdown {
                    match tokio::time::timeout(config.drain_timeout, &mut server).await {
                        Ok(result) => {
                            result?;
                            info!("All in-flight requests drained");
                        }
                        Err(_) => warn!(
                            in_flight = ctrl.in_flight_count(),
                            "Drain timeout expired with in-flight requests remaining"
                        ),
                    }
                } else {
                    info!("Graceful shutdown disabled; stopping without drain");
                }
            }
        }

        ctrl.mark_stopped();
        Ok(())
    }
}

/// Sends a Close frame to every WebSocket connection and forgets them.
fn close_connections(registry: &ConnectionRegistry) {
    let handles = registry.drain_all();
    if handles.is_empty() {
        return;
    }
    info!("Closing {} WebSocket connections", handles.len());
    for handle in &handles {
        let _ = handle.try_send(OutboundMessage::Close(Some(
            "server shutting down".to_string(),
        )));
    }
}
