//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use gatehouse_core::{AppConfig, RawConfig};
use gatehouse_server::fanout::Broker;
use gatehouse_server::jobs::JobQueue;
use gatehouse_server::network::HealthState;
use gatehouse_server::{start, RunningService};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub const ORIGIN: &str = "http://localhost:5173";
pub const ADMIN_USER: &str = "ops";
pub const ADMIN_PASSWORD: &str = "hunter2";

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub fn raw_config(role: &str, node_id: &str, static_dir: &Path) -> RawConfig {
    RawConfig {
        role: Some(role.to_string()),
        http_port: Some(0),
        worker_port: Some(0),
        cors_origin: Some(ORIGIN.to_string()),
        auth_secret: Some("integration-secret".to_string()),
        admin_username: Some(ADMIN_USER.to_string()),
        admin_password: Some(ADMIN_PASSWORD.to_string()),
        static_dir: Some(static_dir.to_path_buf()),
        node_id: Some(node_id.to_string()),
        ..RawConfig::default()
    }
}

pub fn config(role: &str, node_id: &str, static_dir: &Path) -> Arc<AppConfig> {
    Arc::new(AppConfig::resolve(raw_config(role, node_id, static_dir)).unwrap())
}

pub fn basic_auth() -> String {
    format!(
        "Basic {}",
        STANDARD.encode(format!("{ADMIN_USER}:{ADMIN_PASSWORD}"))
    )
}

/// A role started and listening on an ephemeral port.
pub struct Running {
    pub port: u16,
    stop: Option<oneshot::Sender<()>>,
    server: JoinHandle<anyhow::Result<()>>,
}

impl Running {
    pub async fn launch(
        config: Arc<AppConfig>,
        broker: Arc<dyn Broker>,
        queue: Arc<dyn JobQueue>,
    ) -> (Self, axum::Router) {
        let mut service: RunningService = start(config, broker, queue).await.unwrap();
        let router = service.router();
        let ctrl = service.shutdown_controller();
        let addr: SocketAddr = service.bind().await.unwrap();
        let (stop, signal) = oneshot::channel::<()>();
        let server = tokio::spawn(service.serve(async {
            let _ = signal.await;
        }));
        tokio::time::timeout(Duration::from_secs(5), async {
            while ctrl.health_state() != HealthState::Ready {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("server never became ready");
        (
            Self {
                port: addr.port(),
                stop: Some(stop),
                server,
            },
            router,
        )
    }

    pub async fn connect(&self) -> Client {
        let (ws, _) = connect_async(format!("ws://127.0.0.1:{}/ws", self.port))
            .await
            .expect("ws connect failed");
        ws
    }

    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), self.server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

pub async fn send(ws: &mut Client, frame: Value) {
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

/// Next text frame as JSON, failing the test after `wait`.
pub async fn next_frame(ws: &mut Client, wait: Duration) -> Value {
    tokio::time::timeout(wait, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str::<Value>(text.as_str()).unwrap();
                }
                Some(Ok(_)) => {}
                other => panic!("socket ended: {other:?}"),
            }
        }
    })
    .await
    .expect("no frame before timeout")
}
