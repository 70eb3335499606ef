//! Backend Strategies
//!
//! The two ways of reaching a backend, behind one trait:
//! a supervised executable queried over HTTP, or the embedded bridge.

use std::sync::Arc;

use async_trait::async_trait;

use super::bridge::{EmbeddedBridge, ModuleHost};
use super::config::{BackendSettings, StrategyKind};
use super::endpoint::BackendEndpoint;
use super::events::{HealthStatus, ToolStatus};
use super::process::ProcessSupervisor;
use super::status::parse_status_body;
use super::transport::{Method, TransportClient};

#[async_trait]
pub trait BackendStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Bring the backend online. The error is a user-facing message.
    async fn start(&self) -> Result<(), String>;

    async fn health(&self) -> HealthStatus;

    async fn tool_status(&self) -> ToolStatus;

    async fn restart(&self) -> bool;

    async fn shutdown(&self);

    fn is_ready(&self) -> bool;

    /// OS process id of the backend, 0 when there is none
    fn process_id(&self) -> u32 {
        0
    }
}

// ─── Process + HTTP ──────────────────────────────────────────────────────────

/// Supervised executable reached over HTTP
pub struct HttpStrategy {
    supervisor: Arc<ProcessSupervisor>,
    transport: TransportClient,
    endpoint: BackendEndpoint,
    health_path: String,
    status_path: String,
}

impl HttpStrategy {
    pub fn new(
        supervisor: ProcessSupervisor,
        transport: TransportClient,
        endpoint: BackendEndpoint,
        settings: &BackendSettings,
    ) -> Self {
        Self {
            supervisor: Arc::new(supervisor),
            transport,
            endpoint,
            health_path: settings.health_path.clone(),
            status_path: settings.status_path.clone(),
        }
    }

    pub fn endpoint(&self) -> &BackendEndpoint {
        &self.endpoint
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Run a bounded blocking supervisor operation off the async threads
    async fn with_supervisor<T, F>(&self, op: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&ProcessSupervisor) -> T + Send + 'static,
    {
        let supervisor = Arc::clone(&self.supervisor);
        match tokio::task::spawn_blocking(move || op(&supervisor)).await {
            Ok(value) => Some(value),
            Err(e) => {
                log::error!("[Connector] Supervisor task failed: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl BackendStrategy for HttpStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Process
    }

    async fn start(&self) -> Result<(), String> {
        self.with_supervisor(|s| s.try_start(None).map_err(|e| e.to_string()))
            .await
            .unwrap_or_else(|| Err("Backend start was interrupted".to_string()))
            .map(|_| ())
    }

    async fn health(&self) -> HealthStatus {
        let url = self.endpoint.url_for(&self.health_path);
        let response = self.transport.fetch(Method::Get, &url).await;
        if response.succeeded() {
            HealthStatus::healthy(response.body)
        } else {
            HealthStatus::failed(response.failure_text())
        }
    }

    async fn tool_status(&self) -> ToolStatus {
        let url = self.endpoint.url_for(&self.status_path);
        let response = self.transport.fetch(Method::Get, &url).await;
        if response.succeeded() {
            parse_status_body(&response.body)
        } else {
            ToolStatus::failed(response.failure_text())
        }
    }

    async fn restart(&self) -> bool {
        self.with_supervisor(|s| s.restart(None)).await.unwrap_or(false)
    }

    async fn shutdown(&self) {
        self.with_supervisor(|s| s.stop()).await;
    }

    fn is_ready(&self) -> bool {
        self.supervisor.is_running()
    }

    fn process_id(&self) -> u32 {
        self.supervisor.process_id()
    }
}

// ─── Embedded ────────────────────────────────────────────────────────────────

/// Backend module running inside this process
pub struct EmbeddedStrategy<H: ModuleHost> {
    bridge: Arc<EmbeddedBridge<H>>,
}

impl<H: ModuleHost + 'static> EmbeddedStrategy<H> {
    pub fn new(bridge: EmbeddedBridge<H>) -> Self {
        Self {
            bridge: Arc::new(bridge),
        }
    }

    pub fn bridge(&self) -> &EmbeddedBridge<H> {
        &self.bridge
    }

    async fn with_bridge<T, F>(&self, op: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(&EmbeddedBridge<H>) -> T + Send + 'static,
    {
        let bridge = Arc::clone(&self.bridge);
        tokio::task::spawn_blocking(move || op(&bridge))
            .await
            .map_err(|e| {
                log::error!("[Connector] Bridge task failed: {}", e);
                format!("Embedded backend call failed: {}", e)
            })
    }
}

#[async_trait]
impl<H: ModuleHost + 'static> BackendStrategy for EmbeddedStrategy<H> {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Embedded
    }

    async fn start(&self) -> Result<(), String> {
        self.with_bridge(|b| b.initialize().map_err(|e| e.to_string()))
            .await
            .and_then(|r| r)
    }

    async fn health(&self) -> HealthStatus {
        self.with_bridge(|b| b.check_health())
            .await
            .unwrap_or_else(|e| HealthStatus::failed(e))
    }

    async fn tool_status(&self) -> ToolStatus {
        self.with_bridge(|b| b.check_tool_status())
            .await
            .unwrap_or_else(|e| ToolStatus::failed(e))
    }

    async fn restart(&self) -> bool {
        self.with_bridge(|b| b.initialize().is_ok() && b.is_ready())
            .await
            .unwrap_or(false)
    }

    async fn shutdown(&self) {
        self.bridge.shutdown();
    }

    fn is_ready(&self) -> bool {
        self.bridge.is_ready()
    }
}
