//! Backend Connector
//!
//! The façade the UI talks to. A connector is bound to one strategy for its
//! whole life and turns every outcome into a [`ConnectorEvent`]; nothing
//! below this point panics or returns an error into the UI.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::bridge::{BridgeOptions, EmbeddedBridge, ModuleHost};
use super::config::{BackendSettings, RuntimeSettings, Settings, StrategyKind};
use super::error::ConfigError;
use super::events::{ConnectorEvent, EventBus, HealthStatus, ToolStatus};
use super::process::{ProcessSupervisor, SupervisorOptions};
use super::strategy::{BackendStrategy, EmbeddedStrategy, HttpStrategy};
use super::transport::TransportClient;

/// Status façade over one backend strategy.
///
/// Query methods spawn onto the current tokio runtime and must be called
/// from within one.
#[derive(Clone)]
pub struct Connector {
    strategy: Arc<dyn BackendStrategy>,
    events: EventBus,
}

impl Connector {
    pub fn new(strategy: Arc<dyn BackendStrategy>, events: EventBus) -> Self {
        log::info!("[Connector] Using {:?} strategy", strategy.kind());
        Self { strategy, events }
    }

    /// Supervised executable reached over HTTP
    pub fn process(settings: &BackendSettings) -> Result<Self, ConfigError> {
        let events = EventBus::new();
        let endpoint = settings.endpoint()?;
        let transport = TransportClient::new(settings.request_timeout(), events.clone());
        let supervisor = ProcessSupervisor::new(SupervisorOptions::from_settings(settings));

        log::info!("[Connector] Backend endpoint: {}", endpoint);
        let strategy = HttpStrategy::new(supervisor, transport, endpoint, settings);
        Ok(Self::new(Arc::new(strategy), events))
    }

    /// Backend module loaded into this process through `host`
    pub fn embedded<H: ModuleHost + 'static>(host: H, settings: &RuntimeSettings) -> Self {
        let bridge = EmbeddedBridge::new(host, BridgeOptions::from_settings(settings));
        Self::new(Arc::new(EmbeddedStrategy::new(bridge)), EventBus::new())
    }

    /// Build whichever strategy the settings ask for
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        match settings.backend.strategy {
            StrategyKind::Process => Self::process(&settings.backend),
            StrategyKind::Embedded => Self::embedded_default(&settings.runtime),
        }
    }

    #[cfg(feature = "python")]
    fn embedded_default(settings: &RuntimeSettings) -> Result<Self, ConfigError> {
        Ok(Self::embedded(super::bridge::python::PythonHost, settings))
    }

    #[cfg(not(feature = "python"))]
    fn embedded_default(_settings: &RuntimeSettings) -> Result<Self, ConfigError> {
        Err(ConfigError::EmbeddedUnavailable)
    }

    pub fn kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectorEvent> {
        self.events.subscribe()
    }

    /// Bring the backend online and publish [`ConnectorEvent::Started`].
    pub async fn start(&self) -> bool {
        let (ok, message) = match self.strategy.start().await {
            Ok(()) => (true, "Backend started".to_string()),
            Err(message) => {
                log::warn!("[Connector] Backend failed to start: {}", message);
                (false, message)
            }
        };
        self.events.emit(ConnectorEvent::Started { ok, message });
        ok
    }

    /// Query health; the result is published and also returned by the handle.
    ///
    /// Never triggers a status check on its own.
    pub fn check_health(&self) -> JoinHandle<HealthStatus> {
        let strategy = Arc::clone(&self.strategy);
        let events = self.events.clone();
        tokio::spawn(async move {
            let health = strategy.health().await;
            log::info!("[Connector] Health: ok={} message={}", health.ok, health.message);
            events.emit(ConnectorEvent::Health(health.clone()));
            health
        })
    }

    /// Query tool status; the result is published and also returned by the handle.
    pub fn check_tool_status(&self) -> JoinHandle<ToolStatus> {
        let strategy = Arc::clone(&self.strategy);
        let events = self.events.clone();
        tokio::spawn(async move {
            let status = strategy.tool_status().await;
            if status.ok {
                log::info!(
                    "[Connector] Tool status: installed={} running={} models={}",
                    status.installed,
                    status.running,
                    status.models.len()
                );
            } else {
                log::warn!("[Connector] Tool status failed: {}", status.error);
            }
            events.emit(ConnectorEvent::ToolStatus(status.clone()));
            status
        })
    }

    /// Restart the backend and publish [`ConnectorEvent::Restarted`].
    pub async fn restart(&self) -> bool {
        log::info!("[Connector] Restarting backend");
        let ok = self.strategy.restart().await;
        if !ok {
            log::warn!("[Connector] Restart failed");
        }
        self.events.emit(ConnectorEvent::Restarted { ok });
        ok
    }

    /// Stop an owned backend process. No-op for the embedded strategy.
    pub async fn shutdown(&self) {
        self.strategy.shutdown().await;
    }

    pub fn is_ready(&self) -> bool {
        self.strategy.is_ready()
    }

    /// Backend process id, 0 when none is running
    pub fn process_id(&self) -> u32 {
        self.strategy.process_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::bridge::testing::{options_with_env, Entry, FakeHost};
    use serde_json::json;

    fn embedded(host: FakeHost, dir: &std::path::Path) -> Connector {
        let bridge = EmbeddedBridge::new(host, options_with_env(dir));
        Connector::new(Arc::new(EmbeddedStrategy::new(bridge)), EventBus::new())
    }

    #[tokio::test]
    async fn health_before_start_is_not_ready() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new().with_entry("health_check", Entry::Returns(json!({"status": "ok"})));
        let connector = embedded(host.clone(), tmp.path());
        let mut rx = connector.subscribe();

        let health = connector.check_health().await.unwrap();
        assert_eq!(health, HealthStatus::failed("Not ready"));
        assert_eq!(rx.recv().await.unwrap(), ConnectorEvent::Health(health));
        assert_eq!(host.calls(), 0);
    }

    #[tokio::test]
    async fn embedded_start_then_queries() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new()
            .with_entry("health_check", Entry::Returns(json!({"status": "ok"})))
            .with_entry(
                "ollama_status",
                Entry::Returns(json!({"installed": true, "running": false, "models": []})),
            );
        let connector = embedded(host, tmp.path());
        let mut rx = connector.subscribe();

        assert!(connector.start().await);
        assert!(connector.is_ready());
        assert_eq!(connector.kind(), StrategyKind::Embedded);
        assert_eq!(connector.process_id(), 0);
        assert_eq!(
            rx.recv().await.unwrap(),
            ConnectorEvent::Started { ok: true, message: "Backend started".to_string() }
        );

        assert_eq!(connector.check_health().await.unwrap(), HealthStatus::healthy("OK"));

        let status = connector.check_tool_status().await.unwrap();
        assert!(status.ok && status.installed && !status.running);
        assert!(status.models.is_empty());
    }

    #[tokio::test]
    async fn failed_health_does_not_chain_status() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new()
            .with_entry("health_check", Entry::Raises("RuntimeError: down".into()))
            .with_entry(
                "ollama_status",
                Entry::Returns(json!({"installed": true, "running": true})),
            );
        let connector = embedded(host.clone(), tmp.path());
        assert!(connector.start().await);

        let mut rx = connector.subscribe();
        let health = connector.check_health().await.unwrap();
        assert!(!health.ok);

        assert!(matches!(rx.recv().await.unwrap(), ConnectorEvent::Health(_)));
        assert!(rx.try_recv().is_err());
        assert_eq!(host.calls(), 1);
    }

    #[tokio::test]
    async fn embedded_restart_reinitializes_idempotently() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new();
        let connector = embedded(host.clone(), tmp.path());
        let mut rx = connector.subscribe();

        assert!(connector.restart().await);
        assert!(connector.restart().await);
        assert_eq!(rx.recv().await.unwrap(), ConnectorEvent::Restarted { ok: true });
        assert_eq!(
            host.counters.inits.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn embedded_start_failure_is_an_event() {
        let tmp = tempfile::tempdir().unwrap();
        let mut host = FakeHost::new();
        host.fail_init = Some("interpreter exploded".to_string());
        let connector = embedded(host, tmp.path());
        let mut rx = connector.subscribe();

        assert!(!connector.start().await);
        match rx.recv().await.unwrap() {
            ConnectorEvent::Started { ok, message } => {
                assert!(!ok);
                assert_eq!(message, "Failed to initialize runtime: interpreter exploded");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(!connector.restart().await);
    }

    #[cfg(not(feature = "python"))]
    #[test]
    fn embedded_settings_need_python_feature() {
        let mut settings = Settings::default();
        settings.backend.strategy = StrategyKind::Embedded;
        assert!(matches!(
            Connector::from_settings(&settings),
            Err(ConfigError::EmbeddedUnavailable)
        ));
    }

    #[test]
    fn bad_url_is_rejected_up_front() {
        let settings = BackendSettings {
            base_url: "localhost".to_string(),
            ..BackendSettings::default()
        };
        assert!(matches!(
            Connector::process(&settings),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }
}
