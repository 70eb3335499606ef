//! Embedded Runtime Bridge
//!
//! Runs the backend inside this process instead of as a separate
//! executable. The bridge discovers a runtime environment, initializes the
//! runtime once, loads the backend module once and then answers health and
//! status queries with direct calls into it.
//!
//! The runtime itself sits behind [`ModuleHost`] so the bridge logic does
//! not depend on a particular interpreter; the CPython host lives in
//! [`python`] behind the `python` cargo feature.

pub mod discovery;
#[cfg(feature = "python")]
pub mod python;

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use super::config::RuntimeSettings;
use super::error::BridgeError;
use super::events::{HealthStatus, ToolStatus};
use super::status::status_from_value;

pub use discovery::{discover, DiscoveryOptions, DiscoverySource, RuntimeEnvironment};

/// A runtime that can host the backend module.
pub trait ModuleHost: Send + Sync {
    /// Bring the runtime up for `env`. The bridge calls this at most once.
    fn initialize(&self, env: &RuntimeEnvironment) -> Result<(), BridgeError>;

    /// Import a module by name.
    fn load_module(&self, name: &str) -> Result<Box<dyn LoadedModule>, BridgeError>;
}

/// Handle to an imported backend module
pub trait LoadedModule: Send + Sync {
    /// Call a zero-argument entry point and convert its result.
    ///
    /// Returns [`BridgeError::EntryMissing`] if the attribute is absent or
    /// not callable.
    fn call(&self, entry: &str) -> Result<Value, BridgeError>;

    /// Call a zero-argument entry point for its success alone; the result is
    /// discarded unconverted.
    fn invoke(&self, entry: &str) -> Result<(), BridgeError> {
        self.call(entry).map(|_| ())
    }
}

#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub discovery: DiscoveryOptions,
    pub module: String,
    pub health_entry: String,
    pub status_entry: String,
}

impl BridgeOptions {
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            discovery: DiscoveryOptions::from_settings(settings),
            module: settings.module.clone(),
            health_entry: settings.health_entry.clone(),
            status_entry: settings.status_entry.clone(),
        }
    }
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self::from_settings(&RuntimeSettings::default())
    }
}

#[derive(Default)]
struct BridgeState {
    environment: Option<RuntimeEnvironment>,
    runtime_initialized: bool,
    module: Option<Arc<dyn LoadedModule>>,
    last_error: Option<BridgeError>,
}

/// In-process backend.
///
/// Initialization is idempotent: environment discovery and runtime
/// initialization happen once, the module is loaded once and cached until
/// the process exits. Every query before that fails with "Not ready".
pub struct EmbeddedBridge<H: ModuleHost> {
    host: H,
    options: BridgeOptions,
    state: Mutex<BridgeState>,
}

impl<H: ModuleHost> EmbeddedBridge<H> {
    pub fn new(host: H, options: BridgeOptions) -> Self {
        Self {
            host,
            options,
            state: Mutex::new(BridgeState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Discover, initialize and load the backend module.
    ///
    /// Safe to call again after a failure (e.g. a missing module that was
    /// installed since); steps that already succeeded are not repeated.
    pub fn initialize(&self) -> Result<(), BridgeError> {
        let mut state = self.lock();
        if state.module.is_some() {
            return Ok(());
        }

        let result = self.initialize_locked(&mut state);
        match &result {
            Ok(()) => {
                log::info!("[Bridge] Backend module '{}' ready", self.options.module);
                state.last_error = None;
            }
            Err(e) => {
                log::error!("[Bridge] {}", e);
                state.last_error = Some(e.clone());
            }
        }
        result
    }

    fn initialize_locked(&self, state: &mut BridgeState) -> Result<(), BridgeError> {
        if !state.runtime_initialized {
            let env = match &state.environment {
                Some(env) => env.clone(),
                None => {
                    let env = discover(&self.options.discovery)?;
                    state.environment = Some(env.clone());
                    env
                }
            };
            self.host.initialize(&env)?;
            state.runtime_initialized = true;
        }

        let module = self.host.load_module(&self.options.module)?;
        state.module = Some(Arc::from(module));
        Ok(())
    }

    /// Nothing to release: the runtime lives until the process exits.
    pub fn shutdown(&self) {
        log::debug!("[Bridge] shutdown requested, runtime stays loaded");
    }

    /// Initialized and module loaded
    pub fn is_ready(&self) -> bool {
        self.lock().module.is_some()
    }

    /// The environment in use, once discovered
    pub fn environment(&self) -> Option<RuntimeEnvironment> {
        self.lock().environment.clone()
    }

    /// Why the last initialization failed
    pub fn last_error(&self) -> Option<BridgeError> {
        self.lock().last_error.clone()
    }

    fn module(&self) -> Result<Arc<dyn LoadedModule>, BridgeError> {
        self.lock().module.clone().ok_or(BridgeError::NotReady)
    }

    pub fn check_health(&self) -> HealthStatus {
        let result = self
            .module()
            .and_then(|module| module.invoke(&self.options.health_entry));

        match result {
            Ok(_) => HealthStatus::healthy("OK"),
            Err(e) => HealthStatus::failed(e.to_string()),
        }
    }

    pub fn check_tool_status(&self) -> ToolStatus {
        let result = self
            .module()
            .and_then(|module| module.call(&self.options.status_entry));

        match result {
            Ok(value) => status_from_value(&value),
            Err(e) => ToolStatus::failed(e.to_string()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn ready_bridge(host: FakeHost, dir: &std::path::Path) -> EmbeddedBridge<FakeHost> {
        let bridge = EmbeddedBridge::new(host, options_with_env(dir));
        bridge.initialize().unwrap();
        bridge
    }

    #[test]
    fn queries_before_ready_never_reach_the_module() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new().with_entry("health_check", Entry::Returns(json!({"status": "ok"})));
        let bridge = EmbeddedBridge::new(host.clone(), options_with_env(tmp.path()));

        assert!(!bridge.is_ready());
        assert_eq!(bridge.check_health(), HealthStatus::failed("Not ready"));

        let status = bridge.check_tool_status();
        assert!(!status.ok);
        assert_eq!(status.error, "Not ready");
        assert_eq!(host.calls(), 0);
    }

    #[test]
    fn initialization_runs_once() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new();
        let bridge = ready_bridge(host.clone(), tmp.path());

        bridge.initialize().unwrap();
        bridge.initialize().unwrap();

        assert!(bridge.is_ready());
        assert_eq!(host.counters.inits.load(Ordering::SeqCst), 1);
        assert_eq!(host.counters.loads.load(Ordering::SeqCst), 1);
        assert_eq!(
            bridge.environment().unwrap().source,
            DiscoverySource::Override
        );
    }

    #[test]
    fn module_load_failure_leaves_bridge_not_ready() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new();
        host.module_present.store(false, Ordering::SeqCst);
        let bridge = EmbeddedBridge::new(host.clone(), options_with_env(tmp.path()));

        let err = bridge.initialize().unwrap_err();
        assert!(matches!(err, BridgeError::ModuleLoad { .. }));
        assert!(!bridge.is_ready());
        assert_eq!(bridge.last_error(), Some(err));
        assert_eq!(bridge.check_health().message, "Not ready");

        // Module shows up later: retry loads it without re-initializing the runtime
        host.module_present.store(true, Ordering::SeqCst);
        bridge.initialize().unwrap();
        assert!(bridge.is_ready());
        assert_eq!(bridge.last_error(), None);
        assert_eq!(host.counters.inits.load(Ordering::SeqCst), 1);
        assert_eq!(host.counters.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn missing_runtime_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new();
        let options = BridgeOptions {
            discovery: DiscoveryOptions {
                override_path: None,
                app_dir: tmp.path().to_path_buf(),
                search_depth: 0,
                system_candidates: Vec::new(),
            },
            ..BridgeOptions::default()
        };
        let bridge = EmbeddedBridge::new(host.clone(), options);

        assert!(matches!(bridge.initialize(), Err(BridgeError::RuntimeNotFound(_))));
        assert!(!bridge.is_ready());
        assert_eq!(host.counters.inits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn health_maps_call_outcomes() {
        let tmp = tempfile::tempdir().unwrap();

        let ok = ready_bridge(
            FakeHost::new().with_entry("health_check", Entry::Returns(Value::Null)),
            tmp.path(),
        );
        assert_eq!(ok.check_health(), HealthStatus::healthy("OK"));

        let missing = ready_bridge(FakeHost::new(), tmp.path());
        assert_eq!(missing.check_health(), HealthStatus::failed("health_check missing"));

        let raising = ready_bridge(
            FakeHost::new().with_entry("health_check", Entry::Raises("ValueError: boom".into())),
            tmp.path(),
        );
        let health = raising.check_health();
        assert!(!health.ok);
        assert_eq!(health.message, "health_check failed: ValueError: boom");
    }

    #[test]
    fn tool_status_is_normalized() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FakeHost::new().with_entry(
            "ollama_status",
            Entry::Returns(json!({
                "installed": true,
                "running": true,
                "models": ["llama3", {"model": "mistral"}, {"size": 1}]
            })),
        );
        let bridge = ready_bridge(host, tmp.path());

        let status = bridge.check_tool_status();
        assert!(status.ok);
        assert!(status.installed && status.running);
        assert_eq!(status.models, vec!["llama3", "mistral"]);
    }

    #[test]
    fn tool_status_failures_zero_the_fields() {
        let tmp = tempfile::tempdir().unwrap();

        let bad_shape = ready_bridge(
            FakeHost::new().with_entry("ollama_status", Entry::Returns(json!("installed"))),
            tmp.path(),
        );
        let status = bad_shape.check_tool_status();
        assert!(!status.ok);
        assert!(!status.installed && !status.running && status.models.is_empty());
        assert!(status.error.starts_with("Unexpected result shape"));

        let missing = ready_bridge(FakeHost::new(), tmp.path());
        assert_eq!(missing.check_tool_status().error, "ollama_status missing");
    }
}
