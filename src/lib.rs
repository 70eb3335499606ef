//! Backend connector for the desktop shell.
//!
//! The UI depends on [`Connector`] only: it issues commands (start, health,
//! status, restart) and renders the [`ConnectorEvent`]s that come back.

pub mod backend;

pub use backend::{
    BackendEndpoint, Connector, ConnectorEvent, HealthStatus, Settings, StrategyKind, ToolStatus,
};
