//! Backend Management Module
//!
//! Brings the backend online, either as a supervised executable reached
//! over HTTP or as a module embedded in this process, and reports its
//! health and tool status as events.

pub mod bridge;
pub mod config;
pub mod connector;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod process;
pub mod status;
pub mod strategy;
pub mod transport;

pub use config::{Settings, StrategyKind};
pub use connector::Connector;
pub use endpoint::BackendEndpoint;
pub use events::{ConnectorEvent, EventBus, HealthStatus, RequestCompletion, ToolStatus};
pub use process::{ProcessState, ProcessSupervisor};
