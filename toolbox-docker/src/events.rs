use std::fmt;

use crate::service::ServiceState;

/// Lifecycle notifications published by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// The container of a service instance is running
    Started { service: String, state: ServiceState },

    /// A service instance passed its health check
    Healthy { service: String },

    /// A service instance failed to start or become healthy
    Failed { service: String, error: String },

    /// A service instance was stopped and removed
    Stopped { service: String },
}

impl ServiceEvent {
    /// The instance name the event refers to
    pub fn service(&self) -> &str {
        match self {
            ServiceEvent::Started { service, .. }
            | ServiceEvent::Healthy { service }
            | ServiceEvent::Failed { service, .. }
            | ServiceEvent::Stopped { service } => service,
        }
    }
}

impl fmt::Display for ServiceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceEvent::Started { service, state } => write!(f, "{service} started ({state})"),
            ServiceEvent::Healthy { service } => write!(f, "{service} is healthy"),
            ServiceEvent::Failed { service, error } => write!(f, "{service} failed: {error}"),
            ServiceEvent::Stopped { service } => write!(f, "{service} stopped"),
        }
    }
}
