//! Container orchestration for local development networks.
//!
//! A compose project is translated into [`ServiceConfig`]s, sized through the
//! resource profiles and started by the [`Orchestrator`] in dependency order,
//! each dependent waiting for its dependencies to report healthy.

mod cleanup;
mod config;
mod engine;
mod events;
mod logger;
mod orchestrator;

pub mod compose;
pub mod error;
pub mod resources;
pub mod service;

pub use cleanup::{CleanupOptions, CleanupReport, cleanup_resources};
pub use config::*;
pub use engine::{Engine, ProgressStream};
pub use error::{DockerError, ErrorKind, Result};
pub use events::ServiceEvent;
pub use logger::{ColorRegistry, ServiceLogger};
pub use orchestrator::{Orchestrator, OrchestratorConfig, resolve_order};
pub use service::{ServiceState, ServiceUnit};

pub use toolbox_oci as oci;

use toolbox_util as util;
