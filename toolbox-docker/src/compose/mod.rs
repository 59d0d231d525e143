//! Compose translation.
//!
//! Converts Compose-style declarations into the internal [`ServiceConfig`]
//! shape. Conversion is best-effort: unsupported values are skipped with a
//! warning and durations that cannot be parsed fall back to a default.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::config::{NetworkDefinition, ServiceConfig, VolumeDefinition};
use crate::error::{DockerError, ErrorKind, Result};

mod convert;
mod model;
mod validate;

pub use convert::{
    DEFAULT_TIME_SECS, convert_compose_network, convert_compose_service, convert_compose_volume,
    parse_time,
};
pub use model::*;
pub use validate::{should_include_service, validate_service_config};

/// Services, networks and volumes of a converted Compose file
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct ComposeProject {
    pub name: Option<String>,
    pub services: BTreeMap<String, ServiceConfig>,
    pub networks: BTreeMap<String, NetworkDefinition>,
    pub volumes: BTreeMap<String, VolumeDefinition>,
}

impl ComposeProject {
    /// Resolve relative build contexts, env files and bind sources against
    /// the directory of the Compose file.
    pub fn with_base_dir(mut self, base: &Path) -> Self {
        for config in self.services.values_mut() {
            convert::resolve_service_paths(config, base);
        }
        self
    }

    /// Service configs ordered by name
    pub fn service_configs(&self) -> Vec<ServiceConfig> {
        self.services.values().cloned().collect()
    }
}

/// Convert a whole Compose file, keeping only the services enabled by
/// `active_profiles`.
pub fn convert_compose_file(file: &ComposeFile, active_profiles: &[String]) -> ComposeProject {
    let services = file
        .services
        .iter()
        .map(|(name, service)| (name.clone(), convert_compose_service(name, service)))
        .filter(|(_, config)| should_include_service(config, active_profiles))
        .collect();

    let networks = file
        .networks
        .iter()
        .map(|(name, network)| (name.clone(), convert_compose_network(name, network.as_ref())))
        .collect();

    let volumes = file
        .volumes
        .iter()
        .map(|(name, volume)| (name.clone(), convert_compose_volume(name, volume.as_ref())))
        .collect();

    ComposeProject {
        name: file.name.clone(),
        services,
        networks,
        volumes,
    }
}

/// Parse a Compose YAML document
pub fn parse_compose_file(contents: &str) -> Result<ComposeFile> {
    serde_yaml::from_str(contents).map_err(|e| {
        DockerError::new(
            ErrorKind::InvalidConfiguration,
            format!("invalid compose file: {e}"),
        )
    })
}

/// Read and parse a Compose YAML file
pub fn load_compose_file(path: impl AsRef<Path>) -> Result<ComposeFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        DockerError::new(
            ErrorKind::InvalidConfiguration,
            format!("failed to read {}: {e}", path.display()),
        )
    })?;
    parse_compose_file(&contents)
}
