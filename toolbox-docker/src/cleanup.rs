//! Pattern-based bulk removal of engine resources.
//!
//! Unlike [`Orchestrator::stop_all_services`](crate::Orchestrator::stop_all_services)
//! this ignores dependencies and works on whatever the engine reports.

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::{DockerError, ErrorKind, Result};
use crate::oci::{self, StopOptions};
use crate::util::glob::NameMatcher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupOptions {
    pub container_patterns: Vec<String>,
    pub network_patterns: Vec<String>,
    pub volume_patterns: Vec<String>,
    pub cleanup_containers: bool,
    pub cleanup_networks: bool,
    pub cleanup_volumes: bool,

    /// Remove running containers and in-use volumes without stopping first
    pub force: bool,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            container_patterns: Vec::new(),
            network_patterns: Vec::new(),
            volume_patterns: Vec::new(),
            cleanup_containers: true,
            cleanup_networks: true,
            cleanup_volumes: false,
            force: false,
        }
    }
}

/// What a cleanup removed and what it could not
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub containers: Vec<String>,
    pub networks: Vec<String>,
    pub volumes: Vec<String>,
    pub failures: Vec<(String, DockerError)>,
}

impl CleanupReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of removed resources
    pub fn removed(&self) -> usize {
        self.containers.len() + self.networks.len() + self.volumes.len()
    }

    // a resource that is already gone counts as removed
    fn record(&mut self, kind: &str, name: String, res: oci::Result<()>) -> bool {
        match res {
            Ok(()) => true,
            Err(e) if e.is_not_found() => {
                debug!("{kind} {name} already removed");
                true
            }
            Err(e) => {
                let err = DockerError::from(e);
                warn!("failed to remove {kind} {name}: {err}");
                self.failures.push((name, err));
                false
            }
        }
    }
}

fn matcher(patterns: &[String]) -> Result<NameMatcher> {
    NameMatcher::new(patterns).map_err(|e| {
        DockerError::new(
            ErrorKind::InvalidConfiguration,
            format!("invalid name pattern: {e}"),
        )
    })
}

/// Remove every container, network and volume whose name matches one of the
/// given patterns.
///
/// Containers go first so that networks and volumes are no longer in use.
/// Individual failures are collected in the report.
pub async fn cleanup_resources<E: Engine>(engine: &E, opts: CleanupOptions) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();

    if opts.cleanup_containers {
        let matcher = matcher(&opts.container_patterns)?;
        for container in engine.list_containers().await? {
            let Some(name) = container.names.iter().find(|n| matcher.is_match(n)).cloned() else {
                continue;
            };

            if !opts.force
                && let Err(e) = engine.stop_container(&name, StopOptions::default()).await
                && !e.is_not_modified()
                && !e.is_not_found()
            {
                warn!("failed to stop container {name}: {e}");
            }

            let res = engine.remove_container(&name, opts.force).await;
            if report.record("container", name.clone(), res) {
                info!("removed container {name}");
                report.containers.push(name);
            }
        }
    }

    if opts.cleanup_networks {
        let matcher = matcher(&opts.network_patterns)?;
        for name in engine.list_networks().await? {
            if !matcher.is_match(&name) {
                continue;
            }
            let res = engine.remove_network(&name).await;
            if report.record("network", name.clone(), res) {
                info!("removed network {name}");
                report.networks.push(name);
            }
        }
    }

    if opts.cleanup_volumes {
        let matcher = matcher(&opts.volume_patterns)?;
        for name in engine.list_volumes().await? {
            if !matcher.is_match(&name) {
                continue;
            }
            let res = engine.remove_volume(&name, opts.force).await;
            if report.record("volume", name.clone(), res) {
                info!("removed volume {name}");
                report.volumes.push(name);
            }
        }
    }

    Ok(report)
}
