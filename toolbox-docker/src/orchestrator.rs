//! Dependency-ordered startup and reverse-ordered teardown of service groups.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{DependencyCondition, ServiceConfig, VolumeDefinition};
use crate::engine::Engine;
use crate::error::{DockerError, ErrorKind, Result};
use crate::events::ServiceEvent;
use crate::logger::ColorRegistry;
use crate::oci::{NetworkConfig, VolumeConfig};
use crate::resources::{apply_resource_limits, validate_resource_limits};
use crate::service::{DEFAULT_HEALTH_INTERVAL, DEFAULT_HEALTH_TIMEOUT, InstanceSpec, ServiceUnit};

const EVENT_CAPACITY: usize = 256;

/// Orchestrator settings
#[serde_as]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Network shared by every service
    pub network_name: String,
    pub network_driver: String,

    /// Volumes created before any service starts
    pub volumes: BTreeMap<String, VolumeDefinition>,

    /// Wait for health-gated dependencies
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "healthTimeoutMs")]
    pub health_timeout: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "healthIntervalMs")]
    pub health_interval: Duration,

    /// Labels added to every container, network and volume
    pub labels: BTreeMap<String, String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            network_name: "toolbox-network".to_owned(),
            network_driver: "bridge".to_owned(),
            volumes: BTreeMap::new(),
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            health_interval: DEFAULT_HEALTH_INTERVAL,
            labels: BTreeMap::new(),
        }
    }
}

/// Compute the start order of a batch of services.
///
/// Dependencies come before their dependents, otherwise input order is kept.
/// Dependencies on services outside the batch are ignored with a warning.
pub fn resolve_order(configs: &[ServiceConfig]) -> Result<Vec<String>> {
    let names: HashSet<&str> = configs.iter().map(|c| c.name.as_str()).collect();

    let mut graph: Vec<(&str, Vec<&str>)> = Vec::with_capacity(configs.len());
    for config in configs {
        let mut deps = Vec::new();
        for dep in config.depends_on.keys() {
            if names.contains(dep.as_str()) {
                deps.push(dep.as_str());
            } else {
                warn!(service = %config.name, "ignoring unknown dependency '{dep}'");
            }
        }
        graph.push((config.name.as_str(), deps));
    }
    let graph: HashMap<&str, &Vec<&str>> = graph.iter().map(|(n, d)| (*n, d)).collect();

    fn visit<'a>(
        node: &'a str,
        graph: &HashMap<&'a str, &Vec<&'a str>>,
        path: &mut Vec<&'a str>,
        visited: &mut HashSet<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        if visited.contains(node) {
            return Ok(());
        }
        if let Some(pos) = path.iter().position(|n| *n == node) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(node);
            return Err(DockerError::new(
                ErrorKind::DependencyFailed,
                format!("circular dependency detected: {}", cycle.join(" -> ")),
            ));
        }

        path.push(node);
        for dep in graph.get(node).into_iter().flat_map(|deps| deps.iter()) {
            visit(*dep, graph, path, visited, order)?;
        }
        path.pop();

        visited.insert(node);
        order.push(node.to_owned());
        Ok(())
    }

    let mut order = Vec::with_capacity(configs.len());
    let mut visited = HashSet::new();
    let mut path = Vec::new();
    for config in configs {
        visit(&config.name, &graph, &mut path, &mut visited, &mut order)?;
    }

    Ok(order)
}

/// Starts and stops groups of services on a shared network
pub struct Orchestrator<E> {
    engine: Arc<E>,
    config: OrchestratorConfig,
    network_id: Option<String>,
    groups: Vec<(String, Vec<ServiceUnit<E>>)>,
    colors: ColorRegistry,
    events: broadcast::Sender<ServiceEvent>,
}

impl<E: Engine> Orchestrator<E> {
    pub fn new(engine: Arc<E>, config: OrchestratorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            engine,
            config,
            network_id: None,
            groups: Vec::new(),
            colors: ColorRegistry::new(),
            events,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Receive lifecycle events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ServiceEvent) {
        debug!("{event}");
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    /// Instance names of every running service, in start order
    pub fn running_services(&self) -> Vec<&str> {
        self.groups
            .iter()
            .flat_map(|(_, units)| units.iter().map(|u| u.name()))
            .collect()
    }

    /// Instances of a started group
    pub fn group(&self, name: &str) -> Option<&[ServiceUnit<E>]> {
        self.groups
            .iter()
            .find(|(group, _)| group == name)
            .map(|(_, units)| units.as_slice())
    }

    fn group_mut(&mut self, name: &str) -> Option<&mut Vec<ServiceUnit<E>>> {
        self.groups
            .iter_mut()
            .find(|(group, _)| group == name)
            .map(|(_, units)| units)
    }

    fn labels(&self) -> HashMap<String, String> {
        self.config.labels.clone().into_iter().collect()
    }

    /// Return the id of the shared network, creating it if needed
    pub async fn get_or_create_network(&mut self) -> Result<String> {
        if let Some(id) = &self.network_id {
            return Ok(id.clone());
        }

        let name = self.config.network_name.clone();
        let id = match self.engine.inspect_network(&name).await {
            Ok(network) => {
                debug!(network = %name, "using existing network");
                network.id
            }
            Err(e) if e.is_not_found() => {
                let config = NetworkConfig {
                    driver: self.config.network_driver.clone(),
                    internal: false,
                    labels: self.labels(),
                };
                let id = self.engine.create_network(&name, config).await.map_err(|e| {
                    let e = DockerError::from(e);
                    e.log();
                    e
                })?;
                info!(network = %name, "created network");
                id
            }
            Err(e) => {
                let e = DockerError::from(e);
                e.log();
                return Err(e);
            }
        };

        self.network_id = Some(id.clone());
        Ok(id)
    }

    /// Create the configured volumes that do not exist yet
    pub async fn ensure_volumes(&self) -> Result<()> {
        for (key, volume) in &self.config.volumes {
            let name = volume.name.as_deref().unwrap_or(key);
            match self.engine.inspect_volume(name).await {
                Ok(_) => debug!(volume = %name, "volume exists"),
                Err(e) if e.is_not_found() && volume.external => {
                    warn!(volume = %name, "external volume does not exist");
                }
                Err(e) if e.is_not_found() => {
                    let mut labels = self.labels();
                    labels.extend(volume.labels.clone());
                    let config = VolumeConfig {
                        driver: volume.driver.clone().unwrap_or_else(|| "local".to_owned()),
                        driver_opts: volume.driver_opts.clone().into_iter().collect(),
                        labels,
                    };
                    self.engine.create_volume(name, config).await.map_err(|e| {
                        let e = DockerError::from(e);
                        e.log();
                        e
                    })?;
                    info!(volume = %name, "created volume");
                }
                Err(e) => warn!(volume = %name, "failed to check volume: {e}"),
            }
        }
        Ok(())
    }

    /// Wait for the dependencies of a group that gate on health or completion
    async fn wait_for_dependencies(&mut self, config: &ServiceConfig) -> Result<()> {
        let timeout = self.config.health_timeout;
        let interval = self.config.health_interval;

        for (dep, depends_on) in &config.depends_on {
            let condition = match depends_on.condition {
                Some(c @ (DependencyCondition::Healthy | DependencyCondition::CompletedSuccessfully)) => c,
                _ => continue,
            };

            let events = self.events.clone();
            let units = match self.group_mut(dep) {
                Some(units) if !units.is_empty() => units,
                _ if !depends_on.required => {
                    warn!(service = %config.name, "optional dependency '{dep}' is not started, skipping");
                    continue;
                }
                _ => {
                    let err = DockerError::new(
                        ErrorKind::DependencyFailed,
                        format!("dependency '{dep}' is not started or has no instances"),
                    )
                    .with_service(&config.name);
                    err.log();
                    return Err(err);
                }
            };

            info!(service = %config.name, "waiting for '{dep}' ({condition})");
            let results = join_all(units.iter_mut().map(|unit| {
                let events = events.clone();
                async move {
                    let res = match condition {
                        DependencyCondition::CompletedSuccessfully => {
                            unit.wait_for_completion(timeout, interval).await
                        }
                        _ => unit.wait_for_healthy(timeout, interval).await,
                    };
                    let event = match &res {
                        Ok(()) if condition == DependencyCondition::Healthy => {
                            Some(ServiceEvent::Healthy {
                                service: unit.name().to_owned(),
                            })
                        }
                        Ok(()) => None,
                        Err(e) => Some(ServiceEvent::Failed {
                            service: unit.name().to_owned(),
                            error: e.to_string(),
                        }),
                    };
                    if let Some(event) = event {
                        let _ = events.send(event);
                    }
                    res
                }
            }))
            .await;

            if let Some(err) = results.into_iter().find_map(|r| r.err()) {
                let err = DockerError::new(
                    ErrorKind::DependencyFailed,
                    format!("dependency '{dep}' did not become ready: {err}"),
                )
                .with_service(&config.name);
                err.log();
                return Err(err);
            }
        }

        Ok(())
    }

    /// Start a batch of services in dependency order.
    ///
    /// Each service is expanded into its replicas, which start one after the
    /// other. The first failure aborts the call; instances started so far
    /// keep running and are stopped by [`Orchestrator::stop_all_services`].
    pub async fn start_services(&mut self, configs: Vec<ServiceConfig>) -> Result<()> {
        let order = resolve_order(&configs).inspect_err(|e| e.log())?;

        let network = self.get_or_create_network().await?;
        self.ensure_volumes().await?;
        debug!(network = %network, "start order: {}", order.join(", "));

        let mut configs: HashMap<String, ServiceConfig> =
            configs.into_iter().map(|c| (c.name.clone(), c)).collect();

        for group in order {
            let Some(config) = configs.remove(&group) else {
                continue;
            };
            let config = apply_resource_limits(&config, None);
            validate_resource_limits(&config).inspect_err(|e| e.log())?;

            let replicas = config.replicas();
            self.groups.push((group.clone(), Vec::new()));

            for index in 0..replicas {
                self.wait_for_dependencies(&config).await?;

                let name = if replicas > 1 {
                    format!("{group}-{}", index + 1)
                } else {
                    group.clone()
                };
                let instance = InstanceSpec {
                    group: group.clone(),
                    name: name.clone(),
                    network: Some(self.config.network_name.clone()),
                    labels: self.config.labels.clone(),
                };
                let logger = self.colors.logger(&name);
                let mut unit =
                    ServiceUnit::new(self.engine.clone(), config.clone(), instance, logger);

                let res = unit.start().await;
                let event = match &res {
                    Ok(_) => ServiceEvent::Started {
                        service: name.clone(),
                        state: unit.state(),
                    },
                    Err(e) => ServiceEvent::Failed {
                        service: name.clone(),
                        error: e.to_string(),
                    },
                };
                self.emit(event);

                // record even failed units so teardown finds their containers
                if let Some(units) = self.group_mut(&group) {
                    units.push(unit);
                }
                res?;
            }

            info!(service = %group, "started {replicas} instance(s)");
        }

        Ok(())
    }

    /// Forward the output of every running instance
    pub async fn stream_all_logs(&mut self) -> Result<()> {
        for (_, units) in self.groups.iter_mut() {
            for unit in units.iter_mut() {
                unit.stream_logs().await?;
            }
        }
        Ok(())
    }

    /// Stop and remove every started instance, then the shared network.
    ///
    /// Groups are torn down in reverse start order, the instances of a group
    /// concurrently. Failures are logged and do not stop the teardown.
    pub async fn stop_all_services(&mut self) {
        for (_, units) in self.groups.iter_mut() {
            for unit in units.iter_mut() {
                unit.stop_log_stream();
            }
        }

        let groups = std::mem::take(&mut self.groups);
        for (group, mut units) in groups.into_iter().rev() {
            info!(service = %group, "stopping");
            let events = self.events.clone();
            join_all(units.iter_mut().map(|unit| {
                let events = events.clone();
                async move {
                    if let Err(e) = unit.stop().await {
                        warn!(service = %unit.name(), "failed to stop: {e}");
                    }
                    match unit.remove().await {
                        Ok(()) => {
                            let _ = events.send(ServiceEvent::Stopped {
                                service: unit.name().to_owned(),
                            });
                        }
                        Err(e) => warn!(service = %unit.name(), "failed to remove: {e}"),
                    }
                }
            }))
            .await;
        }

        self.remove_network().await;
    }

    async fn remove_network(&mut self) {
        if self.network_id.take().is_none() {
            return;
        }

        let name = self.config.network_name.clone();
        match self.engine.inspect_network(&name).await {
            Ok(network) if !network.containers.is_empty() => {
                warn!(
                    network = %name,
                    "network still has {} attached container(s), leaving it for manual cleanup",
                    network.containers.len()
                );
                return;
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => return,
            Err(e) => {
                warn!(network = %name, "failed to inspect network: {e}");
                return;
            }
        }

        match self.engine.remove_network(&name).await {
            Ok(()) => info!(network = %name, "removed network"),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(network = %name, "failed to remove network: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service(name: &str, deps: &[&str]) -> ServiceConfig {
        deps.iter().fold(ServiceConfig::new(name).with_image(name), |config, dep| {
            config.with_dependency(*dep, DependencyCondition::Started)
        })
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn dependencies_come_first_in_any_input_order() {
        let a = service("a", &[]);
        let b = service("b", &["a"]);
        let c = service("c", &["a", "b"]);

        for configs in [
            vec![a.clone(), b.clone(), c.clone()],
            vec![c.clone(), b.clone(), a.clone()],
            vec![b.clone(), c.clone(), a.clone()],
        ] {
            let order = resolve_order(&configs).unwrap();
            assert_eq!(order.len(), 3);
            assert!(position(&order, "a") < position(&order, "b"));
            assert!(position(&order, "b") < position(&order, "c"));
        }
    }

    #[test]
    fn independent_services_keep_input_order() {
        let order = resolve_order(&[service("z", &[]), service("m", &[]), service("a", &[])]).unwrap();
        assert_eq!(order, vec!["z", "m", "a"]);
    }

    #[test]
    fn it_detects_cycles() {
        let err = resolve_order(&[service("a", &["b"]), service("b", &["a"])]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DependencyFailed);
        assert!(err.message().contains("circular dependency"));
        assert!(err.message().contains("a -> b -> a"));
    }

    #[test]
    fn it_detects_self_dependencies() {
        let err = resolve_order(&[service("a", &["a"])]).unwrap_err();
        assert!(err.message().contains("circular dependency"));
    }

    #[test]
    fn unknown_dependencies_are_dropped() {
        let order = resolve_order(&[service("api", &["missing"])]).unwrap();
        assert_eq!(order, vec!["api"]);
    }

    #[test]
    fn config_defaults() {
        let config: OrchestratorConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.network_name, "toolbox-network");
        assert_eq!(config.health_timeout, Duration::from_secs(120));

        let config: OrchestratorConfig =
            serde_json::from_value(json!({"networkName": "devnet", "healthTimeoutMs": 5000}))
                .unwrap();
        assert_eq!(config.network_name, "devnet");
        assert_eq!(config.health_timeout, Duration::from_millis(5000));
        assert_eq!(config.health_interval, Duration::from_secs(1));
    }
}
