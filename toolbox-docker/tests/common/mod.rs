//! In-memory engine for driving service units and the orchestrator in tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use futures_lite::stream;

use toolbox_docker::oci::{
    self, BuildOptions, ContainerCreateBody, ContainerHealth, ContainerState, ContainerStatus,
    ContainerSummary, ExecOutput, HealthStatus, LocalContainer, LocalImage, LocalNetwork,
    LocalVolume, LogStream, NetworkConfig, StopOptions, VolumeConfig,
};
use toolbox_docker::{Engine, ProgressStream};

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub running: bool,
    pub exit_code: Option<i64>,
    pub body: ContainerCreateBody,
}

#[derive(Debug, Default)]
pub struct State {
    pub images: HashSet<String>,
    pub containers: BTreeMap<String, FakeContainer>,
    pub networks: BTreeMap<String, LocalNetwork>,
    pub volumes: BTreeMap<String, LocalVolume>,

    /// Health reported on each inspect of a container. The last entry sticks.
    pub health: HashMap<String, VecDeque<HealthStatus>>,

    /// Containers that exit with the given code as soon as they start
    pub exits: HashMap<String, i64>,

    /// Containers whose graceful stop fails
    pub stuck: HashSet<String>,

    /// Every engine call, e.g. `create_container:db`
    pub calls: Vec<String>,
    next_id: usize,
}

impl State {
    fn call(&mut self, method: &str, name: &str) {
        self.calls.push(format!("{method}:{name}"));
    }

    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:04}", self.next_id)
    }
}

#[derive(Debug, Default)]
pub struct FakeEngine {
    state: Mutex<State>,
}

fn not_found(what: &str, name: &str) -> oci::Error {
    oci::Error::server(404, format!("No such {what}: {name}"))
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn with_image(self, image: &str) -> Self {
        self.state().images.insert(image.to_owned());
        self
    }

    pub fn with_health(self, container: &str, statuses: &[HealthStatus]) -> Self {
        self.state()
            .health
            .insert(container.to_owned(), statuses.iter().copied().collect());
        self
    }

    pub fn with_exit(self, container: &str, code: i64) -> Self {
        self.state().exits.insert(container.to_owned(), code);
        self
    }

    /// Add a container that was not created through the engine interface
    pub fn with_container(self, name: &str, running: bool) -> Self {
        {
            let mut state = self.state();
            let id = state.id("stale");
            state.containers.insert(
                name.to_owned(),
                FakeContainer {
                    id,
                    running,
                    exit_code: None,
                    body: ContainerCreateBody::default(),
                },
            );
        }
        self
    }

    /// Calls to `method`, in order, by resource name
    pub fn calls(&self, method: &str) -> Vec<String> {
        let prefix = format!("{method}:");
        self.state()
            .calls
            .iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(str::to_owned))
            .collect()
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.state().containers.get(name).cloned()
    }

    fn attach(state: &mut State, network: &str, id: &str) {
        if let Some(net) = state.networks.get_mut(network) {
            net.containers.push(id.to_owned());
        }
    }

    fn detach(state: &mut State, id: &str) {
        for net in state.networks.values_mut() {
            net.containers.retain(|c| c != id);
        }
    }
}

impl Engine for FakeEngine {
    async fn inspect_image(&self, image: &str) -> oci::Result<LocalImage> {
        let mut state = self.state();
        state.call("inspect_image", image);
        if state.images.contains(image) {
            Ok(LocalImage {
                id: format!("sha256:{image}"),
                tags: vec![image.to_owned()],
            })
        } else {
            Err(not_found("image", image))
        }
    }

    fn pull_image(&self, image: &str) -> ProgressStream {
        let mut state = self.state();
        state.call("pull_image", image);
        state.images.insert(image.to_owned());
        Box::pin(stream::iter(vec![Ok(format!("{image}: Pull complete"))]))
    }

    fn build_image(&self, tag: &str, _context: Vec<u8>, _opts: BuildOptions) -> ProgressStream {
        let mut state = self.state();
        state.call("build_image", tag);
        state.images.insert(tag.to_owned());
        Box::pin(stream::iter(vec![Ok("Successfully built".to_owned())]))
    }

    async fn list_containers(&self) -> oci::Result<Vec<ContainerSummary>> {
        let state = self.state();
        Ok(state
            .containers
            .iter()
            .map(|(name, c)| ContainerSummary {
                id: c.id.clone(),
                names: vec![name.clone()],
                labels: c.body.labels.clone().unwrap_or_default(),
            })
            .collect())
    }

    async fn inspect_container(&self, name: &str) -> oci::Result<LocalContainer> {
        let mut state = self.state();
        state.call("inspect_container", name);

        let has_check = {
            let container = state
                .containers
                .get(name)
                .ok_or_else(|| not_found("container", name))?;
            container.body.healthcheck.is_some()
        };
        let health = if has_check {
            let status = match state.health.get_mut(name) {
                Some(plan) if plan.len() > 1 => plan.pop_front().unwrap_or_default(),
                Some(plan) => plan.front().copied().unwrap_or_default(),
                None => HealthStatus::Healthy,
            };
            Some(ContainerHealth {
                status,
                last_output: (status == HealthStatus::Unhealthy)
                    .then(|| "connection refused\n".to_owned()),
            })
        } else {
            None
        };

        let container = &state.containers[name];
        Ok(LocalContainer {
            id: container.id.clone(),
            name: name.to_owned(),
            state: ContainerState {
                status: if container.running {
                    ContainerStatus::Running
                } else {
                    ContainerStatus::Exited
                },
                running: container.running,
                exit_code: container.exit_code,
                health,
            },
        })
    }

    async fn create_container(&self, name: &str, body: ContainerCreateBody) -> oci::Result<String> {
        let mut state = self.state();
        state.call("create_container", name);
        if state.containers.contains_key(name) {
            return Err(oci::Error::server(
                409,
                format!("Conflict. The container name \"/{name}\" is already in use"),
            ));
        }
        if let Some(image) = &body.image
            && !state.images.contains(image)
        {
            return Err(not_found("image", image));
        }

        let id = state.id("container");
        let network = body.host_config.as_ref().and_then(|h| h.network_mode.clone());
        state.containers.insert(
            name.to_owned(),
            FakeContainer {
                id: id.clone(),
                running: false,
                exit_code: None,
                body,
            },
        );
        if let Some(network) = network {
            Self::attach(&mut state, &network, &id);
        }
        Ok(id)
    }

    async fn start_container(&self, name: &str) -> oci::Result<()> {
        let mut state = self.state();
        state.call("start_container", name);
        let exit = state.exits.get(name).copied();
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| not_found("container", name))?;
        match exit {
            Some(code) => {
                container.running = false;
                container.exit_code = Some(code);
            }
            None => container.running = true,
        }
        Ok(())
    }

    async fn stop_container(&self, name: &str, _opts: StopOptions) -> oci::Result<()> {
        let mut state = self.state();
        state.call("stop_container", name);
        let stuck = state.stuck.contains(name);
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| not_found("container", name))?;
        if !container.running {
            return Err(oci::Error::server(304, "container already stopped"));
        }
        if stuck {
            return Err(oci::Error::server(500, "container did not stop in time"));
        }
        container.running = false;
        container.exit_code = Some(0);
        Ok(())
    }

    async fn kill_container(&self, name: &str) -> oci::Result<()> {
        let mut state = self.state();
        state.call("kill_container", name);
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| not_found("container", name))?;
        container.running = false;
        container.exit_code = Some(137);
        Ok(())
    }

    async fn remove_container(&self, name: &str, force: bool) -> oci::Result<()> {
        let mut state = self.state();
        state.call("remove_container", name);
        let running = state
            .containers
            .get(name)
            .ok_or_else(|| not_found("container", name))?
            .running;
        if running && !force {
            return Err(oci::Error::server(
                409,
                format!("You cannot remove a running container {name}"),
            ));
        }
        if let Some(container) = state.containers.remove(name) {
            Self::detach(&mut state, &container.id);
        }
        Ok(())
    }

    fn container_logs(&self, name: &str) -> LogStream {
        self.state().call("container_logs", name);
        Box::pin(stream::iter(vec![Ok(
            "2024-05-01T10:00:00Z ready\n".to_owned()
        )]))
    }

    async fn exec(&self, name: &str, cmd: Vec<String>) -> oci::Result<ExecOutput> {
        let mut state = self.state();
        state.call("exec", name);
        if !state.containers.get(name).is_some_and(|c| c.running) {
            return Err(oci::Error::server(409, format!("Container {name} is not running")));
        }
        Ok(ExecOutput {
            exit_code: 0,
            stdout: cmd.join(" "),
            stderr: String::new(),
        })
    }

    async fn create_network(&self, name: &str, config: NetworkConfig) -> oci::Result<String> {
        let mut state = self.state();
        state.call("create_network", name);
        let id = state.id("network");
        state.networks.insert(
            name.to_owned(),
            LocalNetwork {
                id: id.clone(),
                name: name.to_owned(),
                driver: config.driver,
                containers: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn inspect_network(&self, name: &str) -> oci::Result<LocalNetwork> {
        let mut state = self.state();
        state.call("inspect_network", name);
        state
            .networks
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("network", name))
    }

    async fn remove_network(&self, name: &str) -> oci::Result<()> {
        let mut state = self.state();
        state.call("remove_network", name);
        state
            .networks
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found("network", name))
    }

    async fn list_networks(&self) -> oci::Result<Vec<String>> {
        Ok(self.state().networks.keys().cloned().collect())
    }

    async fn create_volume(&self, name: &str, config: VolumeConfig) -> oci::Result<()> {
        let mut state = self.state();
        state.call("create_volume", name);
        state.volumes.insert(
            name.to_owned(),
            LocalVolume {
                name: name.to_owned(),
                driver: config.driver,
                mountpoint: format!("/var/lib/docker/volumes/{name}/_data"),
            },
        );
        Ok(())
    }

    async fn inspect_volume(&self, name: &str) -> oci::Result<LocalVolume> {
        let mut state = self.state();
        state.call("inspect_volume", name);
        state
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("volume", name))
    }

    async fn remove_volume(&self, name: &str, _force: bool) -> oci::Result<()> {
        let mut state = self.state();
        state.call("remove_volume", name);
        state
            .volumes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found("volume", name))
    }

    async fn list_volumes(&self) -> oci::Result<Vec<String>> {
        Ok(self.state().volumes.keys().cloned().collect())
    }
}
