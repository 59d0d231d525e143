//! Internal service configuration.
//!
//! [`ServiceConfig`] is the single description of a container the rest of the
//! crate works with. It is populated by the compose translator (or built
//! directly by callers) and is never mutated once a service unit owns it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Declarative description of one service
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Service name, used as the container name of single-replica services
    pub name: String,

    /// Image to run. Mutually exclusive with `build`.
    pub image: Option<String>,

    /// Build the image locally instead of pulling it
    pub build: Option<BuildConfig>,

    pub command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub environment: Option<Environment>,

    /// Files with `KEY=VALUE` lines added to the environment
    pub env_file: Vec<PathBuf>,

    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub hostname: Option<String>,
    pub domainname: Option<String>,

    /// Published ports
    pub ports: Vec<PortMapping>,

    /// Ports exposed to linked services only, as `port[/protocol]`
    pub expose: Vec<String>,

    /// Additional networks the container is attached to
    pub networks: BTreeMap<String, ServiceNetwork>,
    pub network_mode: Option<String>,

    pub volumes: Vec<VolumeMount>,

    /// Tmpfs mounts as `path[:options]`
    pub tmpfs: Vec<String>,

    // Resource ceilings
    pub mem_limit: Option<String>,
    pub mem_reservation: Option<String>,
    pub memswap_limit: Option<String>,
    pub mem_swappiness: Option<i64>,
    pub shm_size: Option<String>,
    pub cpus: Option<f64>,
    pub cpu_shares: Option<i64>,
    pub cpuset: Option<String>,
    pub pids_limit: Option<i64>,
    pub oom_score_adj: Option<i64>,
    pub oom_kill_disable: Option<bool>,

    // Security
    pub privileged: bool,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,

    /// Device mappings as `host[:container[:permissions]]`
    pub devices: Vec<String>,
    pub security_opt: Vec<String>,
    pub read_only: bool,
    pub init: Option<bool>,

    pub extra_hosts: Vec<String>,
    pub dns: Vec<String>,

    /// Legacy restart policy, overridden by `deploy.restart_policy`
    pub restart: Option<String>,

    pub stop_signal: Option<String>,

    /// Seconds to wait for a graceful stop before killing the container
    pub stop_grace_period: Option<u64>,

    pub health_check: Option<HealthCheck>,

    /// Services that must be up before this one starts
    pub depends_on: BTreeMap<String, DependsOn>,

    pub deploy: Option<DeployConfig>,
    pub labels: BTreeMap<String, String>,
    pub logging: Option<LoggingConfig>,

    /// Profiles this service belongs to. Services without profiles are
    /// always part of the default set.
    pub profiles: Vec<String>,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>, condition: DependencyCondition) -> Self {
        self.depends_on.insert(
            name.into(),
            DependsOn {
                condition: Some(condition),
                required: true,
            },
        );
        self
    }

    pub fn with_health_check(mut self, health_check: HealthCheck) -> Self {
        self.health_check = Some(health_check);
        self
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.deploy.get_or_insert_with(Default::default).replicas = Some(replicas);
        self
    }

    /// Number of containers to run for this service.
    pub fn replicas(&self) -> u32 {
        self.deploy.as_ref().and_then(|d| d.replicas).unwrap_or(1)
    }

    /// The image the container runs, either pulled or produced by the build.
    pub fn image_name(&self) -> String {
        match &self.image {
            Some(image) => image.clone(),
            None => format!("{}:latest", self.name),
        }
    }

    /// Returns the health check unless it is explicitly disabled.
    pub fn active_health_check(&self) -> Option<&HealthCheck> {
        self.health_check.as_ref().filter(|hc| !hc.is_disabled())
    }
}

#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildConfig {
    /// Directory sent to the engine as build context
    pub context: PathBuf,

    /// Dockerfile path relative to the context, `Dockerfile` if unset
    pub dockerfile: Option<String>,

    pub args: BTreeMap<String, String>,
    pub target: Option<String>,
}

/// Container environment, either as `KEY=VALUE` entries or as a map
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum Environment {
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

impl Environment {
    /// Returns the environment as `KEY=VALUE` entries.
    pub fn to_list(&self) -> Vec<String> {
        match self {
            Environment::List(list) => list.clone(),
            Environment::Map(map) => map.iter().map(|(k, v)| format!("{k}={v}")).collect(),
        }
    }
}

#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    /// Port inside the container
    pub target: u16,

    /// Host port or port range, chosen by the engine if unset
    pub published: Option<String>,

    #[serde(default = "default_protocol")]
    pub protocol: String,

    pub mode: Option<String>,
    pub host_ip: Option<String>,
}

fn default_protocol() -> String {
    "tcp".to_owned()
}

impl PortMapping {
    pub fn new(target: u16) -> Self {
        Self {
            target,
            published: None,
            protocol: default_protocol(),
            mode: None,
            host_ip: None,
        }
    }

    /// The engine port key, e.g. `8080/tcp`
    pub fn port_key(&self) -> String {
        format!("{}/{}", self.target, self.protocol)
    }
}

#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceNetwork {
    pub aliases: Vec<String>,
    pub ipv4_address: Option<String>,
    pub ipv6_address: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MountType {
    #[default]
    Bind,
    Volume,
    Tmpfs,
}

#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct VolumeMount {
    #[serde(rename = "type")]
    pub kind: MountType,

    /// Host path or volume name, unused by tmpfs mounts
    pub source: Option<String>,
    pub target: String,
    pub read_only: bool,
    pub bind: Option<BindOptions>,
    pub tmpfs: Option<TmpfsOptions>,
}

#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct BindOptions {
    pub propagation: Option<String>,
}

#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct TmpfsOptions {
    /// Size in bytes or with a unit suffix
    pub size: Option<String>,

    /// File mode in octal
    pub mode: Option<u32>,
}

/// Container health check. Durations are in nanoseconds.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct HealthCheck {
    /// Probe command, e.g. `["CMD-SHELL", "pg_isready"]`
    pub test: Vec<String>,
    pub interval: Option<i64>,
    pub timeout: Option<i64>,
    pub start_period: Option<i64>,
    pub retries: Option<i64>,
    pub disable: bool,
}

impl HealthCheck {
    /// A health check running `cmd` through the container shell.
    pub fn shell(cmd: impl Into<String>) -> Self {
        Self {
            test: vec!["CMD-SHELL".to_owned(), cmd.into()],
            ..Default::default()
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disable || self.test.first().is_some_and(|t| t == "NONE")
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DependencyCondition {
    #[serde(rename = "service_started")]
    Started,

    #[serde(rename = "service_healthy")]
    Healthy,

    #[serde(rename = "service_completed_successfully")]
    CompletedSuccessfully,
}

impl fmt::Display for DependencyCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyCondition::Started => "service_started".fmt(f),
            DependencyCondition::Healthy => "service_healthy".fmt(f),
            DependencyCondition::CompletedSuccessfully => "service_completed_successfully".fmt(f),
        }
    }
}

impl FromStr for DependencyCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "service_started" => Ok(DependencyCondition::Started),
            "service_healthy" => Ok(DependencyCondition::Healthy),
            "service_completed_successfully" => Ok(DependencyCondition::CompletedSuccessfully),
            other => Err(format!("unknown dependency condition '{other}'")),
        }
    }
}

#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DependsOn {
    pub condition: Option<DependencyCondition>,

    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl Default for DependsOn {
    fn default() -> Self {
        Self {
            condition: Some(DependencyCondition::Started),
            required: true,
        }
    }
}

#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct DeployConfig {
    pub replicas: Option<u32>,
    pub resources: Option<DeployResources>,
    pub restart_policy: Option<RestartPolicyConfig>,
}

#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct DeployResources {
    pub limits: Option<ResourceSpec>,
    pub reservations: Option<ResourceSpec>,
}

#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ResourceSpec {
    pub cpus: Option<f64>,
    pub memory: Option<String>,
    pub pids: Option<i64>,
}

#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct RestartPolicyConfig {
    /// One of `none`, `on-failure` or `any`
    pub condition: Option<String>,
    pub delay: Option<String>,
    pub max_attempts: Option<i64>,
    pub window: Option<String>,
}

#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    pub driver: Option<String>,
    pub options: BTreeMap<String, String>,
}

/// A network declared at the project level
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkDefinition {
    /// Engine-side name, the project key if unset
    pub name: Option<String>,
    pub driver: Option<String>,

    /// Managed outside the project, never created or removed
    pub external: bool,
    pub internal: bool,
    pub labels: BTreeMap<String, String>,
}

/// A named volume declared at the project level
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct VolumeDefinition {
    /// Engine-side name, the project key if unset
    pub name: Option<String>,
    pub driver: Option<String>,
    pub driver_opts: BTreeMap<String, String>,

    /// Managed outside the project, never created or removed
    pub external: bool,
    pub labels: BTreeMap<String, String>,
}
