//! Compose file input shapes.
//!
//! These types accept the loose forms Compose allows (string or list, list or
//! map, numbers where strings are expected) and are only read by the
//! translator.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ComposeFile {
    pub name: Option<String>,
    pub services: BTreeMap<String, ComposeService>,
    pub networks: BTreeMap<String, Option<ComposeNetwork>>,
    pub volumes: BTreeMap<String, Option<ComposeVolume>>,
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ComposeService {
    pub image: Option<String>,
    pub build: Option<ComposeBuild>,
    pub command: Option<Command>,
    pub entrypoint: Option<Command>,
    pub environment: Option<KeyValues>,
    pub env_file: OneOrMany<String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub hostname: Option<String>,
    pub domainname: Option<String>,
    pub ports: Vec<ComposePort>,
    pub expose: Vec<Scalar>,
    pub networks: Option<ComposeServiceNetworks>,
    pub network_mode: Option<String>,
    pub volumes: Vec<ComposeMount>,
    pub tmpfs: OneOrMany<String>,

    pub mem_limit: Option<Scalar>,
    pub mem_reservation: Option<Scalar>,
    pub memswap_limit: Option<Scalar>,
    pub mem_swappiness: Option<i64>,
    pub shm_size: Option<Scalar>,
    pub cpus: Option<Scalar>,
    pub cpu_shares: Option<i64>,
    pub cpuset: Option<String>,
    pub pids_limit: Option<i64>,
    pub oom_score_adj: Option<i64>,
    pub oom_kill_disable: Option<bool>,

    pub privileged: bool,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub devices: Vec<String>,
    pub security_opt: Vec<String>,
    pub read_only: bool,
    pub init: Option<bool>,
    pub extra_hosts: Option<KeyValues>,
    pub dns: OneOrMany<String>,

    pub restart: Option<String>,
    pub stop_signal: Option<String>,
    pub stop_grace_period: Option<Scalar>,
    pub healthcheck: Option<ComposeHealthCheck>,
    pub depends_on: Option<ComposeDependsOn>,
    pub deploy: Option<ComposeDeploy>,
    pub labels: Option<KeyValues>,
    pub logging: Option<ComposeLogging>,
    pub profiles: Vec<String>,
}

/// A scalar value that Compose allows as string, number or boolean
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum Scalar {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::String(s) => s.trim().parse().ok(),
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::Bool(_) => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::String(s) => s.fmt(f),
            Scalar::Int(i) => i.fmt(f),
            Scalar::Float(v) => v.fmt(f),
            Scalar::Bool(b) => b.fmt(f),
        }
    }
}

/// Either a single value or a list of values
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T: Clone> OneOrMany<T> {
    pub fn to_vec(&self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value.clone()],
            OneOrMany::Many(values) => values.clone(),
        }
    }
}

/// `KEY=VALUE` entries or a map, as used by environment, labels and extra hosts
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum KeyValues {
    List(Vec<String>),
    Map(BTreeMap<String, Option<Scalar>>),
}

impl KeyValues {
    /// Returns the entries as a map, splitting list entries on the first
    /// `separator`. Missing values become empty strings.
    pub fn to_map(&self, separator: char) -> BTreeMap<String, String> {
        match self {
            KeyValues::List(list) => list
                .iter()
                .map(|entry| match entry.split_once(separator) {
                    Some((key, value)) => (key.to_owned(), value.to_owned()),
                    None => (entry.clone(), String::new()),
                })
                .collect(),
            KeyValues::Map(map) => map
                .iter()
                .map(|(key, value)| {
                    let value = value.as_ref().map(|v| v.to_string()).unwrap_or_default();
                    (key.clone(), value)
                })
                .collect(),
        }
    }
}

/// A command given either as a shell string or as an argument list
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command(Vec<String>);

impl Deref for Command {
    type Target = Vec<String>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Command> for Vec<String> {
    fn from(value: Command) -> Self {
        value.0
    }
}

impl<'de> Deserialize<'de> for Command {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Command {
            String(String),
            List(Vec<String>),
        }

        let command = match Command::deserialize(deserializer)? {
            Command::String(cmd) => shell_words::split(&cmd).map_err(de::Error::custom)?,
            Command::List(cmd) => cmd,
        };

        Ok(Self(command))
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ComposeBuild {
    Context(String),
    Config(ComposeBuildConfig),
}

#[derive(Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(default)]
pub struct ComposeBuildConfig {
    pub context: Option<String>,
    pub dockerfile: Option<String>,
    pub args: Option<KeyValues>,
    pub target: Option<String>,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ComposePort {
    Long(ComposePortConfig),
    Short(Scalar),
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct ComposePortConfig {
    pub target: u16,
    pub published: Option<Scalar>,
    pub protocol: Option<String>,
    pub mode: Option<String>,
    pub host_ip: Option<String>,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ComposeServiceNetworks {
    List(Vec<String>),
    Map(BTreeMap<String, Option<ComposeServiceNetwork>>),
}

#[derive(Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(default)]
pub struct ComposeServiceNetwork {
    pub aliases: Vec<String>,
    pub ipv4_address: Option<String>,
    pub ipv6_address: Option<String>,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ComposeMount {
    Short(String),
    Long(ComposeMountConfig),
}

#[derive(Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(default)]
pub struct ComposeMountConfig {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub source: Option<String>,
    pub target: String,
    pub read_only: bool,
    pub bind: Option<ComposeBindOptions>,
    pub tmpfs: Option<ComposeTmpfsOptions>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(default)]
pub struct ComposeBindOptions {
    pub propagation: Option<String>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(default)]
pub struct ComposeTmpfsOptions {
    pub size: Option<Scalar>,
    pub mode: Option<u32>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(default)]
pub struct ComposeHealthCheck {
    /// A string runs through the container shell
    pub test: Option<OneOrMany<String>>,
    pub interval: Option<Scalar>,
    pub timeout: Option<Scalar>,
    pub start_period: Option<Scalar>,
    pub retries: Option<i64>,
    pub disable: bool,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ComposeDependsOn {
    List(Vec<String>),
    Map(BTreeMap<String, ComposeDependency>),
}

#[derive(Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(default)]
pub struct ComposeDependency {
    /// Kept as written, unknown conditions are reported during conversion
    pub condition: Option<String>,
    pub required: Option<bool>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(default)]
pub struct ComposeDeploy {
    pub replicas: Option<u32>,
    pub resources: Option<ComposeResources>,
    pub restart_policy: Option<ComposeRestartPolicy>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(default)]
pub struct ComposeResources {
    pub limits: Option<ComposeResourceSpec>,
    pub reservations: Option<ComposeResourceSpec>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(default)]
pub struct ComposeResourceSpec {
    pub cpus: Option<Scalar>,
    pub memory: Option<Scalar>,
    pub pids: Option<i64>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(default)]
pub struct ComposeRestartPolicy {
    pub condition: Option<String>,
    pub delay: Option<String>,
    pub max_attempts: Option<i64>,
    pub window: Option<String>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(default)]
pub struct ComposeLogging {
    pub driver: Option<String>,
    pub options: Option<KeyValues>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(default)]
pub struct ComposeNetwork {
    pub name: Option<String>,
    pub driver: Option<String>,
    pub external: Option<External>,
    pub internal: bool,
    pub labels: Option<KeyValues>,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(default)]
pub struct ComposeVolume {
    pub name: Option<String>,
    pub driver: Option<String>,
    pub driver_opts: Option<KeyValues>,
    pub external: Option<External>,
    pub labels: Option<KeyValues>,
}

/// `external: true` or the legacy `external: {name: ...}` form
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum External {
    Flag(bool),
    Named { name: String },
}

impl External {
    pub fn is_external(&self) -> bool {
        match self {
            External::Flag(flag) => *flag,
            External::Named { .. } => true,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            External::Flag(_) => None,
            External::Named { name } => Some(name),
        }
    }
}
