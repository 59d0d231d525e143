use std::collections::HashMap;
use std::pin::Pin;

use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, ContainerInspectResponse, ContainerStateStatusEnum};
use bollard::query_parameters::{
    CreateContainerOptions, InspectContainerOptions, KillContainerOptions, ListContainersOptions,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::secret::HealthStatusEnum;
use futures_lite::{Stream, StreamExt};

use super::{Client, Error, Result, WithContext};

#[derive(Debug, Clone)]
pub struct Container<'a>(&'a Client);

impl<'a> Container<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self(client)
    }
}

impl Container<'_> {
    /// Returns the list of containers on the server, including stopped ones.
    pub async fn list(&self) -> Result<Vec<ContainerSummary>> {
        let opts = ListContainersOptions {
            all: true,
            ..Default::default()
        };

        let res = self.0.inner().list_containers(Some(opts)).await;
        let containers = res.map_err(Error::with_context("failed to list containers"))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let names = c
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .map(|n| n.trim_start_matches('/').to_owned())
                    .collect();
                Some(ContainerSummary {
                    id,
                    names,
                    labels: c.labels.unwrap_or_default(),
                })
            })
            .collect())
    }

    /// Returns low-level information about a container.
    pub async fn inspect(&self, name: &str) -> Result<LocalContainer> {
        let res = self
            .0
            .inner()
            .inspect_container(name, None::<InspectContainerOptions>)
            .await;
        let info = res
            .map_err(Error::from)
            .with_context(|| format!("failed to inspect container {name}"))?;

        info.try_into()
            .with_context(|| format!("failed to inspect container {name}"))
    }

    /// Create a container with the given name, returning its engine id
    pub async fn create(&self, name: &str, config: ContainerCreateBody) -> Result<String> {
        let options = Some(CreateContainerOptions {
            name: Some(name.to_owned()),
            ..Default::default()
        });

        let res = self.0.inner().create_container(options, config).await;
        let res = res
            .map_err(Error::from)
            .with_context(|| format!("failed to create container {name}"))?;

        Ok(res.id)
    }

    pub async fn start(&self, name: &str) -> Result<()> {
        self.0
            .inner()
            .start_container(name, None::<StartContainerOptions>)
            .await
            .map_err(Error::from)
            .with_context(|| format!("failed to start container {name}"))
    }

    /// Stop a running container, sending the configured signal and waiting
    /// for the grace period before the engine kills it.
    pub async fn stop(&self, name: &str, opts: StopOptions) -> Result<()> {
        let options = StopContainerOptions {
            signal: opts.signal,
            t: opts.grace_period_secs,
        };

        self.0
            .inner()
            .stop_container(name, Some(options))
            .await
            .map_err(Error::from)
            .with_context(|| format!("failed to stop container {name}"))
    }

    pub async fn kill(&self, name: &str) -> Result<()> {
        let options = KillContainerOptions {
            signal: "SIGKILL".to_owned(),
        };

        self.0
            .inner()
            .kill_container(name, Some(options))
            .await
            .map_err(Error::from)
            .with_context(|| format!("failed to kill container {name}"))
    }

    /// Remove a container, killing it first if `force` is set.
    pub async fn remove(&self, name: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            v: false,
            ..Default::default()
        };

        self.0
            .inner()
            .remove_container(name, Some(options))
            .await
            .map_err(Error::from)
            .with_context(|| format!("failed to remove container {name}"))
    }

    /// Follows the container output, yielding one chunk of text per item.
    ///
    /// The stream ends when the container stops.
    pub fn logs(&self, name: &str) -> LogStream {
        let options = LogsOptions {
            follow: true,
            stdout: true,
            stderr: true,
            timestamps: true,
            tail: "all".to_owned(),
            ..Default::default()
        };

        let container = name.to_owned();
        let stream = self.0.inner().logs(name, Some(options)).map(move |res| {
            res.map(|output: LogOutput| String::from_utf8_lossy(&output.into_bytes()).into_owned())
                .map_err(|e| Error::from(e).context(format!("failed to read logs from {container}")))
        });

        Box::pin(stream)
    }

    /// Run a command in a running container and collect its output.
    pub async fn exec(&self, name: &str, cmd: Vec<String>) -> Result<ExecOutput> {
        let options = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(cmd),
            ..Default::default()
        };

        let exec = self
            .0
            .inner()
            .create_exec(name, options)
            .await
            .map_err(Error::from)
            .with_context(|| format!("failed to create exec on container {name}"))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        let started = self
            .0
            .inner()
            .start_exec(&exec.id, None)
            .await
            .map_err(Error::from)
            .with_context(|| format!("failed to start exec on container {name}"))?;

        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(chunk) = output.next().await {
                match chunk.map_err(Error::from)? {
                    LogOutput::StdErr { message } => {
                        stderr.push_str(&String::from_utf8_lossy(&message))
                    }
                    other => stdout.push_str(&String::from_utf8_lossy(&other.into_bytes())),
                }
            }
        }

        let inspect = self
            .0
            .inner()
            .inspect_exec(&exec.id)
            .await
            .map_err(Error::from)
            .with_context(|| format!("failed to inspect exec on container {name}"))?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or_default(),
            stdout,
            stderr,
        })
    }
}

/// Text output of a container, chunked as received from the engine.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Options for a graceful stop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopOptions {
    /// Signal to send instead of the image's configured stop signal
    pub signal: Option<String>,

    /// Seconds to wait before killing the container
    pub grace_period_secs: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,

    /// Container names without the leading `/`
    pub names: Vec<String>,

    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    #[default]
    Unknown,
}

impl From<ContainerStateStatusEnum> for ContainerStatus {
    fn from(value: ContainerStateStatusEnum) -> Self {
        match value {
            ContainerStateStatusEnum::CREATED => Self::Created,
            ContainerStateStatusEnum::RUNNING => Self::Running,
            ContainerStateStatusEnum::PAUSED => Self::Paused,
            ContainerStateStatusEnum::RESTARTING => Self::Restarting,
            ContainerStateStatusEnum::REMOVING => Self::Removing,
            ContainerStateStatusEnum::EXITED => Self::Exited,
            ContainerStateStatusEnum::DEAD => Self::Dead,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HealthStatus {
    #[default]
    None,
    Starting,
    Healthy,
    Unhealthy,
}

impl From<HealthStatusEnum> for HealthStatus {
    fn from(value: HealthStatusEnum) -> Self {
        match value {
            HealthStatusEnum::STARTING => Self::Starting,
            HealthStatusEnum::HEALTHY => Self::Healthy,
            HealthStatusEnum::UNHEALTHY => Self::Unhealthy,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerHealth {
    pub status: HealthStatus,

    /// Output of the most recent health probe
    pub last_output: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerState {
    pub status: ContainerStatus,
    pub running: bool,
    pub exit_code: Option<i64>,

    /// Only set if the container defines a health check
    pub health: Option<ContainerHealth>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalContainer {
    /// The engine id of the container
    pub id: String,

    /// The container name without the leading `/`
    pub name: String,

    pub state: ContainerState,
}

impl TryFrom<ContainerInspectResponse> for LocalContainer {
    type Error = Error;

    fn try_from(value: ContainerInspectResponse) -> Result<Self> {
        let id = value.id.ok_or("container ID should not be nil")?;
        let name = value
            .name
            .map(|n| n.trim_start_matches('/').to_owned())
            .unwrap_or_default();

        let state = value
            .state
            .map(|s| {
                let health = s.health.map(|h| ContainerHealth {
                    status: h.status.map(HealthStatus::from).unwrap_or_default(),
                    last_output: h
                        .log
                        .and_then(|log| log.into_iter().last())
                        .and_then(|probe| probe.output)
                        .map(|out| out.trim().to_owned())
                        .filter(|out| !out.is_empty()),
                });
                ContainerState {
                    status: s.status.map(ContainerStatus::from).unwrap_or_default(),
                    running: s.running.unwrap_or(false),
                    exit_code: s.exit_code,
                    health,
                }
            })
            .unwrap_or_default();

        Ok(Self { id, name, state })
    }
}
