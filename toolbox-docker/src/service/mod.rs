//! Service unit.
//!
//! A [`ServiceUnit`] owns the lifecycle of one container: image preparation,
//! creation, start, health polling, stop, removal, log streaming and exec.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ServiceConfig;
use crate::engine::Engine;
use crate::error::{DockerError, ErrorContext, ErrorKind, Result, RetryOptions, with_retry};
use crate::logger::ServiceLogger;
use crate::oci::{self, BuildOptions, ContainerCreateBody, ExecOutput, HealthStatus, StopOptions};
use crate::util::tar::pack_dir;

mod logs;
mod runtime;

pub use logs::clean_log_line;
pub use runtime::{INSTANCE_LABEL, InstanceSpec, SERVICE_LABEL, container_create_body};

/// Default wait for a health check to pass
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(120);

/// Default delay between health polls
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(1);

/// Grace period used when no stop grace period is configured
pub const DEFAULT_STOP_GRACE_PERIOD: u64 = 10;

const BUILD_EXCLUDES: [&str; 2] = ["node_modules", ".git"];

/// Lifecycle state of a service unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServiceState {
    #[default]
    Created,
    ImagePrepared,
    ContainerCreated,
    Running,
    HealthPending,
    Healthy,
    Unhealthy,
    Stopping,
    Stopped,
    Removed,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            ServiceState::Created => "created",
            ServiceState::ImagePrepared => "image prepared",
            ServiceState::ContainerCreated => "container created",
            ServiceState::Running => "running",
            ServiceState::HealthPending => "health pending",
            ServiceState::Healthy => "healthy",
            ServiceState::Unhealthy => "unhealthy",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
            ServiceState::Removed => "removed",
        };
        state.fmt(f)
    }
}

/// Lifecycle wrapper around one container
pub struct ServiceUnit<E> {
    engine: Arc<E>,
    config: ServiceConfig,
    instance: InstanceSpec,
    logger: ServiceLogger,
    container_id: Option<String>,
    state: ServiceState,
    health_check_failed: bool,
    log_task: Option<JoinHandle<()>>,
}

impl<E> fmt::Debug for ServiceUnit<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceUnit")
            .field("name", &self.instance.name)
            .field("container_id", &self.container_id)
            .field("state", &self.state)
            .finish()
    }
}

impl<E: Engine> ServiceUnit<E> {
    pub fn new(
        engine: Arc<E>,
        config: ServiceConfig,
        instance: InstanceSpec,
        logger: ServiceLogger,
    ) -> Self {
        Self {
            engine,
            config,
            instance,
            logger,
            container_id: None,
            state: ServiceState::Created,
            health_check_failed: false,
            log_task: None,
        }
    }

    /// Container name of the instance
    pub fn name(&self) -> &str {
        &self.instance.name
    }

    /// Service group the instance belongs to
    pub fn group(&self) -> &str {
        &self.instance.group
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// True if the last health wait timed out
    pub fn health_check_failed(&self) -> bool {
        self.health_check_failed
    }

    pub fn is_streaming_logs(&self) -> bool {
        self.log_task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn context(&self) -> ErrorContext {
        ErrorContext {
            service: Some(self.instance.name.clone()),
            container: Some(
                self.container_id
                    .clone()
                    .unwrap_or_else(|| self.instance.name.clone()),
            ),
        }
    }

    /// Classify and log an engine failure
    fn engine_error(&self, err: &oci::Error) -> DockerError {
        let err = DockerError::from_engine(err, Some(self.context()));
        err.log();
        err
    }

    /// Attach context to and log a failure
    fn failure(&self, kind: ErrorKind, message: String) -> DockerError {
        let mut err = DockerError::new(kind, message).with_service(&self.instance.name);
        if let Some(id) = &self.container_id {
            err = err.with_container(id);
        }
        err.log();
        err
    }

    /// Make the service image available locally.
    ///
    /// Services with a build section are always built. Otherwise the image is
    /// pulled only if it is not present.
    pub async fn prepare_image(&mut self) -> Result<()> {
        let image = self.config.image_name();

        if let Some(build) = &self.config.build {
            self.logger.start(&format!("building image {image}"));

            let context = pack_dir(&build.context, &BUILD_EXCLUDES).map_err(|e| {
                self.failure(
                    ErrorKind::BuildFailed,
                    format!(
                        "failed to read build context {}: {e}",
                        build.context.display()
                    ),
                )
            })?;

            let opts = BuildOptions {
                dockerfile: build
                    .dockerfile
                    .clone()
                    .unwrap_or_else(|| "Dockerfile".to_owned()),
                args: build.args.clone().into_iter().collect::<HashMap<_, _>>(),
                target: build.target.clone(),
            };

            let logger = &self.logger;
            let stream = self.engine.build_image(&image, context, opts);
            oci::follow_progress(stream, |line| logger.debug(&line))
                .await
                .map_err(|e| self.failure(ErrorKind::BuildFailed, e.to_string()))?;

            self.logger.success(&format!("built image {image}"));
        } else {
            match self.engine.inspect_image(&image).await {
                Ok(_) => self.logger.debug(&format!("image {image} is present")),
                Err(e) if e.is_not_found() => {
                    self.logger.start(&format!("pulling image {image}"));
                    let engine = &self.engine;
                    let logger = &self.logger;
                    with_retry(
                        || {
                            oci::follow_progress(engine.pull_image(&image), move |line| {
                                logger.debug(&line)
                            })
                        },
                        &format!("pull {image}"),
                        RetryOptions::default(),
                    )
                    .await
                    .map_err(|e| {
                        let e = e.with_service(&self.instance.name);
                        e.log();
                        e
                    })?;
                    self.logger.success(&format!("pulled image {image}"));
                }
                Err(e) => return Err(self.engine_error(&e)),
            }
        }

        self.state = ServiceState::ImagePrepared;
        Ok(())
    }

    /// Stop and remove a container left over with the same name
    async fn remove_stale_container(&mut self) -> Result<()> {
        let name = self.instance.name.clone();
        match self.engine.inspect_container(&name).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(self.engine_error(&e)),
        }

        self.logger.warn("removing stale container from a previous run");
        let opts = StopOptions {
            signal: self.config.stop_signal.clone(),
            grace_period_secs: Some(self.grace_period() as i32),
        };
        if let Err(e) = self.engine.stop_container(&name, opts).await
            && !e.is_not_modified()
            && !e.is_not_found()
        {
            self.logger.debug(&format!("stale container did not stop: {e}"));
        }

        match self.engine.remove_container(&name, true).await {
            Err(e) if !e.is_not_found() => Err(self.engine_error(&e)),
            _ => Ok(()),
        }
    }

    fn grace_period(&self) -> u64 {
        self.config
            .stop_grace_period
            .unwrap_or(DEFAULT_STOP_GRACE_PERIOD)
    }

    /// The create request for this instance
    pub fn container_create_body(&self) -> Result<ContainerCreateBody> {
        container_create_body(&self.config, &self.instance, &self.logger).map_err(|e| {
            let e = e.with_service(&self.instance.name);
            e.log();
            e
        })
    }

    /// Prepare the image and run a fresh container, returning its id.
    ///
    /// A container with the same name is replaced.
    pub async fn start(&mut self) -> Result<String> {
        self.prepare_image().await?;
        self.remove_stale_container().await?;

        let body = self.container_create_body()?;
        let name = self.instance.name.clone();

        let id = self
            .engine
            .create_container(&name, body)
            .await
            .map_err(|e| self.engine_error(&e))?;
        self.container_id = Some(id.clone());
        self.state = ServiceState::ContainerCreated;

        self.engine
            .start_container(&name)
            .await
            .map_err(|e| self.engine_error(&e))?;
        self.state = ServiceState::Running;
        self.health_check_failed = false;

        self.logger.success("started");
        Ok(id)
    }

    /// Wait until the container reports healthy.
    ///
    /// Returns immediately if the service has no health check. Fails as soon
    /// as the container stops, is reported unhealthy or disappears.
    pub async fn wait_for_healthy(&mut self, timeout: Duration, interval: Duration) -> Result<()> {
        if self.config.active_health_check().is_none() {
            return Ok(());
        }

        let name = self.instance.name.clone();
        let started = Instant::now();
        self.state = ServiceState::HealthPending;
        self.logger.info("waiting for health check");

        loop {
            if started.elapsed() >= timeout {
                self.health_check_failed = true;
                self.state = ServiceState::Unhealthy;
                return Err(self.failure(
                    ErrorKind::Timeout,
                    format!(
                        "health check timed out after {}ms",
                        timeout.as_millis()
                    ),
                ));
            }

            match self.engine.inspect_container(&name).await {
                Ok(container) => {
                    let health = container.state.health.unwrap_or_default();
                    if health.status == HealthStatus::Unhealthy {
                        self.state = ServiceState::Unhealthy;
                        let mut message = "container is unhealthy".to_owned();
                        if let Some(output) = health.last_output.filter(|o| !o.trim().is_empty()) {
                            message = format!("{message}: {}", output.trim());
                        }
                        return Err(self.failure(ErrorKind::HealthCheckFailed, message));
                    }

                    if !container.state.running {
                        self.state = ServiceState::Unhealthy;
                        let exit_code = container
                            .state
                            .exit_code
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| "unknown".to_owned());
                        return Err(self.failure(
                            ErrorKind::HealthCheckFailed,
                            format!(
                                "container stopped while waiting for health check (exit code {exit_code})"
                            ),
                        ));
                    }

                    if health.status == HealthStatus::Healthy {
                        self.state = ServiceState::Healthy;
                        self.logger.success("healthy");
                        return Ok(());
                    }
                }
                Err(e) if e.is_not_found() => return Err(self.engine_error(&e)),
                Err(e) => self.logger.warn(&format!("health poll failed: {e}")),
            }

            tokio::time::sleep(interval).await;
        }
    }

    /// Wait until the container exits, failing unless it exits with 0.
    pub async fn wait_for_completion(&mut self, timeout: Duration, interval: Duration) -> Result<()> {
        let name = self.instance.name.clone();
        let started = Instant::now();

        loop {
            if started.elapsed() >= timeout {
                return Err(self.failure(
                    ErrorKind::Timeout,
                    format!("timed out after {}ms waiting for completion", timeout.as_millis()),
                ));
            }

            match self.engine.inspect_container(&name).await {
                Ok(container) if !container.state.running => {
                    self.state = ServiceState::Stopped;
                    return match container.state.exit_code {
                        Some(0) => Ok(()),
                        code => Err(self.failure(
                            ErrorKind::DependencyFailed,
                            format!(
                                "exited with code {}",
                                code.map(|c| c.to_string())
                                    .unwrap_or_else(|| "unknown".to_owned())
                            ),
                        )),
                    };
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => return Err(self.engine_error(&e)),
                Err(e) => self.logger.warn(&format!("completion poll failed: {e}")),
            }

            tokio::time::sleep(interval).await;
        }
    }

    /// Stop the container, killing it if a graceful stop fails.
    ///
    /// Does nothing if the container does not exist or is not running.
    pub async fn stop(&mut self) -> Result<()> {
        let name = self.instance.name.clone();
        let running = match self.engine.inspect_container(&name).await {
            Ok(container) => container.state.running,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(self.engine_error(&e)),
        };
        if !running {
            if self.state != ServiceState::Removed {
                self.state = ServiceState::Stopped;
            }
            return Ok(());
        }

        self.state = ServiceState::Stopping;
        self.logger.info("stopping");

        let opts = StopOptions {
            signal: self.config.stop_signal.clone(),
            grace_period_secs: Some(self.grace_period() as i32),
        };
        match self.engine.stop_container(&name, opts).await {
            Ok(()) => {}
            Err(e) if e.is_not_modified() || e.is_not_found() => {}
            Err(e) => {
                self.logger.warn(&format!("graceful stop failed, killing: {e}"));
                match self.engine.kill_container(&name).await {
                    Err(e) if !e.is_not_found() => return Err(self.engine_error(&e)),
                    _ => {}
                }
            }
        }

        self.state = ServiceState::Stopped;
        self.logger.info("stopped");
        Ok(())
    }

    /// Force-remove the container. A missing container counts as removed.
    pub async fn remove(&mut self) -> Result<()> {
        self.stop_log_stream();

        let name = self.instance.name.clone();
        match self.engine.remove_container(&name, true).await {
            Ok(()) => self.logger.info("removed"),
            Err(e) if e.is_not_found() => self.logger.debug("already removed"),
            Err(e) => return Err(self.engine_error(&e)),
        }

        self.container_id = None;
        self.state = ServiceState::Removed;
        Ok(())
    }

    /// Forward container output to the logger.
    ///
    /// Only attaches if the container is running and no stream is active.
    pub async fn stream_logs(&mut self) -> Result<()> {
        if self.is_streaming_logs() {
            return Ok(());
        }

        let name = self.instance.name.clone();
        let container = self
            .engine
            .inspect_container(&name)
            .await
            .map_err(|e| self.engine_error(&e))?;
        if !container.state.running {
            self.logger.debug("not running, skipping logs");
            return Ok(());
        }

        let stream = self.engine.container_logs(&name);
        self.log_task = Some(logs::spawn_log_task(stream, self.logger.clone()));
        Ok(())
    }

    /// Stop forwarding container output. Safe to call repeatedly.
    pub fn stop_log_stream(&mut self) {
        if let Some(task) = self.log_task.take() {
            task.abort();
        }
    }

    /// Run a command in the running container
    pub async fn exec(&self, cmd: Vec<String>) -> Result<ExecOutput> {
        self.engine
            .exec(&self.instance.name, cmd)
            .await
            .map_err(|e| self.engine_error(&e))
    }
}

impl<E> Drop for ServiceUnit<E> {
    fn drop(&mut self) {
        if let Some(task) = self.log_task.take() {
            task.abort();
        }
    }
}
