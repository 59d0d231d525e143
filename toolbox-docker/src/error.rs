//! Error classification.
//!
//! Engine errors arrive as a status code plus free-form text. They are
//! normalized here into a closed [`ErrorKind`] taxonomy before any other part
//! of the crate looks at them.

use std::fmt;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{error, warn};

use crate::oci;

/// Closed set of failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ImageNotFound,
    ContainerNotFound,
    NetworkNotFound,
    VolumeNotFound,
    PortInUse,
    InsufficientResources,
    BuildFailed,
    HealthCheckFailed,
    DependencyFailed,
    PermissionDenied,
    NetworkConflict,
    VolumeInUse,
    InvalidConfiguration,
    Timeout,
    Unknown,
}

impl ErrorKind {
    /// Remediation hints shown along with the error
    pub fn suggestions(&self) -> &'static [&'static str] {
        match self {
            ErrorKind::ImageNotFound => &[
                "Check that the image name and tag are correct",
                "Make sure you are logged in to the registry if the image is private",
                "Build the image locally if it is not published",
            ],
            ErrorKind::ContainerNotFound => &[
                "The container may have been removed by another process",
                "List existing containers with `docker ps -a`",
            ],
            ErrorKind::NetworkNotFound => &[
                "Check that the network name is correct",
                "Create the network or let the orchestrator create it on start",
            ],
            ErrorKind::VolumeNotFound => &[
                "Check that the volume name is correct",
                "Declare the volume at the project level so it is created on start",
            ],
            ErrorKind::PortInUse => &[
                "Stop the process or container using the port",
                "Publish the service on a different host port",
                "Find the owner with `lsof -i :<port>` or `docker ps`",
            ],
            ErrorKind::InsufficientResources => &[
                "Free up memory or disk space on the host",
                "Lower the memory or CPU limits of the service",
                "Remove unused images and containers with `docker system prune`",
            ],
            ErrorKind::BuildFailed => &[
                "Check the Dockerfile and the build output above",
                "Make sure the build context contains every file the Dockerfile copies",
            ],
            ErrorKind::HealthCheckFailed => &[
                "Inspect the container logs for startup errors",
                "Check that the health check command works inside the container",
                "Increase the health check start period or retries",
            ],
            ErrorKind::DependencyFailed => &[
                "Check the logs of the services this one depends on",
                "Make sure every dependency is part of the same project",
            ],
            ErrorKind::PermissionDenied => &[
                "Make sure your user can access the container engine socket",
                "Check the permissions of bind-mounted host paths",
            ],
            ErrorKind::NetworkConflict => &[
                "Remove the conflicting network or pick a different name",
                "Check for overlapping subnets with existing networks",
            ],
            ErrorKind::VolumeInUse => &[
                "Stop and remove the containers using the volume first",
            ],
            ErrorKind::InvalidConfiguration => &[
                "Review the service configuration for invalid values",
            ],
            ErrorKind::Timeout => &[
                "The engine or service may be overloaded, try again",
                "Increase the timeout for slow-starting services",
            ],
            ErrorKind::Unknown => &["Check the container engine logs for more details"],
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Unclassified error as reported by the engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawError {
    pub status_code: Option<u16>,
    pub message: String,
}

impl RawError {
    pub fn new(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }
}

impl From<&oci::Error> for RawError {
    fn from(err: &oci::Error) -> Self {
        Self {
            status_code: err.status_code(),
            message: err.message(),
        }
    }
}

/// Where a failure happened
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub service: Option<String>,
    pub container: Option<String>,
}

impl ErrorContext {
    pub fn service(name: impl Into<String>) -> Self {
        Self {
            service: Some(name.into()),
            container: None,
        }
    }
}

/// A classified error with remediation hints
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct DockerError {
    kind: ErrorKind,
    message: String,
    status_code: Option<u16>,
    suggestions: Vec<String>,
    service: Option<String>,
    container: Option<String>,
}

pub type Result<T> = std::result::Result<T, DockerError>;

impl fmt::Display for DockerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(service) = &self.service {
            write!(f, "{service}: ")?;
        }
        self.message.fmt(f)
    }
}

impl DockerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            suggestions: kind.suggestions().iter().map(|s| s.to_string()).collect(),
            service: None,
            container: None,
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    fn with_context(mut self, context: Option<ErrorContext>) -> Self {
        if let Some(ErrorContext { service, container }) = context {
            self.service = service.or(self.service);
            self.container = container.or(self.container);
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    /// Classify an engine error, attaching the given context.
    pub fn from_engine(err: &oci::Error, context: Option<ErrorContext>) -> Self {
        let mut classified = parse_docker_error(&RawError::from(err), context);
        // keep the operation context added by the client
        classified.message = err.to_string();
        classified
    }

    /// Emit the error and its suggestions.
    pub fn log(&self) {
        error!(
            kind = %self.kind,
            service = self.service.as_deref().unwrap_or("-"),
            container = self.container.as_deref().unwrap_or("-"),
            "{}",
            self.message
        );
        for suggestion in &self.suggestions {
            warn!("  - {suggestion}");
        }
    }
}

impl From<oci::Error> for DockerError {
    fn from(err: oci::Error) -> Self {
        DockerError::from_engine(&err, None)
    }
}

// Message patterns override the status bucket, first match wins.
static MESSAGE_PATTERNS: LazyLock<Vec<(Regex, ErrorKind)>> = LazyLock::new(|| {
    [
        (r"port is already allocated|address already in use|bind for .* failed", ErrorKind::PortInUse),
        (r"no such image|pull access denied|manifest unknown|repository does not exist|manifest for .* not found", ErrorKind::ImageNotFound),
        (r"no such container", ErrorKind::ContainerNotFound),
        (r"no such network|network .* not found", ErrorKind::NetworkNotFound),
        (r"no such volume|volume .* not found", ErrorKind::VolumeNotFound),
        (r"volume is in use|volume .* in use", ErrorKind::VolumeInUse),
        (r"pool overlaps|conflicts with network|network with name .* already exists", ErrorKind::NetworkConflict),
        (r"permission denied|access denied|operation not permitted", ErrorKind::PermissionDenied),
        (r"no space left on device|out of memory|cannot allocate memory|insufficient", ErrorKind::InsufficientResources),
        (r"returned a non-zero code|build failed|failed to build|dockerfile parse error", ErrorKind::BuildFailed),
        (r"unhealthy|health ?check", ErrorKind::HealthCheckFailed),
        (r"timed? ?out|timeout|deadline exceeded", ErrorKind::Timeout),
        (r"invalid reference format|invalid argument|invalid mount config|invalid port", ErrorKind::InvalidConfiguration),
    ]
    .into_iter()
    .map(|(pattern, kind)| {
        let re = Regex::new(&format!("(?i){pattern}")).expect("error pattern should be valid");
        (re, kind)
    })
    .collect()
});

// Resource names are quoted by the engine and must not decide the bucket.
static QUOTED_NAMES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"]*""#).expect("quoted name regex should be valid"));

fn mentions(message: &str, word: &str) -> bool {
    message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|w| w == word)
}

fn classify_status(status_code: u16, message: &str) -> ErrorKind {
    let message = message.to_lowercase();
    let message = QUOTED_NAMES.replace_all(&message, "");
    let has = |word: &str| mentions(&message, word);
    match status_code {
        404 if has("image") => ErrorKind::ImageNotFound,
        404 if has("network") => ErrorKind::NetworkNotFound,
        404 if has("volume") => ErrorKind::VolumeNotFound,
        404 => ErrorKind::ContainerNotFound,
        409 if has("port") => ErrorKind::PortInUse,
        409 if has("network") => ErrorKind::NetworkConflict,
        409 if has("volume") => ErrorKind::VolumeInUse,
        400 => ErrorKind::InvalidConfiguration,
        403 => ErrorKind::PermissionDenied,
        500 => ErrorKind::InsufficientResources,
        _ => ErrorKind::Unknown,
    }
}

/// Classify a raw engine error.
///
/// The status code selects a coarse bucket first, then well-known message
/// fragments replace it regardless of the status code.
pub fn parse_docker_error(raw: &RawError, context: Option<ErrorContext>) -> DockerError {
    let bucket = raw
        .status_code
        .map(|code| classify_status(code, &raw.message))
        .unwrap_or(ErrorKind::Unknown);

    let kind = MESSAGE_PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(&raw.message))
        .map(|(_, kind)| *kind)
        .unwrap_or(bucket);

    let mut err = DockerError::new(kind, raw.message.clone()).with_context(context);
    err.status_code = raw.status_code;
    err
}

/// Retry behavior for [`with_retry`]
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Total number of attempts
    pub max_retries: u32,

    /// Wait before the second attempt
    pub delay: Duration,

    /// Double the wait after every failed attempt
    pub backoff: bool,

    /// Kinds worth retrying; anything else fails immediately
    pub retryable: Vec<ErrorKind>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(1000),
            backoff: true,
            retryable: vec![ErrorKind::InsufficientResources, ErrorKind::Timeout],
        }
    }
}

impl RetryOptions {
    fn delay_for(&self, attempt: u32) -> Duration {
        if self.backoff {
            self.delay * 2u32.saturating_pow(attempt.saturating_sub(1))
        } else {
            self.delay
        }
    }
}

/// Run `op`, retrying while it fails with a retryable error kind.
pub async fn with_retry<T, E, F, Fut>(mut op: F, name: &str, opts: RetryOptions) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Into<DockerError>,
{
    let max_attempts = opts.max_retries.max(1);
    let mut attempt = 1;
    loop {
        let err: DockerError = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e.into(),
        };

        if !opts.retryable.contains(&err.kind()) {
            warn!(kind = %err.kind(), "{name} failed: {err}");
            return Err(err);
        }

        if attempt >= max_attempts {
            warn!(
                kind = %err.kind(),
                "{name} failed on final attempt ({attempt}/{max_attempts}): {err}"
            );
            return Err(err);
        }

        let delay = opts.delay_for(attempt);
        warn!(
            kind = %err.kind(),
            "{name} failed (attempt {attempt}/{max_attempts}), retrying in {}ms: {err}",
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
