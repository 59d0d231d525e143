use std::fmt;

use bollard::{API_DEFAULT_VERSION, Docker};

pub use bollard::errors::Error as ConnectionError;
pub use bollard::models::{
    ContainerCreateBody, DeviceMapping, EndpointIpamConfig, EndpointSettings, HealthConfig,
    HostConfig, HostConfigLogConfig, NetworkingConfig, PortBinding, RestartPolicy,
    RestartPolicyNameEnum,
};

mod image;
pub use image::{BuildOptions, BuildProgress, Image, LocalImage, PullProgress, follow_progress};

mod container;
pub use container::{
    Container, ContainerHealth, ContainerState, ContainerStatus, ContainerSummary, ExecOutput,
    HealthStatus, LocalContainer, LogStream, StopOptions,
};

mod network;
pub use network::{LocalNetwork, Network, NetworkConfig};

mod volume;
pub use volume::{LocalVolume, Volume, VolumeConfig};

use toolbox_util as util;

/// Seconds bollard waits on a request before giving up.
const REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct Client(Docker);

impl Client {
    /// Connect to the daemon based on the `DOCKER_HOST` environment variable.
    pub async fn connect() -> Result<Self> {
        let inner = Docker::connect_with_defaults()?;
        Self::ping(inner).await
    }

    /// Connect to the daemon listening on the given unix socket.
    pub async fn connect_with_socket(path: &str) -> Result<Self> {
        let inner = Docker::connect_with_socket(path, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)
            .map_err(Error::with_context("failed to connect to daemon"))?;
        Self::ping(inner).await
    }

    async fn ping(inner: Docker) -> Result<Self> {
        // Bollard doesn't actually connect with the `connect_*` call.
        // Do a /ping to ensure we can connect before proceeding.
        inner
            .ping()
            .await
            .map_err(Error::with_context("failed to connect to daemon"))?;

        Ok(Self(inner))
    }

    fn inner(&self) -> &Docker {
        &self.0
    }

    /// Exposes methods to work with images.
    #[inline]
    pub fn image(&self) -> Image<'_> {
        Image::new(self)
    }

    /// Exposes methods to work with container
    #[inline]
    pub fn container(&self) -> Container<'_> {
        Container::new(self)
    }

    #[inline]
    pub fn network(&self) -> Network<'_> {
        Network::new(self)
    }

    #[inline]
    pub fn volume(&self) -> Volume<'_> {
        Volume::new(self)
    }
}

#[doc(hidden)]
type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
enum ClientError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Unexpected(#[from] BoxError),
}

#[derive(Debug, thiserror::Error)]
pub struct Error {
    context: Option<String>,
    source: ClientError,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(c) = &self.context {
            c.fmt(f)?;
            ": ".fmt(f)?;
        }
        self.source.fmt(f)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    #[inline]
    fn new(source: ClientError, context: Option<String>) -> Self {
        Self { source, context }
    }

    /// Create an ClientError::Unexpected from an input error
    pub(crate) fn unexpected<E: Into<BoxError>>(error: E) -> Self {
        Self {
            source: ClientError::Unexpected(error.into()),
            context: None,
        }
    }

    /// Builds the error the engine returns for a failed request.
    ///
    /// Used by alternative engine implementations to report failures the
    /// same way the daemon does.
    pub fn server(status_code: u16, message: impl Into<String>) -> Self {
        ConnectionError::DockerResponseServerError {
            status_code,
            message: message.into(),
        }
        .into()
    }

    /// Returns a `ClientError` partial constructor with the given message as context.
    #[inline]
    pub fn with_context(msg: &'static str) -> impl FnOnce(ConnectionError) -> Self {
        move |source| Error {
            source: source.into(),
            context: Some(msg.to_owned()),
        }
    }

    /// Assigns context to this error.
    #[inline]
    pub fn context(mut self, msg: String) -> Self {
        self.context = Some(msg);
        self
    }

    /// The HTTP status code returned by the engine, if the request reached it.
    pub fn status_code(&self) -> Option<u16> {
        match &self.source {
            ClientError::Connection(ConnectionError::DockerResponseServerError {
                status_code,
                ..
            }) => Some(*status_code),
            _ => None,
        }
    }

    /// The engine-provided message, without the added context.
    pub fn message(&self) -> String {
        match &self.source {
            ClientError::Connection(ConnectionError::DockerResponseServerError {
                message, ..
            }) => message.clone(),
            ClientError::Connection(ConnectionError::DockerStreamError { error }) => error.clone(),
            ClientError::Connection(ConnectionError::RequestTimeoutError) => {
                "request timed out".to_owned()
            }
            source => source.to_string(),
        }
    }

    /// Returns true if the engine reported that the resource does not exist.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// Returns true if the engine reported that the resource is already in the requested state.
    #[inline]
    pub fn is_not_modified(&self) -> bool {
        self.status_code() == Some(304)
    }
}

impl From<ConnectionError> for Error {
    #[inline]
    fn from(value: ConnectionError) -> Self {
        Self::new(value.into(), None)
    }
}

impl From<BoxError> for Error {
    #[inline]
    fn from(value: BoxError) -> Self {
        Self::new(value.into(), None)
    }
}

impl From<&str> for Error {
    #[inline]
    fn from(value: &str) -> Self {
        Error::unexpected(value)
    }
}

impl From<String> for Error {
    #[inline]
    fn from(value: String) -> Self {
        Error::unexpected(value)
    }
}

impl From<std::io::Error> for Error {
    #[inline]
    fn from(value: std::io::Error) -> Self {
        Error::unexpected(value)
    }
}

/// Adds methods to [`Result`][std::result::Result] to associate extra context with an [Error].
pub trait WithContext<T>: Sized {
    /// Associates extra context with the [Error], if `self` is [Err].
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Associates extra context with the [Error], if `self` is [Err].
    /// To provide a [String] as context, potentially with formatting, use
    /// [WithContext::with_context].
    #[inline]
    fn context(self, msg: &'static str) -> Result<T> {
        self.with_context(|| msg.to_owned())
    }
}

impl<T> WithContext<T> for Result<T> {
    #[inline]
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|err| err.context(f()))
    }
}
