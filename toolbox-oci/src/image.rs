use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use bollard::query_parameters::{BuildImageOptions, CreateImageOptions};
use bollard::secret::{BuildInfo, CreateImageInfo, ImageInspect};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use super::util::types::ImageRef;
use super::{Client, Error, Result, WithContext};

#[derive(Debug, Clone)]
pub struct Image<'a>(&'a Client);

impl<'a> Image<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self(client)
    }
}

impl Image<'_> {
    /// Returns low-level information about an image.
    pub async fn inspect(&self, image: &str) -> Result<LocalImage> {
        let res = self.0.inner().inspect_image(image).await;
        let info = res
            .map_err(Error::from)
            .with_context(|| format!("failed to inspect image {image}"))?;

        info.try_into()
            .with_context(|| format!("failed to inspect image {image}"))
    }

    /// Pulls an image from a registry, returning a stream of status updates.
    ///
    /// References without a tag are pulled as `latest`.
    pub fn pull(&self, image: &str) -> PullProgress {
        let from_image = image
            .parse::<ImageRef>()
            .map(|r| r.to_string())
            .unwrap_or_else(|_| image.to_owned());

        let opts = Some(CreateImageOptions {
            from_image: Some(from_image),
            ..Default::default()
        });

        PullProgress {
            inner: Box::pin(self.0.inner().create_image(opts, None, None)),
            image: image.to_owned(),
        }
    }

    /// Builds an image from a tar archive of the build context, returning a
    /// stream of build output lines.
    pub fn build(&self, tag: &str, context: Vec<u8>, opts: BuildOptions) -> BuildProgress {
        let options = BuildImageOptions {
            dockerfile: opts.dockerfile,
            t: Some(tag.to_owned()),
            rm: true,
            buildargs: Some(opts.args),
            target: opts.target.unwrap_or_default(),
            ..Default::default()
        };

        let body = bollard::body_full(Bytes::from(context));

        // the engine stream borrows the handle, so a task owns a clone of it
        let docker = self.0.inner().clone();
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut stream = std::pin::pin!(docker.build_image(options, None, Some(body)));
            while let Some(item) = stream.next().await {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });

        BuildProgress {
            inner: Box::pin(ReceiverStream::new(rx)),
            tag: tag.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Path of the Dockerfile within the build context
    pub dockerfile: String,

    /// Build-time variables
    pub args: HashMap<String, String>,

    /// Target stage of a multi-stage build
    pub target: Option<String>,
}

type EngineStream<T> =
    Pin<Box<dyn Stream<Item = std::result::Result<T, bollard::errors::Error>> + Send>>;

pub struct PullProgress {
    inner: EngineStream<CreateImageInfo>,
    image: String,
}

impl Stream for PullProgress {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Ready(Some(Err(e))) => {
                    let err =
                        Error::from(e).context(format!("failed to pull image {}", self.image));
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(Some(Ok(info))) => {
                    if let Some(detail) = info.error_detail.and_then(|d| d.message) {
                        let err = Error::from(detail)
                            .context(format!("failed to pull image {}", self.image));
                        return Poll::Ready(Some(Err(err)));
                    }
                    if let Some(status) = info.status {
                        let line = match (info.id, info.progress) {
                            (Some(id), Some(progress)) => format!("{id}: {status} {progress}"),
                            (Some(id), None) => format!("{id}: {status}"),
                            _ => status,
                        };
                        return Poll::Ready(Some(Ok(line)));
                    }
                }
            }
        }
    }
}

pub struct BuildProgress {
    inner: EngineStream<BuildInfo>,
    tag: String,
}

impl Stream for BuildProgress {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Ready(Some(Err(e))) => {
                    let err = Error::from(e).context(format!("failed to build image {}", self.tag));
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(Some(Ok(info))) => {
                    // the daemon reports build failures in-band
                    let failure = info
                        .error_detail
                        .and_then(|d| d.message)
                        .or(info.error);
                    if let Some(message) = failure {
                        let err =
                            Error::from(message).context(format!("failed to build image {}", self.tag));
                        return Poll::Ready(Some(Err(err)));
                    }

                    let line = info.stream.or(info.status).map(|s| s.trim_end().to_owned());
                    if let Some(line) = line.filter(|l| !l.is_empty()) {
                        return Poll::Ready(Some(Ok(line)));
                    }
                }
            }
        }
    }
}

/// Drains a progress stream, passing each line to `on_line` and failing on
/// the first error.
pub async fn follow_progress<S, F>(mut stream: S, mut on_line: F) -> Result<()>
where
    S: Stream<Item = Result<String>> + Unpin,
    F: FnMut(String),
{
    while let Some(line) = stream.next().await {
        on_line(line?);
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct LocalImage {
    /// The content-addressable ID of an image.
    pub id: String,

    /// Repository tags pointing at this image
    pub tags: Vec<String>,
}

impl TryFrom<ImageInspect> for LocalImage {
    type Error = Error;

    fn try_from(value: ImageInspect) -> Result<Self> {
        let id = value.id.ok_or("image ID should not be nil")?;
        let tags = value.repo_tags.unwrap_or_default();

        Ok(Self { id, tags })
    }
}
