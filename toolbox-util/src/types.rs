use std::fmt::Display;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("invalid image reference, expected [registry/]repo[:tag][@digest], got: {0}")]
pub struct InvalidImageRefError(String);

/// A container image reference
///
/// References without a tag or digest resolve to the `latest` tag, so that
/// pulling never fetches every tag of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    repo: String,
    tag: Option<String>,
    digest: Option<String>,
}

// the tag is only recognized after the last `/` so `localhost:5000/app` keeps
// the registry port in the repository part
static IMAGE_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((?:[^/@]+/)*[^/:@]+)(?::([\w][\w.-]{0,127}))?(?:@([A-Za-z][A-Za-z0-9+._-]*:[0-9a-fA-F]{32,}))?$")
        .unwrap()
});

impl ImageRef {
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// The explicit tag, if any.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }
}

impl FromStr for ImageRef {
    type Err = InvalidImageRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = IMAGE_REF_RE
            .captures(s.trim())
            .ok_or_else(|| InvalidImageRefError(s.into()))?;

        let repo = caps
            .get(1)
            .map(|m| m.as_str().to_owned())
            .ok_or_else(|| InvalidImageRefError(s.into()))?;
        let tag = caps.get(2).map(|m| m.as_str().to_owned());
        let digest = caps.get(3).map(|m| m.as_str().to_owned());

        Ok(Self { repo, tag, digest })
    }
}

impl Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.tag, &self.digest) {
            (_, Some(digest)) => write!(f, "{}@{digest}", self.repo),
            (Some(tag), None) => write!(f, "{}:{tag}", self.repo),
            (None, None) => write!(f, "{}:latest", self.repo),
        }
    }
}

impl Serialize for ImageRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ImageRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
