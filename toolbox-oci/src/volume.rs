use std::collections::HashMap;

use bollard::models::{Volume as VolumeInspect, VolumeCreateOptions};
use bollard::query_parameters::{ListVolumesOptions, RemoveVolumeOptions};

use super::{Client, Error, Result, WithContext};

#[derive(Debug, Clone)]
pub struct Volume<'a>(&'a Client);

impl<'a> Volume<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self(client)
    }
}

impl Volume<'_> {
    /// Create a named volume
    pub async fn create(&self, name: &str, config: VolumeConfig) -> Result<()> {
        let options = VolumeCreateOptions {
            name: Some(name.to_owned()),
            driver: Some(config.driver),
            driver_opts: Some(config.driver_opts),
            labels: Some(config.labels),
            ..Default::default()
        };

        self.0
            .inner()
            .create_volume(options)
            .await
            .map_err(Error::from)
            .with_context(|| format!("failed to create volume {name}"))?;

        Ok(())
    }

    /// Returns low-level information about a volume.
    pub async fn inspect(&self, name: &str) -> Result<LocalVolume> {
        let volume = self
            .0
            .inner()
            .inspect_volume(name)
            .await
            .map_err(Error::from)
            .with_context(|| format!("failed to inspect volume {name}"))?;

        Ok(volume.into())
    }

    pub async fn remove(&self, name: &str, force: bool) -> Result<()> {
        self.0
            .inner()
            .remove_volume(name, Some(RemoveVolumeOptions { force }))
            .await
            .map_err(Error::from)
            .with_context(|| format!("failed to remove volume {name}"))
    }

    /// Returns the names of all volumes on the server
    pub async fn list(&self) -> Result<Vec<String>> {
        let res = self
            .0
            .inner()
            .list_volumes(None::<ListVolumesOptions>)
            .await
            .map_err(Error::with_context("failed to list volumes"))?;

        Ok(res
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.name)
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeConfig {
    pub driver: String,
    pub driver_opts: HashMap<String, String>,
    pub labels: HashMap<String, String>,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            driver: "local".to_owned(),
            driver_opts: HashMap::new(),
            labels: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVolume {
    pub name: String,
    pub driver: String,
    pub mountpoint: String,
}

impl From<VolumeInspect> for LocalVolume {
    fn from(value: VolumeInspect) -> Self {
        Self {
            name: value.name,
            driver: value.driver,
            mountpoint: value.mountpoint,
        }
    }
}
