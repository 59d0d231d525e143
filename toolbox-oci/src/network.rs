use std::collections::HashMap;

use bollard::models::{Network as NetworkInspect, NetworkCreateRequest};
use bollard::query_parameters::{InspectNetworkOptions, ListNetworksOptions};

use super::{Client, Error, Result, WithContext};

#[derive(Debug, Clone)]
pub struct Network<'a>(&'a Client);

impl<'a> Network<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self(client)
    }
}

impl Network<'_> {
    /// Create a network with the given name and configuration, returning its id
    pub async fn create(&self, name: &str, config: NetworkConfig) -> Result<String> {
        let request = NetworkCreateRequest {
            name: name.to_owned(),
            driver: Some(config.driver),
            internal: Some(config.internal),
            attachable: Some(true),
            labels: Some(config.labels),
            ..Default::default()
        };

        let res = self.0.inner().create_network(request).await;
        let res = res
            .map_err(Error::from)
            .with_context(|| format!("failed to create network {name}"))?;

        Ok(res.id)
    }

    /// Remove a network by name or id
    pub async fn remove(&self, name: &str) -> Result<()> {
        self.0
            .inner()
            .remove_network(name)
            .await
            .map_err(Error::from)
            .with_context(|| format!("failed to remove network {name}"))
    }

    /// Returns low-level information about a network.
    pub async fn inspect(&self, name: &str) -> Result<LocalNetwork> {
        let network_info = self
            .0
            .inner()
            .inspect_network(name, None::<InspectNetworkOptions>)
            .await
            .map_err(|e| Error::from(e).context(format!("failed to inspect network '{name}'")))?;

        network_info
            .try_into()
            .with_context(|| format!("failed to inspect network '{name}'"))
    }

    /// Returns the names of all networks on the server
    pub async fn list(&self) -> Result<Vec<String>> {
        let networks = self
            .0
            .inner()
            .list_networks(None::<ListNetworksOptions>)
            .await
            .map_err(|e| Error::from(e).context("failed to list networks".to_string()))?;

        Ok(networks
            .into_iter()
            .flat_map(|n| n.name.into_iter())
            .collect())
    }
}

/// Network configuration used to create a network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub driver: String,
    pub internal: bool,
    pub labels: HashMap<String, String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            driver: "bridge".to_owned(),
            internal: false,
            labels: HashMap::new(),
        }
    }
}

/// Information about a network on the local engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalNetwork {
    pub id: String,
    pub name: String,
    pub driver: String,

    /// Ids of the containers attached to the network
    pub containers: Vec<String>,
}

impl TryFrom<NetworkInspect> for LocalNetwork {
    type Error = Error;

    fn try_from(value: NetworkInspect) -> Result<Self> {
        let id = value.id.ok_or("network ID should not be nil")?;
        let name = value.name.ok_or("network name should not be nil")?;
        let driver = value.driver.unwrap_or_else(|| "bridge".to_string());
        let containers = value
            .containers
            .map(|c| c.into_keys().collect())
            .unwrap_or_default();

        Ok(LocalNetwork {
            id,
            name,
            driver,
            containers,
        })
    }
}
