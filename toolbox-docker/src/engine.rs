//! Container engine interface.
//!
//! Service units and the orchestrator only talk to the engine through this
//! trait, using the request and response shapes of the Docker API.

use std::future::Future;

use crate::oci::{
    self, BuildOptions, Client, ContainerCreateBody, ContainerSummary, ExecOutput, LocalContainer,
    LocalImage, LocalNetwork, LocalVolume, LogStream, NetworkConfig, StopOptions, VolumeConfig,
};

/// Stream of progress lines from a pull or build
pub type ProgressStream = LogStream;

pub trait Engine: Send + Sync {
    fn inspect_image(&self, image: &str) -> impl Future<Output = oci::Result<LocalImage>> + Send;

    fn pull_image(&self, image: &str) -> ProgressStream;

    fn build_image(&self, tag: &str, context: Vec<u8>, opts: BuildOptions) -> ProgressStream;

    fn list_containers(&self) -> impl Future<Output = oci::Result<Vec<ContainerSummary>>> + Send;

    fn inspect_container(&self, name: &str)
    -> impl Future<Output = oci::Result<LocalContainer>> + Send;

    fn create_container(
        &self,
        name: &str,
        body: ContainerCreateBody,
    ) -> impl Future<Output = oci::Result<String>> + Send;

    fn start_container(&self, name: &str) -> impl Future<Output = oci::Result<()>> + Send;

    fn stop_container(
        &self,
        name: &str,
        opts: StopOptions,
    ) -> impl Future<Output = oci::Result<()>> + Send;

    fn kill_container(&self, name: &str) -> impl Future<Output = oci::Result<()>> + Send;

    fn remove_container(
        &self,
        name: &str,
        force: bool,
    ) -> impl Future<Output = oci::Result<()>> + Send;

    fn container_logs(&self, name: &str) -> LogStream;

    fn exec(
        &self,
        name: &str,
        cmd: Vec<String>,
    ) -> impl Future<Output = oci::Result<ExecOutput>> + Send;

    fn create_network(
        &self,
        name: &str,
        config: NetworkConfig,
    ) -> impl Future<Output = oci::Result<String>> + Send;

    fn inspect_network(&self, name: &str) -> impl Future<Output = oci::Result<LocalNetwork>> + Send;

    fn remove_network(&self, name: &str) -> impl Future<Output = oci::Result<()>> + Send;

    fn list_networks(&self) -> impl Future<Output = oci::Result<Vec<String>>> + Send;

    fn create_volume(
        &self,
        name: &str,
        config: VolumeConfig,
    ) -> impl Future<Output = oci::Result<()>> + Send;

    fn inspect_volume(&self, name: &str) -> impl Future<Output = oci::Result<LocalVolume>> + Send;

    fn remove_volume(&self, name: &str, force: bool)
    -> impl Future<Output = oci::Result<()>> + Send;

    fn list_volumes(&self) -> impl Future<Output = oci::Result<Vec<String>>> + Send;
}

impl Engine for Client {
    async fn inspect_image(&self, image: &str) -> oci::Result<LocalImage> {
        self.image().inspect(image).await
    }

    fn pull_image(&self, image: &str) -> ProgressStream {
        Box::pin(self.image().pull(image))
    }

    fn build_image(&self, tag: &str, context: Vec<u8>, opts: BuildOptions) -> ProgressStream {
        Box::pin(self.image().build(tag, context, opts))
    }

    async fn list_containers(&self) -> oci::Result<Vec<ContainerSummary>> {
        self.container().list().await
    }

    async fn inspect_container(&self, name: &str) -> oci::Result<LocalContainer> {
        self.container().inspect(name).await
    }

    async fn create_container(&self, name: &str, body: ContainerCreateBody) -> oci::Result<String> {
        self.container().create(name, body).await
    }

    async fn start_container(&self, name: &str) -> oci::Result<()> {
        self.container().start(name).await
    }

    async fn stop_container(&self, name: &str, opts: StopOptions) -> oci::Result<()> {
        self.container().stop(name, opts).await
    }

    async fn kill_container(&self, name: &str) -> oci::Result<()> {
        self.container().kill(name).await
    }

    async fn remove_container(&self, name: &str, force: bool) -> oci::Result<()> {
        self.container().remove(name, force).await
    }

    fn container_logs(&self, name: &str) -> LogStream {
        self.container().logs(name)
    }

    async fn exec(&self, name: &str, cmd: Vec<String>) -> oci::Result<ExecOutput> {
        self.container().exec(name, cmd).await
    }

    async fn create_network(&self, name: &str, config: NetworkConfig) -> oci::Result<String> {
        self.network().create(name, config).await
    }

    async fn inspect_network(&self, name: &str) -> oci::Result<LocalNetwork> {
        self.network().inspect(name).await
    }

    async fn remove_network(&self, name: &str) -> oci::Result<()> {
        self.network().remove(name).await
    }

    async fn list_networks(&self) -> oci::Result<Vec<String>> {
        self.network().list().await
    }

    async fn create_volume(&self, name: &str, config: VolumeConfig) -> oci::Result<()> {
        self.volume().create(name, config).await
    }

    async fn inspect_volume(&self, name: &str) -> oci::Result<LocalVolume> {
        self.volume().inspect(name).await
    }

    async fn remove_volume(&self, name: &str, force: bool) -> oci::Result<()> {
        self.volume().remove(name, force).await
    }

    async fn list_volumes(&self) -> oci::Result<Vec<String>> {
        self.volume().list().await
    }
}
