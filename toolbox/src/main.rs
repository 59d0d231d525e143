use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::{info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use toolbox_docker as docker;
use toolbox_oci as oci;

use crate::cli::{CleanupArgs, Command, ProjectArgs, UpArgs};
use crate::docker::compose::{
    ComposeProject, convert_compose_file, load_compose_file, validate_service_config,
};
use crate::docker::{
    CleanupOptions, CleanupReport, Orchestrator, OrchestratorConfig, cleanup_resources,
};

/// Label identifying the compose project on every container and network
const PROJECT_LABEL: &str = "dev.toolbox.project";

fn initialize_tracing() {
    tracing_subscriber::registry()
        .with(
            // Use some log defaults. These can be overriden using
            // RUST_LOG
            EnvFilter::try_from_default_env().unwrap_or(
                EnvFilter::default()
                    .add_directive(tracing::Level::INFO.into())
                    .add_directive("hyper=error".parse().unwrap())
                    .add_directive("bollard=error".parse().unwrap()),
            ),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .event_format(fmt::format().compact().with_target(false).without_time()),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    initialize_tracing();

    let cli = cli::parse();
    let socket = cli.docker_socket.as_deref();

    match cli.command {
        Command::Config(args) => print_config(&args),
        Command::Up(args) => up(connect(socket).await?, args).await,
        Command::Down(args) => down(connect(socket).await?, args).await,
        Command::Cleanup(args) => cleanup(connect(socket).await?, args).await,
    }
}

async fn connect(socket: Option<&str>) -> anyhow::Result<oci::Client> {
    let client = match socket {
        Some(path) => oci::Client::connect_with_socket(path).await,
        None => oci::Client::connect().await,
    };
    client.context("failed to connect to the container engine")
}

/// Load and convert the compose file, resolving relative paths against its
/// directory
fn load_project(args: &ProjectArgs) -> anyhow::Result<ComposeProject> {
    let file = load_compose_file(&args.file)?;
    let base = args
        .file
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    Ok(convert_compose_file(&file, &args.profiles).with_base_dir(base))
}

// the compose `name`, else the directory holding the file
fn project_name(args: &ProjectArgs, project: &ComposeProject) -> String {
    project
        .name
        .clone()
        .or_else(|| {
            args.file
                .canonicalize()
                .ok()?
                .parent()?
                .file_name()
                .map(|dir| dir.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "toolbox".to_owned())
}

fn network_name(args: &ProjectArgs, project: &str) -> String {
    args.network
        .clone()
        .unwrap_or_else(|| format!("{project}-network"))
}

fn print_config(args: &ProjectArgs) -> anyhow::Result<()> {
    let project = load_project(args)?;
    println!("{}", serde_json::to_string_pretty(&project)?);
    Ok(())
}

#[instrument(name = "up", skip_all, err)]
async fn up(client: oci::Client, args: UpArgs) -> anyhow::Result<()> {
    let project = load_project(&args.project)?;
    let name = project_name(&args.project, &project);

    let mut problems = 0;
    for config in project.services.values() {
        for problem in validate_service_config(config) {
            warn!(service = %config.name, "{problem}");
            problems += 1;
        }
    }
    if args.strict && problems > 0 {
        bail!("found {problems} configuration problem(s)");
    }
    if project.services.is_empty() {
        warn!("no services enabled, check the active profiles");
        return Ok(());
    }

    let defaults = OrchestratorConfig::default();
    let config = OrchestratorConfig {
        network_name: network_name(&args.project, &name),
        volumes: project.volumes.clone(),
        health_timeout: args.health_timeout.unwrap_or(defaults.health_timeout),
        health_interval: args.health_interval.unwrap_or(defaults.health_interval),
        labels: BTreeMap::from([(PROJECT_LABEL.to_owned(), name.clone())]),
        ..defaults
    };

    let mut orchestrator = Orchestrator::new(Arc::new(client), config);
    info!("starting project {name}");

    let started = tokio::select! {
        res = orchestrator.start_services(project.service_configs()) => Some(res),
        _ = tokio::signal::ctrl_c() => None,
    };

    match started {
        Some(Ok(())) => {
            if !args.no_logs
                && let Err(e) = orchestrator.stream_all_logs().await
            {
                warn!("failed to follow container output: {e}");
            }

            info!("all services started, press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;

            info!("stopping project {name}");
            orchestrator.stop_all_services().await;
            Ok(())
        }
        Some(Err(e)) => {
            orchestrator.stop_all_services().await;
            Err(e.into())
        }
        None => {
            warn!("interrupted, stopping started services");
            orchestrator.stop_all_services().await;
            Ok(())
        }
    }
}

#[instrument(name = "down", skip_all, err)]
async fn down(client: oci::Client, args: ProjectArgs) -> anyhow::Result<()> {
    let project = load_project(&args)?;
    let name = project_name(&args, &project);

    // single instances use the service name, replicas a numbered suffix
    let container_patterns = project
        .services
        .keys()
        .flat_map(|service| [service.clone(), format!("{service}-[0-9]*")])
        .collect();

    let report = cleanup_resources(
        &client,
        CleanupOptions {
            container_patterns,
            network_patterns: vec![network_name(&args, &name)],
            ..Default::default()
        },
    )
    .await?;

    summarize(&report)
}

#[instrument(name = "cleanup", skip_all, err)]
async fn cleanup(client: oci::Client, args: CleanupArgs) -> anyhow::Result<()> {
    if args.containers.is_empty() && args.networks.is_empty() && args.volumes.is_empty() {
        bail!("nothing to clean up, pass at least one --container, --network or --volume pattern");
    }

    let report = cleanup_resources(
        &client,
        CleanupOptions {
            cleanup_containers: !args.containers.is_empty(),
            cleanup_networks: !args.networks.is_empty(),
            cleanup_volumes: !args.volumes.is_empty(),
            container_patterns: args.containers,
            network_patterns: args.networks,
            volume_patterns: args.volumes,
            force: args.force,
        },
    )
    .await?;

    summarize(&report)
}

fn summarize(report: &CleanupReport) -> anyhow::Result<()> {
    info!(
        "removed {} container(s), {} network(s), {} volume(s)",
        report.containers.len(),
        report.networks.len(),
        report.volumes.len()
    );

    if !report.is_success() {
        let names: Vec<&str> = report.failures.iter().map(|(n, _)| n.as_str()).collect();
        bail!("failed to remove {}", names.join(", "));
    }
    Ok(())
}
