use clap::{Args, Parser, Subcommand};
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(s: &str) -> Result<Duration, ParseIntError> {
    let millis: u64 = s.parse()?;
    Ok(Duration::from_millis(millis))
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)] // read from Cargo.toml
pub struct Cli {
    /// Path of the engine socket, `DOCKER_HOST` is used if not given
    #[arg(env = "TOOLBOX_DOCKER_SOCKET", long = "docker-socket", value_name = "path")]
    pub docker_socket: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Start the services of a compose file and follow their output
    Up(UpArgs),

    /// Remove the containers and network of a compose file
    Down(ProjectArgs),

    /// Remove containers, networks and volumes by name pattern
    Cleanup(CleanupArgs),

    /// Print the converted service configuration as JSON
    Config(ProjectArgs),
}

#[derive(Clone, Debug, Args)]
pub struct ProjectArgs {
    /// Compose file to load
    #[arg(
        env = "TOOLBOX_COMPOSE_FILE",
        short = 'f',
        long = "file",
        value_name = "path",
        default_value = "docker-compose.yml"
    )]
    pub file: PathBuf,

    /// Enable services of the given profile, may be repeated
    #[arg(env = "TOOLBOX_PROFILES", long = "profile", value_name = "name", value_delimiter = ',')]
    pub profiles: Vec<String>,

    /// Name of the shared network, `<project>-network` by default
    #[arg(env = "TOOLBOX_NETWORK", long = "network", value_name = "name")]
    pub network: Option<String>,
}

#[derive(Clone, Debug, Args)]
pub struct UpArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Do not follow container output
    #[arg(env = "TOOLBOX_NO_LOGS", long = "no-logs")]
    pub no_logs: bool,

    /// How long to wait for a dependency to become healthy, in milliseconds
    #[arg(
        env = "TOOLBOX_HEALTH_TIMEOUT_MS",
        long = "health-timeout-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub health_timeout: Option<Duration>,

    /// Interval between health polls, in milliseconds
    #[arg(
        env = "TOOLBOX_HEALTH_INTERVAL_MS",
        long = "health-interval-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub health_interval: Option<Duration>,

    /// Abort if any service fails validation
    #[arg(env = "TOOLBOX_STRICT", long = "strict")]
    pub strict: bool,
}

#[derive(Clone, Debug, Args)]
pub struct CleanupArgs {
    /// Container name pattern, may be repeated
    #[arg(long = "container", value_name = "glob")]
    pub containers: Vec<String>,

    /// Network name pattern, may be repeated
    #[arg(long = "network", value_name = "glob")]
    pub networks: Vec<String>,

    /// Volume name pattern, may be repeated
    #[arg(long = "volume", value_name = "glob")]
    pub volumes: Vec<String>,

    /// Remove without stopping first
    #[arg(long = "force")]
    pub force: bool,
}

pub fn parse() -> Cli {
    Parser::parse()
}
