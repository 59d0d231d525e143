use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use super::model::*;
use crate::config::{
    BindOptions, BuildConfig, DependencyCondition, DependsOn, DeployConfig, DeployResources,
    Environment, HealthCheck, LoggingConfig, MountType, NetworkDefinition, PortMapping,
    ResourceSpec, RestartPolicyConfig, ServiceConfig, ServiceNetwork, TmpfsOptions,
    VolumeDefinition, VolumeMount,
};

/// Seconds returned for durations that cannot be parsed
pub const DEFAULT_TIME_SECS: u64 = 30;

const NANOS_PER_SEC: i64 = 1_000_000_000;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)(ms|d|h|m|s)").expect("duration regex should be valid")
});

/// Parse a Compose duration into seconds.
///
/// Accepts bare seconds (`123`) or unit components (`1h30m45s`, `2d`,
/// `500ms`). Anything else yields [`DEFAULT_TIME_SECS`].
pub fn parse_time(value: &str) -> u64 {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return secs;
    }

    let mut millis = 0f64;
    let mut end = 0;
    for caps in DURATION_RE.captures_iter(value) {
        let (Some(whole), Some(amount), Some(unit)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            return DEFAULT_TIME_SECS;
        };
        // components must be contiguous
        if whole.start() != end {
            return DEFAULT_TIME_SECS;
        }
        end = whole.end();

        let Ok(amount) = amount.as_str().parse::<f64>() else {
            return DEFAULT_TIME_SECS;
        };
        millis += amount
            * match unit.as_str() {
                "d" => 86_400_000.0,
                "h" => 3_600_000.0,
                "m" => 60_000.0,
                "s" => 1_000.0,
                _ => 1.0,
            };
    }

    if end == 0 || end != value.len() {
        return DEFAULT_TIME_SECS;
    }

    (millis / 1000.0).floor() as u64
}

fn time_nanos(value: &Scalar) -> i64 {
    let secs = match value {
        Scalar::Int(secs) if *secs >= 0 => *secs as u64,
        other => parse_time(&other.to_string()),
    };
    secs as i64 * NANOS_PER_SEC
}

fn parse_port(name: &str, port: &ComposePort) -> Option<PortMapping> {
    match port {
        ComposePort::Long(port) => Some(PortMapping {
            target: port.target,
            published: port.published.as_ref().map(|p| p.to_string()),
            protocol: port.protocol.clone().unwrap_or_else(|| "tcp".to_owned()),
            mode: port.mode.clone(),
            host_ip: port.host_ip.clone(),
        }),
        ComposePort::Short(spec) => {
            let spec = spec.to_string();
            let (addr, protocol) = match spec.split_once('/') {
                Some((addr, protocol)) => (addr, protocol.to_owned()),
                None => (spec.as_str(), "tcp".to_owned()),
            };

            // [[host_ip:]published:]target
            let parts: Vec<&str> = addr.rsplitn(3, ':').collect();
            let Ok(target) = parts[0].parse::<u16>() else {
                warn!(service = %name, "ignoring unsupported port '{spec}'");
                return None;
            };

            Some(PortMapping {
                target,
                published: parts.get(1).filter(|p| !p.is_empty()).map(|p| p.to_string()),
                protocol,
                mode: None,
                host_ip: parts.get(2).filter(|h| !h.is_empty()).map(|h| h.to_string()),
            })
        }
    }
}

const PROPAGATION_MODES: [&str; 6] = ["shared", "rshared", "slave", "rslave", "private", "rprivate"];

fn is_host_path(source: &str) -> bool {
    source.starts_with('/') || source.starts_with('.') || source.starts_with('~')
}

fn parse_mount(name: &str, mount: &ComposeMount) -> Option<VolumeMount> {
    match mount {
        ComposeMount::Short(spec) => {
            let parts: Vec<&str> = spec.splitn(3, ':').collect();
            let (source, target, mode) = match parts.as_slice() {
                [target] => (None, *target, None),
                [source, target] => (Some(*source), *target, None),
                [source, target, mode] => (Some(*source), *target, Some(*mode)),
                _ => return None,
            };

            let kind = match source {
                Some(source) if is_host_path(source) => MountType::Bind,
                _ => MountType::Volume,
            };

            let mut mount = VolumeMount {
                kind,
                source: source.map(str::to_owned),
                target: target.to_owned(),
                ..Default::default()
            };
            for option in mode.into_iter().flat_map(|m| m.split(',')) {
                match option {
                    "ro" => mount.read_only = true,
                    "rw" | "z" | "Z" | "" => {}
                    p if PROPAGATION_MODES.contains(&p) => {
                        mount.bind = Some(BindOptions {
                            propagation: Some(p.to_owned()),
                        })
                    }
                    other => warn!(service = %name, "ignoring unknown mount option '{other}'"),
                }
            }
            Some(mount)
        }
        ComposeMount::Long(mount) => {
            let kind = match mount.kind.as_deref() {
                Some("bind") => MountType::Bind,
                Some("tmpfs") => MountType::Tmpfs,
                Some("volume") | None => MountType::Volume,
                Some(other) => {
                    warn!(service = %name, "unsupported mount type '{other}', skipping");
                    return None;
                }
            };
            Some(VolumeMount {
                kind,
                source: mount.source.clone(),
                target: mount.target.clone(),
                read_only: mount.read_only,
                bind: mount.bind.as_ref().map(|b| BindOptions {
                    propagation: b.propagation.clone(),
                }),
                tmpfs: mount.tmpfs.as_ref().map(|t| TmpfsOptions {
                    size: t.size.as_ref().map(|s| s.to_string()),
                    mode: t.mode,
                }),
            })
        }
    }
}

fn convert_networks(networks: &ComposeServiceNetworks) -> BTreeMap<String, ServiceNetwork> {
    match networks {
        ComposeServiceNetworks::List(names) => names
            .iter()
            .map(|name| (name.clone(), ServiceNetwork::default()))
            .collect(),
        ComposeServiceNetworks::Map(map) => map
            .iter()
            .map(|(name, network)| {
                let network = network.clone().unwrap_or_default();
                (
                    name.clone(),
                    ServiceNetwork {
                        aliases: network.aliases,
                        ipv4_address: network.ipv4_address,
                        ipv6_address: network.ipv6_address,
                    },
                )
            })
            .collect(),
    }
}

fn convert_depends_on(service: &str, depends_on: &ComposeDependsOn) -> BTreeMap<String, DependsOn> {
    match depends_on {
        ComposeDependsOn::List(names) => names
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    DependsOn {
                        condition: Some(DependencyCondition::Started),
                        required: true,
                    },
                )
            })
            .collect(),
        ComposeDependsOn::Map(map) => map
            .iter()
            .map(|(name, dep)| {
                (
                    name.clone(),
                    DependsOn {
                        condition: dep.condition.as_deref().and_then(|c| {
                            c.parse()
                                .inspect_err(|e| warn!(%service, "dependency '{name}': {e}"))
                                .ok()
                        }),
                        required: dep.required.unwrap_or(true),
                    },
                )
            })
            .collect(),
    }
}

fn convert_health_check(health_check: &ComposeHealthCheck) -> HealthCheck {
    let test = match &health_check.test {
        Some(OneOrMany::One(cmd)) => vec!["CMD-SHELL".to_owned(), cmd.clone()],
        Some(OneOrMany::Many(test)) => test.clone(),
        None => Vec::new(),
    };

    HealthCheck {
        test,
        interval: health_check.interval.as_ref().map(time_nanos),
        timeout: health_check.timeout.as_ref().map(time_nanos),
        start_period: health_check.start_period.as_ref().map(time_nanos),
        retries: health_check.retries,
        disable: health_check.disable,
    }
}

fn convert_resource_spec(spec: &ComposeResourceSpec) -> ResourceSpec {
    ResourceSpec {
        cpus: spec.cpus.as_ref().and_then(Scalar::as_f64),
        memory: spec.memory.as_ref().map(|m| m.to_string()),
        pids: spec.pids,
    }
}

fn convert_deploy(deploy: &ComposeDeploy) -> DeployConfig {
    DeployConfig {
        replicas: deploy.replicas,
        resources: deploy.resources.as_ref().map(|r| DeployResources {
            limits: r.limits.as_ref().map(convert_resource_spec),
            reservations: r.reservations.as_ref().map(convert_resource_spec),
        }),
        restart_policy: deploy.restart_policy.as_ref().map(|p| RestartPolicyConfig {
            condition: p.condition.clone(),
            delay: p.delay.clone(),
            max_attempts: p.max_attempts,
            window: p.window.clone(),
        }),
    }
}

fn convert_build(build: &ComposeBuild) -> BuildConfig {
    match build {
        ComposeBuild::Context(context) => BuildConfig {
            context: PathBuf::from(context),
            ..Default::default()
        },
        ComposeBuild::Config(build) => BuildConfig {
            context: PathBuf::from(build.context.as_deref().unwrap_or(".")),
            dockerfile: build.dockerfile.clone(),
            args: build
                .args
                .as_ref()
                .map(|args| args.to_map('='))
                .unwrap_or_default(),
            target: build.target.clone(),
        },
    }
}

/// Convert one Compose service into a [`ServiceConfig`].
pub fn convert_compose_service(name: &str, service: &ComposeService) -> ServiceConfig {
    let to_string = |s: &Scalar| s.to_string();

    ServiceConfig {
        name: name.to_owned(),
        image: service.image.clone(),
        build: service.build.as_ref().map(convert_build),
        command: service.command.clone().map(Vec::from),
        entrypoint: service.entrypoint.clone().map(Vec::from),
        environment: service.environment.as_ref().map(|env| match env {
            KeyValues::List(list) => Environment::List(list.clone()),
            map => Environment::Map(map.to_map('=')),
        }),
        env_file: service.env_file.to_vec().into_iter().map(PathBuf::from).collect(),
        working_dir: service.working_dir.clone(),
        user: service.user.clone(),
        hostname: service.hostname.clone(),
        domainname: service.domainname.clone(),
        ports: service
            .ports
            .iter()
            .filter_map(|p| parse_port(name, p))
            .collect(),
        expose: service.expose.iter().map(to_string).collect(),
        networks: service
            .networks
            .as_ref()
            .map(convert_networks)
            .unwrap_or_default(),
        network_mode: service.network_mode.clone(),
        volumes: service
            .volumes
            .iter()
            .filter_map(|m| parse_mount(name, m))
            .collect(),
        tmpfs: service.tmpfs.to_vec(),
        mem_limit: service.mem_limit.as_ref().map(to_string),
        mem_reservation: service.mem_reservation.as_ref().map(to_string),
        memswap_limit: service.memswap_limit.as_ref().map(to_string),
        mem_swappiness: service.mem_swappiness,
        shm_size: service.shm_size.as_ref().map(to_string),
        cpus: service.cpus.as_ref().and_then(Scalar::as_f64),
        cpu_shares: service.cpu_shares,
        cpuset: service.cpuset.clone(),
        pids_limit: service.pids_limit,
        oom_score_adj: service.oom_score_adj,
        oom_kill_disable: service.oom_kill_disable,
        privileged: service.privileged,
        cap_add: service.cap_add.clone(),
        cap_drop: service.cap_drop.clone(),
        devices: service.devices.clone(),
        security_opt: service.security_opt.clone(),
        read_only: service.read_only,
        init: service.init,
        extra_hosts: service
            .extra_hosts
            .as_ref()
            .map(|hosts| match hosts {
                KeyValues::List(list) => list.clone(),
                map => map
                    .to_map('=')
                    .into_iter()
                    .map(|(host, ip)| format!("{host}:{ip}"))
                    .collect(),
            })
            .unwrap_or_default(),
        dns: service.dns.to_vec(),
        restart: service.restart.clone(),
        stop_signal: service.stop_signal.clone(),
        stop_grace_period: service.stop_grace_period.as_ref().map(|p| match p {
            Scalar::Int(secs) if *secs >= 0 => *secs as u64,
            other => parse_time(&other.to_string()),
        }),
        health_check: service.healthcheck.as_ref().map(convert_health_check),
        depends_on: service
            .depends_on
            .as_ref()
            .map(|deps| convert_depends_on(name, deps))
            .unwrap_or_default(),
        deploy: service.deploy.as_ref().map(convert_deploy),
        labels: service
            .labels
            .as_ref()
            .map(|l| l.to_map('='))
            .unwrap_or_default(),
        logging: service.logging.as_ref().map(|l| LoggingConfig {
            driver: l.driver.clone(),
            options: l.options.as_ref().map(|o| o.to_map('=')).unwrap_or_default(),
        }),
        profiles: service.profiles.clone(),
    }
}

/// Convert a project-level network declaration
pub fn convert_compose_network(name: &str, network: Option<&ComposeNetwork>) -> NetworkDefinition {
    let Some(network) = network else {
        return NetworkDefinition {
            name: Some(name.to_owned()),
            ..Default::default()
        };
    };

    let external = network.external.as_ref();
    NetworkDefinition {
        name: network
            .name
            .clone()
            .or_else(|| external.and_then(External::name).map(str::to_owned))
            .or_else(|| Some(name.to_owned())),
        driver: network.driver.clone(),
        external: external.is_some_and(External::is_external),
        internal: network.internal,
        labels: network.labels.as_ref().map(|l| l.to_map('=')).unwrap_or_default(),
    }
}

/// Convert a project-level volume declaration
pub fn convert_compose_volume(name: &str, volume: Option<&ComposeVolume>) -> VolumeDefinition {
    let Some(volume) = volume else {
        return VolumeDefinition {
            name: Some(name.to_owned()),
            ..Default::default()
        };
    };

    let external = volume.external.as_ref();
    VolumeDefinition {
        name: volume
            .name
            .clone()
            .or_else(|| external.and_then(External::name).map(str::to_owned))
            .or_else(|| Some(name.to_owned())),
        driver: volume.driver.clone(),
        driver_opts: volume
            .driver_opts
            .as_ref()
            .map(|o| o.to_map('='))
            .unwrap_or_default(),
        external: external.is_some_and(External::is_external),
        labels: volume.labels.as_ref().map(|l| l.to_map('=')).unwrap_or_default(),
    }
}

/// Make relative host paths of a service absolute against `base`.
pub(super) fn resolve_service_paths(config: &mut ServiceConfig, base: &Path) {
    let resolve = |path: &Path| -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        }
    };

    if let Some(build) = config.build.as_mut() {
        build.context = resolve(&build.context);
    }
    config.env_file = config.env_file.iter().map(|p| resolve(p)).collect();
    for mount in config.volumes.iter_mut() {
        if mount.kind == MountType::Bind
            && let Some(source) = mount.source.as_mut()
            && source.starts_with('.')
        {
            *source = resolve(Path::new(source.as_str())).to_string_lossy().into_owned();
        }
    }
}
