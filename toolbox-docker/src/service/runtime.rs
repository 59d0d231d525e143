//! Translation of a service config into an engine create request.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use crate::config::{HealthCheck, MountType, ServiceConfig, VolumeMount};
use crate::error::{DockerError, ErrorKind, Result};
use crate::logger::ServiceLogger;
use crate::oci::{
    ContainerCreateBody, DeviceMapping, EndpointIpamConfig, EndpointSettings, HealthConfig,
    HostConfig, HostConfigLogConfig, NetworkingConfig, PortBinding, RestartPolicy,
    RestartPolicyNameEnum,
};
use crate::resources::parse_memory;

/// Label holding the service group of a container
pub const SERVICE_LABEL: &str = "dev.toolbox.service";

/// Label holding the instance name of a container
pub const INSTANCE_LABEL: &str = "dev.toolbox.instance";

const CPU_PERIOD: i64 = 100_000;
const NANOS_PER_CPU: f64 = 1e9;

/// Identity of one container of a service group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceSpec {
    /// Service group the instance belongs to
    pub group: String,

    /// Container name
    pub name: String,

    /// Shared network to attach to, using the group name as alias
    pub network: Option<String>,

    /// Extra labels added to the container
    pub labels: BTreeMap<String, String>,
}

impl InstanceSpec {
    /// A single-replica instance named after its group
    pub fn new(group: impl Into<String>) -> Self {
        let group = group.into();
        Self {
            name: group.clone(),
            group,
            ..Default::default()
        }
    }
}

fn read_env_file(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path).map_err(|e| {
        DockerError::new(
            ErrorKind::InvalidConfiguration,
            format!("failed to read env file {}: {e}", path.display()),
        )
    })?;

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect())
}

fn memory_bytes(value: Option<&str>) -> Option<i64> {
    match value?.trim() {
        "-1" => Some(-1),
        value => parse_memory(value).map(|b| b as i64),
    }
}

fn bind_string(mount: &VolumeMount) -> Option<String> {
    let source = mount.source.as_deref()?;
    let mut options = Vec::new();
    if mount.read_only {
        options.push("ro");
    }
    if let Some(propagation) = mount.bind.as_ref().and_then(|b| b.propagation.as_deref()) {
        options.push(propagation);
    }

    let mut bind = format!("{source}:{}", mount.target);
    if !options.is_empty() {
        bind.push(':');
        bind.push_str(&options.join(","));
    }
    Some(bind)
}

fn tmpfs_options(mount: &VolumeMount) -> String {
    let Some(tmpfs) = &mount.tmpfs else {
        return String::new();
    };
    let mut options = Vec::new();
    if let Some(size) = &tmpfs.size {
        options.push(format!("size={size}"));
    }
    if let Some(mode) = tmpfs.mode {
        options.push(format!("mode={mode}"));
    }
    options.join(",")
}

fn parse_device(device: &str) -> DeviceMapping {
    let mut parts = device.splitn(3, ':');
    let host = parts.next().unwrap_or_default().to_owned();
    let container = parts.next().map(str::to_owned).unwrap_or_else(|| host.clone());
    let permissions = parts.next().unwrap_or("rwm").to_owned();
    DeviceMapping {
        path_on_host: Some(host),
        path_in_container: Some(container),
        cgroup_permissions: Some(permissions),
    }
}

fn restart_policy(config: &ServiceConfig, logger: &ServiceLogger) -> Option<RestartPolicy> {
    let policy = |name, retries| {
        Some(RestartPolicy {
            name: Some(name),
            maximum_retry_count: retries,
        })
    };

    // the deploy block takes precedence over the legacy field
    if let Some(deploy) = config.deploy.as_ref().and_then(|d| d.restart_policy.as_ref())
        && let Some(condition) = deploy.condition.as_deref()
    {
        return match condition {
            "none" => policy(RestartPolicyNameEnum::NO, None),
            "on-failure" => policy(RestartPolicyNameEnum::ON_FAILURE, deploy.max_attempts),
            "any" => policy(RestartPolicyNameEnum::ALWAYS, None),
            other => {
                logger.warn(&format!("unsupported restart condition '{other}', using 'no'"));
                policy(RestartPolicyNameEnum::NO, None)
            }
        };
    }

    let restart = config.restart.as_deref()?;
    match restart.split_once(':') {
        _ if restart == "no" => policy(RestartPolicyNameEnum::NO, None),
        _ if restart == "always" => policy(RestartPolicyNameEnum::ALWAYS, None),
        _ if restart == "unless-stopped" => policy(RestartPolicyNameEnum::UNLESS_STOPPED, None),
        _ if restart == "on-failure" => policy(RestartPolicyNameEnum::ON_FAILURE, None),
        Some(("on-failure", retries)) if retries.parse::<i64>().is_ok() => {
            policy(RestartPolicyNameEnum::ON_FAILURE, retries.parse().ok())
        }
        _ => {
            logger.warn(&format!("unsupported restart policy '{restart}', using 'no'"));
            policy(RestartPolicyNameEnum::NO, None)
        }
    }
}

fn health_config(health_check: &HealthCheck) -> HealthConfig {
    let test = if health_check.is_disabled() {
        vec!["NONE".to_owned()]
    } else {
        health_check.test.clone()
    };

    HealthConfig {
        test: Some(test),
        interval: health_check.interval,
        timeout: health_check.timeout,
        retries: health_check.retries,
        start_period: health_check.start_period,
        ..Default::default()
    }
}

fn port_key(port: &str) -> String {
    if port.contains('/') {
        port.to_owned()
    } else {
        format!("{port}/tcp")
    }
}

/// Build the create request for one instance of a service.
///
/// Fails only if an env file cannot be read.
pub fn container_create_body(
    config: &ServiceConfig,
    instance: &InstanceSpec,
    logger: &ServiceLogger,
) -> Result<ContainerCreateBody> {
    // environment, env files first so explicit entries win
    let mut env = Vec::new();
    for path in &config.env_file {
        env.extend(read_env_file(path)?);
    }
    if let Some(environment) = &config.environment {
        env.extend(environment.to_list());
    }

    // ports
    let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    for port in &config.ports {
        let key = port.port_key();
        exposed_ports.insert(key.clone(), HashMap::new());
        port_bindings.entry(key).or_default().get_or_insert_with(Vec::new).push(PortBinding {
            host_ip: port.host_ip.clone(),
            host_port: port.published.clone(),
        });
    }
    for port in &config.expose {
        exposed_ports.insert(port_key(port), HashMap::new());
    }

    // storage
    let mut binds = Vec::new();
    let mut anonymous_volumes: HashMap<String, HashMap<(), ()>> = HashMap::new();
    let mut tmpfs: HashMap<String, String> = config
        .tmpfs
        .iter()
        .map(|entry| match entry.split_once(':') {
            Some((path, options)) => (path.to_owned(), options.to_owned()),
            None => (entry.clone(), String::new()),
        })
        .collect();
    for mount in &config.volumes {
        match mount.kind {
            MountType::Tmpfs => {
                tmpfs.insert(mount.target.clone(), tmpfs_options(mount));
            }
            MountType::Bind | MountType::Volume => match bind_string(mount) {
                Some(bind) => binds.push(bind),
                None => {
                    anonymous_volumes.insert(mount.target.clone(), HashMap::new());
                }
            },
        }
    }

    // resources, the deploy block fills in what the flat fields leave unset
    let resources = config.deploy.as_ref().and_then(|d| d.resources.as_ref());
    let limits = resources.and_then(|r| r.limits.as_ref());
    let reservations = resources.and_then(|r| r.reservations.as_ref());

    let memory = memory_bytes(
        config
            .mem_limit
            .as_deref()
            .or(limits.and_then(|l| l.memory.as_deref())),
    );
    let memory_reservation = memory_bytes(
        config
            .mem_reservation
            .as_deref()
            .or(reservations.and_then(|r| r.memory.as_deref())),
    );
    let pids_limit = config.pids_limit.or(limits.and_then(|l| l.pids));

    // a deploy cpu limit replaces the flat cpus setting
    let (nano_cpus, cpu_quota, cpu_period) = match limits.and_then(|l| l.cpus) {
        Some(cpus) => (
            None,
            Some((cpus * CPU_PERIOD as f64) as i64),
            Some(CPU_PERIOD),
        ),
        None => (
            config.cpus.map(|cpus| (cpus * NANOS_PER_CPU) as i64),
            None,
            None,
        ),
    };

    let log_config = config.logging.as_ref().map(|logging| HostConfigLogConfig {
        typ: logging.driver.clone(),
        config: Some(logging.options.clone().into_iter().collect()),
    });

    let network_mode = config.network_mode.clone().or_else(|| instance.network.clone());

    let host_config = HostConfig {
        binds: Some(binds).filter(|b| !b.is_empty()),
        tmpfs: Some(tmpfs).filter(|t| !t.is_empty()),
        port_bindings: Some(port_bindings).filter(|p| !p.is_empty()),
        restart_policy: restart_policy(config, logger),
        network_mode,
        memory,
        memory_reservation,
        memory_swap: memory_bytes(config.memswap_limit.as_deref()),
        memory_swappiness: config.mem_swappiness,
        shm_size: memory_bytes(config.shm_size.as_deref()),
        nano_cpus,
        cpu_quota,
        cpu_period,
        cpu_shares: config.cpu_shares,
        cpuset_cpus: config.cpuset.clone(),
        pids_limit,
        oom_score_adj: config.oom_score_adj,
        oom_kill_disable: config.oom_kill_disable,
        privileged: Some(config.privileged),
        cap_add: Some(config.cap_add.clone()).filter(|c| !c.is_empty()),
        cap_drop: Some(config.cap_drop.clone()).filter(|c| !c.is_empty()),
        devices: Some(config.devices.iter().map(|d| parse_device(d)).collect::<Vec<_>>())
            .filter(|d| !d.is_empty()),
        security_opt: Some(config.security_opt.clone()).filter(|s| !s.is_empty()),
        readonly_rootfs: Some(config.read_only),
        init: config.init,
        extra_hosts: Some(config.extra_hosts.clone()).filter(|h| !h.is_empty()),
        dns: Some(config.dns.clone()).filter(|d| !d.is_empty()),
        log_config,
        ..Default::default()
    };

    // only the shared network is attached, service network entries add
    // aliases and static addresses to it
    let networking_config = match (&config.network_mode, &instance.network) {
        (None, Some(network)) => {
            let mut aliases = vec![instance.group.clone()];
            let mut ipam = None;
            for entry in config.networks.values() {
                aliases.extend(entry.aliases.iter().cloned());
                if ipam.is_none() && (entry.ipv4_address.is_some() || entry.ipv6_address.is_some()) {
                    ipam = Some(EndpointIpamConfig {
                        ipv4_address: entry.ipv4_address.clone(),
                        ipv6_address: entry.ipv6_address.clone(),
                        ..Default::default()
                    });
                }
            }
            aliases.dedup();

            Some(NetworkingConfig {
                endpoints_config: Some(HashMap::from([(
                    network.clone(),
                    EndpointSettings {
                        aliases: Some(aliases),
                        ipam_config: ipam,
                        ..Default::default()
                    },
                )])),
            })
        }
        _ => None,
    };

    let mut labels: HashMap<String, String> = config.labels.clone().into_iter().collect();
    labels.extend(instance.labels.clone());
    labels.insert(SERVICE_LABEL.to_owned(), instance.group.clone());
    labels.insert(INSTANCE_LABEL.to_owned(), instance.name.clone());

    Ok(ContainerCreateBody {
        image: Some(config.image_name()),
        hostname: config.hostname.clone(),
        domainname: config.domainname.clone(),
        user: config.user.clone(),
        env: Some(env).filter(|e| !e.is_empty()),
        cmd: config.command.clone(),
        entrypoint: config.entrypoint.clone(),
        working_dir: config.working_dir.clone(),
        labels: Some(labels),
        exposed_ports: Some(exposed_ports).filter(|p| !p.is_empty()),
        volumes: Some(anonymous_volumes).filter(|v| !v.is_empty()),
        healthcheck: config.health_check.as_ref().map(health_config),
        stop_signal: config.stop_signal.clone(),
        stop_timeout: config.stop_grace_period.map(|secs| secs as i64),
        host_config: Some(host_config),
        networking_config,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{ComposeService, convert_compose_service};
    use crate::config::{DeployResources, ResourceSpec, RestartPolicyConfig};
    use serde_json::json;
    use std::io::Write;

    fn body_for(service: serde_json::Value) -> ContainerCreateBody {
        let service: ComposeService = serde_json::from_value(service).unwrap();
        let config = convert_compose_service("api", &service);
        container_create_body(&config, &InstanceSpec::new("api"), &ServiceLogger::plain("api"))
            .unwrap()
    }

    fn host_config(body: &ContainerCreateBody) -> &HostConfig {
        body.host_config.as_ref().unwrap()
    }

    #[test]
    fn it_translates_ports() {
        let body = body_for(json!({"image": "api", "ports": ["8080:80", "53:53/udp"], "expose": [9000]}));

        let exposed = body.exposed_ports.as_ref().unwrap();
        assert!(exposed.contains_key("80/tcp"));
        assert!(exposed.contains_key("53/udp"));
        assert!(exposed.contains_key("9000/tcp"));

        let bindings = host_config(&body).port_bindings.as_ref().unwrap();
        let binding = &bindings["80/tcp"].as_ref().unwrap()[0];
        assert_eq!(binding.host_port.as_deref(), Some("8080"));
        assert!(!bindings.contains_key("9000/tcp"));
    }

    #[test]
    fn it_translates_mounts_and_merges_tmpfs() {
        let body = body_for(json!({
            "image": "api",
            "tmpfs": ["/run:size=64m"],
            "volumes": [
                "data:/data",
                "./conf:/etc/conf:ro,rshared",
                "/scratch",
                {"type": "tmpfs", "target": "/tmp", "tmpfs": {"size": "100m", "mode": 1777}}
            ]
        }));

        let host = host_config(&body);
        assert_eq!(
            host.binds.as_ref().unwrap(),
            &vec!["data:/data".to_owned(), "./conf:/etc/conf:ro,rshared".to_owned()]
        );
        let tmpfs = host.tmpfs.as_ref().unwrap();
        assert_eq!(tmpfs["/run"], "size=64m");
        assert_eq!(tmpfs["/tmp"], "size=100m,mode=1777");
        assert!(body.volumes.as_ref().unwrap().contains_key("/scratch"));
    }

    #[test]
    fn it_reads_env_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# database\nDB_HOST=db\n\n  DB_PORT=5432  \n").unwrap();

        let mut config = ServiceConfig::new("api").with_image("api");
        config.env_file = vec![file.path().to_path_buf()];
        config.environment = Some(crate::config::Environment::List(vec!["DB_HOST=other".to_owned()]));

        let body =
            container_create_body(&config, &InstanceSpec::new("api"), &ServiceLogger::plain("api"))
                .unwrap();
        assert_eq!(
            body.env.unwrap(),
            vec!["DB_HOST=db", "DB_PORT=5432", "DB_HOST=other"]
        );
    }

    #[test]
    fn it_fails_on_missing_env_files() {
        let mut config = ServiceConfig::new("api").with_image("api");
        config.env_file = vec!["/nonexistent/.env".into()];
        let err =
            container_create_body(&config, &InstanceSpec::new("api"), &ServiceLogger::plain("api"))
                .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn flat_cpus_become_nano_cpus() {
        let body = body_for(json!({"image": "api", "cpus": 1.5, "mem_limit": "512m"}));
        let host = host_config(&body);
        assert_eq!(host.nano_cpus, Some(1_500_000_000));
        assert_eq!(host.cpu_quota, None);
        assert_eq!(host.memory, Some(512 * 1024 * 1024));
    }

    #[test]
    fn deploy_cpus_win_over_flat_cpus() {
        let mut config = ServiceConfig::new("api").with_image("api");
        config.cpus = Some(2.0);
        config.deploy = Some(crate::config::DeployConfig {
            resources: Some(DeployResources {
                limits: Some(ResourceSpec {
                    cpus: Some(0.5),
                    memory: Some("1g".to_owned()),
                    pids: Some(100),
                }),
                reservations: None,
            }),
            ..Default::default()
        });

        let body =
            container_create_body(&config, &InstanceSpec::new("api"), &ServiceLogger::plain("api"))
                .unwrap();
        let host = host_config(&body);
        assert_eq!(host.nano_cpus, None);
        assert_eq!(host.cpu_quota, Some(50_000));
        assert_eq!(host.cpu_period, Some(100_000));
        assert_eq!(host.memory, Some(1024 * 1024 * 1024));
        assert_eq!(host.pids_limit, Some(100));
    }

    #[test]
    fn it_resolves_restart_policies() {
        let logger = ServiceLogger::plain("api");
        let mut config = ServiceConfig::new("api");

        assert_eq!(restart_policy(&config, &logger), None);

        config.restart = Some("unless-stopped".to_owned());
        assert_eq!(
            restart_policy(&config, &logger).unwrap().name,
            Some(RestartPolicyNameEnum::UNLESS_STOPPED)
        );

        config.restart = Some("on-failure:5".to_owned());
        let policy = restart_policy(&config, &logger).unwrap();
        assert_eq!(policy.name, Some(RestartPolicyNameEnum::ON_FAILURE));
        assert_eq!(policy.maximum_retry_count, Some(5));

        config.restart = Some("sometimes".to_owned());
        assert_eq!(
            restart_policy(&config, &logger).unwrap().name,
            Some(RestartPolicyNameEnum::NO)
        );

        // deploy wins over the legacy field
        config.restart = Some("always".to_owned());
        config.deploy = Some(crate::config::DeployConfig {
            restart_policy: Some(RestartPolicyConfig {
                condition: Some("on-failure".to_owned()),
                max_attempts: Some(3),
                ..Default::default()
            }),
            ..Default::default()
        });
        let policy = restart_policy(&config, &logger).unwrap();
        assert_eq!(policy.name, Some(RestartPolicyNameEnum::ON_FAILURE));
        assert_eq!(policy.maximum_retry_count, Some(3));

        config.deploy.as_mut().unwrap().restart_policy.as_mut().unwrap().condition =
            Some("weekly".to_owned());
        assert_eq!(
            restart_policy(&config, &logger).unwrap().name,
            Some(RestartPolicyNameEnum::NO)
        );
    }

    #[test]
    fn it_labels_and_attaches_to_the_shared_network() {
        let mut config = ServiceConfig::new("api").with_image("api");
        config.labels.insert("team".to_owned(), "core".to_owned());
        config.networks.insert(
            "backend".to_owned(),
            crate::config::ServiceNetwork {
                aliases: vec!["api.internal".to_owned()],
                ipv4_address: Some("172.20.0.10".to_owned()),
                ..Default::default()
            },
        );

        let instance = InstanceSpec {
            group: "api".to_owned(),
            name: "api-2".to_owned(),
            network: Some("toolbox-network".to_owned()),
            labels: BTreeMap::from([("dev.toolbox.project".to_owned(), "devnet".to_owned())]),
        };
        let body = container_create_body(&config, &instance, &ServiceLogger::plain("api-2")).unwrap();

        let labels = body.labels.as_ref().unwrap();
        assert_eq!(labels[SERVICE_LABEL], "api");
        assert_eq!(labels[INSTANCE_LABEL], "api-2");
        assert_eq!(labels["team"], "core");
        assert_eq!(labels["dev.toolbox.project"], "devnet");

        assert_eq!(host_config(&body).network_mode.as_deref(), Some("toolbox-network"));
        let endpoints = body.networking_config.unwrap().endpoints_config.unwrap();
        let endpoint = &endpoints["toolbox-network"];
        assert_eq!(
            endpoint.aliases.as_ref().unwrap(),
            &vec!["api".to_owned(), "api.internal".to_owned()]
        );
        assert_eq!(
            endpoint.ipam_config.as_ref().unwrap().ipv4_address.as_deref(),
            Some("172.20.0.10")
        );
    }

    #[test]
    fn explicit_network_mode_skips_the_shared_network() {
        let mut config = ServiceConfig::new("api").with_image("api");
        config.network_mode = Some("host".to_owned());
        let instance = InstanceSpec {
            network: Some("toolbox-network".to_owned()),
            ..InstanceSpec::new("api")
        };
        let body = container_create_body(&config, &instance, &ServiceLogger::plain("api")).unwrap();
        assert_eq!(host_config(&body).network_mode.as_deref(), Some("host"));
        assert!(body.networking_config.is_none());
    }

    #[test]
    fn it_translates_health_checks() {
        let body = body_for(json!({
            "image": "api",
            "healthcheck": {"test": ["CMD", "curl", "-f", "http://localhost"], "interval": "2s", "retries": 3}
        }));
        let health = body.healthcheck.unwrap();
        assert_eq!(health.test.unwrap(), vec!["CMD", "curl", "-f", "http://localhost"]);
        assert_eq!(health.interval, Some(2_000_000_000));
        assert_eq!(health.retries, Some(3));
    }
}
