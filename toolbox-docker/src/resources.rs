//! Default resource ceilings.
//!
//! Services that do not set memory, cpu or pid limits get the values of a
//! profile, either chosen explicitly or inferred from the image name.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::{DeployResources, ResourceSpec, ServiceConfig};
use crate::error::{DockerError, ErrorKind, Result};

/// Lowest memory limit a service may run with
pub const MIN_MEMORY: u64 = 128 * MB;

/// Lowest cpu share a service may run with
pub const MIN_CPUS: f64 = 0.25;

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

const DEFAULT_OOM_SCORE_ADJ: i64 = 100;
const DEFAULT_MEM_SWAPPINESS: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceProfile {
    pub name: &'static str,
    pub memory: &'static str,
    pub cpus: f64,
    pub pids: i64,
}

const fn profile(name: &'static str, memory: &'static str, cpus: f64, pids: i64) -> ResourceProfile {
    ResourceProfile {
        name,
        memory,
        cpus,
        pids,
    }
}

pub const DEFAULT_PROFILE: ResourceProfile = profile("default", "512m", 1.0, 1024);

// Inference walks this table in order, so names containing another name
// come first.
const PROFILES: [ResourceProfile; 8] = [
    profile("mining-client", "256m", 0.5, 256),
    profile("chainweb", "2g", 2.0, 2048),
    profile("devnet", "2g", 2.0, 2048),
    profile("postgres", "1g", 2.0, 1024),
    profile("mysql", "1g", 2.0, 1024),
    profile("redis", "256m", 0.5, 256),
    profile("nginx", "128m", 0.5, 256),
    profile("node", "512m", 1.0, 1024),
];

/// Look up a profile by name
pub fn resource_profile(name: &str) -> Option<ResourceProfile> {
    if name == DEFAULT_PROFILE.name {
        return Some(DEFAULT_PROFILE);
    }
    PROFILES.iter().find(|p| p.name == name).copied()
}

/// Pick the profile whose name appears in the image name
pub fn infer_profile(image: &str) -> ResourceProfile {
    let image = image.to_lowercase();
    PROFILES
        .iter()
        .find(|p| image.contains(p.name))
        .copied()
        .unwrap_or(DEFAULT_PROFILE)
}

/// Fill in unset resource limits.
///
/// Explicitly configured values are never replaced. An unknown profile name
/// falls back to inference from the image.
pub fn apply_resource_limits(config: &ServiceConfig, profile: Option<&str>) -> ServiceConfig {
    let profile = profile
        .and_then(resource_profile)
        .unwrap_or_else(|| infer_profile(&config.image_name()));

    let mut config = config.clone();

    // deploy limits are explicit configuration too
    if let Some(limits) = config
        .deploy
        .as_ref()
        .and_then(|d| d.resources.as_ref())
        .and_then(|r| r.limits.clone())
    {
        if config.mem_limit.is_none() {
            config.mem_limit = limits.memory;
        }
        config.cpus = config.cpus.or(limits.cpus);
        config.pids_limit = config.pids_limit.or(limits.pids);
    }

    config
        .mem_limit
        .get_or_insert_with(|| profile.memory.to_owned());
    config.cpus.get_or_insert(profile.cpus);
    config.pids_limit.get_or_insert(profile.pids);
    config.oom_score_adj.get_or_insert(DEFAULT_OOM_SCORE_ADJ);
    config.mem_swappiness.get_or_insert(DEFAULT_MEM_SWAPPINESS);

    let flat_limits = ResourceSpec {
        cpus: config.cpus,
        memory: config.mem_limit.clone(),
        pids: config.pids_limit,
    };

    let resources = config
        .deploy
        .get_or_insert_with(Default::default)
        .resources
        .get_or_insert_with(DeployResources::default);

    let limits = resources.limits.get_or_insert(flat_limits).clone();

    resources.reservations.get_or_insert_with(|| ResourceSpec {
        cpus: limits.cpus.map(|c| c / 2.0),
        memory: limits
            .memory
            .as_deref()
            .and_then(parse_memory)
            .map(|bytes| format_memory(bytes / 2)),
        pids: None,
    });

    config
}

fn invalid(config: &ServiceConfig, message: String) -> DockerError {
    DockerError::new(ErrorKind::InvalidConfiguration, message).with_service(&config.name)
}

// `-1` means unlimited and is left to the engine
fn memory_field(config: &ServiceConfig, field: &str, value: Option<&str>) -> Result<Option<u64>> {
    value
        .filter(|v| v.trim() != "-1")
        .map(|v| parse_memory(v).ok_or_else(|| invalid(config, format!("invalid {field} '{v}'"))))
        .transpose()
}

/// Check that the resource limits of a service are usable.
pub fn validate_resource_limits(config: &ServiceConfig) -> Result<()> {
    let resources = config.deploy.as_ref().and_then(|d| d.resources.as_ref());
    let limits = resources.and_then(|r| r.limits.as_ref());
    let reservations = resources.and_then(|r| r.reservations.as_ref());

    let memory = memory_field(
        config,
        "memory limit",
        config
            .mem_limit
            .as_deref()
            .or(limits.and_then(|l| l.memory.as_deref())),
    )?;
    if let Some(memory) = memory
        && memory < MIN_MEMORY
    {
        return Err(invalid(
            config,
            format!("memory limit of {memory} bytes is below the minimum of 128m"),
        ));
    }

    let cpus = config.cpus.or(limits.and_then(|l| l.cpus));
    if let Some(cpus) = cpus
        && cpus < MIN_CPUS
    {
        return Err(invalid(
            config,
            format!("cpu limit of {cpus} is below the minimum of {MIN_CPUS}"),
        ));
    }

    let reserved_memory = memory_field(
        config,
        "memory reservation",
        config
            .mem_reservation
            .as_deref()
            .or(reservations.and_then(|r| r.memory.as_deref())),
    )?;
    if let (Some(reserved), Some(limit)) = (reserved_memory, memory)
        && reserved > limit
    {
        return Err(invalid(
            config,
            format!("memory reservation of {reserved} bytes exceeds the limit of {limit} bytes"),
        ));
    }

    if let (Some(reserved), Some(limit)) = (reservations.and_then(|r| r.cpus), cpus)
        && reserved > limit
    {
        return Err(invalid(
            config,
            format!("cpu reservation of {reserved} exceeds the limit of {limit}"),
        ));
    }

    Ok(())
}

static MEMORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*([bkmg])?b?\s*$").expect("memory regex should be valid")
});

/// Parse a memory size such as `512m`, `1g`, `64MB` or `1048576` into bytes.
pub fn parse_memory(value: &str) -> Option<u64> {
    let caps = MEMORY_RE.captures(value)?;
    let amount: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        None => 1,
        Some(u) if u == "b" => 1,
        Some(u) if u == "k" => KB,
        Some(u) if u == "m" => MB,
        Some(u) if u == "g" => GB,
        Some(_) => return None,
    };
    Some((amount * unit as f64) as u64)
}

/// Format a byte count with the largest unit that divides it.
pub fn format_memory(bytes: u64) -> String {
    match bytes {
        0 => "0".to_owned(),
        b if b % GB == 0 => format!("{}g", b / GB),
        b if b % MB == 0 => format!("{}m", b / MB),
        b if b % KB == 0 => format!("{}k", b / KB),
        b => b.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_parses_memory_sizes() {
        assert_eq!(parse_memory("1048576"), Some(1048576));
        assert_eq!(parse_memory("512m"), Some(512 * MB));
        assert_eq!(parse_memory("512M"), Some(512 * MB));
        assert_eq!(parse_memory("1g"), Some(GB));
        assert_eq!(parse_memory("2GB"), Some(2 * GB));
        assert_eq!(parse_memory("64k"), Some(64 * KB));
        assert_eq!(parse_memory("100b"), Some(100));
        assert_eq!(parse_memory("1.5g"), Some(GB + 512 * MB));
        assert_eq!(parse_memory("lots"), None);
        assert_eq!(parse_memory("12t"), None);
        assert_eq!(parse_memory(""), None);
    }

    #[test]
    fn it_formats_memory_sizes() {
        assert_eq!(format_memory(GB), "1g");
        assert_eq!(format_memory(512 * MB), "512m");
        assert_eq!(format_memory(3 * KB), "3k");
        assert_eq!(format_memory(1000), "1000");
    }

    #[test]
    fn it_infers_profiles_from_image_names() {
        assert_eq!(infer_profile("postgres:15").name, "postgres");
        assert_eq!(infer_profile("library/Redis:7-alpine").name, "redis");
        assert_eq!(infer_profile("kadena/chainweb-mining-client:latest").name, "mining-client");
        assert_eq!(infer_profile("kadena/chainweb-node:latest").name, "chainweb");
        assert_eq!(infer_profile("node:20").name, "node");
        assert_eq!(infer_profile("busybox").name, "default");
    }

    #[test]
    fn it_looks_up_profiles_by_name() {
        assert_eq!(resource_profile("nginx").map(|p| p.memory), Some("128m"));
        assert_eq!(resource_profile("default"), Some(DEFAULT_PROFILE));
        assert_eq!(resource_profile("unknown"), None);
    }

    #[test]
    fn it_applies_the_inferred_profile() {
        let config = apply_resource_limits(&ServiceConfig::new("db").with_image("postgres:15"), None);
        assert_eq!(config.mem_limit.as_deref(), Some("1g"));
        assert_eq!(config.cpus, Some(2.0));
        assert_eq!(config.pids_limit, Some(1024));
        assert_eq!(config.oom_score_adj, Some(100));
        assert_eq!(config.mem_swappiness, Some(10));

        let resources = config.deploy.unwrap().resources.unwrap();
        let limits = resources.limits.unwrap();
        assert_eq!(limits.memory.as_deref(), Some("1g"));
        assert_eq!(limits.cpus, Some(2.0));
        let reservations = resources.reservations.unwrap();
        assert_eq!(reservations.memory.as_deref(), Some("512m"));
        assert_eq!(reservations.cpus, Some(1.0));
    }

    #[test]
    fn it_never_overwrites_explicit_limits() {
        let mut config = ServiceConfig::new("db").with_image("postgres:15");
        config.mem_limit = Some("3g".to_owned());
        config.oom_score_adj = Some(-500);

        let config = apply_resource_limits(&config, Some("redis"));
        assert_eq!(config.mem_limit.as_deref(), Some("3g"));
        assert_eq!(config.oom_score_adj, Some(-500));
        // the rest comes from the explicit profile
        assert_eq!(config.cpus, Some(0.5));
        assert_eq!(config.pids_limit, Some(256));
    }

    #[test]
    fn it_keeps_existing_deploy_limits() {
        let mut config = ServiceConfig::new("api").with_image("my/api").with_replicas(2);
        config.deploy.as_mut().unwrap().resources = Some(DeployResources {
            limits: Some(ResourceSpec {
                cpus: Some(4.0),
                memory: Some("4g".to_owned()),
                pids: None,
            }),
            reservations: None,
        });

        let config = apply_resource_limits(&config, Some("unknown"));
        let deploy = config.deploy.unwrap();
        assert_eq!(deploy.replicas, Some(2));
        let resources = deploy.resources.unwrap();
        assert_eq!(resources.limits.unwrap().cpus, Some(4.0));
        assert_eq!(resources.reservations.unwrap().memory.as_deref(), Some("2g"));
    }

    #[test]
    fn deploy_only_limits_win_over_the_profile() {
        use crate::compose::{ComposeService, convert_compose_service};
        use serde_json::json;

        let service: ComposeService = serde_json::from_value(json!({
            "image": "busybox",
            "deploy": {"resources": {"limits": {"memory": "4g", "cpus": "3"}}}
        }))
        .unwrap();
        let config = convert_compose_service("worker", &service);

        let config = apply_resource_limits(&config, None);
        assert_eq!(config.mem_limit.as_deref(), Some("4g"));
        assert_eq!(config.cpus, Some(3.0));
        // not given anywhere, so the profile fills it in
        assert_eq!(config.pids_limit, Some(1024));

        let resources = config.deploy.as_ref().unwrap().resources.as_ref().unwrap();
        assert_eq!(
            resources.reservations.as_ref().unwrap().memory.as_deref(),
            Some("2g")
        );
        assert!(validate_resource_limits(&config).is_ok());
    }

    #[test]
    fn it_rejects_memory_below_the_floor() {
        let mut config = ServiceConfig::new("tiny");
        config.mem_limit = Some("64m".to_owned());
        let err = validate_resource_limits(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
        assert_eq!(err.service(), Some("tiny"));
    }

    #[test]
    fn it_rejects_cpus_below_the_floor() {
        let mut config = ServiceConfig::new("tiny");
        config.cpus = Some(0.1);
        assert!(validate_resource_limits(&config).is_err());
    }

    #[test]
    fn it_rejects_reservations_above_the_limit() {
        let mut config = ServiceConfig::new("api");
        config.mem_limit = Some("256m".to_owned());
        config.mem_reservation = Some("512m".to_owned());
        assert!(validate_resource_limits(&config).is_err());

        let mut config = ServiceConfig::new("api");
        config.cpus = Some(1.0);
        config.deploy = Some(crate::config::DeployConfig {
            resources: Some(DeployResources {
                limits: None,
                reservations: Some(ResourceSpec {
                    cpus: Some(2.0),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        });
        assert!(validate_resource_limits(&config).is_err());
    }

    #[test]
    fn applied_defaults_are_valid() {
        for image in ["postgres:15", "nginx", "redis", "busybox"] {
            let config = apply_resource_limits(&ServiceConfig::new("svc").with_image(image), None);
            assert!(validate_resource_limits(&config).is_ok(), "{image}");
        }
    }
}
