use crate::config::ServiceConfig;

/// Check a service for configuration problems.
///
/// Problems are returned as readable messages and never raised, the caller
/// decides whether any of them is fatal.
pub fn validate_service_config(config: &ServiceConfig) -> Vec<String> {
    let name = &config.name;
    let mut issues = Vec::new();

    if config.image.is_none() && config.build.is_none() {
        issues.push(format!("service '{name}': either image or build must be set"));
    }

    if let Some(build) = &config.build {
        if !build.context.exists() {
            issues.push(format!(
                "service '{name}': build context '{}' does not exist",
                build.context.display()
            ));
        } else {
            let dockerfile = build.context.join(build.dockerfile.as_deref().unwrap_or("Dockerfile"));
            if !dockerfile.exists() {
                issues.push(format!(
                    "service '{name}': Dockerfile '{}' does not exist",
                    dockerfile.display()
                ));
            }
        }
    }

    for env_file in &config.env_file {
        if !env_file.exists() {
            issues.push(format!(
                "service '{name}': env file '{}' does not exist",
                env_file.display()
            ));
        }
    }

    for (dependency, depends_on) in &config.depends_on {
        if depends_on.condition.is_none() {
            issues.push(format!(
                "service '{name}': dependency '{dependency}' has no condition"
            ));
        }
    }

    issues
}

/// Whether a service runs with the given active profiles.
///
/// Services without profiles only run when no profile is active, services
/// with profiles run when any of them is active.
pub fn should_include_service(config: &ServiceConfig, active_profiles: &[String]) -> bool {
    if config.profiles.is_empty() {
        return active_profiles.is_empty();
    }
    config.profiles.iter().any(|p| active_profiles.contains(p))
}
