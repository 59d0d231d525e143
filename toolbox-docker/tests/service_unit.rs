mod common;

use std::sync::Arc;
use std::time::Duration;

use toolbox_docker::oci::HealthStatus;
use toolbox_docker::service::InstanceSpec;
use toolbox_docker::{ErrorKind, HealthCheck, ServiceConfig, ServiceLogger, ServiceState, ServiceUnit};

use common::FakeEngine;

const TIMEOUT: Duration = Duration::from_secs(5);
const INTERVAL: Duration = Duration::from_secs(1);

fn unit(engine: &Arc<FakeEngine>, config: ServiceConfig) -> ServiceUnit<FakeEngine> {
    let instance = InstanceSpec::new(config.name.clone());
    let logger = ServiceLogger::plain(&config.name);
    ServiceUnit::new(engine.clone(), config, instance, logger)
}

fn checked(name: &str) -> ServiceConfig {
    ServiceConfig::new(name)
        .with_image("chainweb-node:latest")
        .with_health_check(HealthCheck::shell("curl -f localhost:1848/health-check"))
}

#[tokio::test]
async fn test_start_runs_a_fresh_container() {
    let engine = Arc::new(FakeEngine::new());
    let mut unit = unit(&engine, ServiceConfig::new("node").with_image("node:20"));

    let id = unit.start().await.unwrap();

    assert_eq!(unit.container_id(), Some(id.as_str()));
    assert_eq!(unit.state(), ServiceState::Running);
    assert_eq!(engine.calls("pull_image"), ["node:20"]);
    assert!(engine.container("node").unwrap().running);
}

#[tokio::test]
async fn test_start_replaces_a_stale_container() {
    let engine = Arc::new(FakeEngine::new().with_image("node:20").with_container("node", true));
    let stale = engine.container("node").unwrap().id;
    let mut unit = unit(&engine, ServiceConfig::new("node").with_image("node:20"));

    let id = unit.start().await.unwrap();

    assert_ne!(id, stale);
    assert_eq!(engine.calls("stop_container"), ["node"]);
    assert_eq!(engine.calls("remove_container"), ["node"]);
    assert_eq!(engine.calls("create_container"), ["node"]);
}

#[tokio::test]
async fn test_built_services_are_always_built() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();

    let engine = Arc::new(FakeEngine::new());
    let mut config = ServiceConfig::new("miner");
    config.build = Some(toolbox_docker::BuildConfig {
        context: dir.path().to_path_buf(),
        ..Default::default()
    });
    let mut unit = unit(&engine, config);

    unit.start().await.unwrap();

    assert_eq!(engine.calls("build_image"), ["miner:latest"]);
    assert!(engine.calls("pull_image").is_empty());
}

#[tokio::test]
async fn test_missing_build_context_is_a_build_failure() {
    let engine = Arc::new(FakeEngine::new());
    let mut config = ServiceConfig::new("miner");
    config.build = Some(toolbox_docker::BuildConfig {
        context: "/does/not/exist".into(),
        ..Default::default()
    });
    let mut unit = unit(&engine, config);

    let err = unit.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BuildFailed);
    assert_eq!(err.service(), Some("miner"));
    assert!(engine.calls("create_container").is_empty());
}

#[tokio::test]
async fn test_health_wait_returns_at_once_without_a_check() {
    let engine = Arc::new(FakeEngine::new());
    let mut unit = unit(&engine, ServiceConfig::new("node").with_image("node:20"));
    unit.start().await.unwrap();
    let inspections = engine.calls("inspect_container").len();

    unit.wait_for_healthy(TIMEOUT, INTERVAL).await.unwrap();

    assert_eq!(engine.calls("inspect_container").len(), inspections);
    assert_eq!(unit.state(), ServiceState::Running);
}

#[tokio::test]
async fn test_disabled_health_checks_are_skipped() {
    let engine = Arc::new(FakeEngine::new().with_health("node", &[HealthStatus::Unhealthy]));
    let mut config = checked("node");
    config.health_check.as_mut().unwrap().disable = true;
    let mut unit = unit(&engine, config);
    unit.start().await.unwrap();

    unit.wait_for_healthy(TIMEOUT, INTERVAL).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_health_wait_polls_until_healthy() {
    let engine = Arc::new(FakeEngine::new().with_health(
        "chainweb",
        &[HealthStatus::Starting, HealthStatus::Starting, HealthStatus::Healthy],
    ));
    let mut unit = unit(&engine, checked("chainweb"));
    unit.start().await.unwrap();

    unit.wait_for_healthy(TIMEOUT, INTERVAL).await.unwrap();

    assert_eq!(unit.state(), ServiceState::Healthy);
    assert!(!unit.health_check_failed());
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_containers_fail_fast() {
    let engine = Arc::new(FakeEngine::new().with_health(
        "chainweb",
        &[HealthStatus::Starting, HealthStatus::Unhealthy],
    ));
    let mut unit = unit(&engine, checked("chainweb"));
    unit.start().await.unwrap();

    let err = unit.wait_for_healthy(TIMEOUT, INTERVAL).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::HealthCheckFailed);
    assert_eq!(err.message(), "container is unhealthy: connection refused");
    assert_eq!(unit.state(), ServiceState::Unhealthy);
    // fails on a reported status, not a timeout
    assert!(!unit.health_check_failed());
}

#[tokio::test(start_paused = true)]
async fn test_health_wait_times_out() {
    let engine = Arc::new(FakeEngine::new().with_health("chainweb", &[HealthStatus::Starting]));
    let mut unit = unit(&engine, checked("chainweb"));
    unit.start().await.unwrap();

    let started = tokio::time::Instant::now();
    let err = unit.wait_for_healthy(TIMEOUT, INTERVAL).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(err.message(), "health check timed out after 5000ms");
    assert!(unit.health_check_failed());
    assert_eq!(started.elapsed(), TIMEOUT);
}

#[tokio::test(start_paused = true)]
async fn test_exited_containers_never_become_healthy() {
    let engine = Arc::new(
        FakeEngine::new()
            .with_health("chainweb", &[HealthStatus::Starting])
            .with_exit("chainweb", 2),
    );
    let mut unit = unit(&engine, checked("chainweb"));
    unit.start().await.unwrap();

    let err = unit.wait_for_healthy(TIMEOUT, INTERVAL).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HealthCheckFailed);
    assert!(err.message().contains("exit code 2"));
}

#[tokio::test]
async fn test_stop_and_remove_are_idempotent() {
    let engine = Arc::new(FakeEngine::new());
    let mut unit = unit(&engine, ServiceConfig::new("node").with_image("node:20"));
    unit.start().await.unwrap();

    unit.stop().await.unwrap();
    assert_eq!(unit.state(), ServiceState::Stopped);
    unit.stop().await.unwrap();
    assert_eq!(engine.calls("stop_container").len(), 1);

    unit.remove().await.unwrap();
    assert_eq!(unit.state(), ServiceState::Removed);
    assert_eq!(unit.container_id(), None);
    unit.remove().await.unwrap();
    unit.stop().await.unwrap();
    assert_eq!(unit.state(), ServiceState::Removed);
}

#[tokio::test]
async fn test_stop_on_a_unit_that_never_started() {
    let engine = Arc::new(FakeEngine::new());
    let mut unit = unit(&engine, ServiceConfig::new("node").with_image("node:20"));

    unit.stop().await.unwrap();
    unit.remove().await.unwrap();
    assert!(engine.calls("stop_container").is_empty());
}

#[tokio::test]
async fn test_stuck_containers_are_killed() {
    let engine = Arc::new(FakeEngine::new());
    let mut unit = unit(&engine, ServiceConfig::new("node").with_image("node:20"));
    unit.start().await.unwrap();
    engine.state().stuck.insert("node".to_owned());

    unit.stop().await.unwrap();

    assert_eq!(engine.calls("kill_container"), ["node"]);
    assert!(!engine.container("node").unwrap().running);
}

#[tokio::test]
async fn test_logs_only_stream_from_running_containers() {
    let engine = Arc::new(FakeEngine::new().with_exit("job", 0));
    let mut unit = unit(&engine, ServiceConfig::new("job").with_image("node:20"));
    unit.start().await.unwrap();

    unit.stream_logs().await.unwrap();
    assert!(engine.calls("container_logs").is_empty());

    // repeated calls are harmless
    unit.stop_log_stream();
    unit.stop_log_stream();
}

#[tokio::test]
async fn test_exec_runs_in_the_container() {
    let engine = Arc::new(FakeEngine::new());
    let mut unit = unit(&engine, ServiceConfig::new("node").with_image("node:20"));
    unit.start().await.unwrap();

    let output = unit
        .exec(vec!["echo".to_owned(), "hello".to_owned()])
        .await
        .unwrap();
    assert_eq!(output.exit_code, 0);
    assert_eq!(output.stdout, "echo hello");
}
