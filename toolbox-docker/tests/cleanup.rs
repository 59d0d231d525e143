mod common;

use toolbox_docker::oci::{NetworkConfig, VolumeConfig};
use toolbox_docker::{CleanupOptions, Engine as _, ErrorKind, cleanup_resources};

use common::FakeEngine;

async fn seeded() -> FakeEngine {
    let engine = FakeEngine::new()
        .with_container("devnet-postgres", true)
        .with_container("devnet-chainweb-1", true)
        .with_container("devnet-chainweb-2", false)
        .with_container("unrelated", true);
    engine
        .create_network("devnet-network", NetworkConfig::default())
        .await
        .unwrap();
    engine
        .create_network("bridge", NetworkConfig::default())
        .await
        .unwrap();
    engine
        .create_volume("devnet-pgdata", VolumeConfig::default())
        .await
        .unwrap();
    engine
}

fn devnet() -> CleanupOptions {
    CleanupOptions {
        container_patterns: vec!["devnet-*".to_owned()],
        network_patterns: vec!["devnet-network".to_owned()],
        volume_patterns: vec!["devnet-*".to_owned()],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_removes_matching_containers_and_networks() {
    let engine = seeded().await;

    let report = cleanup_resources(&engine, devnet()).await.unwrap();

    assert!(report.is_success());
    assert_eq!(
        report.containers,
        ["devnet-chainweb-1", "devnet-chainweb-2", "devnet-postgres"]
    );
    assert_eq!(report.networks, ["devnet-network"]);
    // volumes are kept unless asked for
    assert!(report.volumes.is_empty());
    assert_eq!(report.removed(), 4);

    let state = engine.state();
    assert_eq!(state.containers.keys().collect::<Vec<_>>(), ["unrelated"]);
    assert!(state.networks.contains_key("bridge"));
    assert!(state.volumes.contains_key("devnet-pgdata"));
}

#[tokio::test]
async fn test_running_containers_are_stopped_first() {
    let engine = seeded().await;

    cleanup_resources(&engine, devnet()).await.unwrap();

    assert_eq!(
        engine.calls("stop_container"),
        ["devnet-chainweb-1", "devnet-chainweb-2", "devnet-postgres"]
    );
}

#[tokio::test]
async fn test_force_skips_the_graceful_stop() {
    let engine = seeded().await;

    let report = cleanup_resources(
        &engine,
        CleanupOptions {
            force: true,
            cleanup_volumes: true,
            ..devnet()
        },
    )
    .await
    .unwrap();

    assert!(engine.calls("stop_container").is_empty());
    assert_eq!(report.volumes, ["devnet-pgdata"]);
    assert!(engine.state().volumes.is_empty());
}

#[tokio::test]
async fn test_only_selected_kinds_are_cleaned() {
    let engine = seeded().await;

    let report = cleanup_resources(
        &engine,
        CleanupOptions {
            cleanup_containers: false,
            ..devnet()
        },
    )
    .await
    .unwrap();

    assert!(report.containers.is_empty());
    assert_eq!(report.networks, ["devnet-network"]);
    assert_eq!(engine.state().containers.len(), 4);
}

#[tokio::test]
async fn test_no_patterns_match_nothing() {
    let engine = seeded().await;

    let report = cleanup_resources(&engine, CleanupOptions::default())
        .await
        .unwrap();

    assert_eq!(report.removed(), 0);
    assert_eq!(engine.state().containers.len(), 4);
}

#[tokio::test]
async fn test_invalid_patterns_are_configuration_errors() {
    let engine = seeded().await;

    let err = cleanup_resources(
        &engine,
        CleanupOptions {
            container_patterns: vec!["devnet-{a,b".to_owned()],
            ..Default::default()
        },
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    assert!(engine.calls("remove_container").is_empty());
}
