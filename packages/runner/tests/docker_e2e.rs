// ABOUTME: End-to-end runs against a real Docker daemon using the Go fixtures in testdata/
// ABOUTME: Ignored by default; run with `cargo test -- --ignored` on a machine with Docker

mod common;

use common::testdata;
use dockertest_runner::{
    ContainerConfig, ContainerSession, DockerEngine, Engine, NetworkSession, OutputMode, Options,
    Phase, Runner,
};
use std::sync::Arc;
use std::time::Duration;

async fn docker() -> Arc<dyn Engine> {
    Arc::new(DockerEngine::connect().await.expect("Docker daemon not available"))
}

#[tokio::test]
#[ignore] // Requires Docker daemon
async fn test_simple_package_passes_with_coverage() {
    let runner = Runner::new(docker().await);
    let options = Options::builder(testdata("simple")).arg("-v").build().unwrap();

    let result = runner.run(options).await.unwrap();

    assert_eq!(result.exit_code, 0);
    let stdout = String::from_utf8_lossy(&result.stdout);
    assert!(stdout.contains("PASS") || stdout.contains("ok"), "output: {}", stdout);
    let coverage = result.coverage.expect("coverage profile missing");
    assert!(!coverage.is_empty());
    assert!(coverage.starts_with(b"mode:"));
}

#[tokio::test]
#[ignore] // Requires Docker daemon
async fn test_failing_package_reports_exit_code() {
    let runner = Runner::new(docker().await);

    let result = runner
        .run_with_output(Options::new(testdata("failing")).unwrap(), tokio::io::sink())
        .await
        .unwrap();

    assert_ne!(result.exit_code, 0);
    assert!(String::from_utf8_lossy(&result.stdout).contains("intentional failure"));
}

#[tokio::test]
#[ignore] // Requires Docker daemon
async fn test_dns_alias_resolves_inside_network() {
    let runner = Runner::new(docker().await);
    let options = Options::builder(testdata("dnsalias"))
        .aliases(["myapp.test"])
        .arg("-v")
        .build()
        .unwrap();

    let result = runner.run(options).await.unwrap();

    assert_eq!(
        result.exit_code,
        0,
        "output: {}",
        String::from_utf8_lossy(&result.stdout)
    );
}

#[tokio::test]
#[ignore] // Requires Docker daemon
async fn test_nested_containers_share_network() {
    let runner = Runner::new(docker().await);
    let options = Options::builder(testdata("nested"))
        .var_sock(true)
        .aliases(["parent.test"])
        .arg("-v")
        .build()
        .unwrap();

    let result = runner.run(options).await.unwrap();

    let stdout = String::from_utf8_lossy(&result.stdout);
    assert_eq!(result.exit_code, 0, "output: {}", stdout);
    // Both directions across the shared network, by alias, and neither skipped
    assert!(
        stdout.contains("--- PASS: TestParentReachesSiblingAlias"),
        "output: {}",
        stdout
    );
    assert!(
        stdout.contains("--- PASS: TestSiblingReachesParentAlias"),
        "output: {}",
        stdout
    );
    assert!(result.coverage.is_some_and(|c| !c.is_empty()));
}

#[tokio::test]
#[ignore] // Requires Docker daemon
async fn test_var_sock_mount_and_network_env() {
    let engine = docker().await;
    let (network, release) = NetworkSession::create(engine.clone()).await.unwrap();
    let config = ContainerConfig::new(testdata("simple"))
        .with_network(&network)
        .with_docker_socket(true);
    let mut container = ContainerSession::create(engine, config).await.unwrap();

    let out = container
        .execute_command(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "test -S /var/run/docker.sock && echo \"$TESTCONTAINERS_DOCKER_NETWORK\"".to_string(),
            ],
            OutputMode::Combined,
            &mut tokio::io::sink(),
        )
        .await
        .unwrap();

    container.terminate().await.unwrap();
    release.release().await.unwrap();

    assert_eq!(out.exit_code, 0);
    assert_eq!(String::from_utf8_lossy(&out.output).trim(), network.name());
}

#[tokio::test]
#[ignore] // Requires Docker daemon
async fn test_copy_missing_file_is_absent() {
    let engine = docker().await;
    let mut container = ContainerSession::create(engine, ContainerConfig::new(testdata("simple")))
        .await
        .unwrap();

    let missing = container.copy_file("/nonexistent/file.txt").await;
    let coverage = container.copy_coverage().await;
    container.terminate().await.unwrap();

    assert_eq!(missing.unwrap(), None);
    assert_eq!(coverage.unwrap(), None);
}

#[tokio::test]
#[ignore] // Requires Docker daemon
async fn test_short_deadline_is_classified_as_timeout() {
    let runner = Runner::new(docker().await);
    let options = Options::builder(testdata("simple"))
        .timeout(Duration::from_secs(1))
        .build()
        .unwrap();

    let err = runner.run(options).await.unwrap_err();

    assert!(err.is_timeout(), "unexpected error: {}", err);
    assert!(matches!(
        err.phase(),
        Some(Phase::CreateNetwork) | Some(Phase::CreateContainer)
    ));
    assert!(err.to_string().starts_with("timeout during"));
}
