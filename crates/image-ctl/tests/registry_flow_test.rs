//! End-to-end tests: client against a registry served on a local port

use golden_common::{ImageState, LastBuildSnapshot, PackerManifest};
use image_ctl::{build_report, RegisterOptions, Registration, RegistryClient};
use image_registry::{create_router, AppState};
use image_selector::ValidationPolicy;

/// Serve an in-memory registry on an ephemeral port
async fn spawn_registry() -> RegistryClient {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().unwrap();
    let app = create_router(AppState::new(ValidationPolicy::default()));

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    RegistryClient::new(format!("http://{}", addr))
}

fn manifest(build_time: i64, artifact_id: &str) -> PackerManifest {
    PackerManifest::from_json(&format!(
        r#"{{"builds": [{{"build_time": {}, "artifact_id": "{}"}}]}}"#,
        build_time, artifact_id
    ))
    .unwrap()
}

#[tokio::test]
async fn test_register_then_latest() {
    let client = spawn_registry().await;
    assert!(client.health_check().await.unwrap());

    let options = RegisterOptions::new("prod");
    let first = build_report(
        manifest(1704067200, "us-east-1:ami-first").last_build().unwrap(),
        &options,
    )
    .unwrap();
    let second = build_report(
        manifest(1704153600, "us-east-1:ami-second").last_build().unwrap(),
        &options,
    )
    .unwrap();

    for record in first.records.iter().chain(second.records.iter()) {
        match client.ingest(record).await.unwrap() {
            Registration::Recorded(response) => assert!(response.validation.passed),
            Registration::AlreadyRecorded => panic!("unexpected duplicate"),
        }
    }

    let latest = client.latest("prod").await.unwrap().expect("no latest image");
    assert_eq!(latest.id, "ami-second");

    // Re-reporting is treated as already recorded
    let again = client.ingest(&second.records[0]).await.unwrap();
    assert!(matches!(again, Registration::AlreadyRecorded));

    let history = client.history("prod").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, "ami-first");
}

#[tokio::test]
async fn test_deregister_and_validation() {
    let client = spawn_registry().await;
    assert!(client.latest("dev").await.unwrap().is_none());

    let mut options = RegisterOptions::new("dev");
    options.state = ImageState::Pending;
    let report = build_report(
        manifest(1704067200, "us-east-1:ami-dev").last_build().unwrap(),
        &options,
    )
    .unwrap();
    client.ingest(&report.records[0]).await.unwrap();

    let validation = client.validation("ami-dev").await.unwrap().unwrap();
    assert!(!validation.passed);
    assert!(validation.has_fatal());

    // Pending images cannot be deregistered
    let err = client.deregister("ami-dev").await.unwrap_err();
    assert!(err.to_string().contains("422"));

    let image = client.set_state("ami-dev", ImageState::Available).await.unwrap();
    assert_eq!(image.state, ImageState::Available);
    assert_eq!(client.latest("dev").await.unwrap().unwrap().id, "ami-dev");

    let image = client.deregister("ami-dev").await.unwrap();
    assert_eq!(image.state, ImageState::Deregistered);
    assert!(client.latest("dev").await.unwrap().is_none());

    let shown = client.get("ami-dev").await.unwrap().unwrap();
    assert_eq!(shown.state, ImageState::Deregistered);
    assert!(client.get("ami-unknown").await.unwrap().is_none());
}

#[tokio::test]
async fn test_snapshot_written_for_report() {
    let dir = tempfile::tempdir().unwrap();
    let report = build_report(
        manifest(1704067200, "eu-west-1:ami-snap").last_build().unwrap(),
        &RegisterOptions::new("staging"),
    )
    .unwrap();

    report
        .snapshot("ci", "logs/build.log")
        .unwrap()
        .write_to_dir(dir.path())
        .unwrap();

    let snapshot = LastBuildSnapshot::read_from_dir(dir.path(), "staging")
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.ami_id, "ami-snap");
    assert_eq!(snapshot.region, "eu-west-1");
    assert_eq!(snapshot.log_file, "logs/build.log");
}
