//! Background polling against a mock release service.

use std::sync::Arc;
use std::time::Duration;

use a3s_selfupdate::{BackgroundPoller, UpdateCoordinator, UpdateEvent, UpdaterConfig};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LATEST: &str = "/repos/nineteenss/goods_app/releases/latest";

async fn coordinator(server: &MockServer, dir: &tempfile::TempDir) -> Arc<UpdateCoordinator> {
    let cfg = UpdaterConfig::new("nineteenss", "goods_app")
        .with_api_base(server.uri())
        .with_target_exe(dir.path().join("goods_app"));
    Arc::new(UpdateCoordinator::new(cfg).unwrap())
}

async fn mount_tag(server: &MockServer, tag: &str) {
    Mock::given(method("GET"))
        .and(path(LATEST))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tag_name": tag,
            "assets": [{ "name": "goods_app.exe", "browser_download_url": "https://dl.example.com/goods_app.exe" }],
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_poller_announces_newer_release() {
    let server = MockServer::start().await;
    mount_tag(&server, "v2.0.0").await;
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator(&server, &dir).await;
    coordinator.set_current_version("1.4.2").await;
    let mut events = coordinator.subscribe();

    let cancel = CancellationToken::new();
    let handle = BackgroundPoller::new(coordinator.clone(), cancel.clone())
        .with_delays(Duration::from_millis(10), Duration::from_secs(3600))
        .spawn();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no event within 5s")
        .unwrap();
    assert_eq!(event, UpdateEvent::Available { tag: "v2.0.0".into() });
    assert_eq!(event.name(), "update:available");

    // polling never downloads
    assert!(!coordinator.staging_path().exists());
    assert!(!coordinator.status().await.downloaded);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_poller_quiet_when_up_to_date() {
    let server = MockServer::start().await;
    mount_tag(&server, "v1.0.0").await;
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator(&server, &dir).await;
    coordinator.set_current_version("v1.0.0").await;
    let mut events = coordinator.subscribe();

    let cancel = CancellationToken::new();
    let handle = BackgroundPoller::new(coordinator.clone(), cancel.clone())
        .with_delays(Duration::from_millis(1), Duration::from_millis(20))
        .spawn();

    tokio::time::sleep(Duration::from_millis(150)).await;
    cancel.cancel();
    handle.await.unwrap();

    assert!(events.try_recv().is_err());
    // ticks still refresh the cached release
    assert_eq!(coordinator.status().await.latest_version, "v1.0.0");
    assert!(!server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_poller_skips_without_current_version() {
    let server = MockServer::start().await;
    mount_tag(&server, "v2.0.0").await;
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator(&server, &dir).await;

    let cancel = CancellationToken::new();
    let handle = BackgroundPoller::new(coordinator, cancel.clone())
        .with_delays(Duration::from_millis(1), Duration::from_millis(20))
        .spawn();

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    handle.await.unwrap();

    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_poller_stops_promptly() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator(&server, &dir).await;
    coordinator.set_current_version("1.0.0").await;

    let cancel = CancellationToken::new();
    let handle = BackgroundPoller::new(coordinator, cancel.clone()).spawn();

    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("poller ignored cancellation")
        .unwrap();
}

#[tokio::test]
async fn test_poller_stops_during_interval_wait() {
    let server = MockServer::start().await;
    mount_tag(&server, "v1.0.0").await;
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator(&server, &dir).await;
    coordinator.set_current_version("1.0.0").await;

    let cancel = CancellationToken::new();
    let handle = BackgroundPoller::new(coordinator, cancel.clone())
        .with_delays(Duration::from_millis(1), Duration::from_secs(3600))
        .spawn();

    tokio::time::timeout(Duration::from_secs(5), async {
        while server.received_requests().await.unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first poll never happened");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("poller ignored cancellation during the interval")
        .unwrap();
}

#[tokio::test]
async fn test_poller_stops_while_queued_behind_download() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LATEST))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tag_name": "v2.0.0",
            "assets": [{ "name": "goods_app.exe", "browser_download_url": format!("{}/dl/goods_app.exe", server.uri()) }],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/dl/goods_app.exe"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"new".to_vec())
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator(&server, &dir).await;
    coordinator.set_current_version("1.0.0").await;

    let downloading = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.download().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // the poller's token is independent of the coordinator's shutdown token
    let cancel = CancellationToken::new();
    let handle = BackgroundPoller::new(coordinator.clone(), cancel.clone())
        .with_delays(Duration::from_millis(1), Duration::from_secs(3600))
        .spawn();
    tokio::time::sleep(Duration::from_millis(50)).await;

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("queued tick ignored cancellation")
        .unwrap();
    assert!(!coordinator.shutdown_token().is_cancelled());
    downloading.abort();
}
