//! End-to-end tests against a local HTTP server

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use dlgate_core::{DownloadManager, RequestQueue, StartRequest, CHUNK_SIZE};
use dlgate_types::{Settings, TransferState, UserAgent};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::body_of;

fn settings(max_concurrent: usize) -> Settings {
    Settings {
        max_concurrent_downloads: max_concurrent,
        ..Settings::default()
    }
}

async fn serve(server: &MockServer, route: &str, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(template)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_download_writes_exact_body() {
    let server = MockServer::start().await;
    serve(&server, "/file.bin", ResponseTemplate::new(200).set_body_bytes(body_of(20_000))).await;

    let manager = DownloadManager::new(&settings(2)).unwrap();
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("file.bin");

    let seen = Arc::new(AtomicUsize::new(0));
    let request = StartRequest::new(format!("{}/file.bin", server.uri()), &dest).with_observer({
        let seen = seen.clone();
        move |p| {
            assert_eq!(p.total_bytes, Some(20_000));
            seen.fetch_add(1, Ordering::SeqCst);
        }
    });

    let unit = manager.start(request).await.unwrap();

    assert_eq!(unit.state(), TransferState::Completed);
    assert_eq!(unit.bytes_downloaded(), 20_000);
    // 8192 + 8192 + 3616
    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert_eq!(std::fs::read(&dest).unwrap(), body_of(20_000));
}

#[tokio::test]
async fn test_empty_body_completes_with_empty_file() {
    let server = MockServer::start().await;
    serve(&server, "/empty", ResponseTemplate::new(200)).await;

    let manager = DownloadManager::new(&settings(1)).unwrap();
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("empty");

    let unit = manager
        .start(StartRequest::new(format!("{}/empty", server.uri()), &dest))
        .await
        .unwrap();

    assert_eq!(unit.state(), TransferState::Completed);
    assert_eq!(unit.bytes_downloaded(), 0);
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), 0);
}

#[tokio::test]
async fn test_server_error_leaves_no_file() {
    let server = MockServer::start().await;
    serve(&server, "/broken", ResponseTemplate::new(500)).await;

    let manager = DownloadManager::new(&settings(2)).unwrap();
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("broken");

    let (unit, task) = manager
        .spawn(StartRequest::new(format!("{}/broken", server.uri()), &dest))
        .unwrap();
    let err = task.await.unwrap().unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert_eq!(unit.state(), TransferState::Failed);
    assert!(unit.error().is_some());
    assert!(!dest.exists());
    assert!(manager.list_active().is_empty());
}

#[tokio::test]
async fn test_external_stop_after_two_chunks() {
    let server = MockServer::start().await;
    serve(&server, "/big", ResponseTemplate::new(200).set_body_bytes(body_of(50_000))).await;

    let manager = DownloadManager::new(&settings(2)).unwrap();
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("big");

    let token = CancellationToken::new();
    let request = StartRequest::new(format!("{}/big", server.uri()), &dest)
        .with_stop_signal(token.clone())
        .with_observer(move |p| {
            if p.bytes_downloaded == 2 * CHUNK_SIZE as u64 {
                token.cancel();
            }
        });

    let unit = manager.start(request).await.unwrap();

    assert_eq!(unit.state(), TransferState::Cancelled);
    assert_eq!(unit.bytes_downloaded(), 16_384);
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), 16_384);
    assert!(manager.list_active().is_empty());
}

#[tokio::test]
async fn test_manager_cancel_after_two_chunks() {
    let server = MockServer::start().await;
    serve(&server, "/big", ResponseTemplate::new(200).set_body_bytes(body_of(50_000))).await;

    let manager = DownloadManager::new(&settings(2)).unwrap();
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("big");

    let id_slot: Arc<OnceLock<String>> = Arc::new(OnceLock::new());
    let request = StartRequest::new(format!("{}/big", server.uri()), &dest).with_observer({
        let manager = manager.clone();
        let id_slot = id_slot.clone();
        move |p| {
            if p.bytes_downloaded == 2 * CHUNK_SIZE as u64 {
                if let Some(id) = id_slot.get() {
                    manager.cancel(id);
                }
            }
        }
    });

    let (unit, task) = manager.spawn(request).unwrap();
    id_slot.set(unit.id().to_string()).unwrap();
    let unit = task.await.unwrap().unwrap();

    assert_eq!(unit.state(), TransferState::Cancelled);
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), 16_384);
}

#[tokio::test]
async fn test_configured_user_agent_is_sent() {
    let server = MockServer::start().await;
    let mut agent = UserAgent::default();
    agent.set_browser_version("9.9.9");

    Mock::given(method("GET"))
        .and(path("/ua"))
        .and(header("user-agent", agent.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let settings = Settings {
        user_agent: agent,
        ..settings(1)
    };
    let manager = DownloadManager::new(&settings).unwrap();
    let dir = TempDir::new().unwrap();

    let unit = manager
        .start(StartRequest::new(format!("{}/ua", server.uri()), dir.path().join("ua")))
        .await
        .unwrap();
    assert_eq!(unit.state(), TransferState::Completed);
}

#[tokio::test]
async fn test_request_queue_over_http() {
    let server = MockServer::start().await;
    serve(&server, "/page", ResponseTemplate::new(200).set_body_string("<html></html>")).await;
    serve(&server, "/missing", ResponseTemplate::new(404).set_body_string("nope")).await;

    let transport = Arc::new(dlgate_core::HttpTransport::new(&Settings::default()).unwrap());
    let queue = RequestQueue::start(transport);

    let page = queue.fetch(format!("{}/page", server.uri())).await.unwrap();
    assert!(page.is_success());
    assert_eq!(page.content.as_deref(), Some("<html></html>"));

    let missing = queue.fetch(format!("{}/missing", server.uri())).await.unwrap();
    assert_eq!(missing.status, 404);
    assert!(!missing.is_success());

    queue.shutdown().await;
}
