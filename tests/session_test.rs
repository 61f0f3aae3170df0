use bgdl::config::Settings;
use bgdl::coordinator::TransferCoordinator;
use bgdl::error::TransportError;
use bgdl::observer::{
    dispatch_until_settled, CompletionObserver, EventSink, ProgressObserver, RelaunchObserver, TransferEvent,
};
use bgdl::session::BackgroundSession;
use bgdl::state::{PendingTransfer, SessionRecord};
use bgdl::store::ResultStore;
use bgdl::task::TaskId;
use bgdl::transport::{TransferRequest, Transport};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct Recorder {
    events: Vec<TransferEvent>,
}

impl EventSink for Recorder {
    fn handle(&mut self, event: &TransferEvent) {
        self.events.push(event.clone());
    }
}

impl Recorder {
    fn last_written(&self) -> Option<u64> {
        self.events.iter().rev().find_map(|e| match e {
            TransferEvent::Progress { bytes_written, .. } => Some(*bytes_written),
            _ => None,
        })
    }
}

struct Harness {
    _root: TempDir,
    settings: Settings,
    session: Arc<BackgroundSession>,
    coordinator: TransferCoordinator,
    events: UnboundedReceiver<TransferEvent>,
}

fn harness() -> Harness {
    let root = tempdir().unwrap();
    let mut settings = Settings::new(root.path().join("downloads"));
    settings.staging_dir = root.path().join("staging");
    let session = Arc::new(BackgroundSession::new(&settings).unwrap());
    let (coordinator, events) = TransferCoordinator::new(
        session.clone(),
        ResultStore::new(&settings.download_dir),
        settings.stall_timeout,
    );
    Harness {
        _root: root,
        settings,
        session,
        coordinator,
        events,
    }
}

async fn settle(h: &mut Harness) -> (Option<TransferEvent>, Recorder) {
    let mut sink = Recorder::default();
    let outcome = tokio::time::timeout(Duration::from_secs(10), dispatch_until_settled(&mut h.events, &mut sink))
        .await
        .expect("transfer did not settle");
    (outcome, sink)
}

#[tokio::test]
async fn test_download_is_stored_under_url_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pictures/pic.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_string("picture bytes"))
        .mount(&server)
        .await;

    let mut h = harness();
    let handle = h
        .coordinator
        .start(&format!("{}/pictures/pic.jpg", server.uri()))
        .unwrap();
    assert!(SessionRecord::new(&h.settings.staging_dir).load().unwrap().is_some());

    let (outcome, sink) = settle(&mut h).await;

    let stored = h.settings.download_dir.join("pic.jpg");
    assert_eq!(
        outcome,
        Some(TransferEvent::Completed {
            id: handle.id,
            stored: Ok(stored.clone()),
        })
    );
    assert!(matches!(sink.events.first(), Some(TransferEvent::Started { .. })));
    assert_eq!(sink.last_written(), Some(13));
    assert_eq!(tokio::fs::read_to_string(&stored).await.unwrap(), "picture bytes");
    assert!(!h.session.part_path(handle.id).exists());
    assert!(h.coordinator.current().is_none());
}

#[tokio::test]
async fn test_second_download_replaces_first() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pic.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_string("BBBB"))
        .mount(&server)
        .await;

    let mut h = harness();
    tokio::fs::create_dir_all(&h.settings.download_dir).await.unwrap();
    tokio::fs::write(h.settings.download_dir.join("pic.jpg"), "AAAAAAAA")
        .await
        .unwrap();

    h.coordinator.start(&format!("{}/pic.jpg", server.uri())).unwrap();
    let (outcome, _) = settle(&mut h).await;

    assert!(matches!(outcome, Some(TransferEvent::Completed { stored: Ok(_), .. })));
    let contents = tokio::fs::read_to_string(h.settings.download_dir.join("pic.jpg"))
        .await
        .unwrap();
    assert_eq!(contents, "BBBB");
}

#[tokio::test]
async fn test_http_error_fails_and_frees_slot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.bin"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mut h = harness();
    let handle = h.coordinator.start(&format!("{}/missing.bin", server.uri())).unwrap();
    let (outcome, _) = settle(&mut h).await;

    match outcome {
        Some(TransferEvent::Failed { id, reason }) => {
            assert_eq!(id, handle.id);
            assert!(reason.contains("404"), "{}", reason);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(!h.session.part_path(handle.id).exists());
    assert!(h.session.pending().unwrap().is_none());
    assert!(!h.settings.download_dir.join("missing.bin").exists());
    assert!(h.coordinator.start(&format!("{}/missing.bin", server.uri())).is_ok());
}

#[tokio::test]
async fn test_relaunch_resumes_staged_bytes_and_signals_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/archive.bin"))
        .and(header("Range", "bytes=5-"))
        .respond_with(ResponseTemplate::new(206).set_body_string("World"))
        .mount(&server)
        .await;

    let mut h = harness();

    // State a previous process left behind.
    let pending = PendingTransfer::new(TaskId::new(), format!("{}/archive.bin", server.uri()));
    SessionRecord::new(&h.settings.staging_dir).save(&pending).unwrap();
    tokio::fs::write(h.session.part_path(pending.id), "Hello").await.unwrap();

    let found = h.session.pending().unwrap().expect("pending transfer");
    assert_eq!(found.id, pending.id);

    let (tx, rx) = oneshot::channel();
    h.coordinator.set_relaunch_signal(Box::new(move || {
        tx.send(()).expect("relaunch signal delivered twice");
    }));
    let handle = h.coordinator.resume(&found).unwrap();
    assert_eq!(handle.id, pending.id);

    let (outcome, sink) = settle(&mut h).await;
    assert!(matches!(outcome, Some(TransferEvent::Completed { stored: Ok(_), .. })));
    assert_eq!(sink.last_written(), Some(10));

    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("relaunch signal never fired")
        .unwrap();

    let contents = tokio::fs::read_to_string(h.settings.download_dir.join("archive.bin"))
        .await
        .unwrap();
    assert_eq!(contents, "HelloWorld");
    assert!(h.session.pending().unwrap().is_none());
}

#[tokio::test]
async fn test_range_ignored_restarts_from_zero() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fresh"))
        .mount(&server)
        .await;

    let mut h = harness();
    let pending = PendingTransfer::new(TaskId::new(), format!("{}/data.txt", server.uri()));
    SessionRecord::new(&h.settings.staging_dir).save(&pending).unwrap();
    tokio::fs::write(h.session.part_path(pending.id), "stale-partial-bytes")
        .await
        .unwrap();

    h.coordinator.resume(&pending).unwrap();
    let (outcome, _) = settle(&mut h).await;

    assert!(matches!(outcome, Some(TransferEvent::Completed { stored: Ok(_), .. })));
    let contents = tokio::fs::read_to_string(h.settings.download_dir.join("data.txt"))
        .await
        .unwrap();
    assert_eq!(contents, "fresh");
}

#[tokio::test]
async fn test_start_while_busy_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("slow")
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let mut h = harness();
    let first = h.coordinator.start(&format!("{}/slow.bin", server.uri())).unwrap();
    let second = h.coordinator.start(&format!("{}/other.bin", server.uri()));
    assert!(matches!(second, Err(bgdl::TransferError::AlreadyActive)));

    let (outcome, _) = settle(&mut h).await;
    assert_eq!(outcome.map(|e| e.id()), Some(first.id));
}

#[tokio::test]
async fn test_resume_of_fully_staged_file_completes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/done.txt"))
        .and(header("Range", "bytes=5-"))
        .respond_with(ResponseTemplate::new(416).insert_header("Content-Range", "bytes */5"))
        .mount(&server)
        .await;

    let mut h = harness();
    let pending = PendingTransfer::new(TaskId::new(), format!("{}/done.txt", server.uri()));
    SessionRecord::new(&h.settings.staging_dir).save(&pending).unwrap();
    tokio::fs::write(h.session.part_path(pending.id), "Hello").await.unwrap();

    h.coordinator.resume(&pending).unwrap();
    let (outcome, sink) = settle(&mut h).await;

    assert!(matches!(outcome, Some(TransferEvent::Completed { stored: Ok(_), .. })));
    assert_eq!(sink.last_written(), Some(5));
    let contents = tokio::fs::read_to_string(h.settings.download_dir.join("done.txt"))
        .await
        .unwrap();
    assert_eq!(contents, "Hello");
    assert!(h.session.pending().unwrap().is_none());
}

#[tokio::test]
async fn test_unsatisfiable_range_of_other_length_restarts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/grown.txt"))
        .and(header("Range", "bytes=5-"))
        .respond_with(ResponseTemplate::new(416).insert_header("Content-Range", "bytes */9"))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/grown.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("full body"))
        .mount(&server)
        .await;

    let mut h = harness();
    let pending = PendingTransfer::new(TaskId::new(), format!("{}/grown.txt", server.uri()));
    SessionRecord::new(&h.settings.staging_dir).save(&pending).unwrap();
    tokio::fs::write(h.session.part_path(pending.id), "Hello").await.unwrap();

    h.coordinator.resume(&pending).unwrap();
    let (outcome, _) = settle(&mut h).await;

    assert!(matches!(outcome, Some(TransferEvent::Completed { stored: Ok(_), .. })));
    let contents = tokio::fs::read_to_string(h.settings.download_dir.join("grown.txt"))
        .await
        .unwrap();
    assert_eq!(contents, "full body");
}

struct Quiet;

impl ProgressObserver for Quiet {
    fn on_progress(&self, _id: TaskId, _bytes_written: u64, _bytes_expected: i64) {}
}

impl CompletionObserver for Quiet {
    fn on_completion(&self, _id: TaskId, _result: Result<PathBuf, TransportError>) {}
}

impl RelaunchObserver for Quiet {
    fn on_all_events_delivered(&self) {}
}

/// Submits the next transfer from inside the completion callback.
struct Chained {
    session: Arc<BackgroundSession>,
    next: Mutex<Option<TransferRequest>>,
    submitted: Mutex<Option<oneshot::Sender<()>>>,
}

impl ProgressObserver for Chained {
    fn on_progress(&self, _id: TaskId, _bytes_written: u64, _bytes_expected: i64) {}
}

impl CompletionObserver for Chained {
    fn on_completion(&self, _id: TaskId, _result: Result<PathBuf, TransportError>) {
        let Some(next) = self.next.lock().take() else {
            return;
        };
        self.session.submit(next, Arc::new(Quiet)).unwrap();
        if let Some(tx) = self.submitted.lock().take() {
            let _ = tx.send(());
        }
    }
}

impl RelaunchObserver for Chained {
    fn on_all_events_delivered(&self) {}
}

#[tokio::test]
async fn test_transfer_started_from_completion_keeps_its_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_string("first"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("second")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let h = harness();
    let first = TransferRequest {
        id: TaskId::new(),
        url: format!("{}/a.bin", server.uri()),
    };
    let second = TransferRequest {
        id: TaskId::new(),
        url: format!("{}/b.bin", server.uri()),
    };
    let second_id = second.id;

    let (tx, rx) = oneshot::channel();
    let delegate = Arc::new(Chained {
        session: h.session.clone(),
        next: Mutex::new(Some(second)),
        submitted: Mutex::new(Some(tx)),
    });
    h.session.submit(first, delegate).unwrap();

    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("first transfer never completed")
        .unwrap();
    // Let the first transfer's task run to its end.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let pending = h.session.pending().unwrap().expect("record for the second transfer");
    assert_eq!(pending.id, second_id);

    h.session.cancel(second_id);
    assert!(h.session.pending().unwrap().is_none());
}
