//! HTTP background session.
//!
//! Plays the part an OS background-transfer service would: it stages the
//! body in `<staging>/<id>.part`, keeps a session record so a relaunched
//! process can pick the transfer up again, and resumes with a `Range`
//! request when a partial file is already on disk.
//!
//! Construct one per process and share it; the coordinator only sees it
//! through [`Transport`].
use crate::config::Settings;
use crate::error::TransportError;
use crate::observer::SessionDelegate;
use crate::state::{PendingTransfer, SessionRecord};
use crate::task::TaskId;
use crate::transport::{Transport, TransferRequest};
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, Response, StatusCode};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct BackgroundSession {
    client: Client,
    staging_dir: PathBuf,
    record: Arc<SessionRecord>,
    running: Arc<Mutex<HashMap<TaskId, JoinHandle<()>>>>,
}

impl BackgroundSession {
    pub fn new(settings: &Settings) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .connect_timeout(settings.connect_timeout)
            .build()?;

        Ok(Self {
            client,
            staging_dir: settings.staging_dir.clone(),
            record: Arc::new(SessionRecord::new(&settings.staging_dir)),
            running: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// The transfer a previous process left unfinished, if any.
    pub fn pending(&self) -> io::Result<Option<PendingTransfer>> {
        self.record.load()
    }

    pub fn part_path(&self, id: TaskId) -> PathBuf {
        part_path(&self.staging_dir, id)
    }
}

fn part_path(staging_dir: &Path, id: TaskId) -> PathBuf {
    staging_dir.join(format!("{}.part", id))
}

impl Transport for BackgroundSession {
    fn submit(&self, request: TransferRequest, delegate: Arc<dyn SessionDelegate>) -> Result<(), TransportError> {
        let runtime = Handle::try_current().map_err(|e| TransportError::Io(io::Error::new(io::ErrorKind::Other, e)))?;

        std::fs::create_dir_all(&self.staging_dir)?;
        let pending = match self.record.load()? {
            Some(existing) if existing.id == request.id => existing,
            _ => PendingTransfer::new(request.id, request.url.clone()),
        };
        self.record.save(&pending)?;

        let id = request.id;
        let part = self.part_path(id);
        let client = self.client.clone();
        let record = self.record.clone();
        let running = self.running.clone();

        // Held across spawn so the task cannot deregister before it is registered.
        let mut registry = self.running.lock();
        let handle = runtime.spawn(async move {
            let result = run_transfer(&client, &request, &part, delegate.as_ref()).await;
            if result.is_err() {
                remove_quietly(&part).await;
            }
            // Cleared before delivery: a start made from the completion
            // callback writes its own record, which must survive.
            if let Err(e) = record.clear_if(id) {
                warn!(%id, error = %e, "failed to clear session record");
            }
            running.lock().remove(&id);
            delegate.on_completion(id, result);
            delegate.on_all_events_delivered();
        });
        registry.insert(id, handle);
        debug!(%id, "transfer submitted to background session");
        Ok(())
    }

    fn cancel(&self, id: TaskId) {
        let Some(handle) = self.running.lock().remove(&id) else {
            return;
        };
        handle.abort();

        if let Err(e) = self.record.clear_if(id) {
            warn!(%id, error = %e, "failed to clear session record");
        }
        if let Err(e) = std::fs::remove_file(self.part_path(id)) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(%id, error = %e, "failed to discard staged bytes");
            }
        }
        info!(%id, "background transfer aborted");
    }
}

async fn run_transfer(
    client: &Client,
    request: &TransferRequest,
    part: &Path,
    delegate: &dyn SessionDelegate,
) -> Result<PathBuf, TransportError> {
    let mut offset = match fs::metadata(part).await {
        Ok(metadata) => metadata.len(),
        Err(_) => 0,
    };

    let mut response = send(client, &request.url, offset).await?;
    if offset > 0 && response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
        match unsatisfied_range_length(response.headers()) {
            Some(total) if total == offset => {
                info!(id = %request.id, offset, "staged download already complete");
                delegate.on_progress(request.id, offset, i64::try_from(offset).unwrap_or(-1));
                return Ok(part.to_path_buf());
            }
            total => {
                info!(id = %request.id, offset, ?total, "staged bytes do not match remote length, restarting");
                offset = 0;
                response = send(client, &request.url, 0).await?;
            }
        }
    }

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status(status.as_u16()));
    }

    let append = offset > 0 && status == StatusCode::PARTIAL_CONTENT;
    if append {
        info!(id = %request.id, offset, "resuming staged download");
    } else if offset > 0 {
        info!(id = %request.id, offset, "server ignored range request, restarting");
        offset = 0;
    }

    let expected = expected_total(response.content_length(), offset);

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(part)
        .await?;

    if offset > 0 {
        delegate.on_progress(request.id, offset, expected);
    }

    let mut written = offset;
    let mut stream = response.bytes_stream();
    while let Some(item) = stream.next().await {
        let chunk = item?;
        if chunk.is_empty() {
            continue;
        }
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        delegate.on_progress(request.id, written, expected);
    }

    file.flush().await?;
    drop(file);

    Ok(part.to_path_buf())
}

async fn send(client: &Client, url: &str, offset: u64) -> Result<Response, TransportError> {
    let mut builder = client.get(url);
    if offset > 0 {
        builder = builder.header(header::RANGE, format!("bytes={}-", offset));
    }
    Ok(builder.send().await?)
}

/// Full length of the resource for progress reports, `-1` when unknown or
/// not representable.
fn expected_total(content_length: Option<u64>, offset: u64) -> i64 {
    content_length
        .and_then(|len| len.checked_add(offset))
        .and_then(|total| i64::try_from(total).ok())
        .unwrap_or(-1)
}

/// Complete length from a 416 response's `Content-Range: bytes */<len>`.
fn unsatisfied_range_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_RANGE)?
        .to_str()
        .ok()?
        .trim()
        .strip_prefix("bytes */")?
        .parse()
        .ok()
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = ?path, error = %e, "failed to remove staged file");
        }
    }
}
