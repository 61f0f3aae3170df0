//! The single-slot transfer coordinator.
//!
//! At most one transfer is in flight. Start requests arriving while one is
//! active are rejected, not queued. Every way a transfer can end (success,
//! transport failure, cancel, watchdog) clears the slot, so a lost callback
//! cannot block later transfers forever.
//!
//! All slot mutations happen under one mutex. Events are queued while that
//! mutex is held, which keeps their order identical to the order of state
//! changes even when `start` and transport callbacks race.
use crate::error::{TransferError, TransportError};
use crate::observer::{CompletionObserver, ProgressObserver, RelaunchObserver, SessionDelegate, TransferEvent};
use crate::state::PendingTransfer;
use crate::store::ResultStore;
use crate::task::{TaskHandle, TaskId, TaskState, TransferTask};
use crate::transport::{Transport, TransferRequest};
use crate::utils::get_filename_from_url;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use url::Url;

/// Host-supplied callback fired once all relaunch events have been delivered.
pub type RelaunchSignal = Box<dyn FnOnce() + Send>;

#[derive(Clone)]
pub struct TransferCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    slot: Mutex<Option<TransferTask>>,
    relaunch_signal: Mutex<Option<RelaunchSignal>>,
    transport: Arc<dyn Transport>,
    store: ResultStore,
    events: UnboundedSender<TransferEvent>,
    stall_timeout: Option<Duration>,
}

impl TransferCoordinator {
    /// Builds a coordinator and the receiving end of its event stream.
    /// `stall_timeout` of `None` disables the watchdog.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: ResultStore,
        stall_timeout: Option<Duration>,
    ) -> (Self, UnboundedReceiver<TransferEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Inner {
            slot: Mutex::new(None),
            relaunch_signal: Mutex::new(None),
            transport,
            store,
            events,
            stall_timeout,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    pub fn start(&self, url: &str) -> Result<TaskHandle, TransferError> {
        self.begin(TaskId::new(), url)
    }

    /// Re-adopts a transfer left pending by a previous process.
    pub fn resume(&self, pending: &PendingTransfer) -> Result<TaskHandle, TransferError> {
        info!(id = %pending.id, url = %pending.url, since = %pending.created_at, "resuming pending transfer");
        self.begin(pending.id, &pending.url)
    }

    fn begin(&self, id: TaskId, url: &str) -> Result<TaskHandle, TransferError> {
        let parsed = Url::parse(url).map_err(|_| TransferError::InvalidUrl(url.to_string()))?;
        let destination_name = get_filename_from_url(&parsed);

        let handle = {
            let mut slot = self.inner.slot.lock();
            if let Some(active) = slot.as_ref().filter(|t| t.state == TaskState::Active) {
                debug!(active = %active.id, requested = %url, "start ignored, transfer in flight");
                return Err(TransferError::AlreadyActive);
            }
            let mut task = TransferTask::new(id, url.to_string(), destination_name);
            task.activate();
            let handle = task.handle();
            *slot = Some(task);
            self.emit(TransferEvent::Started {
                id,
                url: handle.url.clone(),
                destination_name: handle.destination_name.clone(),
            });
            handle
        };

        info!(%id, %url, name = %handle.destination_name, "transfer started");

        let request = TransferRequest {
            id,
            url: url.to_string(),
        };
        let delegate: Arc<dyn SessionDelegate> = Arc::new(self.clone());
        if let Err(e) = self.inner.transport.submit(request, delegate) {
            error!(%id, error = %e, "transport rejected transfer");
            let mut slot = self.inner.slot.lock();
            if slot.as_ref().is_some_and(|t| t.id == id) {
                *slot = None;
                self.emit(TransferEvent::Failed {
                    id,
                    reason: e.to_string(),
                });
            }
            return Err(e.into());
        }

        // A cancel or reap between releasing the slot and the submit above
        // reached the transport before it knew the id.
        if !self.is_current(id) {
            debug!(%id, "transfer ended before submission finished");
            self.inner.transport.cancel(id);
            return Err(TransportError::Cancelled.into());
        }

        Ok(handle)
    }

    /// Clears the active transfer and tells the transport to drop it.
    /// Late callbacks for the cancelled id are ignored.
    pub fn cancel(&self) -> Option<TaskId> {
        let id = {
            let mut slot = self.inner.slot.lock();
            match slot.take() {
                Some(task) if task.state == TaskState::Active => {
                    self.emit(TransferEvent::Failed {
                        id: task.id,
                        reason: TransportError::Cancelled.to_string(),
                    });
                    task.id
                }
                other => {
                    *slot = other;
                    return None;
                }
            }
        };
        info!(%id, "transfer cancelled");
        self.inner.transport.cancel(id);
        Some(id)
    }

    /// Fails the active transfer if no callback arrived within the stall
    /// timeout, measured against `now`.
    pub fn reap_stalled(&self, now: Instant) -> Option<TaskId> {
        let timeout = self.inner.stall_timeout?;
        let id = {
            let mut slot = self.inner.slot.lock();
            let stalled = slot.as_ref().is_some_and(|t| {
                t.state == TaskState::Active && now.saturating_duration_since(t.last_activity) >= timeout
            });
            if !stalled {
                return None;
            }
            let task = slot.take()?;
            let err = TransportError::Stalled(timeout);
            warn!(id = %task.id, error = %err, "watchdog cleared stalled transfer");
            self.emit(TransferEvent::Failed {
                id: task.id,
                reason: err.to_string(),
            });
            task.id
        };
        self.inner.transport.cancel(id);
        Some(id)
    }

    /// Runs [`reap_stalled`](Self::reap_stalled) every `period`.
    /// Returns `None` when no stall timeout is configured.
    pub fn spawn_watchdog(&self, period: Duration) -> Option<JoinHandle<()>> {
        if self.inner.stall_timeout.is_none() {
            return None;
        }
        let coordinator = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                coordinator.reap_stalled(Instant::now());
            }
        }))
    }

    pub fn set_relaunch_signal(&self, signal: RelaunchSignal) {
        let previous = self.inner.relaunch_signal.lock().replace(signal);
        if previous.is_some() {
            warn!("replacing a relaunch signal that was never delivered");
        }
    }

    pub fn current(&self) -> Option<TransferTask> {
        self.inner.slot.lock().clone()
    }

    fn is_current(&self, id: TaskId) -> bool {
        self.inner
            .slot
            .lock()
            .as_ref()
            .is_some_and(|t| t.id == id && t.state == TaskState::Active)
    }

    pub fn is_active(&self) -> bool {
        self.inner
            .slot
            .lock()
            .as_ref()
            .is_some_and(|t| t.state == TaskState::Active)
    }

    fn emit(&self, event: TransferEvent) {
        if self.inner.events.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }
}

impl ProgressObserver for TransferCoordinator {
    fn on_progress(&self, id: TaskId, bytes_written: u64, bytes_expected: i64) {
        let mut slot = self.inner.slot.lock();
        let Some(task) = slot.as_mut().filter(|t| t.id == id && t.state == TaskState::Active) else {
            trace!(%id, "ignoring progress for stale task");
            return;
        };
        let fraction = task.record_progress(bytes_written, bytes_expected);
        self.emit(TransferEvent::Progress {
            id,
            bytes_written: task.bytes_written,
            bytes_expected: task.bytes_expected,
            fraction,
        });
    }
}

impl CompletionObserver for TransferCoordinator {
    fn on_completion(&self, id: TaskId, result: Result<PathBuf, TransportError>) {
        let mut slot = self.inner.slot.lock();
        if !slot.as_ref().is_some_and(|t| t.id == id && t.state == TaskState::Active) {
            debug!(%id, "ignoring completion for stale task");
            return;
        }
        let Some(mut task) = slot.take() else {
            return;
        };

        match result {
            Ok(temp_path) => {
                task.state = TaskState::Completed;
                info!(%id, bytes = task.bytes_written, "transfer completed");
                let stored = match self.inner.store.relocate(&temp_path, &task.destination_name) {
                    Ok(path) => {
                        info!(%id, path = ?path, "download stored");
                        Ok(path)
                    }
                    Err(e) => {
                        warn!(%id, error = %e, "download completed but could not be stored");
                        Err(e.to_string())
                    }
                };
                self.emit(TransferEvent::Completed { id, stored });
            }
            Err(e) => {
                task.state = TaskState::Failed;
                error!(%id, url = %task.source_url, error = %e, "transfer failed");
                self.emit(TransferEvent::Failed {
                    id,
                    reason: e.to_string(),
                });
            }
        }
    }
}

impl RelaunchObserver for TransferCoordinator {
    fn on_all_events_delivered(&self) {
        // Taken before invoking, so a re-entrant call finds nothing.
        let signal = self.inner.relaunch_signal.lock().take();
        match signal {
            Some(signal) => {
                info!("all background events delivered, releasing host");
                signal();
            }
            None => debug!("all background events delivered"),
        }
    }
}
