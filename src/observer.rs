//! Callback surfaces around the coordinator.
//!
//! Inbound, the transport drives the coordinator through three one-method
//! traits. Outbound, the coordinator publishes [`TransferEvent`]s that a
//! single consumer hands to an [`EventSink`], one at a time and in order.
use crate::error::TransportError;
use crate::task::TaskId;
use indicatif::{HumanBytes, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedReceiver;

pub trait ProgressObserver: Send + Sync {
    /// `bytes_expected` is whatever the transport knows; zero or negative
    /// means the length is unknown.
    fn on_progress(&self, id: TaskId, bytes_written: u64, bytes_expected: i64);
}

pub trait CompletionObserver: Send + Sync {
    /// `Ok` carries the staged file holding the complete body.
    fn on_completion(&self, id: TaskId, result: Result<PathBuf, TransportError>);
}

pub trait RelaunchObserver: Send + Sync {
    fn on_all_events_delivered(&self);
}

/// Everything a transport needs to report back.
pub trait SessionDelegate: ProgressObserver + CompletionObserver + RelaunchObserver {}

impl<T> SessionDelegate for T where T: ProgressObserver + CompletionObserver + RelaunchObserver {}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Started {
        id: TaskId,
        url: String,
        destination_name: String,
    },
    Progress {
        id: TaskId,
        bytes_written: u64,
        bytes_expected: Option<u64>,
        fraction: f64,
    },
    /// The body arrived. `stored` is the relocation outcome, which may have
    /// failed without failing the transfer.
    Completed {
        id: TaskId,
        stored: Result<PathBuf, String>,
    },
    Failed {
        id: TaskId,
        reason: String,
    },
}

impl TransferEvent {
    pub fn id(&self) -> TaskId {
        match self {
            TransferEvent::Started { id, .. }
            | TransferEvent::Progress { id, .. }
            | TransferEvent::Completed { id, .. }
            | TransferEvent::Failed { id, .. } => *id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferEvent::Completed { .. } | TransferEvent::Failed { .. })
    }
}

/// Presentation side of the coordinator. Never called concurrently.
pub trait EventSink: Send {
    fn handle(&mut self, event: &TransferEvent);
}

/// Feeds events to `sink` until a terminal event arrives or the channel
/// closes. Returns the terminal event, if any.
pub async fn dispatch_until_settled(
    events: &mut UnboundedReceiver<TransferEvent>,
    sink: &mut dyn EventSink,
) -> Option<TransferEvent> {
    while let Some(event) = events.recv().await {
        sink.handle(&event);
        if event.is_terminal() {
            return Some(event);
        }
    }
    None
}

/// Terminal view: hidden while idle, a progress bar while a transfer runs.
pub struct ConsoleSink {
    pb: ProgressBar,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            pb: ProgressBar::hidden(),
        }
    }

    fn show(&mut self, name: &str) {
        let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr_with_hz(5));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes:>12}/{total_bytes:<12} {bytes_per_sec:>12} {eta:>4} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.set_message(format!("Downloading {}", name));
        self.pb = pb;
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for ConsoleSink {
    fn handle(&mut self, event: &TransferEvent) {
        match event {
            TransferEvent::Started { destination_name, .. } => self.show(destination_name),
            TransferEvent::Progress {
                bytes_written,
                bytes_expected,
                ..
            } => {
                if let Some(total) = bytes_expected {
                    self.pb.set_length(*total);
                }
                self.pb.set_position(*bytes_written);
            }
            TransferEvent::Completed { stored: Ok(path), .. } => {
                let size = self.pb.position();
                self.pb.finish_with_message(format!("Completed {} -> {}", HumanBytes(size), path.display()));
            }
            TransferEvent::Completed { stored: Err(e), .. } => {
                self.pb.abandon_with_message(format!("Downloaded, but could not store: {}", e));
            }
            TransferEvent::Failed { reason, .. } => {
                self.pb.abandon_with_message(format!("Failed: {}", reason));
            }
        }
    }
}
