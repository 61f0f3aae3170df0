use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;
use uuid::Uuid;

/// Identifier of one transfer. Stable across relaunches of the session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Idle,
    Active,
    Completed,
    Failed,
}

/// What the caller gets back from a successful start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: TaskId,
    pub url: String,
    pub destination_name: String,
}

/// One in-flight download held in the coordinator's slot.
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub id: TaskId,
    pub source_url: String,
    pub destination_name: String,
    pub bytes_written: u64,
    /// `None` while the transport has not reported a positive length.
    pub bytes_expected: Option<u64>,
    pub state: TaskState,
    pub last_activity: Instant,
}

impl TransferTask {
    pub fn new(id: TaskId, source_url: String, destination_name: String) -> Self {
        Self {
            id,
            source_url,
            destination_name,
            bytes_written: 0,
            bytes_expected: None,
            state: TaskState::Idle,
            last_activity: Instant::now(),
        }
    }

    pub fn activate(&mut self) {
        self.state = TaskState::Active;
        self.last_activity = Instant::now();
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            id: self.id,
            url: self.source_url.clone(),
            destination_name: self.destination_name.clone(),
        }
    }

    /// Applies a progress report and returns the fraction to publish.
    ///
    /// `bytes_written` never moves backwards and is capped at the expected
    /// length once that is known. Non-positive `bytes_expected` means unknown.
    pub fn record_progress(&mut self, bytes_written: u64, bytes_expected: i64) -> f64 {
        self.bytes_expected = u64::try_from(bytes_expected).ok().filter(|n| *n > 0);
        self.bytes_written = self.bytes_written.max(bytes_written);
        if let Some(expected) = self.bytes_expected {
            self.bytes_written = self.bytes_written.min(expected);
        }
        self.last_activity = Instant::now();
        self.fraction()
    }

    pub fn fraction(&self) -> f64 {
        match self.bytes_expected {
            Some(expected) => (self.bytes_written as f64 / expected as f64).clamp(0.0, 1.0),
            None => 0.0,
        }
    }
}
