//! Session record for relaunch.
//!
//! While a transfer is in flight the session keeps a small JSON record next
//! to the staged bytes. A process that starts and finds the record resumes
//! that transfer instead of starting fresh.
use crate::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PendingTransfer {
    pub id: TaskId,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

impl PendingTransfer {
    pub fn new(id: TaskId, url: String) -> Self {
        Self {
            id,
            url,
            created_at: Utc::now(),
        }
    }
}

pub struct SessionRecord {
    record_file: PathBuf,
}

impl SessionRecord {
    pub fn new(staging_dir: &Path) -> Self {
        Self {
            record_file: staging_dir.join("session.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.record_file
    }

    /// Returns `None` when there is no record or it cannot be parsed.
    pub fn load(&self) -> io::Result<Option<PendingTransfer>> {
        let content = match fs::read_to_string(&self.record_file) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        match serde_json::from_str(&content) {
            Ok(pending) => Ok(Some(pending)),
            Err(e) => {
                tracing::warn!(path = ?self.record_file, error = %e, "ignoring unreadable session record");
                Ok(None)
            }
        }
    }

    pub fn save(&self, pending: &PendingTransfer) -> io::Result<()> {
        if let Some(parent) = self.record_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(pending)?;
        fs::write(&self.record_file, content)
    }

    /// Removes the record only if it still describes `id`. Returns whether
    /// it did.
    pub fn clear_if(&self, id: TaskId) -> io::Result<bool> {
        match self.load()? {
            Some(pending) if pending.id == id => self.clear().map(|_| true),
            _ => Ok(false),
        }
    }

    pub fn clear(&self) -> io::Result<()> {
        match fs::remove_file(&self.record_file) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
