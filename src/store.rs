//! Permanent storage for finished downloads.
//!
//! One file per completed transfer, placed directly in the destination
//! directory. A later download with the same derived name replaces the
//! earlier one.
use crate::error::StoreError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ResultStore {
    destination_dir: PathBuf,
}

impl ResultStore {
    pub fn new(destination_dir: impl Into<PathBuf>) -> Self {
        Self {
            destination_dir: destination_dir.into(),
        }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.destination_dir.join(name)
    }

    /// Moves `temp_path` to `<destination_dir>/<name>`, replacing any file
    /// already there.
    pub fn relocate(&self, temp_path: &Path, name: &str) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.destination_dir).map_err(|source| StoreError::CreateDir {
            path: self.destination_dir.clone(),
            source,
        })?;

        let final_path = self.path_for(name);
        match fs::remove_file(&final_path) {
            Ok(()) => debug!(path = ?final_path, "removed previous download"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(StoreError::Remove {
                    path: final_path,
                    source,
                })
            }
        }

        if let Err(e) = fs::rename(temp_path, &final_path) {
            // Staging and destination may live on different filesystems.
            debug!(error = %e, "rename failed, falling back to copy");
            fs::copy(temp_path, &final_path).map_err(|source| StoreError::Move {
                from: temp_path.to_path_buf(),
                to: final_path.clone(),
                source,
            })?;
            if let Err(e) = fs::remove_file(temp_path) {
                warn!(path = ?temp_path, error = %e, "failed to remove staged file after copy");
            }
        }

        Ok(final_path)
    }
}
