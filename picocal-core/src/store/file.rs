//! JSON document on local disk.
//!
//! Reads are lock-free since the document is only ever replaced by rename.
//! Read-modify-write cycles hold an exclusive lock on a sidecar file so
//! processes sharing the directory don't overwrite each other's days.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use super::{StoreBackend, StoreDocument};
use crate::error::{PicoCalError, PicoCalResult};

const STORE_FILE: &str = "store.json";
const LOCK_FILE: &str = "store.lock";

pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Store inside `dir` (created on first save).
    pub fn in_dir(dir: &Path) -> Self {
        FileBackend {
            path: dir.join(STORE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks until no other process holds the lock. Released on drop.
    fn lock(&self) -> PicoCalResult<File> {
        let lock_path = self.path.with_file_name(LOCK_FILE);
        let storage = |e: std::io::Error| {
            PicoCalError::Storage(format!("{}: {e}", lock_path.display()))
        };

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(storage)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(storage)?;
        file.lock_exclusive().map_err(storage)?;
        Ok(file)
    }
}

impl StoreBackend for FileBackend {
    fn load(&self) -> PicoCalResult<StoreDocument> {
        if !self.path.exists() {
            return Ok(StoreDocument::default());
        }

        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| PicoCalError::Storage(format!("{}: {e}", self.path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| PicoCalError::Storage(format!("{}: {e}", self.path.display())))
    }

    fn save(&self, document: &StoreDocument) -> PicoCalResult<()> {
        let content = serde_json::to_string_pretty(document)
            .map_err(|e| PicoCalError::Serialization(e.to_string()))?;

        let write = || -> std::io::Result<()> {
            if let Some(dir) = self.path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            // write-then-rename keeps the previous document intact until the new one is complete
            let temp = self.path.with_extension("json.tmp");
            std::fs::write(&temp, content)?;
            std::fs::rename(&temp, &self.path)
        };

        write().map_err(|e| PicoCalError::Storage(format!("{}: {e}", self.path.display())))
    }

    fn update(&self, change: &mut dyn FnMut(&mut StoreDocument)) -> PicoCalResult<()> {
        let _lock = self.lock()?;
        let mut document = self.load()?;
        change(&mut document);
        self.save(&document)
    }
}
