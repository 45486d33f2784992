//! In-process backend for tests and single-process simulation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{StoreBackend, StoreDocument};
use crate::error::{PicoCalError, PicoCalResult};

/// Clones share the same document.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    document: Arc<Mutex<StoreDocument>>,
    failing: Arc<AtomicBool>,
    saves: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn with_document(document: StoreDocument) -> Self {
        MemoryBackend {
            document: Arc::new(Mutex::new(document)),
            failing: Arc::default(),
            saves: Arc::default(),
        }
    }

    /// Make subsequent saves fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Successful saves so far.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// The last successfully saved document.
    pub fn saved(&self) -> StoreDocument {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StoreBackend for MemoryBackend {
    fn load(&self) -> PicoCalResult<StoreDocument> {
        Ok(self.saved())
    }

    fn save(&self, document: &StoreDocument) -> PicoCalResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PicoCalError::Storage("memory backend is failing".into()));
        }
        *self.document.lock().unwrap_or_else(PoisonError::into_inner) = document.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn update(&self, change: &mut dyn FnMut(&mut StoreDocument)) -> PicoCalResult<()> {
        let mut stored = self.document.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = stored.clone();
        change(&mut next);
        if self.failing.load(Ordering::SeqCst) {
            return Err(PicoCalError::Storage("memory backend is failing".into()));
        }
        *stored = next;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
