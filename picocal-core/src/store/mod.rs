//! Durable home of the merged day timeline.
//!
//! The store holds one small keyed document: the `sharedFlags` snapshot plus
//! the month bookkeeping used to decide when a new month starts. Every write
//! replaces the whole document, so readers never observe a partial update.
//! Several processes may share one document; reads and writes always start
//! from what is stored, not from what this process last saw.

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::day_flags::DayFlags;
use crate::error::PicoCalResult;
use crate::month::{CalendarMonth, MonthStamp};

/// Key of the merged timeline snapshot.
pub const SHARED_FLAGS_KEY: &str = "sharedFlags";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_recorded_month: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_recorded_year: Option<i32>,
    #[serde(flatten)]
    pub flags: BTreeMap<String, DayFlags>,
}

impl StoreDocument {
    pub fn last_recorded(&self) -> Option<MonthStamp> {
        match (self.last_recorded_month, self.last_recorded_year) {
            (Some(month), Some(year)) => Some(MonthStamp { month, year }),
            _ => None,
        }
    }
}

/// Where the document actually lives. `save` must replace the stored value atomically.
pub trait StoreBackend: Send + Sync {
    fn load(&self) -> PicoCalResult<StoreDocument>;
    fn save(&self, document: &StoreDocument) -> PicoCalResult<()>;

    /// Load, apply `change`, save. Backends shared between processes hold an
    /// exclusive lock for the whole sequence.
    fn update(&self, change: &mut dyn FnMut(&mut StoreDocument)) -> PicoCalResult<()> {
        let mut document = self.load()?;
        change(&mut document);
        self.save(&document)
    }
}

/// Combine the stored document with this process's copy.
///
/// A later recorded month wins outright. Within one month every key is the
/// union of both sides, so a day set anywhere stays set.
fn reconcile(stored: StoreDocument, cached: &StoreDocument) -> StoreDocument {
    let order = |d: &StoreDocument| d.last_recorded().map(|s| (s.year, s.month));
    match order(&stored).cmp(&order(cached)) {
        Ordering::Greater => stored,
        Ordering::Less => cached.clone(),
        Ordering::Equal => {
            let mut merged = stored;
            for (key, flags) in &cached.flags {
                let entry = merged.flags.entry(key.clone()).or_default();
                *entry = entry.union(flags);
            }
            merged
        }
    }
}

pub struct SharedStore {
    backend: Box<dyn StoreBackend>,
    document: Mutex<StoreDocument>,
    observed: watch::Sender<DayFlags>,
}

impl SharedStore {
    /// Load the document. An unreadable document starts empty.
    pub fn open(backend: impl StoreBackend + 'static) -> Self {
        let document = backend.load().unwrap_or_else(|e| {
            error!(error = %e, "could not load store, starting empty");
            StoreDocument::default()
        });
        let snapshot = document
            .flags
            .get(SHARED_FLAGS_KEY)
            .cloned()
            .unwrap_or_default();

        SharedStore {
            backend: Box::new(backend),
            document: Mutex::new(document),
            observed: watch::Sender::new(snapshot),
        }
    }

    fn publish(&self, document: &StoreDocument) {
        let snapshot = document
            .flags
            .get(SHARED_FLAGS_KEY)
            .cloned()
            .unwrap_or_default();
        self.observed.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }

    /// The cached document after folding in whatever is stored now.
    ///
    /// Other processes may share the backend, so every read goes back to it.
    /// When it can't be read the cached copy is used as is.
    fn current(&self) -> MutexGuard<'_, StoreDocument> {
        let mut cached = self.document.lock().unwrap_or_else(PoisonError::into_inner);
        match self.backend.load() {
            Ok(stored) => {
                *cached = reconcile(stored, &cached);
                self.publish(&cached);
            }
            Err(e) => warn!(error = %e, "could not reload store, using cached copy"),
        }
        cached
    }

    /// Apply `change` to the freshly loaded document and save it in one step.
    ///
    /// Memory (and its observers) takes the change even when the backend
    /// refuses it; the error reports lost durability for this write.
    fn write(&self, change: impl Fn(&mut StoreDocument)) -> PicoCalResult<()> {
        let mut cached = self.document.lock().unwrap_or_else(PoisonError::into_inner);
        let mut attempted = None;

        let result = self.backend.update(&mut |stored: &mut StoreDocument| {
            *stored = reconcile(std::mem::take(stored), &cached);
            change(stored);
            attempted = Some(stored.clone());
        });

        *cached = match attempted {
            Some(document) => document,
            None => {
                let mut document = cached.clone();
                change(&mut document);
                document
            }
        };
        self.publish(&cached);
        result
    }

    /// Overwrite `key` with `snapshot`.
    pub fn persist(&self, snapshot: &DayFlags, key: &str) -> PicoCalResult<()> {
        self.write(|document| {
            document.flags.insert(key.to_string(), snapshot.clone());
        })
    }

    /// Union `incoming` into the stored value of `key` in one read-modify-write.
    ///
    /// Returns the value memory now holds, and whether it reached the backend.
    pub fn merge(&self, incoming: &DayFlags, key: &str) -> (DayFlags, PicoCalResult<()>) {
        let result = self.write(|document| {
            let entry = document.flags.entry(key.to_string()).or_default();
            *entry = entry.union(incoming);
        });
        let merged = self
            .document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flags
            .get(key)
            .cloned()
            .unwrap_or_default();
        (merged, result)
    }

    /// Stored value for `key`, or an empty timeline if there is none.
    pub fn retrieve(&self, key: &str) -> DayFlags {
        self.current().flags.get(key).cloned().unwrap_or_default()
    }

    /// Observe the `sharedFlags` snapshot.
    pub fn subscribe(&self) -> watch::Receiver<DayFlags> {
        self.observed.subscribe()
    }

    pub fn last_recorded(&self) -> Option<MonthStamp> {
        self.current().last_recorded()
    }

    /// Make `month` the recorded month, emptying `sharedFlags` if it was not.
    ///
    /// The new stamp and the empty snapshot are written together, so a failed
    /// or interrupted write leaves the old month on disk and the next call
    /// clears again. Returns whether the snapshot was cleared.
    pub fn begin_month(&self, month: CalendarMonth) -> bool {
        let stamp = month.stamp();
        if self.current().last_recorded() == Some(stamp) {
            return false;
        }

        let cleared = Cell::new(false);
        let result = self.write(|document| {
            if document.last_recorded() == Some(stamp) {
                return;
            }
            document.last_recorded_month = Some(stamp.month);
            document.last_recorded_year = Some(stamp.year);
            document.flags.insert(SHARED_FLAGS_KEY.to_string(), DayFlags::new());
            cleared.set(true);
        });

        if let Err(e) = result {
            error!(error = %e, "could not record new month");
        }
        let cleared = cleared.get();
        if cleared {
            info!(%month, "cleared shared flags for new month");
        }
        cleared
    }
}
