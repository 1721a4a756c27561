//! Per-source run exclusion
//!
//! Each source gets its own single-permit semaphore, so a second run for the
//! same source is refused while unrelated sources proceed in parallel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Proof that a run holds its source; releases on drop
#[derive(Debug)]
pub struct RunPermit {
    source_id: String,
    _permit: OwnedSemaphorePermit,
}

impl RunPermit {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        debug!("Run guard: released source '{}'", self.source_id);
    }
}

/// Counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardStats {
    pub runs_started: u64,
    pub runs_refused: u64,
}

#[derive(Debug, Default)]
pub struct SourceGuard {
    sources: Mutex<HashMap<String, Arc<Semaphore>>>,
    runs_started: AtomicU64,
    runs_refused: AtomicU64,
}

impl SourceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn semaphore(&self, source_id: &str) -> Arc<Semaphore> {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        sources
            .entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    /// Claim the source without waiting; `None` while another run holds it
    pub fn try_acquire(&self, source_id: &str) -> Option<RunPermit> {
        match self.semaphore(source_id).try_acquire_owned() {
            Ok(permit) => {
                self.runs_started.fetch_add(1, Ordering::Relaxed);
                debug!("Run guard: acquired source '{}'", source_id);
                Some(RunPermit {
                    source_id: source_id.to_string(),
                    _permit: permit,
                })
            }
            Err(_) => {
                self.runs_refused.fetch_add(1, Ordering::Relaxed);
                debug!("Run guard: source '{}' already running", source_id);
                None
            }
        }
    }

    pub fn stats(&self) -> GuardStats {
        GuardStats {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_refused: self.runs_refused.load(Ordering::Relaxed),
        }
    }
}
