//! File-drop trigger for ingestion
//!
//! Spreadsheet apps write a workbook in several steps (temp file, rename,
//! metadata touch), so each path is only handed out once it has been quiet
//! for the debounce window.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::balance::workbook::is_workbook_path;

/// Collapses bursts of events per path into one
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Debouncer {
            window,
            pending: HashMap::new(),
        }
    }

    /// Record activity on a path, restarting its quiet period
    pub fn note(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path, now);
    }

    /// Earliest instant at which some pending path becomes ready
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().map(|last| *last + self.window)
    }

    /// Remove and return paths quiet for at least the window, sorted
    pub fn take_ready(&mut self, now: Instant) -> Vec<PathBuf> {
        let window = self.window;
        let mut ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, last)| now.duration_since(**last) >= window)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &ready {
            self.pending.remove(path);
        }
        ready.sort();
        ready
    }
}

/// Workbook paths touched by a create/modify event
pub fn workbook_paths(event: &Event) -> Vec<PathBuf> {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|p| is_workbook_path(p))
        .cloned()
        .collect()
}

/// Watches a directory and yields debounced workbook paths
pub struct WorkbookWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<PathBuf>,
    debouncer: Debouncer,
    ready: VecDeque<PathBuf>,
}

impl WorkbookWatcher {
    pub fn start(dir: &Path, debounce: Duration) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create watch directory {}", dir.display()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for path in workbook_paths(&event) {
                    let _ = tx.send(path);
                }
            }
            Err(e) => log::warn!("File watcher error: {}", e),
        })
        .context("Failed to create file watcher")?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;
        log::info!(
            "Watching {} for workbooks (debounce {:.1}s)",
            dir.display(),
            debounce.as_secs_f64()
        );

        Ok(WorkbookWatcher {
            _watcher: watcher,
            rx,
            debouncer: Debouncer::new(debounce),
            ready: VecDeque::new(),
        })
    }

    /// Wait for the next settled workbook path; `None` once the watcher stops
    pub async fn next(&mut self) -> Option<PathBuf> {
        loop {
            if let Some(path) = self.ready.pop_front() {
                return Some(path);
            }

            match self.debouncer.next_deadline() {
                Some(deadline) => {
                    tokio::select! {
                        received = self.rx.recv() => match received {
                            Some(path) => self.debouncer.note(path, Instant::now()),
                            None => return None,
                        },
                        _ = tokio::time::sleep_until(deadline) => {
                            self.ready.extend(self.debouncer.take_ready(Instant::now()));
                        }
                    }
                }
                None => {
                    let path = self.rx.recv().await?;
                    self.debouncer.note(path, Instant::now());
                }
            }
        }
    }
}
