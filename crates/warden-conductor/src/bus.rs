//! In-process event bus with an optional append-only JSONL journal.

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use warden_core::{now_rfc3339, BusEvent, EventBus};

const CHANNEL_CAPACITY: usize = 256;

/// Journal line: sequence number and timestamp around the event.
#[derive(Debug, Serialize)]
pub struct JournalEntry<'a> {
    pub seq: u64,
    pub ts: String,
    #[serde(flatten)]
    pub event: &'a BusEvent,
}

/// Fans events out to [`broadcast`] receivers. Publishing never blocks;
/// receivers that fall behind observe `RecvError::Lagged`.
pub struct BroadcastBus {
    tx: broadcast::Sender<BusEvent>,
    journal: Option<PathBuf>,
    seq: AtomicU64,
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            journal: None,
            seq: AtomicU64::new(0),
        }
    }

    /// Also append every event to `path`.
    pub fn with_journal(mut self, path: PathBuf) -> Self {
        self.journal = Some(path);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }
}

impl EventBus for BroadcastBus {
    fn publish(&self, event: BusEvent) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        debug!(seq, event = event.name(), "bus event");
        if let Some(path) = &self.journal {
            let entry = JournalEntry {
                seq,
                ts: now_rfc3339(),
                event: &event,
            };
            // Best-effort: a journal failure never blocks publishing.
            match serde_json::to_string(&entry) {
                Ok(line) => {
                    if let Err(e) = append_line(path, &line) {
                        warn!(path = %path.display(), error = %e, "bus journal write failed");
                    }
                }
                Err(e) => warn!(error = %e, "bus event not serializable"),
            }
        }
        // No receivers is fine.
        let _ = self.tx.send(event);
    }
}

/// Append a single line to a file, creating parent dirs if needed.
fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}
