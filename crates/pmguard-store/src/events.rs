//! Append-only rule event log.
//!
//! Events live in memory for querying. When a journal is attached, each
//! event is also handed to a bounded background writer: a full queue or a
//! write error is logged and counted, never surfaced to the caller.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use pmguard_core::{EventType, RuleEvent, RuleId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::journal::JsonLinesJournal;

/// Default page size for [`EventLog::list`].
pub const DEFAULT_PAGE_SIZE: usize = 100;

pub struct EventLog {
    events: RwLock<Vec<RuleEvent>>,
    sink: Mutex<Option<mpsc::Sender<RuleEvent>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl EventLog {
    /// Memory-only event log.
    pub fn in_memory() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            sink: Mutex::new(None),
            writer: Mutex::new(None),
            dropped: AtomicU64::new(0),
        }
    }

    /// Load existing events from `path` and start the background writer.
    ///
    /// Must be called inside a tokio runtime.
    pub fn open(path: impl AsRef<Path>, buffer: usize) -> StoreResult<Self> {
        let path = path.as_ref();
        let mut existing: Vec<RuleEvent> = JsonLinesJournal::read_all(path)?;
        existing.sort_by_key(|e| e.created_at);
        info!(path = %path.display(), count = existing.len(), "Loaded event journal");

        let mut journal = JsonLinesJournal::open(path)?;
        let (tx, mut rx) = mpsc::channel::<RuleEvent>(buffer.max(1));
        let handle = tokio::task::spawn_blocking(move || {
            while let Some(event) = rx.blocking_recv() {
                if let Err(e) = journal.append(&event) {
                    warn!(
                        event_id = %event.id,
                        rule_id = %event.rule_id,
                        error = %e,
                        "Failed to persist rule event"
                    );
                }
            }
            debug!(
                records = journal.records_written(),
                "Event journal writer stopped"
            );
        });

        Ok(Self {
            events: RwLock::new(existing),
            sink: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(handle)),
            dropped: AtomicU64::new(0),
        })
    }

    /// Append an event. Never blocks on I/O.
    pub fn append(&self, event: RuleEvent) {
        debug!(
            rule_id = %event.rule_id,
            event_type = %event.event_type,
            "Rule event"
        );
        if let Some(tx) = self.sink.lock().as_ref() {
            if let Err(e) = tx.try_send(event.clone()) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event_id = %event.id,
                    error = %e,
                    "Event journal queue unavailable, event kept in memory only"
                );
            }
        }
        self.events.write().push(event);
    }

    /// Build and append an event, returning it.
    pub fn record(
        &self,
        rule_id: &RuleId,
        event_type: EventType,
        event_data: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> RuleEvent {
        let event = RuleEvent::new(rule_id.clone(), event_type, event_data, created_at);
        self.append(event.clone());
        event
    }

    /// Events in creation order, optionally for one rule, paginated.
    pub fn list(&self, rule_id: Option<&RuleId>, offset: usize, limit: usize) -> Vec<RuleEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| rule_id.map_or(true, |id| e.rule_id == *id))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// All events for one rule.
    pub fn for_rule(&self, rule_id: &RuleId) -> Vec<RuleEvent> {
        self.list(Some(rule_id), 0, usize::MAX)
    }

    /// Number of events matching the filter.
    pub fn count(&self, rule_id: Option<&RuleId>) -> usize {
        self.events
            .read()
            .iter()
            .filter(|e| rule_id.map_or(true, |id| e.rule_id == *id))
            .count()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Events that could not be queued for the journal.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Close the queue and wait for the writer to drain it.
    pub async fn shutdown(&self) {
        drop(self.sink.lock().take());
        let handle = self.writer.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Event journal writer panicked");
            }
        }
    }
}
