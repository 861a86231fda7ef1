//! Import item: one source file mapped to one prospective time series

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Item lifecycle state
///
/// Transitions are driven by the dispatcher task and by explicit restart:
/// CREATED → RUNNING → IMPORTED | CANCELLED | ERROR, with ERROR → CREATED
/// on restart. ANALYSED is a bulk annotation applied right after discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemStatus {
    /// Built by the item builder, not yet annotated
    Created,
    /// Session-wide annotation after discovery completes
    Analysed,
    /// A worker task is ingesting this item's file
    Running,
    /// All points pushed and the store identifier resolved
    Imported,
    /// Failed; eligible for restart
    Error,
    /// Produced no data; not eligible for restart by default
    Cancelled,
}

impl ItemStatus {
    /// Terminal states are immutable
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Imported | ItemStatus::Cancelled)
    }
}

/// Timestamped entry of an item's error log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemError {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// One source file mapped to one prospective time series within a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// Unique item identifier
    pub item_id: Uuid,

    /// Owning session (navigation only, no ownership cycle)
    pub session_id: Uuid,

    /// Source file path (absolute)
    pub file_path: PathBuf,

    /// Metric name derived from the path pattern's `metric` group
    pub metric: String,

    /// Tag map from the pattern's other named groups
    pub tags: HashMap<String, String>,

    /// Human-meaningful identifier built from the session's template
    pub functional_id: String,

    /// Current lifecycle state
    pub status: ItemStatus,

    /// Earliest parsed timestamp (derived from data, not from the file)
    pub series_start: Option<DateTime<Utc>>,

    /// Latest parsed timestamp
    pub series_end: Option<DateTime<Utc>>,

    /// Points read from the file across all chunks
    pub points_read: u64,

    /// Points acknowledged by the store
    pub points_succeeded: u64,

    /// Points rejected by the store
    pub points_failed: u64,

    /// Accumulated error messages, append-only
    pub errors: Vec<ItemError>,

    /// Store-assigned series identifier, set on IMPORTED
    pub store_id: Option<String>,

    /// Timestamp of the ingestion attempt start
    pub import_started_at: Option<DateTime<Utc>>,

    /// Timestamp of the ingestion attempt end
    pub import_ended_at: Option<DateTime<Utc>>,
}

impl Item {
    /// Create a new item in CREATED state
    pub fn new(
        session_id: Uuid,
        file_path: PathBuf,
        metric: String,
        tags: HashMap<String, String>,
        functional_id: String,
    ) -> Self {
        Self {
            item_id: Uuid::new_v4(),
            session_id,
            file_path,
            metric,
            tags,
            functional_id,
            status: ItemStatus::Created,
            series_start: None,
            series_end: None,
            points_read: 0,
            points_succeeded: 0,
            points_failed: 0,
            errors: Vec::new(),
            store_id: None,
            import_started_at: None,
            import_ended_at: None,
        }
    }

    /// Append a timestamped message to the item's error log
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(ItemError {
            at: Utc::now(),
            message: message.into(),
        });
    }

    /// Mark the item as picked up by a worker task
    pub fn start_import(&mut self) {
        self.status = ItemStatus::Running;
        self.import_started_at = Some(Utc::now());
        self.import_ended_at = None;
    }

    /// Reset for a new run (restart of an ERROR item)
    ///
    /// Attempt-scoped counters restart from zero; the error log is
    /// append-only and survives.
    pub fn reset_for_restart(&mut self) {
        self.status = ItemStatus::Created;
        self.store_id = None;
        self.import_started_at = None;
        self.import_ended_at = None;
        self.points_read = 0;
        self.points_succeeded = 0;
        self.points_failed = 0;
        self.series_start = None;
        self.series_end = None;
    }

    /// Per-item throughput in points per second for the last attempt
    pub fn throughput(&self) -> Option<f64> {
        let started = self.import_started_at?;
        let ended = self.import_ended_at?;
        let millis = (ended - started).num_milliseconds().max(1) as f64;
        Some(self.points_read as f64 * 1000.0 / millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> Item {
        Item::new(
            Uuid::new_v4(),
            PathBuf::from("/data/plant-a/temp.csv"),
            "temperature".to_string(),
            HashMap::new(),
            "plant-a.temperature".to_string(),
        )
    }

    #[test]
    fn new_item_starts_created() {
        let item = item();
        assert_eq!(item.status, ItemStatus::Created);
        assert_eq!(item.points_read, 0);
        assert!(item.store_id.is_none());
        assert!(!item.status.is_terminal());
    }

    #[test]
    fn terminal_states() {
        assert!(ItemStatus::Imported.is_terminal());
        assert!(ItemStatus::Cancelled.is_terminal());
        assert!(!ItemStatus::Error.is_terminal());
        assert!(!ItemStatus::Running.is_terminal());
    }

    #[test]
    fn restart_resets_attempt_fields() {
        let mut item = item();
        item.start_import();
        item.status = ItemStatus::Error;
        item.add_error("store push failed");
        item.points_read = 42;

        item.reset_for_restart();
        assert_eq!(item.status, ItemStatus::Created);
        assert!(item.import_started_at.is_none());
        assert_eq!(item.points_read, 0);
        // the error log is append-only
        assert_eq!(item.errors.len(), 1);
    }

    #[test]
    fn throughput_uses_attempt_duration() {
        let mut item = item();
        item.import_started_at = Some(Utc::now());
        item.import_ended_at = Some(item.import_started_at.unwrap() + chrono::Duration::seconds(2));
        item.points_read = 1000;
        let rate = item.throughput().unwrap();
        assert!((rate - 500.0).abs() < 1.0);
    }
}
