//! Import session: state machine and partitioned item collections
//!
//! Every item belongs to exactly one of `to_import` / `imported` /
//! `in_error` at any instant. The union of the three collections is fixed
//! at analysis time; restart moves items between collections, it never
//! creates or loses them.

use crate::models::item::{Item, ItemStatus};
use crate::models::stats::SessionStats;
use chrono::{DateTime, Utc};
use histloader_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Shared handle to a mutable item; the owning worker task is the single
/// writer, readers take short locks for snapshots
pub type ItemHandle = Arc<Mutex<Item>>;

/// Shared handle to a session
pub type SessionHandle = Arc<Mutex<Session>>;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    /// Session created, discovery not yet run
    Created,
    /// Directory walk and item building in progress
    Analysing,
    /// Items built, ready to ingest
    Analysed,
    /// A run is in flight
    Ingesting,
    /// Last run finished; restart may re-enter Ingesting
    Completed,
}

/// Timestamped entry of the session error log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionError {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// One bulk-import request over a dataset's matching files
#[derive(Debug)]
pub struct Session {
    pub session_id: Uuid,
    pub dataset: String,
    pub description: String,

    /// Root directory to walk
    pub root_path: PathBuf,

    /// Regex over root-relative paths; must define a `metric` named group
    pub path_pattern: String,

    /// Template with `${group}` placeholders for the functional id
    pub func_id_pattern: String,

    /// Pinned serializer selector; None enables auto-detection
    pub serializer: Option<String>,

    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,

    /// Ordered, append-only error log
    pub errors: Vec<SessionError>,

    /// Items waiting for (or undergoing) ingestion
    pub to_import: Vec<ItemHandle>,
    /// Items fully imported with a resolved store identifier
    pub imported: Vec<ItemHandle>,
    /// Items that failed (ERROR) or produced no data (CANCELLED)
    pub in_error: Vec<ItemHandle>,

    pub stats: SessionStats,
}

impl Session {
    /// Create a new session in CREATED state
    pub fn new(
        dataset: String,
        description: String,
        root_path: PathBuf,
        path_pattern: String,
        func_id_pattern: String,
        serializer: Option<String>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            dataset,
            description,
            root_path,
            path_pattern,
            func_id_pattern,
            serializer,
            status: SessionStatus::Created,
            started_at: Utc::now(),
            ended_at: None,
            errors: Vec::new(),
            to_import: Vec::new(),
            imported: Vec::new(),
            in_error: Vec::new(),
            stats: SessionStats::default(),
        }
    }

    /// Equivalence check used to deduplicate create() requests
    pub fn matches_request(
        &self,
        dataset: &str,
        path_pattern: &str,
        func_id_pattern: &str,
    ) -> bool {
        self.dataset == dataset
            && self.path_pattern == path_pattern
            && self.func_id_pattern == func_id_pattern
    }

    /// Append a timestamped message to the session error log
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(SessionError {
            at: Utc::now(),
            message: message.into(),
        });
    }

    /// Append freshly discovered items to `to_import`
    pub fn add_items(&mut self, items: Vec<Item>) {
        self.to_import
            .extend(items.into_iter().map(|i| Arc::new(Mutex::new(i))));
    }

    /// Bulk-annotate all items as ANALYSED and advance the session
    ///
    /// Applied once, right after discovery, before any task is dispatched.
    pub async fn mark_analysed(&mut self) {
        for handle in &self.to_import {
            let mut item = handle.lock().await;
            if item.status == ItemStatus::Created {
                item.status = ItemStatus::Analysed;
            }
        }
        self.stats.set_initial_items(self.to_import.len());
        self.status = SessionStatus::Analysed;
    }

    /// Enter INGESTING and open a new run over the current collections
    ///
    /// Called by the caller that starts or restarts a run, before any task
    /// is dispatched, so status observers never see the prior run's
    /// terminal state while the new run is already committed.
    pub fn begin_run(&mut self) {
        self.status = SessionStatus::Ingesting;
        self.ended_at = None;
        let (to_import, imported, in_error) = self.counts();
        self.stats.open_run(to_import, imported, in_error);
    }

    /// Current sizes of the three item collections
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.to_import.len(), self.imported.len(), self.in_error.len())
    }

    /// Move a completed item out of `to_import`
    ///
    /// IMPORTED goes to `imported`; ERROR and CANCELLED go to `in_error`.
    /// A missing item is a logic bug, surfaced as a hard failure.
    pub fn complete_item(&mut self, item: &ItemHandle, status: ItemStatus) -> Result<()> {
        let pos = self
            .to_import
            .iter()
            .position(|h| Arc::ptr_eq(h, item))
            .ok_or_else(|| {
                Error::Internal(format!(
                    "completed item not found in to_import of session {}",
                    self.session_id
                ))
            })?;
        let handle = self.to_import.remove(pos);
        match status {
            ItemStatus::Imported => self.imported.push(handle),
            ItemStatus::Error | ItemStatus::Cancelled => self.in_error.push(handle),
            other => {
                // keep the partition intact before reporting the bug
                self.to_import.insert(pos, handle);
                return Err(Error::Internal(format!(
                    "item completed with non-terminal status {:?}",
                    other
                )));
            }
        }
        Ok(())
    }

    /// Move error items back to `to_import` for a new run
    ///
    /// Only items with status ERROR move unless `force` is set, in which
    /// case every item in `in_error` (including CANCELLED) is re-queued.
    /// Returns the number of items re-queued.
    pub async fn restart_items(&mut self, force: bool) -> Result<usize> {
        let candidates: Vec<ItemHandle> = self.in_error.clone();
        let mut moved = 0;

        for handle in candidates {
            let eligible = {
                let item = handle.lock().await;
                force || item.status == ItemStatus::Error
            };
            if !eligible {
                continue;
            }

            let pos = self
                .in_error
                .iter()
                .position(|h| Arc::ptr_eq(h, &handle))
                .ok_or_else(|| {
                    Error::Internal(format!(
                        "restart: item not found in in_error of session {}",
                        self.session_id
                    ))
                })?;
            let handle = self.in_error.remove(pos);
            handle.lock().await.reset_for_restart();
            self.to_import.push(handle);
            moved += 1;
        }

        Ok(moved)
    }

    /// Plain-value snapshot for readers and the session store adapter
    pub async fn snapshot(&self) -> SessionSnapshot {
        let collect = |handles: &[ItemHandle]| {
            let handles = handles.to_vec();
            async move {
                let mut items = Vec::with_capacity(handles.len());
                for h in handles {
                    items.push(h.lock().await.clone());
                }
                items
            }
        };

        SessionSnapshot {
            session_id: self.session_id,
            dataset: self.dataset.clone(),
            description: self.description.clone(),
            root_path: self.root_path.clone(),
            path_pattern: self.path_pattern.clone(),
            func_id_pattern: self.func_id_pattern.clone(),
            serializer: self.serializer.clone(),
            status: self.status,
            started_at: self.started_at,
            ended_at: self.ended_at,
            errors: self.errors.clone(),
            to_import: collect(&self.to_import).await,
            imported: collect(&self.imported).await,
            in_error: collect(&self.in_error).await,
            stats: self.stats.clone(),
        }
    }

    /// Rebuild the runtime model from a persisted snapshot
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        let wrap = |items: Vec<Item>| -> Vec<ItemHandle> {
            items.into_iter().map(|i| Arc::new(Mutex::new(i))).collect()
        };
        Self {
            session_id: snapshot.session_id,
            dataset: snapshot.dataset,
            description: snapshot.description,
            root_path: snapshot.root_path,
            path_pattern: snapshot.path_pattern,
            func_id_pattern: snapshot.func_id_pattern,
            serializer: snapshot.serializer,
            // a process restart never resumes a run mid-flight
            status: match snapshot.status {
                SessionStatus::Ingesting => SessionStatus::Completed,
                other => other,
            },
            started_at: snapshot.started_at,
            ended_at: snapshot.ended_at,
            errors: snapshot.errors,
            to_import: wrap(snapshot.to_import),
            imported: wrap(snapshot.imported),
            in_error: wrap(snapshot.in_error),
            stats: snapshot.stats,
        }
    }
}

/// Serializable session value exchanged with the session store adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub dataset: String,
    pub description: String,
    pub root_path: PathBuf,
    pub path_pattern: String,
    pub func_id_pattern: String,
    pub serializer: Option<String>,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub errors: Vec<SessionError>,
    pub to_import: Vec<Item>,
    pub imported: Vec<Item>,
    pub in_error: Vec<Item>,
    pub stats: SessionStats,
}
