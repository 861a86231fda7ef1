//! Session API surface: create, get, list, restart
//!
//! The process boundary (REST/CLI wrappers) calls into this service; it
//! owns the in-memory session list and exchanges plain snapshots with the
//! durable session store at defined checkpoints (start, after each run,
//! stop).

use crate::models::{Session, SessionHandle, SessionSnapshot};
use crate::services::discovery;
use crate::services::dispatcher::Dispatcher;
use crate::store::SessionStore;
use histloader_common::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// The only import pipeline currently shipped
const CSV_IMPORTER: &str = "csv";

/// Parameters of a create() call
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub dataset: String,
    pub description: String,
    pub root_path: PathBuf,
    pub path_pattern: String,
    pub func_id_pattern: String,
    /// Pinned serializer selector; None enables auto-detection
    pub serializer: Option<String>,
    /// Import pipeline selector; None means the CSV pipeline
    pub importer: Option<String>,
}

/// Owns the session list and drives ingestion through the dispatcher
pub struct SessionManager {
    sessions: RwLock<Vec<SessionHandle>>,
    dispatcher: Dispatcher,
    session_store: Arc<dyn SessionStore>,
}

impl SessionManager {
    pub fn new(dispatcher: Dispatcher, session_store: Arc<dyn SessionStore>) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(Vec::new()),
            dispatcher,
            session_store,
        })
    }

    /// Load persisted sessions; called once at process start
    pub async fn load(&self) -> Result<usize> {
        let snapshots = self.session_store.load()?;
        let count = snapshots.len();
        let mut sessions = self.sessions.write().await;
        for snapshot in snapshots {
            sessions.push(Arc::new(Mutex::new(Session::from_snapshot(snapshot))));
        }
        tracing::info!(sessions = count, "session store loaded");
        Ok(count)
    }

    /// Persist a snapshot of every session
    pub async fn save(&self) -> Result<()> {
        let sessions = self.sessions.read().await;
        let mut snapshots = Vec::with_capacity(sessions.len());
        for handle in sessions.iter() {
            snapshots.push(handle.lock().await.snapshot().await);
        }
        self.session_store.save(&snapshots)
    }

    /// Create a session, analyse its root, and launch ingestion
    ///
    /// An equivalent session (same dataset + path pattern + functional-id
    /// pattern) is not duplicated; the existing id is returned instead. A
    /// malformed pattern is a fatal configuration error and no session is
    /// retained. If another session currently holds the ingestion slot,
    /// the new session stays ANALYSED with the refusal on its error log.
    pub async fn create(self: &Arc<Self>, request: CreateSessionRequest) -> Result<Uuid> {
        if let Some(importer) = request.importer.as_deref() {
            if importer != CSV_IMPORTER {
                return Err(Error::InvalidInput(format!(
                    "unknown importer '{}' (available: {})",
                    importer, CSV_IMPORTER
                )));
            }
        }

        if let Some(existing) =
            Self::find_equivalent(&self.sessions.read().await, &request).await
        {
            return Ok(existing);
        }

        // the request is still needed for the re-check under the write lock
        let mut session = Session::new(
            request.dataset.clone(),
            request.description.clone(),
            request.root_path.clone(),
            request.path_pattern.clone(),
            request.func_id_pattern.clone(),
            request.serializer.clone(),
        );
        let session_id = session.session_id;

        discovery::analyse_session(&mut session).await?;

        let handle = Arc::new(Mutex::new(session));
        {
            let mut sessions = self.sessions.write().await;
            // a concurrent equivalent create may have won the race since
            // the read-lock scan; keep the first one
            if let Some(existing) = Self::find_equivalent(&sessions, &request).await {
                return Ok(existing);
            }
            sessions.push(handle.clone());
        }
        self.launch(handle).await;
        Ok(session_id)
    }

    /// Id of an already-known session equivalent to the request, if any
    async fn find_equivalent(
        sessions: &[SessionHandle],
        request: &CreateSessionRequest,
    ) -> Option<Uuid> {
        for handle in sessions {
            let session = handle.lock().await;
            if session.matches_request(
                &request.dataset,
                &request.path_pattern,
                &request.func_id_pattern,
            ) {
                tracing::info!(
                    session_id = %session.session_id,
                    dataset = %request.dataset,
                    "equivalent session exists, returning its id"
                );
                return Some(session.session_id);
            }
        }
        None
    }

    /// Snapshot of one session, including per-run stats
    pub async fn get(&self, session_id: Uuid) -> Result<SessionSnapshot> {
        let handle = self.find(session_id).await?;
        let session = handle.lock().await;
        Ok(session.snapshot().await)
    }

    /// Snapshots of all known sessions
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let sessions = self.sessions.read().await;
        let mut snapshots = Vec::with_capacity(sessions.len());
        for handle in sessions.iter() {
            snapshots.push(handle.lock().await.snapshot().await);
        }
        snapshots
    }

    /// Re-queue error items (all of `in_error` when forced) and relaunch
    ///
    /// Rejected with a conflict while any session holds the ingestion
    /// slot; a session cannot be restarted while a run is in flight.
    /// A restart that re-queues nothing does not open a new run.
    /// Returns the number of items re-queued.
    pub async fn restart(self: &Arc<Self>, session_id: Uuid, force: bool) -> Result<usize> {
        let handle = self.find(session_id).await?;
        let permit = self
            .dispatcher
            .try_acquire()
            .ok_or_else(|| Error::Conflict("another session is currently ingesting".to_string()))?;

        // permit drops (and releases) if re-queueing fails
        let moved = {
            let mut s = handle.lock().await;
            let moved = s.restart_items(force).await?;
            if s.to_import.is_empty() {
                // nothing to do; the permit drops without opening a run
                return Ok(0);
            }
            // the new run is observable before restart() returns
            s.begin_run();
            moved
        };
        tracing::info!(session_id = %session_id, requeued = moved, force, "session restart");

        let manager = Arc::clone(self);
        let session = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.dispatcher.run_session(session.clone(), permit).await {
                tracing::error!(session_id = %session_id, error = %e, "restart run failed");
                session.lock().await.add_error(format!("restart run failed: {}", e));
            }
            if let Err(e) = manager.save().await {
                tracing::warn!(error = %e, "session checkpoint save failed");
            }
        });

        Ok(moved)
    }

    /// Acquire the ingestion slot and spawn the run, or record the refusal
    async fn launch(self: &Arc<Self>, session: SessionHandle) {
        let Some(permit) = self.dispatcher.try_acquire() else {
            let mut s = session.lock().await;
            tracing::warn!(
                session_id = %s.session_id,
                "ingestion not started: another session is currently ingesting"
            );
            s.add_error("ingestion not started: another session is currently ingesting");
            return;
        };

        // commit the run before spawning so a status poll right after
        // create() already sees INGESTING
        {
            session.lock().await.begin_run();
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let session_id = { session.lock().await.session_id };
            if let Err(e) = manager.dispatcher.run_session(session.clone(), permit).await {
                tracing::error!(session_id = %session_id, error = %e, "ingestion run failed");
                session.lock().await.add_error(format!("run failed: {}", e));
            }
            if let Err(e) = manager.save().await {
                tracing::warn!(error = %e, "session checkpoint save failed");
            }
        });
    }

    async fn find(&self, session_id: Uuid) -> Result<SessionHandle> {
        let sessions = self.sessions.read().await;
        for handle in sessions.iter() {
            if handle.lock().await.session_id == session_id {
                return Ok(handle.clone());
            }
        }
        Err(Error::NotFound(format!("session {}", session_id)))
    }
}
