//! Task dispatch over a bounded worker pool
//!
//! One global pool executes one ingestion task per item. The pool queue is
//! bounded; submissions beyond its capacity are rejected and the caller
//! backs off. A process-wide guard ensures at most one session is
//! INGESTING at a time.

use crate::models::{ItemHandle, ItemStatus, SessionHandle, SessionStatus};
use crate::serializer::{PointSerializer, SerializerRegistry};
use crate::services::resolver::IdentifierResolver;
use crate::store::PointStore;
use chrono::Utc;
use histloader_common::config::IngestConfig;
use histloader_common::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Mutex;

/// Backoff when the pool queue rejects a submission
const SUBMIT_BACKOFF: Duration = Duration::from_millis(50);

/// Process-wide "one session ingesting at a time" flag
///
/// Checked-and-set atomically; the permit releases on drop so every exit
/// path, including task-launch failure, releases the flag.
pub struct IngestGuard {
    busy: AtomicBool,
}

impl IngestGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            busy: AtomicBool::new(false),
        })
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<IngestPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| IngestPermit {
                guard: Arc::clone(self),
            })
    }
}

/// RAII permit for an ingestion run
pub struct IngestPermit {
    guard: Arc<IngestGuard>,
}

impl Drop for IngestPermit {
    fn drop(&mut self) {
        self.guard.busy.store(false, Ordering::Release);
    }
}

struct IngestJob {
    session: SessionHandle,
    item: ItemHandle,
    done: mpsc::Sender<()>,
}

/// Everything a worker needs to ingest one item
struct TaskContext {
    store: Arc<dyn PointStore>,
    registry: Arc<SerializerRegistry>,
    resolver: IdentifierResolver,
    chunk_size: usize,
}

/// Submits one ingestion task per item onto the shared worker pool
pub struct Dispatcher {
    guard: Arc<IngestGuard>,
    queue: mpsc::Sender<IngestJob>,
}

impl Dispatcher {
    /// Build the dispatcher and spawn the fixed worker pool
    pub fn new(
        store: Arc<dyn PointStore>,
        registry: Arc<SerializerRegistry>,
        config: &IngestConfig,
    ) -> Self {
        let (queue, rx) = mpsc::channel::<IngestJob>(config.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let context = Arc::new(TaskContext {
            resolver: IdentifierResolver::new(
                store.clone(),
                config.resolver_retries,
                Duration::from_millis(config.resolver_delay_ms),
            ),
            store,
            registry,
            chunk_size: config.chunk_size,
        });

        for worker_id in 0..config.workers {
            let rx = Arc::clone(&rx);
            let context = Arc::clone(&context);
            tokio::spawn(worker_loop(worker_id, rx, context));
        }

        Self {
            guard: IngestGuard::new(),
            queue,
        }
    }

    /// Try to claim the process-wide ingestion slot
    pub fn try_acquire(&self) -> Option<IngestPermit> {
        self.guard.try_acquire()
    }

    /// Execute one run over the session's `to_import` items
    ///
    /// The caller has already moved the session to INGESTING and opened
    /// its run (`Session::begin_run`) before handing it over. Items are
    /// processed fully in parallel up to the pool limit, with no ordering
    /// guarantee. The permit is released when this returns, on every path.
    pub async fn run_session(&self, session: SessionHandle, permit: IngestPermit) -> Result<()> {
        let (session_id, handles) = {
            let s = session.lock().await;
            (s.session_id, s.to_import.clone())
        };

        tracing::info!(
            session_id = %session_id,
            items = handles.len(),
            "ingestion run started"
        );

        let (done_tx, mut done_rx) = mpsc::channel::<()>(handles.len().max(1));
        let mut submitted = 0usize;
        for item in handles {
            let mut job = IngestJob {
                session: session.clone(),
                item,
                done: done_tx.clone(),
            };
            loop {
                match self.queue.try_send(job) {
                    Ok(()) => break,
                    Err(TrySendError::Full(rejected)) => {
                        job = rejected;
                        tokio::time::sleep(SUBMIT_BACKOFF).await;
                    }
                    Err(TrySendError::Closed(_)) => {
                        // permit drops here, releasing the guard
                        return Err(Error::Internal("worker pool is shut down".to_string()));
                    }
                }
            }
            submitted += 1;
        }
        drop(done_tx);

        for _ in 0..submitted {
            if done_rx.recv().await.is_none() {
                break;
            }
        }

        {
            let mut s = session.lock().await;
            let (to_import, imported, in_error) = s.counts();
            s.stats.close_run(to_import, imported, in_error);
            s.status = SessionStatus::Completed;
            s.ended_at = Some(Utc::now());
        }

        tracing::info!(session_id = %session_id, "ingestion run completed");
        drop(permit);
        Ok(())
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<IngestJob>>>,
    context: Arc<TaskContext>,
) {
    tracing::debug!(worker_id, "ingest worker started");
    loop {
        // hold the receiver lock only for the dequeue
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            tracing::debug!(worker_id, "ingest worker stopped");
            break;
        };
        run_item(&context, &job.session, &job.item).await;
        let _ = job.done.send(()).await;
    }
}

/// Classified task failure
///
/// Only the no-data condition maps to CANCELLED; every other failure is
/// ERROR and eligible for restart.
struct ItemFault {
    no_data: bool,
    message: String,
}

impl ItemFault {
    fn fatal(message: impl Into<String>) -> Self {
        Self {
            no_data: false,
            message: message.into(),
        }
    }

    fn no_data(file: &std::path::Path) -> Self {
        Self {
            no_data: true,
            message: format!("no data points in {}", file.display()),
        }
    }
}

/// Ingest one item end to end; never propagates to the pool
async fn run_item(context: &TaskContext, session: &SessionHandle, item: &ItemHandle) {
    let (item_id, file_path, metric, tags) = {
        let it = item.lock().await;
        (
            it.item_id,
            it.file_path.clone(),
            it.metric.clone(),
            it.tags.clone(),
        )
    };
    let pinned = { session.lock().await.serializer.clone() };

    {
        item.lock().await.start_import();
    }
    tracing::info!(
        item_id = %item_id,
        file = %file_path.display(),
        metric = %metric,
        "item ingestion started"
    );

    let outcome = ingest_one(context, item, &file_path, &metric, &tags, pinned.as_deref()).await;

    let final_status = {
        let mut it = item.lock().await;
        match outcome {
            Ok(store_id) => {
                it.store_id = Some(store_id);
                it.status = ItemStatus::Imported;
            }
            Err(fault) => {
                it.add_error(&fault.message);
                it.status = if fault.no_data {
                    ItemStatus::Cancelled
                } else {
                    ItemStatus::Error
                };
            }
        }
        it.import_ended_at = Some(Utc::now());
        it.status
    };

    let (points_read, points_succeeded, points_failed, rate) = {
        let it = item.lock().await;
        (
            it.points_read,
            it.points_succeeded,
            it.points_failed,
            it.throughput(),
        )
    };

    {
        let mut s = session.lock().await;
        if let Err(e) = s.complete_item(item, final_status) {
            // logic bug: surface loudly but never crash the pool
            tracing::error!(item_id = %item_id, error = %e, "item completion invariant violated");
            s.add_error(e.to_string());
        }
        let (to_import, imported, in_error) = s.counts();
        s.stats.on_item_complete(
            points_read,
            points_succeeded,
            points_failed,
            rate,
            to_import,
            imported,
            in_error,
        );
    }

    tracing::info!(
        item_id = %item_id,
        status = ?final_status,
        points_read,
        points_succeeded,
        points_failed,
        "item ingestion finished"
    );
}

async fn ingest_one(
    context: &TaskContext,
    item: &ItemHandle,
    file_path: &PathBuf,
    metric: &str,
    tags: &HashMap<String, String>,
    pinned: Option<&str>,
) -> std::result::Result<String, ItemFault> {
    let mut serializer = context
        .registry
        .bind(pinned, file_path, metric, tags)
        .map_err(|e| ItemFault::fatal(format!("serializer setup failed: {}", e)))?;

    let pushed = push_chunks(context, item, file_path, serializer.as_mut()).await;

    let result = match pushed {
        Ok(()) => match serializer.dates() {
            Some((series_start, series_end)) => {
                // the parsed series range is recorded before resolution so
                // an unresolved item still carries it for diagnostics
                {
                    let mut it = item.lock().await;
                    it.series_start = Some(series_start);
                    it.series_end = Some(series_end);
                }
                context
                    .resolver
                    .resolve(metric, tags, series_start.timestamp_millis())
                    .await
                    .map_err(|e| ItemFault::fatal(e.to_string()))
            }
            None => Err(ItemFault::fatal(
                "no timestamps recorded despite pushed data",
            )),
        },
        Err(fault) => Err(fault),
    };

    // release the input on every path
    serializer.close();
    result
}

/// Drive the serializer to exhaustion, pushing one chunk at a time
async fn push_chunks(
    context: &TaskContext,
    item: &ItemHandle,
    file_path: &PathBuf,
    serializer: &mut dyn PointSerializer,
) -> std::result::Result<(), ItemFault> {
    let mut first_chunk = true;
    while serializer.has_next() {
        let next = serializer.next(context.chunk_size);

        // the read counter reflects what was actually read regardless of
        // how this loop terminates
        {
            item.lock().await.points_read = serializer.total_points_read();
        }

        let batch = next.map_err(|e| ItemFault::fatal(format!("chunk read failed: {}", e)))?;
        match batch {
            Some(points) if !points.is_empty() => {
                let outcome = context
                    .store
                    .push_points(&points)
                    .await
                    .map_err(|e| ItemFault::fatal(format!("store push failed: {}", e)))?;

                let mut it = item.lock().await;
                it.points_succeeded += outcome.succeeded;
                it.points_failed += outcome.failed;
                for error in outcome.errors {
                    it.add_error(error);
                }
                first_chunk = false;
            }
            _ => {
                // an empty first-and-only chunk means the file had no data
                if first_chunk {
                    return Err(ItemFault::no_data(file_path));
                }
                break;
            }
        }
    }

    if first_chunk {
        return Err(ItemFault::no_data(file_path));
    }
    Ok(())
}
