//! Adapters for the external collaborators: the time-series store and the
//! durable session store

pub mod http;
pub mod session_store;

use crate::serializer::Point;
use async_trait::async_trait;
use histloader_common::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use http::HttpPointStore;
pub use session_store::{FileSessionStore, SessionStore};

/// Per-batch ingestion acknowledgement from the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushOutcome {
    /// Points accepted by the store
    pub succeeded: u64,
    /// Points rejected by the store
    pub failed: u64,
    /// Per-point error detail for the rejected points
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Synchronous "insert points, wait for ack" store contract
///
/// Implementations must enforce a request-level timeout; a timeout is a
/// push failure.
#[async_trait]
pub trait PointStore: Send + Sync {
    /// Push one batch and wait for the store's acknowledgement
    async fn push_points(&self, points: &[Point]) -> Result<PushOutcome>;

    /// Query the definitive series identifier for metric + tags + the
    /// series' earliest timestamp; None while the store has not indexed it
    async fn resolve_series_id(
        &self,
        metric: &str,
        tags: &HashMap<String, String>,
        first_timestamp_ms: i64,
    ) -> Result<Option<String>>;
}
