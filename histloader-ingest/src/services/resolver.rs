//! Store identifier resolution
//!
//! After all chunks are pushed, the store is queried for the definitive
//! series identifier. The store may index asynchronously, so an empty
//! answer is retried with a fixed delay before the item is failed.

use crate::store::PointStore;
use histloader_common::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Polls the store for a series identifier with bounded retries
pub struct IdentifierResolver {
    store: Arc<dyn PointStore>,
    max_retries: u32,
    delay: Duration,
}

impl IdentifierResolver {
    pub fn new(store: Arc<dyn PointStore>, max_retries: u32, delay: Duration) -> Self {
        Self {
            store,
            max_retries,
            delay,
        }
    }

    /// Resolve the identifier for metric + tags + earliest timestamp
    ///
    /// One initial attempt plus `max_retries` retries; unresolved after
    /// all attempts is a fatal error for the item.
    pub async fn resolve(
        &self,
        metric: &str,
        tags: &HashMap<String, String>,
        first_timestamp_ms: i64,
    ) -> Result<String> {
        let attempts = self.max_retries + 1;
        for attempt in 1..=attempts {
            match self
                .store
                .resolve_series_id(metric, tags, first_timestamp_ms)
                .await
            {
                Ok(Some(id)) => {
                    tracing::debug!(metric = %metric, id = %id, attempt, "series identifier resolved");
                    return Ok(id);
                }
                Ok(None) => {
                    tracing::debug!(metric = %metric, attempt, "series not yet indexed");
                }
                Err(e) => {
                    tracing::warn!(metric = %metric, attempt, error = %e, "resolve query failed");
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.delay).await;
            }
        }

        Err(Error::Store(format!(
            "identifier resolution failed for metric '{}' after {} attempts",
            metric, attempts
        )))
    }
}
