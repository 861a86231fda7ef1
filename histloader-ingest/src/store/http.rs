//! JSON-over-HTTP implementation of the point store contract

use crate::serializer::Point;
use crate::store::{PointStore, PushOutcome};
use async_trait::async_trait;
use histloader_common::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Point store client speaking the store's JSON API
///
/// `POST {base}/api/points` with a point array, `GET
/// {base}/api/series/resolve` for identifier lookup. The request-level
/// timeout comes from configuration.
pub struct HttpPointStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ResolveResponse {
    id: Option<String>,
}

impl HttpPointStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Store(format!("HTTP client init failed: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PointStore for HttpPointStore {
    async fn push_points(&self, points: &[Point]) -> Result<PushOutcome> {
        let url = format!("{}/api/points", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(points)
            .send()
            .await
            .map_err(|e| Error::Store(format!("push to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::Store(format!(
                "push to {} returned {}",
                url,
                response.status()
            )));
        }

        response
            .json::<PushOutcome>()
            .await
            .map_err(|e| Error::Store(format!("malformed push response from {}: {}", url, e)))
    }

    async fn resolve_series_id(
        &self,
        metric: &str,
        tags: &HashMap<String, String>,
        first_timestamp_ms: i64,
    ) -> Result<Option<String>> {
        let url = format!("{}/api/series/resolve", self.base_url);
        let tags_json = serde_json::to_string(tags)
            .map_err(|e| Error::Internal(format!("tag serialization failed: {}", e)))?;
        let response = self
            .client
            .get(&url)
            .query(&[
                ("metric", metric),
                ("from", &first_timestamp_ms.to_string()),
                ("tags", &tags_json),
            ])
            .send()
            .await
            .map_err(|e| Error::Store(format!("resolve query to {} failed: {}", url, e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::Store(format!(
                "resolve query to {} returned {}",
                url,
                response.status()
            )));
        }

        let resolved = response
            .json::<ResolveResponse>()
            .await
            .map_err(|e| Error::Store(format!("malformed resolve response from {}: {}", url, e)))?;
        Ok(resolved.id)
    }
}
