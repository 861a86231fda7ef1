//! histloader-ingest library interface
//!
//! Bulk import of time-stamped sensor CSV files into a remote time-series
//! store: file discovery with pattern-based tagging, pluggable chunked
//! serializers, bounded-concurrency dispatch with identifier resolution,
//! and per-run statistics.

pub mod models;
pub mod serializer;
pub mod services;
pub mod store;

pub use histloader_common::{Error, Result};
