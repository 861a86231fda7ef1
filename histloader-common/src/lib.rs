//! Shared types for the histloader services
//!
//! Provides the common error type and configuration loading used by the
//! ingest service.

pub mod config;
pub mod error;

pub use error::{Error, Result};
