//! Ingestion services

pub mod discovery;
pub mod dispatcher;
pub mod resolver;
pub mod session_manager;

pub use dispatcher::{Dispatcher, IngestGuard, IngestPermit};
pub use resolver::IdentifierResolver;
pub use session_manager::{CreateSessionRequest, SessionManager};
