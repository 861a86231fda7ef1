//! Data model shared by the ingestion components

pub mod item;
pub mod session;
pub mod stats;

pub use item::{Item, ItemError, ItemStatus};
pub use session::{ItemHandle, Session, SessionError, SessionHandle, SessionSnapshot, SessionStatus};
pub use stats::{PointTotals, Run, SessionStats};
