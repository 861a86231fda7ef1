//! Durable session store adapter
//!
//! The core never touches durable storage directly; it exchanges plain
//! session snapshots with this adapter at defined checkpoints (process
//! start, after each completed run, process stop).

use crate::models::SessionSnapshot;
use histloader_common::{Error, Result};
use std::path::PathBuf;

/// load/save contract for the whole session list
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Vec<SessionSnapshot>>;
    fn save(&self, sessions: &[SessionSnapshot]) -> Result<()>;
}

/// JSON-file session store
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Vec<SessionSnapshot>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|e| {
            Error::Internal(format!(
                "corrupt session store {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn save(&self, sessions: &[SessionSnapshot]) -> Result<()> {
        let content = serde_json::to_string_pretty(sessions)
            .map_err(|e| Error::Internal(format!("session serialization failed: {}", e)))?;

        // write-then-rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::debug!(
            path = %self.path.display(),
            sessions = sessions.len(),
            "session store saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Session;
    use std::path::PathBuf as StdPathBuf;

    #[tokio::test]
    async fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("sessions.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("sessions.json"));

        let session = Session::new(
            "plant-a".to_string(),
            "test".to_string(),
            StdPathBuf::from("/data"),
            r"(?P<metric>\w+)\.csv".to_string(),
            "${metric}".to_string(),
            None,
        );
        let snapshot = session.snapshot().await;
        store.save(&[snapshot.clone()]).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].session_id, snapshot.session_id);
        assert_eq!(loaded[0].dataset, "plant-a");
    }

    #[test]
    fn corrupt_file_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = FileSessionStore::new(path);
        assert!(matches!(store.load(), Err(Error::Internal(_))));
    }
}
