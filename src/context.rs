//! Shared engine context: configuration, store and event bus.
//!
//! Built once at startup and owned by the [`crate::tracker::Tracker`].
//! Everything that used to be reachable globally goes through here.

use std::path::{Path, PathBuf};

use crate::config::TrackerConfig;
use crate::error::Result;
use crate::events::{EngineEvent, EventBus};
use crate::persistence::PointStore;

pub struct Context {
    pub config: TrackerConfig,
    pub store: PointStore,
    pub events: EventBus,
}

impl Context {
    /// Create a context with a disconnected store.
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            store: PointStore::disconnected(),
            events: EventBus::new(),
        }
    }

    /// Database file used for `device_id` inside `folder`.
    pub fn database_path(folder: impl AsRef<Path>, device_id: &str) -> PathBuf {
        folder.as_ref().join(format!("trkpt_{}.db", device_id))
    }

    /// Connect the store to `path`, replacing any open database.
    ///
    /// On failure the store stays disconnected and listeners are told so.
    pub fn load_database(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.store.close();
        match PointStore::open(path.as_ref()) {
            Ok(store) => {
                self.store = store;
                self.events.emit(EngineEvent::DatabaseChanged { ready: true });
                Ok(())
            }
            Err(e) => {
                log::error!(
                    "[Context] Could not open {}: {}",
                    path.as_ref().display(),
                    e
                );
                self.events.emit(EngineEvent::DatabaseChanged { ready: false });
                Err(e)
            }
        }
    }

    /// Connect the store to `trkpt_<device_id>.db` inside `folder`.
    pub fn load_database_folder(&mut self, folder: impl AsRef<Path>) -> Result<()> {
        let path = Self::database_path(folder, &self.config.device_id);
        self.load_database(path)
    }

    /// Use an already opened store.
    pub fn attach_store(&mut self, store: PointStore) {
        self.store.close();
        self.store = store;
        let ready = self.store.is_ready();
        self.events.emit(EngineEvent::DatabaseChanged { ready });
    }

    /// Commit and disconnect the store.
    pub fn close_database(&mut self) {
        if self.store.is_ready() {
            self.store.close();
            self.events.emit(EngineEvent::DatabaseChanged { ready: false });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_path() {
        let path = Context::database_path("/data/trkpt", "myphone");
        assert_eq!(path, PathBuf::from("/data/trkpt/trkpt_myphone.db"));
    }

    #[test]
    fn test_load_and_close_database_emit_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = Context::new(TrackerConfig::default());
        let events = ctx.events.subscribe();

        ctx.load_database_folder(dir.path()).unwrap();
        assert!(ctx.store.is_ready());
        assert!(dir.path().join("trkpt_myphone.db").exists());
        assert_eq!(events.try_recv().unwrap(), EngineEvent::DatabaseChanged { ready: true });

        ctx.close_database();
        assert!(!ctx.store.is_ready());
        assert_eq!(events.try_recv().unwrap(), EngineEvent::DatabaseChanged { ready: false });
    }

    #[test]
    fn test_load_database_failure_leaves_store_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = Context::new(TrackerConfig::default());
        let events = ctx.events.subscribe();

        let missing = dir.path().join("no/such/dir/trkpt.db");
        assert!(ctx.load_database(&missing).is_err());
        assert!(!ctx.store.is_ready());
        assert_eq!(events.try_recv().unwrap(), EngineEvent::DatabaseChanged { ready: false });
    }
}
