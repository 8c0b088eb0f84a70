//! Shared engine state.
//!
//! `CoreState` is built once at startup and shared by every worker behind an
//! `Arc`. Each worker opens its own connection; SQLite connections are never
//! shared across threads.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::analysis::cohort::CohortHasher;
use crate::analysis::source::{ObservationSource, SqliteObservationSource};
use crate::config::{self, ConfigError, ConfigHandle, EngineConfig};
use crate::db;

// ═══════════════════════════════════════════════════════════
// CoreState
// ═══════════════════════════════════════════════════════════

pub struct CoreState {
    /// Engine database file.
    pub db_path: PathBuf,
    config: ConfigHandle,
    hasher: CohortHasher,
    source: Arc<dyn ObservationSource>,
}

impl CoreState {
    pub fn new(
        db_path: PathBuf,
        config: ConfigHandle,
        hasher: CohortHasher,
        source: Arc<dyn ObservationSource>,
    ) -> Self {
        Self {
            db_path,
            config,
            hasher,
            source,
        }
    }

    /// State rooted at a data directory: `careloom.db`, `engine.json` and the
    /// cohort key file all live there. The key is created on first run.
    pub fn from_data_dir(dir: &Path) -> Result<Self, CoreError> {
        let config = ConfigHandle::load(&config::config_path(dir))?;
        let key = config::load_or_create_hash_key(&config::hash_key_path(dir))?;
        Ok(Self::new(
            config::database_path(dir),
            config,
            CohortHasher::new(key),
            Arc::new(SqliteObservationSource),
        ))
    }

    /// Open a connection to the engine database, running migrations.
    pub fn open_db(&self) -> Result<rusqlite::Connection, CoreError> {
        db::sqlite::open_database(&self.db_path).map_err(CoreError::Database)
    }

    /// Snapshot of the current config. Holders keep their snapshot across a reload.
    pub fn config(&self) -> Arc<EngineConfig> {
        self.config.current()
    }

    pub fn reload_config(&self) -> Result<Arc<EngineConfig>, CoreError> {
        Ok(self.config.reload()?)
    }

    pub fn hasher(&self) -> &CohortHasher {
        &self.hasher
    }

    pub fn source(&self) -> &dyn ObservationSource {
        self.source.as_ref()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] db::DatabaseError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_state_opens_database_and_creates_key() {
        let dir = tempfile::tempdir().unwrap();
        let state = CoreState::from_data_dir(dir.path()).unwrap();

        let conn = state.open_db().unwrap();
        assert_eq!(db::sqlite::count_tables(&conn).unwrap(), 13);
        assert!(config::hash_key_path(dir.path()).exists());
        assert_eq!(*state.config(), EngineConfig::default());
    }

    #[test]
    fn same_key_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let profile = crate::models::ChildProfile {
            child_key: uuid::Uuid::new_v4(),
            diagnoses: vec!["autism".into()],
            medication_classes: vec![],
            age_years: 6,
        };
        let first = CoreState::from_data_dir(dir.path()).unwrap();
        let hash = first.hasher().compute_child_hash(&profile);
        drop(first);

        let second = CoreState::from_data_dir(dir.path()).unwrap();
        assert_eq!(second.hasher().compute_child_hash(&profile), hash);
    }

    #[test]
    fn reload_picks_up_edits() {
        let dir = tempfile::tempdir().unwrap();
        let state = CoreState::from_data_dir(dir.path()).unwrap();
        let before = state.config();

        std::fs::write(
            config::config_path(dir.path()),
            r#"{ "worker_count": 4 }"#,
        )
        .unwrap();
        let after = state.reload_config().unwrap();

        assert_eq!(after.worker_count, 4);
        assert_eq!(before.worker_count, 2);
        assert_eq!(state.config().worker_count, 4);
    }
}
