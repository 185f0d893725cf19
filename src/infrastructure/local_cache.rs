use crate::domain::models::TimerDocument;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_database;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const TIMER_CACHE_KEY: &str = "disciplineX_timerState";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTimer {
    pub document: TimerDocument,
    pub written_at_ms: i64,
}

/// Device-local copy of the last timer state, used before the remote store
/// has answered (or when it never does).
pub trait LocalStateCache: Send + Sync {
    fn load(&self) -> Result<Option<CachedTimer>, InfraError>;
    fn save(&self, document: &TimerDocument, written_at_ms: i64) -> Result<(), InfraError>;
    fn clear(&self) -> Result<(), InfraError>;

    /// Returns the cached document while it is younger than `max_age_ms`;
    /// older entries are discarded.
    fn load_fresh(
        &self,
        now_ms: i64,
        max_age_ms: i64,
    ) -> Result<Option<TimerDocument>, InfraError> {
        let Some(cached) = self.load()? else {
            return Ok(None);
        };
        if now_ms - cached.written_at_ms >= max_age_ms {
            self.clear()?;
            return Ok(None);
        }
        Ok(Some(cached.document))
    }
}

#[derive(Debug, Clone)]
pub struct SqliteLocalStateCache {
    db_path: PathBuf,
}

impl SqliteLocalStateCache {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_database(&self.db_path)
    }
}

impl LocalStateCache for SqliteLocalStateCache {
    fn load(&self) -> Result<Option<CachedTimer>, InfraError> {
        let connection = self.connect()?;
        let row: Option<(String, i64)> = connection
            .query_row(
                "SELECT payload, written_at_ms FROM local_cache WHERE key = ?1",
                params![TIMER_CACHE_KEY],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((payload, written_at_ms)) = row else {
            return Ok(None);
        };

        match serde_json::from_str::<TimerDocument>(&payload) {
            Ok(document) => Ok(Some(CachedTimer {
                document,
                written_at_ms,
            })),
            Err(error) => {
                tracing::warn!(%error, "discarding unreadable local timer cache");
                self.clear()?;
                Ok(None)
            }
        }
    }

    fn save(&self, document: &TimerDocument, written_at_ms: i64) -> Result<(), InfraError> {
        let payload = serde_json::to_string(document)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO local_cache (key, payload, written_at_ms)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
               payload = excluded.payload,
               written_at_ms = excluded.written_at_ms",
            params![TIMER_CACHE_KEY, payload, written_at_ms],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "DELETE FROM local_cache WHERE key = ?1",
            params![TIMER_CACHE_KEY],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLocalStateCache {
    entry: Mutex<Option<CachedTimer>>,
}

impl InMemoryLocalStateCache {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<CachedTimer>>, InfraError> {
        self.entry
            .lock()
            .map_err(|error| InfraError::Store(format!("local cache lock poisoned: {error}")))
    }
}

impl LocalStateCache for InMemoryLocalStateCache {
    fn load(&self) -> Result<Option<CachedTimer>, InfraError> {
        Ok(self.lock()?.clone())
    }

    fn save(&self, document: &TimerDocument, written_at_ms: i64) -> Result<(), InfraError> {
        *self.lock()? = Some(CachedTimer {
            document: document.clone(),
            written_at_ms,
        });
        Ok(())
    }

    fn clear(&self) -> Result<(), InfraError> {
        *self.lock()? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::initialize_database;

    const DAY_MS: i64 = 86_400_000;

    struct TempDatabase {
        path: PathBuf,
    }

    impl TempDatabase {
        fn new(name: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "discipline-cache-{}-{}.sqlite",
                name,
                std::process::id()
            ));
            let _ = std::fs::remove_file(&path);
            initialize_database(&path).expect("init database");
            Self { path }
        }
    }

    impl Drop for TempDatabase {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn running_document() -> TimerDocument {
        TimerDocument {
            timer_end_timestamp: 1_700_000_000_000,
            timer_running: true,
            saved_ms_this_session: 120_000,
            current_timer_task_name: "Reading".to_string(),
            ..TimerDocument::default()
        }
    }

    #[test]
    fn sqlite_cache_persists_latest_document() {
        let database = TempDatabase::new("persist");
        let cache = SqliteLocalStateCache::new(&database.path);
        assert_eq!(cache.load().expect("load empty"), None);

        cache.save(&TimerDocument::default(), 10).expect("save first");
        cache.save(&running_document(), 20).expect("save second");

        let reopened = SqliteLocalStateCache::new(&database.path);
        let cached = reopened.load().expect("load").expect("entry exists");
        assert_eq!(cached.document, running_document());
        assert_eq!(cached.written_at_ms, 20);
    }

    #[test]
    fn sqlite_cache_discards_entries_older_than_a_day() {
        let database = TempDatabase::new("expiry");
        let cache = SqliteLocalStateCache::new(&database.path);
        cache.save(&running_document(), 1_000).expect("save");

        let fresh = cache.load_fresh(999 + DAY_MS, DAY_MS).expect("load fresh");
        assert_eq!(fresh, Some(running_document()));

        let expired = cache.load_fresh(1_000 + DAY_MS, DAY_MS).expect("load expired");
        assert_eq!(expired, None);
        assert_eq!(cache.load().expect("load after expiry"), None);
    }

    #[test]
    fn unreadable_payload_is_treated_as_missing() {
        let database = TempDatabase::new("corrupt");
        let connection = open_database(&database.path).expect("open");
        connection
            .execute(
                "INSERT INTO local_cache (key, payload, written_at_ms) VALUES (?1, 'not json', 0)",
                params![TIMER_CACHE_KEY],
            )
            .expect("insert corrupt row");

        let cache = SqliteLocalStateCache::new(&database.path);
        assert_eq!(cache.load().expect("load"), None);
    }

    #[test]
    fn in_memory_cache_follows_same_expiry_rule() {
        let cache = InMemoryLocalStateCache::default();
        cache.save(&running_document(), 0).expect("save");
        assert!(cache.load_fresh(DAY_MS - 1, DAY_MS).expect("fresh").is_some());
        assert!(cache.load_fresh(DAY_MS, DAY_MS).expect("expired").is_none());
        assert!(cache.load().expect("load").is_none());
    }
}
