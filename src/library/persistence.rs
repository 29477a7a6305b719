use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

use super::{LibraryError, UserRecord};

/// Well-known key under which the whole user record is stored.
pub const STORAGE_KEY: &str = "side-a-user-data";

/// Opaque string blob storage.
pub trait KeyValueDriver: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, LibraryError>;
    fn set(&self, key: &str, value: &str) -> Result<(), LibraryError>;
    fn remove(&self, key: &str) -> Result<(), LibraryError>;
}

pub struct SqliteDriver {
    connection: Mutex<Connection>,
}

impl SqliteDriver {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LibraryError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, LibraryError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(connection: Connection) -> Result<Self, LibraryError> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.connection.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueDriver for SqliteDriver {
    fn get(&self, key: &str) -> Result<Option<String>, LibraryError> {
        let value = self
            .connection()
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1;",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LibraryError> {
        self.connection().execute(
            r#"
            INSERT INTO kv_store (key, value)
            VALUES (:key, :value)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = datetime('now');
            "#,
            rusqlite::named_params! {
                ":key": key,
                ":value": value,
            },
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LibraryError> {
        self.connection()
            .execute("DELETE FROM kv_store WHERE key = ?1;", params![key])?;
        Ok(())
    }
}

/// Map-backed driver. Clones share the same storage.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueDriver for MemoryDriver {
    fn get(&self, key: &str) -> Result<Option<String>, LibraryError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LibraryError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LibraryError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// Load/save/clear of the user record. None of these fail: errors are logged
/// and the caller keeps working in memory.
pub struct Persistence {
    driver: Option<Box<dyn KeyValueDriver>>,
}

impl Persistence {
    pub fn new(driver: impl KeyValueDriver + 'static) -> Self {
        Self {
            driver: Some(Box::new(driver)),
        }
    }

    /// No backing storage; every call is a no-op and `load` yields defaults.
    pub fn detached() -> Self {
        Self { driver: None }
    }

    pub fn is_attached(&self) -> bool {
        self.driver.is_some()
    }

    pub fn load(&self) -> UserRecord {
        match self.try_load() {
            Ok(Some(record)) => record,
            Ok(None) => UserRecord::default(),
            Err(error) => {
                log::error!("[library] failed to load user data: {error}");
                UserRecord::default()
            }
        }
    }

    fn try_load(&self) -> Result<Option<UserRecord>, LibraryError> {
        let Some(driver) = self.driver.as_ref() else {
            return Ok(None);
        };
        let Some(raw) = driver.get(STORAGE_KEY)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub fn save(&self, record: &UserRecord) {
        let Some(driver) = self.driver.as_ref() else {
            return;
        };
        let result = serde_json::to_string(record)
            .map_err(LibraryError::from)
            .and_then(|payload| driver.set(STORAGE_KEY, &payload));
        if let Err(error) = result {
            log::error!("[library] failed to save user data: {error}");
        }
    }

    pub fn clear(&self) {
        let Some(driver) = self.driver.as_ref() else {
            return;
        };
        if let Err(error) = driver.remove(STORAGE_KEY) {
            log::error!("[library] failed to clear user data: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AudioQuality, Track};
    use tempfile::TempDir;

    #[test]
    fn sqlite_driver_persists_across_connections() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("library.sqlite3");

        let driver = SqliteDriver::open(&path).unwrap();
        driver.set("k", "first").unwrap();
        driver.set("k", "second").unwrap();
        drop(driver);

        let reopened = SqliteDriver::open(&path).unwrap();
        assert_eq!(reopened.get("k").unwrap().as_deref(), Some("second"));
        reopened.remove("k").unwrap();
        assert_eq!(reopened.get("k").unwrap(), None);
    }

    #[test]
    fn load_without_stored_record_yields_defaults() {
        let persistence = Persistence::new(MemoryDriver::new());
        assert_eq!(persistence.load(), UserRecord::default());
        assert_eq!(Persistence::detached().load(), UserRecord::default());
    }

    #[test]
    fn unparseable_record_is_treated_as_missing() {
        let driver = MemoryDriver::new();
        driver.set(STORAGE_KEY, "{not json").unwrap();

        let persistence = Persistence::new(driver);
        assert_eq!(persistence.load(), UserRecord::default());
    }

    #[test]
    fn partial_record_is_backfilled_field_by_field() {
        let driver = MemoryDriver::new();
        driver
            .set(
                STORAGE_KEY,
                r#"{"likedTracks":[{"id":3,"title":"Kept"}],"settings":{"apiInstance":"https://api.example"}}"#,
            )
            .unwrap();

        let record = Persistence::new(driver).load();
        assert_eq!(record.liked_tracks, vec![Track::new(3, "Kept")]);
        assert!(record.history.is_empty());
        assert!(record.saved_albums.is_empty());
        assert_eq!(record.settings.quality, AudioQuality::Lossless);
        assert_eq!(
            record.settings.api_instance.as_deref(),
            Some("https://api.example")
        );
    }

    #[test]
    fn malformed_sections_do_not_discard_the_rest() {
        let driver = MemoryDriver::new();
        driver
            .set(
                STORAGE_KEY,
                r#"{"likedTracks":"oops","history":[{"id":4,"title":"Heard"},42],"savedAlbums":[{"id":8,"title":"Blue"}],"settings":7}"#,
            )
            .unwrap();

        let record = Persistence::new(driver).load();
        assert!(record.liked_tracks.is_empty());
        assert_eq!(record.history, vec![Track::new(4, "Heard")]);
        assert_eq!(record.saved_albums[0].id, 8);
        assert_eq!(record.settings, Default::default());
    }

    #[test]
    fn save_then_clear_round_trip() {
        let driver = MemoryDriver::new();
        let persistence = Persistence::new(driver.clone());

        let mut record = UserRecord::default();
        record.history.push(Track::new(1, "Played"));
        persistence.save(&record);
        assert_eq!(persistence.load(), record);

        persistence.clear();
        assert_eq!(driver.get(STORAGE_KEY).unwrap(), None);
        assert_eq!(persistence.load(), UserRecord::default());
    }
}
