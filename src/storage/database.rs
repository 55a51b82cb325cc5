//! # SQLite Backend
//!
//! Durable [`StorageBackend`] on top of a single SQLite file.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SQLITE BACKEND                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  SecureStore ──(encrypted bytes)──► SqliteBackend                       │
//! │                                          │                              │
//! │                                          ▼                              │
//! │                              Arc<Mutex<Connection>>                     │
//! │                                          │                              │
//! │                                          ▼                              │
//! │                                   secure_items table                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::sync::Arc;

use super::{schema, StorageBackend};
use crate::error::{Error, Result};

/// SQLite-backed key-value storage
pub struct SqliteBackend {
    /// The underlying SQLite connection
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open or create a database
    ///
    /// If path is None, creates an in-memory database (useful for testing).
    pub fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| Error::DatabaseError(format!("Failed to open database: {}", e)))?,
            None => Connection::open_in_memory().map_err(|e| {
                Error::DatabaseError(format!("Failed to create in-memory database: {}", e))
            })?,
        };

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .ok();

        match version {
            None => {
                conn.execute_batch(schema::CREATE_TABLES)
                    .map_err(|e| Error::DatabaseError(format!("Failed to create tables: {}", e)))?;

                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| {
                    Error::DatabaseError(format!("Failed to set schema version: {}", e))
                })?;

                tracing::info!("Key database schema created (version {})", schema::SCHEMA_VERSION);
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(Error::DatabaseError(format!(
                    "Database schema version {} is newer than supported version {}",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
            Some(v) => {
                tracing::debug!("Key database schema version: {}", v);
            }
        }

        Ok(())
    }
}

impl StorageBackend for SqliteBackend {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO secure_items (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, crate::time::now_timestamp()],
        )
        .map_err(|e| Error::StorageWriteError(format!("Failed to write {}: {}", key, e)))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT value FROM secure_items WHERE key = ?",
            params![key],
            |row| row.get::<_, Vec<u8>>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::StorageReadError(format!("Failed to read {}: {}", key, e))),
        }
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM secure_items WHERE key = ?", params![key])
            .map_err(|e| Error::StorageWriteError(format!("Failed to delete {}: {}", key, e)))?;
        Ok(rows > 0)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        // substr instead of LIKE so '%' and '_' in names need no escaping
        let mut stmt = conn
            .prepare(
                "SELECT key FROM secure_items
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key",
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let keys = stmt
            .query_map(params![prefix], |row| row.get::<_, String>(0))
            .map_err(|e| Error::StorageReadError(format!("Failed to list keys: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(keys)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let db = SqliteBackend::open(None).unwrap();

        db.put("umbra.session.a.b", b"one").unwrap();
        assert_eq!(db.get("umbra.session.a.b").unwrap().unwrap(), b"one");

        db.put("umbra.session.a.b", b"two").unwrap();
        assert_eq!(db.get("umbra.session.a.b").unwrap().unwrap(), b"two");

        assert!(db.delete("umbra.session.a.b").unwrap());
        assert!(!db.delete("umbra.session.a.b").unwrap());
        assert!(db.get("umbra.session.a.b").unwrap().is_none());
    }

    #[test]
    fn test_prefix_listing() {
        let db = SqliteBackend::open(None).unwrap();
        db.put("umbra.session.u1.c1", b"x").unwrap();
        db.put("umbra.session.u1.c2", b"x").unwrap();
        db.put("umbra.session.u10.c1", b"x").unwrap();
        db.put("umbra.wrapped.u1.c1", b"x").unwrap();
        db.put("a%b_c", b"x").unwrap();

        let keys = db.keys_with_prefix("umbra.session.u1.").unwrap();
        assert_eq!(keys, vec!["umbra.session.u1.c1", "umbra.session.u1.c2"]);

        assert_eq!(db.keys_with_prefix("a%").unwrap(), vec!["a%b_c"]);
        assert!(db.keys_with_prefix("nothing").unwrap().is_empty());
    }

    #[test]
    fn test_reopen_file_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.db");
        let path = path.to_str().unwrap();

        {
            let db = SqliteBackend::open(Some(path)).unwrap();
            db.put("k", b"persisted").unwrap();
        }

        let db = SqliteBackend::open(Some(path)).unwrap();
        assert_eq!(db.get("k").unwrap().unwrap(), b"persisted");
    }
}
