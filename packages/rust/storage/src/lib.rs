//! Turso Embedded / libSQL storage layer (offline mode).
//!
//! The [`Storage`] struct wraps a local libSQL database used as a small
//! key-value store. Each key holds one JSON document that is overwritten
//! whole; the enrichment cache lives under a single key.
//!
//! **Access rules:**
//! - the CLI pipeline: read-write via [`Storage::open`]
//! - inspection commands: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use specter_shared::{Result, SpecterError};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SpecterError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| SpecterError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| SpecterError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| SpecterError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| SpecterError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        SpecterError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(SpecterError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Key-value operations
    // -----------------------------------------------------------------------

    /// Read the value stored under `key`, if any.
    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM kv_store WHERE key = ?1", params![key])
            .await
            .map_err(|e| SpecterError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let value: String = row
                    .get(0)
                    .map_err(|e| SpecterError::Storage(e.to_string()))?;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(SpecterError::Storage(e.to_string())),
        }
    }

    /// Write `value` under `key`, replacing any previous value.
    pub async fn put_value(&self, key: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                params![key, value, now.as_str()],
            )
            .await
            .map_err(|e| SpecterError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Remove `key`. Returns whether a value was deleted.
    pub async fn delete_value(&self, key: &str) -> Result<bool> {
        self.check_writable()?;
        let affected = self
            .conn
            .execute("DELETE FROM kv_store WHERE key = ?1", params![key])
            .await
            .map_err(|e| SpecterError::Storage(e.to_string()))?;
        Ok(affected > 0)
    }

    /// List stored keys with their last update time, ordered by key.
    pub async fn list_keys(&self) -> Result<Vec<(String, String)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT key, updated_at FROM kv_store ORDER BY key",
                params![],
            )
            .await
            .map_err(|e| SpecterError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push((
                row.get::<String>(0)
                    .map_err(|e| SpecterError::Storage(e.to_string()))?,
                row.get::<String>(1)
                    .map_err(|e| SpecterError::Storage(e.to_string()))?,
            ));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("specter_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("specter_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn value_roundtrip_and_overwrite() {
        let storage = test_storage().await;

        assert!(storage.get_value("enrichment_cache").await.unwrap().is_none());

        storage
            .put_value("enrichment_cache", r#"{"a":{"title":"A"}}"#)
            .await
            .expect("put");
        let value = storage.get_value("enrichment_cache").await.expect("get");
        assert_eq!(value.as_deref(), Some(r#"{"a":{"title":"A"}}"#));

        storage
            .put_value("enrichment_cache", "{}")
            .await
            .expect("overwrite");
        let value = storage.get_value("enrichment_cache").await.unwrap();
        assert_eq!(value.as_deref(), Some("{}"));

        let keys = storage.list_keys().await.expect("list");
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].0, "enrichment_cache");
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let storage = test_storage().await;
        storage.put_value("k", "v").await.unwrap();
        assert!(storage.delete_value("k").await.unwrap());
        assert!(!storage.delete_value("k").await.unwrap());
        assert!(storage.get_value("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("specter_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.put_value("k", "v").await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.get_value("k").await.unwrap().as_deref(), Some("v"));
        let result = ro.put_value("k", "w").await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
