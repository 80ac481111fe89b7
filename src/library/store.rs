//! Durable, hash-keyed storage of resource records.
//!
//! The service only needs key/value semantics, so the seam is a small async
//! trait. The shipped implementation keeps one SQLite table of
//! `hash -> json` rows and runs every statement on the blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{Resource, Result};

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, hash: &str) -> Result<Option<Resource>>;

    /// Insert or replace the record stored under `resource.hash`
    async fn put(&self, resource: &Resource) -> Result<()>;

    /// Delete a record. Deleting a missing key is not an error.
    async fn delete(&self, hash: &str) -> Result<()>;

    async fn values(&self) -> Result<Vec<Resource>>;
}

/// SQLite-backed [`ResourceStore`]
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS resources (
                 key   TEXT PRIMARY KEY NOT NULL,
                 value TEXT NOT NULL
             );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&guard)
        })
        .await?
    }
}

#[async_trait]
impl ResourceStore for SqliteStore {
    async fn get(&self, hash: &str) -> Result<Option<Resource>> {
        let key = hash.to_string();
        let raw: Option<String> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT value FROM resources WHERE key = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, resource: &Resource) -> Result<()> {
        let key = resource.hash.clone();
        let value = serde_json::to_string(resource)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO resources (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, hash: &str) -> Result<()> {
        let key = hash.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM resources WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }

    async fn values(&self) -> Result<Vec<Resource>> {
        let rows: Vec<(String, String)> = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT key, value FROM resources")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        let mut resources = Vec::with_capacity(rows.len());
        for (key, json) in rows {
            match serde_json::from_str::<Resource>(&json) {
                Ok(resource) => resources.push(resource),
                Err(e) => tracing::warn!("Skipping corrupt resource row {}: {}", key, e),
            }
        }
        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResourceType;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = SqliteStore::open_in_memory().unwrap();
        let resource = Resource::new("abc", ResourceType::Mod, "/lib/mods/a.jar");

        assert!(store.get("abc").await.unwrap().is_none());

        store.put(&resource).await.unwrap();
        assert_eq!(store.get("abc").await.unwrap(), Some(resource.clone()));

        store.delete("abc").await.unwrap();
        assert!(store.get("abc").await.unwrap().is_none());

        // deleting twice is fine
        store.delete("abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_replaces_by_hash() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut resource = Resource::new("abc", ResourceType::Mod, "/lib/mods/a.jar");
        store.put(&resource).await.unwrap();

        resource.name = "Renamed".into();
        store.put(&resource).await.unwrap();

        let values = store.values().await.unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].name, "Renamed");
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("resources.db");

        {
            let store = SqliteStore::open(&db).unwrap();
            store
                .put(&Resource::new("abc", ResourceType::Save, "/lib/saves/w.zip"))
                .await
                .unwrap();
        }

        let reopened = SqliteStore::open(&db).unwrap();
        let values = reopened.values().await.unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].resource_type, ResourceType::Save);
    }
}
