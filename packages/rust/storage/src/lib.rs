//! Checkpoint storage.
//!
//! A checkpoint is the last successfully saved item id for a
//! `(group, account)` pair. Two backends implement [`CheckpointStore`]:
//! - [`MemoryCheckpoints`]: process-lifetime only
//! - [`Storage`]: a libSQL database that survives restarts
//!
//! **Access rules:**
//! - the scheduler worker is the sole writer, via [`Storage::open`]
//! - inspection tooling reads via [`Storage::open_readonly`]

mod migrations;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database, params};
use sundew_shared::{ItemId, Result, SundewError};
use tokio::sync::Mutex;

/// Read/write access to per-account checkpoints. There is no delete.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last processed item id for the pair, `None` if never saved.
    async fn get(&self, group: &str, account: &str) -> Result<Option<ItemId>>;

    /// Record `id` as the last processed item for the pair.
    async fn set(&self, group: &str, account: &str, id: &ItemId) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Checkpoints held for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryCheckpoints {
    entries: Mutex<HashMap<(String, String), ItemId>>,
}

impl MemoryCheckpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every entry, keyed by `(group, account)`.
    pub async fn snapshot(&self) -> BTreeMap<(String, String), ItemId> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpoints {
    async fn get(&self, group: &str, account: &str) -> Result<Option<ItemId>> {
        Ok(self
            .entries
            .lock()
            .await
            .get(&(group.to_string(), account.to_string()))
            .cloned())
    }

    async fn set(&self, group: &str, account: &str, id: &ItemId) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert((group.to_string(), account.to_string()), id.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// libSQL backend
// ---------------------------------------------------------------------------

/// A stored checkpoint row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub group: String,
    pub account: String,
    pub last_id: ItemId,
    pub updated_at: String,
}

/// Durable checkpoint storage wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SundewError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| SundewError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| SundewError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        tracing::info!(path = %path.display(), "checkpoint database opened");
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SundewError::Storage(format!(
                "checkpoint database {} does not exist",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| SundewError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| SundewError::Storage(e.to_string()))?;

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
                        SundewError::Storage(format!(
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

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(SundewError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    /// All stored checkpoints ordered by group then account.
    pub async fn list_checkpoints(&self) -> Result<Vec<CheckpointRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT group_name, account, last_id, updated_at
                 FROM checkpoints ORDER BY group_name, account",
                params![],
            )
            .await
            .map_err(|e| SundewError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(CheckpointRecord {
                group: row
                    .get::<String>(0)
                    .map_err(|e| SundewError::Storage(e.to_string()))?,
                account: row
                    .get::<String>(1)
                    .map_err(|e| SundewError::Storage(e.to_string()))?,
                last_id: ItemId::new(
                    row.get::<String>(2)
                        .map_err(|e| SundewError::Storage(e.to_string()))?,
                ),
                updated_at: row
                    .get::<String>(3)
                    .map_err(|e| SundewError::Storage(e.to_string()))?,
            });
        }
        Ok(results)
    }
}

#[async_trait]
impl CheckpointStore for Storage {
    async fn get(&self, group: &str, account: &str) -> Result<Option<ItemId>> {
        let mut rows = self
            .conn
            .query(
                "SELECT last_id FROM checkpoints WHERE group_name = ?1 AND account = ?2",
                params![group, account],
            )
            .await
            .map_err(|e| SundewError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(ItemId::new(
                row.get::<String>(0)
                    .map_err(|e| SundewError::Storage(e.to_string()))?,
            ))),
            Ok(None) => Ok(None),
            Err(e) => Err(SundewError::Storage(e.to_string())),
        }
    }

    async fn set(&self, group: &str, account: &str, id: &ItemId) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO checkpoints (group_name, account, last_id, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(group_name, account) DO UPDATE SET
                   last_id = excluded.last_id,
                   updated_at = excluded.updated_at",
                params![group, account, id.as_str(), now.as_str()],
            )
            .await
            .map_err(|e| SundewError::Storage(e.to_string()))?;
        Ok(())
    }
}
