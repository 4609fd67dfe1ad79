//! The persistent store (spec §4.1): a single SQLite file opened with WAL,
//! foreign keys, and a busy timeout, versioned by an explicit migration
//! table. Every other component borrows this handle rather than opening its
//! own connection (spec §5: "Hooks must not open a second connection to the
//! same file").

mod schema;

pub use schema::CURRENT_SCHEMA_VERSION;

use crate::config::KnowledgeConfig;
use crate::error::KnowledgeError;
use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// Health snapshot returned by `db health` (spec §4.1, §6).
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub okay: bool,
    pub response_time_ms: u64,
    pub file_size_kb: u64,
    pub wal_size_kb: u64,
    pub shm_size_kb: u64,
    pub warnings: Vec<String>,
}

/// A handle to the single-file embedded database. Cheap to clone (it's an
/// `Arc` around one mutex-guarded connection); every component holds one.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    config: KnowledgeConfig,
}

impl Store {
    /// Open (or create) the database file, applying pending migrations.
    ///
    /// # Preconditions
    /// - The parent directory of `config.store_path` exists or can be created.
    ///
    /// # Postconditions
    /// - The on-disk schema is at `CURRENT_SCHEMA_VERSION`.
    /// - WAL mode and foreign keys are enabled for this connection.
    ///
    /// # Errors
    /// - `KnowledgeError::StoreCorrupt` if the file exists but isn't a
    ///   valid SQLite database.
    /// - `KnowledgeError::SchemaTooNew` if the on-disk version is newer
    ///   than `CURRENT_SCHEMA_VERSION` (a downgrade was attempted).
    #[instrument(skip(config))]
    pub async fn open(config: KnowledgeConfig) -> Result<Self> {
        if let Some(parent) = config.store_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating store directory {parent:?}"))?;
            }
        }

        let path = config.store_path.clone();
        let busy_timeout_ms = config.busy_timeout_ms;
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&path).map_err(|e| classify_open_error(&path, e))?;
            conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms as u64))?;
            conn.execute_batch(
                "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA synchronous=NORMAL;",
            )?;
            apply_migrations(&conn)?;
            Ok(conn)
        })
        .await??;

        info!(path = %config.store_path.display(), "store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
        })
    }

    /// Open an in-memory store, used by tests and by any caller that wants
    /// an ephemeral scratch database with the same schema.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        apply_migrations(&conn)?;
        let config = KnowledgeConfig::builder().build()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
        })
    }

    pub fn config(&self) -> &KnowledgeConfig {
        &self.config
    }

    /// Run `f` against the raw connection without a transaction wrapper.
    /// Used by read-only queries (`GraphQuery`, `Knowledge::query`, …) that
    /// don't need rollback semantics.
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.blocking_lock();
            f(&guard)
        })
        .await?
    }

    /// Run `f` inside a single write transaction. Commits on `Ok`, rolls
    /// back on `Err`. No reader observes intermediate state — the
    /// transaction is the unit of visibility (spec §5).
    #[instrument(skip(self, f))]
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.blocking_lock();
            let tx = guard.transaction()?;
            let result = f(&tx);
            match result {
                Ok(value) => {
                    tx.commit()?;
                    Ok(value)
                }
                Err(e) => {
                    // Explicit rollback for clarity; dropping `tx` would do
                    // the same, but this keeps the failure path readable.
                    let _ = tx.rollback();
                    Err(e)
                }
            }
        })
        .await?
    }

    /// Report on-disk size and a simple round-trip latency check.
    pub async fn health(&self) -> Result<HealthReport> {
        let start = Instant::now();
        let store_path = self.config.store_path.clone();
        let okay = self
            .with_connection(|conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
                Ok(())
            })
            .await
            .is_ok();

        let mut warnings = Vec::new();
        let file_size_kb = file_size_kb(&store_path);
        let wal_size_kb = file_size_kb(&wal_sidecar(&store_path, "-wal"));
        let shm_size_kb = file_size_kb(&wal_sidecar(&store_path, "-shm"));

        let model_count: Result<i64> = self
            .with_connection(|conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(DISTINCT model_id) FROM knowledge_embeddings",
                    [],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await;
        if let Ok(count) = model_count {
            if count > 1 {
                warnings.push(format!(
                    "{count} distinct embedding model ids present; top-k queries silently skip mismatched dimensions"
                ));
            }
        }

        if !okay {
            warnings.push("store did not respond to a trivial read".to_string());
        }

        Ok(HealthReport {
            okay,
            response_time_ms: start.elapsed().as_millis() as u64,
            file_size_kb,
            wal_size_kb,
            shm_size_kb,
            warnings,
        })
    }

    /// Close the store. SQLite connections close on drop; this exists for
    /// symmetry with `open` and to give callers an explicit point to await.
    pub async fn close(self) -> Result<()> {
        debug!("store closed");
        Ok(())
    }
}

/// A file locked by another writer past SQLite's own lock-retry loop maps to
/// `Busy` (the caller can retry); anything else means the file isn't a
/// database we can open at all.
fn classify_open_error(path: &std::path::Path, e: rusqlite::Error) -> anyhow::Error {
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = &e {
        if matches!(
            ffi_err.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ) {
            return anyhow::anyhow!(KnowledgeError::Busy(format!("{path:?} is locked: {e}")));
        }
    }
    anyhow::anyhow!(KnowledgeError::StoreCorrupt(format!(
        "failed to open {path:?}: {e}"
    )))
}

fn apply_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let current: i64 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    if current > schema::CURRENT_SCHEMA_VERSION {
        return Err(anyhow::anyhow!(KnowledgeError::SchemaTooNew {
            on_disk: current,
            supported: schema::CURRENT_SCHEMA_VERSION,
        }));
    }

    for migration in schema::MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        conn.execute_batch(migration.sql)?;
    }

    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [schema::CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

fn file_size_kb(path: &std::path::Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len() / 1024).unwrap_or(0)
}

fn wal_sidecar(path: &std::path::Path, suffix: &str) -> std::path::PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_applies_migrations() {
        let store = Store::open_in_memory().await.unwrap();
        let version: i64 = store
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn transaction_rolls_back_on_error() {
        let store = Store::open_in_memory().await.unwrap();
        let result: Result<()> = store
            .transaction(|tx| {
                tx.execute(
                    "INSERT INTO workflows (id, branch, phase, status, created_at, updated_at) VALUES ('w1','b','research','running',0,0)",
                    [],
                )?;
                Err(anyhow::anyhow!("boom"))
            })
            .await;
        assert!(result.is_err());

        let count: i64 = store
            .with_connection(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM workflows", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn health_reports_okay() {
        let store = Store::open_in_memory().await.unwrap();
        let health = store.health().await.unwrap();
        assert!(health.okay);
    }

    #[test]
    fn open_error_classifies_locked_file_as_busy_not_corrupt() {
        let path = std::path::Path::new("/tmp/does-not-matter.db");

        let locked = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        let err = classify_open_error(path, locked);
        assert!(matches!(
            err.downcast_ref::<KnowledgeError>(),
            Some(KnowledgeError::Busy(_))
        ));

        let not_a_db = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_NOTADB),
            Some("file is not a database".to_string()),
        );
        let err = classify_open_error(path, not_a_db);
        assert!(matches!(
            err.downcast_ref::<KnowledgeError>(),
            Some(KnowledgeError::StoreCorrupt(_))
        ));
    }
}
