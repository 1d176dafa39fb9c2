//! SQLite database setup with WAL mode, mmap, and performance pragmas.
//!
//! The [`Database`] struct wraps a `rusqlite::Connection` behind an
//! `Arc<Mutex<>>` and exposes async methods that use
//! `tokio::task::spawn_blocking` to avoid blocking the async runtime.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::migration;

/// Thread-safe handle to a SQLite database.
///
/// All read/write operations go through [`Database::execute`] which
/// dispatches onto the blocking thread pool via `tokio::task::spawn_blocking`.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database at `path` with default pragmas.
    ///
    /// This call blocks briefly (file I/O), so call it during startup before
    /// entering the main async loop, or wrap it in `spawn_blocking` yourself.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with(path.as_ref(), &StoreConfig::default())
    }

    /// Open the database named by `config.database_path`, creating its parent
    /// directory if needed.
    pub fn open_with_config(config: &StoreConfig) -> StoreResult<Self> {
        if let Some(parent) = config.database_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Config(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        Self::open_with(&config.database_path, config)
    }

    /// Create an in-memory database, useful for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory database");

        let conn = Connection::open_in_memory()?;
        Self::apply_pragmas(&conn, &StoreConfig::default())?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open the database and run all pending migrations.
    pub async fn open_and_migrate(path: impl AsRef<Path> + Send + 'static) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = tokio::task::spawn_blocking(move || Self::open(&path)).await??;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all pending schema migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))?;
            migration::run_all(&conn)
        })
        .await?
    }

    /// Execute an arbitrary closure against the connection on the blocking pool.
    ///
    /// This is the primary way to interact with the database from async code.
    /// The closure receives a `&Connection` and must return a `StoreResult<T>`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let count: i64 = db.execute(|conn| {
    ///     let count = conn.query_row("SELECT count(*) FROM memo", [], |row| row.get(0))?;
    ///     Ok(count)
    /// }).await?;
    /// ```
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))?;
            f(&conn)
        })
        .await?
    }

    /// Execute a mutable closure (for transactions, etc.) on the blocking pool.
    ///
    /// The closure receives a `&mut Connection` so you can call
    /// `conn.transaction()` and friends.
    pub async fn execute_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))?;
            f(&mut conn)
        })
        .await?
    }

    fn open_with(path: &Path, config: &StoreConfig) -> StoreResult<Self> {
        info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        Self::apply_pragmas(&conn, config)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ── pragmas ──────────────────────────────────────────────────────

    /// Apply all performance pragmas to a fresh connection.
    fn apply_pragmas(conn: &Connection, config: &StoreConfig) -> StoreResult<()> {
        debug!("applying SQLite performance pragmas");

        // WAL mode: concurrent readers, non-blocking writes.
        conn.pragma_update(None, "journal_mode", "WAL")?;

        // NORMAL sync is safe with WAL; a power failure loses the last
        // transaction, not the file.
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.pragma_update(None, "mmap_size", config.mmap_size_bytes)?;

        // Negative value means KiB.
        conn.pragma_update(None, "cache_size", -i64::from(config.cache_size_kib))?;

        conn.pragma_update(None, "temp_store", "MEMORY")?;

        // memo_relation rows cascade with their memo.
        conn.pragma_update(None, "foreign_keys", "ON")?;

        conn.pragma_update(None, "busy_timeout", config.busy_timeout_ms)?;

        info!(
            mmap_bytes = config.mmap_size_bytes,
            cache_kib = config.cache_size_kib,
            busy_timeout_ms = config.busy_timeout_ms,
            "database pragmas applied"
        );
        Ok(())
    }
}

// ── tests ────────────────────────────────────────────────────────────
