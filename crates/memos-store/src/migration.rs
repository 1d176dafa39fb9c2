//! Schema migration system.
//!
//! Migrations are stored as static SQL strings keyed by version number.
//! The current version is tracked in a `_migrations` table so migrations
//! are idempotent and only run once.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

/// A single migration definition.
struct Migration {
    /// Monotonically increasing version number (1, 2, 3, ...).
    version: u32,
    /// Human-readable description.
    description: &'static str,
    /// Raw SQL to execute. May contain multiple statements separated by `;`.
    sql: &'static str,
}

/// All migrations in order. Add new migrations to the end of this array.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "memo table with unique uid and short id",
        sql: r#"
            CREATE TABLE memo (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                uid         TEXT NOT NULL UNIQUE,
                short_id    TEXT NOT NULL UNIQUE,
                creator_id  INTEGER NOT NULL,
                created_ts  INTEGER NOT NULL,
                updated_ts  INTEGER NOT NULL,
                row_status  TEXT NOT NULL DEFAULT 'NORMAL' CHECK(row_status IN ('NORMAL','ARCHIVED')),
                content     TEXT NOT NULL DEFAULT '',
                visibility  TEXT NOT NULL DEFAULT 'PRIVATE' CHECK(visibility IN ('PUBLIC','PROTECTED','PRIVATE')),
                pinned      INTEGER NOT NULL DEFAULT 0 CHECK(pinned IN (0, 1)),
                payload     TEXT NOT NULL DEFAULT '{}'
            );
            CREATE INDEX idx_memo_creator_status ON memo(creator_id, row_status);
            CREATE INDEX idx_memo_created_ts ON memo(created_ts);
        "#,
    },
    Migration {
        version: 2,
        description: "memo relations for comments and references",
        sql: r#"
            CREATE TABLE memo_relation (
                memo_id         INTEGER NOT NULL REFERENCES memo(id) ON DELETE CASCADE,
                related_memo_id INTEGER NOT NULL REFERENCES memo(id) ON DELETE CASCADE,
                type            TEXT NOT NULL CHECK(type IN ('COMMENT','REFERENCE')),
                PRIMARY KEY (memo_id, related_memo_id, type)
            );
            CREATE INDEX idx_memo_relation_related ON memo_relation(related_memo_id, type);
        "#,
    },
];

// ── public API ───────────────────────────────────────────────────────

/// Run all pending migrations against `conn`.
///
/// This is a **synchronous** function; call it from `spawn_blocking`.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        debug!(current_version = current, "database schema is up to date");
        return Ok(());
    }

    info!(
        current_version = current,
        pending = pending.len(),
        "running pending migrations"
    );

    for migration in pending {
        apply(conn, migration)?;
    }

    info!(
        new_version = MIGRATIONS.last().map(|m| m.version).unwrap_or(0),
        "all migrations applied"
    );
    Ok(())
}

/// Return the latest applied migration version, or 0 if none.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    let version: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StoreError::Migration {
            version: 0,
            message: format!("failed to read current version: {e}"),
        })?;
    Ok(version)
}

// ── internals ────────────────────────────────────────────────────────

fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to create _migrations table: {e}"),
    })?;
    Ok(())
}

/// Apply a single migration inside a transaction.
fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    info!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );

    // `conn.transaction()` needs `&mut Connection`, so the transaction is
    // managed by hand.
    conn.execute_batch("BEGIN IMMEDIATE;")
        .map_err(|e| StoreError::Migration {
            version: migration.version,
            message: format!("failed to begin transaction: {e}"),
        })?;

    let result = (|| -> StoreResult<()> {
        conn.execute_batch(migration.sql)
            .map_err(|e| StoreError::Migration {
                version: migration.version,
                message: format!("SQL execution failed: {e}"),
            })?;

        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![migration.version, migration.description, now],
        )
        .map_err(|e| StoreError::Migration {
            version: migration.version,
            message: format!("failed to record migration: {e}"),
        })?;

        Ok(())
    })();

    match &result {
        Ok(()) => {
            conn.execute_batch("COMMIT;")
                .map_err(|e| StoreError::Migration {
                    version: migration.version,
                    message: format!("failed to commit: {e}"),
                })?;
            info!(version = migration.version, "migration applied successfully");
        }
        Err(err) => {
            warn!(version = migration.version, %err, "migration failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK;");
        }
    }

    result
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn
    }

    /// The expected latest migration version (update when adding migrations).
    const LATEST_VERSION: u32 = 2;

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(
                window[1].version > window[0].version,
                "migration versions must be strictly increasing: {} >= {}",
                window[0].version,
                window[1].version,
            );
        }
    }

    #[test]
    fn run_all_on_fresh_db() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn run_all_is_idempotent() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn memo_short_id_is_unique() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO memo (uid, short_id, creator_id, created_ts, updated_ts) \
             VALUES ('a', 'abc1234', 1, 0, 0)",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO memo (uid, short_id, creator_id, created_ts, updated_ts) \
             VALUES ('b', 'abc1234', 1, 0, 0)",
            [],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn memo_visibility_is_checked() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        let bad = conn.execute(
            "INSERT INTO memo (uid, short_id, creator_id, created_ts, updated_ts, visibility) \
             VALUES ('a', 'abc1234', 1, 0, 0, 'SECRET')",
            [],
        );
        assert!(bad.is_err());
    }

    #[test]
    fn relations_cascade_with_memo() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO memo (id, uid, short_id, creator_id, created_ts, updated_ts) VALUES (1, 'p', 'aaa0000', 1, 0, 0);
             INSERT INTO memo (id, uid, short_id, creator_id, created_ts, updated_ts) VALUES (2, 'c', 'bbb0000', 1, 0, 0);
             INSERT INTO memo_relation (memo_id, related_memo_id, type) VALUES (2, 1, 'COMMENT');
             DELETE FROM memo WHERE id = 1;",
        )
        .unwrap();

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM memo_relation", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
