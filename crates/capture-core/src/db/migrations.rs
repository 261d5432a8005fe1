//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Migration to version 1: revision trees, unsynced log and checkpoints
async fn migrate_v1(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Materialized winner of every record
        "CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            table_name TEXT NOT NULL,
            rev TEXT NOT NULL,
            parent_rev TEXT,
            revisions TEXT NOT NULL,
            depth INTEGER NOT NULL,
            payload TEXT NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            client_rev_at INTEGER NOT NULL,
            client_rev_by TEXT NOT NULL,
            server_rev_at INTEGER,
            conflicts TEXT NOT NULL DEFAULT '[]',
            deleted_conflicts TEXT NOT NULL DEFAULT '[]',
            conflict_count INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE INDEX IF NOT EXISTS idx_records_table ON records(table_name, client_rev_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_records_conflicted ON records(conflict_count) WHERE conflict_count > 0",
        // Every revision node with a body
        "CREATE TABLE IF NOT EXISTS revisions (
            record_id TEXT NOT NULL,
            table_name TEXT NOT NULL,
            rev TEXT NOT NULL,
            depth INTEGER NOT NULL,
            document TEXT NOT NULL,
            server_rev_at INTEGER,
            PRIMARY KEY (record_id, rev)
        )",
        "CREATE INDEX IF NOT EXISTS idx_revisions_server_rev_at ON revisions(table_name, server_rev_at)",
        // Ancestors whose bodies were purged
        "CREATE TABLE IF NOT EXISTS purged_revisions (
            record_id TEXT NOT NULL,
            rev TEXT NOT NULL,
            parent_rev TEXT,
            purged_at INTEGER NOT NULL,
            PRIMARY KEY (record_id, rev)
        )",
        // Local edits waiting for the authority
        "CREATE TABLE IF NOT EXISTS unsynced_revisions (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            table_name TEXT NOT NULL,
            record_id TEXT NOT NULL,
            rev TEXT NOT NULL,
            queued_at INTEGER NOT NULL,
            pushed_at INTEGER,
            UNIQUE (record_id, rev)
        )",
        "CREATE INDEX IF NOT EXISTS idx_unsynced_pending ON unsynced_revisions(table_name, pushed_at, seq)",
        // Highest server_rev_at pulled per table
        "CREATE TABLE IF NOT EXISTS sync_checkpoints (
            table_name TEXT PRIMARY KEY,
            server_rev_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    apply(conn, 1, &statements).await
}

/// Migration to version 2: conflict discovery history
async fn migrate_v2(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS sync_conflicts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            table_name TEXT NOT NULL,
            record_id TEXT NOT NULL,
            winner_rev TEXT NOT NULL,
            losing_rev TEXT NOT NULL,
            detected_at INTEGER NOT NULL,
            source TEXT NOT NULL,
            UNIQUE (record_id, losing_rev)
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_record_id ON sync_conflicts(record_id)",
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_detected_at ON sync_conflicts(detected_at DESC)",
        "INSERT INTO schema_version (version) VALUES (2)",
    ];

    apply(conn, 2, &statements).await
}

/// Run a migration's statements in one transaction.
///
/// libsql has no `execute_batch`, so statements run one by one.
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version}");
    Ok(())
}
