use crate::models::snapshot::{NewSnapshot, Snapshot};
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use std::path::Path;

const DB_SCHEMA_VERSION: i64 = 2;

const SNAPSHOT_COLUMNS: &str =
    "id, timestamp, kind, payload, item_count, checksum, connection_healthy, latency_ms";

pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = FULL;",
    )?;

    let mut version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        apply_migration_1(conn)?;
        version = 1;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version < 2 {
        apply_migration_2(conn)?;
        version = 2;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version > DB_SCHEMA_VERSION {
        // Written by a newer build; reads and appends stay compatible.
        conn.pragma_update(None, "user_version", version)?;
    }

    Ok(())
}

fn apply_migration_1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            kind TEXT NOT NULL DEFAULT 'full' CHECK(kind IN ('full', 'partial')),
            payload TEXT NOT NULL,
            item_count INTEGER NOT NULL DEFAULT 0,
            checksum TEXT NOT NULL,
            connection_healthy INTEGER NOT NULL DEFAULT 0,
            latency_ms INTEGER NOT NULL DEFAULT -1
        );
        ",
    )
}

fn apply_migration_2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_snapshots_timestamp ON snapshots(timestamp);
        CREATE INDEX IF NOT EXISTS idx_snapshots_item_count ON snapshots(item_count);

        CREATE TRIGGER IF NOT EXISTS snapshots_append_only
        BEFORE UPDATE ON snapshots
        BEGIN
            SELECT RAISE(ABORT, 'snapshots are append-only');
        END;
        ",
    )
}

pub fn open_snapshot_store(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    initialize_schema(&conn)?;
    Ok(conn)
}

fn snapshot_from_row(row: &Row<'_>) -> Result<Snapshot> {
    Ok(Snapshot {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        kind: row.get(2)?,
        payload: row.get(3)?,
        item_count: row.get(4)?,
        checksum: row.get(5)?,
        connection_healthy: row.get::<_, i64>(6)? != 0,
        latency_ms: row.get(7)?,
    })
}

pub fn append_snapshot(conn: &Connection, snapshot: &NewSnapshot) -> Result<Snapshot> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO snapshots (timestamp, kind, payload, item_count, checksum, connection_healthy, latency_ms) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            snapshot.timestamp,
            &snapshot.kind,
            &snapshot.payload,
            snapshot.item_count,
            &snapshot.checksum,
            snapshot.connection_healthy as i64,
            snapshot.latency_ms,
        ],
    )?;
    let id = tx.last_insert_rowid();
    tx.commit()?;

    Ok(Snapshot {
        id,
        timestamp: snapshot.timestamp,
        kind: snapshot.kind.clone(),
        payload: snapshot.payload.clone(),
        item_count: snapshot.item_count,
        checksum: snapshot.checksum.clone(),
        connection_healthy: snapshot.connection_healthy,
        latency_ms: snapshot.latency_ms,
    })
}

/// Most recent snapshot with items, captured while the remote was healthy.
pub fn latest_good(conn: &Connection) -> Result<Option<Snapshot>> {
    conn.query_row(
        &format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE item_count > 0 AND connection_healthy = 1 ORDER BY timestamp DESC, id DESC LIMIT 1"
        ),
        [],
        snapshot_from_row,
    )
    .optional()
}

pub fn get_snapshot(conn: &Connection, id: i64) -> Result<Option<Snapshot>> {
    conn.query_row(
        &format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE id = ?1"),
        params![id],
        snapshot_from_row,
    )
    .optional()
}

pub fn latest_snapshot(conn: &Connection) -> Result<Option<Snapshot>> {
    conn.query_row(
        &format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshots ORDER BY timestamp DESC, id DESC LIMIT 1"),
        [],
        snapshot_from_row,
    )
    .optional()
}

pub fn count_all(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))
}

pub fn list_recent(conn: &Connection, limit: usize) -> Result<Vec<Snapshot>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM snapshots ORDER BY timestamp DESC, id DESC LIMIT ?1"
    ))?;
    let rows = stmt.query_map(params![limit as i64], snapshot_from_row)?;
    rows.collect()
}
