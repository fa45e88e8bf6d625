use crate::commands::settings::RetentionSettings;
use rusqlite::{params, Connection, Result};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Deletes snapshots older than the retention window, except the
/// `keep_protected` most recent known-good ones. Does nothing until the
/// table grows past the high-water mark. Returns the number of rows removed.
pub fn prune(conn: &Connection, settings: &RetentionSettings, now_ms: i64) -> Result<usize> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
    if total <= i64::from(settings.high_water_mark) {
        return Ok(0);
    }

    let cutoff = now_ms - i64::from(settings.window_days) * DAY_MS;
    let tx = conn.unchecked_transaction()?;
    let removed = tx.execute(
        "
        DELETE FROM snapshots
        WHERE timestamp < ?1
          AND id NOT IN (
              SELECT id FROM snapshots
              WHERE item_count > 0 AND connection_healthy = 1
              ORDER BY timestamp DESC, id DESC
              LIMIT ?2
          )
        ",
        params![cutoff, i64::from(settings.keep_protected)],
    )?;
    tx.commit()?;

    Ok(removed)
}

pub fn prune_best_effort(conn: &Connection, settings: &RetentionSettings, now_ms: i64) -> usize {
    match prune(conn, settings, now_ms) {
        Ok(0) => 0,
        Ok(removed) => {
            log::info!("retention: pruned {removed} snapshots");
            removed
        }
        Err(e) => {
            log::warn!("retention: prune failed, keeping all snapshots: {e}");
            0
        }
    }
}
