//! Database schema migrations.
//!
//! Version 1 creates the `items` table. The full item is stored as JSON,
//! with the fields used for filtering and ordering mirrored into columns.

use rusqlite::Connection;
use tracing::info;

use reveille_core::error::ReveilleError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), ReveilleError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ReveilleError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| ReveilleError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: items");
    }

    Ok(())
}

/// Version 1: items table.
fn apply_v1(conn: &Connection) -> Result<(), ReveilleError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS items (
            id          TEXT PRIMARY KEY NOT NULL,
            kind        TEXT NOT NULL CHECK (kind IN ('alarm', 'reminder')),
            name        TEXT,
            enabled     INTEGER NOT NULL DEFAULT 1,
            status      TEXT NOT NULL,
            next_fire   INTEGER,
            data        TEXT NOT NULL,
            updated_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_items_kind
            ON items (kind, id);

        CREATE INDEX IF NOT EXISTS idx_items_next_fire
            ON items (next_fire)
            WHERE enabled = 1;

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'items');
        ",
    )
    .map_err(|e| ReveilleError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_once() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_items_kind_check() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let ok = conn.execute(
            "INSERT INTO items (id, kind, status, data) VALUES ('a', 'alarm', 'scheduled', '{}')",
            [],
        );
        assert!(ok.is_ok());

        let bad = conn.execute(
            "INSERT INTO items (id, kind, status, data) VALUES ('b', 'timer', 'scheduled', '{}')",
            [],
        );
        assert!(bad.is_err());
    }
}
