//! SQLite-backed item persistence.

use std::sync::Arc;

use reveille_core::error::ReveilleError;
use reveille_core::persistence::ItemPersistence;
use reveille_core::types::{AlarmItem, ItemId, ItemKind};

use crate::db::Database;

/// Repository for alarm and reminder items.
pub struct SqliteItemStore {
    db: Arc<Database>,
}

impl SqliteItemStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Find an item by id.
    pub fn find_by_id(&self, id: &ItemId) -> Result<Option<AlarmItem>, ReveilleError> {
        self.db.with_conn(|conn| {
            let data = conn
                .query_row(
                    "SELECT data FROM items WHERE id = ?1",
                    rusqlite::params![id.as_str()],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .map_err(|e| ReveilleError::Storage(e.to_string()))?;
            data.map(|d| decode(&d)).transpose()
        })
    }

    /// List items of one kind, ordered by id.
    pub fn find_by_kind(&self, kind: ItemKind) -> Result<Vec<AlarmItem>, ReveilleError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT data FROM items WHERE kind = ?1 ORDER BY id")
                .map_err(|e| ReveilleError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params![kind.to_string()], |row| {
                    row.get::<_, String>(0)
                })
                .map_err(|e| ReveilleError::Storage(e.to_string()))?;

            let mut items = Vec::new();
            for row in rows {
                let data = row.map_err(|e| ReveilleError::Storage(e.to_string()))?;
                items.push(decode(&data)?);
            }
            Ok(items)
        })
    }

    pub fn count(&self) -> Result<u64, ReveilleError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
                .map_err(|e| ReveilleError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

impl ItemPersistence for SqliteItemStore {
    fn load_all(&self) -> Result<Vec<AlarmItem>, ReveilleError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, data FROM items ORDER BY kind, id")
                .map_err(|e| ReveilleError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
                .map_err(|e| ReveilleError::Storage(e.to_string()))?;

            let mut items = Vec::new();
            for row in rows {
                let (id, data) = row.map_err(|e| ReveilleError::Storage(e.to_string()))?;
                match decode(&data) {
                    Ok(item) => items.push(item),
                    Err(e) => {
                        tracing::warn!(item_id = %id, error = %e, "Skipping unreadable item row");
                    }
                }
            }
            Ok(items)
        })
    }

    fn save(&self, item: &AlarmItem) -> Result<(), ReveilleError> {
        let data = serde_json::to_string(item)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO items (id, kind, name, enabled, status, next_fire, data, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, strftime('%s', 'now'))
                 ON CONFLICT(id) DO UPDATE SET
                    kind = excluded.kind,
                    name = excluded.name,
                    enabled = excluded.enabled,
                    status = excluded.status,
                    next_fire = excluded.next_fire,
                    data = excluded.data,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    item.id.as_str(),
                    item.kind.to_string(),
                    item.name,
                    item.enabled as i32,
                    item.status.to_string(),
                    item.due_at().map(|t| t.timestamp()),
                    data,
                ],
            )
            .map_err(|e| ReveilleError::Storage(format!("Failed to save item: {}", e)))?;
            Ok(())
        })
    }

    fn delete(&self, id: &ItemId) -> Result<(), ReveilleError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM items WHERE id = ?1",
                rusqlite::params![id.as_str()],
            )
            .map_err(|e| ReveilleError::Storage(format!("Failed to delete item: {}", e)))?;
            Ok(())
        })
    }
}

fn decode(data: &str) -> Result<AlarmItem, ReveilleError> {
    Ok(serde_json::from_str(data)?)
}

/// Extension trait for rusqlite to support optional query results.
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
