//! Persistence collaborator contract.
//!
//! The schedule store keeps the authoritative in-memory copy of every item
//! and writes through an `ItemPersistence`. Failures are retryable storage
//! errors; callers decide whether to surface or requeue them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{ReveilleError, Result};
use crate::types::{AlarmItem, ItemId};

pub trait ItemPersistence: Send + Sync {
    fn load_all(&self) -> Result<Vec<AlarmItem>>;
    fn save(&self, item: &AlarmItem) -> Result<()>;
    fn delete(&self, id: &ItemId) -> Result<()>;
}

/// In-memory persistence, with switchable write failures for tests.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    items: Mutex<BTreeMap<ItemId, AlarmItem>>,
    fail_writes: AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with existing items, as if loaded from a previous run.
    pub fn with_items(items: Vec<AlarmItem>) -> Self {
        let map = items.into_iter().map(|i| (i.id.clone(), i)).collect();
        Self {
            items: Mutex::new(map),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `save`/`delete` fail until switched off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, id: &ItemId) -> Option<AlarmItem> {
        self.items.lock().ok().and_then(|m| m.get(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ReveilleError::Storage("persistence unavailable".to_string()));
        }
        Ok(())
    }
}

impl ItemPersistence for MemoryPersistence {
    fn load_all(&self) -> Result<Vec<AlarmItem>> {
        let items = self
            .items
            .lock()
            .map_err(|e| ReveilleError::Storage(format!("Lock poisoned: {}", e)))?;
        Ok(items.values().cloned().collect())
    }

    fn save(&self, item: &AlarmItem) -> Result<()> {
        self.check_writable()?;
        let mut items = self
            .items
            .lock()
            .map_err(|e| ReveilleError::Storage(format!("Lock poisoned: {}", e)))?;
        items.insert(item.id.clone(), item.clone());
        Ok(())
    }

    fn delete(&self, id: &ItemId) -> Result<()> {
        self.check_writable()?;
        let mut items = self
            .items
            .lock()
            .map_err(|e| ReveilleError::Storage(format!("Lock poisoned: {}", e)))?;
        items.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::RepeatPattern;
    use crate::types::{Announcement, DeviceRef, ItemKind, ItemStatus};
    use chrono::{NaiveTime, Utc};
    use chrono_tz::Tz;

    fn item(id: &str) -> AlarmItem {
        AlarmItem {
            id: ItemId::new(id),
            kind: ItemKind::Alarm,
            name: None,
            pattern: RepeatPattern::Daily,
            time_of_day: NaiveTime::from_hms_opt(6, 45, 0).unwrap(),
            timezone: Tz::UTC,
            enabled: true,
            device: DeviceRef::new("media_player.kitchen"),
            announcement: Announcement::standard(None),
            activation_entities: vec![],
            volume: None,
            notify: None,
            snoozed_until: None,
            last_fired: None,
            next_fire: None,
            status: ItemStatus::Scheduled,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_load_delete() {
        let store = MemoryPersistence::new();
        store.save(&item("alarm_1")).unwrap();
        store.save(&item("alarm_2")).unwrap();
        assert_eq!(store.load_all().unwrap().len(), 2);

        store.delete(&ItemId::new("alarm_1")).unwrap();
        let remaining = store.load_all().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id.as_str(), "alarm_2");
    }

    #[test]
    fn test_failing_writes_leave_state_untouched() {
        let store = MemoryPersistence::with_items(vec![item("alarm_1")]);
        store.set_fail_writes(true);

        let err = store.save(&item("alarm_2")).unwrap_err();
        assert!(matches!(err, ReveilleError::Storage(_)));
        assert!(store.delete(&ItemId::new("alarm_1")).is_err());
        assert_eq!(store.len(), 1);

        store.set_fail_writes(false);
        store.save(&item("alarm_2")).unwrap();
        assert_eq!(store.len(), 2);
    }
}
