//! In-memory schedule of items, backed by `ItemPersistence`.
//!
//! All mutations go through one writer lock. User commands persist before
//! they touch memory, so a failed write leaves the schedule unchanged.
//! Scheduler and session bookkeeping is applied in memory first; if the
//! write fails the item is queued and `flush_pending` retries it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use reveille_core::clock::Clock;
use reveille_core::events::AlarmEvent;
use reveille_core::persistence::ItemPersistence;
use reveille_core::types::{AlarmItem, ItemId, ItemKind};

use crate::bus::EventBus;
use crate::error::EngineError;

#[derive(Default)]
struct Inner {
    items: BTreeMap<ItemId, AlarmItem>,
    unsaved: BTreeSet<ItemId>,
}

pub struct ScheduleStore {
    inner: RwLock<Inner>,
    persistence: Arc<dyn ItemPersistence>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    revision: watch::Sender<u64>,
}

impl ScheduleStore {
    /// Load every persisted item.
    pub fn load(
        persistence: Arc<dyn ItemPersistence>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let items = persistence.load_all()?;
        info!(count = items.len(), "Schedule loaded");
        let (revision, _) = watch::channel(0);
        Ok(Self {
            inner: RwLock::new(Inner {
                items: items.into_iter().map(|i| (i.id.clone(), i)).collect(),
                unsaved: BTreeSet::new(),
            }),
            persistence,
            bus,
            clock,
            revision,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    /// Revision counter that changes after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn get(&self, id: &ItemId) -> Result<AlarmItem, EngineError> {
        self.read()
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.clone()))
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.read().items.contains_key(id)
    }

    pub fn ids(&self) -> BTreeSet<ItemId> {
        self.read().items.keys().cloned().collect()
    }

    /// Items of one kind (or all), ordered by id.
    pub fn list(&self, kind: Option<ItemKind>) -> Vec<AlarmItem> {
        self.read()
            .items
            .values()
            .filter(|i| kind.map_or(true, |k| i.kind == k))
            .cloned()
            .collect()
    }

    /// Consistent copy of the whole schedule.
    pub fn snapshot(&self) -> Vec<AlarmItem> {
        self.list(None)
    }

    /// Enabled items whose due time is at or before `now`, earliest first.
    pub fn due_items(&self, now: DateTime<Utc>) -> Vec<AlarmItem> {
        let mut due: Vec<AlarmItem> = self
            .read()
            .items
            .values()
            .filter(|i| i.due_at().is_some_and(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|i| i.due_at());
        due
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.read().items.values().filter_map(|i| i.due_at()).min()
    }

    /// Add a new item. Fails if the id is taken or the write fails.
    pub fn insert(&self, item: AlarmItem) -> Result<AlarmItem, EngineError> {
        let mut inner = self.write();
        if inner.items.contains_key(&item.id) {
            return Err(EngineError::Validation(format!(
                "an item with id {} already exists",
                item.id
            )));
        }
        self.persist(&item)?;
        inner.items.insert(item.id.clone(), item.clone());
        drop(inner);
        self.bump();
        Ok(item)
    }

    /// Apply a user change. Nothing changes unless both `change` and the
    /// write succeed.
    pub fn update<F>(&self, id: &ItemId, change: F) -> Result<AlarmItem, EngineError>
    where
        F: FnOnce(&mut AlarmItem) -> Result<(), EngineError>,
    {
        let mut inner = self.write();
        let mut item = inner
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.clone()))?;
        change(&mut item)?;
        self.persist(&item)?;
        inner.unsaved.remove(id);
        inner.items.insert(id.clone(), item.clone());
        drop(inner);
        self.bump();
        Ok(item)
    }

    /// Apply engine bookkeeping. Always lands in memory; a failed write is
    /// queued for `flush_pending`.
    pub fn record<F>(&self, id: &ItemId, change: F) -> Result<AlarmItem, EngineError>
    where
        F: FnOnce(&mut AlarmItem),
    {
        let mut inner = self.write();
        let item = inner
            .items
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.clone()))?;
        change(item);
        let item = item.clone();

        if let Err(e) = self.persist(&item) {
            error!(item_id = %id, error = %e, "Deferring item write");
            inner.unsaved.insert(id.clone());
            self.bus.publish(AlarmEvent::PersistenceDeferred {
                item_id: id.clone(),
                error: e.to_string(),
                timestamp: self.clock.now(),
            });
        } else {
            inner.unsaved.remove(id);
        }
        drop(inner);
        self.bump();
        Ok(item)
    }

    pub fn remove(&self, id: &ItemId) -> Result<AlarmItem, EngineError> {
        let mut inner = self.write();
        if !inner.items.contains_key(id) {
            return Err(EngineError::NotFound(id.clone()));
        }
        self.persistence.delete(id)?;
        inner.unsaved.remove(id);
        let removed = inner
            .items
            .remove(id)
            .ok_or_else(|| EngineError::NotFound(id.clone()))?;
        drop(inner);
        self.bump();
        Ok(removed)
    }

    /// Retry queued writes. Returns how many are still queued.
    pub fn flush_pending(&self) -> usize {
        let mut inner = self.write();
        if inner.unsaved.is_empty() {
            return 0;
        }
        let queued: Vec<ItemId> = inner.unsaved.iter().cloned().collect();
        for id in queued {
            let Some(item) = inner.items.get(&id).cloned() else {
                inner.unsaved.remove(&id);
                continue;
            };
            match self.persist(&item) {
                Ok(()) => {
                    info!(item_id = %id, "Deferred item write saved");
                    inner.unsaved.remove(&id);
                }
                Err(e) => warn!(item_id = %id, error = %e, "Deferred item write still failing"),
            }
        }
        inner.unsaved.len()
    }

    pub fn pending_writes(&self) -> usize {
        self.read().unsaved.len()
    }

    fn persist(&self, item: &AlarmItem) -> Result<(), EngineError> {
        self.persistence.save(item).map_err(EngineError::from)
    }
}
