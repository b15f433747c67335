//! Read-only view of the whole schedule for dashboards and the API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reveille_core::types::{AlarmItem, ItemId, ItemKind, ItemStatus};

use crate::session::SessionSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub id: ItemId,
    pub kind: ItemKind,
    pub name: String,
    pub enabled: bool,
    pub status: ItemStatus,
    /// Effective due time: the snooze when one is pending.
    pub next_fire: Option<DateTime<Utc>>,
    pub snoozed_until: Option<DateTime<Utc>>,
    pub last_fired: Option<DateTime<Utc>>,
    /// Live session, or the last one that ended.
    pub session: Option<SessionSnapshot>,
}

impl ItemSnapshot {
    pub fn new(item: &AlarmItem, session: Option<SessionSnapshot>) -> Self {
        Self {
            id: item.id.clone(),
            kind: item.kind,
            name: item.display_name(),
            enabled: item.enabled,
            status: item.status,
            next_fire: item.due_at(),
            snoozed_until: item.snoozed_until,
            last_fired: item.last_fired,
            session,
        }
    }

    pub fn is_sounding(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.state.is_live())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    pub generated_at: DateTime<Utc>,
    pub items: Vec<ItemSnapshot>,
    pub alarm_count: usize,
    pub reminder_count: usize,
    pub active_count: usize,
    /// True while any item is sounding.
    pub active: bool,
}

impl ScheduleSnapshot {
    pub fn new(generated_at: DateTime<Utc>, items: Vec<ItemSnapshot>) -> Self {
        let count = |kind: ItemKind| items.iter().filter(|i| i.kind == kind).count();
        let alarm_count = count(ItemKind::Alarm);
        let reminder_count = count(ItemKind::Reminder);
        let active_count = items.iter().filter(|i| i.is_sounding()).count();
        Self {
            generated_at,
            alarm_count,
            reminder_count,
            active_count,
            active: active_count > 0,
            items,
        }
    }
}
