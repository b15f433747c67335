use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{EntityRef, ItemId, ItemKind};

/// All domain events published by the Reveille engine.
///
/// Events are emitted after state changes and consumed by:
/// - The SSE broadcast stream (dashboards, automations)
/// - Logs and tests that assert on engine behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[non_exhaustive]
pub enum AlarmEvent {
    // =========================================================================
    // Schedule Events
    // =========================================================================
    ItemCreated {
        item_id: ItemId,
        kind: ItemKind,
        timestamp: DateTime<Utc>,
    },

    /// Fields, schedule or enabled flag changed through the command surface.
    ItemUpdated {
        item_id: ItemId,
        timestamp: DateTime<Utc>,
    },

    ItemDeleted {
        item_id: ItemId,
        timestamp: DateTime<Utc>,
    },

    /// A snooze was applied; the item fires again at `until`.
    ItemSnoozed {
        item_id: ItemId,
        until: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// A one-shot item has no further occurrence and was disabled.
    ItemExpired {
        item_id: ItemId,
        timestamp: DateTime<Utc>,
    },

    /// A fire was overdue past the grace window and was not played.
    FireMissed {
        item_id: ItemId,
        due: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// A state write could not be persisted and was queued for retry.
    PersistenceDeferred {
        item_id: ItemId,
        error: String,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Playback Events
    // =========================================================================
    ItemFired {
        item_id: ItemId,
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// The item already had a live session, so the fire was dropped.
    FireSkipped {
        item_id: ItemId,
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    SessionStateChanged {
        item_id: ItemId,
        session_id: Uuid,
        state: String,
        loop_count: u32,
        timestamp: DateTime<Utc>,
    },

    SessionEnded {
        item_id: ItemId,
        session_id: Uuid,
        state: String,
        reason: String,
        loop_count: u32,
        anomaly: bool,
        timestamp: DateTime<Utc>,
    },

    /// An activation entity was refused by the allow-list.
    ActivationRejected {
        item_id: ItemId,
        entity: EntityRef,
        timestamp: DateTime<Utc>,
    },
}

impl AlarmEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AlarmEvent::ItemCreated { timestamp, .. }
            | AlarmEvent::ItemUpdated { timestamp, .. }
            | AlarmEvent::ItemDeleted { timestamp, .. }
            | AlarmEvent::ItemSnoozed { timestamp, .. }
            | AlarmEvent::ItemExpired { timestamp, .. }
            | AlarmEvent::FireMissed { timestamp, .. }
            | AlarmEvent::PersistenceDeferred { timestamp, .. }
            | AlarmEvent::ItemFired { timestamp, .. }
            | AlarmEvent::FireSkipped { timestamp, .. }
            | AlarmEvent::SessionStateChanged { timestamp, .. }
            | AlarmEvent::SessionEnded { timestamp, .. }
            | AlarmEvent::ActivationRejected { timestamp, .. } => *timestamp,
        }
    }

    pub fn item_id(&self) -> &ItemId {
        match self {
            AlarmEvent::ItemCreated { item_id, .. }
            | AlarmEvent::ItemUpdated { item_id, .. }
            | AlarmEvent::ItemDeleted { item_id, .. }
            | AlarmEvent::ItemSnoozed { item_id, .. }
            | AlarmEvent::ItemExpired { item_id, .. }
            | AlarmEvent::FireMissed { item_id, .. }
            | AlarmEvent::PersistenceDeferred { item_id, .. }
            | AlarmEvent::ItemFired { item_id, .. }
            | AlarmEvent::FireSkipped { item_id, .. }
            | AlarmEvent::SessionStateChanged { item_id, .. }
            | AlarmEvent::SessionEnded { item_id, .. }
            | AlarmEvent::ActivationRejected { item_id, .. } => item_id,
        }
    }

    /// Event name used as the SSE event type.
    pub fn event_name(&self) -> &'static str {
        match self {
            AlarmEvent::ItemCreated { .. } => "item_created",
            AlarmEvent::ItemUpdated { .. } => "item_updated",
            AlarmEvent::ItemDeleted { .. } => "item_deleted",
            AlarmEvent::ItemSnoozed { .. } => "item_snoozed",
            AlarmEvent::ItemExpired { .. } => "item_expired",
            AlarmEvent::FireMissed { .. } => "fire_missed",
            AlarmEvent::PersistenceDeferred { .. } => "persistence_deferred",
            AlarmEvent::ItemFired { .. } => "item_fired",
            AlarmEvent::FireSkipped { .. } => "fire_skipped",
            AlarmEvent::SessionStateChanged { .. } => "session_state_changed",
            AlarmEvent::SessionEnded { .. } => "session_ended",
            AlarmEvent::ActivationRejected { .. } => "activation_rejected",
        }
    }
}
