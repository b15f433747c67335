//! Snooze handling.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use reveille_core::clock::Clock;
use reveille_core::config::SnoozeConfig;
use reveille_core::events::AlarmEvent;
use reveille_core::types::{ItemId, ItemStatus};

use crate::bus::EventBus;
use crate::error::EngineError;
use crate::orchestrator::PlaybackOrchestrator;
use crate::scheduler::advance;
use crate::session::StopReason;
use crate::store::ScheduleStore;

pub struct SnoozeManager {
    store: Arc<ScheduleStore>,
    orchestrator: Arc<PlaybackOrchestrator>,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    config: SnoozeConfig,
}

impl SnoozeManager {
    pub fn new(
        store: Arc<ScheduleStore>,
        orchestrator: Arc<PlaybackOrchestrator>,
        clock: Arc<dyn Clock>,
        bus: EventBus,
        config: SnoozeConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            clock,
            bus,
            config,
        }
    }

    pub fn default_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.config.default_minutes))
    }

    fn prefire_window(&self) -> Duration {
        Duration::seconds(self.config.prefire_window_secs as i64)
    }

    /// Snooze a sounding item, or one about to fire, for `duration`
    /// (the configured default when `None`). Returns the new due time.
    pub async fn snooze(
        &self,
        id: &ItemId,
        duration: Option<Duration>,
    ) -> Result<DateTime<Utc>, EngineError> {
        let item = self.store.get(id)?;
        let duration = duration.unwrap_or_else(|| self.default_duration());
        if duration <= Duration::zero() {
            return Err(EngineError::Validation(
                "snooze duration must be positive".to_string(),
            ));
        }

        let now = self.clock.now();
        let live = self
            .orchestrator
            .session(id)
            .is_some_and(|s| s.state.is_live());
        let imminent = item
            .due_at()
            .filter(|due| *due > now && *due - now <= self.prefire_window());

        if !live && imminent.is_none() {
            return Err(EngineError::InvalidState(format!(
                "{} is neither sounding nor about to fire",
                id
            )));
        }

        if live {
            self.orchestrator.stop(id, StopReason::Snoozed).await;
        }

        let until = self.clock.now() + duration;
        self.store.update(id, |it| {
            // Snoozing ahead of a pattern fire skips that occurrence.
            if !live {
                if let Some(due) = it.next_fire.filter(|at| Some(*at) == imminent) {
                    it.next_fire = advance(it, due);
                }
            }
            it.snoozed_until = Some(until);
            it.status = ItemStatus::Snoozed;
            Ok(())
        })?;

        info!(item_id = %id, until = %until, prefire = !live, "Item snoozed");
        self.bus.publish(AlarmEvent::ItemSnoozed {
            item_id: id.clone(),
            until,
            timestamp: self.clock.now(),
        });
        Ok(until)
    }
}
