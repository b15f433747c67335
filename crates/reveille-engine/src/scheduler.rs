//! Trigger scheduler.
//!
//! A single timing loop fires every due item. It sleeps until the earliest
//! due time, never longer than `max_sleep`, and wakes early when the
//! schedule changes or on shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{error, info, warn};

use reveille_core::clock::Clock;
use reveille_core::config::SchedulerConfig;
use reveille_core::events::AlarmEvent;
use reveille_core::pattern::next_fire;
use reveille_core::types::{AlarmItem, ItemId, ItemStatus};

use crate::bus::EventBus;
use crate::orchestrator::{FireOutcome, PlaybackOrchestrator};
use crate::store::ScheduleStore;

/// What one scheduler pass did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    pub fired: Vec<ItemId>,
    pub missed: Vec<ItemId>,
    pub next_wake: Option<DateTime<Utc>>,
}

pub struct TriggerScheduler {
    store: Arc<ScheduleStore>,
    orchestrator: Arc<PlaybackOrchestrator>,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    config: SchedulerConfig,
    shutdown: Arc<Notify>,
}

impl TriggerScheduler {
    pub fn new(
        store: Arc<ScheduleStore>,
        orchestrator: Arc<PlaybackOrchestrator>,
        clock: Arc<dyn Clock>,
        bus: EventBus,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            clock,
            bus,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Fire everything that is due now.
    pub fn tick(&self) -> TickReport {
        let now = self.clock.now();
        let pending = self.store.flush_pending();
        if pending > 0 {
            warn!(pending, "Item writes still queued");
        }

        let grace = chrono::Duration::seconds(self.config.overdue_grace_secs as i64);
        let mut report = TickReport::default();
        for item in self.store.due_items(now) {
            let Some(due) = item.due_at() else { continue };
            if now - due > grace {
                self.mark_missed(&item, due, now);
                report.missed.push(item.id.clone());
            } else if self.fire(&item, now) {
                report.fired.push(item.id.clone());
            }
        }
        report.next_wake = self.store.next_due();
        report
    }

    fn fire(&self, item: &AlarmItem, now: DateTime<Utc>) -> bool {
        let recorded = self.store.record(&item.id, |it| {
            it.last_fired = Some(now);
            it.snoozed_until = None;
            // A snooze fire leaves a future pattern occurrence alone; any
            // occurrence that passed while snoozed is consumed.
            if it.next_fire.map_or(true, |at| at <= now) {
                it.next_fire = advance(it, now);
            }
            it.status = ItemStatus::Active;
        });

        let updated = match recorded {
            Ok(updated) => updated,
            Err(e) => {
                warn!(item_id = %item.id, error = %e, "Due item vanished before firing");
                return false;
            }
        };

        match self.orchestrator.fire(updated) {
            FireOutcome::Started(_) => true,
            FireOutcome::AlreadyActive(_) => false,
        }
    }

    fn mark_missed(&self, item: &AlarmItem, due: DateTime<Utc>, now: DateTime<Utc>) {
        warn!(item_id = %item.id, due = %due, "Fire overdue past grace window; not played");
        let result = self.store.record(&item.id, |it| {
            it.snoozed_until = None;
            if it.pattern.is_recurring() {
                it.next_fire = advance(it, now);
                it.status = ItemStatus::Scheduled;
            } else {
                it.next_fire = None;
                it.enabled = false;
                it.status = ItemStatus::Missed;
            }
        });
        if result.is_ok() {
            self.bus.publish(AlarmEvent::FireMissed {
                item_id: item.id.clone(),
                due,
                timestamp: now,
            });
        }
    }

    /// Run until `shutdown` is called.
    pub async fn run(&self) {
        info!("Trigger scheduler started");
        let mut changes = self.store.subscribe();
        loop {
            // Mark changes seen before scanning so one landing mid-tick
            // still wakes the loop.
            changes.borrow_and_update();
            let report = self.tick();

            let delay = self.sleep_for(report.next_wake);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = changes.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("Trigger scheduler stopped");
                    return;
                }
            }
        }
    }

    fn sleep_for(&self, next_wake: Option<DateTime<Utc>>) -> Duration {
        let max = self.config.max_sleep();
        let until_due = next_wake
            .map(|at| (at - self.clock.now()).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(max);
        let delay = until_due.min(max);
        // Queued writes are retried on the next tick.
        if self.store.pending_writes() > 0 {
            return delay.min(Duration::from_secs(5));
        }
        delay
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

/// Next pattern occurrence strictly after `now`, or `None` when a one-shot
/// item has no further occurrence.
pub(crate) fn advance(item: &AlarmItem, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match next_fire(&item.pattern, item.time_of_day, item.timezone, now) {
        Ok(next) => next.instant(),
        Err(e) => {
            error!(item_id = %item.id, error = %e, "Stored pattern is invalid; item disarmed");
            None
        }
    }
}
