//! Command surface.
//!
//! `AlarmService` validates and applies user commands. Each command either
//! returns the updated item(s) or a typed error and leaves the schedule
//! unchanged.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use reveille_core::clock::Clock;
use reveille_core::config::ReveilleConfig;
use reveille_core::events::AlarmEvent;
use reveille_core::pattern::{next_fire, resolve_local, NextFire, RepeatPattern};
use reveille_core::types::{
    AlarmItem, Announcement, AnnouncementStep, DeviceRef, EntityRef, ItemId, ItemKind,
    ItemStatus, NotifyTarget, StepConfig,
};

use crate::activator::EntityActivator;
use crate::announcement::slugify;
use crate::bus::EventBus;
use crate::error::EngineError;
use crate::notifier::NotificationAction;
use crate::orchestrator::PlaybackOrchestrator;
use crate::session::{SessionSnapshot, StopReason};
use crate::snapshot::{ItemSnapshot, ScheduleSnapshot};
use crate::snooze::SnoozeManager;
use crate::store::ScheduleStore;

// =============================================================================
// Requests
// =============================================================================

fn default_true() -> bool {
    true
}

/// Request to create an alarm or reminder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewItem {
    pub kind: ItemKind,
    #[serde(default)]
    pub name: Option<String>,
    pub time: NaiveTime,
    /// Date of a one-shot item. Ignored when `pattern` is given.
    #[serde(default)]
    pub date: Option<NaiveDate>,
    /// `None` means once, at the next occurrence of `time`.
    #[serde(default)]
    pub pattern: Option<RepeatPattern>,
    #[serde(default)]
    pub timezone: Option<Tz>,
    #[serde(default)]
    pub device: Option<DeviceRef>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub announcement: Option<Announcement>,
    #[serde(default)]
    pub activation_entities: Vec<EntityRef>,
    /// `0.0..=1.0`, or a percentage up to 100.
    #[serde(default)]
    pub volume: Option<f32>,
    #[serde(default)]
    pub notify: Option<NotifyTarget>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl NewItem {
    pub fn alarm(time: NaiveTime) -> Self {
        Self::new(ItemKind::Alarm, time)
    }

    pub fn reminder(name: impl Into<String>, time: NaiveTime) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(ItemKind::Reminder, time)
        }
    }

    fn new(kind: ItemKind, time: NaiveTime) -> Self {
        Self {
            kind,
            name: None,
            time,
            date: None,
            pattern: None,
            timezone: None,
            device: None,
            message: None,
            announcement: None,
            activation_entities: Vec::new(),
            volume: None,
            notify: None,
            enabled: true,
        }
    }
}

/// Field changes for `edit_item`. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub time: Option<NaiveTime>,
    pub date: Option<NaiveDate>,
    pub pattern: Option<RepeatPattern>,
    pub timezone: Option<Tz>,
    pub device: Option<DeviceRef>,
    pub message: Option<String>,
    pub announcement: Option<Announcement>,
    pub activation_entities: Option<Vec<EntityRef>>,
    pub volume: Option<f32>,
    /// An empty target turns notifications off.
    pub notify: Option<NotifyTarget>,
}

impl ItemPatch {
    fn touches_schedule(&self) -> bool {
        self.time.is_some()
            || self.date.is_some()
            || self.pattern.is_some()
            || self.timezone.is_some()
    }

    /// Copy the given fields onto `item`. `volume` is already normalized.
    fn apply(&self, item: &mut AlarmItem, volume: Option<f32>) {
        if let Some(name) = &self.name {
            let name = name.trim();
            item.name = (!name.is_empty()).then(|| name.to_string());
        }
        if let Some(tz) = self.timezone {
            item.timezone = tz;
        }
        if let Some(time) = self.time {
            item.time_of_day = time;
        }
        if let Some(pattern) = &self.pattern {
            item.pattern = pattern.clone();
        } else if let Some(date) = self.date {
            item.pattern = RepeatPattern::Once { date };
        }
        if let Some(device) = &self.device {
            item.device = device.clone();
        }
        if let Some(announcement) = &self.announcement {
            item.announcement = announcement.clone();
        }
        if let Some(text) = &self.message {
            set_message(&mut item.announcement, text);
        }
        if let Some(entities) = &self.activation_entities {
            item.activation_entities = entities.clone();
        }
        if volume.is_some() {
            item.volume = volume;
        }
        if let Some(target) = &self.notify {
            item.notify = (!target.as_str().trim().is_empty()).then(|| target.clone());
        }
    }
}

/// New schedule for `reschedule`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reschedule {
    pub time: NaiveTime,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub pattern: Option<RepeatPattern>,
}

// =============================================================================
// Service
// =============================================================================

pub struct AlarmService {
    store: Arc<ScheduleStore>,
    orchestrator: Arc<PlaybackOrchestrator>,
    snooze: SnoozeManager,
    activator: Arc<EntityActivator>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    config: Arc<ReveilleConfig>,
}

impl AlarmService {
    pub fn new(
        store: Arc<ScheduleStore>,
        orchestrator: Arc<PlaybackOrchestrator>,
        snooze: SnoozeManager,
        activator: Arc<EntityActivator>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        config: Arc<ReveilleConfig>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            snooze,
            activator,
            bus,
            clock,
            config,
        }
    }

    // -------------------------------------------------------------------------
    // Create and modify
    // -------------------------------------------------------------------------

    pub fn set_item(&self, request: NewItem) -> Result<AlarmItem, EngineError> {
        let now = self.clock.now();
        let timezone = match request.timezone {
            Some(tz) => tz,
            None => self.default_zone()?,
        };
        let pattern = match request.pattern {
            Some(pattern) => pattern,
            None => once_pattern(request.date, request.time, timezone, now),
        };
        let device = request
            .device
            .or_else(|| self.config.playback.default_device.clone())
            .ok_or_else(|| {
                EngineError::Validation(
                    "no device given and no default device configured".to_string(),
                )
            })?;
        let announcement = request
            .announcement
            .unwrap_or_else(|| Announcement::standard(request.message.as_deref()));
        let name = request
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        let mut item = AlarmItem {
            id: ItemId::new(""),
            kind: request.kind,
            name,
            pattern,
            time_of_day: request.time,
            timezone,
            enabled: request.enabled,
            device,
            announcement,
            activation_entities: request.activation_entities,
            volume: normalize_volume(request.volume)?,
            notify: request.notify.filter(|t| !t.as_str().trim().is_empty()),
            snoozed_until: None,
            last_fired: None,
            next_fire: None,
            status: if request.enabled {
                ItemStatus::Scheduled
            } else {
                ItemStatus::Disabled
            },
            created_at: now,
        };
        self.validate(&item, &self.reminder_slugs(None))?;
        item.next_fire = Some(self.first_fire(&item, now)?);
        item.id = self.allocate_id(&item)?;

        let item = self.store.insert(item)?;
        info!(
            item_id = %item.id,
            kind = %item.kind,
            pattern = %item.pattern,
            next_fire = ?item.next_fire,
            "Item created"
        );
        self.bus.publish(AlarmEvent::ItemCreated {
            item_id: item.id.clone(),
            kind: item.kind,
            timestamp: now,
        });
        Ok(item)
    }

    /// Apply `patch` to the stored item. Runtime fields the scheduler
    /// owns are left as the store has them.
    pub fn edit_item(&self, id: &ItemId, patch: ItemPatch) -> Result<AlarmItem, EngineError> {
        let now = self.clock.now();
        let volume = normalize_volume(patch.volume)?;
        let taken = self.reminder_slugs(Some(id));

        let updated = self.store.update(id, |item| {
            patch.apply(item, volume);
            self.validate(item, &taken)?;
            if patch.touches_schedule() {
                item.next_fire = Some(self.first_fire(item, now)?);
                item.snoozed_until = None;
                if item.status == ItemStatus::Snoozed {
                    item.status = ItemStatus::Scheduled;
                }
            }
            Ok(())
        })?;
        info!(item_id = %id, "Item edited");
        self.publish_updated(id);
        Ok(updated)
    }

    /// Move an item to a new time and pattern. Re-arms the item.
    pub fn reschedule(&self, id: &ItemId, request: Reschedule) -> Result<AlarmItem, EngineError> {
        let now = self.clock.now();
        let current = self.store.get(id)?;
        let pattern = match request.pattern {
            Some(pattern) => pattern,
            None => once_pattern(request.date, request.time, current.timezone, now),
        };
        pattern.validate()?;

        let mut edited = current.clone();
        edited.pattern = pattern;
        edited.time_of_day = request.time;
        let at = self.first_fire(&edited, now)?;
        let live = self.orchestrator.is_live(id);

        let updated = self.store.update(id, |item| {
            item.pattern = edited.pattern;
            item.time_of_day = edited.time_of_day;
            item.next_fire = Some(at);
            item.snoozed_until = None;
            item.enabled = true;
            if !live {
                item.status = ItemStatus::Scheduled;
            }
            Ok(())
        })?;
        info!(item_id = %id, next_fire = %at, "Item rescheduled");
        self.publish_updated(id);
        Ok(updated)
    }

    /// Snooze for `minutes`, or the configured default.
    pub async fn snooze(&self, id: &ItemId, minutes: Option<u32>) -> Result<AlarmItem, EngineError> {
        let duration = minutes.map(|m| Duration::minutes(i64::from(m)));
        self.snooze.snooze(id, duration).await?;
        self.store.get(id)
    }

    /// Handle a Stop or Snooze button pressed on a fire notification.
    pub async fn notification_action(
        &self,
        id: &ItemId,
        action: NotificationAction,
    ) -> Result<AlarmItem, EngineError> {
        info!(item_id = %id, action = %action, "Notification action");
        match action {
            NotificationAction::Stop => self.stop(id).await,
            NotificationAction::Snooze => self.snooze(id, None).await,
        }
    }

    pub async fn set_enabled(&self, id: &ItemId, enabled: bool) -> Result<AlarmItem, EngineError> {
        let current = self.store.get(id)?;
        if current.enabled == enabled {
            return Ok(current);
        }

        let updated = if enabled {
            let now = self.clock.now();
            let at = match next_fire(&current.pattern, current.time_of_day, current.timezone, now)? {
                NextFire::At(at) => at,
                NextFire::Expired => {
                    return Err(EngineError::InvalidState(format!(
                        "{} has no future occurrence; reschedule it instead",
                        id
                    )))
                }
            };
            self.store.update(id, |item| {
                item.enabled = true;
                item.next_fire = Some(at);
                item.snoozed_until = None;
                item.status = ItemStatus::Scheduled;
                Ok(())
            })?
        } else {
            self.orchestrator.stop(id, StopReason::Disabled).await;
            self.store.update(id, |item| {
                item.enabled = false;
                item.snoozed_until = None;
                if item.status != ItemStatus::Expired && item.status != ItemStatus::Missed {
                    item.status = ItemStatus::Disabled;
                }
                Ok(())
            })?
        };

        info!(item_id = %id, enabled, "Item enabled flag changed");
        self.publish_updated(id);
        Ok(updated)
    }

    // -------------------------------------------------------------------------
    // Stop and delete
    // -------------------------------------------------------------------------

    /// Stop the item's live session. Stopping an item that is not sounding
    /// changes nothing.
    pub async fn stop(&self, id: &ItemId) -> Result<AlarmItem, EngineError> {
        self.store.get(id)?;
        if self.orchestrator.is_live(id) {
            self.orchestrator.stop(id, StopReason::Command).await;
        }
        self.store.get(id)
    }

    /// Stop every sounding item, optionally of one kind.
    pub async fn stop_all(&self, kind: Option<ItemKind>) -> Vec<AlarmItem> {
        let mut stopped = Vec::new();
        for session in self.orchestrator.live_sessions() {
            let Ok(item) = self.store.get(&session.item_id) else {
                continue;
            };
            if kind.is_some_and(|k| k != item.kind) {
                continue;
            }
            self.orchestrator.stop(&item.id, StopReason::Command).await;
            if let Ok(item) = self.store.get(&item.id) {
                stopped.push(item);
            }
        }
        info!(count = stopped.len(), "Stopped all sounding items");
        stopped
    }

    pub async fn delete(&self, id: &ItemId) -> Result<AlarmItem, EngineError> {
        self.store.get(id)?;
        if self.orchestrator.is_live(id) {
            self.orchestrator.stop(id, StopReason::Deleted).await;
        }
        let removed = self.store.remove(id)?;
        self.orchestrator.forget(id);

        info!(item_id = %id, "Item deleted");
        self.bus.publish(AlarmEvent::ItemDeleted {
            item_id: id.clone(),
            timestamp: self.clock.now(),
        });
        Ok(removed)
    }

    /// Delete every item, optionally of one kind. Stops at the first
    /// failure; items deleted before it stay deleted.
    pub async fn delete_all(&self, kind: Option<ItemKind>) -> Result<Vec<AlarmItem>, EngineError> {
        let mut removed = Vec::new();
        for item in self.store.list(kind) {
            removed.push(self.delete(&item.id).await?);
        }
        Ok(removed)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn list_items(&self, kind: Option<ItemKind>) -> Vec<AlarmItem> {
        self.store.list(kind)
    }

    pub fn get_item(&self, id: &ItemId) -> Result<AlarmItem, EngineError> {
        self.store.get(id)
    }

    pub fn session(&self, id: &ItemId) -> Option<SessionSnapshot> {
        self.orchestrator.session(id)
    }

    pub fn snapshot(&self) -> ScheduleSnapshot {
        let items = self
            .store
            .snapshot()
            .iter()
            .map(|item| ItemSnapshot::new(item, self.orchestrator.session(&item.id)))
            .collect();
        ScheduleSnapshot::new(self.clock.now(), items)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<AlarmEvent> {
        self.bus.subscribe()
    }

    // -------------------------------------------------------------------------
    // Validation and ids
    // -------------------------------------------------------------------------

    fn default_zone(&self) -> Result<Tz, EngineError> {
        self.config
            .general
            .zone()
            .map_err(|e| EngineError::Validation(e.to_string()))
    }

    /// Name slugs of every reminder except `except`.
    fn reminder_slugs(&self, except: Option<&ItemId>) -> HashSet<String> {
        self.store
            .list(Some(ItemKind::Reminder))
            .into_iter()
            .filter(|other| Some(&other.id) != except)
            .filter_map(|other| other.name.as_deref().map(slugify))
            .collect()
    }

    /// Checks shared by create and edit. `taken` holds the reminder name
    /// slugs already in use. Does not touch the store, so it can run
    /// inside a store update.
    fn validate(&self, item: &AlarmItem, taken: &HashSet<String>) -> Result<(), EngineError> {
        item.pattern.validate()?;

        let steps = item.announcement.enabled_steps();
        if steps.is_empty() {
            return Err(EngineError::Validation(
                "announcement has no enabled steps".to_string(),
            ));
        }

        let family = self.config.device_family(&item.device);
        if item.kind == ItemKind::Reminder {
            if item.name.is_none() {
                return Err(EngineError::Validation("reminders need a name".to_string()));
            }
            if !family.supports_speech() {
                return Err(EngineError::Validation(format!(
                    "{} is a media-only device and cannot play reminders",
                    item.device
                )));
            }
            if !item.announcement.has_spoken() {
                return Err(EngineError::Validation(
                    "reminders need at least one spoken step".to_string(),
                ));
            }
            check_reminder_name(item, taken)?;
        } else if !family.supports_speech() && !item.announcement.has_media() {
            return Err(EngineError::Validation(format!(
                "{} is a media-only device and the announcement has no media step",
                item.device
            )));
        }

        if let Err(e) = self.activator.check(&item.activation_entities) {
            warn!(error = %e, "Activation entity rejected");
            return Err(e);
        }
        Ok(())
    }

    fn first_fire(&self, item: &AlarmItem, now: DateTime<Utc>) -> Result<DateTime<Utc>, EngineError> {
        match next_fire(&item.pattern, item.time_of_day, item.timezone, now)? {
            NextFire::At(at) => Ok(at),
            NextFire::Expired => Err(EngineError::Validation(format!(
                "{} is in the past",
                item.pattern
            ))),
        }
    }

    fn allocate_id(&self, item: &AlarmItem) -> Result<ItemId, EngineError> {
        let slug = item.name.as_deref().map(slugify).unwrap_or_default();
        match item.kind {
            ItemKind::Reminder => {
                let id = ItemId::new(slug);
                if self.store.contains(&id) {
                    return Err(EngineError::Validation(format!("id {} is already taken", id)));
                }
                Ok(id)
            }
            ItemKind::Alarm if slug.is_empty() => Ok((1..)
                .map(|n| ItemId::new(format!("alarm_{}", n)))
                .find(|id| !self.store.contains(id))
                .unwrap_or_else(|| ItemId::new(uuid::Uuid::new_v4().to_string()))),
            ItemKind::Alarm => {
                let base = ItemId::new(slug.clone());
                if !self.store.contains(&base) {
                    return Ok(base);
                }
                Ok((2..)
                    .map(|n| ItemId::new(format!("{}_{}", slug, n)))
                    .find(|id| !self.store.contains(id))
                    .unwrap_or_else(|| ItemId::new(uuid::Uuid::new_v4().to_string())))
            }
        }
    }

    fn publish_updated(&self, id: &ItemId) {
        self.bus.publish(AlarmEvent::ItemUpdated {
            item_id: id.clone(),
            timestamp: self.clock.now(),
        });
    }
}

fn check_reminder_name(item: &AlarmItem, taken: &HashSet<String>) -> Result<(), EngineError> {
    let slug = item.name.as_deref().map(slugify).unwrap_or_default();
    if slug.is_empty() {
        return Err(EngineError::Validation(
            "reminder name must contain letters or digits".to_string(),
        ));
    }
    if taken.contains(&slug) {
        return Err(EngineError::Validation(format!(
            "a reminder named {:?} already exists",
            item.name.as_deref().unwrap_or_default()
        )));
    }
    Ok(())
}

/// One-shot pattern for `time`: on `date` when given, otherwise today if
/// the slot is still ahead, else tomorrow.
fn once_pattern(
    date: Option<NaiveDate>,
    time: NaiveTime,
    zone: Tz,
    now: DateTime<Utc>,
) -> RepeatPattern {
    let date = date.unwrap_or_else(|| {
        let today = now.with_timezone(&zone).date_naive();
        if resolve_local(zone, today.and_time(time)) > now {
            today
        } else {
            today.succ_opt().unwrap_or(today)
        }
    });
    RepeatPattern::Once { date }
}

fn normalize_volume(volume: Option<f32>) -> Result<Option<f32>, EngineError> {
    match volume {
        None => Ok(None),
        Some(v) if (0.0..=1.0).contains(&v) => Ok(Some(v)),
        Some(v) if v > 1.0 && v <= 100.0 => Ok(Some(v / 100.0)),
        Some(v) => Err(EngineError::Validation(format!(
            "volume {} is outside 0..=100",
            v
        ))),
    }
}

/// Replace the message step's text, or add one ahead of the media step.
fn set_message(announcement: &mut Announcement, text: &str) {
    let text = text.trim();
    let existing = announcement
        .steps
        .iter()
        .position(|s| matches!(s.step, AnnouncementStep::Message { .. }));
    match existing {
        Some(index) if text.is_empty() => {
            announcement.steps.remove(index);
        }
        Some(index) => {
            announcement.steps[index].step = AnnouncementStep::Message {
                text: text.to_string(),
            };
        }
        None if text.is_empty() => {}
        None => {
            let at = announcement
                .steps
                .iter()
                .position(|s| s.step.is_media())
                .unwrap_or(announcement.steps.len());
            announcement.steps.insert(
                at,
                StepConfig::enabled(AnnouncementStep::Message {
                    text: text.to_string(),
                }),
            );
        }
    }
}
