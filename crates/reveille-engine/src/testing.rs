//! Shared fixtures for engine unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use reveille_core::clock::{Clock, ManualClock};
use reveille_core::config::ReveilleConfig;
use reveille_core::pattern::RepeatPattern;
use reveille_core::persistence::{ItemPersistence, MemoryPersistence};
use reveille_core::types::{
    AlarmItem, Announcement, DeviceRef, EntityRef, ItemId, ItemKind, ItemStatus, NotifyTarget,
};

use crate::activator::LoggingEntityBackend;
use crate::engine::Engine;
use crate::error::DeviceCommandError;
use crate::notifier::{Notification, Notifier};
use crate::simulated::SimulatedPlayer;

/// 2024-01-`day` `h`:`m` UTC. January 15th 2024 is a Monday.
pub fn utc(day: u32, h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, h, m, 0).unwrap()
}

pub fn alarm(id: &str, pattern: RepeatPattern, next: DateTime<Utc>) -> AlarmItem {
    AlarmItem {
        id: ItemId::new(id),
        kind: ItemKind::Alarm,
        name: None,
        pattern,
        time_of_day: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        timezone: Tz::UTC,
        enabled: true,
        device: DeviceRef::new("media_player.bedroom"),
        announcement: Announcement::standard(None),
        activation_entities: vec![],
        volume: None,
        notify: None,
        snoozed_until: None,
        last_fired: None,
        next_fire: Some(next),
        status: ItemStatus::Scheduled,
        created_at: utc(1, 0, 0),
    }
}

pub fn fast_config() -> ReveilleConfig {
    let mut config = ReveilleConfig::default();
    config.playback.default_device = Some(DeviceRef::new("media_player.bedroom"));
    config.playback.speech_start_timeout_ms = 200;
    config.playback.speech_max_secs = 2;
    config.playback.media_start_timeout_ms = 200;
    config.playback.loop_pause_ms = 20;
    config.playback.command_backoff_ms = 5;
    config.playback.command_timeout_ms = 500;
    config.activation.allowed_entities = vec![EntityRef::new("light.bedroom")];
    config
}

/// Notifier that keeps what it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(NotifyTarget, Notification)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(NotifyTarget, Notification)> {
        self.sent.lock().unwrap().clone()
    }

    /// Wait for at least `count` notifications.
    pub async fn wait_for(&self, count: usize) -> Vec<(NotifyTarget, Notification)> {
        for _ in 0..200 {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} notifications", count);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        target: &NotifyTarget,
        notification: &Notification,
    ) -> Result<(), DeviceCommandError> {
        self.sent
            .lock()
            .unwrap()
            .push((target.clone(), notification.clone()));
        Ok(())
    }
}

pub struct Harness {
    pub engine: Engine,
    pub clock: Arc<ManualClock>,
    pub player: SimulatedPlayer,
    pub persistence: Arc<MemoryPersistence>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new(items: Vec<AlarmItem>, now: DateTime<Utc>) -> Self {
        Self::with_config(items, now, |_| {})
    }

    pub fn with_config(
        items: Vec<AlarmItem>,
        now: DateTime<Utc>,
        adjust: impl FnOnce(&mut ReveilleConfig),
    ) -> Self {
        let mut config = fast_config();
        adjust(&mut config);
        let clock = Arc::new(ManualClock::new(now));
        let player = SimulatedPlayer::with_speech_duration(Duration::from_millis(10));
        let persistence = Arc::new(MemoryPersistence::with_items(items));
        let notifier = Arc::new(RecordingNotifier::default());
        let backing: Arc<dyn ItemPersistence> = persistence.clone();
        let engine = Engine::new(
            config,
            backing,
            Arc::new(player.clone()),
            Arc::new(LoggingEntityBackend),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        )
        .unwrap();
        Self {
            engine,
            clock,
            player,
            persistence,
            notifier,
        }
    }

    /// Wait until the item's session is announcing or looping.
    pub async fn wait_live(&self, id: &ItemId) {
        for _ in 0..200 {
            if self
                .engine
                .service()
                .session(id)
                .is_some_and(|s| s.state.is_live())
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session for {} never went live", id);
    }
}
