//! Playback orchestrator.
//!
//! Owns the map from item id to its live session. Each fire spawns one
//! driver task; the map guarantees at most one live session per item.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use reveille_core::clock::Clock;
use reveille_core::config::ReveilleConfig;
use reveille_core::events::AlarmEvent;
use reveille_core::types::{AlarmItem, ItemId, ItemStatus};

use crate::activator::EntityActivator;
use crate::bus::EventBus;
use crate::media::MediaPlayback;
use crate::notifier::Notifier;
use crate::session::driver::SessionDriver;
use crate::session::{PlaybackSession, SessionSnapshot, SessionState, StopReason};
use crate::store::ScheduleStore;

/// Result of handing an item to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Started(Uuid),
    /// The item already had a live session; nothing new was started.
    AlreadyActive(Uuid),
}

struct SessionHandle {
    session_id: Uuid,
    cancel: CancellationToken,
    stop_reason: Arc<Mutex<Option<StopReason>>>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

pub struct PlaybackOrchestrator {
    pub(crate) media: Arc<dyn MediaPlayback>,
    pub(crate) activator: Arc<EntityActivator>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) store: Arc<ScheduleStore>,
    pub(crate) bus: EventBus,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: Arc<ReveilleConfig>,
    live: Mutex<HashMap<ItemId, SessionHandle>>,
    ended: Mutex<HashMap<ItemId, SessionSnapshot>>,
}

impl PlaybackOrchestrator {
    pub fn new(
        media: Arc<dyn MediaPlayback>,
        activator: Arc<EntityActivator>,
        notifier: Arc<dyn Notifier>,
        store: Arc<ScheduleStore>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        config: Arc<ReveilleConfig>,
    ) -> Self {
        Self {
            media,
            activator,
            notifier,
            store,
            bus,
            clock,
            config,
            live: Mutex::new(HashMap::new()),
            ended: Mutex::new(HashMap::new()),
        }
    }

    fn live(&self) -> MutexGuard<'_, HashMap<ItemId, SessionHandle>> {
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ended(&self) -> MutexGuard<'_, HashMap<ItemId, SessionSnapshot>> {
        self.ended.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a session for `item` unless one is already live.
    pub fn fire(self: &Arc<Self>, item: AlarmItem) -> FireOutcome {
        let now = self.clock.now();
        let mut live = self.live();
        if let Some(existing) = live.get(&item.id) {
            info!(
                item_id = %item.id,
                session_id = %existing.session_id,
                "Item already has a live session; fire ignored"
            );
            self.bus.publish(AlarmEvent::FireSkipped {
                item_id: item.id.clone(),
                session_id: existing.session_id,
                timestamp: now,
            });
            return FireOutcome::AlreadyActive(existing.session_id);
        }

        let session = PlaybackSession::new(item.id.clone(), item.device.clone(), now);
        let session_id = session.id();
        let (tx, rx) = watch::channel(session.snapshot());
        let cancel = CancellationToken::new();
        let stop_reason = Arc::new(Mutex::new(None));
        live.insert(
            item.id.clone(),
            SessionHandle {
                session_id,
                cancel: cancel.clone(),
                stop_reason: Arc::clone(&stop_reason),
                snapshot: rx,
            },
        );
        drop(live);
        self.ended().remove(&item.id);

        info!(item_id = %item.id, session_id = %session_id, device = %item.device, "Item fired");
        self.bus.publish(AlarmEvent::ItemFired {
            item_id: item.id.clone(),
            session_id,
            timestamp: now,
        });

        let item_id = item.id.clone();
        let driver = SessionDriver::new(Arc::clone(self), item, session, cancel, stop_reason, tx);
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = tokio::spawn(driver.run()).await {
                error!(item_id = %item_id, session_id = %session_id, error = %e, "Session task failed");
                orchestrator.release(&item_id, session_id, None);
            }
        });

        FireOutcome::Started(session_id)
    }

    /// Latest view of the item's live session, or of its last ended one.
    pub fn session(&self, item_id: &ItemId) -> Option<SessionSnapshot> {
        if let Some(handle) = self.live().get(item_id) {
            return Some(handle.snapshot.borrow().clone());
        }
        self.ended().get(item_id).cloned()
    }

    pub fn live_sessions(&self) -> Vec<SessionSnapshot> {
        self.live()
            .values()
            .map(|h| h.snapshot.borrow().clone())
            .collect()
    }

    pub fn is_live(&self, item_id: &ItemId) -> bool {
        self.live().contains_key(item_id)
    }

    /// Stop the item's session and wait for it to end.
    ///
    /// Returns the terminal state. A session that already ended is left
    /// alone and its terminal state returned; `None` means the item never
    /// had a session.
    pub async fn stop(&self, item_id: &ItemId, reason: StopReason) -> Option<SessionState> {
        let handle = self.live().get(item_id).map(|h| {
            (
                h.session_id,
                h.cancel.clone(),
                Arc::clone(&h.stop_reason),
                h.snapshot.clone(),
            )
        });

        let Some((session_id, cancel, stop_reason, mut snapshot)) = handle else {
            return self.ended().get(item_id).map(|s| s.state);
        };

        {
            let mut slot = stop_reason.lock().unwrap_or_else(|e| e.into_inner());
            slot.get_or_insert(reason);
        }
        info!(item_id = %item_id, session_id = %session_id, reason = %reason, "Stopping session");
        cancel.cancel();

        let wait = self.stop_wait();
        let outcome = tokio::time::timeout(wait, async {
            snapshot
                .wait_for(|s| s.state.is_terminal())
                .await
                .map(|s| s.state)
        })
        .await;

        match outcome {
            Ok(Ok(state)) => Some(state),
            // Driver task is gone without reporting; treat as stopped.
            Ok(Err(_)) => Some(SessionState::Stopped),
            Err(_) => {
                warn!(
                    item_id = %item_id,
                    session_id = %session_id,
                    "Session did not confirm stop in time"
                );
                Some(snapshot.borrow().state)
            }
        }
    }

    /// Stop every live session.
    pub async fn stop_all(&self, reason: StopReason) -> Vec<(ItemId, SessionState)> {
        let ids: Vec<ItemId> = self.live().keys().cloned().collect();
        let mut stopped = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(state) = self.stop(&id, reason).await {
                stopped.push((id, state));
            }
        }
        stopped
    }

    fn stop_wait(&self) -> Duration {
        let playback = &self.config.playback;
        playback.command_timeout() * 2 + playback.speech_start_timeout() + Duration::from_secs(1)
    }

    /// Update the item after its session ended.
    pub(crate) fn record_session_end(&self, item_id: &ItemId, snapshot: &SessionSnapshot) {
        let mut expired = false;
        let result = self.store.record(item_id, |item| {
            let snoozed = snapshot.stop_reason == Some(StopReason::Snoozed);
            let finished = !item.pattern.is_recurring()
                && item.next_fire.is_none()
                && item.snoozed_until.is_none();
            if finished && !snoozed {
                item.enabled = false;
                item.status = ItemStatus::Expired;
                expired = true;
            } else if item.status == ItemStatus::Active {
                item.status = if item.enabled {
                    ItemStatus::Scheduled
                } else {
                    ItemStatus::Disabled
                };
            }
        });
        match result {
            Ok(_) if expired => {
                info!(item_id = %item_id, "One-shot item expired");
                self.bus.publish(AlarmEvent::ItemExpired {
                    item_id: item_id.clone(),
                    timestamp: self.clock.now(),
                });
            }
            Ok(_) => {}
            // Deleted while the session was winding down.
            Err(_) => {}
        }
    }

    /// Drop the live handle of a finished session.
    pub(crate) fn release(
        &self,
        item_id: &ItemId,
        session_id: Uuid,
        last: Option<SessionSnapshot>,
    ) {
        let mut live = self.live();
        if live
            .get(item_id)
            .is_some_and(|h| h.session_id == session_id)
        {
            live.remove(item_id);
        }
        drop(live);
        if let Some(last) = last {
            self.ended().insert(item_id.clone(), last);
        }
    }

    /// Forget everything about an item's sessions.
    pub(crate) fn forget(&self, item_id: &ItemId) {
        self.ended().remove(item_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activator::LoggingEntityBackend;
    use crate::media::{DeviceEvent, PlayerState};
    use crate::simulated::{IssuedCommand, SimulatedPlayer};
    use crate::testing::RecordingNotifier;
    use chrono::{NaiveTime, TimeZone, Utc};
    use chrono_tz::Tz;
    use reveille_core::clock::ManualClock;
    use reveille_core::pattern::RepeatPattern;
    use reveille_core::persistence::MemoryPersistence;
    use reveille_core::types::{
        Announcement, AnnouncementStep, DeviceRef, EntityRef, ItemKind, NotifyTarget,
    };

    struct Fixture {
        orchestrator: Arc<PlaybackOrchestrator>,
        notifier: Arc<RecordingNotifier>,
        player: SimulatedPlayer,
        store: Arc<ScheduleStore>,
    }

    fn fast_config() -> ReveilleConfig {
        let mut config = ReveilleConfig::default();
        config.playback.speech_start_timeout_ms = 200;
        config.playback.speech_max_secs = 2;
        config.playback.media_start_timeout_ms = 200;
        config.playback.loop_pause_ms = 20;
        config.playback.command_backoff_ms = 5;
        config.playback.command_timeout_ms = 500;
        config.activation.allowed_entities = vec![EntityRef::new("light.bedroom")];
        config
    }

    fn item(id: &str, steps: Vec<AnnouncementStep>) -> AlarmItem {
        AlarmItem {
            id: ItemId::new(id),
            kind: ItemKind::Alarm,
            name: Some("Wake".to_string()),
            pattern: RepeatPattern::Daily,
            time_of_day: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            timezone: Tz::UTC,
            enabled: true,
            device: DeviceRef::new("media_player.bedroom"),
            announcement: Announcement::new(steps),
            activation_entities: vec![EntityRef::new("light.bedroom")],
            volume: None,
            notify: None,
            snoozed_until: None,
            last_fired: None,
            next_fire: Some(Utc.with_ymd_and_hms(2024, 1, 16, 7, 0, 0).unwrap()),
            status: ItemStatus::Active,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn fixture(config: ReveilleConfig, items: Vec<AlarmItem>) -> Fixture {
        let config = Arc::new(config);
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 7, 0, 0).unwrap(),
        ));
        let bus = EventBus::default();
        let store = Arc::new(
            ScheduleStore::load(
                Arc::new(MemoryPersistence::with_items(items)),
                bus.clone(),
                Arc::clone(&clock),
            )
            .unwrap(),
        );
        let player = SimulatedPlayer::with_speech_duration(Duration::from_millis(10));
        let notifier = Arc::new(RecordingNotifier::default());
        let activator = Arc::new(EntityActivator::new(
            config.activation.allowed_entities.clone(),
            Arc::new(LoggingEntityBackend),
            Duration::from_secs(1),
        ));
        let orchestrator = Arc::new(PlaybackOrchestrator::new(
            Arc::new(player.clone()),
            activator,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            Arc::clone(&store),
            bus,
            clock,
            config,
        ));
        Fixture {
            orchestrator,
            notifier,
            player,
            store,
        }
    }

    async fn wait_for_state(
        orchestrator: &PlaybackOrchestrator,
        id: &ItemId,
        check: impl Fn(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        for _ in 0..200 {
            if let Some(s) = orchestrator.session(id) {
                if check(&s) {
                    return s;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session for {} never reached expected state", id);
    }

    fn media_sequence() -> Vec<AnnouncementStep> {
        vec![
            AnnouncementStep::Name,
            AnnouncementStep::Message {
                text: "Stand up".to_string(),
            },
            AnnouncementStep::Media { media: None },
        ]
    }

    // =====================================================================
    // Loop detection
    // =====================================================================

    #[tokio::test]
    async fn test_restarts_keep_looping_until_idle() {
        let alarm = item("alarm_1", media_sequence());
        let f = fixture(fast_config(), vec![alarm.clone()]);
        let device = alarm.device.clone();

        assert!(matches!(f.orchestrator.fire(alarm.clone()), FireOutcome::Started(_)));
        wait_for_state(&f.orchestrator, &alarm.id, |s| s.state == SessionState::Looping).await;

        for expected in 1..=3 {
            f.player.inject(DeviceEvent::new(
                device.clone(),
                Some(PlayerState::Playing),
                PlayerState::Playing,
            ));
            let s = wait_for_state(&f.orchestrator, &alarm.id, |s| s.loop_count == expected).await;
            assert_eq!(s.state, SessionState::Looping);
        }

        f.player.inject(DeviceEvent::new(
            device.clone(),
            Some(PlayerState::Playing),
            PlayerState::Idle,
        ));
        let end = wait_for_state(&f.orchestrator, &alarm.id, |s| s.state.is_terminal()).await;
        assert_eq!(end.state, SessionState::Stopped);
        assert_eq!(end.stop_reason, Some(StopReason::UserStop));
        assert_eq!(end.loop_count, 3);
        assert!(!end.anomaly);
        assert!(!f.orchestrator.is_live(&alarm.id));

        let spoken: Vec<_> = f
            .player
            .commands()
            .into_iter()
            .filter_map(|c| match c {
                IssuedCommand::Speak { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(spoken, vec!["Wake alarm.", "Stand up"]);
    }

    #[tokio::test]
    async fn test_natural_end_replays_sequence() {
        let alarm = item("alarm_1", media_sequence());
        let f = fixture(fast_config(), vec![alarm.clone()]);

        f.orchestrator.fire(alarm.clone());
        wait_for_state(&f.orchestrator, &alarm.id, |s| s.state == SessionState::Looping).await;

        f.player.inject(
            DeviceEvent::new(alarm.device.clone(), Some(PlayerState::Playing), PlayerState::Idle)
                .with_idle_reason(crate::media::IdleReason::Finished),
        );
        wait_for_state(&f.orchestrator, &alarm.id, |s| {
            s.loop_count == 1 && s.state == SessionState::Looping
        })
        .await;

        let plays = f
            .player
            .commands()
            .iter()
            .filter(|c| matches!(c, IssuedCommand::Play { .. }))
            .count();
        assert_eq!(plays, 2);

        f.orchestrator.stop(&alarm.id, StopReason::Command).await;
    }

    // =====================================================================
    // Session ownership and stop
    // =====================================================================

    #[tokio::test]
    async fn test_second_fire_is_a_noop() {
        let alarm = item("alarm_1", media_sequence());
        let f = fixture(fast_config(), vec![alarm.clone()]);

        let first = f.orchestrator.fire(alarm.clone());
        let second = f.orchestrator.fire(alarm.clone());
        let FireOutcome::Started(id) = first else {
            panic!("first fire should start a session");
        };
        assert_eq!(second, FireOutcome::AlreadyActive(id));
        assert_eq!(f.orchestrator.live_sessions().len(), 1);

        f.orchestrator.stop(&alarm.id, StopReason::Command).await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let alarm = item("alarm_1", media_sequence());
        let f = fixture(fast_config(), vec![alarm.clone()]);

        assert_eq!(f.orchestrator.stop(&alarm.id, StopReason::Command).await, None);

        f.orchestrator.fire(alarm.clone());
        wait_for_state(&f.orchestrator, &alarm.id, |s| s.state.is_live()).await;

        let first = f.orchestrator.stop(&alarm.id, StopReason::Command).await;
        assert_eq!(first, Some(SessionState::Stopped));
        let second = f.orchestrator.stop(&alarm.id, StopReason::Command).await;
        assert_eq!(second, Some(SessionState::Stopped));

        let last = f.orchestrator.session(&alarm.id).unwrap();
        assert_eq!(last.stop_reason, Some(StopReason::Command));
        assert!(f
            .player
            .commands()
            .iter()
            .any(|c| matches!(c, IssuedCommand::Stop { .. })));
        assert_eq!(
            f.store.get(&alarm.id).unwrap().status,
            ItemStatus::Scheduled
        );
    }

    #[tokio::test]
    async fn test_device_failure_ends_with_anomaly() {
        let alarm = item("alarm_1", media_sequence());
        let f = fixture(fast_config(), vec![alarm.clone()]);
        // Initial attempt plus three retries.
        f.player.fail_next(4);

        f.orchestrator.fire(alarm.clone());
        let end = wait_for_state(&f.orchestrator, &alarm.id, |s| s.state.is_terminal()).await;
        assert_eq!(end.state, SessionState::Stopped);
        assert_eq!(end.stop_reason, Some(StopReason::DeviceFailure));
        assert!(end.anomaly);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let alarm = item("alarm_1", media_sequence());
        let f = fixture(fast_config(), vec![alarm.clone()]);
        f.player.fail_next(2);

        f.orchestrator.fire(alarm.clone());
        let s = wait_for_state(&f.orchestrator, &alarm.id, |s| s.state == SessionState::Looping).await;
        assert!(!s.anomaly);
        f.orchestrator.stop(&alarm.id, StopReason::Command).await;
    }

    #[tokio::test]
    async fn test_loop_budget_expires_session() {
        let mut config = fast_config();
        config.playback.max_loops = 2;
        let alarm = item("alarm_1", media_sequence());
        let f = fixture(config, vec![alarm.clone()]);

        f.orchestrator.fire(alarm.clone());
        wait_for_state(&f.orchestrator, &alarm.id, |s| s.state == SessionState::Looping).await;
        for _ in 0..2 {
            f.player.inject(DeviceEvent::new(
                alarm.device.clone(),
                Some(PlayerState::Playing),
                PlayerState::Playing,
            ));
        }
        let end = wait_for_state(&f.orchestrator, &alarm.id, |s| s.state.is_terminal()).await;
        assert_eq!(end.state, SessionState::ExpiredLoop);
        assert!(end.anomaly);
    }

    #[tokio::test]
    async fn test_speech_only_sequence_loops_last_step() {
        let alarm = item(
            "alarm_1",
            vec![
                AnnouncementStep::Name,
                AnnouncementStep::Message {
                    text: "Bins".to_string(),
                },
            ],
        );
        let f = fixture(fast_config(), vec![alarm.clone()]);

        f.orchestrator.fire(alarm.clone());
        wait_for_state(&f.orchestrator, &alarm.id, |s| s.loop_count >= 2).await;
        f.orchestrator.stop(&alarm.id, StopReason::Command).await;

        let spoken: Vec<_> = f
            .player
            .commands()
            .into_iter()
            .filter_map(|c| match c {
                IssuedCommand::Speak { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(spoken[0], "Wake alarm.");
        assert!(spoken[1..].iter().all(|t| t == "Bins"));
        assert!(spoken.len() >= 3);
    }

    #[tokio::test]
    async fn test_once_item_expires_after_session() {
        let mut alarm = item("alarm_1", media_sequence());
        alarm.pattern = RepeatPattern::Once {
            date: chrono::NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
        };
        alarm.next_fire = None;
        let f = fixture(fast_config(), vec![alarm.clone()]);
        let mut events = f.orchestrator.bus.subscribe();

        f.orchestrator.fire(alarm.clone());
        wait_for_state(&f.orchestrator, &alarm.id, |s| s.state.is_live()).await;
        f.orchestrator.stop(&alarm.id, StopReason::Command).await;

        let stored = f.store.get(&alarm.id).unwrap();
        assert_eq!(stored.status, ItemStatus::Expired);
        assert!(!stored.enabled);

        let mut saw_expired = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, AlarmEvent::ItemExpired { .. }) {
                saw_expired = true;
            }
        }
        assert!(saw_expired);
    }

    // =====================================================================
    // Device and session limits
    // =====================================================================

    #[tokio::test]
    async fn test_untagged_device_plays_through_speech_to_media() {
        let alarm = item("alarm_1", media_sequence());
        let f = fixture(fast_config(), vec![alarm.clone()]);
        f.player.set_untagged(true);

        f.orchestrator.fire(alarm.clone());
        let s = wait_for_state(&f.orchestrator, &alarm.id, |s| {
            s.state == SessionState::Looping || s.state.is_terminal()
        })
        .await;
        assert_eq!(s.state, SessionState::Looping);
        assert_eq!(s.stop_reason, None);

        let commands = f.player.commands();
        let spoken: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                IssuedCommand::Speak { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(spoken, vec!["Wake alarm.", "Stand up"]);
        assert!(commands.iter().any(|c| matches!(c, IssuedCommand::Play { .. })));

        f.orchestrator.stop(&alarm.id, StopReason::Command).await;
    }

    #[tokio::test]
    async fn test_session_duration_limit_expires_session() {
        let mut config = fast_config();
        config.playback.max_session_secs = 1;
        let alarm = item("alarm_1", media_sequence());
        let f = fixture(config, vec![alarm.clone()]);

        f.orchestrator.fire(alarm.clone());
        wait_for_state(&f.orchestrator, &alarm.id, |s| s.state == SessionState::Looping).await;

        // The media never ends; only the deadline can stop it.
        let end = wait_for_state(&f.orchestrator, &alarm.id, |s| s.state.is_terminal()).await;
        assert_eq!(end.state, SessionState::ExpiredLoop);
        assert!(end.anomaly);
        assert_eq!(end.loop_count, 0);
        assert!(!f.orchestrator.is_live(&alarm.id));
    }

    #[tokio::test]
    async fn test_skipped_steps_publish_no_state() {
        let alarm = item(
            "alarm_1",
            vec![
                AnnouncementStep::LoopCount,
                AnnouncementStep::Name,
                AnnouncementStep::Media { media: None },
            ],
        );
        let f = fixture(fast_config(), vec![alarm.clone()]);
        let mut events = f.orchestrator.bus.subscribe();

        f.orchestrator.fire(alarm.clone());
        wait_for_state(&f.orchestrator, &alarm.id, |s| s.state == SessionState::Looping).await;
        f.orchestrator.stop(&alarm.id, StopReason::Command).await;

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let AlarmEvent::SessionStateChanged { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(states, vec!["announcing(1)", "announcing(2)", "looping"]);
    }

    #[tokio::test]
    async fn test_fire_sends_notification() {
        let mut alarm = item("alarm_1", media_sequence());
        alarm.notify = Some(NotifyTarget::new("notify.mobile_app_pixel"));
        let quiet = item("alarm_2", media_sequence());
        let f = fixture(fast_config(), vec![alarm.clone(), quiet.clone()]);

        f.orchestrator.fire(alarm.clone());
        let sent = f.notifier.wait_for(1).await;
        assert_eq!(sent[0].0.service(), "mobile_app_pixel");
        assert_eq!(sent[0].1.tag, alarm.id);
        assert_eq!(sent[0].1.title, "Wake");
        assert_eq!(sent[0].1.message, "Stand up");
        f.orchestrator.stop(&alarm.id, StopReason::Command).await;

        f.orchestrator.fire(quiet.clone());
        wait_for_state(&f.orchestrator, &quiet.id, |s| s.state.is_live()).await;
        f.orchestrator.stop(&quiet.id, StopReason::Command).await;
        assert_eq!(f.notifier.sent().len(), 1);
    }
}
