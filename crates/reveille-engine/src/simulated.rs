//! In-process media backend.
//!
//! `SimulatedPlayer` keeps a player state per device and publishes the
//! state changes a real speaker would: speech plays and then goes idle on
//! its own, media plays until stopped or until an event is injected.
//! The binary uses it when no hardware bridge is configured and the tests
//! use it to script device behavior.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use reveille_core::types::{DeviceRef, MediaRef};

use crate::media::{
    CommandId, DeviceEvent, DeviceEventStream, EventOrigin, IdleReason, MediaError,
    MediaPlayback, PlayerState,
};

/// A command the simulated player received.
#[derive(Debug, Clone, PartialEq)]
pub enum IssuedCommand {
    Play { device: DeviceRef, media: MediaRef },
    Speak { device: DeviceRef, text: String },
    Stop { device: DeviceRef },
    SetVolume { device: DeviceRef, level: f32 },
}

impl IssuedCommand {
    pub fn device(&self) -> &DeviceRef {
        match self {
            IssuedCommand::Play { device, .. }
            | IssuedCommand::Speak { device, .. }
            | IssuedCommand::Stop { device }
            | IssuedCommand::SetVolume { device, .. } => device,
        }
    }
}

struct Inner {
    events: broadcast::Sender<DeviceEvent>,
    states: Mutex<HashMap<DeviceRef, PlayerState>>,
    log: Mutex<Vec<(CommandId, IssuedCommand)>>,
    failures: AtomicU32,
    untagged: AtomicBool,
    speech_duration: Duration,
}

impl Inner {
    fn transition(
        &self,
        device: &DeviceRef,
        state: PlayerState,
        origin: EventOrigin,
        idle_reason: Option<IdleReason>,
    ) {
        let previous = {
            let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
            states.insert(device.clone(), state)
        };
        let (origin, idle_reason) = match origin {
            EventOrigin::Command(_) if self.untagged.load(Ordering::SeqCst) => {
                (EventOrigin::Unknown, None)
            }
            other => (other, idle_reason),
        };
        let mut event = DeviceEvent::new(device.clone(), previous, state).with_origin(origin);
        event.idle_reason = idle_reason;
        debug!(device = %device, state = %state, "Simulated state change");
        let _ = self.events.send(event);
    }
}

/// Scriptable media backend.
#[derive(Clone)]
pub struct SimulatedPlayer {
    inner: Arc<Inner>,
}

impl SimulatedPlayer {
    pub fn new() -> Self {
        Self::with_speech_duration(Duration::from_millis(20))
    }

    /// Speech goes idle this long after it starts.
    pub fn with_speech_duration(speech_duration: Duration) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                events,
                states: Mutex::new(HashMap::new()),
                log: Mutex::new(Vec::new()),
                failures: AtomicU32::new(0),
                untagged: AtomicBool::new(false),
                speech_duration,
            }),
        }
    }

    /// Make the next `count` commands fail.
    pub fn fail_next(&self, count: u32) {
        self.inner.failures.store(count, Ordering::SeqCst);
    }

    /// Report command-driven changes without the command id or idle
    /// reason, like a speaker that only publishes bare state changes.
    pub fn set_untagged(&self, untagged: bool) {
        self.inner.untagged.store(untagged, Ordering::SeqCst);
    }

    /// Publish an arbitrary event, as if the device reported it.
    pub fn inject(&self, event: DeviceEvent) {
        {
            let mut states = self.inner.states.lock().unwrap_or_else(|e| e.into_inner());
            states.insert(event.device.clone(), event.state);
        }
        let _ = self.inner.events.send(event);
    }

    /// Report a user-initiated change from the device's current state.
    pub fn user_changes(&self, device: &DeviceRef, state: PlayerState) {
        self.inner
            .transition(device, state, EventOrigin::User, None);
    }

    pub fn state(&self, device: &DeviceRef) -> Option<PlayerState> {
        self.inner
            .states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(device)
            .copied()
    }

    pub fn commands(&self) -> Vec<IssuedCommand> {
        self.inner
            .log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, command)| command.clone())
            .collect()
    }

    fn accept(&self, command: IssuedCommand) -> Result<CommandId, MediaError> {
        let pending = self.inner.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.inner.failures.store(pending - 1, Ordering::SeqCst);
            return Err(MediaError::Unavailable(command.device().to_string()));
        }
        let id = CommandId::new();
        info!(command = ?command, "Simulated device command");
        self.inner
            .log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, command));
        Ok(id)
    }
}

impl Default for SimulatedPlayer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaPlayback for SimulatedPlayer {
    async fn play(&self, device: &DeviceRef, media: &MediaRef) -> Result<CommandId, MediaError> {
        let id = self.accept(IssuedCommand::Play {
            device: device.clone(),
            media: media.clone(),
        })?;
        self.inner
            .transition(device, PlayerState::Playing, EventOrigin::Command(id), None);
        Ok(id)
    }

    async fn speak(&self, device: &DeviceRef, text: &str) -> Result<CommandId, MediaError> {
        let id = self.accept(IssuedCommand::Speak {
            device: device.clone(),
            text: text.to_string(),
        })?;
        self.inner
            .transition(device, PlayerState::Playing, EventOrigin::Command(id), None);

        let inner = Arc::clone(&self.inner);
        let device = device.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.speech_duration).await;
            inner.transition(
                &device,
                PlayerState::Idle,
                EventOrigin::Command(id),
                Some(IdleReason::Finished),
            );
        });
        Ok(id)
    }

    async fn stop(&self, device: &DeviceRef) -> Result<CommandId, MediaError> {
        let id = self.accept(IssuedCommand::Stop {
            device: device.clone(),
        })?;
        self.inner.transition(
            device,
            PlayerState::Idle,
            EventOrigin::Command(id),
            Some(IdleReason::Stopped),
        );
        Ok(id)
    }

    async fn set_volume(&self, device: &DeviceRef, level: f32) -> Result<CommandId, MediaError> {
        self.accept(IssuedCommand::SetVolume {
            device: device.clone(),
            level,
        })
    }

    fn on_state_change(&self, device: &DeviceRef) -> DeviceEventStream {
        let device = device.clone();
        let stream = BroadcastStream::new(self.inner.events.subscribe()).filter_map(move |event| {
            match event {
                Ok(event) if event.device == device => Some(event),
                _ => None,
            }
        });
        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceRef {
        DeviceRef::new("media_player.bedroom")
    }

    #[tokio::test]
    async fn test_speech_plays_then_finishes() {
        let player = SimulatedPlayer::with_speech_duration(Duration::from_millis(5));
        let mut events = player.on_state_change(&device());

        let id = player.speak(&device(), "Wake up").await.unwrap();

        let started = events.next().await.unwrap();
        assert_eq!(started.state, PlayerState::Playing);
        assert_eq!(started.origin, EventOrigin::Command(id));

        let finished = events.next().await.unwrap();
        assert_eq!(finished.state, PlayerState::Idle);
        assert_eq!(finished.previous, Some(PlayerState::Playing));
        assert_eq!(finished.idle_reason, Some(IdleReason::Finished));
    }

    #[tokio::test]
    async fn test_events_are_filtered_by_device() {
        let player = SimulatedPlayer::new();
        let mut events = player.on_state_change(&device());

        let kitchen = DeviceRef::new("media_player.kitchen");
        player
            .play(&kitchen, &MediaRef::new("/media/birds.mp3"))
            .await
            .unwrap();
        player.user_changes(&device(), PlayerState::Paused);

        let event = events.next().await.unwrap();
        assert_eq!(event.device, device());
        assert_eq!(event.origin, EventOrigin::User);
    }

    #[tokio::test]
    async fn test_fail_next_rejects_commands() {
        let player = SimulatedPlayer::new();
        player.fail_next(2);

        assert!(player.stop(&device()).await.is_err());
        assert!(player.stop(&device()).await.is_err());
        assert!(player.stop(&device()).await.is_ok());
        assert_eq!(player.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_untagged_player_hides_command_origin() {
        let player = SimulatedPlayer::with_speech_duration(Duration::from_millis(5));
        player.set_untagged(true);
        let mut events = player.on_state_change(&device());

        player.speak(&device(), "Wake up").await.unwrap();
        let started = events.next().await.unwrap();
        assert_eq!(started.origin, EventOrigin::Unknown);
        let finished = events.next().await.unwrap();
        assert_eq!(finished.state, PlayerState::Idle);
        assert_eq!(finished.idle_reason, None);
    }

    #[tokio::test]
    async fn test_stop_goes_idle() {
        let player = SimulatedPlayer::new();
        player
            .play(&device(), &MediaRef::new("/media/birds.mp3"))
            .await
            .unwrap();
        assert_eq!(player.state(&device()), Some(PlayerState::Playing));
        player.stop(&device()).await.unwrap();
        assert_eq!(player.state(&device()), Some(PlayerState::Idle));
    }
}
