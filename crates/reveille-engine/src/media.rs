//! Media playback collaborator.
//!
//! The engine never talks to a device directly. It issues commands through
//! `MediaPlayback` and watches the device's state changes, which carry the
//! id of the command that caused them when the device reports one.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;
use uuid::Uuid;

use reveille_core::types::{DeviceRef, MediaRef};

/// Player state reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    Playing,
    Buffering,
    Paused,
    Idle,
    Stopped,
    Error,
}

impl PlayerState {
    pub fn is_sounding(self) -> bool {
        matches!(self, PlayerState::Playing | PlayerState::Buffering)
    }

    pub fn is_halted(self) -> bool {
        matches!(
            self,
            PlayerState::Paused | PlayerState::Idle | PlayerState::Stopped
        )
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerState::Playing => write!(f, "playing"),
            PlayerState::Buffering => write!(f, "buffering"),
            PlayerState::Paused => write!(f, "paused"),
            PlayerState::Idle => write!(f, "idle"),
            PlayerState::Stopped => write!(f, "stopped"),
            PlayerState::Error => write!(f, "error"),
        }
    }
}

/// Why a device went idle, when it says.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleReason {
    Finished,
    EndOfMedia,
    Stopped,
    Cancelled,
    Interrupted,
    UserStopped,
    Error,
    PlayerError,
}

impl IdleReason {
    /// Reasons that mean someone or something cut playback off.
    pub fn is_manual(self) -> bool {
        !self.is_completion()
    }

    /// Reasons that mean the media ran to its end.
    pub fn is_completion(self) -> bool {
        matches!(self, IdleReason::Finished | IdleReason::EndOfMedia)
    }
}

/// Identifier of a command issued to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(Uuid);

impl CommandId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What caused a device state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "command", rename_all = "snake_case")]
pub enum EventOrigin {
    /// A command issued through `MediaPlayback`.
    Command(CommandId),
    /// A person using the device or its app.
    User,
    Unknown,
}

/// A state change observed on a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub device: DeviceRef,
    pub previous: Option<PlayerState>,
    pub state: PlayerState,
    /// Media position in seconds, if reported.
    pub position: Option<f64>,
    /// Media duration in seconds, if reported.
    pub duration: Option<f64>,
    pub idle_reason: Option<IdleReason>,
    pub origin: EventOrigin,
    pub at: DateTime<Utc>,
}

impl DeviceEvent {
    pub fn new(device: DeviceRef, previous: Option<PlayerState>, state: PlayerState) -> Self {
        Self {
            device,
            previous,
            state,
            position: None,
            duration: None,
            idle_reason: None,
            origin: EventOrigin::Unknown,
            at: Utc::now(),
        }
    }

    pub fn with_origin(mut self, origin: EventOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_position(mut self, position: f64, duration: f64) -> Self {
        self.position = Some(position);
        self.duration = Some(duration);
        self
    }

    pub fn with_idle_reason(mut self, reason: IdleReason) -> Self {
        self.idle_reason = Some(reason);
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }

    /// Seconds left in the current media, if both figures are known.
    pub fn remaining(&self) -> Option<f64> {
        match (self.position, self.duration) {
            (Some(position), Some(duration)) if duration > 0.0 => {
                Some((duration - position).max(0.0))
            }
            _ => None,
        }
    }
}

/// Device refused or could not run a command.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MediaError {
    #[error("device unavailable: {0}")]
    Unavailable(String),
    #[error("command rejected: {0}")]
    Rejected(String),
}

pub type DeviceEventStream = Pin<Box<dyn Stream<Item = DeviceEvent> + Send>>;

/// Drives playback on media devices.
#[async_trait]
pub trait MediaPlayback: Send + Sync {
    /// Start playing media; the device keeps playing until it ends or is stopped.
    async fn play(&self, device: &DeviceRef, media: &MediaRef) -> Result<CommandId, MediaError>;

    /// Speak text through the device's text-to-speech.
    async fn speak(&self, device: &DeviceRef, text: &str) -> Result<CommandId, MediaError>;

    async fn stop(&self, device: &DeviceRef) -> Result<CommandId, MediaError>;

    /// Set output volume in `0.0..=1.0`.
    async fn set_volume(&self, device: &DeviceRef, level: f32) -> Result<CommandId, MediaError>;

    /// Subscribe to state changes of one device. Events published before
    /// the call are not delivered.
    fn on_state_change(&self, device: &DeviceRef) -> DeviceEventStream;
}
