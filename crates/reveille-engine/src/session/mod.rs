//! Playback sessions.
//!
//! One `PlaybackSession` exists per fire. The driver task in `driver`
//! owns it exclusively and publishes a `SessionSnapshot` after every
//! transition; everyone else only ever sees snapshots.

pub mod driver;
pub mod state;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use reveille_core::types::{DeviceRef, ItemId};

use crate::error::SessionError;

pub use state::SessionState;

/// Why a session reached STOPPED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Stop detected on the device.
    UserStop,
    /// Explicit stop through the command surface.
    Command,
    Snoozed,
    Deleted,
    Disabled,
    /// Device commands kept failing.
    DeviceFailure,
    Shutdown,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::UserStop => write!(f, "user_stop"),
            StopReason::Command => write!(f, "command"),
            StopReason::Snoozed => write!(f, "snoozed"),
            StopReason::Deleted => write!(f, "deleted"),
            StopReason::Disabled => write!(f, "disabled"),
            StopReason::DeviceFailure => write!(f, "device_failure"),
            StopReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Read-only view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub item_id: ItemId,
    pub device: DeviceRef,
    pub state: SessionState,
    pub loop_count: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    pub anomaly: bool,
}

#[derive(Debug)]
pub struct PlaybackSession {
    id: Uuid,
    item_id: ItemId,
    device: DeviceRef,
    state: SessionState,
    loop_count: u32,
    started_at: DateTime<Utc>,
    stop_reason: Option<StopReason>,
    anomaly: bool,
}

impl PlaybackSession {
    pub fn new(item_id: ItemId, device: DeviceRef, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id,
            device,
            state: SessionState::Idle,
            loop_count: 0,
            started_at,
            stop_reason: None,
            anomaly: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn item_id(&self) -> &ItemId {
        &self.item_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn anomaly(&self) -> bool {
        self.anomaly
    }

    pub fn transition(&mut self, target: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(&target) {
            return Err(SessionError::InvalidTransition(self.state, target));
        }
        debug!(
            session_id = %self.id,
            item_id = %self.item_id,
            from = %self.state,
            to = %target,
            loop_count = self.loop_count,
            "Session transition"
        );
        self.state = target;
        Ok(())
    }

    /// Count a cycle boundary.
    pub fn complete_cycle(&mut self) -> u32 {
        self.loop_count += 1;
        self.loop_count
    }

    /// End the session as STOPPED. A terminal session is left as it is and
    /// its state returned unchanged.
    pub fn stop(&mut self, reason: StopReason) -> SessionState {
        if self.state.is_terminal() {
            return self.state;
        }
        self.state = SessionState::Stopped;
        self.stop_reason = Some(reason);
        if reason == StopReason::DeviceFailure {
            self.anomaly = true;
        }
        debug!(session_id = %self.id, reason = %reason, "Session stopped");
        self.state
    }

    /// End the session as EXPIRED_LOOP.
    pub fn expire(&mut self) -> SessionState {
        if self.state.is_terminal() {
            return self.state;
        }
        if self.transition(SessionState::ExpiredLoop).is_err() {
            // Idle sessions have nothing to expire; they just stop.
            self.state = SessionState::Stopped;
        }
        self.anomaly = true;
        self.state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            item_id: self.item_id.clone(),
            device: self.device.clone(),
            state: self.state,
            loop_count: self.loop_count,
            started_at: self.started_at,
            stop_reason: self.stop_reason,
            anomaly: self.anomaly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> PlaybackSession {
        PlaybackSession::new(
            ItemId::new("alarm_1"),
            DeviceRef::new("media_player.bedroom"),
            Utc::now(),
        )
    }

    #[test]
    fn test_new_session_is_idle() {
        let s = session();
        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(s.loop_count(), 0);
        assert!(!s.anomaly());
    }

    #[test]
    fn test_valid_walk_through_sequence() {
        let mut s = session();
        s.transition(SessionState::Announcing { step: 0 }).unwrap();
        s.transition(SessionState::Announcing { step: 1 }).unwrap();
        s.transition(SessionState::Looping).unwrap();
        assert_eq!(s.complete_cycle(), 1);
        s.transition(SessionState::Announcing { step: 0 }).unwrap();
        assert_eq!(s.state(), SessionState::Announcing { step: 0 });
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut s = session();
        let err = s.transition(SessionState::Looping).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidTransition(SessionState::Idle, SessionState::Looping)
        ));
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut s = session();
        s.transition(SessionState::Announcing { step: 0 }).unwrap();
        assert_eq!(s.stop(StopReason::UserStop), SessionState::Stopped);
        assert_eq!(s.stop(StopReason::Command), SessionState::Stopped);
        // The first reason sticks.
        assert_eq!(s.stop_reason(), Some(StopReason::UserStop));
    }

    #[test]
    fn test_stop_after_expiry_keeps_expired() {
        let mut s = session();
        s.transition(SessionState::Announcing { step: 0 }).unwrap();
        s.transition(SessionState::Looping).unwrap();
        assert_eq!(s.expire(), SessionState::ExpiredLoop);
        assert_eq!(s.stop(StopReason::Command), SessionState::ExpiredLoop);
        assert!(s.anomaly());
        assert_eq!(s.stop_reason(), None);
    }

    #[test]
    fn test_device_failure_flags_anomaly() {
        let mut s = session();
        s.transition(SessionState::Announcing { step: 0 }).unwrap();
        s.stop(StopReason::DeviceFailure);
        assert!(s.anomaly());
        assert_eq!(s.snapshot().stop_reason, Some(StopReason::DeviceFailure));
    }
}
