//! Playback session state machine.
//!
//! Valid transitions:
//! - Idle -> Announcing (first step), Idle -> Stopped
//! - Announcing -> Announcing (next step), Looping, Stopped, ExpiredLoop
//! - Looping -> Announcing (replay), Looping, Stopped, ExpiredLoop
//!
//! Stopped and ExpiredLoop are terminal.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    /// Executing the enabled step at this index.
    Announcing { step: usize },
    Looping,
    Stopped,
    /// Loop or wall-time budget exhausted.
    ExpiredLoop,
}

impl SessionState {
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Idle, Announcing { .. })
                | (Idle, Stopped)
                | (Announcing { .. }, Announcing { .. })
                | (Announcing { .. }, Looping)
                | (Announcing { .. }, Stopped)
                | (Announcing { .. }, ExpiredLoop)
                | (Looping, Announcing { .. })
                | (Looping, Looping)
                | (Looping, Stopped)
                | (Looping, ExpiredLoop)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::ExpiredLoop)
    }

    /// Announcing or looping: the device is sounding for this session.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Announcing { .. } | SessionState::Looping)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Announcing { step } => write!(f, "announcing({})", step),
            SessionState::Looping => write!(f, "looping"),
            SessionState::Stopped => write!(f, "stopped"),
            SessionState::ExpiredLoop => write!(f, "expired_loop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    // =====================================================================
    // Valid transitions
    // =====================================================================

    #[test]
    fn test_idle_to_first_step() {
        assert!(Idle.can_transition_to(&Announcing { step: 0 }));
    }

    #[test]
    fn test_step_to_step() {
        assert!(Announcing { step: 0 }.can_transition_to(&Announcing { step: 1 }));
    }

    #[test]
    fn test_media_step_enters_loop() {
        assert!(Announcing { step: 2 }.can_transition_to(&Looping));
    }

    #[test]
    fn test_loop_replays_sequence() {
        assert!(Looping.can_transition_to(&Announcing { step: 0 }));
        assert!(Looping.can_transition_to(&Looping));
    }

    #[test]
    fn test_live_states_can_stop_or_expire() {
        for state in [Idle, Announcing { step: 1 }, Looping] {
            assert!(state.can_transition_to(&Stopped), "{} -> stopped", state);
        }
        assert!(Announcing { step: 0 }.can_transition_to(&ExpiredLoop));
        assert!(Looping.can_transition_to(&ExpiredLoop));
    }

    // =====================================================================
    // Invalid transitions
    // =====================================================================

    #[test]
    fn test_idle_cannot_loop_or_expire() {
        assert!(!Idle.can_transition_to(&Looping));
        assert!(!Idle.can_transition_to(&ExpiredLoop));
        assert!(!Idle.can_transition_to(&Idle));
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        for terminal in [Stopped, ExpiredLoop] {
            assert!(terminal.is_terminal());
            for target in [Idle, Announcing { step: 0 }, Looping, Stopped, ExpiredLoop] {
                assert!(
                    !terminal.can_transition_to(&target),
                    "{} -> {} should be rejected",
                    terminal,
                    target
                );
            }
        }
    }

    #[test]
    fn test_nothing_returns_to_idle() {
        assert!(!Announcing { step: 0 }.can_transition_to(&Idle));
        assert!(!Looping.can_transition_to(&Idle));
    }

    #[test]
    fn test_display_and_serde() {
        assert_eq!(Announcing { step: 3 }.to_string(), "announcing(3)");
        assert_eq!(ExpiredLoop.to_string(), "expired_loop");
        let json = serde_json::to_value(Announcing { step: 1 }).unwrap();
        assert_eq!(json["state"], "announcing");
        assert_eq!(json["step"], 1);
    }
}
