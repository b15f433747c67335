//! Stop detection.
//!
//! Every device event seen during a session is attributed either to a
//! command the session issued (by its command id) or to the outside world.
//! Outside events are classified into exactly one of three outcomes:
//!
//! - `LoopRestart`: the media is cycling and the session keeps going.
//! - `UserStop`: somebody stopped playback; the session ends.
//! - `DeviceNoise`: buffering or error chatter; ignored, but counted.
//!
//! A run of noise events inside the noise window resolves to `UserStop`
//! so a confused device cannot keep an alarm sounding forever.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use reveille_core::config::DetectionConfig;
use reveille_core::types::DeviceFamily;

use crate::error::ClassificationAmbiguous;
use crate::media::{CommandId, DeviceEvent, EventOrigin, IdleReason, PlayerState};

/// Backward position jumps smaller than this are treated as jitter.
const POSITION_JITTER_SECS: f64 = 0.5;

/// What a session-issued command was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPurpose {
    Speech,
    Media,
    Stop,
    Volume,
}

/// Evidence behind a user-stop classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCause {
    /// Event came from the device's own controls.
    UserOrigin,
    /// Device reported a manual idle reason.
    IdleReason,
    /// Halted with a good part of the media still to play.
    CutShort,
    Paused,
    /// Halted with nothing to say it finished naturally.
    Unexplained,
    /// Noise threshold reached.
    NoiseFallback,
}

impl fmt::Display for StopCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopCause::UserOrigin => write!(f, "user_origin"),
            StopCause::IdleReason => write!(f, "idle_reason"),
            StopCause::CutShort => write!(f, "cut_short"),
            StopCause::Paused => write!(f, "paused"),
            StopCause::Unexplained => write!(f, "unexplained"),
            StopCause::NoiseFallback => write!(f, "noise_fallback"),
        }
    }
}

/// Outcome of classifying an event the session did not cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The media cycled. `ended` is set when the device stopped at the end
    /// of the track and has to be told to play again.
    LoopRestart { ended: bool },
    UserStop(StopCause),
    DeviceNoise,
}

/// What the session should make of one device event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ignore,
    SpeechStarted,
    SpeechFinished,
    MediaStarted,
    Transition(Classification),
}

/// Last known playhead of the media, carried across events that drop it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Playhead {
    pub position: Option<f64>,
    pub duration: Option<f64>,
}

impl Playhead {
    /// Seconds left, preferring the event's own figures.
    fn remaining(self, event: &DeviceEvent) -> Option<(f64, f64)> {
        let duration = event.duration.or(self.duration)?;
        let position = event.position.or(self.position)?;
        if duration <= 0.0 {
            return None;
        }
        Some(((duration - position).max(0.0), duration))
    }
}

/// Counts noise events and reports when too many land in one window.
#[derive(Debug)]
pub struct NoiseWindow {
    threshold: usize,
    window: chrono::Duration,
    seen: VecDeque<DateTime<Utc>>,
}

impl NoiseWindow {
    pub fn new(threshold: u32, window: std::time::Duration) -> Self {
        Self {
            threshold: threshold.max(1) as usize,
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::seconds(30)),
            seen: VecDeque::new(),
        }
    }

    pub fn record(&mut self, at: DateTime<Utc>) -> Result<(), ClassificationAmbiguous> {
        while self
            .seen
            .front()
            .is_some_and(|first| at - *first > self.window)
        {
            self.seen.pop_front();
        }
        self.seen.push_back(at);

        if self.seen.len() >= self.threshold {
            let count = self.seen.len();
            self.seen.clear();
            return Err(ClassificationAmbiguous {
                count,
                window_secs: self.window.num_seconds().max(0) as u64,
            });
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Per-session event classifier.
#[derive(Debug)]
pub struct StopDetectionMonitor {
    config: DetectionConfig,
    family: DeviceFamily,
    owned: HashMap<CommandId, (CommandPurpose, Instant)>,
    last_state: Option<PlayerState>,
    last_position: Option<f64>,
    last_duration: Option<f64>,
    /// A speech command is playing and has not been seen to finish.
    speaking: bool,
    noise: NoiseWindow,
}

impl StopDetectionMonitor {
    pub fn new(config: DetectionConfig, family: DeviceFamily) -> Self {
        let noise = NoiseWindow::new(config.noise_threshold, config.noise_window());
        Self {
            config,
            family,
            owned: HashMap::new(),
            last_state: None,
            last_position: None,
            last_duration: None,
            speaking: false,
            noise,
        }
    }

    /// Remember a command the session issued so its echoes are recognised.
    pub fn register(&mut self, command: CommandId, purpose: CommandPurpose) {
        self.prune();
        match purpose {
            CommandPurpose::Speech => self.speaking = true,
            CommandPurpose::Media | CommandPurpose::Stop => self.speaking = false,
            CommandPurpose::Volume => {}
        }
        self.owned.insert(command, (purpose, Instant::now()));
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn owned_commands(&self) -> usize {
        self.owned.len()
    }

    fn prune(&mut self) {
        let ttl = self.config.context_ttl();
        self.owned.retain(|_, (_, issued)| issued.elapsed() <= ttl);
    }

    fn purpose_of(&self, origin: EventOrigin) -> Option<CommandPurpose> {
        let ttl = self.config.context_ttl();
        match origin {
            EventOrigin::Command(id) => self
                .owned
                .get(&id)
                .filter(|(_, issued)| issued.elapsed() <= ttl)
                .map(|(purpose, _)| *purpose),
            _ => None,
        }
    }

    /// Decide what one device event means for the session.
    pub fn observe(&mut self, event: &DeviceEvent) -> Verdict {
        let previous = event.previous.or(self.last_state);
        let before = Playhead {
            position: self.last_position,
            duration: self.last_duration,
        };
        self.last_state = Some(event.state);
        self.last_position = event.position;
        if event.duration.is_some() {
            self.last_duration = event.duration;
        }

        match self.purpose_of(event.origin) {
            Some(CommandPurpose::Stop) | Some(CommandPurpose::Volume) => Verdict::Ignore,
            Some(CommandPurpose::Speech) => match event.state {
                PlayerState::Playing | PlayerState::Buffering => Verdict::SpeechStarted,
                PlayerState::Idle | PlayerState::Stopped => {
                    self.speaking = false;
                    Verdict::SpeechFinished
                }
                PlayerState::Paused => Verdict::Ignore,
                PlayerState::Error => self.resolve(Classification::DeviceNoise, event),
            },
            Some(CommandPurpose::Media)
                if event.state.is_sounding() && previous != Some(PlayerState::Playing) =>
            {
                self.noise.reset();
                Verdict::MediaStarted
            }
            _ => {
                if let Some(verdict) = self.unattributed_speech(previous, event) {
                    return verdict;
                }
                if is_progress(previous, before.position, event) {
                    return Verdict::Ignore;
                }
                if previous == Some(PlayerState::Buffering) && event.state == PlayerState::Playing {
                    self.noise.reset();
                    return Verdict::Ignore;
                }
                if previous == Some(event.state) && event.state.is_halted() {
                    return Verdict::Ignore;
                }
                let classification = self.classify(previous, before, event);
                self.resolve(classification, event)
            }
        }
    }

    /// Speech events from a device that does not tag them with the command.
    /// A halt with no sign of a person behind it ends the speech.
    fn unattributed_speech(
        &mut self,
        previous: Option<PlayerState>,
        event: &DeviceEvent,
    ) -> Option<Verdict> {
        if !self.speaking || event.origin == EventOrigin::User {
            return None;
        }
        let was_sounding = previous.is_some_and(PlayerState::is_sounding);
        match event.state {
            PlayerState::Playing | PlayerState::Buffering if !was_sounding => {
                Some(Verdict::SpeechStarted)
            }
            PlayerState::Idle | PlayerState::Stopped
                if was_sounding && !event.idle_reason.is_some_and(IdleReason::is_manual) =>
            {
                self.speaking = false;
                Some(Verdict::SpeechFinished)
            }
            _ => None,
        }
    }

    fn resolve(&mut self, classification: Classification, event: &DeviceEvent) -> Verdict {
        match classification {
            Classification::DeviceNoise => match self.noise.record(event.at) {
                Ok(()) => {
                    debug!(
                        device = %event.device,
                        state = %event.state,
                        noise = self.noise.len(),
                        "Device noise"
                    );
                    Verdict::Transition(Classification::DeviceNoise)
                }
                Err(ambiguous) => {
                    warn!(device = %event.device, "{}; treating as a stop", ambiguous);
                    Verdict::Transition(Classification::UserStop(StopCause::NoiseFallback))
                }
            },
            other => {
                self.noise.reset();
                Verdict::Transition(other)
            }
        }
    }

    /// Classify an event that the session did not cause.
    pub fn classify(
        &self,
        previous: Option<PlayerState>,
        before: Playhead,
        event: &DeviceEvent,
    ) -> Classification {
        match event.state {
            PlayerState::Buffering | PlayerState::Error => Classification::DeviceNoise,
            PlayerState::Playing => {
                match (previous, before.position, event.position) {
                    (Some(PlayerState::Playing), Some(before), Some(now))
                        if now + POSITION_JITTER_SECS >= before =>
                    {
                        // Forward progress is filtered before classification;
                        // a non-advancing update is chatter.
                        Classification::DeviceNoise
                    }
                    _ => Classification::LoopRestart { ended: false },
                }
            }
            PlayerState::Paused | PlayerState::Idle | PlayerState::Stopped => {
                self.classify_halt(before, event)
            }
        }
    }

    fn classify_halt(&self, before: Playhead, event: &DeviceEvent) -> Classification {
        if event.origin == EventOrigin::User {
            return Classification::UserStop(StopCause::UserOrigin);
        }
        if let Some(reason) = event.idle_reason {
            return if reason.is_completion() {
                Classification::LoopRestart { ended: true }
            } else {
                Classification::UserStop(StopCause::IdleReason)
            };
        }

        let paused = event.state == PlayerState::Paused;
        match before.remaining(event) {
            Some((remaining, duration)) => {
                if paused && self.family.pauses_at_track_end() {
                    let tolerance = self
                        .config
                        .completion_tolerance_secs
                        .max(self.config.completion_fraction * duration);
                    if remaining <= tolerance {
                        return Classification::LoopRestart { ended: true };
                    }
                }
                let threshold = self
                    .config
                    .min_remaining_secs
                    .max(self.config.remaining_fraction * duration);
                if remaining > threshold {
                    Classification::UserStop(StopCause::CutShort)
                } else if paused {
                    Classification::UserStop(StopCause::Paused)
                } else {
                    Classification::LoopRestart { ended: true }
                }
            }
            _ if paused => Classification::UserStop(StopCause::Paused),
            _ => Classification::UserStop(StopCause::Unexplained),
        }
    }
}

/// A playing-to-playing update whose position moved forward.
fn is_progress(previous: Option<PlayerState>, before: Option<f64>, event: &DeviceEvent) -> bool {
    match (previous, before, event.position) {
        (Some(PlayerState::Playing), Some(before), Some(now)) => {
            event.state == PlayerState::Playing && now > before
        }
        _ => false,
    }
}
