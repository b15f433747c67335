//! Scheduling and playback engine for Reveille.
//!
//! Fires alarms and reminders on time, drives their announcement and media
//! loop on a remote device, and tells a deliberate user stop apart from a
//! track restart or a device glitch.

pub mod activator;
pub mod announcement;
pub mod bus;
pub mod engine;
pub mod error;
pub mod media;
pub mod notifier;
pub mod orchestrator;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod simulated;
pub mod snapshot;
pub mod snooze;
pub mod stop_detection;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use activator::{ActivationResult, EntityActivator, EntityBackend, LoggingEntityBackend};
pub use bus::EventBus;
pub use engine::Engine;
pub use error::{DeviceCommandError, EngineError, SessionError};
pub use media::{DeviceEvent, EventOrigin, IdleReason, MediaPlayback, PlayerState};
pub use notifier::{LoggingNotifier, Notification, NotificationAction, Notifier};
pub use orchestrator::{FireOutcome, PlaybackOrchestrator};
pub use scheduler::{TickReport, TriggerScheduler};
pub use service::{AlarmService, ItemPatch, NewItem, Reschedule};
pub use session::{SessionSnapshot, SessionState, StopReason};
pub use simulated::SimulatedPlayer;
pub use snapshot::{ItemSnapshot, ScheduleSnapshot};
pub use snooze::SnoozeManager;
pub use stop_detection::{Classification, StopDetectionMonitor};
pub use store::ScheduleStore;
