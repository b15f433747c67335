pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod pattern;
pub mod persistence;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ReveilleConfig;
pub use error::{ReveilleError, Result};
pub use events::AlarmEvent;
pub use pattern::{next_fire, DaySet, NextFire, PatternError, RepeatPattern};
pub use persistence::{ItemPersistence, MemoryPersistence};
pub use types::*;
