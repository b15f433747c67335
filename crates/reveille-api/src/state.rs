//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use reveille_engine::{AlarmService, Engine};

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            start_time: Instant::now(),
        }
    }

    pub fn service(&self) -> &AlarmService {
        self.engine.service()
    }

    pub fn port(&self) -> u16 {
        self.engine.config().general.port
    }
}
