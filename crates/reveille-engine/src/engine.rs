//! Wiring of the engine components.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use reveille_core::clock::Clock;
use reveille_core::config::ReveilleConfig;
use reveille_core::events::AlarmEvent;
use reveille_core::persistence::ItemPersistence;
use reveille_core::types::ItemStatus;

use crate::activator::{EntityActivator, EntityBackend};
use crate::bus::EventBus;
use crate::error::EngineError;
use crate::media::MediaPlayback;
use crate::notifier::Notifier;
use crate::orchestrator::PlaybackOrchestrator;
use crate::scheduler::{advance, TriggerScheduler};
use crate::service::AlarmService;
use crate::session::StopReason;
use crate::snooze::SnoozeManager;
use crate::store::ScheduleStore;

/// The running engine: schedule, scheduler, sessions and command surface.
pub struct Engine {
    config: Arc<ReveilleConfig>,
    bus: EventBus,
    store: Arc<ScheduleStore>,
    orchestrator: Arc<PlaybackOrchestrator>,
    scheduler: Arc<TriggerScheduler>,
    service: Arc<AlarmService>,
}

impl Engine {
    /// Load the schedule and build every component. Nothing runs until
    /// `spawn_scheduler`.
    pub fn new(
        config: ReveilleConfig,
        persistence: Arc<dyn ItemPersistence>,
        media: Arc<dyn MediaPlayback>,
        entities: Arc<dyn EntityBackend>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let config = Arc::new(config);
        let bus = EventBus::default();
        let store = Arc::new(ScheduleStore::load(
            persistence,
            bus.clone(),
            Arc::clone(&clock),
        )?);
        recover(&store, clock.as_ref());

        let activator = Arc::new(EntityActivator::new(
            config.activation.allowed_entities.clone(),
            entities,
            Duration::from_millis(config.playback.command_timeout_ms),
        ));
        let orchestrator = Arc::new(PlaybackOrchestrator::new(
            media,
            Arc::clone(&activator),
            notifier,
            Arc::clone(&store),
            bus.clone(),
            Arc::clone(&clock),
            Arc::clone(&config),
        ));
        let scheduler = Arc::new(TriggerScheduler::new(
            Arc::clone(&store),
            Arc::clone(&orchestrator),
            Arc::clone(&clock),
            bus.clone(),
            config.scheduler.clone(),
        ));
        let snooze = SnoozeManager::new(
            Arc::clone(&store),
            Arc::clone(&orchestrator),
            Arc::clone(&clock),
            bus.clone(),
            config.snooze.clone(),
        );
        let service = Arc::new(AlarmService::new(
            Arc::clone(&store),
            Arc::clone(&orchestrator),
            snooze,
            activator,
            bus.clone(),
            clock,
            Arc::clone(&config),
        ));

        Ok(Self {
            config,
            bus,
            store,
            orchestrator,
            scheduler,
            service,
        })
    }

    pub fn config(&self) -> &ReveilleConfig {
        &self.config
    }

    pub fn service(&self) -> &Arc<AlarmService> {
        &self.service
    }

    pub fn scheduler(&self) -> &Arc<TriggerScheduler> {
        &self.scheduler
    }

    pub fn orchestrator(&self) -> &Arc<PlaybackOrchestrator> {
        &self.orchestrator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlarmEvent> {
        self.bus.subscribe()
    }

    /// Run the trigger loop on its own task.
    pub fn spawn_scheduler(&self) -> JoinHandle<()> {
        let scheduler = Arc::clone(&self.scheduler);
        tokio::spawn(async move { scheduler.run().await })
    }

    /// Stop the trigger loop and every live session.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown();
        let stopped = self.orchestrator.stop_all(StopReason::Shutdown).await;
        let pending = self.store.flush_pending();
        if pending > 0 {
            warn!(pending, "Item writes lost at shutdown");
        }
        info!(sessions = stopped.len(), "Engine shut down");
    }
}

/// Repair state left by a previous run: sessions do not survive a restart,
/// and recurring items must always have a next fire.
fn recover(store: &ScheduleStore, clock: &dyn Clock) {
    let now = clock.now();
    for item in store.snapshot() {
        let interrupted = item.status == ItemStatus::Active;
        let unarmed = item.enabled && item.pattern.is_recurring() && item.next_fire.is_none();
        if !interrupted && !unarmed {
            continue;
        }
        let result = store.record(&item.id, |it| {
            if interrupted {
                it.status = if it.enabled {
                    ItemStatus::Scheduled
                } else {
                    ItemStatus::Disabled
                };
            }
            if unarmed {
                it.next_fire = advance(it, now);
            }
        });
        if result.is_ok() {
            info!(item_id = %item.id, interrupted, unarmed, "Recovered item state");
        }
    }
}
