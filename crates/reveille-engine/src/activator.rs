//! Entity activation.
//!
//! Items may list entities (lights, switches) to turn on while they sound.
//! Only entities in the configured allow-list are ever touched.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use reveille_core::types::EntityRef;

use crate::error::{DeviceCommandError, EngineError};

/// Switches entities on and off.
#[async_trait]
pub trait EntityBackend: Send + Sync {
    async fn turn_on(&self, entity: &EntityRef) -> Result<(), DeviceCommandError>;
    async fn turn_off(&self, entity: &EntityRef) -> Result<(), DeviceCommandError>;
}

/// Backend that only records the calls in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEntityBackend;

#[async_trait]
impl EntityBackend for LoggingEntityBackend {
    async fn turn_on(&self, entity: &EntityRef) -> Result<(), DeviceCommandError> {
        info!(entity = %entity, "Entity on");
        Ok(())
    }

    async fn turn_off(&self, entity: &EntityRef) -> Result<(), DeviceCommandError> {
        info!(entity = %entity, "Entity off");
        Ok(())
    }
}

/// Per-entity outcome of an activation or deactivation.
#[derive(Debug, Default)]
pub struct ActivationResult {
    pub switched: Vec<EntityRef>,
    pub failures: Vec<(EntityRef, EngineError)>,
}

impl ActivationResult {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Entities refused by the allow-list.
    pub fn rejected(&self) -> impl Iterator<Item = &EntityRef> {
        self.failures
            .iter()
            .filter(|(_, e)| matches!(e, EngineError::PolicyViolation(_)))
            .map(|(entity, _)| entity)
    }
}

pub struct EntityActivator {
    allowed: BTreeSet<EntityRef>,
    backend: Arc<dyn EntityBackend>,
    timeout: Duration,
}

#[derive(Clone, Copy)]
enum Switch {
    On,
    Off,
}

impl EntityActivator {
    pub fn new(
        allowed: impl IntoIterator<Item = EntityRef>,
        backend: Arc<dyn EntityBackend>,
        timeout: Duration,
    ) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
            backend,
            timeout,
        }
    }

    pub fn is_allowed(&self, entity: &EntityRef) -> bool {
        self.allowed.contains(entity)
    }

    /// Reject the first reference outside the allow-list.
    pub fn check(&self, entities: &[EntityRef]) -> Result<(), EngineError> {
        match entities.iter().find(|e| !self.is_allowed(e)) {
            Some(entity) => Err(EngineError::PolicyViolation(entity.clone())),
            None => Ok(()),
        }
    }

    pub async fn activate(&self, entities: &[EntityRef]) -> ActivationResult {
        self.switch(entities, Switch::On).await
    }

    pub async fn deactivate(&self, entities: &[EntityRef]) -> ActivationResult {
        self.switch(entities, Switch::Off).await
    }

    async fn switch(&self, entities: &[EntityRef], switch: Switch) -> ActivationResult {
        let mut result = ActivationResult::default();
        for entity in entities {
            if !self.is_allowed(entity) {
                warn!(entity = %entity, "Entity not in activation allow-list; skipped");
                result
                    .failures
                    .push((entity.clone(), EngineError::PolicyViolation(entity.clone())));
                continue;
            }

            let call = async {
                match switch {
                    Switch::On => self.backend.turn_on(entity).await,
                    Switch::Off => self.backend.turn_off(entity).await,
                }
            };
            let outcome = match tokio::time::timeout(self.timeout, call).await {
                Ok(outcome) => outcome,
                Err(_) => Err(DeviceCommandError::TimedOut {
                    target: entity.to_string(),
                    after_ms: self.timeout.as_millis() as u64,
                }),
            };

            match outcome {
                Ok(()) => result.switched.push(entity.clone()),
                Err(e) => {
                    warn!(entity = %entity, error = %e, "Entity command failed");
                    result.failures.push((entity.clone(), e.into()));
                }
            }
        }
        result
    }
}
