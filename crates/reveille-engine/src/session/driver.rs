//! Session driver: runs one `PlaybackSession` from fire to terminal state.
//!
//! The driver owns the session, its device-event subscription and its
//! stop-detection monitor. Everything it waits on also waits on the
//! cancellation token and the session deadline.

use std::convert::Infallible;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use reveille_core::config::PlaybackConfig;
use reveille_core::events::AlarmEvent;
use reveille_core::types::{AlarmItem, AnnouncementStep, DeviceFamily, EntityRef, MediaRef};

use crate::announcement::{plan_step, StepAction};
use crate::error::DeviceCommandError;
use crate::media::{CommandId, DeviceEvent, DeviceEventStream, EventOrigin, MediaError};
use crate::notifier::Notification;
use crate::orchestrator::PlaybackOrchestrator;
use crate::session::{PlaybackSession, SessionSnapshot, SessionState, StopReason};
use crate::stop_detection::{
    Classification, CommandPurpose, StopDetectionMonitor, Verdict,
};

/// Why the session is ending.
#[derive(Debug)]
enum Halt {
    Stop(StopReason),
    Expired,
    Failed(String),
}

#[derive(Debug, PartialEq, Eq)]
enum Speech {
    Started,
    Finished,
    TimedOut,
}

pub(crate) struct SessionDriver {
    orchestrator: Arc<PlaybackOrchestrator>,
    item: AlarmItem,
    family: DeviceFamily,
    playback: PlaybackConfig,
    session: PlaybackSession,
    monitor: StopDetectionMonitor,
    events: DeviceEventStream,
    cancel: CancellationToken,
    stop_reason: Arc<Mutex<Option<StopReason>>>,
    snapshot: watch::Sender<SessionSnapshot>,
    activated: Vec<EntityRef>,
    deadline: Instant,
}

impl SessionDriver {
    pub(crate) fn new(
        orchestrator: Arc<PlaybackOrchestrator>,
        item: AlarmItem,
        session: PlaybackSession,
        cancel: CancellationToken,
        stop_reason: Arc<Mutex<Option<StopReason>>>,
        snapshot: watch::Sender<SessionSnapshot>,
    ) -> Self {
        let config = Arc::clone(&orchestrator.config);
        let family = config.device_family(&item.device);
        // Subscribe before any command so no echo is missed.
        let events = orchestrator.media.on_state_change(&item.device);
        Self {
            family,
            playback: config.playback.clone(),
            monitor: StopDetectionMonitor::new(config.detection.clone(), family),
            deadline: Instant::now() + config.playback.max_session(),
            orchestrator,
            item,
            session,
            events,
            cancel,
            stop_reason,
            snapshot,
            activated: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        let halt = match self.drive().await {
            Ok(never) => match never {},
            Err(halt) => halt,
        };
        self.finish(halt).await;
    }

    async fn drive(&mut self) -> Result<Infallible, Halt> {
        info!(
            item_id = %self.item.id,
            session_id = %self.session.id(),
            device = %self.item.device,
            "Session started"
        );
        self.notify();
        self.activate().await;

        if let Some(level) = self.item.volume {
            let media = Arc::clone(&self.orchestrator.media);
            let device = self.item.device.clone();
            match self
                .command(CommandPurpose::Volume, || media.set_volume(&device, level))
                .await
            {
                Ok(_) => {}
                Err(Halt::Failed(e)) => warn!(device = %device, error = %e, "Volume not applied"),
                Err(halt) => return Err(halt),
            }
        }

        let steps = self.item.announcement.enabled_steps();
        if steps.is_empty() {
            return Err(Halt::Failed("no enabled announcement steps".to_string()));
        }
        let has_media = steps.iter().any(AnnouncementStep::is_media);
        let replay_from = if has_media { 0 } else { steps.len() - 1 };

        let mut first = 0;
        loop {
            let mut sounded = false;
            for (index, step) in steps.iter().enumerate().skip(first) {
                let action = match plan_step(
                    step,
                    &self.item,
                    self.family,
                    self.session.loop_count(),
                    self.orchestrator.clock.now(),
                    &self.playback,
                ) {
                    StepAction::Skip => continue,
                    action => action,
                };
                self.enter(SessionState::Announcing { step: index })?;
                match action {
                    StepAction::Skip => {}
                    StepAction::Speak(text) => {
                        self.speak(&text).await?;
                        sounded = true;
                    }
                    StepAction::Play(media) => {
                        self.play(&media).await?;
                        sounded = true;
                        self.enter(SessionState::Looping)?;
                        self.watch_media().await?;
                        break;
                    }
                }
            }
            if !sounded {
                return Err(Halt::Failed(format!(
                    "nothing playable on {} ({})",
                    self.item.device, self.family
                )));
            }

            if !has_media {
                self.enter(SessionState::Looping)?;
                let pause = self.playback.loop_pause();
                self.pause(pause).await?;
                first = replay_from;
            }
            self.complete_cycle()?;
        }
    }

    fn complete_cycle(&mut self) -> Result<(), Halt> {
        let count = self.session.complete_cycle();
        self.publish_state();
        if count >= self.playback.max_loops {
            return Err(Halt::Expired);
        }
        Ok(())
    }

    fn enter(&mut self, state: SessionState) -> Result<(), Halt> {
        self.session
            .transition(state)
            .map_err(|e| Halt::Failed(e.to_string()))?;
        self.publish_state();
        Ok(())
    }

    fn publish_state(&self) {
        let snapshot = self.session.snapshot();
        self.orchestrator.bus.publish(AlarmEvent::SessionStateChanged {
            item_id: snapshot.item_id.clone(),
            session_id: snapshot.session_id,
            state: snapshot.state.to_string(),
            loop_count: snapshot.loop_count,
            timestamp: self.orchestrator.clock.now(),
        });
        self.snapshot.send_replace(snapshot);
    }

    /// Send the fire notification without waiting for delivery.
    fn notify(&self) {
        let Some(target) = self.item.notify.clone() else {
            return;
        };
        let notification = Notification::for_fire(&self.item, self.orchestrator.clock.now());
        let notifier = Arc::clone(&self.orchestrator.notifier);
        let timeout = self.playback.command_timeout();
        let item_id = self.item.id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, notifier.send(&target, &notification)).await {
                Ok(Ok(())) => debug!(item_id = %item_id, target = %target, "Notification delivered"),
                Ok(Err(e)) => {
                    warn!(item_id = %item_id, target = %target, error = %e, "Notification failed")
                }
                Err(_) => warn!(item_id = %item_id, target = %target, "Notification timed out"),
            }
        });
    }

    async fn activate(&mut self) {
        if self.item.activation_entities.is_empty() {
            return;
        }
        let result = self
            .orchestrator
            .activator
            .activate(&self.item.activation_entities)
            .await;
        for entity in result.rejected() {
            self.orchestrator.bus.publish(AlarmEvent::ActivationRejected {
                item_id: self.item.id.clone(),
                entity: entity.clone(),
                timestamp: self.orchestrator.clock.now(),
            });
        }
        self.activated = result.switched;
    }

    /// Issue a device command, retrying with exponential backoff.
    async fn command<F, Fut>(&mut self, purpose: CommandPurpose, mut issue: F) -> Result<CommandId, Halt>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<CommandId, MediaError>>,
    {
        let timeout = self.playback.command_timeout();
        let mut backoff = self.playback.command_backoff();
        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(self.cancelled());
            }
            let error = match tokio::time::timeout(timeout, issue()).await {
                Ok(Ok(id)) => {
                    self.monitor.register(id, purpose);
                    return Ok(id);
                }
                Ok(Err(e)) => DeviceCommandError::Failed {
                    target: self.item.device.to_string(),
                    message: e.to_string(),
                },
                Err(_) => DeviceCommandError::TimedOut {
                    target: self.item.device.to_string(),
                    after_ms: timeout.as_millis() as u64,
                },
            };

            attempt += 1;
            if attempt > self.playback.command_retries {
                return Err(Halt::Failed(error.to_string()));
            }
            warn!(
                item_id = %self.item.id,
                session_id = %self.session.id(),
                attempt,
                error = %error,
                "Device command failed; retrying"
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = backoff.saturating_mul(2);
        }
    }

    /// Next device event and what it means, or `None` once `until` passes.
    async fn next_event(
        &mut self,
        until: Option<Instant>,
    ) -> Result<Option<(DeviceEvent, Verdict)>, Halt> {
        let limit = until.unwrap_or(self.deadline);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.cancelled()),
            _ = tokio::time::sleep_until(self.deadline) => Err(Halt::Expired),
            _ = tokio::time::sleep_until(limit), if until.is_some() => Ok(None),
            event = self.events.next() => match event {
                Some(event) => {
                    let verdict = self.monitor.observe(&event);
                    Ok(Some((event, verdict)))
                }
                None => Err(Halt::Failed("device event stream closed".to_string())),
            },
        }
    }

    async fn speak(&mut self, text: &str) -> Result<(), Halt> {
        let media = Arc::clone(&self.orchestrator.media);
        let device = self.item.device.clone();
        let command = self
            .command(CommandPurpose::Speech, || media.speak(&device, text))
            .await?;

        let start_limit = self.playback.speech_start_timeout();
        match self.await_speech(command, start_limit, false).await? {
            Speech::Finished => return Ok(()),
            Speech::TimedOut => {
                debug!(device = %device, "Speech start not reported; moving on");
                return Ok(());
            }
            Speech::Started => {}
        }

        let max = self.playback.speech_max();
        if self.await_speech(command, max, true).await? == Speech::TimedOut {
            warn!(device = %device, "Speech did not finish within limit; moving on");
        }
        Ok(())
    }

    async fn await_speech(
        &mut self,
        command: CommandId,
        limit: std::time::Duration,
        need_finish: bool,
    ) -> Result<Speech, Halt> {
        let until = Instant::now() + limit;
        loop {
            let Some((event, verdict)) = self.next_event(Some(until)).await? else {
                return Ok(Speech::TimedOut);
            };
            // Devices that do not tag their events get the benefit of the doubt.
            let ours = match event.origin {
                EventOrigin::Command(id) => id == command,
                EventOrigin::User | EventOrigin::Unknown => true,
            };
            match verdict {
                Verdict::SpeechFinished if ours => return Ok(Speech::Finished),
                Verdict::SpeechStarted if ours && !need_finish => return Ok(Speech::Started),
                Verdict::Transition(Classification::UserStop(cause)) => {
                    info!(item_id = %self.item.id, cause = %cause, "Stop detected during speech");
                    return Err(Halt::Stop(StopReason::UserStop));
                }
                _ => {}
            }
        }
    }

    async fn play(&mut self, media_ref: &MediaRef) -> Result<(), Halt> {
        let media = Arc::clone(&self.orchestrator.media);
        let device = self.item.device.clone();
        self.command(CommandPurpose::Media, || media.play(&device, media_ref))
            .await?;

        let until = Instant::now() + self.playback.media_start_timeout();
        loop {
            match self.next_event(Some(until)).await? {
                None => {
                    warn!(device = %device, media = %media_ref, "Media start not reported");
                    return Ok(());
                }
                Some((_, Verdict::MediaStarted))
                | Some((_, Verdict::Transition(Classification::LoopRestart { .. }))) => {
                    return Ok(())
                }
                Some((_, Verdict::Transition(Classification::UserStop(cause)))) => {
                    info!(item_id = %self.item.id, cause = %cause, "Stop detected at media start");
                    return Err(Halt::Stop(StopReason::UserStop));
                }
                Some(_) => {}
            }
        }
    }

    /// Follow the looping media until it ends naturally.
    async fn watch_media(&mut self) -> Result<(), Halt> {
        loop {
            let Some((_, verdict)) = self.next_event(None).await? else {
                continue;
            };
            match verdict {
                Verdict::Transition(Classification::LoopRestart { ended: false }) => {
                    self.enter(SessionState::Looping)?;
                    self.complete_cycle()?;
                }
                Verdict::Transition(Classification::LoopRestart { ended: true }) => {
                    return Ok(());
                }
                Verdict::Transition(Classification::UserStop(cause)) => {
                    info!(item_id = %self.item.id, cause = %cause, "Stop detected");
                    return Err(Halt::Stop(StopReason::UserStop));
                }
                _ => {}
            }
        }
    }

    /// Wait between speech-only cycles, still listening for a stop.
    async fn pause(&mut self, duration: std::time::Duration) -> Result<(), Halt> {
        let until = Instant::now() + duration;
        loop {
            match self.next_event(Some(until)).await? {
                None => return Ok(()),
                Some((_, Verdict::Transition(Classification::UserStop(cause)))) => {
                    info!(item_id = %self.item.id, cause = %cause, "Stop detected between cycles");
                    return Err(Halt::Stop(StopReason::UserStop));
                }
                Some(_) => {}
            }
        }
    }

    fn cancelled(&self) -> Halt {
        let reason = self
            .stop_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .unwrap_or(StopReason::Command);
        Halt::Stop(reason)
    }

    async fn finish(mut self, halt: Halt) {
        let state = match halt {
            Halt::Stop(reason) => self.session.stop(reason),
            Halt::Expired => {
                warn!(
                    item_id = %self.item.id,
                    session_id = %self.session.id(),
                    loop_count = self.session.loop_count(),
                    "Session exceeded its loop budget"
                );
                self.session.expire()
            }
            Halt::Failed(message) => {
                warn!(
                    item_id = %self.item.id,
                    session_id = %self.session.id(),
                    error = %message,
                    "Session ended after device failure"
                );
                self.session.stop(StopReason::DeviceFailure)
            }
        };

        let timeout = self.playback.command_timeout();
        match tokio::time::timeout(timeout, self.orchestrator.media.stop(&self.item.device)).await {
            Ok(Ok(id)) => self.monitor.register(id, CommandPurpose::Stop),
            Ok(Err(e)) => warn!(device = %self.item.device, error = %e, "Could not silence device"),
            Err(_) => warn!(device = %self.item.device, "Silencing device timed out"),
        }

        if !self.activated.is_empty() {
            self.orchestrator
                .activator
                .deactivate(&self.activated)
                .await;
        }

        let snapshot = self.session.snapshot();
        self.orchestrator.record_session_end(&self.item.id, &snapshot);
        self.orchestrator
            .release(&self.item.id, snapshot.session_id, Some(snapshot.clone()));

        info!(
            item_id = %self.item.id,
            session_id = %snapshot.session_id,
            state = %state,
            loop_count = snapshot.loop_count,
            anomaly = snapshot.anomaly,
            "Session ended"
        );
        self.orchestrator.bus.publish(AlarmEvent::SessionEnded {
            item_id: self.item.id.clone(),
            session_id: snapshot.session_id,
            state: state.to_string(),
            reason: snapshot
                .stop_reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| state.to_string()),
            loop_count: snapshot.loop_count,
            anomaly: snapshot.anomaly,
            timestamp: self.orchestrator.clock.now(),
        });
        self.snapshot.send_replace(snapshot);
    }
}
