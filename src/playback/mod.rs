//! # Playback Controller
//!
//! Waits for an armed message and a physical trigger, then plays the payload and
//! records the result. It is the only writer of `playing` and the only component that
//! moves a message from pending to listened.
//!
//! ```text
//!  Idle ◀──────────────┐
//!   │ message_pending   │ payload deleted
//!   ▼                   │
//!  Armed ──edge──▶ Playing ──Completed/Failed──▶ Retiring
//!   ▲                 │
//!   └──Interrupted────┘
//! ```
//!
//! The sensor is sampled every poll whatever the phase, so the edge detector always
//! knows the previous level. A pending message is re-validated by id inside the
//! begin write, which drops a trigger that raced with an operator reset.

pub mod player;
pub mod sensor;

use crate::shutdown::Shutdown;
use crate::state::{InvariantViolation, Lifecycle, Transition};
use crate::storage::{StateStore, StoreError};
use log::{debug, error, info, warn};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub use player::{CommandPlayer, PlaybackOutcome, Player};
pub use sensor::{EdgeDetector, GpioValueSensor, Sensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerPhase {
    Idle,
    Armed,
    Playing,
    Retiring,
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    /// Shutdown arrived mid-playback; the message was put back to pending.
    #[error("playback of message {id} interrupted")]
    Interrupted { id: String },
    /// The end of a playback could not be recorded before shutdown.
    #[error("cannot record end of playback for message {id}: {source}")]
    FinishNotRecorded {
        id: String,
        #[source]
        source: StoreError,
    },
}

pub struct PlaybackController<S, P> {
    store: StateStore,
    sensor: S,
    player: P,
    edge: EdgeDetector,
    poll_interval: Duration,
    phase: PlayerPhase,
    sensor_failing: bool,
}

impl<S: Sensor, P: Player> PlaybackController<S, P> {
    pub fn new(store: StateStore, sensor: S, player: P, poll_interval: Duration, debounce_polls: u32) -> Self {
        Self {
            store,
            sensor,
            player,
            edge: EdgeDetector::new(debounce_polls),
            poll_interval,
            phase: PlayerPhase::Idle,
            sensor_failing: false,
        }
    }

    pub fn phase(&self) -> PlayerPhase {
        self.phase
    }

    /// Retire a `playing` flag left behind by a previous run. With the payload still
    /// on disk the message goes back to pending so it can be heard; otherwise it is
    /// marked listened and ingestion acknowledges it.
    pub fn recover_orphaned_playback(&self) -> Option<Lifecycle> {
        let result = self.store.update(|s| match s.lifecycle() {
            Ok(Lifecycle::Playing { payload, .. }) => {
                let transition = if payload.exists() {
                    Transition::AbortPlayback
                } else {
                    Transition::FinishPlayback
                };
                s.transition(transition).ok()
            }
            _ => None,
        });
        match result {
            Ok(Some(next)) => {
                warn!("orphaned playback found at startup, message now {}", next);
                Some(next)
            }
            Ok(None) => None,
            Err(e) => {
                error!("cannot check for orphaned playback: {}", e);
                None
            }
        }
    }

    fn sample_sensor(&mut self) -> bool {
        match self.sensor.is_triggered() {
            Ok(level) => {
                if self.sensor_failing {
                    info!("sensor readable again");
                    self.sensor_failing = false;
                }
                self.edge.sample(level)
            }
            Err(e) => {
                if !self.sensor_failing {
                    warn!("cannot read sensor: {}", e);
                    self.sensor_failing = true;
                }
                // The level is unknown, not low.
                self.edge.reset();
                false
            }
        }
    }

    /// One poll: sample the sensor, look at the shared state, and play if a pending
    /// message was triggered.
    pub async fn step(&mut self, shutdown: &mut Shutdown) -> Result<PlayerPhase, PlaybackError> {
        let fired = self.sample_sensor();
        match self.store.read().lifecycle() {
            Ok(Lifecycle::Pending { id, payload }) => {
                self.phase = PlayerPhase::Armed;
                if fired {
                    self.play(&id, &payload, shutdown).await?;
                }
            }
            Ok(Lifecycle::Playing { .. }) => {
                // Only this controller sets `playing`, so one seen here has no owner.
                self.recover_orphaned_playback();
                self.phase = PlayerPhase::Idle;
            }
            Ok(_) => self.phase = PlayerPhase::Idle,
            Err(violation) => {
                self.repair(violation);
                self.phase = PlayerPhase::Idle;
            }
        }
        Ok(self.phase)
    }

    async fn play(&mut self, id: &str, payload: &Path, shutdown: &mut Shutdown) -> Result<(), PlaybackError> {
        let begin = self.store.update(|s| {
            let still_pending = matches!(s.lifecycle(), Ok(Lifecycle::Pending { id: current, .. }) if current == id);
            still_pending && s.transition(Transition::BeginPlayback).is_ok()
        });
        match begin {
            Ok(true) => {}
            Ok(false) => {
                info!("message {} no longer pending, trigger dropped", id);
                return Ok(());
            }
            Err(e) => {
                error!("cannot record start of playback for message {}: {}; staying armed", id, e);
                return Ok(());
            }
        }
        self.phase = PlayerPhase::Playing;

        let outcome = if payload.exists() {
            info!("playing message {}", id);
            let player = &self.player;
            tokio::select! {
                outcome = player.play(payload) => Some(outcome),
                _ = shutdown.wait() => None,
            }
        } else {
            Some(PlaybackOutcome::Failed("payload missing".into()))
        };

        match outcome {
            None => {
                warn!("shutdown during playback of message {}, returning it to pending", id);
                self.abort(id);
                return Err(PlaybackError::Interrupted { id: id.to_string() });
            }
            Some(PlaybackOutcome::Interrupted) => {
                warn!("playback of message {} interrupted, returning it to pending", id);
                self.abort(id);
                return Ok(());
            }
            Some(PlaybackOutcome::Completed) => info!("message {} played", id),
            Some(PlaybackOutcome::Failed(reason)) => {
                warn!("playback of message {} failed ({}), retiring it anyway", id, reason)
            }
        }

        self.phase = PlayerPhase::Retiring;
        self.finish(id, shutdown).await?;
        self.delete_payload(payload);
        self.phase = PlayerPhase::Idle;
        Ok(())
    }

    fn abort(&mut self, id: &str) {
        match self.store.update(|s| s.transition(Transition::AbortPlayback)) {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("message {} changed during playback: {}", id, e),
            Err(e) => error!("cannot return message {} to pending: {}", id, e),
        }
        self.phase = PlayerPhase::Armed;
    }

    /// Record `Playing -> Listened`, retrying until the store accepts it. After
    /// shutdown one last attempt is made and its failure is returned.
    async fn finish(&self, id: &str, shutdown: &mut Shutdown) -> Result<(), PlaybackError> {
        loop {
            let err = match self.store.update(|s| s.transition(Transition::FinishPlayback)) {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) => {
                    warn!("message {} changed during playback: {}", id, e);
                    return Ok(());
                }
                Err(e) => e,
            };
            error!("cannot record end of playback for message {}: {}; retrying", id, err);
            if shutdown.is_triggered() || shutdown.sleep(self.poll_interval).await {
                return match self.store.update(|s| s.transition(Transition::FinishPlayback)) {
                    Ok(_) => Ok(()),
                    Err(source) => Err(PlaybackError::FinishNotRecorded {
                        id: id.to_string(),
                        source,
                    }),
                };
            }
        }
    }

    fn delete_payload(&self, payload: &Path) {
        if self.store.read().payload() == Some(payload) {
            debug!("payload {} referenced again, keeping it", payload.display());
            return;
        }
        match std::fs::remove_file(payload) {
            Ok(()) => debug!("deleted payload {}", payload.display()),
            Err(e) => warn!("cannot delete payload {}: {}", payload.display(), e),
        }
    }

    /// Clear `playing` when it contradicts the other lifecycle fields. Everything else
    /// belongs to ingestion.
    fn repair(&self, violation: InvariantViolation) {
        if !matches!(
            violation,
            InvariantViolation::PlayingWithoutPending | InvariantViolation::ListenedWhilePlaying
        ) {
            debug!("shared state inconsistent ({}), left to ingestion", violation);
            return;
        }
        error!("shared state inconsistent ({}); clearing playing", violation);
        let result = self.store.update(|s| {
            if s.lifecycle() == Err(violation) {
                s.playing = false;
            }
        });
        if let Err(e) = result {
            error!("cannot repair shared state: {}", e);
        }
    }

    pub async fn run(mut self, mut shutdown: Shutdown) -> Result<(), PlaybackError> {
        info!(
            "playback controller started (poll every {}ms)",
            self.poll_interval.as_millis()
        );
        self.recover_orphaned_playback();
        loop {
            self.step(&mut shutdown).await?;
            if shutdown.sleep(self.poll_interval).await {
                break;
            }
        }
        info!("playback controller stopped");
        Ok(())
    }
}
