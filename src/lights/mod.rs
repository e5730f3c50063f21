//! # Feedback Presenter
//!
//! Turns the shared state into light patterns. The presenter only reads the state,
//! with one exception: once the acknowledgment pulse has been shown it clears
//! `user_input_ack`.
//!
//! Frames are produced one at a time by [`Presenter::step`], and the state is re-read
//! whenever `state_check_interval_ms` has passed, so a long animation never hides a
//! state change for longer than that interval. Pattern changes fade from the last
//! shown frame over `fade_steps` frames.

pub mod pattern;
pub mod strip;

use crate::config::LightsConfig;
use crate::shutdown::Shutdown;
use crate::storage::StateStore;
use log::{debug, error, info, warn};
use std::time::{Duration, Instant};

pub use pattern::{fade, select_pattern, Frame, Pattern, Rgb};
pub use strip::{FrameSink, LightStrip, LogStrip};

struct Fade {
    from: Frame,
    step: u32,
}

pub struct Presenter<L> {
    store: StateStore,
    strip: L,
    config: LightsConfig,
    pattern: Pattern,
    tick: u32,
    shown: Frame,
    fade: Option<Fade>,
    ack_remaining: u32,
    last_check: Option<Instant>,
    output_failing: bool,
}

impl<L: LightStrip> Presenter<L> {
    pub fn new(store: StateStore, strip: L, config: LightsConfig) -> Self {
        let shown = vec![Rgb::OFF; config.led_count];
        Self {
            store,
            strip,
            config,
            pattern: Pattern::Off,
            tick: 0,
            shown,
            fade: None,
            ack_remaining: 0,
            last_check: None,
            output_failing: false,
        }
    }

    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    /// The frame most recently sent to the strip.
    pub fn shown(&self) -> &[Rgb] {
        &self.shown
    }

    pub fn strip(&self) -> &L {
        &self.strip
    }

    /// Re-read the state now and switch pattern if it calls for another one.
    pub fn refresh(&mut self) -> Pattern {
        self.last_check = Some(Instant::now());
        let next = select_pattern(&self.store.read());
        if next != self.pattern {
            debug!("lights: {} -> {}", self.pattern.name(), next.name());
            self.fade = Some(Fade {
                from: self.shown.clone(),
                step: 0,
            });
            self.pattern = next;
            self.tick = 0;
            if next == Pattern::Acknowledge {
                self.ack_remaining = self.config.ack_frames.max(1);
            }
        } else if next == Pattern::Acknowledge && self.ack_remaining == 0 {
            // Resubmitted right after the previous pulse was cleared.
            debug!("lights: acknowledgment requested again");
            self.ack_remaining = self.config.ack_frames.max(1);
        }
        self.pattern
    }

    fn check_interval(&self) -> Duration {
        Duration::from_millis(self.config.state_check_interval_ms)
    }

    fn frame_interval(&self) -> Duration {
        let ms = match self.pattern {
            Pattern::Playing => self.config.playing_frame_ms,
            Pattern::Pending | Pattern::Acknowledge => self.config.pending_frame_ms,
            Pattern::Alert | Pattern::Nightlight | Pattern::Off => self.config.state_check_interval_ms,
        };
        Duration::from_millis(ms)
    }

    /// Show one frame and return how long to wait before the next one.
    pub fn step(&mut self) -> Duration {
        let due = self
            .last_check
            .map_or(true, |at| at.elapsed() >= self.check_interval());
        if due {
            self.refresh();
        }

        let target = self
            .pattern
            .render(self.tick, self.config.led_count, self.config.brightness);
        let mut wait = self.frame_interval();
        let frame = match self.fade.as_mut() {
            Some(f) => {
                f.step += 1;
                let frame = fade(&f.from, &target, f.step, self.config.fade_steps);
                if f.step >= self.config.fade_steps {
                    self.fade = None;
                }
                wait = Duration::from_millis(self.config.fade_frame_ms);
                frame
            }
            None => {
                if self.pattern.is_animated() {
                    self.tick = self.tick.wrapping_add(1);
                }
                if self.pattern == Pattern::Acknowledge {
                    self.count_ack_frame();
                }
                target
            }
        };
        self.show(frame);

        let until_check = self
            .last_check
            .map_or(Duration::ZERO, |at| self.check_interval().saturating_sub(at.elapsed()));
        wait.min(until_check)
    }

    fn count_ack_frame(&mut self) {
        self.ack_remaining = self.ack_remaining.saturating_sub(1);
        if self.ack_remaining > 0 {
            return;
        }
        match self.store.update(|s| s.user_input_ack = false) {
            Ok(()) => {
                debug!("acknowledgment shown, cleared user_input_ack");
                self.last_check = None;
            }
            Err(e) => {
                error!("cannot clear user_input_ack: {}", e);
                self.ack_remaining = self.config.ack_frames.max(1);
            }
        }
    }

    fn show(&mut self, frame: Frame) {
        match self.strip.set_pattern(&frame) {
            Ok(()) => {
                if self.output_failing {
                    info!("light output recovered");
                    self.output_failing = false;
                }
            }
            Err(e) => {
                if !self.output_failing {
                    warn!("cannot update lights: {}", e);
                    self.output_failing = true;
                }
            }
        }
        self.shown = frame;
    }

    pub async fn run(mut self, mut shutdown: Shutdown) {
        info!(
            "feedback presenter started ({} LEDs, state checked every {}ms)",
            self.config.led_count, self.config.state_check_interval_ms
        );
        loop {
            let wait = self.step();
            if shutdown.sleep(wait).await {
                break;
            }
        }
        self.show(vec![Rgb::OFF; self.config.led_count]);
        info!("feedback presenter stopped, lights off");
    }
}
