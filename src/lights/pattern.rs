//! Visual patterns and frame generation.

use crate::state::DeviceState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    fn scaled(self, brightness: u8) -> Rgb {
        let scale = |c: u8| ((c as u16 * brightness as u16) / 255) as u8;
        Rgb::new(scale(self.r), scale(self.g), scale(self.b))
    }
}

pub type Frame = Vec<Rgb>;

const ALERT: Rgb = Rgb::new(255, 0, 0);
const WARM_WHITE: Rgb = Rgb::new(255, 147, 41);
const ACK_GREEN: Rgb = Rgb::new(0, 255, 0);

/// Frames in one cycle of the pending and playing pulses.
pub const PULSE_FRAMES: u32 = 256;
/// Frames in one acknowledgment pulse.
const ACK_PULSE_FRAMES: u32 = 30;

/// Patterns in priority order, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Alert,
    Nightlight,
    Acknowledge,
    Playing,
    Pending,
    Off,
}

impl Pattern {
    pub fn name(&self) -> &'static str {
        match self {
            Pattern::Alert => "alert",
            Pattern::Nightlight => "nightlight",
            Pattern::Acknowledge => "acknowledge",
            Pattern::Playing => "playing",
            Pattern::Pending => "pending",
            Pattern::Off => "off",
        }
    }

    /// Patterns that change from frame to frame.
    pub fn is_animated(&self) -> bool {
        matches!(self, Pattern::Acknowledge | Pattern::Playing | Pattern::Pending)
    }

    /// Frame `tick` of this pattern for `led_count` pixels at global `brightness`.
    pub fn render(&self, tick: u32, led_count: usize, brightness: u8) -> Frame {
        let frame: Frame = match self {
            Pattern::Off => vec![Rgb::OFF; led_count],
            Pattern::Alert => vec![ALERT; led_count],
            Pattern::Nightlight => vec![WARM_WHITE; led_count],
            Pattern::Acknowledge => {
                let phase = (tick % ACK_PULSE_FRAMES) as f64 / ACK_PULSE_FRAMES as f64;
                let level = (std::f64::consts::PI * phase).sin();
                vec![dim(ACK_GREEN, level); led_count]
            }
            Pattern::Playing => {
                let level = sine_level(tick, PULSE_FRAMES / 2);
                vec![Rgb::new(0, 0, level); led_count]
            }
            Pattern::Pending => {
                let level = sine_level(tick, PULSE_FRAMES);
                (0..led_count)
                    .map(|i| match i % 3 {
                        0 => Rgb::new(level, 0, 0),
                        1 => Rgb::new(0, level, 0),
                        _ => Rgb::new(0, 0, level),
                    })
                    .collect()
            }
        };
        frame.into_iter().map(|px| px.scaled(brightness)).collect()
    }
}

/// `(sin(tick·π/half_period) + 1) · 127.5`, cycling once every `2·half_period` ticks.
fn sine_level(tick: u32, half_period: u32) -> u8 {
    let angle = (tick % (2 * half_period)) as f64 * std::f64::consts::PI / half_period as f64;
    ((angle.sin() + 1.0) * 127.5) as u8
}

fn dim(color: Rgb, level: f64) -> Rgb {
    let level = level.clamp(0.0, 1.0);
    let f = |c: u8| (c as f64 * level).round() as u8;
    Rgb::new(f(color.r), f(color.g), f(color.b))
}

/// The pattern a state calls for.
pub fn select_pattern(state: &DeviceState) -> Pattern {
    if state.connectivity_lost || state.recovery_active {
        Pattern::Alert
    } else if state.nightlight_mode {
        Pattern::Nightlight
    } else if state.user_input_ack {
        Pattern::Acknowledge
    } else if state.playing {
        Pattern::Playing
    } else if state.message_pending {
        Pattern::Pending
    } else {
        Pattern::Off
    }
}

/// Linear blend, `step` of `steps` of the way from `from` to `to`. Missing pixels in
/// `from` count as off.
pub fn fade(from: &[Rgb], to: &[Rgb], step: u32, steps: u32) -> Frame {
    let steps = steps.max(1) as i32;
    let step = (step as i32).min(steps);
    let mix = |a: u8, b: u8| (a as i32 + (b as i32 - a as i32) * step / steps) as u8;
    to.iter()
        .enumerate()
        .map(|(i, target)| {
            let start = from.get(i).copied().unwrap_or(Rgb::OFF);
            Rgb::new(mix(start.r, target.r), mix(start.g, target.g), mix(start.b, target.b))
        })
        .collect()
}
