//! Physical trigger sensor and edge detection.

use std::io;
use std::path::PathBuf;

/// Instantaneous sensor level. `true` means the trigger is currently present.
pub trait Sensor: Send {
    fn is_triggered(&mut self) -> io::Result<bool>;
}

/// Reads a sysfs-style GPIO value file (`0`/`1`).
#[derive(Debug, Clone)]
pub struct GpioValueSensor {
    path: PathBuf,
    active_low: bool,
}

impl GpioValueSensor {
    pub fn new(path: impl Into<PathBuf>, active_low: bool) -> Self {
        Self {
            path: path.into(),
            active_low,
        }
    }
}

impl Sensor for GpioValueSensor {
    fn is_triggered(&mut self) -> io::Result<bool> {
        let raw = std::fs::read_to_string(&self.path)?;
        let high = match raw.trim() {
            "1" => true,
            "0" => false,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected GPIO value {:?}", other),
                ))
            }
        };
        Ok(high != self.active_low)
    }
}

/// Turns sampled levels into rising-edge events. A level must be absent at least once
/// and then held for `debounce` consecutive samples before it fires, and it fires once
/// per hold.
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    debounce: u32,
    /// Consecutive high samples since the last low one. `None` until a low sample
    /// has been seen, so a level present at startup never fires.
    high_run: Option<u32>,
}

impl EdgeDetector {
    pub fn new(debounce: u32) -> Self {
        Self {
            debounce: debounce.max(1),
            high_run: None,
        }
    }

    /// Feed one sample; `true` exactly when a debounced rising edge completes.
    pub fn sample(&mut self, level: bool) -> bool {
        if !level {
            self.high_run = Some(0);
            return false;
        }
        match self.high_run {
            None => false,
            Some(run) => {
                let run = run.saturating_add(1);
                self.high_run = Some(run);
                run == self.debounce
            }
        }
    }

    /// Forget the last level. A high level must be seen low again before it can fire.
    pub fn reset(&mut self) {
        self.high_run = None;
    }
}
