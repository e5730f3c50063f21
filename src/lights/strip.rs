//! Light output back-ends.

use super::pattern::Rgb;
use log::{debug, trace};
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// Shows a frame. Calls must return quickly; the presenter drives frame timing.
pub trait LightStrip: Send {
    fn set_pattern(&mut self, frame: &[Rgb]) -> io::Result<()>;
}

impl<T: LightStrip + ?Sized> LightStrip for Box<T> {
    fn set_pattern(&mut self, frame: &[Rgb]) -> io::Result<()> {
        (**self).set_pattern(frame)
    }
}

/// Logs frames at trace level. Used when no pixel driver is attached.
#[derive(Debug, Default)]
pub struct LogStrip {
    last: Vec<Rgb>,
}

impl LogStrip {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LightStrip for LogStrip {
    fn set_pattern(&mut self, frame: &[Rgb]) -> io::Result<()> {
        if frame != self.last.as_slice() {
            trace!(
                "frame {}",
                frame
                    .iter()
                    .map(|px| format!("{:02x}{:02x}{:02x}", px.r, px.g, px.b))
                    .collect::<Vec<_>>()
                    .join(" ")
            );
            self.last = frame.to_vec();
        }
        Ok(())
    }
}

/// Writes each frame as raw `r g b` bytes for an external pixel driver. A regular file
/// always holds the latest frame; a FIFO receives the stream. The output is reopened
/// after a write error, for example when the driver restarts.
#[derive(Debug)]
pub struct FrameSink {
    path: PathBuf,
    file: Option<File>,
}

impl FrameSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.file.is_none() {
            let file = OpenOptions::new().write(true).create(true).open(&self.path)?;
            debug!("light output {} opened", self.path.display());
            self.file = Some(file);
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        if file.metadata()?.is_file() {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
        }
        file.write_all(bytes)?;
        file.flush()
    }
}

impl LightStrip for FrameSink {
    fn set_pattern(&mut self, frame: &[Rgb]) -> io::Result<()> {
        let bytes: Vec<u8> = frame.iter().flat_map(|px| [px.r, px.g, px.b]).collect();
        let result = self.write_frame(&bytes);
        if result.is_err() {
            self.file = None;
        }
        result
    }
}
