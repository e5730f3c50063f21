//! Audio playback collaborator.

use crate::logutil::escape_log;
use async_trait::async_trait;
use log::debug;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    /// The player ran but could not render the payload.
    Failed(String),
    /// Stopped from outside before the end.
    Interrupted,
}

/// Plays one payload to the end. Dropping the returned future must stop playback.
#[async_trait]
pub trait Player: Send + Sync {
    async fn play(&self, path: &Path) -> PlaybackOutcome;
}

/// Runs the configured player command with the payload path appended.
#[derive(Debug, Clone)]
pub struct CommandPlayer {
    argv: Vec<String>,
}

impl CommandPlayer {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

#[async_trait]
impl Player for CommandPlayer {
    async fn play(&self, path: &Path) -> PlaybackOutcome {
        let Some((program, args)) = self.argv.split_first() else {
            return PlaybackOutcome::Failed("no player command configured".into());
        };
        debug!("playing {} with {}", path.display(), program);

        let child = Command::new(program)
            .args(args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => return PlaybackOutcome::Failed(format!("cannot start {}: {}", program, e)),
        };

        let output = match child.wait_with_output().await {
            Ok(output) => output,
            Err(e) => return PlaybackOutcome::Failed(format!("{} failed: {}", program, e)),
        };
        if output.status.success() {
            return PlaybackOutcome::Completed;
        }
        if killed_by_signal(&output.status) {
            return PlaybackOutcome::Interrupted;
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        PlaybackOutcome::Failed(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            escape_log(stderr.trim())
        ))
    }
}

#[cfg(unix)]
fn killed_by_signal(status: &std::process::ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal().is_some()
}

#[cfg(not(unix))]
fn killed_by_signal(_status: &std::process::ExitStatus) -> bool {
    false
}
