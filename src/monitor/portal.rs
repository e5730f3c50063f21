//! Captive-portal control.

use crate::command::{run_command, CommandError};
use async_trait::async_trait;
use std::time::Duration;

/// Brings the local configuration portal up and down. Both calls must be safe to
/// repeat.
#[async_trait]
pub trait Portal: Send + Sync {
    async fn activate(&self) -> Result<(), CommandError>;
    async fn deactivate(&self) -> Result<(), CommandError>;
}

/// Portal driven by two configured shell commands (typically an install script that
/// configures hostapd/dnsmasq and a `pkill` of the portal server).
#[derive(Debug, Clone)]
pub struct ScriptPortal {
    activate: Vec<String>,
    deactivate: Vec<String>,
    timeout: Duration,
}

impl ScriptPortal {
    pub fn new(activate: Vec<String>, deactivate: Vec<String>, timeout: Duration) -> Self {
        Self {
            activate,
            deactivate,
            timeout,
        }
    }
}

#[async_trait]
impl Portal for ScriptPortal {
    async fn activate(&self) -> Result<(), CommandError> {
        run_command(&self.activate, self.timeout).await
    }

    async fn deactivate(&self) -> Result<(), CommandError> {
        run_command(&self.deactivate, self.timeout).await
    }
}
