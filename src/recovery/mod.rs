//! # Credential Recovery
//!
//! Second half of the connectivity recovery protocol. While the captive portal is up,
//! the portal form hands new WiFi credentials to `postbox credentials`, which ends up
//! in [`submit_credentials`]:
//!
//! 1. flag `user_input_ack` in the shared state so the lights acknowledge the
//!    submission,
//! 2. back up the current credentials file and atomically rewrite it,
//! 3. ask the supplicant to rejoin and verify reachability with the monitor's probe,
//! 4. on failure, restore the previous file and rejoin with it.
//!
//! The result is a binary [`JoinOutcome`]. Whether recovery mode ends is still the
//! connectivity monitor's decision, taken from its own next probe.

use crate::command::{run_command, CommandError};
use crate::logutil::EVENTS;
use crate::monitor::Probe;
use crate::storage::{write_atomic, StateStore, StoreError};
use crate::validation::{validate_passphrase, validate_ssid, wpa_quote, CredentialError};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Validated WiFi credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    ssid: String,
    passphrase: String,
}

impl Credentials {
    pub fn new(ssid: &str, passphrase: &str) -> Result<Self, CredentialError> {
        Ok(Self {
            ssid: validate_ssid(ssid)?.to_string(),
            passphrase: validate_passphrase(passphrase)?.to_string(),
        })
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn is_open(&self) -> bool {
        self.passphrase.is_empty()
    }

    /// The wpa_supplicant network block for these credentials.
    pub fn to_wpa_config(&self) -> String {
        let mut out = String::from("# Managed by postbox; replaced when new credentials are submitted\n");
        out.push_str("network={\n");
        out.push_str(&format!("\tssid={}\n", wpa_quote(&self.ssid)));
        if self.is_open() {
            out.push_str("\tkey_mgmt=NONE\n");
        } else {
            out.push_str(&format!("\tpsk={}\n", wpa_quote(&self.passphrase)));
            out.push_str("\tkey_mgmt=WPA-PSK\n");
        }
        out.push_str("}\n");
        out
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// Makes the network stack pick up the rewritten credentials file.
#[async_trait]
pub trait NetworkJoiner: Send + Sync {
    async fn join(&self) -> Result<(), CommandError>;
}

/// Joiner running a configured command such as `wpa_cli -i wlan0 reconfigure`.
#[derive(Debug, Clone)]
pub struct CommandJoiner {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandJoiner {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }
}

#[async_trait]
impl NetworkJoiner for CommandJoiner {
    async fn join(&self) -> Result<(), CommandError> {
        run_command(&self.argv, self.timeout).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    RolledBack,
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("credentials file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn io_error(path: &Path, source: std::io::Error) -> RecoveryError {
    RecoveryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub struct CredentialRecovery<J, P> {
    file: PathBuf,
    joiner: J,
    probe: P,
    verify_attempts: u32,
    verify_interval: Duration,
}

impl<J: NetworkJoiner, P: Probe> CredentialRecovery<J, P> {
    pub fn new(
        file: impl Into<PathBuf>,
        joiner: J,
        probe: P,
        verify_attempts: u32,
        verify_interval: Duration,
    ) -> Self {
        Self {
            file: file.into(),
            joiner,
            probe,
            verify_attempts: verify_attempts.max(1),
            verify_interval,
        }
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self
            .file
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "wpa_supplicant.conf".into());
        name.push(".bak");
        self.file.with_file_name(name)
    }

    /// Rewrite the credentials, join, verify, and roll back if the network cannot be
    /// reached with them.
    pub async fn apply(&self, credentials: &Credentials) -> Result<JoinOutcome, RecoveryError> {
        let backup = self.backup_path();
        let previous = match std::fs::read(&self.file) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(io_error(&self.file, e)),
        };
        if let Some(ref bytes) = previous {
            write_atomic(&backup, bytes).map_err(|e| io_error(&backup, e))?;
        }

        write_atomic(&self.file, credentials.to_wpa_config().as_bytes())
            .map_err(|e| io_error(&self.file, e))?;
        restrict_permissions(&self.file);
        info!(
            target: EVENTS,
            "credentials for '{}' written, joining network",
            credentials.ssid()
        );

        if self.join_and_verify().await {
            remove_if_present(&backup);
            info!(target: EVENTS, "joined '{}'", credentials.ssid());
            return Ok(JoinOutcome::Joined);
        }

        warn!(
            target: EVENTS,
            "could not reach the network through '{}', restoring previous credentials",
            credentials.ssid()
        );
        match previous {
            Some(bytes) => {
                write_atomic(&self.file, &bytes).map_err(|e| io_error(&self.file, e))?;
                restrict_permissions(&self.file);
            }
            None => remove_if_present(&self.file),
        }
        remove_if_present(&backup);
        if let Err(e) = self.joiner.join().await {
            warn!("rejoin with previous credentials failed: {}", e);
        }
        Ok(JoinOutcome::RolledBack)
    }

    async fn join_and_verify(&self) -> bool {
        if let Err(e) = self.joiner.join().await {
            warn!("join command failed: {}", e);
            return false;
        }
        for attempt in 1..=self.verify_attempts {
            tokio::time::sleep(self.verify_interval).await;
            if self.probe.reachable().await {
                return true;
            }
            debug!("verification probe {}/{} failed", attempt, self.verify_attempts);
        }
        false
    }
}

/// Entry point for the credential-submission collaborator: acknowledge the
/// submission in the shared state, then apply the credentials.
pub async fn submit_credentials<J: NetworkJoiner, P: Probe>(
    store: &StateStore,
    recovery: &CredentialRecovery<J, P>,
    credentials: &Credentials,
) -> Result<JoinOutcome, RecoveryError> {
    store.update(|s| s.user_input_ack = true)?;
    recovery.apply(credentials).await
}

fn remove_if_present(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!("cannot remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        warn!("cannot restrict permissions on {}: {}", path.display(), e);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}
