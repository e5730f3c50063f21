//! # Message Ingestion
//!
//! Polls the remote source, downloads payloads and arms the lifecycle
//! (`Idle -> Pending`). It also closes the loop after playback: a `Listened` message
//! is acknowledged to the source and retired (`Listened -> Idle`).
//!
//! One cycle, in order:
//!
//! 1. skip while the monitor reports the network lost or recovery engaged,
//! 2. skip while a message is pending or playing (one armed message at a time),
//! 3. acknowledge and retire a listened message, whatever the acknowledgment says,
//! 4. otherwise poll; a descriptor is downloaded completely before anything is
//!    written, so a failed download leaves the shared state untouched.

pub mod download;
pub mod remote;

use crate::shutdown::Shutdown;
use crate::state::{Connectivity, InvariantViolation, Lifecycle, Transition};
use crate::storage::StateStore;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use download::{DownloadError, Downloader, HttpDownloader};
pub use remote::{HttpMessageSource, MessageDescriptor, MessageSource, SourceError};

/// What one ingestion cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Network lost or recovery engaged.
    SkippedOffline,
    /// A message is pending or playing.
    SkippedBusy,
    /// A listened message was retired; `confirmed` is the source's answer.
    Acknowledged { id: Option<String>, confirmed: bool },
    Armed { id: String },
    NoMessage,
    SourceFailed,
    DownloadFailed,
    /// Downloaded, but the state could not be armed; the payload was discarded.
    ArmFailed,
    /// Fields owned by ingestion were reset after an inconsistency.
    Repaired(InvariantViolation),
    /// Inconsistency in fields another component owns; nothing done.
    Inconsistent(InvariantViolation),
}

pub struct MessageIngestion<S, D> {
    store: StateStore,
    source: S,
    downloader: D,
    download_dir: PathBuf,
    poll_interval: Duration,
    pending_interval: Duration,
}

impl<S: MessageSource, D: Downloader> MessageIngestion<S, D> {
    pub fn new(
        store: StateStore,
        source: S,
        downloader: D,
        download_dir: impl Into<PathBuf>,
        poll_interval: Duration,
        pending_interval: Duration,
    ) -> Self {
        Self {
            store,
            source,
            downloader,
            download_dir: download_dir.into(),
            poll_interval,
            pending_interval,
        }
    }

    pub async fn run_cycle(&self) -> CycleOutcome {
        let state = self.store.read();
        if state.connectivity() != Connectivity::Online {
            debug!("network {}, not polling", state.connectivity());
            return CycleOutcome::SkippedOffline;
        }
        match state.lifecycle() {
            Ok(Lifecycle::Pending { .. }) | Ok(Lifecycle::Playing { .. }) => CycleOutcome::SkippedBusy,
            Ok(Lifecycle::Listened { id }) => self.acknowledge(id).await,
            Ok(Lifecycle::Idle) => self.poll_and_arm().await,
            Err(violation) => self.repair(violation),
        }
    }

    async fn acknowledge(&self, id: Option<String>) -> CycleOutcome {
        let confirmed = match id.as_deref() {
            Some(id) => {
                let ok = self.source.acknowledge(id).await;
                if ok {
                    info!("message {} acknowledged", id);
                } else {
                    warn!("message {} not acknowledged by source; retiring it locally", id);
                }
                ok
            }
            None => {
                warn!("listened message has no id, nothing to acknowledge");
                false
            }
        };

        match self.store.update(|s| s.transition(Transition::Retire)) {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!("message already retired elsewhere: {}", e),
            Err(e) => error!("cannot retire listened message: {}; retrying next cycle", e),
        }
        CycleOutcome::Acknowledged { id, confirmed }
    }

    async fn poll_and_arm(&self) -> CycleOutcome {
        let descriptor = match self.source.poll().await {
            Ok(Some(d)) => d,
            Ok(None) => {
                debug!("no new message");
                return CycleOutcome::NoMessage;
            }
            Err(e) => {
                warn!("polling message source failed: {}", e);
                return CycleOutcome::SourceFailed;
            }
        };

        info!("message {} announced, downloading {}", descriptor.id, descriptor.payload_url);
        let payload = match self.downloader.fetch(&descriptor.payload_url).await {
            Ok(path) => path,
            Err(e) => {
                warn!(
                    "download of message {} failed, retrying next cycle: {}",
                    descriptor.id, e
                );
                return CycleOutcome::DownloadFailed;
            }
        };

        let arm = Transition::Arm {
            id: descriptor.id.clone(),
            payload: payload.clone(),
        };
        match self.store.update(|s| s.transition(arm)) {
            Ok(Ok(_)) => {
                info!("message {} armed at {}", descriptor.id, payload.display());
                CycleOutcome::Armed { id: descriptor.id }
            }
            Ok(Err(e)) => {
                warn!("state changed while downloading message {} ({}); discarding payload", descriptor.id, e);
                remove_payload(&payload);
                CycleOutcome::ArmFailed
            }
            Err(e) => {
                error!("cannot arm message {}: {}; discarding payload", descriptor.id, e);
                remove_payload(&payload);
                CycleOutcome::ArmFailed
            }
        }
    }

    /// Reset message fields ingestion owns. Violations in `playing` belong to the
    /// playback controller and are only reported.
    fn repair(&self, violation: InvariantViolation) -> CycleOutcome {
        match violation {
            InvariantViolation::PendingWithoutPayload
            | InvariantViolation::PendingWithoutId
            | InvariantViolation::StrayPayload
            | InvariantViolation::ListenedWhilePending => {}
            other => {
                warn!("shared state inconsistent ({}); waiting for its owner", other);
                return CycleOutcome::Inconsistent(other);
            }
        }

        error!("shared state inconsistent ({}); clearing message fields owned by ingestion", violation);
        let result = self.store.update(|s| {
            if s.lifecycle() != Err(violation) {
                return None;
            }
            let stray = s.payload_ref.take();
            match violation {
                InvariantViolation::PendingWithoutPayload | InvariantViolation::PendingWithoutId => {
                    s.message_pending = false;
                    s.message_id = None;
                }
                InvariantViolation::ListenedWhilePending => s.message_pending = false,
                _ => {}
            }
            stray
        });
        match result {
            Ok(Some(stray)) => remove_payload(&stray),
            Ok(None) => {}
            Err(e) => error!("cannot repair shared state: {}", e),
        }
        CycleOutcome::Repaired(violation)
    }

    /// Delete files in the download directory that the shared state does not
    /// reference: leftovers of crashes between download and arming, or of resets.
    pub fn sweep_orphans(&self) -> usize {
        let referenced = self.store.read().payload_ref;
        let entries = match std::fs::read_dir(&self.download_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!("cannot scan {}: {}", self.download_dir.display(), e);
                return 0;
            }
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || referenced.as_deref() == Some(path.as_path()) {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!("removed orphaned payload {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("cannot remove orphaned payload {}: {}", path.display(), e),
            }
        }
        if removed > 0 {
            info!("removed {} orphaned payload file(s)", removed);
        }
        removed
    }

    pub async fn run(self, mut shutdown: Shutdown) {
        info!(
            "message ingestion started (poll every {}s)",
            self.poll_interval.as_secs()
        );
        self.sweep_orphans();
        loop {
            let wait = match self.run_cycle().await {
                CycleOutcome::SkippedBusy | CycleOutcome::Acknowledged { .. } => self.pending_interval,
                _ => self.poll_interval,
            };
            if shutdown.sleep(wait).await {
                break;
            }
        }
        info!("message ingestion stopped");
    }
}

fn remove_payload(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("cannot remove payload {}: {}", path.display(), e);
        }
    }
}
