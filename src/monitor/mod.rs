//! # Connectivity Monitor
//!
//! Probes the network on a fixed interval and owns the `connectivity_lost` /
//! `recovery_active` fields of the shared state.
//!
//! ```text
//!  Connected ──fail──▶ Degraded(1) ──fail──▶ … Degraded(n) ──n·interval ≥ threshold──▶ RecoveryActive
//!      ▲                    │                                                             │
//!      └──────success───────┴──────────────success (portal teardown)──────────────────────┘
//! ```
//!
//! The portal is activated once per loss episode. Further failed probes while in
//! recovery do not touch it again unless the activation itself failed, in which case
//! each cycle retries it. Teardown failures are retried the same way on the next
//! successful probe.
//!
//! Each cycle ends by reconciling the persisted connectivity fields with the phase,
//! so a store write that failed is simply repeated next cycle.

pub mod portal;
pub mod probe;

use crate::logutil::EVENTS;
use crate::shutdown::Shutdown;
use crate::state::Connectivity;
use crate::storage::StateStore;
use log::{debug, error, info, warn};
use std::time::Duration;

pub use portal::{Portal, ScriptPortal};
pub use probe::{PingProbe, Probe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    Connected,
    /// Consecutive failed probes in the current episode.
    Degraded(u32),
    RecoveryActive,
}

pub struct ConnectivityMonitor<P, R> {
    store: StateStore,
    probe: P,
    portal: R,
    interval: Duration,
    threshold: Duration,
    phase: MonitorPhase,
    /// Activation succeeded during the current episode.
    portal_engaged: bool,
    /// A teardown is owed (recovery ended but deactivate has not succeeded yet).
    teardown_pending: bool,
}

impl<P: Probe, R: Portal> ConnectivityMonitor<P, R> {
    /// Build a monitor, resuming a recovery episode left in the store by a previous
    /// run. The portal is treated as not engaged so the next failed probe re-issues
    /// activation.
    pub fn new(store: StateStore, probe: P, portal: R, interval: Duration, threshold: Duration) -> Self {
        let persisted = store.read().connectivity();
        let (phase, teardown_pending) = match persisted {
            Connectivity::Online => (MonitorPhase::Connected, false),
            Connectivity::Lost => (MonitorPhase::RecoveryActive, false),
            Connectivity::Recovering => (MonitorPhase::RecoveryActive, true),
        };
        if phase == MonitorPhase::RecoveryActive {
            info!("resuming recovery episode recorded as {}", persisted);
        }
        Self {
            store,
            probe,
            portal,
            interval,
            threshold,
            phase,
            portal_engaged: false,
            teardown_pending,
        }
    }

    pub fn phase(&self) -> MonitorPhase {
        self.phase
    }

    /// What the shared state should say for the current phase.
    pub fn desired_connectivity(&self) -> Connectivity {
        match self.phase {
            MonitorPhase::Connected | MonitorPhase::Degraded(_) => Connectivity::Online,
            MonitorPhase::RecoveryActive if self.portal_engaged => Connectivity::Recovering,
            MonitorPhase::RecoveryActive => Connectivity::Lost,
        }
    }

    /// One probe, the resulting transition, and a state reconcile.
    pub async fn run_cycle(&mut self) -> MonitorPhase {
        let reachable = self.probe.reachable().await;
        self.observe(reachable).await;
        self.reconcile();
        self.phase
    }

    async fn observe(&mut self, reachable: bool) {
        if reachable {
            match self.phase {
                MonitorPhase::RecoveryActive => {
                    info!(target: EVENTS, "connectivity restored, leaving recovery mode");
                    self.teardown_pending = true;
                }
                MonitorPhase::Degraded(n) => debug!("network reachable again after {} failed probe(s)", n),
                MonitorPhase::Connected => {}
            }
            self.phase = MonitorPhase::Connected;
            self.portal_engaged = false;
            if self.teardown_pending {
                self.teardown_portal().await;
            }
            return;
        }

        let failures = match self.phase {
            MonitorPhase::Connected => 1,
            MonitorPhase::Degraded(n) => n.saturating_add(1),
            MonitorPhase::RecoveryActive => {
                if !self.portal_engaged {
                    self.engage_portal().await;
                }
                return;
            }
        };

        let lost_for = self.interval.saturating_mul(failures);
        if lost_for >= self.threshold {
            warn!(
                target: EVENTS,
                "connectivity lost for {}s ({} failed probes), entering recovery mode",
                lost_for.as_secs(),
                failures
            );
            self.phase = MonitorPhase::RecoveryActive;
            self.engage_portal().await;
        } else {
            info!("connectivity lost for {}s", lost_for.as_secs());
            self.phase = MonitorPhase::Degraded(failures);
        }
    }

    async fn engage_portal(&mut self) {
        match self.portal.activate().await {
            Ok(()) => {
                self.portal_engaged = true;
                self.teardown_pending = false;
                info!(target: EVENTS, "captive portal activated");
            }
            Err(e) => warn!("captive portal activation failed, retrying next cycle: {}", e),
        }
    }

    async fn teardown_portal(&mut self) {
        match self.portal.deactivate().await {
            Ok(()) => {
                self.teardown_pending = false;
                info!(target: EVENTS, "captive portal torn down");
            }
            Err(e) => warn!("captive portal teardown failed, retrying next cycle: {}", e),
        }
    }

    fn reconcile(&self) {
        let desired = self.desired_connectivity();
        let result = self.store.update(|state| {
            let before = state.connectivity();
            if before != desired {
                state.set_connectivity(desired);
            }
            before
        });
        match result {
            Ok(before) if before != desired => {
                info!("connectivity state {} -> {}", before, desired)
            }
            Ok(_) => {}
            Err(e) => error!("cannot record connectivity {}: {}; retrying next cycle", desired, e),
        }
    }

    pub async fn run(mut self, mut shutdown: Shutdown) {
        info!(
            "connectivity monitor started (interval {}s, threshold {}s)",
            self.interval.as_secs(),
            self.threshold.as_secs()
        );
        loop {
            self.run_cycle().await;
            if shutdown.sleep(self.interval).await {
                break;
            }
        }
        info!("connectivity monitor stopped");
    }
}
