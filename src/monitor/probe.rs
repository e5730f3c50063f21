//! Network reachability probes.

use crate::command::run_command;
use async_trait::async_trait;
use log::trace;
use std::time::Duration;

/// One reachability check. A probe never errors: anything that is not a clear
/// success reads as "unreachable right now".
#[async_trait]
pub trait Probe: Send + Sync {
    async fn reachable(&self) -> bool;
}

/// `ping -c 1 -W <timeout> <host>`.
#[derive(Debug, Clone)]
pub struct PingProbe {
    host: String,
    timeout: Duration,
}

impl PingProbe {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            timeout,
        }
    }

    fn argv(&self) -> Vec<String> {
        vec![
            "ping".to_string(),
            "-c".to_string(),
            "1".to_string(),
            "-W".to_string(),
            self.timeout.as_secs().max(1).to_string(),
            self.host.clone(),
        ]
    }
}

#[async_trait]
impl Probe for PingProbe {
    async fn reachable(&self) -> bool {
        // ping enforces -W itself; the outer bound only catches a wedged resolver
        let outer = self.timeout + Duration::from_secs(3);
        match run_command(&self.argv(), outer).await {
            Ok(()) => true,
            Err(e) => {
                trace!("probe of {} failed: {}", self.host, e);
                false
            }
        }
    }
}
