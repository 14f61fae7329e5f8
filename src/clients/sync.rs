//! Reachability and sync probing for a single physical client.

use std::time::{Duration, SystemTime};
use tokio::time::timeout;

use crate::clients::traits::NodeClient;
use crate::clients::types::{ClientRole, EndpointHealth, EndpointStatus, SyncProgress};

/// Stateless prober. Every probe is bounded by `timeout`; a timeout counts
/// as unreachable.
#[derive(Debug, Clone, Copy)]
pub struct SyncStatusChecker {
    timeout: Duration,
    max_sync_lag: u64,
}

impl SyncStatusChecker {
    /// # Arguments
    /// * `timeout` - Upper bound for one probe
    /// * `max_sync_lag` - Largest lag still considered synced
    pub fn new(timeout: Duration, max_sync_lag: u64) -> Self {
        Self {
            timeout,
            max_sync_lag,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe one client. Never fails; failures become `Unreachable`.
    pub async fn probe<C>(&self, role: ClientRole, client: &C) -> EndpointStatus
    where
        C: NodeClient + ?Sized,
    {
        let health = match timeout(self.timeout, client.sync_status()).await {
            Ok(Ok(progress)) => self.classify(progress),
            Ok(Err(e)) => {
                tracing::debug!(endpoint = %client.name(), role = %role, error = %e, "Probe failed");
                EndpointHealth::Unreachable {
                    reason: e.to_string(),
                }
            }
            Err(_) => {
                tracing::debug!(endpoint = %client.name(), role = %role, "Probe timed out");
                EndpointHealth::Unreachable {
                    reason: format!("probe timed out after {:?}", self.timeout),
                }
            }
        };

        EndpointStatus {
            role,
            name: client.name().to_string(),
            health,
            checked_at: SystemTime::now(),
        }
    }

    /// Map a raw sync report onto a health value.
    pub fn classify(&self, progress: SyncProgress) -> EndpointHealth {
        if !progress.is_syncing || progress.lag <= self.max_sync_lag {
            EndpointHealth::Synced {
                head: progress.head,
            }
        } else {
            EndpointHealth::Syncing {
                head: progress.head,
                lag: progress.lag,
            }
        }
    }
}
