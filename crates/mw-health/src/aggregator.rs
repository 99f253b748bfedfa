use futures::stream::{self, StreamExt};
use mw_core::{HealthConfig, MemberRecord};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::probe::{Prober, TcpProbe};
use crate::report::{HealthEntry, HealthReport};

/// Fans health probes out over a membership snapshot.
pub struct HealthAggregator {
    prober: Arc<dyn Prober>,
    config: HealthConfig,
}

impl HealthAggregator {
    pub fn new(config: HealthConfig) -> Self {
        Self::with_prober(Arc::new(TcpProbe), config)
    }

    pub fn with_prober(prober: Arc<dyn Prober>, config: HealthConfig) -> Self {
        Self { prober, config }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Probes every member concurrently and waits for all of them.
    ///
    /// At most `max_concurrent_probes` run at once, so latency tracks the
    /// slowest probe rather than the sum. Entries keep the order of
    /// `members`, not completion order. Never fails: an unreachable member
    /// is a DOWN entry.
    pub async fn build_report(&self, members: &[MemberRecord]) -> HealthReport {
        let port = self.config.probe_port;
        let timeout = self.config.probe_timeout;

        let probes: Vec<_> = members
            .iter()
            .map(|member| {
                let target = SocketAddr::new(member.address.addr().ip(), port);
                let prober = Arc::clone(&self.prober);
                async move {
                    HealthEntry {
                        ip: target.to_string(),
                        status: prober.probe_addr(target, timeout).await,
                    }
                }
            })
            .collect();

        let entries = stream::iter(probes)
            .buffered(self.config.max_concurrent_probes.max(1))
            .collect::<Vec<_>>()
            .await;

        tracing::debug!(members = members.len(), "health report built");
        HealthReport { entries }
    }
}
