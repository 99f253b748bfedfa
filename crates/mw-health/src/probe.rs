use async_trait::async_trait;
use mw_core::ProbeError;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProbeStatus {
    Up,
    Down,
}

/// Reachability of one target, consumed immediately by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub target: SocketAddr,
    pub status: ProbeStatus,
}

/// A bounded-time reachability check.
///
/// Failure to connect is an outcome, not an error: implementations always
/// return a status and must give up once `timeout` has elapsed.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe_addr(&self, target: SocketAddr, timeout: Duration) -> ProbeStatus;
}

/// TCP connect probe: UP if the handshake completes within the timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

impl TcpProbe {
    /// Probes `address:port`; only an unparsable address is an error.
    pub async fn probe(
        &self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<ProbeResult, ProbeError> {
        let ip = parse_ip(address)?;
        let target = SocketAddr::new(ip, port);
        Ok(ProbeResult {
            target,
            status: self.probe_addr(target, timeout).await,
        })
    }
}

#[async_trait]
impl Prober for TcpProbe {
    async fn probe_addr(&self, target: SocketAddr, timeout: Duration) -> ProbeStatus {
        match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
            Ok(Ok(_stream)) => ProbeStatus::Up,
            Ok(Err(e)) => {
                tracing::debug!(%target, error = %e, "probe connect failed");
                ProbeStatus::Down
            }
            Err(_) => {
                tracing::debug!(%target, ?timeout, "probe timed out");
                ProbeStatus::Down
            }
        }
    }
}

fn parse_ip(address: &str) -> Result<IpAddr, ProbeError> {
    let trimmed = address.trim();
    let bare = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);
    bare.parse()
        .map_err(|_| ProbeError::InvalidAddress(address.to_string()))
}
