use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::error::ClusterError;
use crate::member::NodeIdentity;
use crate::secret::ClusterSecret;

pub const DEFAULT_GOSSIP_PORT: u16 = 7946;
pub const DEFAULT_HTTP_PORT: u16 = 8888;
pub const DEFAULT_PROBE_PORT: u16 = 80;
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_LEAVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timers and fan-out of the gossip protocol.
#[derive(Debug, Clone)]
pub struct GossipTuning {
    /// Period between failure-detector probes.
    pub probe_interval: Duration,
    /// How long a direct ping waits for its ack before going indirect.
    pub probe_timeout: Duration,
    /// Peers asked to ping a silent member on our behalf.
    pub indirect_checks: usize,
    pub suspicion_mult: u32,
    pub retransmit_mult: u32,
    pub gossip_interval: Duration,
    pub gossip_nodes: usize,
    /// Full-state anti-entropy exchange with one random peer.
    pub push_pull_interval: Duration,
    /// How long Dead/Left members are remembered before removal.
    pub dead_retention: Duration,
    pub join_attempts: u32,
    pub join_timeout: Duration,
    pub max_piggyback: usize,
    /// Upper bound on one sealed datagram. Full-state exchanges larger than
    /// this are split into several parts.
    pub max_frame: usize,
}

impl Default for GossipTuning {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_millis(200),
            indirect_checks: 3,
            suspicion_mult: 4,
            retransmit_mult: 3,
            gossip_interval: Duration::from_millis(100),
            gossip_nodes: 3,
            push_pull_interval: Duration::from_secs(15),
            dead_retention: Duration::from_secs(15),
            join_attempts: 3,
            join_timeout: Duration::from_secs(1),
            max_piggyback: 16,
            max_frame: 1400,
        }
    }
}

impl GossipTuning {
    /// Time a member stays Suspect before it is declared Dead.
    ///
    /// Grows with log10 of the cluster size so larger clusters get more
    /// time for the refutation to reach the suspect.
    pub fn suspicion_timeout(&self, members: usize) -> Duration {
        let scale = (members.max(1) as f64).log10().max(1.0);
        self.probe_interval
            .mul_f64(self.suspicion_mult as f64 * scale)
    }

    /// Number of times a single update is retransmitted.
    pub fn retransmit_limit(&self, members: usize) -> u32 {
        let scale = ((members + 1) as f64).log10().ceil() as u32;
        self.retransmit_mult * scale.max(1)
    }
}

/// Everything the membership engine needs to start.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub bind_addr: SocketAddr,
    pub secret: ClusterSecret,
    pub tuning: GossipTuning,
}

impl TransportConfig {
    /// Resolves the bind address, identity and key for a node.
    ///
    /// The bind address doubles as the name peers use to reach this node,
    /// so the unspecified address is rejected. Port 0 is allowed and is
    /// replaced by the kernel-assigned port once bound.
    pub fn resolve(
        bind_ip: IpAddr,
        gossip_port: u16,
        secret: ClusterSecret,
    ) -> Result<Self, ClusterError> {
        if bind_ip.is_unspecified() || bind_ip.is_multicast() {
            return Err(ClusterError::Config(format!(
                "bind ip {} cannot identify a node",
                bind_ip
            )));
        }
        Ok(Self {
            bind_addr: SocketAddr::new(bind_ip, gossip_port),
            secret,
            tuning: GossipTuning::default(),
        })
    }

    pub fn with_tuning(mut self, tuning: GossipTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity(self.bind_addr)
    }
}

/// Parses a seed given either as `ip` or `ip:port`.
pub fn parse_seed(text: &str, default_port: u16) -> Result<SocketAddr, ClusterError> {
    let text = text.trim();
    if let Ok(addr) = text.parse::<SocketAddr>() {
        return Ok(addr);
    }
    text.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, default_port))
        .map_err(|_| ClusterError::Config(format!("invalid seed address {:?}", text)))
}

/// Settings for health probing and the report endpoint.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub probe_port: u16,
    pub probe_timeout: Duration,
    /// Upper bound on probes in flight for one report.
    pub max_concurrent_probes: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_port: DEFAULT_PROBE_PORT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_concurrent_probes: 64,
        }
    }
}
