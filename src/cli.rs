use clap::{Args, Parser, Subcommand};
use mw_core::config::{DEFAULT_GOSSIP_PORT, DEFAULT_HTTP_PORT, DEFAULT_PROBE_PORT};
use mw_core::HealthConfig;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "memberwatch", version, about = "Gossip cluster membership with an HTTP health view")]
pub struct Cli {
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, env = "MEMBERWATCH_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a new cluster and print its key.
    Init(InitArgs),
    /// Join an existing cluster through a known member.
    Join(JoinArgs),
}

#[derive(Debug, Clone, Args)]
pub struct NodeArgs {
    #[arg(long, env = "MEMBERWATCH_BIND_IP", default_value = "127.0.0.1")]
    pub bind_ip: IpAddr,

    #[arg(long, env = "MEMBERWATCH_HTTP_PORT", default_value_t = DEFAULT_HTTP_PORT)]
    pub http_port: u16,

    #[arg(long, env = "MEMBERWATCH_GOSSIP_PORT", default_value_t = DEFAULT_GOSSIP_PORT)]
    pub gossip_port: u16,

    /// TCP port probed on every member.
    #[arg(long, env = "MEMBERWATCH_PROBE_PORT", default_value_t = DEFAULT_PROBE_PORT)]
    pub probe_port: u16,

    #[arg(long, env = "MEMBERWATCH_PROBE_TIMEOUT_MS", default_value_t = 5000)]
    pub probe_timeout_ms: u64,
}

impl NodeArgs {
    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            probe_port: self.probe_port,
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            ..HealthConfig::default()
        }
    }

    /// The report server listens on every interface.
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.http_port)
    }
}

#[derive(Debug, Clone, Args)]
pub struct InitArgs {
    #[command(flatten)]
    pub node: NodeArgs,
}

#[derive(Debug, Clone, Args)]
pub struct JoinArgs {
    #[command(flatten)]
    pub node: NodeArgs,

    /// Base64 key printed by `init`.
    #[arg(long, env = "MEMBERWATCH_CLUSTER_KEY")]
    pub cluster_key: String,

    /// Any current member, as `ip` or `ip:port`.
    #[arg(long, env = "MEMBERWATCH_KNOWN_IP")]
    pub known_ip: String,
}
