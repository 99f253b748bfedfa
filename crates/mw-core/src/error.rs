use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Failures while producing or reading the shared cluster secret.
#[derive(Debug, Error)]
pub enum SecretError {
    /// The OS random source could not supply secure bytes.
    #[error("secure random source unavailable: {0}")]
    Entropy(String),
    #[error("malformed cluster secret: {0}")]
    Malformed(String),
}

/// Why a join against a seed did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinFailure {
    #[error("seed did not answer after {attempts} attempt(s)")]
    Unreachable { attempts: u32 },
    #[error("seed could not decrypt our traffic (cluster key mismatch)")]
    SecretMismatch,
    #[error("protocol version mismatch (local {local}, remote {remote})")]
    ProtocolVersion { local: u8, remote: u8 },
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("failed to bind gossip socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to join cluster via {seed}: {cause}")]
    Join { seed: SocketAddr, cause: JoinFailure },
    #[error("leave was not propagated within {0:?}")]
    LeaveTimeout(Duration),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error("gossip transport error: {0}")]
    Transport(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("invalid probe address: {0:?}")]
    InvalidAddress(String),
}

pub type Result<T> = std::result::Result<T, ClusterError>;
