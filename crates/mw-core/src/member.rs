use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// A node's gossip bind address, which is also its name in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeIdentity(pub SocketAddr);

impl NodeIdentity {
    pub fn addr(&self) -> SocketAddr {
        self.0
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<SocketAddr> for NodeIdentity {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

/// Liveness as seen by the local failure detector.
///
/// Variant order is the precedence order for a single incarnation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberState {
    Alive,
    Suspect,
    Dead,
    Left,
}

impl MemberState {
    /// Dead and Left members no longer belong to the visible view.
    pub fn is_terminal(self) -> bool {
        matches!(self, MemberState::Dead | MemberState::Left)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub address: NodeIdentity,
    pub state: MemberState,
}

impl MemberRecord {
    pub fn new(address: impl Into<NodeIdentity>, state: MemberState) -> Self {
        Self {
            address: address.into(),
            state,
        }
    }
}

/// Read-only access to a cluster view.
///
/// Implemented by the membership engine; health reporting consumes it and
/// never mutates membership.
pub trait MemberView: Send + Sync {
    /// The latest locally known Alive/Suspect members. Must not block on I/O.
    fn members(&self) -> Vec<MemberRecord>;
}
