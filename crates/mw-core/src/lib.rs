//! # mw-core: shared types for memberwatch
//!
//! Cluster secret handling, transport and health configuration, the member
//! data model and the error taxonomy used by every other crate.

pub mod config;
pub mod error;
pub mod member;
pub mod secret;

pub use config::{GossipTuning, HealthConfig, TransportConfig};
pub use error::{ClusterError, JoinFailure, ProbeError, SecretError};
pub use member::{MemberRecord, MemberState, MemberView, NodeIdentity};
pub use secret::ClusterSecret;
