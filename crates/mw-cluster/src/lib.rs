//! # mw-cluster: encrypted gossip membership
//!
//! A SWIM-style membership engine: random-peer probing with indirect
//! confirmation, suspect-then-confirm failure detection, piggy-backed rumour
//! dissemination and periodic push-pull anti-entropy, all over sealed UDP
//! datagrams keyed by the cluster secret.

pub mod broadcast;
pub mod detector;
pub mod engine;
mod gossip;
pub mod members;
pub mod snapshot;
pub mod wire;

pub use broadcast::BroadcastQueue;
pub use detector::ProbeScheduler;
pub use engine::MembershipEngine;
pub use members::{Applied, MemberEntry, MemberList};
pub use snapshot::ViewCell;
pub use wire::{FrameCodec, GossipMessage, Inbound, MemberUpdate, RejectReason, WireError};
