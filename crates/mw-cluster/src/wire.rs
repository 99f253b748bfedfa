//! Datagram framing for gossip traffic.
//!
//! ```text
//! sealed: "MW" | version | 0 | nonce[12] | ciphertext | tag[16]
//! reject: "MW" | version | 1 | reason | rejecting node's version
//! ```
//!
//! The 4-byte header is the AEAD associated data of sealed frames.

use bytes::{BufMut, Bytes, BytesMut};
use mw_core::{MemberState, NodeIdentity};
use mw_crypto::{ClusterCipher, CryptoError, PayloadCipher, NONCE_LEN, TAG_LEN};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAGIC: [u8; 2] = *b"MW";
pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 4;
/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;

const KIND_SEALED: u8 = 0;
const KIND_REJECT: u8 = 1;

/// One membership fact: `node` is in `state` as of `incarnation`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberUpdate {
    pub node: NodeIdentity,
    pub incarnation: u64,
    pub state: MemberState,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GossipMessage {
    Ping {
        seq: u32,
        from: NodeIdentity,
        updates: Vec<MemberUpdate>,
    },
    Ack {
        seq: u32,
        from: NodeIdentity,
        updates: Vec<MemberUpdate>,
    },
    /// Asks the receiver to ping `target` and relay the ack back.
    PingReq {
        seq: u32,
        from: NodeIdentity,
        target: NodeIdentity,
        updates: Vec<MemberUpdate>,
    },
    Gossip {
        from: NodeIdentity,
        updates: Vec<MemberUpdate>,
    },
    Join {
        from: NodeIdentity,
        incarnation: u64,
    },
    JoinAck {
        from: NodeIdentity,
        members: Vec<MemberUpdate>,
    },
    /// Push-pull anti-entropy: one part of the sender's full state. Part 0
    /// is answered with `SyncAck`.
    Sync {
        from: NodeIdentity,
        part: u32,
        members: Vec<MemberUpdate>,
    },
    SyncAck {
        from: NodeIdentity,
        members: Vec<MemberUpdate>,
    },
}

impl GossipMessage {
    pub fn sender(&self) -> NodeIdentity {
        match self {
            GossipMessage::Ping { from, .. }
            | GossipMessage::Ack { from, .. }
            | GossipMessage::PingReq { from, .. }
            | GossipMessage::Gossip { from, .. }
            | GossipMessage::Join { from, .. }
            | GossipMessage::JoinAck { from, .. }
            | GossipMessage::Sync { from, .. }
            | GossipMessage::SyncAck { from, .. } => *from,
        }
    }

    /// Piggy-backed rumours carried by the message.
    pub fn piggybacked(&self) -> &[MemberUpdate] {
        match self {
            GossipMessage::Ping { updates, .. }
            | GossipMessage::Ack { updates, .. }
            | GossipMessage::PingReq { updates, .. }
            | GossipMessage::Gossip { updates, .. } => updates,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Undecryptable,
    Version,
}

impl RejectReason {
    fn code(self) -> u8 {
        match self {
            RejectReason::Undecryptable => 1,
            RejectReason::Version => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(RejectReason::Undecryptable),
            2 => Some(RejectReason::Version),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Message(GossipMessage),
    Rejected {
        reason: RejectReason,
        remote_version: u8,
    },
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame truncated")]
    Truncated,
    #[error("not a memberwatch frame")]
    BadMagic,
    #[error("unsupported protocol version {remote}")]
    Version { remote: u8 },
    #[error("unknown frame kind {0}")]
    Kind(u8),
    #[error("payload failed authentication")]
    Decrypt,
    #[error("payload codec: {0}")]
    Codec(String),
    #[error("frame of {0} bytes exceeds datagram limit")]
    Oversized(usize),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl WireError {
    /// Whether the sender deserves a cleartext reject for this frame.
    ///
    /// Only frames that carry our magic get an answer; noise gets silence.
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            WireError::Decrypt => Some(RejectReason::Undecryptable),
            WireError::Version { .. } => Some(RejectReason::Version),
            _ => None,
        }
    }
}

pub struct FrameCodec<C = ClusterCipher> {
    cipher: C,
}

impl<C: PayloadCipher> FrameCodec<C> {
    pub fn new(cipher: C) -> Self {
        Self { cipher }
    }

    pub fn seal(&self, message: &GossipMessage) -> Result<Bytes, WireError> {
        let mut body =
            serde_json::to_vec(message).map_err(|e| WireError::Codec(e.to_string()))?;
        let header = header(KIND_SEALED);
        let (nonce, tag) = self.cipher.seal_in_place(&header, &mut body)?;

        let len = HEADER_LEN + NONCE_LEN + body.len() + TAG_LEN;
        if len > MAX_DATAGRAM {
            return Err(WireError::Oversized(len));
        }
        let mut frame = BytesMut::with_capacity(len);
        frame.put_slice(&header);
        frame.put_slice(&nonce);
        frame.put_slice(&body);
        frame.put_slice(&tag);
        Ok(frame.freeze())
    }

    /// Seals a full member list as frames of at most `budget` bytes.
    ///
    /// `build` receives the part index and that part's members. Every part is
    /// a complete message on its own and receivers merge parts independently,
    /// so a lost part only delays convergence until the next exchange.
    pub fn seal_state<F>(
        &self,
        members: &[MemberUpdate],
        budget: usize,
        build: F,
    ) -> Result<Vec<Bytes>, WireError>
    where
        F: Fn(u32, Vec<MemberUpdate>) -> GossipMessage,
    {
        let mut frames = Vec::new();
        let mut rest = members;
        let mut chunk = members.len().max(1);

        while !rest.is_empty() || frames.is_empty() {
            let take = chunk.min(rest.len());
            let part = frames.len() as u32;
            match self.seal(&build(part, rest[..take].to_vec())) {
                Ok(frame) if frame.len() <= budget => {
                    frames.push(frame);
                    rest = &rest[take..];
                }
                Ok(_) | Err(WireError::Oversized(_)) if take > 1 => chunk = take / 2,
                Ok(frame) => return Err(WireError::Oversized(frame.len())),
                Err(e) => return Err(e),
            }
        }
        Ok(frames)
    }

    pub fn open(&self, frame: &[u8]) -> Result<Inbound, WireError> {
        if frame.len() < HEADER_LEN {
            return Err(WireError::Truncated);
        }
        if frame[..2] != MAGIC {
            return Err(WireError::BadMagic);
        }
        let version = frame[2];
        match frame[3] {
            KIND_REJECT => {
                // Rejects are accepted from any protocol version.
                if frame.len() < HEADER_LEN + 2 {
                    return Err(WireError::Truncated);
                }
                let reason =
                    RejectReason::from_code(frame[HEADER_LEN]).ok_or(WireError::Kind(KIND_REJECT))?;
                Ok(Inbound::Rejected {
                    reason,
                    remote_version: frame[HEADER_LEN + 1],
                })
            }
            KIND_SEALED => {
                if version != PROTOCOL_VERSION {
                    return Err(WireError::Version { remote: version });
                }
                if frame.len() < HEADER_LEN + NONCE_LEN + TAG_LEN {
                    return Err(WireError::Truncated);
                }
                let (header, rest) = frame.split_at(HEADER_LEN);
                let (nonce, rest) = rest.split_at(NONCE_LEN);
                let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

                let mut nonce_bytes = [0u8; NONCE_LEN];
                nonce_bytes.copy_from_slice(nonce);
                let mut tag_bytes = [0u8; TAG_LEN];
                tag_bytes.copy_from_slice(tag);

                let mut body = ciphertext.to_vec();
                self.cipher
                    .open_in_place(&nonce_bytes, header, &mut body, &tag_bytes)
                    .map_err(|_| WireError::Decrypt)?;

                serde_json::from_slice(&body)
                    .map(Inbound::Message)
                    .map_err(|e| WireError::Codec(e.to_string()))
            }
            other => Err(WireError::Kind(other)),
        }
    }
}

/// Cleartext answer to a frame this node cannot accept.
///
/// Rejects are not authenticated: anyone able to forge a peer's source
/// address can send one. A joining node therefore treats a reject as a hint
/// about why the seed stays silent, never as proof that the join failed.
pub fn reject_frame(reason: RejectReason) -> Bytes {
    let mut frame = BytesMut::with_capacity(HEADER_LEN + 2);
    frame.put_slice(&header(KIND_REJECT));
    frame.put_u8(reason.code());
    frame.put_u8(PROTOCOL_VERSION);
    frame.freeze()
}

fn header(kind: u8) -> [u8; HEADER_LEN] {
    [MAGIC[0], MAGIC[1], PROTOCOL_VERSION, kind]
}
