//! # Wire Tests: FrameCodec
//!
//! Validates sealed gossip frames, the cleartext reject frames and how
//! foreign or mismatched traffic is classified.

use mw_cluster::wire::{reject_frame, HEADER_LEN, MAGIC, PROTOCOL_VERSION};
use mw_cluster::{FrameCodec, GossipMessage, Inbound, MemberList, MemberUpdate, RejectReason, WireError};
use mw_core::secret::SECRET_LEN;
use mw_core::{ClusterSecret, MemberState, NodeIdentity};
use mw_crypto::ClusterCipher;
use std::time::Instant;

fn codec(byte: u8) -> FrameCodec {
    FrameCodec::new(ClusterCipher::new(&ClusterSecret::from_bytes([byte; SECRET_LEN])))
}

fn node(port: u16) -> NodeIdentity {
    NodeIdentity(([127, 0, 0, 1], port).into())
}

fn sample() -> GossipMessage {
    GossipMessage::Ping {
        seq: 42,
        from: node(7946),
        updates: vec![MemberUpdate {
            node: node(7947),
            incarnation: 3,
            state: MemberState::Suspect,
        }],
    }
}

/// Verifies a sealed frame opens with the same key and carries the header.
#[test]
fn test_frame_seal_open() {
    let t = Instant::now();

    let codec = codec(9);
    let frame = codec.seal(&sample()).expect("seal failed");

    assert_eq!(&frame[..2], &MAGIC);
    assert_eq!(frame[2], PROTOCOL_VERSION);
    match codec.open(&frame).expect("open failed") {
        Inbound::Message(message) => {
            assert_eq!(message, sample());
            assert_eq!(message.sender(), node(7946));
            assert_eq!(message.piggybacked().len(), 1);
        }
        other => panic!("expected a message, got {:?}", other),
    }

    let overhead = t.elapsed();
    println!("test_frame_seal_open: Testing Overhead = {:?}", overhead);
}

/// Verifies the payload is not readable on the wire.
#[test]
fn test_frame_payload_not_cleartext() {
    let t = Instant::now();

    let frame = codec(9).seal(&sample()).expect("seal failed");
    let needle = b"ping";
    assert!(
        !frame.windows(needle.len()).any(|w| w == needle),
        "message kind must not leak in cleartext"
    );

    let overhead = t.elapsed();
    println!("test_frame_payload_not_cleartext: Testing Overhead = {:?}", overhead);
}

/// Verifies a foreign key is classified as undecryptable and earns a reject.
#[test]
fn test_frame_wrong_key_rejected() {
    let t = Instant::now();

    let frame = codec(1).seal(&sample()).expect("seal failed");
    let err = codec(2).open(&frame).expect_err("foreign key must not open");

    assert!(matches!(err, WireError::Decrypt));
    assert_eq!(err.reject_reason(), Some(RejectReason::Undecryptable));

    let overhead = t.elapsed();
    println!("test_frame_wrong_key_rejected: Testing Overhead = {:?}", overhead);
}

/// Verifies a different protocol version is refused before decryption.
#[test]
fn test_frame_version_mismatch() {
    let t = Instant::now();

    let codec = codec(3);
    let mut frame = codec.seal(&sample()).expect("seal failed").to_vec();
    frame[2] = PROTOCOL_VERSION + 1;

    let err = codec.open(&frame).expect_err("unknown version must not open");
    assert!(matches!(err, WireError::Version { remote } if remote == PROTOCOL_VERSION + 1));
    assert_eq!(err.reject_reason(), Some(RejectReason::Version));

    let overhead = t.elapsed();
    println!("test_frame_version_mismatch: Testing Overhead = {:?}", overhead);
}

/// Verifies reject frames parse without the key.
#[test]
fn test_reject_frame_parse() {
    let t = Instant::now();

    for reason in [RejectReason::Undecryptable, RejectReason::Version] {
        let frame = reject_frame(reason);
        assert_eq!(frame.len(), HEADER_LEN + 2);
        match codec(4).open(&frame).expect("reject must parse") {
            Inbound::Rejected {
                reason: parsed,
                remote_version,
            } => {
                assert_eq!(parsed, reason);
                assert_eq!(remote_version, PROTOCOL_VERSION);
            }
            other => panic!("expected a reject, got {:?}", other),
        }
    }

    let overhead = t.elapsed();
    println!("test_reject_frame_parse: Testing Overhead = {:?}", overhead);
}

/// Verifies noise is dropped silently: no reject reason.
#[test]
fn test_frame_noise_ignored() {
    let t = Instant::now();

    let codec = codec(5);

    let err = codec.open(b"GET / HTTP/1.1\r\n").expect_err("noise must not open");
    assert!(matches!(err, WireError::BadMagic));
    assert_eq!(err.reject_reason(), None);

    let err = codec.open(b"MW").expect_err("short frame must not open");
    assert!(matches!(err, WireError::Truncated));

    let err = codec.open(&[b'M', b'W', PROTOCOL_VERSION, 9]).expect_err("unknown kind");
    assert!(matches!(err, WireError::Kind(9)));
    assert_eq!(err.reject_reason(), None);

    let overhead = t.elapsed();
    println!("test_frame_noise_ignored: Testing Overhead = {:?}", overhead);
}

/// Verifies a large member list is split into frames under the budget and
/// that merging every part rebuilds the whole view.
#[test]
fn test_full_state_split_across_frames() {
    let t = Instant::now();

    let codec = codec(5);
    let members: Vec<MemberUpdate> = (0..3000u32)
        .map(|i| {
            let addr = if i % 3 == 0 {
                std::net::SocketAddr::new(
                    std::net::IpAddr::V6(std::net::Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, i as u16 + 1)),
                    7946,
                )
            } else {
                ([10, (i >> 16) as u8, (i >> 8) as u8, i as u8], 7946).into()
            };
            MemberUpdate {
                node: NodeIdentity(addr),
                incarnation: u64::from(i % 7),
                state: MemberState::Alive,
            }
        })
        .collect();

    let budget = 1400;
    let frames = codec
        .seal_state(&members, budget, |_, members| GossipMessage::JoinAck {
            from: node(7946),
            members,
        })
        .expect("state fits once split");
    assert!(frames.len() > 1, "3000 members cannot fit one datagram");
    assert!(frames.iter().all(|f| f.len() <= budget));

    let mut view = MemberList::new(node(9000), Instant::now());
    for frame in &frames {
        match codec.open(frame).expect("open failed") {
            Inbound::Message(GossipMessage::JoinAck { members, .. }) => {
                view.merge_remote(&members, Instant::now());
            }
            other => panic!("expected a join ack, got {:?}", other),
        }
    }
    assert_eq!(view.len(), members.len() + 1);
    for update in &members {
        let entry = view.get(&update.node).expect("every member arrives");
        assert_eq!(entry.state, update.state);
        assert_eq!(entry.incarnation, update.incarnation);
    }

    let overhead = t.elapsed();
    println!("test_full_state_split_across_frames: Testing Overhead = {:?}", overhead);
}

/// Verifies parts are numbered in order and an empty list still yields one frame.
#[test]
fn test_full_state_parts_numbered() {
    let t = Instant::now();

    let codec = codec(6);
    let sync = |part, members| GossipMessage::Sync {
        from: node(7946),
        part,
        members,
    };

    let frames = codec.seal_state(&[], 1400, sync).expect("empty state seals");
    assert_eq!(frames.len(), 1);

    let members: Vec<MemberUpdate> = (0..400u16)
        .map(|i| MemberUpdate {
            node: node(10_000 + i),
            incarnation: 1,
            state: MemberState::Alive,
        })
        .collect();
    let frames = codec.seal_state(&members, 1400, sync).expect("state fits once split");
    let mut seen = 0;
    for (index, frame) in frames.iter().enumerate() {
        match codec.open(frame).expect("open failed") {
            Inbound::Message(GossipMessage::Sync { part, members, .. }) => {
                assert_eq!(part as usize, index);
                seen += members.len();
            }
            other => panic!("expected a sync part, got {:?}", other),
        }
    }
    assert_eq!(seen, members.len());

    let overhead = t.elapsed();
    println!("test_full_state_parts_numbered: Testing Overhead = {:?}", overhead);
}
