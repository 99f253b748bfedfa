//! # Membership Tests: MemberList, BroadcastQueue and ProbeScheduler
//!
//! Validates rumour precedence, self-refutation, voluntary departure,
//! suspicion expiry and the bounded retransmission of rumours.

use mw_cluster::{Applied, BroadcastQueue, MemberList, MemberUpdate, ProbeScheduler};
use mw_core::{GossipTuning, MemberState, NodeIdentity};
use std::collections::HashSet;
use std::time::{Duration, Instant};

fn node(port: u16) -> NodeIdentity {
    NodeIdentity(([127, 0, 0, 1], port).into())
}

fn update(port: u16, incarnation: u64, state: MemberState) -> MemberUpdate {
    MemberUpdate {
        node: node(port),
        incarnation,
        state,
    }
}

fn tuning() -> GossipTuning {
    GossipTuning {
        probe_interval: Duration::from_millis(100),
        suspicion_mult: 2,
        dead_retention: Duration::from_secs(1),
        ..GossipTuning::default()
    }
}

/// Verifies a fresh list holds only the local node, Alive.
#[test]
fn test_member_list_starts_with_self() {
    let t = Instant::now();

    let list = MemberList::new(node(1), Instant::now());
    let view = list.snapshot();

    assert_eq!(view.len(), 1);
    assert_eq!(view[0].address, node(1));
    assert_eq!(view[0].state, MemberState::Alive);
    assert!(list.probe_candidates().is_empty());

    let overhead = t.elapsed();
    println!("test_member_list_starts_with_self: Testing Overhead = {:?}", overhead);
}

/// Verifies that only an Alive rumour introduces an unknown member.
#[test]
fn test_unknown_member_needs_alive() {
    let t = Instant::now();

    let now = Instant::now();
    let mut list = MemberList::new(node(1), now);

    assert_eq!(list.apply(&update(2, 0, MemberState::Suspect), now), Applied::Ignored);
    assert_eq!(list.apply(&update(2, 0, MemberState::Dead), now), Applied::Ignored);
    assert_eq!(list.apply(&update(2, 0, MemberState::Alive), now), Applied::Changed);
    assert_eq!(list.snapshot().len(), 2);

    let overhead = t.elapsed();
    println!("test_unknown_member_needs_alive: Testing Overhead = {:?}", overhead);
}

/// Verifies incarnation-then-state precedence for a remote member.
#[test]
fn test_rumour_precedence() {
    let t = Instant::now();

    let now = Instant::now();
    let mut list = MemberList::new(node(1), now);
    list.apply(&update(2, 1, MemberState::Alive), now);

    // Suspect at the same incarnation overrides Alive.
    assert_eq!(list.apply(&update(2, 1, MemberState::Suspect), now), Applied::Changed);
    // Alive at the same incarnation does not clear a suspicion.
    assert_eq!(list.apply(&update(2, 1, MemberState::Alive), now), Applied::Ignored);
    // A stale Suspect is ignored.
    assert_eq!(list.apply(&update(2, 0, MemberState::Suspect), now), Applied::Ignored);
    // A higher incarnation refutes.
    assert_eq!(list.apply(&update(2, 2, MemberState::Alive), now), Applied::Changed);
    assert_eq!(list.get(&node(2)).map(|e| e.state), Some(MemberState::Alive));

    // Dead wins over Alive at the same incarnation and sticks.
    assert_eq!(list.apply(&update(2, 2, MemberState::Dead), now), Applied::Changed);
    assert_eq!(list.apply(&update(2, 2, MemberState::Suspect), now), Applied::Ignored);
    assert_eq!(list.snapshot().len(), 1, "dead members leave the view");

    // A restarted node with a newer incarnation comes back.
    assert_eq!(list.apply(&update(2, 3, MemberState::Alive), now), Applied::Changed);
    assert_eq!(list.snapshot().len(), 2);

    let overhead = t.elapsed();
    println!("test_rumour_precedence: Testing Overhead = {:?}", overhead);
}

/// Verifies a Suspect rumour about ourselves is refuted with a higher incarnation.
#[test]
fn test_self_refutation() {
    let t = Instant::now();

    let now = Instant::now();
    let mut list = MemberList::new(node(1), now);

    assert_eq!(list.apply(&update(1, 0, MemberState::Suspect), now), Applied::Refuted);
    assert_eq!(list.incarnation(), 1);
    let alive = list.local_alive();
    assert_eq!(alive.state, MemberState::Alive);
    assert_eq!(alive.incarnation, 1);

    // Our own old Alive echoed back is not news.
    assert_eq!(list.apply(&update(1, 1, MemberState::Alive), now), Applied::Ignored);
    // A stale Dead rumour is ignored.
    assert_eq!(list.apply(&update(1, 0, MemberState::Dead), now), Applied::Ignored);
    assert_eq!(list.snapshot()[0].state, MemberState::Alive);

    let overhead = t.elapsed();
    println!("test_self_refutation: Testing Overhead = {:?}", overhead);
}

/// Verifies leaving bumps the incarnation, hides self and stops refuting.
#[test]
fn test_begin_leave() {
    let t = Instant::now();

    let now = Instant::now();
    let mut list = MemberList::new(node(1), now);
    list.apply(&update(2, 0, MemberState::Alive), now);

    let left = list.begin_leave(now);
    assert_eq!(left.state, MemberState::Left);
    assert_eq!(left.incarnation, 1);
    assert!(list.is_leaving());
    assert!(list.snapshot().iter().all(|r| r.address != node(1)));

    assert_eq!(list.apply(&update(1, 5, MemberState::Suspect), now), Applied::Ignored);

    let overhead = t.elapsed();
    println!("test_begin_leave: Testing Overhead = {:?}", overhead);
}

/// Verifies a remote Left rumour removes the member from the view.
#[test]
fn test_remote_left_hidden() {
    let t = Instant::now();

    let now = Instant::now();
    let mut list = MemberList::new(node(1), now);
    list.apply(&update(2, 0, MemberState::Alive), now);

    assert_eq!(list.apply(&update(2, 1, MemberState::Left), now), Applied::Changed);
    assert_eq!(list.snapshot().len(), 1);
    assert!(list.probe_candidates().is_empty());
    assert_eq!(list.gossip_candidates(), vec![node(2)]);

    let overhead = t.elapsed();
    println!("test_remote_left_hidden: Testing Overhead = {:?}", overhead);
}

/// Verifies full-state merges downgrade remote Dead to Suspect.
#[test]
fn test_merge_remote_downgrades_dead() {
    let t = Instant::now();

    let now = Instant::now();
    let mut list = MemberList::new(node(1), now);
    list.apply(&update(2, 0, MemberState::Alive), now);

    let remote = vec![
        update(2, 0, MemberState::Dead),
        update(3, 0, MemberState::Alive),
    ];
    let rebroadcast = list.merge_remote(&remote, now);

    assert_eq!(list.get(&node(2)).map(|e| e.state), Some(MemberState::Suspect));
    assert_eq!(list.get(&node(3)).map(|e| e.state), Some(MemberState::Alive));
    assert_eq!(rebroadcast.len(), 2);
    assert!(rebroadcast.iter().all(|u| u.state != MemberState::Dead));

    let overhead = t.elapsed();
    println!("test_merge_remote_downgrades_dead: Testing Overhead = {:?}", overhead);
}

/// Verifies suspicion expiry declares Dead and retention later forgets it.
#[test]
fn test_reap_suspect_then_forget() {
    let t = Instant::now();

    let tuning = tuning();
    let start = Instant::now();
    let mut list = MemberList::new(node(1), start);
    list.apply(&update(2, 0, MemberState::Alive), start);
    assert!(list.suspect(&node(2), start).is_some());
    assert!(list.suspect(&node(2), start).is_none(), "already suspect");

    let (declared, changed) = list.reap(start + Duration::from_millis(50), &tuning);
    assert!(declared.is_empty());
    assert!(!changed);

    let expiry = start + tuning.suspicion_timeout(2);
    let (declared, changed) = list.reap(expiry, &tuning);
    assert!(changed);
    assert_eq!(declared, vec![update(2, 0, MemberState::Dead)]);
    assert_eq!(list.snapshot().len(), 1);
    assert!(list.get(&node(2)).is_some(), "dead members are retained for a while");

    let (_, changed) = list.reap(expiry + tuning.dead_retention, &tuning);
    assert!(changed);
    assert!(list.get(&node(2)).is_none());
    assert_eq!(list.len(), 1);

    let overhead = t.elapsed();
    println!("test_reap_suspect_then_forget: Testing Overhead = {:?}", overhead);
}

/// Verifies the suspicion and retransmission formulas scale with log10(n).
#[test]
fn test_tuning_scaling() {
    let t = Instant::now();

    let tuning = tuning();
    let millis = |d: Duration| (d.as_secs_f64() * 1000.0).round() as u64;
    assert_eq!(millis(tuning.suspicion_timeout(0)), 200);
    assert_eq!(millis(tuning.suspicion_timeout(5)), 200);
    assert_eq!(millis(tuning.suspicion_timeout(100)), 400);

    assert_eq!(tuning.retransmit_limit(1), 3);
    assert_eq!(tuning.retransmit_limit(9), 3);
    assert_eq!(tuning.retransmit_limit(10), 6);

    let overhead = t.elapsed();
    println!("test_tuning_scaling: Testing Overhead = {:?}", overhead);
}

/// Verifies rumours are retransmitted up to the limit, least-sent first.
#[test]
fn test_broadcast_queue_limit() {
    let t = Instant::now();

    let mut queue = BroadcastQueue::new();
    queue.enqueue(update(2, 0, MemberState::Alive));
    queue.enqueue(update(3, 0, MemberState::Alive));

    assert_eq!(queue.take(1, 2).len(), 1);
    // The other rumour has been sent less and goes next.
    let second = queue.take(1, 2);
    assert_eq!(second.len(), 1);

    assert_eq!(queue.take(8, 2).len(), 2);
    assert!(queue.is_empty(), "both rumours reached their limit");
    assert!(queue.take(8, 2).is_empty());

    let overhead = t.elapsed();
    println!("test_broadcast_queue_limit: Testing Overhead = {:?}", overhead);
}

/// Verifies a newer rumour about the same node replaces the queued one.
#[test]
fn test_broadcast_queue_supersede() {
    let t = Instant::now();

    let mut queue = BroadcastQueue::new();
    let mut superseded = queue.enqueue_with_notify(update(2, 0, MemberState::Alive));
    queue.enqueue(update(2, 0, MemberState::Suspect));

    assert_eq!(queue.len(), 1);
    assert!(superseded.try_recv().is_ok(), "replaced rumour notifies its waiter");
    assert_eq!(queue.take(4, 3), vec![update(2, 0, MemberState::Suspect)]);

    let overhead = t.elapsed();
    println!("test_broadcast_queue_supersede: Testing Overhead = {:?}", overhead);
}

/// Verifies the notify fires only once the rumour is fully disseminated.
#[test]
fn test_broadcast_queue_notify_on_limit() {
    let t = Instant::now();

    let mut queue = BroadcastQueue::new();
    let mut done = queue.enqueue_with_notify(update(1, 1, MemberState::Left));

    queue.take(4, 3);
    queue.take(4, 3);
    assert!(done.try_recv().is_err());
    queue.take(4, 3);
    assert!(done.try_recv().is_ok());

    let overhead = t.elapsed();
    println!("test_broadcast_queue_notify_on_limit: Testing Overhead = {:?}", overhead);
}

/// Verifies every candidate is probed once per pass.
#[test]
fn test_probe_scheduler_covers_all() {
    let t = Instant::now();

    let candidates: Vec<NodeIdentity> = (2..7).map(node).collect();
    let mut scheduler = ProbeScheduler::new();

    for _ in 0..3 {
        let pass: HashSet<NodeIdentity> = (0..candidates.len())
            .filter_map(|_| scheduler.next(&candidates))
            .collect();
        assert_eq!(pass.len(), candidates.len());
    }
    assert_eq!(scheduler.next(&[]), None);

    // Members that disappeared are skipped.
    let survivors = vec![node(3)];
    assert_eq!(scheduler.next(&survivors), Some(node(3)));

    let overhead = t.elapsed();
    println!("test_probe_scheduler_covers_all: Testing Overhead = {:?}", overhead);
}
