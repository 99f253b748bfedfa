//! SWIM-style failure detection.
//!
//! Each probe interval one member is pinged directly. If no ack arrives
//! within the probe timeout, `indirect_checks` other members are asked to
//! ping it for us. Only when the whole interval passes in silence is the
//! member marked Suspect; it becomes Dead after the suspicion timeout unless
//! it refutes with a higher incarnation. One dropped packet never evicts a
//! healthy node.

use mw_core::NodeIdentity;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::time::{interval, timeout, timeout_at, Instant, MissedTickBehavior};

use crate::engine::Inner;
use crate::wire::GossipMessage;

/// Round-robin over a shuffled member list, reshuffled each pass.
///
/// Guarantees every member is probed once per pass regardless of luck.
#[derive(Debug, Default)]
pub struct ProbeScheduler {
    order: Vec<NodeIdentity>,
    cursor: usize,
}

impl ProbeScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, candidates: &[NodeIdentity]) -> Option<NodeIdentity> {
        if candidates.is_empty() {
            return None;
        }
        for _ in 0..2 {
            while self.cursor < self.order.len() {
                let node = self.order[self.cursor];
                self.cursor += 1;
                if candidates.contains(&node) {
                    return Some(node);
                }
            }
            self.order = candidates.to_vec();
            self.order.shuffle(&mut rand::thread_rng());
            self.cursor = 0;
        }
        None
    }
}

pub(crate) async fn run(inner: Arc<Inner>) {
    let mut ticker = interval(inner.tuning.probe_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut scheduler = ProbeScheduler::new();
    let mut shutdown = inner.shutdown.subscribe();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                probe_round(&inner, &mut scheduler).await;
                inner.reap();
            }
        }
    }
}

async fn probe_round(inner: &Inner, scheduler: &mut ProbeScheduler) {
    let candidates = inner.members.lock().probe_candidates();
    let Some(target) = scheduler.next(&candidates) else {
        return;
    };

    let deadline = Instant::now() + inner.tuning.probe_interval;
    let seq = inner.next_seq();
    let mut ack = inner.register_ack(seq);

    let ping = GossipMessage::Ping {
        seq,
        from: inner.local,
        updates: inner.piggyback(),
    };
    inner.send(&ping, target.addr()).await;

    if let Ok(Ok(())) = timeout(inner.tuning.probe_timeout, &mut ack).await {
        return;
    }

    let helpers: Vec<NodeIdentity> = candidates
        .iter()
        .filter(|node| **node != target)
        .copied()
        .collect::<Vec<_>>()
        .choose_multiple(&mut rand::thread_rng(), inner.tuning.indirect_checks)
        .copied()
        .collect();
    tracing::debug!(member = %target, helpers = helpers.len(), "direct probe timed out");

    for helper in helpers {
        let request = GossipMessage::PingReq {
            seq,
            from: inner.local,
            target,
            updates: inner.piggyback(),
        };
        inner.send(&request, helper.addr()).await;
    }

    if let Ok(Ok(())) = timeout_at(deadline, &mut ack).await {
        return;
    }
    inner.forget_ack(seq);
    inner.suspect(target);
}
