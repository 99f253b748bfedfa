use mw_core::NodeIdentity;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};

use crate::engine::Inner;
use crate::wire::GossipMessage;

/// Periodic rumour dissemination to a small random subset of peers.
pub(crate) async fn run_gossip(inner: Arc<Inner>) {
    let mut ticker = interval(inner.tuning.gossip_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut shutdown = inner.shutdown.subscribe();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => gossip_round(&inner).await,
        }
    }
}

async fn gossip_round(inner: &Inner) {
    let targets: Vec<NodeIdentity> = {
        let peers = inner.members.lock().gossip_candidates();
        peers
            .choose_multiple(&mut rand::thread_rng(), inner.tuning.gossip_nodes)
            .copied()
            .collect()
    };

    for target in targets {
        let updates = inner.piggyback();
        if updates.is_empty() {
            break;
        }
        let message = GossipMessage::Gossip {
            from: inner.local,
            updates,
        };
        inner.send(&message, target.addr()).await;
    }
}

/// Push-pull anti-entropy: exchange full state with one random peer,
/// repairing whatever lost rumours left behind.
pub(crate) async fn run_anti_entropy(inner: Arc<Inner>) {
    let mut ticker = interval(inner.tuning.push_pull_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut shutdown = inner.shutdown.subscribe();
    // The first tick of a tokio interval fires immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let peer = inner
                    .members
                    .lock()
                    .probe_candidates()
                    .choose(&mut rand::thread_rng())
                    .copied();
                if let Some(peer) = peer {
                    tracing::debug!(%peer, "anti-entropy sync");
                    let from = inner.local;
                    inner
                        .send_state(peer.addr(), |part, members| GossipMessage::Sync { from, part, members })
                        .await;
                }
            }
        }
    }
}
