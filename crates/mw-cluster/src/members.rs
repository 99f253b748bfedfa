use indexmap::IndexMap;
use mw_core::{GossipTuning, MemberRecord, MemberState, NodeIdentity};
use std::time::Instant;

use crate::wire::MemberUpdate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberEntry {
    pub incarnation: u64,
    pub state: MemberState,
    /// When the entry last changed state; drives suspicion and retention.
    pub changed_at: Instant,
}

/// Outcome of applying one rumour to the local list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The list changed; the update should be re-gossiped.
    Changed,
    /// The rumour was about us; our incarnation was bumped and a fresh
    /// Alive must be gossiped instead.
    Refuted,
    Ignored,
}

/// The authoritative member list of one node.
///
/// Owned by the membership engine and mutated only from gossip handling and
/// the failure detector. Iteration order is first-seen order.
#[derive(Debug)]
pub struct MemberList {
    local: NodeIdentity,
    incarnation: u64,
    leaving: bool,
    entries: IndexMap<NodeIdentity, MemberEntry>,
}

impl MemberList {
    pub fn new(local: NodeIdentity, now: Instant) -> Self {
        let mut entries = IndexMap::new();
        entries.insert(
            local,
            MemberEntry {
                incarnation: 0,
                state: MemberState::Alive,
                changed_at: now,
            },
        );
        Self {
            local,
            incarnation: 0,
            leaving: false,
            entries,
        }
    }

    pub fn local(&self) -> NodeIdentity {
        self.local
    }

    pub fn incarnation(&self) -> u64 {
        self.incarnation
    }

    pub fn is_leaving(&self) -> bool {
        self.leaving
    }

    pub fn get(&self, node: &NodeIdentity) -> Option<&MemberEntry> {
        self.entries.get(node)
    }

    /// Entries in any state, self included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn local_alive(&self) -> MemberUpdate {
        MemberUpdate {
            node: self.local,
            incarnation: self.incarnation,
            state: MemberState::Alive,
        }
    }

    pub fn apply(&mut self, update: &MemberUpdate, now: Instant) -> Applied {
        if update.node == self.local {
            return self.apply_about_self(update, now);
        }

        if !self.entries.contains_key(&update.node) {
            // Only an Alive rumour introduces a member.
            if update.state != MemberState::Alive {
                return Applied::Ignored;
            }
            self.entries.insert(
                update.node,
                MemberEntry {
                    incarnation: update.incarnation,
                    state: MemberState::Alive,
                    changed_at: now,
                },
            );
            return Applied::Changed;
        }
        let Some(entry) = self.entries.get_mut(&update.node) else {
            return Applied::Ignored;
        };

        let accept = match update.state {
            MemberState::Alive => update.incarnation > entry.incarnation,
            MemberState::Suspect => match entry.state {
                MemberState::Alive => update.incarnation >= entry.incarnation,
                MemberState::Suspect => update.incarnation > entry.incarnation,
                MemberState::Dead | MemberState::Left => false,
            },
            MemberState::Dead => {
                !entry.state.is_terminal() && update.incarnation >= entry.incarnation
            }
            // A voluntary leave also overrides a confirmed death.
            MemberState::Left => {
                entry.state != MemberState::Left && update.incarnation >= entry.incarnation
            }
        };
        if !accept {
            return Applied::Ignored;
        }

        if entry.state != update.state {
            entry.changed_at = now;
        }
        entry.state = update.state;
        entry.incarnation = update.incarnation;
        Applied::Changed
    }

    fn apply_about_self(&mut self, update: &MemberUpdate, now: Instant) -> Applied {
        if self.leaving {
            return Applied::Ignored;
        }
        let stale = match update.state {
            MemberState::Alive => update.incarnation <= self.incarnation,
            _ => update.incarnation < self.incarnation,
        };
        if stale {
            return Applied::Ignored;
        }

        self.incarnation = update.incarnation + 1;
        if let Some(entry) = self.entries.get_mut(&self.local) {
            entry.incarnation = self.incarnation;
            entry.state = MemberState::Alive;
            entry.changed_at = now;
        }
        Applied::Refuted
    }

    /// Merges a peer's full state received by join or push-pull.
    ///
    /// A remote Dead is downgraded to Suspect so our own detector confirms
    /// it. Returns the rumours worth re-gossiping.
    pub fn merge_remote(&mut self, remote: &[MemberUpdate], now: Instant) -> Vec<MemberUpdate> {
        let mut rebroadcast = Vec::new();
        for update in remote {
            let mut update = *update;
            if update.state == MemberState::Dead {
                update.state = MemberState::Suspect;
            }
            match self.apply(&update, now) {
                Applied::Changed => rebroadcast.push(update),
                Applied::Refuted => rebroadcast.push(self.local_alive()),
                Applied::Ignored => {}
            }
        }
        rebroadcast
    }

    /// Marks an unresponsive Alive member as Suspect.
    pub fn suspect(&mut self, node: &NodeIdentity, now: Instant) -> Option<MemberUpdate> {
        let entry = self.entries.get_mut(node)?;
        if entry.state != MemberState::Alive || *node == self.local {
            return None;
        }
        entry.state = MemberState::Suspect;
        entry.changed_at = now;
        Some(MemberUpdate {
            node: *node,
            incarnation: entry.incarnation,
            state: MemberState::Suspect,
        })
    }

    /// Starts a voluntary departure and returns the Left rumour to spread.
    pub fn begin_leave(&mut self, now: Instant) -> MemberUpdate {
        self.leaving = true;
        self.incarnation += 1;
        if let Some(entry) = self.entries.get_mut(&self.local) {
            entry.incarnation = self.incarnation;
            entry.state = MemberState::Left;
            entry.changed_at = now;
        }
        MemberUpdate {
            node: self.local,
            incarnation: self.incarnation,
            state: MemberState::Left,
        }
    }

    /// Confirms expired suspicions and forgets long-gone members.
    ///
    /// Returns the Dead declarations to gossip and whether anything changed.
    pub fn reap(&mut self, now: Instant, tuning: &GossipTuning) -> (Vec<MemberUpdate>, bool) {
        let suspicion = tuning.suspicion_timeout(self.live_count());
        let mut declared = Vec::new();

        for (node, entry) in self.entries.iter_mut() {
            if entry.state == MemberState::Suspect
                && now.saturating_duration_since(entry.changed_at) >= suspicion
            {
                entry.state = MemberState::Dead;
                entry.changed_at = now;
                declared.push(MemberUpdate {
                    node: *node,
                    incarnation: entry.incarnation,
                    state: MemberState::Dead,
                });
            }
        }

        let local = self.local;
        let before = self.entries.len();
        self.entries.retain(|node, entry| {
            *node == local
                || !entry.state.is_terminal()
                || now.saturating_duration_since(entry.changed_at) < tuning.dead_retention
        });

        let changed = !declared.is_empty() || self.entries.len() != before;
        (declared, changed)
    }

    /// Members that count towards the cluster size (Alive or Suspect).
    pub fn live_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| !e.state.is_terminal())
            .count()
    }

    /// Peers the failure detector should probe.
    pub fn probe_candidates(&self) -> Vec<NodeIdentity> {
        self.entries
            .iter()
            .filter(|(node, e)| **node != self.local && !e.state.is_terminal())
            .map(|(node, _)| *node)
            .collect()
    }

    /// Peers eligible for gossip, including recently dead ones so a wrongly
    /// declared node hears about it and can refute.
    pub fn gossip_candidates(&self) -> Vec<NodeIdentity> {
        self.entries
            .keys()
            .filter(|node| **node != self.local)
            .copied()
            .collect()
    }

    /// Full state for join replies and anti-entropy.
    pub fn state_updates(&self) -> Vec<MemberUpdate> {
        self.entries
            .iter()
            .map(|(node, e)| MemberUpdate {
                node: *node,
                incarnation: e.incarnation,
                state: e.state,
            })
            .collect()
    }

    /// The visible cluster view: Alive and Suspect members, in first-seen order.
    pub fn snapshot(&self) -> Vec<MemberRecord> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.state.is_terminal())
            .map(|(node, e)| MemberRecord::new(*node, e.state))
            .collect()
    }
}
