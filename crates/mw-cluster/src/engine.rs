use mw_core::{
    ClusterError, GossipTuning, JoinFailure, MemberRecord, MemberState, MemberView, NodeIdentity,
    TransportConfig,
};
use mw_crypto::ClusterCipher;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::broadcast::BroadcastQueue;
use crate::members::{Applied, MemberList};
use crate::snapshot::ViewCell;
use crate::wire::{
    reject_frame, FrameCodec, GossipMessage, Inbound, MemberUpdate, RejectReason, MAX_DATAGRAM,
    PROTOCOL_VERSION,
};
use crate::{detector, gossip};

/// An indirect probe we are running on behalf of another member.
struct Relay {
    requester: NodeIdentity,
    seq: u32,
    started: Instant,
}

/// A join attempt in flight against `seed`.
struct JoinWaiter {
    seed: SocketAddr,
    accepted: Option<oneshot::Sender<()>>,
    /// Why the seed refused our traffic, if it said so during this attempt.
    rejected: Option<JoinFailure>,
}

/// State shared by the engine handle and its background tasks.
pub(crate) struct Inner {
    pub(crate) local: NodeIdentity,
    pub(crate) tuning: GossipTuning,
    socket: UdpSocket,
    codec: FrameCodec<ClusterCipher>,
    pub(crate) members: Mutex<MemberList>,
    broadcasts: Mutex<BroadcastQueue>,
    acks: Mutex<HashMap<u32, oneshot::Sender<()>>>,
    relays: Mutex<HashMap<u32, Relay>>,
    join_waiter: Mutex<Option<JoinWaiter>>,
    view: ViewCell,
    seq: AtomicU32,
    pub(crate) shutdown: watch::Sender<bool>,
}

impl Inner {
    pub(crate) fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) async fn send(&self, message: &GossipMessage, to: SocketAddr) {
        match self.codec.seal(message) {
            Ok(frame) => {
                if let Err(e) = self.socket.send_to(&frame, to).await {
                    tracing::debug!(%to, error = %e, "gossip send failed");
                }
            }
            Err(e) => tracing::warn!(%to, error = %e, "unable to seal gossip message"),
        }
    }

    /// Sends our full member list to `to`, split to fit `max_frame`.
    pub(crate) async fn send_state<F>(&self, to: SocketAddr, build: F)
    where
        F: Fn(u32, Vec<MemberUpdate>) -> GossipMessage,
    {
        let members = self.members.lock().state_updates();
        let frames = match self.codec.seal_state(&members, self.tuning.max_frame, build) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(%to, members = members.len(), error = %e, "unable to seal member state");
                return;
            }
        };
        for frame in frames {
            if let Err(e) = self.socket.send_to(&frame, to).await {
                tracing::debug!(%to, error = %e, "state send failed");
            }
        }
    }

    /// Rumours to piggy-back on the next outgoing message.
    pub(crate) fn piggyback(&self) -> Vec<MemberUpdate> {
        let limit = self.tuning.retransmit_limit(self.members.lock().live_count());
        self.broadcasts
            .lock()
            .take(self.tuning.max_piggyback, limit)
    }

    pub(crate) fn register_ack(&self, seq: u32) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.acks.lock().insert(seq, tx);
        rx
    }

    pub(crate) fn forget_ack(&self, seq: u32) {
        self.acks.lock().remove(&seq);
    }

    fn enqueue_all(&self, updates: Vec<MemberUpdate>) {
        if updates.is_empty() {
            return;
        }
        let mut queue = self.broadcasts.lock();
        for update in updates {
            queue.enqueue(update);
        }
    }

    /// Applies rumours, republishes the view if anything changed and queues
    /// the resulting rumours for further dissemination.
    pub(crate) fn apply_updates(&self, updates: &[MemberUpdate]) {
        if updates.is_empty() {
            return;
        }
        let now = Instant::now();
        let mut rebroadcast = Vec::new();
        {
            let mut members = self.members.lock();
            for update in updates {
                match members.apply(update, now) {
                    Applied::Changed => {
                        log_transition(update);
                        rebroadcast.push(*update);
                    }
                    Applied::Refuted => {
                        tracing::warn!(
                            rumour = ?update.state,
                            incarnation = members.incarnation(),
                            "refuting rumour about this node"
                        );
                        rebroadcast.push(members.local_alive());
                    }
                    Applied::Ignored => {}
                }
            }
            if !rebroadcast.is_empty() {
                self.view.publish(members.snapshot());
            }
        }
        self.enqueue_all(rebroadcast);
    }

    fn merge_remote(&self, remote: &[MemberUpdate]) {
        let rebroadcast = {
            let mut members = self.members.lock();
            let rebroadcast = members.merge_remote(remote, Instant::now());
            if !rebroadcast.is_empty() {
                self.view.publish(members.snapshot());
            }
            rebroadcast
        };
        for update in &rebroadcast {
            if update.node != self.local {
                log_transition(update);
            }
        }
        self.enqueue_all(rebroadcast);
    }

    pub(crate) fn suspect(&self, target: NodeIdentity) {
        let update = {
            let mut members = self.members.lock();
            let update = members.suspect(&target, Instant::now());
            if update.is_some() {
                self.view.publish(members.snapshot());
            }
            update
        };
        if let Some(update) = update {
            tracing::warn!(member = %target, "member failed probe, marking suspect");
            self.enqueue_all(vec![update]);
        }
    }

    /// Confirms expired suspicions and drops stale relays.
    pub(crate) fn reap(&self) {
        let now = Instant::now();
        let declared = {
            let mut members = self.members.lock();
            let (declared, changed) = members.reap(now, &self.tuning);
            if changed {
                self.view.publish(members.snapshot());
            }
            declared
        };
        for update in &declared {
            tracing::warn!(member = %update.node, "suspicion expired, member declared dead");
        }
        self.enqueue_all(declared);

        let horizon = self.tuning.probe_interval * 2;
        self.relays
            .lock()
            .retain(|_, relay| now.saturating_duration_since(relay.started) < horizon);
    }

    pub(crate) async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => self.handle_datagram(&buf[..len], from).await,
                    Err(e) => tracing::debug!(error = %e, "gossip receive failed"),
                }
            }
        }
    }

    async fn handle_datagram(&self, frame: &[u8], from: SocketAddr) {
        match self.codec.open(frame) {
            Ok(Inbound::Message(message)) => self.handle_message(message, from).await,
            Ok(Inbound::Rejected {
                reason,
                remote_version,
            }) => self.handle_reject(from, reason, remote_version),
            Err(e) => {
                tracing::debug!(%from, error = %e, "dropping gossip frame");
                if let Some(reason) = e.reject_reason() {
                    if let Err(e) = self.socket.send_to(&reject_frame(reason), from).await {
                        tracing::debug!(%from, error = %e, "unable to send reject");
                    }
                }
            }
        }
    }

    async fn handle_message(&self, message: GossipMessage, from: SocketAddr) {
        self.apply_updates(message.piggybacked());

        match message {
            GossipMessage::Ping { seq, from: sender, .. } => {
                let ack = GossipMessage::Ack {
                    seq,
                    from: self.local,
                    updates: self.piggyback(),
                };
                self.send(&ack, sender.addr()).await;
            }
            GossipMessage::Ack { seq, from: sender, .. } => {
                let waiter = self.acks.lock().remove(&seq);
                if let Some(tx) = waiter {
                    let _ = tx.send(());
                    return;
                }
                let relay = self.relays.lock().remove(&seq);
                if let Some(relay) = relay {
                    let forwarded = GossipMessage::Ack {
                        seq: relay.seq,
                        from: sender,
                        updates: self.piggyback(),
                    };
                    self.send(&forwarded, relay.requester.addr()).await;
                }
            }
            GossipMessage::PingReq { seq, from: requester, target, .. } => {
                let relay_seq = self.next_seq();
                self.relays.lock().insert(
                    relay_seq,
                    Relay {
                        requester,
                        seq,
                        started: Instant::now(),
                    },
                );
                let ping = GossipMessage::Ping {
                    seq: relay_seq,
                    from: self.local,
                    updates: self.piggyback(),
                };
                self.send(&ping, target.addr()).await;
            }
            GossipMessage::Gossip { .. } => {}
            GossipMessage::Join { from: joiner, incarnation } => {
                tracing::info!(member = %joiner, "join request received");
                self.apply_updates(&[MemberUpdate {
                    node: joiner,
                    incarnation,
                    state: MemberState::Alive,
                }]);
                let local = self.local;
                self.send_state(joiner.addr(), |_, members| GossipMessage::JoinAck {
                    from: local,
                    members,
                })
                .await;
            }
            GossipMessage::JoinAck { members, .. } => {
                self.merge_remote(&members);
                self.accept_join(from);
            }
            GossipMessage::Sync { from: peer, part, members } => {
                self.merge_remote(&members);
                if part == 0 {
                    let local = self.local;
                    self.send_state(peer.addr(), |_, members| GossipMessage::SyncAck {
                        from: local,
                        members,
                    })
                    .await;
                }
            }
            GossipMessage::SyncAck { members, .. } => self.merge_remote(&members),
        }
    }

    fn handle_reject(&self, from: SocketAddr, reason: RejectReason, remote_version: u8) {
        let cause = match reason {
            RejectReason::Undecryptable => JoinFailure::SecretMismatch,
            RejectReason::Version => JoinFailure::ProtocolVersion {
                local: PROTOCOL_VERSION,
                remote: remote_version,
            },
        };
        let mut slot = self.join_waiter.lock();
        match slot.as_mut() {
            Some(waiter) if waiter.seed == from => {
                tracing::debug!(peer = %from, %cause, "seed rejected join attempt");
                waiter.rejected = Some(cause);
            }
            _ => tracing::warn!(peer = %from, %cause, "peer rejected our gossip traffic"),
        }
    }

    /// Completes a pending join if `from` is its seed.
    fn accept_join(&self, from: SocketAddr) {
        let mut slot = self.join_waiter.lock();
        if let Some(waiter) = slot.as_mut().filter(|w| w.seed == from) {
            if let Some(tx) = waiter.accepted.take() {
                let _ = tx.send(());
            }
        }
    }
}

fn log_transition(update: &MemberUpdate) {
    match update.state {
        MemberState::Alive => {
            tracing::info!(member = %update.node, incarnation = update.incarnation, "member alive")
        }
        MemberState::Suspect => tracing::warn!(member = %update.node, "member suspected"),
        MemberState::Dead => tracing::warn!(member = %update.node, "member dead"),
        MemberState::Left => tracing::info!(member = %update.node, "member left"),
    }
}

fn bind_socket(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(std::net::UdpSocket::from(socket))
}

/// Gossip-based membership with SWIM-style failure detection.
///
/// Owns the member list exclusively; other components read it through
/// [`MembershipEngine::members`]. Dropping the handle stops the background
/// tasks without announcing a departure; call [`MembershipEngine::leave`]
/// first for a graceful exit.
pub struct MembershipEngine {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MembershipEngine {
    /// Starts a new single-member cluster rooted at this node.
    pub async fn create_cluster(config: TransportConfig) -> Result<Self, ClusterError> {
        let engine = Self::start(config)?;
        tracing::info!(node = %engine.local(), "new cluster created");
        Ok(engine)
    }

    /// Starts the engine and pulls the membership view from `seed`.
    pub async fn join_cluster(
        config: TransportConfig,
        seed: SocketAddr,
    ) -> Result<Self, ClusterError> {
        let engine = Self::start(config)?;
        if seed == engine.local().addr() {
            engine.shutdown();
            return Err(ClusterError::Config(format!(
                "seed {} is this node",
                seed
            )));
        }
        if let Err(e) = engine.join(seed).await {
            engine.shutdown();
            return Err(e);
        }
        Ok(engine)
    }

    fn start(config: TransportConfig) -> Result<Self, ClusterError> {
        let socket = bind_socket(config.bind_addr).map_err(|source| ClusterError::Bind {
            addr: config.bind_addr,
            source,
        })?;
        let local = NodeIdentity(socket.local_addr()?);

        let members = MemberList::new(local, Instant::now());
        let view = ViewCell::new(members.snapshot());
        let (shutdown, _) = watch::channel(false);

        let inner = Arc::new(Inner {
            local,
            tuning: config.tuning,
            socket,
            codec: FrameCodec::new(ClusterCipher::new(&config.secret)),
            members: Mutex::new(members),
            broadcasts: Mutex::new(BroadcastQueue::new()),
            acks: Mutex::new(HashMap::new()),
            relays: Mutex::new(HashMap::new()),
            join_waiter: Mutex::new(None),
            view,
            seq: AtomicU32::new(0),
            shutdown,
        });

        let tasks = vec![
            tokio::spawn(inner.clone().receive_loop()),
            tokio::spawn(detector::run(inner.clone())),
            tokio::spawn(gossip::run_gossip(inner.clone())),
            tokio::spawn(gossip::run_anti_entropy(inner.clone())),
        ];
        tracing::debug!(node = %local, "gossip engine started");

        Ok(Self {
            inner,
            tasks: Mutex::new(tasks),
        })
    }

    async fn join(&self, seed: SocketAddr) -> Result<(), ClusterError> {
        let attempts = self.inner.tuning.join_attempts.max(1);
        let mut rejected = None;
        for attempt in 1..=attempts {
            let (tx, rx) = oneshot::channel();
            *self.inner.join_waiter.lock() = Some(JoinWaiter {
                seed,
                accepted: Some(tx),
                rejected: None,
            });

            let request = GossipMessage::Join {
                from: self.inner.local,
                incarnation: self.inner.members.lock().incarnation(),
            };
            self.inner.send(&request, seed).await;

            // A reject does not end the attempt: a genuine JoinAck may still follow.
            let accepted = matches!(
                tokio::time::timeout(self.inner.tuning.join_timeout, rx).await,
                Ok(Ok(()))
            );
            let waiter = self.inner.join_waiter.lock().take();
            if accepted {
                tracing::info!(%seed, members = self.members().len(), "joined the cluster");
                return Ok(());
            }
            match waiter.and_then(|w| w.rejected) {
                Some(cause) => {
                    tracing::debug!(%seed, attempt, %cause, "join attempt rejected");
                    rejected = Some(cause);
                }
                None => tracing::debug!(%seed, attempt, "seed did not answer join"),
            }
        }
        Err(ClusterError::Join {
            seed,
            cause: rejected.unwrap_or(JoinFailure::Unreachable { attempts }),
        })
    }

    pub fn local(&self) -> NodeIdentity {
        self.inner.local
    }

    /// The latest locally known Alive and Suspect members, self included.
    pub fn members(&self) -> Vec<MemberRecord> {
        self.inner.view.load()
    }

    /// Announces a voluntary departure.
    ///
    /// Returns once the Left rumour has been fully disseminated, or with
    /// [`ClusterError::LeaveTimeout`] when `timeout` elapses first. The
    /// engine keeps gossiping until [`MembershipEngine::shutdown`].
    pub async fn leave(&self, timeout: Duration) -> Result<(), ClusterError> {
        let (update, peers) = {
            let mut members = self.inner.members.lock();
            if members.is_leaving() {
                return Ok(());
            }
            let update = members.begin_leave(Instant::now());
            self.inner.view.publish(members.snapshot());
            (update, members.probe_candidates())
        };
        tracing::info!(node = %self.inner.local, "leaving the cluster");
        if peers.is_empty() {
            return Ok(());
        }

        let done = self.inner.broadcasts.lock().enqueue_with_notify(update);

        let direct: Vec<NodeIdentity> = peers
            .choose_multiple(&mut rand::thread_rng(), self.inner.tuning.gossip_nodes)
            .copied()
            .collect();
        let message = GossipMessage::Gossip {
            from: self.inner.local,
            updates: vec![update],
        };
        for peer in direct {
            self.inner.send(&message, peer.addr()).await;
        }

        match tokio::time::timeout(timeout, done).await {
            Ok(_) => Ok(()),
            Err(_) => Err(ClusterError::LeaveTimeout(timeout)),
        }
    }

    /// Stops all background gossip tasks. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl MemberView for MembershipEngine {
    fn members(&self) -> Vec<MemberRecord> {
        MembershipEngine::members(self)
    }
}

impl Drop for MembershipEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
