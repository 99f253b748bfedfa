use tokio::sync::oneshot;

use crate::wire::MemberUpdate;

struct Pending {
    update: MemberUpdate,
    transmits: u32,
    done: Option<oneshot::Sender<()>>,
}

impl Pending {
    fn finish(mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

/// Rumours waiting to be piggy-backed onto outgoing messages.
///
/// Holds at most one rumour per member; a newer one replaces the older.
/// Each rumour is handed out a bounded number of times, least-sent first.
#[derive(Default)]
pub struct BroadcastQueue {
    pending: Vec<Pending>,
}

impl BroadcastQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn enqueue(&mut self, update: MemberUpdate) {
        self.push(update, None);
    }

    /// Enqueues a rumour and resolves the receiver once it has been
    /// retransmitted to its limit or superseded.
    pub fn enqueue_with_notify(&mut self, update: MemberUpdate) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.push(update, Some(tx));
        rx
    }

    fn push(&mut self, update: MemberUpdate, done: Option<oneshot::Sender<()>>) {
        if let Some(idx) = self.pending.iter().position(|p| p.update.node == update.node) {
            self.pending.swap_remove(idx).finish();
        }
        self.pending.push(Pending {
            update,
            transmits: 0,
            done,
        });
    }

    /// Takes up to `max` rumours for one outgoing message.
    ///
    /// Rumours that reach `limit` transmissions are dropped afterwards.
    pub fn take(&mut self, max: usize, limit: u32) -> Vec<MemberUpdate> {
        self.pending.sort_by_key(|p| p.transmits);

        let mut out = Vec::with_capacity(max.min(self.pending.len()));
        for pending in self.pending.iter_mut().take(max) {
            pending.transmits += 1;
            out.push(pending.update);
        }

        let mut idx = 0;
        while idx < self.pending.len() {
            if self.pending[idx].transmits >= limit {
                self.pending.remove(idx).finish();
            } else {
                idx += 1;
            }
        }
        out
    }
}
