use core::sync::atomic::Ordering;
use crossbeam_epoch::{self as epoch, Atomic, Owned};
use mw_core::MemberRecord;

/// The published, read-only copy of the cluster view.
///
/// ## Shadow-Swap
/// Gossip handling builds a fresh snapshot under the member-list lock and
/// swaps it in atomically. Readers (health reports) only pin an epoch and
/// clone, so they never contend with the gossip loop.
pub struct ViewCell {
    view: Atomic<Vec<MemberRecord>>,
}

impl ViewCell {
    pub fn new(initial: Vec<MemberRecord>) -> Self {
        Self {
            view: Atomic::new(initial),
        }
    }

    pub fn publish(&self, records: Vec<MemberRecord>) {
        let guard = epoch::pin();
        let old = self.view.swap(Owned::new(records), Ordering::AcqRel, &guard);

        // # Safety: the previous snapshot is unlinked; readers still holding
        // a guard from an earlier epoch keep it alive until they unpin.
        unsafe {
            if !old.is_null() {
                guard.defer_destroy(old);
            }
        }
    }

    pub fn load(&self) -> Vec<MemberRecord> {
        let guard = epoch::pin();
        let shared = self.view.load(Ordering::Acquire, &guard);
        // # Safety: Acquire pairs with the AcqRel swap in `publish`, and the
        // pinned guard keeps the pointee alive for the duration of the clone.
        match unsafe { shared.as_ref() } {
            Some(records) => records.clone(),
            None => Vec::new(),
        }
    }
}

impl Drop for ViewCell {
    fn drop(&mut self) {
        let guard = epoch::pin();
        let old = self.view.swap(epoch::Shared::null(), Ordering::AcqRel, &guard);
        // # Safety: same deferred reclamation as `publish`.
        unsafe {
            if !old.is_null() {
                guard.defer_destroy(old);
            }
        }
    }
}
