//! Request slots and their lifecycle.
//!
//! Every ring owns a fixed pool of request slots, preallocated at ring
//! creation so the submission hot path never touches the heap. A slot walks
//! `Free → Building → Ready → Queued → Completed → Free`, with the direct
//! `Building → Free` edge taken when chain building fails and rolls back.

use std::sync::Arc;

use crate::session::Session;

/// Request lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReqState {
    Free,
    Building,
    Ready,
    Queued,
    Completed,
}

/// One preallocated request slot.
pub(crate) struct RequestSlot {
    pub(crate) state: ReqState,
    /// Owning session; held from build until completion so the session (and
    /// its context template) outlives the request.
    pub(crate) session: Option<Arc<Session>>,
    /// Opaque caller handle, passed back through the completion callback.
    pub(crate) cookie: u64,
    /// Command descriptors this request occupies. Immutable once built; the
    /// reaper retires exactly this many.
    pub(crate) cdescs: u16,
    /// Result descriptors this request occupies. Immutable once built.
    pub(crate) rdescs: u16,
}

impl RequestSlot {
    fn clear(&mut self) {
        self.state = ReqState::Free;
        self.session = None;
        self.cookie = 0;
        self.cdescs = 0;
        self.rdescs = 0;
    }
}

/// Fixed-size pool of request slots with a LIFO free list.
pub(crate) struct RequestPool {
    slots: Vec<RequestSlot>,
    free: Vec<u16>,
}

impl RequestPool {
    /// Create a pool with `capacity` slots, all free.
    pub(crate) fn new(capacity: u16) -> Self {
        let mut slots = Vec::with_capacity(capacity as usize);
        for _ in 0..capacity {
            slots.push(RequestSlot {
                state: ReqState::Free,
                session: None,
                cookie: 0,
                cdescs: 0,
                rdescs: 0,
            });
        }
        let free: Vec<u16> = (0..capacity).rev().collect();
        RequestPool { slots, free }
    }

    /// Take a free slot into `Building`. Returns `None` when exhausted.
    pub(crate) fn alloc(&mut self) -> Option<u16> {
        let idx = self.free.pop()?;
        let slot = &mut self.slots[idx as usize];
        debug_assert_eq!(slot.state, ReqState::Free);
        slot.state = ReqState::Building;
        Some(idx)
    }

    /// Abandon a `Building` slot after a failed chain build.
    pub(crate) fn abort(&mut self, idx: u16) {
        let slot = &mut self.slots[idx as usize];
        debug_assert_eq!(slot.state, ReqState::Building);
        slot.clear();
        self.free.push(idx);
    }

    /// Record the built chain and move `Building → Ready`.
    pub(crate) fn mark_ready(
        &mut self,
        idx: u16,
        session: Arc<Session>,
        cookie: u64,
        cdescs: u16,
        rdescs: u16,
    ) {
        let slot = &mut self.slots[idx as usize];
        debug_assert_eq!(slot.state, ReqState::Building);
        slot.state = ReqState::Ready;
        slot.session = Some(session);
        slot.cookie = cookie;
        slot.cdescs = cdescs;
        slot.rdescs = rdescs;
    }

    /// Move `Ready → Queued` when the request joins a flushed batch.
    pub(crate) fn mark_queued(&mut self, idx: u16) {
        let slot = &mut self.slots[idx as usize];
        debug_assert_eq!(slot.state, ReqState::Ready);
        slot.state = ReqState::Queued;
    }

    /// Move `Queued → Completed` and take the session and cookie for the
    /// completion callback.
    pub(crate) fn complete(&mut self, idx: u16) -> (Arc<Session>, u64) {
        let slot = &mut self.slots[idx as usize];
        debug_assert_eq!(slot.state, ReqState::Queued);
        slot.state = ReqState::Completed;
        let session = slot.session.take().expect("completed slot has a session");
        (session, slot.cookie)
    }

    /// Return a `Completed` slot to the free list.
    pub(crate) fn release(&mut self, idx: u16) {
        let slot = &mut self.slots[idx as usize];
        debug_assert_eq!(slot.state, ReqState::Completed);
        slot.clear();
        self.free.push(idx);
    }

    pub(crate) fn get(&self, idx: u16) -> &RequestSlot {
        &self.slots[idx as usize]
    }

    /// Number of free slots.
    pub(crate) fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Total slots.
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Force every non-free slot back to the free list, taking the sessions
    /// and cookies of queued requests so they can be failed out. Used only by
    /// the ring reset path.
    pub(crate) fn drain_reset(&mut self) -> Vec<(Arc<Session>, u64)> {
        let mut orphans = Vec::new();
        for idx in 0..self.slots.len() {
            let slot = &mut self.slots[idx];
            if slot.state == ReqState::Free {
                continue;
            }
            if let Some(session) = slot.session.take() {
                orphans.push((session, slot.cookie));
            }
            slot.clear();
            self.free.push(idx as u16);
        }
        orphans
    }
}
