//! Descriptor rings and per-ring state.
//!
//! Each ring pair owns one DMA arena carved into four regions: the command
//! ring, the result ring, the context records, and the auxiliary token
//! buffers (one record and one buffer per request slot). Cursors advance
//! modulo the ring size; a ring is full when advancing the write cursor would
//! land on the read cursor, so at most `capacity - 1` descriptors are ever
//! live.

use std::collections::VecDeque;

use crate::completion::CompletionEvent;
use crate::config::Config;
use crate::context::CTX_RECORD_SIZE;
use crate::descr::{CmdDesc, ResDesc, CMD_DESC_SIZE, RES_DESC_SIZE};
use crate::dma::DmaArena;
use crate::request::RequestPool;
use crate::token::{TokenBuf, MAX_TOKEN_WORDS};

/// Identifies one ring pair within the engine.
pub type RingId = u32;

/// Auxiliary token buffer size per request slot, in bytes.
pub const TOKEN_AUX_SIZE: usize = MAX_TOKEN_WORDS * 4;

/// Write/read cursors over a fixed-capacity circular descriptor array.
#[derive(Debug)]
pub(crate) struct DescrRing {
    write: u32,
    read: u32,
    capacity: u32,
}

impl DescrRing {
    pub(crate) fn new(capacity: u32) -> Self {
        debug_assert!(capacity >= 2);
        DescrRing { write: 0, read: 0, capacity }
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Descriptors currently reserved and not yet retired.
    pub(crate) fn live(&self) -> u32 {
        (self.write + self.capacity - self.read) % self.capacity
    }

    /// Descriptors that can still be reserved.
    pub(crate) fn available(&self) -> u32 {
        self.capacity - 1 - self.live()
    }

    pub(crate) fn write_index(&self) -> u32 {
        self.write
    }

    pub(crate) fn read_index(&self) -> u32 {
        self.read
    }

    /// Reserve `n` contiguous positions. Returns the first index, or `None`
    /// without any state change if the ring cannot hold them.
    pub(crate) fn reserve(&mut self, n: u32) -> Option<u32> {
        debug_assert!(n > 0);
        if n > self.available() {
            return None;
        }
        let start = self.write;
        self.write = (self.write + n) % self.capacity;
        Some(start)
    }

    /// Undo the most recent `n` reserved positions. Only valid while no
    /// later reservation has been committed to hardware.
    pub(crate) fn rollback(&mut self, n: u32) {
        debug_assert!(n <= self.live(), "rollback past read cursor");
        self.write = (self.write + self.capacity - n % self.capacity) % self.capacity;
    }

    /// Retire `n` consumed descriptors. Called only by the completion reaper.
    pub(crate) fn advance_read(&mut self, n: u32) {
        debug_assert!(n <= self.live(), "retiring more descriptors than live");
        self.read = (self.read + n) % self.capacity;
    }

    pub(crate) fn reset(&mut self) {
        self.write = 0;
        self.read = 0;
    }
}

/// All mutable state of one ring pair. Guarded by the engine's per-ring lock;
/// nothing here is touched without holding it.
pub(crate) struct RingState {
    pub(crate) cdr: DescrRing,
    pub(crate) rdr: DescrRing,
    pub(crate) pool: RequestPool,
    /// Built requests awaiting a batch flush, in submission order.
    pub(crate) ready: VecDeque<u16>,
    /// Requests notified to hardware, in submission order. The reaper pops
    /// from the front; hardware completes in the same order.
    pub(crate) inflight: VecDeque<u16>,
    /// Reusable buffer of completions to fire after the lock is dropped.
    pub(crate) completions: Vec<CompletionEvent>,
    /// A submission failed for lack of capacity; the next reap that frees
    /// space must re-enable the producer path.
    pub(crate) blocked: bool,
    /// A ring-level fault was reported; only `reset_ring` clears this.
    pub(crate) faulted: bool,
    pub(crate) max_op_descs: u16,
    mem: DmaArena,
    cdr_off: usize,
    rdr_off: usize,
    ctx_off: usize,
    tok_off: usize,
}

impl RingState {
    pub(crate) fn new(config: &Config) -> Self {
        let ring_size = config.ring_size as usize;
        let slots = config.slots_per_ring as usize;

        let cdr_off = 0;
        let rdr_off = cdr_off + ring_size * CMD_DESC_SIZE;
        let ctx_off = rdr_off + ring_size * RES_DESC_SIZE;
        let tok_off = ctx_off + slots * CTX_RECORD_SIZE;
        let total = tok_off + slots * TOKEN_AUX_SIZE;

        RingState {
            cdr: DescrRing::new(config.ring_size),
            rdr: DescrRing::new(config.ring_size),
            pool: RequestPool::new(config.slots_per_ring),
            ready: VecDeque::with_capacity(slots),
            inflight: VecDeque::with_capacity(slots),
            completions: Vec::with_capacity(slots),
            blocked: false,
            faulted: false,
            max_op_descs: config.max_op_descs,
            mem: DmaArena::new(total),
            cdr_off,
            rdr_off,
            ctx_off,
            tok_off,
        }
    }

    /// Bus address of the command ring base.
    pub(crate) fn cdr_base(&self) -> u64 {
        self.mem.addr(self.cdr_off)
    }

    /// Bus address of the result ring base.
    pub(crate) fn rdr_base(&self) -> u64 {
        self.mem.addr(self.rdr_off)
    }

    /// Bus address of a slot's context record.
    pub(crate) fn ctx_addr(&self, slot: u16) -> u64 {
        self.mem.addr(self.ctx_off + slot as usize * CTX_RECORD_SIZE)
    }

    /// Mutable view of a slot's context record.
    pub(crate) fn ctx_record_mut(&mut self, slot: u16) -> &mut [u8] {
        self.mem
            .bytes_mut(self.ctx_off + slot as usize * CTX_RECORD_SIZE, CTX_RECORD_SIZE)
    }

    /// Copy a token's word stream into the slot's auxiliary buffer and return
    /// its bus address. Used when the token does not fit inline.
    pub(crate) fn write_token_aux(&mut self, slot: u16, token: &TokenBuf) -> u64 {
        let off = self.tok_off + slot as usize * TOKEN_AUX_SIZE;
        let words = token.words();
        let bytes = self.mem.bytes_mut(off, words.len() * 4);
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        self.mem.addr(off)
    }

    pub(crate) fn write_cmd_desc(&mut self, idx: u32, desc: &CmdDesc) {
        let off = self.cdr_off + idx as usize * CMD_DESC_SIZE;
        let dst = self.mem.bytes_mut(off, CMD_DESC_SIZE);
        // Safety: CmdDesc is repr(C) plain integers of exactly CMD_DESC_SIZE
        // bytes, and dst is a checked arena slice of the same length.
        unsafe {
            std::ptr::copy_nonoverlapping(
                desc as *const CmdDesc as *const u8,
                dst.as_mut_ptr(),
                CMD_DESC_SIZE,
            );
        }
    }

    pub(crate) fn write_res_desc(&mut self, idx: u32, desc: &ResDesc) {
        let off = self.rdr_off + idx as usize * RES_DESC_SIZE;
        let dst = self.mem.bytes_mut(off, RES_DESC_SIZE);
        // Safety: as for write_cmd_desc.
        unsafe {
            std::ptr::copy_nonoverlapping(
                desc as *const ResDesc as *const u8,
                dst.as_mut_ptr(),
                RES_DESC_SIZE,
            );
        }
    }

    pub(crate) fn read_res_desc(&self, idx: u32) -> ResDesc {
        let off = self.rdr_off + idx as usize * RES_DESC_SIZE;
        let src = self.mem.bytes(off, RES_DESC_SIZE);
        let mut desc = ResDesc::default();
        // Safety: as for write_cmd_desc, in the other direction.
        unsafe {
            std::ptr::copy_nonoverlapping(
                src.as_ptr(),
                &mut desc as *mut ResDesc as *mut u8,
                RES_DESC_SIZE,
            );
        }
        desc
    }

    #[cfg(test)]
    pub(crate) fn read_cmd_desc(&self, idx: u32) -> CmdDesc {
        let off = self.cdr_off + idx as usize * CMD_DESC_SIZE;
        let src = self.mem.bytes(off, CMD_DESC_SIZE);
        let mut desc = CmdDesc::default();
        // Safety: as for write_cmd_desc, in the other direction.
        unsafe {
            std::ptr::copy_nonoverlapping(
                src.as_ptr(),
                &mut desc as *mut CmdDesc as *mut u8,
                CMD_DESC_SIZE,
            );
        }
        desc
    }

    /// OR flags into an already written command descriptor's particle word.
    /// Used to mark the last descriptor of a chain after it is known.
    pub(crate) fn or_cmd_flags(&mut self, idx: u32, flags: u32) {
        let off = self.cdr_off + idx as usize * CMD_DESC_SIZE;
        let bytes = self.mem.bytes_mut(off, 4);
        let word = u32::from_le_bytes(bytes.try_into().unwrap()) | flags;
        self.mem.bytes_mut(off, 4).copy_from_slice(&word.to_le_bytes());
    }

    /// As [`or_cmd_flags`](Self::or_cmd_flags) for the result ring.
    pub(crate) fn or_res_flags(&mut self, idx: u32, flags: u32) {
        let off = self.rdr_off + idx as usize * RES_DESC_SIZE;
        let bytes = self.mem.bytes_mut(off, 4);
        let word = u32::from_le_bytes(bytes.try_into().unwrap()) | flags;
        self.mem.bytes_mut(off, 4).copy_from_slice(&word.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn reserve_advances_write() {
        let mut ring = DescrRing::new(8);
        assert_eq!(ring.available(), 7);
        assert_eq!(ring.reserve(3), Some(0));
        assert_eq!(ring.reserve(2), Some(3));
        assert_eq!(ring.live(), 5);
        assert_eq!(ring.available(), 2);
    }

    #[test]
    fn full_ring_rejects_without_state_change() {
        let mut ring = DescrRing::new(8);
        assert_eq!(ring.reserve(7), Some(0));
        let write = ring.write_index();
        assert_eq!(ring.reserve(1), None);
        assert_eq!(ring.write_index(), write);
        assert_eq!(ring.live(), 7);
    }

    #[test]
    fn rollback_restores_exact_cursor() {
        let mut ring = DescrRing::new(8);
        ring.reserve(2).unwrap();
        let write = ring.write_index();
        ring.reserve(4).unwrap();
        ring.rollback(4);
        assert_eq!(ring.write_index(), write);
        assert_eq!(ring.live(), 2);
    }

    #[test]
    fn cursors_wrap() {
        let mut ring = DescrRing::new(4);
        for _ in 0..10 {
            assert!(ring.reserve(3).is_some());
            ring.advance_read(3);
        }
        assert_eq!(ring.live(), 0);
    }

    #[test]
    fn read_frees_capacity() {
        let mut ring = DescrRing::new(8);
        ring.reserve(7).unwrap();
        assert_eq!(ring.reserve(1), None);
        ring.advance_read(4);
        assert_eq!(ring.reserve(4), Some(7));
        assert_eq!(ring.reserve(1), None);
    }

    proptest! {
        /// Under any interleaving of reserve/rollback/advance the live count
        /// never reaches the capacity.
        #[test]
        fn live_never_reaches_capacity(ops in proptest::collection::vec((0u8..3, 1u32..9), 0..200)) {
            let cap = 8;
            let mut ring = DescrRing::new(cap);
            // Only the latest reservation may be rolled back; anything else
            // commits it, matching how the chain builder uses the ring.
            let mut pending = 0u32;
            for (op, n) in ops {
                match op {
                    0 => {
                        if ring.reserve(n).is_some() {
                            pending = n;
                        }
                    }
                    1 => {
                        if pending > 0 {
                            ring.rollback(pending);
                            pending = 0;
                        }
                    }
                    _ => {
                        pending = 0;
                        let n = n.min(ring.live());
                        if n > 0 {
                            ring.advance_read(n);
                        }
                    }
                }
                prop_assert!(ring.live() < cap);
                prop_assert_eq!(ring.live(), (ring.write_index() + cap - ring.read_index()) % cap);
            }
        }
    }

    fn small_state() -> RingState {
        let config = crate::config::ConfigBuilder::new()
            .rings(1)
            .ring_size(16)
            .slots_per_ring(4)
            .max_op_descs(8)
            .build()
            .unwrap();
        RingState::new(&config)
    }

    #[test]
    fn regions_do_not_overlap() {
        let rs = small_state();
        assert!(rs.cdr_base() < rs.rdr_base());
        assert!(rs.rdr_base() < rs.ctx_addr(0));
        assert_eq!(rs.ctx_addr(1) - rs.ctx_addr(0), CTX_RECORD_SIZE as u64);
    }

    #[test]
    fn descriptors_round_trip_through_ring_memory() {
        let mut rs = small_state();
        let part = crate::dma::Particle { addr: 0xdead_beef, len: 42 };
        let desc = CmdDesc::segment(part, true, false);
        rs.write_cmd_desc(3, &desc);
        assert_eq!(rs.read_cmd_desc(3), desc);

        let rdesc = ResDesc::segment(part, false, true);
        rs.write_res_desc(5, &rdesc);
        assert_eq!(rs.read_res_desc(5), rdesc);
    }

    #[test]
    fn flag_patching() {
        use crate::descr::PARTICLE_LAST;
        let mut rs = small_state();
        let part = crate::dma::Particle { addr: 0x1000, len: 8 };
        rs.write_cmd_desc(0, &CmdDesc::segment(part, true, false));
        rs.or_cmd_flags(0, PARTICLE_LAST);
        assert!(rs.read_cmd_desc(0).is_last());
    }
}
