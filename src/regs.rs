//! Hardware register interface.
//!
//! The engine drives the device through a small per-ring surface: program the
//! ring base/size pair, bump the "prepared" counters to hand descriptors to
//! the engine, read the "processed" counter to learn how many packets
//! completed, and acknowledge what was reaped. [`EngineRegs`] abstracts that
//! surface so the core is testable against a software model;
//! [`MmioEngineRegs`] is the volatile memory-mapped implementation.

use crate::descr::{CMD_DESC_SIZE, RES_DESC_SIZE};
use crate::ring::RingId;

/// Ring memory geometry programmed at init.
#[derive(Debug, Clone, Copy)]
pub struct RingHwConfig {
    /// Command ring base bus address.
    pub cdr_base: u64,
    /// Result ring base bus address.
    pub rdr_base: u64,
    /// Descriptors per ring.
    pub ring_size: u32,
    /// Completed-packet count at which the completion interrupt fires.
    pub intr_threshold: u32,
}

/// Per-ring hardware register operations.
///
/// Counter arguments are in descriptor units; implementations convert to
/// whatever the device expects (typically byte offsets). None of these calls
/// may block: they are issued under the ring lock, some from interrupt
/// context.
pub trait EngineRegs: Send + Sync {
    /// Program ring bases, sizes, and the interrupt threshold.
    fn init_ring(&self, ring: RingId, config: &RingHwConfig);

    /// Add `descs` command descriptors to the ring's prepared counter.
    fn cdr_prepared(&self, ring: RingId, descs: u32);

    /// Add `descs` result descriptors to the ring's prepared counter.
    fn rdr_prepared(&self, ring: RingId, descs: u32);

    /// Packets completed since the last acknowledge.
    fn rdr_processed(&self, ring: RingId) -> u32;

    /// Acknowledge `packets` completed packets spanning `descs` result
    /// descriptors, and clear the ring's interrupt.
    fn rdr_ack(&self, ring: RingId, packets: u32, descs: u32);

    /// Reset the ring engine after a fatal ring fault. The caller re-programs
    /// the ring with [`init_ring`](Self::init_ring) afterwards.
    fn reset_ring(&self, ring: RingId);
}

/// Register block layout, one block per ring pair.
pub mod layout {
    /// Byte stride between per-ring register blocks.
    pub const RING_STRIDE: usize = 0x100;

    pub const CDR_BASE_LO: usize = 0x00;
    pub const CDR_BASE_HI: usize = 0x04;
    pub const CDR_SIZE: usize = 0x08;
    /// Write: prepared command bytes to hand to the engine.
    pub const CDR_PREP_COUNT: usize = 0x10;

    pub const RDR_BASE_LO: usize = 0x20;
    pub const RDR_BASE_HI: usize = 0x24;
    pub const RDR_SIZE: usize = 0x28;
    /// Write: prepared result bytes to hand to the engine.
    pub const RDR_PREP_COUNT: usize = 0x30;
    /// Read: completed packets [23:16] and result bytes [15:0].
    pub const RDR_PROC_COUNT: usize = 0x34;
    /// Write: interrupt threshold in packets.
    pub const RDR_THRESH: usize = 0x38;
    /// Write: acknowledge processed work and clear the ring interrupt.
    pub const RDR_ACK: usize = 0x3c;
    /// Write: reset the ring engine.
    pub const RING_RESET: usize = 0x40;

    pub const PROC_PKT_SHIFT: u32 = 16;
    pub const PROC_PKT_MASK: u32 = 0xff;
    pub const PROC_BYTES_MASK: u32 = 0xffff;
}

/// Volatile MMIO implementation of [`EngineRegs`].
pub struct MmioEngineRegs {
    base: *mut u32,
}

// Safety: all accesses are volatile reads/writes of device registers; the
// struct holds no CPU-side state.
unsafe impl Send for MmioEngineRegs {}
unsafe impl Sync for MmioEngineRegs {}

impl MmioEngineRegs {
    /// Wrap a mapped register window.
    ///
    /// # Safety
    /// `base` must point at the device's ring register window, mapped
    /// uncached, and stay valid for the lifetime of the value.
    pub unsafe fn new(base: *mut u32) -> Self {
        MmioEngineRegs { base }
    }

    fn write(&self, ring: RingId, reg: usize, value: u32) {
        let offset = ring as usize * layout::RING_STRIDE + reg;
        // Safety: offset stays within the ring register window per `new`.
        unsafe {
            self.base.byte_add(offset).write_volatile(value);
        }
    }

    fn read(&self, ring: RingId, reg: usize) -> u32 {
        let offset = ring as usize * layout::RING_STRIDE + reg;
        // Safety: as for `write`.
        unsafe { self.base.byte_add(offset).read_volatile() }
    }
}

impl EngineRegs for MmioEngineRegs {
    fn init_ring(&self, ring: RingId, config: &RingHwConfig) {
        self.write(ring, layout::CDR_BASE_LO, config.cdr_base as u32);
        self.write(ring, layout::CDR_BASE_HI, (config.cdr_base >> 32) as u32);
        self.write(ring, layout::CDR_SIZE, config.ring_size * CMD_DESC_SIZE as u32);
        self.write(ring, layout::RDR_BASE_LO, config.rdr_base as u32);
        self.write(ring, layout::RDR_BASE_HI, (config.rdr_base >> 32) as u32);
        self.write(ring, layout::RDR_SIZE, config.ring_size * RES_DESC_SIZE as u32);
        self.write(ring, layout::RDR_THRESH, config.intr_threshold);
    }

    fn cdr_prepared(&self, ring: RingId, descs: u32) {
        self.write(ring, layout::CDR_PREP_COUNT, descs * CMD_DESC_SIZE as u32);
    }

    fn rdr_prepared(&self, ring: RingId, descs: u32) {
        self.write(ring, layout::RDR_PREP_COUNT, descs * RES_DESC_SIZE as u32);
    }

    fn rdr_processed(&self, ring: RingId) -> u32 {
        let proc = self.read(ring, layout::RDR_PROC_COUNT);
        (proc >> layout::PROC_PKT_SHIFT) & layout::PROC_PKT_MASK
    }

    fn rdr_ack(&self, ring: RingId, packets: u32, descs: u32) {
        let bytes = descs * RES_DESC_SIZE as u32;
        self.write(
            ring,
            layout::RDR_ACK,
            (packets & layout::PROC_PKT_MASK) << layout::PROC_PKT_SHIFT
                | (bytes & layout::PROC_BYTES_MASK),
        );
    }

    fn reset_ring(&self, ring: RingId) {
        self.write(ring, layout::RING_RESET, 1);
    }
}
