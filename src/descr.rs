//! Hardware descriptor records.
//!
//! Both rings hold fixed-size records the engine DMA-reads in place. A command
//! descriptor addresses one input particle; the first descriptor of a chain
//! additionally carries the packet header: total input length, context-record
//! pointer, the 16-byte token header, and either the inline token words or a
//! pointer to the slot's auxiliary token buffer.

use crate::dma::Particle;

/// Command descriptor size in bytes (ring stride).
pub const CMD_DESC_SIZE: usize = 64;
/// Result descriptor size in bytes (ring stride).
pub const RES_DESC_SIZE: usize = 32;
/// Token instruction words that fit inline in the first command descriptor.
pub const INLINE_TOKEN_WORDS: usize = 6;
/// Token header words (per-packet IV / counter / authentication block).
pub const TOKEN_HEADER_WORDS: usize = 4;

// ── Particle word ────────────────────────────────────────────────────────
// [16:0] segment length, [30] first-in-chain, [31] last-in-chain.

/// Maximum particle (and packet) length: 17 bits.
pub const PARTICLE_LEN_MASK: u32 = 0x1ffff;
pub const PARTICLE_FIRST: u32 = 1 << 30;
pub const PARTICLE_LAST: u32 = 1 << 31;

// ── Packet word (first command descriptor only) ──────────────────────────
// [16:0] total input length, [24:17] token word count, [30] token-in-aux.

pub const PACKET_LEN_MASK: u32 = 0x1ffff;
pub const PACKET_TOKEN_WORDS_SHIFT: u32 = 17;
pub const PACKET_TOKEN_WORDS_MASK: u32 = 0xff;
pub const PACKET_TOKEN_AUX: u32 = 1 << 30;

// ── Result word ──────────────────────────────────────────────────────────
// [14:0] per-operation error bits; [31:30] ring-level fault bits.

/// Per-operation error bit mask (E0..E14).
pub const RES_ERR_MASK: u32 = 0x7fff;
/// Tag verification failed. Reported as a distinct outcome from every other
/// error class.
pub const RES_ERR_AUTH_FAILED: u32 = 1 << 9;
/// Result particle too small for the engine's output.
pub const RES_FAULT_BUF_OVERFLOW: u32 = 1 << 30;
/// Engine ran past the prepared descriptors. Fatal to the ring.
pub const RES_FAULT_DESC_OVERFLOW: u32 = 1 << 31;
/// Any ring-level fault bit.
pub const RES_FAULT_MASK: u32 = RES_FAULT_BUF_OVERFLOW | RES_FAULT_DESC_OVERFLOW;

/// One command-ring record.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CmdDesc {
    /// Particle length and chain flags.
    pub particle: u32,
    /// Packet header word; zero on non-first descriptors.
    pub packet: u32,
    /// Particle bus address, low half.
    pub addr_lo: u32,
    /// Particle bus address, high half.
    pub addr_hi: u32,
    /// Context record bus address, low half; zero on non-first descriptors.
    pub ctx_lo: u32,
    /// Context record bus address, high half.
    pub ctx_hi: u32,
    /// Per-packet token header (IV / counter / authentication block).
    pub token_hdr: [u32; TOKEN_HEADER_WORDS],
    /// Inline token words, or `[aux_lo, aux_hi, 0, ..]` when
    /// [`PACKET_TOKEN_AUX`] is set in `packet`.
    pub token: [u32; INLINE_TOKEN_WORDS],
}

const _: () = assert!(std::mem::size_of::<CmdDesc>() == CMD_DESC_SIZE);

/// One result-ring record. The engine writes `data_len` and `result` as it
/// retires the descriptor.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResDesc {
    /// Particle length and chain flags.
    pub particle: u32,
    /// Particle bus address, low half.
    pub addr_lo: u32,
    /// Particle bus address, high half.
    pub addr_hi: u32,
    /// Bytes the engine wrote to this particle.
    pub data_len: u32,
    /// Error and fault bits.
    pub result: u32,
    pub _rsvd: [u32; 3],
}

const _: () = assert!(std::mem::size_of::<ResDesc>() == RES_DESC_SIZE);

impl CmdDesc {
    /// Build a plain segment descriptor for one particle.
    pub fn segment(part: Particle, first: bool, last: bool) -> Self {
        debug_assert!(part.len <= PARTICLE_LEN_MASK, "particle length overflow");
        let mut particle = part.len & PARTICLE_LEN_MASK;
        if first {
            particle |= PARTICLE_FIRST;
        }
        if last {
            particle |= PARTICLE_LAST;
        }
        CmdDesc {
            particle,
            addr_lo: part.addr as u32,
            addr_hi: (part.addr >> 32) as u32,
            ..Default::default()
        }
    }

    /// Fill the packet header fields of a first-in-chain descriptor.
    ///
    /// `token_words` is the full instruction stream; when it fits inline it is
    /// stored here, otherwise `aux_addr` must point at a copy in the slot's
    /// auxiliary token buffer.
    pub fn set_header(
        &mut self,
        total_len: u32,
        ctx_addr: u64,
        token_hdr: &[u32; TOKEN_HEADER_WORDS],
        token_words: &[u32],
        aux_addr: Option<u64>,
    ) {
        debug_assert!(total_len <= PACKET_LEN_MASK, "packet length overflow");
        debug_assert!(token_words.len() <= PACKET_TOKEN_WORDS_MASK as usize);
        self.packet = (total_len & PACKET_LEN_MASK)
            | ((token_words.len() as u32 & PACKET_TOKEN_WORDS_MASK) << PACKET_TOKEN_WORDS_SHIFT);
        self.ctx_lo = ctx_addr as u32;
        self.ctx_hi = (ctx_addr >> 32) as u32;
        self.token_hdr = *token_hdr;
        match aux_addr {
            Some(aux) => {
                self.packet |= PACKET_TOKEN_AUX;
                self.token = [0; INLINE_TOKEN_WORDS];
                self.token[0] = aux as u32;
                self.token[1] = (aux >> 32) as u32;
            }
            None => {
                debug_assert!(token_words.len() <= INLINE_TOKEN_WORDS, "token must fit inline");
                self.token = [0; INLINE_TOKEN_WORDS];
                self.token[..token_words.len()].copy_from_slice(token_words);
            }
        }
    }

    /// Particle length in bytes.
    pub fn len(&self) -> u32 {
        self.particle & PARTICLE_LEN_MASK
    }

    /// Particle bus address.
    pub fn addr(&self) -> u64 {
        self.addr_lo as u64 | (self.addr_hi as u64) << 32
    }

    /// Context record bus address (first descriptor only).
    pub fn ctx_addr(&self) -> u64 {
        self.ctx_lo as u64 | (self.ctx_hi as u64) << 32
    }

    pub fn is_first(&self) -> bool {
        self.particle & PARTICLE_FIRST != 0
    }

    pub fn is_last(&self) -> bool {
        self.particle & PARTICLE_LAST != 0
    }

    /// Total packet input length (first descriptor only).
    pub fn packet_len(&self) -> u32 {
        self.packet & PACKET_LEN_MASK
    }

    /// Token word count (first descriptor only).
    pub fn token_words(&self) -> usize {
        ((self.packet >> PACKET_TOKEN_WORDS_SHIFT) & PACKET_TOKEN_WORDS_MASK) as usize
    }

    /// Auxiliary token buffer address, when the token did not fit inline.
    pub fn token_aux(&self) -> Option<u64> {
        if self.packet & PACKET_TOKEN_AUX != 0 {
            Some(self.token[0] as u64 | (self.token[1] as u64) << 32)
        } else {
            None
        }
    }
}

impl ResDesc {
    /// Build a result segment descriptor for one output particle.
    pub fn segment(part: Particle, first: bool, last: bool) -> Self {
        debug_assert!(part.len <= PARTICLE_LEN_MASK, "particle length overflow");
        let mut particle = part.len & PARTICLE_LEN_MASK;
        if first {
            particle |= PARTICLE_FIRST;
        }
        if last {
            particle |= PARTICLE_LAST;
        }
        ResDesc {
            particle,
            addr_lo: part.addr as u32,
            addr_hi: (part.addr >> 32) as u32,
            ..Default::default()
        }
    }

    /// Particle length in bytes.
    pub fn len(&self) -> u32 {
        self.particle & PARTICLE_LEN_MASK
    }

    /// Particle bus address.
    pub fn addr(&self) -> u64 {
        self.addr_lo as u64 | (self.addr_hi as u64) << 32
    }

    pub fn is_first(&self) -> bool {
        self.particle & PARTICLE_FIRST != 0
    }

    pub fn is_last(&self) -> bool {
        self.particle & PARTICLE_LAST != 0
    }

    /// Per-operation error bits.
    pub fn error_bits(&self) -> u32 {
        self.result & RES_ERR_MASK
    }

    /// Whether a ring-level fault bit is set.
    pub fn is_ring_fault(&self) -> bool {
        self.result & RES_FAULT_MASK != 0
    }
}
