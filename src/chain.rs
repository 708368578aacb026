//! Chain builder: labelled byte ranges to descriptor chains.
//!
//! The command chain covers, in order, the AAD bytes, the payload bytes, and
//! (for decrypt-with-verify operations) the supplied digest bytes. The
//! result chain covers the transformed payload and then a generated digest;
//! regions the engine does not modify (AAD) never appear on the result ring.
//! Adjacent sub-particles are coalesced, so contiguous ranges in one buffer
//! produce a single descriptor.
//!
//! Building reserves ring positions one descriptor at a time. Any failure
//! rolls back every position already reserved on both rings before the error
//! is returned, so a partial chain is never left live.

use crate::descr::{CmdDesc, ResDesc, PARTICLE_LAST, PARTICLE_LEN_MASK};
use crate::dma::Particle;
use crate::error::Error;
use crate::ring::RingState;
use crate::token::TokenBuf;

/// A labelled byte range within a logical buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteRange {
    pub offset: u32,
    pub len: u32,
}

impl ByteRange {
    pub fn new(offset: u32, len: u32) -> Self {
        ByteRange { offset, len }
    }
}

/// Descriptor counts of a built chain. Immutable once returned; the reaper
/// retires exactly these many positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ChainCounts {
    pub(crate) cdescs: u16,
    pub(crate) rdescs: u16,
}

/// Everything the builder needs for one request's chains.
pub(crate) struct ChainJob<'a> {
    pub(crate) src: crate::dma::SegList<'a>,
    pub(crate) dst: crate::dma::SegList<'a>,
    /// Input ranges in engine order: AAD, payload, supplied digest.
    pub(crate) cmd_ranges: [Option<ByteRange>; 3],
    /// Output ranges in engine order: transformed payload, generated digest.
    pub(crate) res_ranges: [Option<ByteRange>; 2],
    /// Total logical input length recorded in the packet header. Zero-input
    /// operations keep 0 here even though a dummy particle is chained.
    pub(crate) total_len: u32,
    pub(crate) ctx_addr: u64,
    pub(crate) token: &'a TokenBuf,
    /// Auxiliary token buffer address when the token does not fit inline.
    pub(crate) token_aux: Option<u64>,
}

/// Build both chains for one request. On error the ring cursors are exactly
/// as they were before the call.
pub(crate) fn build(rs: &mut RingState, job: &ChainJob<'_>) -> Result<ChainCounts, Error> {
    let mut counts = ChainCounts::default();
    match build_inner(rs, job, &mut counts) {
        Ok(()) => Ok(counts),
        Err(e) => {
            rs.cdr.rollback(counts.cdescs as u32);
            rs.rdr.rollback(counts.rdescs as u32);
            Err(e)
        }
    }
}

fn build_inner(rs: &mut RingState, job: &ChainJob<'_>, counts: &mut ChainCounts) -> Result<(), Error> {
    // ── Command chain ────────────────────────────────────────────────
    let mut pend: Option<Particle> = None;
    for range in job.cmd_ranges.iter().flatten() {
        if range.len == 0 {
            continue;
        }
        for part in job.src.slice(range.offset, range.len)? {
            pend = match pend {
                Some(p) if coalesces(p, part) => Some(Particle {
                    addr: p.addr,
                    len: p.len + part.len,
                }),
                Some(p) => {
                    emit_cmd(rs, job, counts, p)?;
                    Some(part)
                }
                None => Some(part),
            };
        }
    }
    let last = match pend {
        Some(p) => emit_cmd(rs, job, counts, p)?,
        // Zero logical input: the engine still needs one descriptor, so chain
        // one byte of the context record as scratch. The header keeps length 0.
        None => emit_cmd(rs, job, counts, Particle { addr: job.ctx_addr, len: 1 })?,
    };
    rs.or_cmd_flags(last, PARTICLE_LAST);

    // ── Result chain ─────────────────────────────────────────────────
    let mut pend: Option<Particle> = None;
    for range in job.res_ranges.iter().flatten() {
        if range.len == 0 {
            continue;
        }
        for part in job.dst.slice(range.offset, range.len)? {
            pend = match pend {
                Some(p) if coalesces(p, part) => Some(Particle {
                    addr: p.addr,
                    len: p.len + part.len,
                }),
                Some(p) => {
                    emit_res(rs, counts, p)?;
                    Some(part)
                }
                None => Some(part),
            };
        }
    }
    let last = match pend {
        Some(p) => emit_res(rs, counts, p)?,
        // An empty result stream still takes exactly one zero-length
        // descriptor so the engine has somewhere to report status.
        None => emit_res(rs, counts, Particle { addr: job.ctx_addr, len: 0 })?,
    };
    rs.or_res_flags(last, PARTICLE_LAST);

    Ok(())
}

fn coalesces(pend: Particle, next: Particle) -> bool {
    pend.addr + pend.len as u64 == next.addr && pend.len + next.len <= PARTICLE_LEN_MASK
}

fn check_op_limit(rs: &RingState, counts: &ChainCounts) -> Result<(), Error> {
    if counts.cdescs as u32 + counts.rdescs as u32 >= rs.max_op_descs as u32 {
        return Err(Error::ChainTooLong);
    }
    Ok(())
}

fn emit_cmd(
    rs: &mut RingState,
    job: &ChainJob<'_>,
    counts: &mut ChainCounts,
    part: Particle,
) -> Result<u32, Error> {
    check_op_limit(rs, counts)?;
    let idx = rs.cdr.reserve(1).ok_or(Error::RingFull)?;
    let first = counts.cdescs == 0;
    let mut desc = CmdDesc::segment(part, first, false);
    if first {
        desc.set_header(
            job.total_len,
            job.ctx_addr,
            job.token.header(),
            job.token.words(),
            job.token_aux,
        );
    }
    rs.write_cmd_desc(idx, &desc);
    counts.cdescs += 1;
    Ok(idx)
}

fn emit_res(rs: &mut RingState, counts: &mut ChainCounts, part: Particle) -> Result<u32, Error> {
    check_op_limit(rs, counts)?;
    let idx = rs.rdr.reserve(1).ok_or(Error::RingFull)?;
    let first = counts.rdescs == 0;
    let desc = ResDesc::segment(part, first, false);
    rs.write_res_desc(idx, &desc);
    counts.rdescs += 1;
    Ok(idx)
}
