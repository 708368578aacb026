//! The packet engine: ring set, submission, batching, and reaping.
//!
//! One [`PacketEngine`] owns every ring pair behind a device handle. Each
//! ring is guarded by its own lock; submission and completion take the same
//! lock and never hold it across a blocking call or a user callback.
//! Nothing here blocks the caller: capacity failures are synchronous
//! retryable errors, and the blocked→resume edge is the whole backpressure
//! protocol.

use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::chain::{self, ByteRange, ChainJob};
use crate::completion::{classify, BackpressureHandler, CompletionEvent, Outcome};
use crate::config::Config;
use crate::context::Direction;
use crate::descr::PACKET_LEN_MASK;
use crate::dma::SegList;
use crate::error::Error;
use crate::metrics;
use crate::regs::{EngineRegs, RingHwConfig};
use crate::ring::{RingId, RingState};
use crate::session::{OpMode, Session, SessionParams};
use crate::token::{TokenBuf, TokenParams};

/// One crypto operation, submitted against a session.
///
/// The byte ranges label regions of the logical source and destination
/// buffers; `src`/`dst` are those buffers resolved into DMA particles by the
/// external mapping layer. Ranges that do not apply to the session's mode
/// must be empty.
pub struct OpRequest<'a> {
    pub session: &'a Arc<Session>,
    pub dir: Direction,
    /// IV or nonce; length is checked per mode.
    pub iv: &'a [u8],
    pub src: SegList<'a>,
    pub dst: SegList<'a>,
    /// Additional authenticated data within `src`.
    pub aad: ByteRange,
    /// Payload within `src`.
    pub payload: ByteRange,
    /// Supplied digest within `src`; required (and only allowed) for
    /// decrypt-with-verify operations.
    pub digest: ByteRange,
    /// Transformed payload within `dst`.
    pub payload_out: ByteRange,
    /// Generated digest within `dst`; required for digest-generating
    /// operations.
    pub digest_out: ByteRange,
    /// Per-operation tag length override; the session's configured length
    /// applies when `None`.
    pub tag_len: Option<u8>,
    /// Per-operation cipher key replacing the session template's key.
    pub key_override: Option<&'a [u8]>,
    /// Opaque handle passed back through the completion callback.
    pub cookie: u64,
}

/// Per-ring occupancy snapshot.
#[derive(Debug, Clone, Copy)]
pub struct RingStats {
    pub ring: RingId,
    pub cdr_live: u32,
    pub rdr_live: u32,
    pub free_slots: usize,
    pub ready: usize,
    pub inflight: usize,
    pub blocked: bool,
    pub faulted: bool,
}

/// The ring set behind one device handle.
pub struct PacketEngine<R: EngineRegs> {
    regs: R,
    rings: Vec<Mutex<RingState>>,
    next_ring: AtomicU32,
    resume: Option<Arc<dyn BackpressureHandler>>,
    config: Config,
}

impl<R: EngineRegs> PacketEngine<R> {
    /// Allocate ring memory and program every ring pair.
    pub fn new(config: Config, regs: R) -> Result<Self, Error> {
        config.validate()?;
        let mut rings = Vec::with_capacity(config.rings as usize);
        for id in 0..config.rings {
            let rs = RingState::new(&config);
            regs.init_ring(
                id,
                &RingHwConfig {
                    cdr_base: rs.cdr_base(),
                    rdr_base: rs.rdr_base(),
                    ring_size: config.ring_size,
                    intr_threshold: config.intr_threshold,
                },
            );
            debug!(ring = id, size = config.ring_size, "ring pair initialized");
            rings.push(Mutex::new(rs));
        }
        Ok(PacketEngine {
            regs,
            rings,
            next_ring: AtomicU32::new(0),
            resume: None,
            config,
        })
    }

    /// Register the handler notified when a blocked producer path may
    /// resubmit. Call before sharing the engine.
    pub fn with_resume_handler(mut self, handler: Arc<dyn BackpressureHandler>) -> Self {
        self.resume = Some(handler);
        self
    }

    /// Number of ring pairs.
    pub fn rings(&self) -> u32 {
        self.config.rings
    }

    /// Create a session, pinned round-robin to one ring for its lifetime.
    pub fn create_session(&self, params: SessionParams<'_>) -> Result<Arc<Session>, Error> {
        let ring = self.next_ring.fetch_add(1, Ordering::Relaxed) % self.config.rings;
        Ok(Arc::new(Session::build(params, ring)?))
    }

    /// Chain one operation onto its session's ring.
    ///
    /// With `more` set the request only joins the ring's ready queue; the
    /// flush to hardware is deferred until a later `submit` or [`flush`]
    /// (reducing notification overhead across a burst). Retryable errors mark
    /// the ring blocked, and the next completion that frees capacity fires
    /// the resume handler.
    ///
    /// [`flush`]: Self::flush
    pub fn submit(&self, req: &OpRequest<'_>, more: bool) -> Result<(), Error> {
        let session = req.session;
        let digest_len = match req.tag_len {
            Some(len) => len as u32,
            None => session.tag_len as u32,
        };
        validate_request(req, digest_len)?;

        // Token compilation is pure; do it before touching ring state.
        let mut token = TokenBuf::new();
        session.compiler.compile(
            &TokenParams {
                dir: req.dir,
                aad_len: req.aad.len,
                payload_len: req.payload.len,
                digest_len,
                iv: req.iv,
            },
            &mut token,
        )?;

        let mode = session.mode;
        let verify = req.dir == Direction::Decrypt && mode.authenticated();
        let generates = req.dir == Direction::Encrypt && mode.authenticated();
        let cmd_ranges = [
            mode.uses_aad().then_some(req.aad),
            Some(req.payload),
            verify.then_some(req.digest),
        ];
        let res_ranges = [
            mode.produces_payload().then_some(req.payload_out),
            generates.then_some(req.digest_out),
        ];
        let total_len =
            req.aad.len as u64 + req.payload.len as u64 + if verify { digest_len as u64 } else { 0 };
        if total_len > PACKET_LEN_MASK as u64 {
            return Err(Error::InvalidRequest("operation too long"));
        }

        let ring = session.ring;
        let mut guard = self.rings[ring as usize].lock();
        let rs = &mut *guard;
        if rs.faulted {
            return Err(Error::RingFaulted { ring });
        }
        let Some(slot) = rs.pool.alloc() else {
            rs.blocked = true;
            metrics::SLOTS_EXHAUSTED.increment();
            return Err(Error::SlotsExhausted);
        };

        if let Err(e) =
            session
                .tpl
                .write_record(rs.ctx_record_mut(slot), req.dir, digest_len, req.key_override)
        {
            rs.pool.abort(slot);
            return Err(e);
        }
        let token_aux = if token.fits_inline() {
            None
        } else {
            Some(rs.write_token_aux(slot, &token))
        };
        let job = ChainJob {
            src: req.src,
            dst: req.dst,
            cmd_ranges,
            res_ranges,
            total_len: total_len as u32,
            ctx_addr: rs.ctx_addr(slot),
            token: &token,
            token_aux,
        };
        match chain::build(rs, &job) {
            Err(e) => {
                rs.pool.abort(slot);
                if e.is_retryable() {
                    rs.blocked = true;
                    metrics::RING_FULL.increment();
                }
                Err(e)
            }
            Ok(counts) => {
                rs.pool
                    .mark_ready(slot, Arc::clone(session), req.cookie, counts.cdescs, counts.rdescs);
                rs.ready.push_back(slot);
                metrics::REQUESTS_SUBMITTED.increment();
                trace!(
                    ring,
                    slot,
                    cdescs = counts.cdescs,
                    rdescs = counts.rdescs,
                    "request chained"
                );
                if !more {
                    self.flush_ring_locked(ring, rs);
                }
                Ok(())
            }
        }
    }

    /// Flush every ring's ready queue to hardware.
    pub fn flush(&self) {
        for (id, ring) in self.rings.iter().enumerate() {
            let mut guard = ring.lock();
            self.flush_ring_locked(id as RingId, &mut guard);
        }
    }

    /// Drain the ready FIFO into batches. Each batch gets exactly one pair of
    /// prepared-counter writes, regardless of how many requests it holds.
    fn flush_ring_locked(&self, ring: RingId, rs: &mut RingState) {
        while !rs.ready.is_empty() {
            let mut cdescs = 0u32;
            let mut rdescs = 0u32;
            let mut requests = 0u32;
            while let Some(&slot) = rs.ready.front() {
                let s = rs.pool.get(slot);
                let (sc, sr) = (s.cdescs as u32, s.rdescs as u32);
                if requests > 0 && cdescs + rdescs + sc + sr > self.config.max_batch_descs {
                    break;
                }
                rs.ready.pop_front();
                rs.pool.mark_queued(slot);
                rs.inflight.push_back(slot);
                cdescs += sc;
                rdescs += sr;
                requests += 1;
            }
            self.regs.cdr_prepared(ring, cdescs);
            self.regs.rdr_prepared(ring, rdescs);
            metrics::BATCHES_FLUSHED.increment();
            metrics::REQUESTS_INFLIGHT.add(requests as i64);
            trace!(ring, requests, cdescs, rdescs, "batch flushed");
        }
    }

    /// Drain completed work from a ring. Called from the ring's completion
    /// interrupt (or any polling context standing in for it).
    ///
    /// Walks the result ring by each completed request's recorded descriptor
    /// counts, classifies the hardware error word, fires callbacks outside
    /// the lock, and recycles slots. Returns the number of completed
    /// requests, or [`Error::RingFaulted`] when a ring-level fault was
    /// reported.
    pub fn on_ring_interrupt(&self, ring: RingId) -> Result<u32, Error> {
        let mut guard = self.rings[ring as usize].lock();
        let rs = &mut *guard;
        let reported = self.regs.rdr_processed(ring);
        debug_assert!(
            reported as usize <= rs.inflight.len(),
            "hardware reported more completions than requests in flight"
        );
        let n = reported.min(rs.inflight.len() as u32);

        let mut events = mem::take(&mut rs.completions);
        let mut packets = 0u32;
        let mut rdescs_acked = 0u32;
        let mut fatal = false;
        for _ in 0..n {
            let slot = rs.inflight.pop_front().expect("inflight request");
            let (cdescs, rdescs) = {
                let s = rs.pool.get(slot);
                (s.cdescs as u32, s.rdescs as u32)
            };
            let mut error_bits = 0u32;
            let mut ring_fault = false;
            let read = rs.rdr.read_index();
            let cap = rs.rdr.capacity();
            for k in 0..rdescs {
                let desc = rs.read_res_desc((read + k) % cap);
                error_bits |= desc.error_bits();
                if desc.is_ring_fault() {
                    ring_fault = true;
                }
            }
            rs.cdr.advance_read(cdescs);
            rs.rdr.advance_read(rdescs);
            packets += 1;
            rdescs_acked += rdescs;

            let (session, cookie) = rs.pool.complete(slot);
            rs.pool.release(slot);
            events.push(CompletionEvent {
                handler: Arc::clone(&session.handler),
                cookie,
                outcome: if ring_fault { Outcome::Fault } else { classify(error_bits) },
            });
            if ring_fault {
                fatal = true;
                break;
            }
        }
        if packets > 0 {
            self.regs.rdr_ack(ring, packets, rdescs_acked);
        }
        let mut resume = false;
        if fatal {
            rs.faulted = true;
            metrics::RING_FAULTS.increment();
        } else if rs.blocked && packets > 0 {
            rs.blocked = false;
            resume = true;
        }
        drop(guard);

        metrics::REQUESTS_INFLIGHT.sub(packets as i64);
        for event in events.drain(..) {
            match event.outcome {
                Outcome::Success => metrics::COMPLETIONS_SUCCESS.increment(),
                Outcome::AuthFailed => metrics::COMPLETIONS_AUTH_FAILED.increment(),
                Outcome::Fault => metrics::COMPLETIONS_FAULT.increment(),
            };
            event.handler.complete(event.cookie, event.outcome);
        }
        // Hand the (now empty) buffer back for the next interrupt.
        self.rings[ring as usize].lock().completions = events;

        if resume {
            metrics::RESUMES.increment();
            if let Some(handler) = &self.resume {
                handler.resume(ring);
            }
        }
        if fatal {
            warn!(ring, "ring-level fault; ring disabled until reset");
            return Err(Error::RingFaulted { ring });
        }
        Ok(packets)
    }

    /// Recover a faulted ring after the external reset path has quiesced the
    /// hardware. Every request still on the ring is failed out with
    /// [`Outcome::Fault`] before cursors, slots, and the hardware ring
    /// registers are reinitialized.
    pub fn reset_ring(&self, ring: RingId) -> Result<(), Error> {
        let mut guard = self.rings[ring as usize].lock();
        let rs = &mut *guard;
        self.regs.reset_ring(ring);

        let queued = rs.inflight.len();
        rs.ready.clear();
        rs.inflight.clear();
        let orphans = rs.pool.drain_reset();
        rs.cdr.reset();
        rs.rdr.reset();
        rs.blocked = false;
        rs.faulted = false;
        self.regs.init_ring(
            ring,
            &RingHwConfig {
                cdr_base: rs.cdr_base(),
                rdr_base: rs.rdr_base(),
                ring_size: self.config.ring_size,
                intr_threshold: self.config.intr_threshold,
            },
        );
        let mut events = mem::take(&mut rs.completions);
        for (session, cookie) in orphans {
            events.push(CompletionEvent {
                handler: Arc::clone(&session.handler),
                cookie,
                outcome: Outcome::Fault,
            });
        }
        drop(guard);

        metrics::REQUESTS_INFLIGHT.sub(queued as i64);
        debug!(ring, orphaned = events.len(), "ring reset");
        for event in events.drain(..) {
            metrics::COMPLETIONS_FAULT.increment();
            event.handler.complete(event.cookie, event.outcome);
        }
        self.rings[ring as usize].lock().completions = events;
        Ok(())
    }

    /// Whether no request is queued or in flight on any ring. Teardown
    /// requires this; drive [`on_ring_interrupt`](Self::on_ring_interrupt)
    /// until it holds before dropping the engine.
    pub fn quiesce(&self) -> bool {
        self.rings.iter().all(|ring| {
            let rs = ring.lock();
            rs.ready.is_empty() && rs.inflight.is_empty()
        })
    }

    /// Occupancy snapshot for one ring.
    pub fn ring_stats(&self, ring: RingId) -> RingStats {
        let rs = self.rings[ring as usize].lock();
        RingStats {
            ring,
            cdr_live: rs.cdr.live(),
            rdr_live: rs.rdr.live(),
            free_slots: rs.pool.free_count(),
            ready: rs.ready.len(),
            inflight: rs.inflight.len(),
            blocked: rs.blocked,
            faulted: rs.faulted,
        }
    }
}

fn validate_request(req: &OpRequest<'_>, digest_len: u32) -> Result<(), Error> {
    let session = req.session;
    let mode = session.mode;

    if !mode.uses_aad() && req.aad.len != 0 {
        return Err(Error::InvalidRequest("mode takes no AAD"));
    }
    match mode {
        OpMode::Cipher => {
            if req.tag_len.is_some() || digest_len != 0 {
                return Err(Error::InvalidRequest("cipher operations take no digest"));
            }
        }
        _ => {
            if digest_len == 0 || digest_len > session.tpl.hash.digest_len() {
                return Err(Error::InvalidRequest("tag length out of range"));
            }
        }
    }

    let verify = req.dir == Direction::Decrypt && mode.authenticated();
    let expected_digest_in = if verify { digest_len } else { 0 };
    if req.digest.len != expected_digest_in {
        return Err(Error::InvalidRequest("digest range does not match tag length"));
    }
    let generates = req.dir == Direction::Encrypt && mode.authenticated();
    let expected_digest_out = if generates { digest_len } else { 0 };
    if req.digest_out.len != expected_digest_out {
        return Err(Error::InvalidRequest("digest output range does not match tag length"));
    }
    let expected_payload_out = if mode.produces_payload() { req.payload.len } else { 0 };
    if req.payload_out.len != expected_payload_out {
        return Err(Error::InvalidRequest("payload output range does not match payload"));
    }
    if req.aad.len > PACKET_LEN_MASK || req.payload.len > PACKET_LEN_MASK {
        return Err(Error::InvalidRequest("range too long"));
    }
    Ok(())
}
