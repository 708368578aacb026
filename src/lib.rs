//! xcelring — descriptor-ring submission engine for a crypto packet accelerator.
//!
//! The engine drives a memory-mapped packet accelerator through pairs of
//! command/result descriptor rings. Callers bind an algorithm pair and key
//! material into a [`Session`] (pinned to one ring), then submit operations
//! whose labelled byte ranges are sliced into DMA descriptor chains. A
//! per-mode token compiler emits the micro-instruction program routing bytes
//! between the engine's hash and cipher units; completions come back through
//! a ring interrupt and are collapsed into three outcomes.
//!
//! Everything is preallocated at ring creation: submission and completion
//! never allocate, never block, and fail with synchronous retryable errors
//! under backpressure.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xcelring::{
//!     ByteRange, CipherAlg, CipherMode, CompletionHandler, Config, Direction, EngineRegs,
//!     HashAlg, OpMode, OpRequest, Outcome, PacketEngine, Particle, RingHwConfig, RingId,
//!     SegList, SessionParams,
//! };
//!
//! struct Regs; // stands in for the mapped register window
//!
//! impl EngineRegs for Regs {
//!     fn init_ring(&self, _: RingId, _: &RingHwConfig) {}
//!     fn cdr_prepared(&self, _: RingId, _: u32) {}
//!     fn rdr_prepared(&self, _: RingId, _: u32) {}
//!     fn rdr_processed(&self, _: RingId) -> u32 { 0 }
//!     fn rdr_ack(&self, _: RingId, _: u32, _: u32) {}
//!     fn reset_ring(&self, _: RingId) {}
//! }
//!
//! struct Done;
//!
//! impl CompletionHandler for Done {
//!     fn complete(&self, cookie: u64, outcome: Outcome) {
//!         println!("op {cookie}: {outcome:?}");
//!     }
//! }
//!
//! fn main() -> Result<(), xcelring::Error> {
//!     let engine = PacketEngine::new(Config::default(), Regs)?;
//!     let session = engine.create_session(SessionParams {
//!         mode: OpMode::Gcm,
//!         cipher: CipherAlg::Aes256,
//!         cipher_mode: CipherMode::Gcm,
//!         hash: HashAlg::Ghash,
//!         cipher_key: &[0u8; 32],
//!         hash_key: &[],
//!         ghash_key: &[0u8; 16], // E_K(0), precomputed by the key layer
//!         tag_len: 16,
//!         handler: Arc::new(Done),
//!     })?;
//!
//!     // Particles come from the platform's DMA-mapping layer.
//!     let src = [Particle { addr: 0x1000_0000, len: 84 }];
//!     let dst = [Particle { addr: 0x1000_1000, len: 80 }];
//!     engine.submit(
//!         &OpRequest {
//!             session: &session,
//!             dir: Direction::Encrypt,
//!             iv: &[0u8; 12],
//!             src: SegList::new(&src),
//!             dst: SegList::new(&dst),
//!             aad: ByteRange::new(0, 20),
//!             payload: ByteRange::new(20, 64),
//!             digest: ByteRange::default(),
//!             payload_out: ByteRange::new(0, 64),
//!             digest_out: ByteRange::new(64, 16),
//!             tag_len: None,
//!             key_override: None,
//!             cookie: 1,
//!         },
//!         false,
//!     )?;
//!
//!     // From the ring's completion interrupt:
//!     engine.on_ring_interrupt(session.ring())?;
//!     Ok(())
//! }
//! ```

// ── Internal modules ────────────────────────────────────────────────────
pub(crate) mod request;

// ── Public modules ──────────────────────────────────────────────────────
pub mod chain;
pub mod completion;
pub mod config;
pub mod context;
pub mod descr;
pub mod dma;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod regs;
pub mod ring;
pub mod session;
pub mod token;

// ── Re-exports: engine surface ──────────────────────────────────────────

pub use chain::ByteRange;
pub use completion::{BackpressureHandler, CompletionHandler, Outcome};
pub use config::{Config, ConfigBuilder};
pub use context::{CipherAlg, CipherMode, CtxControl, Direction, HashAlg};
pub use dma::{DmaArena, Particle, SegList};
pub use engine::{OpRequest, PacketEngine, RingStats};
pub use error::Error;
pub use regs::{EngineRegs, MmioEngineRegs, RingHwConfig};
pub use ring::RingId;
pub use session::{OpMode, Session, SessionParams};
