use thiserror::Error;

use crate::ring::RingId;

/// Errors returned by the submission engine.
///
/// The retryable variants ([`RingFull`](Error::RingFull),
/// [`SlotsExhausted`](Error::SlotsExhausted), [`ChainTooLong`](Error::ChainTooLong),
/// [`DmaMapping`](Error::DmaMapping)) leave no partial state behind: any
/// descriptors reserved for the failed request have been rolled back before the
/// error is returned. Terminal per-operation failures are never reported here;
/// they arrive through the completion callback as an
/// [`Outcome`](crate::completion::Outcome).
#[derive(Debug, Error)]
pub enum Error {
    /// Not enough free descriptors on the command or result ring. Retry after
    /// the next completion event.
    #[error("descriptor ring full")]
    RingFull,
    /// No free request slots on the session's ring. Retry after the next
    /// completion event.
    #[error("request slots exhausted")]
    SlotsExhausted,
    /// The operation would need more descriptors than `max_op_descs` allows.
    #[error("descriptor chain exceeds per-operation limit")]
    ChainTooLong,
    /// A labelled byte range is not covered by the resolved DMA segments.
    #[error("byte range not covered by DMA segment list")]
    DmaMapping,
    /// The request is malformed (bad IV length, range/mode mismatch, key
    /// override of the wrong size, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    /// Session parameters are inconsistent (algorithm/mode mismatch, bad key
    /// or tag length).
    #[error("invalid session parameters: {0}")]
    InvalidSession(&'static str),
    /// Configuration value out of range.
    #[error("config: {0}")]
    Config(&'static str),
    /// The ring reported a fault not attributable to a single descriptor
    /// (descriptor or buffer overflow). The ring accepts no further work until
    /// an external reset path calls [`reset_ring`](crate::engine::PacketEngine::reset_ring).
    #[error("ring {ring} faulted, reset required")]
    RingFaulted { ring: RingId },
}

impl Error {
    /// Whether the caller may retry the same request later (typically after
    /// the next completion event re-enables the producer path).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RingFull | Error::SlotsExhausted | Error::ChainTooLong | Error::DmaMapping
        )
    }
}
