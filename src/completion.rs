//! Completion outcomes and callback plumbing.
//!
//! The hardware reports a per-descriptor error word with fifteen possible
//! error bits. Callers only ever see two terminal outcomes: a failed tag
//! verification, and everything else. The reaper collapses the error word
//! here before invoking the session's completion handler.

use std::sync::Arc;

use crate::descr::{RES_ERR_AUTH_FAILED, RES_ERR_MASK};
use crate::ring::RingId;

/// Terminal result of one operation, delivered through the completion
/// callback only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The operation completed; outputs are in the caller's buffers.
    Success,
    /// Tag verification failed on a decrypt-with-verify operation.
    AuthFailed,
    /// Any other hardware-reported error.
    Fault,
}

/// Receives completion callbacks for a session's requests.
///
/// Called outside the ring lock, but still from the completion (interrupt)
/// context: implementations must not block.
pub trait CompletionHandler: Send + Sync {
    /// `cookie` is the opaque handle supplied at submission. For decrypt
    /// operations the recovered plaintext is already in the caller's output
    /// ranges when this fires.
    fn complete(&self, cookie: u64, outcome: Outcome);
}

/// Notified when a ring that previously failed a submission with a retryable
/// error has freed capacity. The producer path should resubmit.
pub trait BackpressureHandler: Send + Sync {
    fn resume(&self, ring: RingId);
}

/// A completion ready to fire once the ring lock is dropped.
pub(crate) struct CompletionEvent {
    pub(crate) handler: Arc<dyn CompletionHandler>,
    pub(crate) cookie: u64,
    pub(crate) outcome: Outcome,
}

/// Collapse accumulated per-descriptor error bits into an [`Outcome`].
///
/// The authentication bit wins over every other error class so verify
/// failures stay distinguishable.
pub(crate) fn classify(error_bits: u32) -> Outcome {
    let bits = error_bits & RES_ERR_MASK;
    if bits & RES_ERR_AUTH_FAILED != 0 {
        Outcome::AuthFailed
    } else if bits != 0 {
        Outcome::Fault
    } else {
        Outcome::Success
    }
}
