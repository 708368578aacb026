//! Engine metrics.
//!
//! Counters for the submission and completion paths plus the backpressure
//! events a deployment actually alerts on. All are updated under a ring lock,
//! so plain metriken counters are sufficient. Exposed via Prometheus when
//! registered with an exposition endpoint.

use metriken::{metric, Counter, Gauge};

// ── Submission ───────────────────────────────────────────────────

#[metric(
    name = "xcelring/requests/submitted",
    description = "Requests accepted and chained onto a ring"
)]
pub static REQUESTS_SUBMITTED: Counter = Counter::new();

#[metric(
    name = "xcelring/requests/inflight",
    description = "Requests queued to hardware and not yet completed"
)]
pub static REQUESTS_INFLIGHT: Gauge = Gauge::new();

#[metric(
    name = "xcelring/batches/flushed",
    description = "Prepared-counter notification pairs issued"
)]
pub static BATCHES_FLUSHED: Counter = Counter::new();

// ── Backpressure ─────────────────────────────────────────────────

#[metric(
    name = "xcelring/backpressure/ring_full",
    description = "Chain builds failed for lack of ring space"
)]
pub static RING_FULL: Counter = Counter::new();

#[metric(
    name = "xcelring/backpressure/slots_exhausted",
    description = "Submissions failed for lack of request slots"
)]
pub static SLOTS_EXHAUSTED: Counter = Counter::new();

#[metric(
    name = "xcelring/backpressure/resumes",
    description = "Blocked producer paths re-enabled after a completion"
)]
pub static RESUMES: Counter = Counter::new();

// ── Completion ───────────────────────────────────────────────────

#[metric(
    name = "xcelring/completions/success",
    description = "Operations completed cleanly"
)]
pub static COMPLETIONS_SUCCESS: Counter = Counter::new();

#[metric(
    name = "xcelring/completions/auth_failed",
    description = "Operations failing tag verification"
)]
pub static COMPLETIONS_AUTH_FAILED: Counter = Counter::new();

#[metric(
    name = "xcelring/completions/fault",
    description = "Operations failing with any other hardware error"
)]
pub static COMPLETIONS_FAULT: Counter = Counter::new();

#[metric(
    name = "xcelring/ring_faults",
    description = "Fatal ring-level faults requiring a reset"
)]
pub static RING_FAULTS: Counter = Counter::new();
