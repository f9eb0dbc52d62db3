//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Transient accept error:
//!     → backoff.rs (next delay: 5ms, doubling, clamped at 1s)
//!     → backoff.rs (abortable delay; server close cuts it short)
//!     → retry accept
//! ```
//!
//! # Design Decisions
//! - No jitter: one listener per loop, so no herd to spread
//! - Clamp applies after doubling
//! - The delay observes the same close signal as the accept loop

pub mod backoff;

pub use backoff::{delay, AcceptBackoff, DelayAborted};
