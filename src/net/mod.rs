//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (Accept trait, transient/fatal error classification)
//!     → tls.rs (optional TLS handshake)
//!     → connection.rs (registry membership, close handles)
//!     → Hand off to HTTP layer
//!
//! Listener/Session States:
//!     Tracked → Closing → Untracked
//! ```
//!
//! # Design Decisions
//! - Transient accept errors are retried, never surfaced to handlers
//! - Each listener and session is tracked for bulk shutdown
//! - TLS is optional and handled transparently

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{CloseHandle, ConnectionId, Registry, TrackedGuard};
pub use listener::{is_transient, Accept};
