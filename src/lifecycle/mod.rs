//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → shutdown_signal() resolves
//!
//! Shutdown (shutdown.rs):
//!     Shutdown::trigger → every subscriber (Server::close_on) closes its server
//! ```
//!
//! # Design Decisions
//! - One broadcast fans shutdown out to any number of servers
//! - Closing is immediate: listeners and sessions are torn down, not drained

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
