//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path + query)
//!     → router.rs (rule lookup)
//!     → matcher.rs (subdomain rules, then path-prefix rules)
//!     → Return: upstream URL (default upstream if nothing matched)
//!
//! Rule Compilation (at startup and on reload):
//!     subdomains[] + paths[]
//!     → Compile matchers in config order
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Rules compiled up front, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same rule
//! - First match wins

pub mod matcher;
pub mod router;

pub use router::Router;
