//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Caller-scoped cancellation (cancel.rs):
//!     CancelToken handed to every network-bound operation
//!     → cancel() wakes all waiters
//!     → operations release their slots and return Cancelled
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → cancel the daemon's root token
//! ```
//!
//! # Design Decisions
//! - Cancellation is level-triggered: late subscribers still observe it
//! - Cancellation is reported separately from timeouts and client errors

pub mod cancel;
pub mod signals;

pub use cancel::CancelToken;
