//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields (logging.rs initialises the subscriber)
//!     → metrics.rs (endpoint health, failovers, batches, submissions)
//!
//! Consumers:
//!     → stdout log stream
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Structured fields instead of formatted strings where a value matters
//! - Metric helpers live here so call sites stay one line
//! - Key material and raw transactions are never logged

pub mod logging;
pub mod metrics;
