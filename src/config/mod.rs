//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → DaemonConfig (validated, immutable)
//!     → ServiceProvider::from_config
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the only runtime knobs are the
//!   routing flags on each client manager
//! - Every field has a default, so an empty file points at localhost nodes
//! - serde rejects malformed input; validation.rs collects every semantic problem at once

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ClientPairConfig, DaemonConfig, MonitorConfig, ObservabilityConfig, QueryConfig,
    TransactionConfig,
};
