//! Service composition.

pub mod provider;

pub use provider::{ClientStatusReport, ServiceError, ServiceProvider};
