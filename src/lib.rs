//! Resilient execution and beacon client access for node operators.

pub mod clients;
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod query;
pub mod services;
pub mod transactions;
pub mod wallet;

pub use clients::{BeaconClientManager, ClientManager, ExecutionClientManager};
pub use config::DaemonConfig;
pub use lifecycle::CancelToken;
pub use query::QueryManager;
pub use services::ServiceProvider;
pub use transactions::TransactionManager;
