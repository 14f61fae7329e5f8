//! Primary/fallback access to execution and beacon nodes.
//!
//! # Architecture
//! ```text
//! caller ──▶ ClientManager ──resolve──▶ primary  (own node)
//!                 │                 └─▶ fallback (external, optional)
//!                 ▼
//!        SyncStatusChecker (probe, cached for a short TTL)
//! ```
//!
//! One generic manager serves both layers; the layer only changes which
//! trait the physical clients implement.

pub mod beacon;
pub mod error;
pub mod execution;
pub mod manager;
pub mod sync;
pub mod traits;
pub mod types;

pub use beacon::HttpBeaconClient;
pub use error::{ClientError, ClientResult, RpcError};
pub use execution::AlloyExecutionClient;
pub use manager::{ClientManager, ClientManagerSettings, ResolvedClient};
pub use sync::SyncStatusChecker;
pub use traits::{BeaconClient, ExecutionClient, NodeClient};
pub use types::{
    ActiveClient, CallMsg, CallOptions, ClientLayer, ClientRole, EndpointHealth, EndpointStatus,
    FeeSuggestion, ManagerStatus, Receipt, RoutingDecision, RoutingFlags, SyncProgress,
};

/// Manager over execution clients.
pub type ExecutionClientManager = ClientManager<dyn ExecutionClient>;

/// Manager over beacon clients.
pub type BeaconClientManager = ClientManager<dyn BeaconClient>;
