//! Batched read calls over Multicall3.

pub mod manager;
pub mod multicall;
pub mod types;

pub use manager::{default_concurrency_limit, QueryManager, QuerySettings};
pub use multicall::{BatchCallGroup, MULTICALL3_ADDRESS};
pub use types::{CallOutput, ContractCall, QueryError, QueryResult};
