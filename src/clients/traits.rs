//! Capabilities a physical client must offer.
//!
//! [`NodeClient`] is the minimal contract the routing logic needs. The
//! execution and beacon variants extend it with the calls their higher
//! layers use, so one [`ClientManager`](crate::clients::ClientManager)
//! implementation serves both.

use alloy::primitives::{Address, Bytes, TxHash};
use async_trait::async_trait;

use crate::clients::error::RpcError;
use crate::clients::types::{CallMsg, FeeSuggestion, Receipt, SyncProgress};

/// Reachability and sync position of one physical client.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Display name for logs and status (usually the URL).
    fn name(&self) -> &str;

    /// Current sync report. Any error counts as unreachable.
    async fn sync_status(&self) -> Result<SyncProgress, RpcError>;
}

/// Execution-layer client surface.
#[async_trait]
pub trait ExecutionClient: NodeClient {
    async fn chain_id(&self) -> Result<u64, RpcError>;

    /// `eth_call` against the latest block.
    async fn call(&self, msg: &CallMsg) -> Result<Bytes, RpcError>;

    /// `eth_estimateGas`. A revert comes back as [`RpcError::Node`].
    async fn estimate_gas(&self, msg: &CallMsg) -> Result<u64, RpcError>;

    /// Next nonce for `address`, counting pending transactions.
    async fn pending_nonce(&self, address: Address) -> Result<u64, RpcError>;

    async fn suggest_fees(&self) -> Result<FeeSuggestion, RpcError>;

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<TxHash, RpcError>;

    /// `None` while the transaction is still pending.
    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, RpcError>;
}

/// Consensus-layer client surface.
#[async_trait]
pub trait BeaconClient: NodeClient {
    async fn node_version(&self) -> Result<String, RpcError>;
}
