//! Execution-layer adapter over an alloy JSON-RPC provider.
//!
//! Every request is bounded by the configured timeout. Error payloads from
//! the node are kept apart from transport failures so the manager only
//! fails over on the latter.

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, TxHash};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{SyncStatus, TransactionRequest};
use alloy::transports::{TransportError, TransportResult};
use async_trait::async_trait;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::clients::error::RpcError;
use crate::clients::traits::{ExecutionClient, NodeClient};
use crate::clients::types::{CallMsg, FeeSuggestion, Receipt, SyncProgress};

/// One physical execution client reached over HTTP.
#[derive(Clone)]
pub struct AlloyExecutionClient {
    name: String,
    provider: Arc<dyn Provider + Send + Sync>,
    request_timeout: Duration,
}

impl AlloyExecutionClient {
    /// # Arguments
    /// * `url` - JSON-RPC endpoint
    /// * `request_timeout` - Upper bound for every request
    pub fn new(url: url::Url, request_timeout: Duration) -> Self {
        let name = url.to_string();
        let provider = Arc::new(ProviderBuilder::new().connect_http(url)) as Arc<dyn Provider + Send + Sync>;
        Self {
            name,
            provider,
            request_timeout,
        }
    }

    /// Latest block number.
    pub async fn block_number(&self) -> Result<u64, RpcError> {
        self.request(self.provider.get_block_number()).await
    }

    async fn request<T, F>(&self, fut: F) -> Result<T, RpcError>
    where
        F: IntoFuture<Output = TransportResult<T>>,
    {
        match timeout(self.request_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(map_transport_error(e)),
            Err(_) => Err(RpcError::Timeout(self.request_timeout)),
        }
    }
}

fn to_request(msg: &CallMsg) -> TransactionRequest {
    let tx = TransactionRequest::default()
        .with_to(msg.to)
        .with_input(msg.data.clone())
        .with_value(msg.value);
    match msg.from {
        Some(from) => tx.with_from(from),
        None => tx,
    }
}

/// Split node error payloads from everything else.
fn map_transport_error(e: TransportError) -> RpcError {
    if let Some(payload) = e.as_error_resp() {
        return RpcError::Node {
            code: payload.code,
            message: payload.message.to_string(),
        };
    }
    match e {
        alloy::transports::RpcError::DeserError { err, .. } => RpcError::InvalidResponse(err.to_string()),
        other => RpcError::Transport(other.to_string()),
    }
}

#[async_trait]
impl NodeClient for AlloyExecutionClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn sync_status(&self) -> Result<SyncProgress, RpcError> {
        match self.request(self.provider.syncing()).await? {
            SyncStatus::None => {
                let head = self.block_number().await?;
                Ok(SyncProgress::synced(head))
            }
            SyncStatus::Info(info) => {
                let current = info.current_block.saturating_to::<u64>();
                let highest = info.highest_block.saturating_to::<u64>();
                Ok(SyncProgress::syncing(current, highest.saturating_sub(current)))
            }
        }
    }
}

#[async_trait]
impl ExecutionClient for AlloyExecutionClient {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        self.request(self.provider.get_chain_id()).await
    }

    async fn call(&self, msg: &CallMsg) -> Result<Bytes, RpcError> {
        self.request(self.provider.call(to_request(msg))).await
    }

    async fn estimate_gas(&self, msg: &CallMsg) -> Result<u64, RpcError> {
        self.request(self.provider.estimate_gas(to_request(msg))).await
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, RpcError> {
        self.request(self.provider.get_transaction_count(address).pending())
            .await
    }

    async fn suggest_fees(&self) -> Result<FeeSuggestion, RpcError> {
        let estimate = self.request(self.provider.estimate_eip1559_fees()).await?;
        Ok(FeeSuggestion {
            max_fee_per_gas: estimate.max_fee_per_gas,
            max_priority_fee_per_gas: estimate.max_priority_fee_per_gas,
        })
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<TxHash, RpcError> {
        let pending = self.request(self.provider.send_raw_transaction(raw)).await?;
        Ok(*pending.tx_hash())
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, RpcError> {
        let receipt = self
            .request(self.provider.get_transaction_receipt(hash))
            .await?;
        Ok(receipt.map(|r| Receipt {
            tx_hash: r.transaction_hash,
            block_number: r.block_number,
            gas_used: r.gas_used,
            success: r.status(),
        }))
    }
}

impl std::fmt::Debug for AlloyExecutionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlloyExecutionClient")
            .field("url", &self.name)
            .field("timeout", &self.request_timeout)
            .finish()
    }
}
