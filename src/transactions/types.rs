//! Transaction pipeline types and error definitions.

use alloy::primitives::{Address, Bytes, TxHash, U256};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::clients::error::ClientError;
use crate::clients::types::Receipt;
use crate::config::schema::TransactionConfig;
use crate::transactions::signer::SignerError;
use crate::transactions::state::TxState;

/// Gas headroom applied on top of a node's estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasSettings {
    /// Fixed extra gas.
    pub safe_gas_buffer: u64,
    /// Proportional headroom.
    pub safe_gas_multiplier: f64,
}

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            safe_gas_buffer: 0,
            safe_gas_multiplier: 1.5,
        }
    }
}

impl From<&TransactionConfig> for GasSettings {
    fn from(config: &TransactionConfig) -> Self {
        Self {
            safe_gas_buffer: config.safe_gas_buffer,
            safe_gas_multiplier: config.safe_gas_multiplier,
        }
    }
}

impl GasSettings {
    /// `max(estimate + buffer, ceil(estimate * multiplier))`.
    pub fn safe_gas_limit(&self, estimate: u64) -> u64 {
        let buffered = estimate.saturating_add(self.safe_gas_buffer);
        // Float-to-int casts saturate.
        let scaled = (estimate as f64 * self.safe_gas_multiplier).ceil() as u64;
        buffered.max(scaled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasEstimate {
    /// Raw node estimate.
    pub estimated: u64,
    /// Limit actually applied.
    pub safe: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub estimated_gas_limit: u64,
    pub safe_gas_limit: u64,
    /// Revert reason when the simulation failed.
    pub error: Option<String>,
}

/// Unsigned description of a transaction, for cost preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub simulation: SimulationResult,
}

/// Caller-pinned parameters. Anything left `None` is filled from the node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    pub nonce: Option<u64>,
    pub gas_limit: Option<u64>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
}

/// A transaction the caller wants executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionIntent {
    pub id: Uuid,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub options: TransactionOptions,
}

impl TransactionIntent {
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4(),
            to,
            data: data.into(),
            value: U256::ZERO,
            options: TransactionOptions::default(),
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_options(mut self, options: TransactionOptions) -> Self {
        self.options = options;
        self
    }
}

/// Fully specified EIP-1559 transaction, ready for a signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub chain_id: u64,
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub nonce: u64,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub hash: TxHash,
    /// EIP-2718 encoded envelope.
    pub raw: Bytes,
    pub nonce: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub hash: TxHash,
    /// The node (or this manager) had already seen the transaction.
    pub already_known: bool,
}

/// Terminal result of waiting on a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Confirmed(Receipt),
    /// Mined but reverted.
    Failed(Receipt),
}

impl TxOutcome {
    pub fn receipt(&self) -> &Receipt {
        match self {
            TxOutcome::Confirmed(r) | TxOutcome::Failed(r) => r,
        }
    }
}

/// Errors that can occur in the transaction pipeline.
#[derive(Debug, Clone, Error)]
pub enum TxError {
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Simulation reverted.
    #[error("gas estimation failed: {reason}")]
    EstimationError { reason: String },

    /// The node rejected the transaction for a reason other than "already known".
    #[error("transaction rejected: {reason}")]
    SubmissionError { reason: String },

    #[error(transparent)]
    Signing(#[from] SignerError),

    #[error("transaction {hash} not mined within {timeout:?}")]
    TimedOut { hash: TxHash, timeout: Duration },

    #[error("transaction operation cancelled")]
    Cancelled,

    #[error("invalid transaction state transition {from:?} -> {to:?}")]
    InvalidTransition { from: TxState, to: TxState },

    #[error("resubmission is only allowed after a timeout (state is {0:?})")]
    ResubmissionNotAllowed(TxState),

    #[error("intent {0} has already been executed")]
    DuplicateIntent(Uuid),

    /// A batch entry pins a nonce that breaks the consecutive sequence.
    #[error("pinned nonce {pinned} does not match the batch sequence (expected {expected})")]
    NonceConflict { expected: u64, pinned: u64 },

    /// One entry of a batch failed; nothing from the batch is returned.
    #[error("batch entry {index} failed: {source}")]
    Batch {
        index: usize,
        #[source]
        source: Box<TxError>,
    },
}

impl TxError {
    /// Client errors map to their transaction-level meaning.
    pub(crate) fn from_estimation(err: ClientError) -> Self {
        match err {
            ClientError::Node { source, .. } => TxError::EstimationError {
                reason: source.node_message().map(str::to_string).unwrap_or_else(|| source.to_string()),
            },
            ClientError::Cancelled => TxError::Cancelled,
            other => TxError::Client(other),
        }
    }

    pub(crate) fn from_client(err: ClientError) -> Self {
        match err {
            ClientError::Cancelled => TxError::Cancelled,
            other => TxError::Client(other),
        }
    }

    pub(crate) fn in_batch(self, index: usize) -> Self {
        TxError::Batch {
            index,
            source: Box::new(self),
        }
    }
}

/// Result type for transaction operations.
pub type TxResult<T> = Result<T, TxError>;
