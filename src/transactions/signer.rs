//! Signing capability consumed by the transaction pipeline.
//!
//! Key material stays behind this trait; the manager only ever sees the
//! signer's address and the signed envelope.

use alloy::primitives::Address;
use async_trait::async_trait;
use thiserror::Error;

use crate::transactions::types::{SignedTransaction, UnsignedTransaction};

#[derive(Debug, Clone, Error)]
pub enum SignerError {
    /// No key is configured or it could not be loaded.
    #[error("signing key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("signer is bound to chain {expected}, transaction is for chain {actual}")]
    ChainMismatch { expected: u64, actual: u64 },

    #[error("transaction from {actual} cannot be signed by {expected}")]
    WrongSender { expected: Address, actual: Address },

    #[error("signing failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn address(&self) -> Address;

    async fn sign_transaction(&self, tx: UnsignedTransaction) -> Result<SignedTransaction, SignerError>;
}
