//! Local private-key signer.
//!
//! # Security
//! - Private keys are loaded ONLY from environment variables
//! - Keys are never logged or serialized
//!
//! This is one implementation of [`TransactionSigner`]; the transaction
//! pipeline itself never sees key material.

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::Address;
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;

use crate::transactions::signer::{SignerError, TransactionSigner};
use crate::transactions::types::{SignedTransaction, UnsignedTransaction};

/// Environment variable holding the hex-encoded private key.
pub const PRIVATE_KEY_ENV_VAR: &str = "NODE_DAEMON_PRIVATE_KEY";

/// Signs EIP-1559 transactions for one chain with one key.
#[derive(Clone)]
pub struct LocalWallet {
    address: Address,
    wallet: EthereumWallet,
    /// Chain ID for EIP-155 replay protection.
    chain_id: u64,
}

impl LocalWallet {
    /// Create a wallet from a hex-encoded private key string.
    ///
    /// # Arguments
    /// * `private_key_hex` - Hex string (with or without 0x prefix)
    /// * `chain_id` - The only chain this wallet will sign for
    pub fn from_private_key(private_key_hex: &str, chain_id: u64) -> Result<Self, SignerError> {
        let key_hex = private_key_hex.strip_prefix("0x").unwrap_or(private_key_hex);

        let signer: PrivateKeySigner = key_hex
            .parse()
            .map_err(|e| SignerError::KeyUnavailable(format!("Invalid private key format: {}", e)))?;
        let address = signer.address();

        tracing::info!(address = %address, chain_id = chain_id, "Wallet initialized");

        Ok(Self {
            address,
            wallet: EthereumWallet::from(signer),
            chain_id,
        })
    }

    /// Load the key from `NODE_DAEMON_PRIVATE_KEY`.
    pub fn from_env(chain_id: u64) -> Result<Self, SignerError> {
        let private_key = std::env::var(PRIVATE_KEY_ENV_VAR).map_err(|_| {
            SignerError::KeyUnavailable(format!("Environment variable {} not set", PRIVATE_KEY_ENV_VAR))
        })?;

        Self::from_private_key(&private_key, chain_id)
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

#[async_trait]
impl TransactionSigner for LocalWallet {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_transaction(&self, tx: UnsignedTransaction) -> Result<SignedTransaction, SignerError> {
        if tx.chain_id != self.chain_id {
            return Err(SignerError::ChainMismatch {
                expected: self.chain_id,
                actual: tx.chain_id,
            });
        }
        if tx.from != self.address {
            return Err(SignerError::WrongSender {
                expected: self.address,
                actual: tx.from,
            });
        }

        let nonce = tx.nonce;
        let request = TransactionRequest::default()
            .with_from(tx.from)
            .with_to(tx.to)
            .with_input(tx.data)
            .with_value(tx.value)
            .with_nonce(tx.nonce)
            .with_chain_id(tx.chain_id)
            .with_gas_limit(tx.gas_limit)
            .with_max_fee_per_gas(tx.max_fee_per_gas)
            .with_max_priority_fee_per_gas(tx.max_priority_fee_per_gas);

        let envelope = request
            .build(&self.wallet)
            .await
            .map_err(|e| SignerError::Failed(e.to_string()))?;

        Ok(SignedTransaction {
            hash: *envelope.tx_hash(),
            raw: envelope.encoded_2718().into(),
            nonce,
        })
    }
}

impl std::fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWallet")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .finish()
    }
}
