//! Read-call inputs, outputs and errors.

use alloy::primitives::{Address, Bytes};
use alloy::sol_types::SolCall;
use thiserror::Error;

use crate::clients::error::ClientError;

/// One read-only contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub target: Address,
    /// ABI-encoded calldata, selector included.
    pub calldata: Bytes,
}

impl ContractCall {
    pub fn new(target: Address, calldata: impl Into<Bytes>) -> Self {
        Self {
            target,
            calldata: calldata.into(),
        }
    }

    /// Build from a typed call generated by `sol!`.
    pub fn sol<C: SolCall>(target: Address, call: &C) -> Self {
        Self::new(target, call.abi_encode())
    }
}

/// Raw return data of a successful call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutput {
    pub target: Address,
    pub data: Bytes,
}

impl CallOutput {
    /// Decode the return data as the output of `C`.
    pub fn decode<C: SolCall>(&self) -> Result<C::Return, QueryError> {
        C::abi_decode_returns(&self.data).map_err(|e| QueryError::Decode(e.to_string()))
    }
}

/// Per-call failure.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// The batch carrying this call could not be executed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The call itself reverted inside an otherwise successful batch.
    #[error("call to {target} reverted: {reason}")]
    CallReverted { target: Address, reason: String },

    /// Return data did not match the expected ABI.
    #[error("failed to decode return data: {0}")]
    Decode(String),

    #[error("query cancelled")]
    Cancelled,
}

/// Result type for one call of a batched read.
pub type QueryResult<T> = Result<T, QueryError>;
