//! Transaction submission pipeline.
//!
//! # Data Flow
//! ```text
//! TransactionIntent ─▶ estimate_gas ─▶ prepare ─▶ TransactionSigner ─▶ submit ─▶ wait
//!                      (padded)        (nonce,    (external)           (dedup    (poll,
//!                                      fees)                           by hash)  bounded)
//! ```

pub mod manager;
pub mod signer;
pub mod state;
pub mod types;

pub use manager::{TransactionManager, TransactionSettings};
pub use signer::{SignerError, TransactionSigner};
pub use state::{TrackedTransaction, TxState};
pub use types::{
    GasEstimate, GasSettings, SignedTransaction, SimulationResult, SubmissionOutcome,
    TransactionInfo, TransactionIntent, TransactionOptions, TxError, TxOutcome, TxResult,
    UnsignedTransaction,
};
