//! Transaction lifecycle state machine.
//!
//! ```text
//! Created ─▶ GasEstimated ─▶ Signed ─▶ Submitted ─┬─▶ Confirmed
//!                                                 ├─▶ Failed
//!                                                 └─▶ TimedOut ─(resubmit)─▶ new intent
//! ```
//!
//! Transitions only move forward one step at a time. `Failed` and
//! `TimedOut` are both terminal; only `TimedOut` can be resubmitted.

use serde::{Deserialize, Serialize};

use crate::clients::types::Receipt;
use crate::transactions::types::{
    GasEstimate, SignedTransaction, TransactionIntent, TransactionOptions, TxError, TxOutcome,
    TxResult, UnsignedTransaction,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    Created,
    GasEstimated,
    Signed,
    Submitted,
    Confirmed,
    Failed,
    TimedOut,
}

impl TxState {
    pub fn can_transition_to(self, next: TxState) -> bool {
        use TxState::*;
        matches!(
            (self, next),
            (Created, GasEstimated)
                | (GasEstimated, Signed)
                | (Signed, Submitted)
                | (Submitted, Confirmed)
                | (Submitted, Failed)
                | (Submitted, TimedOut)
        )
    }

    /// Move to `next`, rejecting skips and regressions.
    pub fn advance(&mut self, next: TxState) -> TxResult<()> {
        if !self.can_transition_to(next) {
            return Err(TxError::InvalidTransition { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TxState::Confirmed | TxState::Failed | TxState::TimedOut)
    }

    pub fn permits_resubmission(self) -> bool {
        self == TxState::TimedOut
    }
}

/// One intent and everything learned about it so far.
#[derive(Debug, Clone)]
pub struct TrackedTransaction {
    intent: TransactionIntent,
    state: TxState,
    gas: Option<GasEstimate>,
    unsigned: Option<UnsignedTransaction>,
    signed: Option<SignedTransaction>,
    receipt: Option<Receipt>,
}

impl TrackedTransaction {
    pub fn new(intent: TransactionIntent) -> Self {
        Self {
            intent,
            state: TxState::Created,
            gas: None,
            unsigned: None,
            signed: None,
            receipt: None,
        }
    }

    pub fn intent(&self) -> &TransactionIntent {
        &self.intent
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn gas(&self) -> Option<GasEstimate> {
        self.gas
    }

    pub fn signed(&self) -> Option<&SignedTransaction> {
        self.signed.as_ref()
    }

    pub fn receipt(&self) -> Option<&Receipt> {
        self.receipt.as_ref()
    }

    pub fn record_estimate(&mut self, gas: GasEstimate) -> TxResult<()> {
        self.state.advance(TxState::GasEstimated)?;
        self.gas = Some(gas);
        Ok(())
    }

    pub fn record_signed(&mut self, unsigned: UnsignedTransaction, signed: SignedTransaction) -> TxResult<()> {
        self.state.advance(TxState::Signed)?;
        self.unsigned = Some(unsigned);
        self.signed = Some(signed);
        Ok(())
    }

    pub fn record_submitted(&mut self) -> TxResult<()> {
        self.state.advance(TxState::Submitted)
    }

    pub fn record_outcome(&mut self, outcome: TxOutcome) -> TxResult<()> {
        let (next, receipt) = match outcome {
            TxOutcome::Confirmed(r) => (TxState::Confirmed, r),
            TxOutcome::Failed(r) => (TxState::Failed, r),
        };
        self.state.advance(next)?;
        self.receipt = Some(receipt);
        Ok(())
    }

    pub fn record_timeout(&mut self) -> TxResult<()> {
        self.state.advance(TxState::TimedOut)
    }

    /// Build a replacement for a timed-out transaction.
    ///
    /// The replacement keeps the nonce and gas limit and raises both fee caps
    /// by `fee_bump_percent`, rounded up. It gets a fresh intent id.
    pub fn into_resubmission(self, fee_bump_percent: u64) -> TxResult<TransactionIntent> {
        if !self.state.permits_resubmission() {
            return Err(TxError::ResubmissionNotAllowed(self.state));
        }
        let unsigned = self
            .unsigned
            .ok_or(TxError::ResubmissionNotAllowed(self.state))?;

        let bump = |fee: u128| fee.saturating_add((fee.saturating_mul(fee_bump_percent as u128)).div_ceil(100));

        let mut intent = TransactionIntent::new(self.intent.to, self.intent.data).with_value(self.intent.value);
        intent.options = TransactionOptions {
            nonce: Some(unsigned.nonce),
            gas_limit: Some(unsigned.gas_limit),
            max_fee_per_gas: Some(bump(unsigned.max_fee_per_gas)),
            max_priority_fee_per_gas: Some(bump(unsigned.max_priority_fee_per_gas)),
        };
        Ok(intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, Bytes, TxHash, U256};

    const ALL: [TxState; 7] = [
        TxState::Created,
        TxState::GasEstimated,
        TxState::Signed,
        TxState::Submitted,
        TxState::Confirmed,
        TxState::Failed,
        TxState::TimedOut,
    ];

    fn unsigned() -> UnsignedTransaction {
        UnsignedTransaction {
            chain_id: 1,
            from: Address::ZERO,
            to: Address::with_last_byte(1),
            data: Bytes::new(),
            value: U256::ZERO,
            nonce: 9,
            gas_limit: 60_000,
            max_fee_per_gas: 100,
            max_priority_fee_per_gas: 3,
        }
    }

    fn signed() -> SignedTransaction {
        SignedTransaction {
            hash: TxHash::ZERO,
            raw: Bytes::from_static(&[1]),
            nonce: 9,
        }
    }

    fn submitted() -> TrackedTransaction {
        let mut tx = TrackedTransaction::new(TransactionIntent::new(Address::with_last_byte(1), Bytes::new()));
        tx.record_estimate(GasEstimate {
            estimated: 40_000,
            safe: 60_000,
        })
        .unwrap();
        tx.record_signed(unsigned(), signed()).unwrap();
        tx.record_submitted().unwrap();
        tx
    }

    #[test]
    fn test_no_skips_or_regressions() {
        for (i, from) in ALL.iter().enumerate() {
            for (j, to) in ALL.iter().enumerate() {
                let allowed = from.can_transition_to(*to);
                if allowed {
                    // Forward by exactly one step, or a terminal branch from Submitted.
                    assert!(j == i + 1 || (*from == TxState::Submitted && to.is_terminal()));
                }
                if j <= i {
                    assert!(!allowed, "{from:?} -> {to:?} must be rejected");
                }
            }
        }
    }

    #[test]
    fn test_advance_rejects_skip() {
        let mut state = TxState::Created;
        let err = state.advance(TxState::Signed).unwrap_err();
        assert!(matches!(err, TxError::InvalidTransition { .. }));
        assert_eq!(state, TxState::Created);
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [TxState::Confirmed, TxState::Failed, TxState::TimedOut] {
            assert!(terminal.is_terminal());
            assert!(ALL.iter().all(|next| !terminal.can_transition_to(*next)));
        }
    }

    #[test]
    fn test_only_timed_out_resubmits() {
        let mut failed = submitted();
        failed
            .record_outcome(TxOutcome::Failed(Receipt {
                tx_hash: TxHash::ZERO,
                block_number: Some(1),
                gas_used: 50_000,
                success: false,
            }))
            .unwrap();
        assert!(matches!(
            failed.into_resubmission(10),
            Err(TxError::ResubmissionNotAllowed(TxState::Failed))
        ));

        let mut timed_out = submitted();
        timed_out.record_timeout().unwrap();
        let original_id = timed_out.intent().id;
        let intent = timed_out.into_resubmission(10).unwrap();
        assert_ne!(intent.id, original_id);
        assert_eq!(intent.options.nonce, Some(9));
        assert_eq!(intent.options.gas_limit, Some(60_000));
        assert_eq!(intent.options.max_fee_per_gas, Some(110));
        // 3 * 10% = 0.3, rounded up to 1.
        assert_eq!(intent.options.max_priority_fee_per_gas, Some(4));
    }
}
