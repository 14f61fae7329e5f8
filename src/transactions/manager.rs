//! Transaction pipeline: estimate, pad gas, sign, submit, confirm.
//!
//! # Responsibilities
//! - Simulate and pad gas limits
//! - Fill nonce and fees from the node and hand the result to a signer
//! - Forward signed bytes exactly once per transaction hash
//! - Poll for receipts within a bounded window
//!
//! A hash stays tracked from its first submission until its receipt wait
//! ends. Executed intent ids are remembered for a configured retention.
//!
//! Every stage is callable on its own so signing can happen out of band.
//! [`TransactionManager::execute`] chains them for one intent.

use alloy::primitives::{Address, Bytes, TxHash, U256};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use uuid::Uuid;

use crate::clients::error::ClientError;
use crate::clients::types::{CallMsg, CallOptions, FeeSuggestion};
use crate::clients::ExecutionClientManager;
use crate::config::schema::TransactionConfig;
use crate::lifecycle::CancelToken;
use crate::observability::metrics;
use crate::transactions::signer::TransactionSigner;
use crate::transactions::state::TrackedTransaction;
use crate::transactions::types::{
    GasEstimate, GasSettings, SignedTransaction, SimulationResult, SubmissionOutcome,
    TransactionInfo, TransactionIntent, TxError, TxOutcome, TxResult, UnsignedTransaction,
};

/// Node replies meaning the transaction is already in flight.
const ALREADY_KNOWN_MARKERS: [&str; 4] = [
    "already known",
    "known transaction",
    "already imported",
    "nonce too low",
];

#[derive(Debug, Clone, Copy)]
pub struct TransactionSettings {
    pub gas: GasSettings,
    /// Delay between receipt polls.
    pub poll_interval: Duration,
    /// Default bound for [`TransactionManager::wait_for_transaction`].
    pub wait_timeout: Duration,
    /// How long an executed intent id blocks a replay.
    pub intent_retention: Duration,
}

impl Default for TransactionSettings {
    fn default() -> Self {
        Self {
            gas: GasSettings::default(),
            poll_interval: Duration::from_secs(2),
            wait_timeout: Duration::from_secs(300),
            intent_retention: Duration::from_secs(3_600),
        }
    }
}

impl From<&TransactionConfig> for TransactionSettings {
    fn from(config: &TransactionConfig) -> Self {
        Self {
            gas: GasSettings::from(config),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            wait_timeout: Duration::from_secs(config.wait_timeout_secs),
            intent_retention: Duration::from_secs(config.intent_retention_secs),
        }
    }
}

/// Result of the first send of a hash; `None` while it is in flight.
type SendState = Option<TxResult<()>>;

#[derive(Debug, Clone)]
struct SubmissionRecord {
    nonce: u64,
    submitted_at: Instant,
    result: watch::Receiver<SendState>,
}

impl SubmissionRecord {
    fn is_settled(&self) -> bool {
        self.result.borrow().is_some()
    }
}

/// The first submitter's hold on a hash.
///
/// Concurrent duplicates wait on it. Dropping it unsettled (the caller's
/// future was dropped mid-send) releases the hash so it can be retried.
struct SubmissionClaim<'a> {
    submissions: &'a DashMap<TxHash, SubmissionRecord>,
    hash: TxHash,
    done: watch::Sender<SendState>,
    settled: bool,
}

impl SubmissionClaim<'_> {
    fn settle(mut self, result: &TxResult<SubmissionOutcome>) {
        if result.is_err() {
            self.submissions.remove(&self.hash);
        }
        self.done.send_replace(Some(result.as_ref().map(|_| ()).map_err(Clone::clone)));
        self.settled = true;
    }
}

impl Drop for SubmissionClaim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.submissions.remove(&self.hash);
        }
    }
}

pub struct TransactionManager {
    clients: Arc<ExecutionClientManager>,
    chain_id: u64,
    settings: TransactionSettings,
    /// Hashes this manager has forwarded (or is forwarding).
    submissions: DashMap<TxHash, SubmissionRecord>,
    /// Intents that went through `execute`, with when they started.
    intents: DashMap<Uuid, Instant>,
}

impl TransactionManager {
    pub fn new(clients: Arc<ExecutionClientManager>, chain_id: u64, settings: TransactionSettings) -> Self {
        tracing::info!(
            chain_id = chain_id,
            safe_gas_buffer = settings.gas.safe_gas_buffer,
            safe_gas_multiplier = settings.gas.safe_gas_multiplier,
            "Transaction manager initialized"
        );

        Self {
            clients,
            chain_id,
            settings,
            submissions: DashMap::new(),
            intents: DashMap::new(),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn gas_settings(&self) -> GasSettings {
        self.settings.gas
    }

    /// Whether this manager has forwarded `hash`.
    pub fn is_tracked(&self, hash: &TxHash) -> bool {
        self.submissions.contains_key(hash)
    }

    pub fn tracked_submissions(&self) -> usize {
        self.submissions.len()
    }

    /// Intent ids currently blocking a replay.
    pub fn tracked_intents(&self) -> usize {
        self.intents.len()
    }

    // --- Estimate ---

    /// Simulate `intent` and pad the result.
    ///
    /// A simulated revert fails with [`TxError::EstimationError`] carrying
    /// the node's reason.
    pub async fn estimate_gas(
        &self,
        intent: &TransactionIntent,
        from: Option<Address>,
        cancel: &CancelToken,
    ) -> TxResult<GasEstimate> {
        self.estimate(intent.to, intent.data.clone(), intent.value, from, cancel)
            .await
    }

    async fn estimate(
        &self,
        to: Address,
        data: Bytes,
        value: U256,
        from: Option<Address>,
        cancel: &CancelToken,
    ) -> TxResult<GasEstimate> {
        let mut msg = CallMsg::new(to, data).with_value(value);
        msg.from = from;

        let estimated = self
            .clients
            .run(CallOptions::default(), cancel, |client| {
                let msg = msg.clone();
                async move { client.estimate_gas(&msg).await }
            })
            .await
            .map_err(TxError::from_estimation)?;

        let safe = self.settings.gas.safe_gas_limit(estimated);
        tracing::debug!(to = %to, estimated = estimated, safe = safe, "Gas estimated");
        Ok(GasEstimate { estimated, safe })
    }

    /// Describe a transaction without signing it.
    ///
    /// A simulated revert is reported in `simulation.error`; only client
    /// failures and cancellation are returned as errors.
    pub async fn create_transaction_info(
        &self,
        to: Address,
        data: Bytes,
        value: U256,
        from: Option<Address>,
        cancel: &CancelToken,
    ) -> TxResult<TransactionInfo> {
        let simulation = match self.estimate(to, data.clone(), value, from, cancel).await {
            Ok(gas) => SimulationResult {
                estimated_gas_limit: gas.estimated,
                safe_gas_limit: gas.safe,
                error: None,
            },
            Err(TxError::EstimationError { reason }) => SimulationResult {
                estimated_gas_limit: 0,
                safe_gas_limit: 0,
                error: Some(reason),
            },
            Err(e) => return Err(e),
        };

        Ok(TransactionInfo {
            from,
            to,
            data,
            value,
            simulation,
        })
    }

    // --- Sign ---

    /// Fill in everything a signer needs.
    ///
    /// Options pinned on the intent win over node-provided values.
    pub async fn prepare_transaction(
        &self,
        intent: &TransactionIntent,
        from: Address,
        cancel: &CancelToken,
    ) -> TxResult<UnsignedTransaction> {
        let gas = self.estimate_gas(intent, Some(from), cancel).await?;
        self.fill(intent, from, gas, cancel).await
    }

    /// Prepare and sign one intent. Fails as a whole if any step fails.
    pub async fn sign_transaction(
        &self,
        signer: &dyn TransactionSigner,
        intent: &TransactionIntent,
        cancel: &CancelToken,
    ) -> TxResult<SignedTransaction> {
        let unsigned = self.prepare_transaction(intent, signer.address(), cancel).await?;
        self.sign_unsigned(signer, unsigned).await
    }

    /// Sign an already prepared transaction.
    pub async fn sign_unsigned(
        &self,
        signer: &dyn TransactionSigner,
        unsigned: UnsignedTransaction,
    ) -> TxResult<SignedTransaction> {
        let signed = signer.sign_transaction(unsigned).await?;
        tracing::debug!(hash = %signed.hash, nonce = signed.nonce, "Transaction signed");
        Ok(signed)
    }

    /// Prepare and sign `intents` in order, with consecutive nonces.
    ///
    /// All-or-nothing: the first failing entry aborts the batch and is
    /// reported as [`TxError::Batch`] with its index. The first entry's nonce
    /// (pinned or pending) sets the sequence; a later entry may pin a nonce
    /// only if it matches its place in that sequence.
    pub async fn batch_sign_transactions(
        &self,
        signer: &dyn TransactionSigner,
        intents: &[TransactionIntent],
        cancel: &CancelToken,
    ) -> TxResult<Vec<SignedTransaction>> {
        let Some(first) = intents.first() else {
            return Ok(Vec::new());
        };

        let from = signer.address();
        let base_nonce = match first.options.nonce {
            Some(nonce) => nonce,
            None => self
                .pending_nonce(from, cancel)
                .await
                .map_err(|e| e.in_batch(0))?,
        };
        for (index, intent) in intents.iter().enumerate().skip(1) {
            let expected = base_nonce + index as u64;
            if let Some(pinned) = intent.options.nonce.filter(|pinned| *pinned != expected) {
                return Err(TxError::NonceConflict { expected, pinned }.in_batch(index));
            }
        }
        let fees = self.suggest_fees(cancel).await.map_err(|e| e.in_batch(0))?;

        let mut signed = Vec::with_capacity(intents.len());
        for (index, intent) in intents.iter().enumerate() {
            let gas = self
                .estimate_gas(intent, Some(from), cancel)
                .await
                .map_err(|e| e.in_batch(index))?;
            let fees = FeeSuggestion {
                max_fee_per_gas: intent.options.max_fee_per_gas.unwrap_or(fees.max_fee_per_gas),
                max_priority_fee_per_gas: intent
                    .options
                    .max_priority_fee_per_gas
                    .unwrap_or(fees.max_priority_fee_per_gas),
            };
            let unsigned = self.unsigned(intent, from, base_nonce + index as u64, gas, fees);
            let tx = self
                .sign_unsigned(signer, unsigned)
                .await
                .map_err(|e| e.in_batch(index))?;
            signed.push(tx);
        }

        tracing::info!(count = signed.len(), first_nonce = base_nonce, "Batch signed");
        Ok(signed)
    }

    // --- Submit ---

    /// Forward a signed transaction.
    ///
    /// A transaction this manager already forwarded, or one the node already
    /// knows, is reported with `already_known = true` instead of an error.
    pub async fn submit_transaction(
        &self,
        tx: &SignedTransaction,
        cancel: &CancelToken,
    ) -> TxResult<SubmissionOutcome> {
        let claim = match self.submissions.entry(tx.hash) {
            Entry::Occupied(entry) => Err(entry.get().clone()),
            Entry::Vacant(slot) => {
                let (done, result) = watch::channel(None);
                slot.insert(SubmissionRecord {
                    nonce: tx.nonce,
                    submitted_at: Instant::now(),
                    result,
                });
                Ok(SubmissionClaim {
                    submissions: &self.submissions,
                    hash: tx.hash,
                    done,
                    settled: false,
                })
            }
        };
        let claim = match claim {
            Ok(claim) => claim,
            Err(record) => return self.join_submission(tx.hash, record, cancel).await,
        };

        let raw = tx.raw.clone();
        let result = self
            .clients
            .run(CallOptions::default(), cancel, |client| {
                let raw = raw.clone();
                async move { client.send_raw_transaction(&raw).await }
            })
            .await;

        let outcome = match result {
            Ok(hash) => {
                if hash != tx.hash {
                    tracing::warn!(expected = %tx.hash, returned = %hash, "Node returned a different transaction hash");
                }
                tracing::info!(hash = %tx.hash, nonce = tx.nonce, "Transaction submitted");
                metrics::record_submission("accepted");
                Ok(SubmissionOutcome {
                    hash: tx.hash,
                    already_known: false,
                })
            }
            Err(e) if is_already_known(&e) => {
                tracing::info!(hash = %tx.hash, "Transaction already known to the node");
                metrics::record_submission("already_known");
                Ok(SubmissionOutcome {
                    hash: tx.hash,
                    already_known: true,
                })
            }
            Err(e) => {
                metrics::record_submission("rejected");
                tracing::warn!(hash = %tx.hash, error = %e, "Transaction submission failed");
                Err(match e {
                    ClientError::Node { source, .. } => TxError::SubmissionError {
                        reason: source.node_message().map(str::to_string).unwrap_or_else(|| source.to_string()),
                    },
                    other => TxError::from_client(other),
                })
            }
        };

        // A rejection releases the hash so the caller may retry.
        claim.settle(&outcome);
        outcome
    }

    /// Wait for the first submitter of `hash` and share its result.
    async fn join_submission(
        &self,
        hash: TxHash,
        mut record: SubmissionRecord,
        cancel: &CancelToken,
    ) -> TxResult<SubmissionOutcome> {
        tracing::debug!(
            hash = %hash,
            nonce = record.nonce,
            since = ?record.submitted_at.elapsed(),
            "Transaction already submitted by this manager"
        );

        let settled = async { record.result.wait_for(Option::is_some).await.map(|state| state.clone()) };
        match cancel.run_until_cancelled(settled).await {
            None => Err(TxError::Cancelled),
            Some(Ok(Some(Ok(())))) => {
                metrics::record_submission("already_known");
                Ok(SubmissionOutcome {
                    hash,
                    already_known: true,
                })
            }
            Some(Ok(Some(Err(e)))) => Err(e),
            // The first submitter went away before the node answered.
            Some(Ok(None)) | Some(Err(_)) => Err(TxError::SubmissionError {
                reason: "concurrent submission was abandoned before completing".into(),
            }),
        }
    }

    /// Submit `txs` in index order, stopping at the first failure.
    ///
    /// Entries before the failing index stay submitted; the error carries the
    /// failing index.
    pub async fn batch_submit_transactions(
        &self,
        txs: &[SignedTransaction],
        cancel: &CancelToken,
    ) -> TxResult<Vec<SubmissionOutcome>> {
        let mut outcomes = Vec::with_capacity(txs.len());
        for (index, tx) in txs.iter().enumerate() {
            let outcome = self
                .submit_transaction(tx, cancel)
                .await
                .map_err(|e| e.in_batch(index))?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    // --- Wait ---

    /// Poll for a receipt until it arrives, `wait` elapses or `cancel` fires.
    ///
    /// `wait` defaults to the configured timeout. Client errors while polling
    /// are logged and polling continues until the deadline.
    pub async fn wait_for_transaction(
        &self,
        hash: TxHash,
        wait: Option<Duration>,
        cancel: &CancelToken,
    ) -> TxResult<TxOutcome> {
        let wait = wait.unwrap_or(self.settings.wait_timeout);
        let started = Instant::now();

        let poll = async {
            let mut ticker = interval(self.settings.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let receipt = self
                    .clients
                    .run(CallOptions::default(), cancel, move |client| async move {
                        client.transaction_receipt(hash).await
                    })
                    .await;

                match receipt {
                    Ok(Some(receipt)) if receipt.success => return Ok(TxOutcome::Confirmed(receipt)),
                    Ok(Some(receipt)) => return Ok(TxOutcome::Failed(receipt)),
                    Ok(None) => tracing::debug!(hash = %hash, "Transaction pending"),
                    Err(ClientError::Cancelled) => return Err(TxError::Cancelled),
                    Err(e) => tracing::warn!(hash = %hash, error = %e, "Receipt poll failed"),
                }
            }
        };

        let result = match cancel.run_until_cancelled(timeout(wait, poll)).await {
            None => Err(TxError::Cancelled),
            Some(Err(_)) => Err(TxError::TimedOut { hash, timeout: wait }),
            Some(Ok(result)) => result,
        };

        metrics::record_wait_duration(started.elapsed().as_secs_f64());
        if matches!(result, Ok(_) | Err(TxError::TimedOut { .. })) {
            self.release_submission(&hash);
        }
        match &result {
            Ok(TxOutcome::Confirmed(r)) => {
                tracing::info!(hash = %hash, block = ?r.block_number, gas_used = r.gas_used, "Transaction confirmed")
            }
            Ok(TxOutcome::Failed(r)) => {
                tracing::warn!(hash = %hash, block = ?r.block_number, "Transaction reverted")
            }
            Err(TxError::TimedOut { .. }) => tracing::warn!(hash = %hash, timeout = ?wait, "Transaction wait timed out"),
            Err(_) => {}
        }
        result
    }

    // --- Pipeline ---

    /// Run one intent through every stage.
    ///
    /// Returns the tracked transaction once it reaches a terminal state,
    /// including `TimedOut`. An intent id is rejected as a replay for
    /// `intent_retention` after it starts; failures before submission
    /// release it at once so the caller may retry.
    pub async fn execute(
        &self,
        intent: TransactionIntent,
        signer: &dyn TransactionSigner,
        cancel: &CancelToken,
    ) -> TxResult<TrackedTransaction> {
        let id = intent.id;
        self.prune_intents();
        match self.intents.entry(id) {
            Entry::Occupied(_) => return Err(TxError::DuplicateIntent(id)),
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
            }
        }

        let mut tracked = TrackedTransaction::new(intent);
        let hash = match self.drive_to_submitted(&mut tracked, signer, cancel).await {
            Ok(hash) => hash,
            Err(e) => {
                self.intents.remove(&id);
                return Err(e);
            }
        };

        match self.wait_for_transaction(hash, None, cancel).await {
            Ok(outcome) => tracked.record_outcome(outcome)?,
            Err(TxError::TimedOut { .. }) => tracked.record_timeout()?,
            Err(e) => return Err(e),
        }
        Ok(tracked)
    }

    async fn drive_to_submitted(
        &self,
        tracked: &mut TrackedTransaction,
        signer: &dyn TransactionSigner,
        cancel: &CancelToken,
    ) -> TxResult<TxHash> {
        let from = signer.address();
        let gas = self.estimate_gas(tracked.intent(), Some(from), cancel).await?;
        tracked.record_estimate(gas)?;

        let unsigned = self.fill(tracked.intent(), from, gas, cancel).await?;
        let signed = self.sign_unsigned(signer, unsigned.clone()).await?;
        let hash = signed.hash;
        tracked.record_signed(unsigned, signed.clone())?;

        self.submit_transaction(&signed, cancel).await?;
        tracked.record_submitted()?;
        Ok(hash)
    }

    // --- Helpers ---

    /// Stop tracking a settled hash once its wait is over. A later resend
    /// of the same bytes is answered "already known" by the node.
    fn release_submission(&self, hash: &TxHash) {
        if self.submissions.remove_if(hash, |_, record| record.is_settled()).is_some() {
            tracing::debug!(hash = %hash, "Submission released");
        }
    }

    fn prune_intents(&self) {
        let retention = self.settings.intent_retention;
        self.intents.retain(|_, started| started.elapsed() < retention);
    }

    async fn fill(
        &self,
        intent: &TransactionIntent,
        from: Address,
        gas: GasEstimate,
        cancel: &CancelToken,
    ) -> TxResult<UnsignedTransaction> {
        let nonce = match intent.options.nonce {
            Some(nonce) => nonce,
            None => self.pending_nonce(from, cancel).await?,
        };
        let fees = self.fees_for(intent, cancel).await?;
        Ok(self.unsigned(intent, from, nonce, gas, fees))
    }

    async fn pending_nonce(&self, from: Address, cancel: &CancelToken) -> TxResult<u64> {
        self.clients
            .run(CallOptions::default(), cancel, move |client| async move {
                client.pending_nonce(from).await
            })
            .await
            .map_err(TxError::from_client)
    }

    async fn suggest_fees(&self, cancel: &CancelToken) -> TxResult<FeeSuggestion> {
        self.clients
            .run(CallOptions::default(), cancel, |client| async move {
                client.suggest_fees().await
            })
            .await
            .map_err(TxError::from_client)
    }

    async fn fees_for(&self, intent: &TransactionIntent, cancel: &CancelToken) -> TxResult<FeeSuggestion> {
        match (
            intent.options.max_fee_per_gas,
            intent.options.max_priority_fee_per_gas,
        ) {
            (Some(max_fee_per_gas), Some(max_priority_fee_per_gas)) => Ok(FeeSuggestion {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            }),
            (max_fee, priority_fee) => {
                let suggested = self.suggest_fees(cancel).await?;
                Ok(FeeSuggestion {
                    max_fee_per_gas: max_fee.unwrap_or(suggested.max_fee_per_gas),
                    max_priority_fee_per_gas: priority_fee.unwrap_or(suggested.max_priority_fee_per_gas),
                })
            }
        }
    }

    fn unsigned(
        &self,
        intent: &TransactionIntent,
        from: Address,
        nonce: u64,
        gas: GasEstimate,
        fees: FeeSuggestion,
    ) -> UnsignedTransaction {
        UnsignedTransaction {
            chain_id: self.chain_id,
            from,
            to: intent.to,
            data: intent.data.clone(),
            value: intent.value,
            nonce,
            gas_limit: intent.options.gas_limit.unwrap_or(gas.safe),
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
        }
    }
}

fn is_already_known(err: &ClientError) -> bool {
    let Some(message) = err.node_error().and_then(|e| e.node_message()) else {
        return false;
    };
    let message = message.to_lowercase();
    ALREADY_KNOWN_MARKERS.iter().any(|marker| message.contains(marker))
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("chain_id", &self.chain_id)
            .field("settings", &self.settings)
            .field("tracked_submissions", &self.submissions.len())
            .finish()
    }
}
