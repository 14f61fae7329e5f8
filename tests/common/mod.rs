//! Shared fakes for integration tests.

#![allow(dead_code)]

use alloy::primitives::{keccak256, Address, Bytes, TxHash};
use alloy::sol_types::{Revert, SolCall, SolError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use node_daemon::clients::{
    BeaconClient, BeaconClientManager, CallMsg, ClientLayer, ClientManager, ClientManagerSettings,
    ExecutionClient, ExecutionClientManager, FeeSuggestion, NodeClient, Receipt, RpcError,
    SyncProgress,
};
use node_daemon::query::multicall::IMulticall3;
use node_daemon::transactions::{SignedTransaction, SignerError, TransactionSigner, UnsignedTransaction};

pub const FAKE_CHAIN_ID: u64 = 31337;

/// Counts a call as in flight until dropped, so cancelled calls are released too.
struct InFlight<'a> {
    current: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(current: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { current }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scriptable execution client.
///
/// `eth_call` understands `aggregate3` and answers each inner call by echoing
/// its arguments (calldata minus selector), or reverting for targets marked
/// with [`FakeExecutionClient::revert_target`].
pub struct FakeExecutionClient {
    name: String,
    reachable: AtomicBool,
    lag: AtomicU64,
    probe_delay_ms: AtomicU64,
    call_delay_ms: AtomicU64,
    calls_fail: AtomicBool,
    crash_on_call: AtomicBool,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    call_count: AtomicUsize,
    reverting: Mutex<HashSet<Address>>,
    poison: Mutex<Option<Address>>,
    estimate: Mutex<Result<u64, String>>,
    nonce: AtomicU64,
    send_delay_ms: AtomicU64,
    send_error: Mutex<Option<RpcError>>,
    auto_mine: Mutex<Option<bool>>,
    sent: Mutex<Vec<Bytes>>,
    receipts: Mutex<HashMap<TxHash, Receipt>>,
}

impl FakeExecutionClient {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            reachable: AtomicBool::new(true),
            lag: AtomicU64::new(0),
            probe_delay_ms: AtomicU64::new(0),
            call_delay_ms: AtomicU64::new(0),
            calls_fail: AtomicBool::new(false),
            crash_on_call: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            call_count: AtomicUsize::new(0),
            reverting: Mutex::new(HashSet::new()),
            poison: Mutex::new(None),
            estimate: Mutex::new(Ok(21_000)),
            nonce: AtomicU64::new(0),
            send_delay_ms: AtomicU64::new(0),
            send_error: Mutex::new(None),
            auto_mine: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            receipts: Mutex::new(HashMap::new()),
        })
    }

    // --- Scripting ---

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_lag(&self, lag: u64) {
        self.lag.store(lag, Ordering::SeqCst);
    }

    pub fn set_probe_delay(&self, delay: Duration) {
        self.probe_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_call_delay(&self, delay: Duration) {
        self.call_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Probes keep succeeding but every request fails at the transport level.
    pub fn set_calls_fail(&self, fail: bool) {
        self.calls_fail.store(fail, Ordering::SeqCst);
    }

    /// The next `eth_call` takes the node down: it fails and so do later probes.
    pub fn crash_on_next_call(&self) {
        self.crash_on_call.store(true, Ordering::SeqCst);
    }

    pub fn revert_target(&self, target: Address) {
        self.reverting.lock().unwrap().insert(target);
    }

    /// Any multicall batch containing `target` is rejected by the node.
    pub fn poison_batches_with(&self, target: Address) {
        *self.poison.lock().unwrap() = Some(target);
    }

    pub fn set_estimate(&self, estimate: Result<u64, &str>) {
        *self.estimate.lock().unwrap() = estimate.map_err(str::to_string);
    }

    pub fn set_nonce(&self, nonce: u64) {
        self.nonce.store(nonce, Ordering::SeqCst);
    }

    pub fn set_send_delay(&self, delay: Duration) {
        self.send_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_send_error(&self, error: Option<RpcError>) {
        *self.send_error.lock().unwrap() = error;
    }

    /// Mine every accepted transaction immediately with the given status.
    pub fn set_auto_mine(&self, success: Option<bool>) {
        *self.auto_mine.lock().unwrap() = success;
    }

    pub fn mine(&self, hash: TxHash, success: bool) {
        self.receipts.lock().unwrap().insert(
            hash,
            Receipt {
                tx_hash: hash,
                block_number: Some(100),
                gas_used: 21_000,
                success,
            },
        );
    }

    // --- Inspection ---

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    fn check_transport(&self) -> Result<(), RpcError> {
        if !self.reachable.load(Ordering::SeqCst) || self.calls_fail.load(Ordering::SeqCst) {
            return Err(RpcError::Transport(format!("{}: connection refused", self.name)));
        }
        Ok(())
    }

    fn answer_aggregate3(&self, data: &[u8]) -> Result<Bytes, RpcError> {
        let decoded = IMulticall3::aggregate3Call::abi_decode(data)
            .map_err(|e| RpcError::Node { code: -32602, message: e.to_string() })?;

        if let Some(poison) = *self.poison.lock().unwrap() {
            if decoded.calls.iter().any(|c| c.target == poison) {
                return Err(RpcError::Node {
                    code: -32000,
                    message: "out of gas".into(),
                });
            }
        }

        let reverting = self.reverting.lock().unwrap();
        let results: Vec<IMulticall3::CallResult> = decoded
            .calls
            .iter()
            .map(|call| {
                if reverting.contains(&call.target) {
                    IMulticall3::CallResult {
                        success: false,
                        returnData: Revert::from("reverted by fake".to_string()).abi_encode().into(),
                    }
                } else {
                    IMulticall3::CallResult {
                        success: true,
                        returnData: Bytes::copy_from_slice(&call.callData[4..]),
                    }
                }
            })
            .collect();

        Ok(IMulticall3::aggregate3Call::abi_encode_returns(&results).into())
    }
}

#[async_trait]
impl NodeClient for FakeExecutionClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn sync_status(&self) -> Result<SyncProgress, RpcError> {
        let delay = self.probe_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(RpcError::Transport(format!("{}: connection refused", self.name)));
        }
        match self.lag.load(Ordering::SeqCst) {
            0 => Ok(SyncProgress::synced(1_000)),
            lag => Ok(SyncProgress::syncing(1_000 - lag.min(1_000), lag)),
        }
    }
}

#[async_trait]
impl ExecutionClient for FakeExecutionClient {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        self.check_transport()?;
        Ok(FAKE_CHAIN_ID)
    }

    async fn call(&self, msg: &CallMsg) -> Result<Bytes, RpcError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if self.crash_on_call.swap(false, Ordering::SeqCst) {
            self.set_reachable(false);
        }
        self.check_transport()?;

        let _guard = InFlight::enter(&self.in_flight, &self.peak_in_flight);
        let delay = self.call_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if msg.data.len() >= 4 && msg.data[..4] == IMulticall3::aggregate3Call::SELECTOR {
            self.answer_aggregate3(&msg.data)
        } else {
            Ok(msg.data.clone())
        }
    }

    async fn estimate_gas(&self, _msg: &CallMsg) -> Result<u64, RpcError> {
        self.check_transport()?;
        self.estimate
            .lock()
            .unwrap()
            .clone()
            .map_err(|reason| RpcError::Node {
                code: 3,
                message: format!("execution reverted: {reason}"),
            })
    }

    async fn pending_nonce(&self, _address: Address) -> Result<u64, RpcError> {
        self.check_transport()?;
        Ok(self.nonce.load(Ordering::SeqCst))
    }

    async fn suggest_fees(&self) -> Result<FeeSuggestion, RpcError> {
        self.check_transport()?;
        Ok(FeeSuggestion {
            max_fee_per_gas: 30_000_000_000,
            max_priority_fee_per_gas: 1_000_000_000,
        })
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<TxHash, RpcError> {
        self.check_transport()?;
        let delay = self.send_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.sent.lock().unwrap().push(raw.clone());
        if let Some(error) = self.send_error.lock().unwrap().clone() {
            return Err(error);
        }

        let hash = keccak256(raw);
        if let Some(success) = *self.auto_mine.lock().unwrap() {
            self.mine(hash, success);
        }
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, RpcError> {
        self.check_transport()?;
        Ok(self.receipts.lock().unwrap().get(&hash).cloned())
    }
}

/// Scriptable beacon node.
pub struct FakeBeaconClient {
    name: String,
    reachable: AtomicBool,
    lag: AtomicU64,
}

impl FakeBeaconClient {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            reachable: AtomicBool::new(true),
            lag: AtomicU64::new(0),
        })
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_lag(&self, lag: u64) {
        self.lag.store(lag, Ordering::SeqCst);
    }
}

#[async_trait]
impl NodeClient for FakeBeaconClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn sync_status(&self) -> Result<SyncProgress, RpcError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(RpcError::Transport(format!("{}: connection refused", self.name)));
        }
        match self.lag.load(Ordering::SeqCst) {
            0 => Ok(SyncProgress::synced(8_000)),
            lag => Ok(SyncProgress::syncing(8_000 - lag.min(8_000), lag)),
        }
    }
}

#[async_trait]
impl BeaconClient for FakeBeaconClient {
    async fn node_version(&self) -> Result<String, RpcError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(RpcError::Transport("connection refused".into()));
        }
        Ok(format!("{}/v1.0.0", self.name))
    }
}

/// Deterministic signer: the "envelope" is nonce ‖ to ‖ data.
pub struct FakeSigner {
    address: Address,
    fail_on_nonce: Option<u64>,
    signed: AtomicUsize,
}

impl FakeSigner {
    pub fn new() -> Self {
        Self {
            address: Address::with_last_byte(0xaa),
            fail_on_nonce: None,
            signed: AtomicUsize::new(0),
        }
    }

    pub fn failing_on_nonce(nonce: u64) -> Self {
        Self {
            fail_on_nonce: Some(nonce),
            ..Self::new()
        }
    }

    pub fn signed_count(&self) -> usize {
        self.signed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionSigner for FakeSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_transaction(&self, tx: UnsignedTransaction) -> Result<SignedTransaction, SignerError> {
        if self.fail_on_nonce == Some(tx.nonce) {
            return Err(SignerError::Failed(format!("refusing nonce {}", tx.nonce)));
        }
        self.signed.fetch_add(1, Ordering::SeqCst);

        let mut raw = tx.nonce.to_be_bytes().to_vec();
        raw.extend_from_slice(tx.to.as_slice());
        raw.extend_from_slice(&tx.gas_limit.to_be_bytes());
        raw.extend_from_slice(&tx.data);
        Ok(SignedTransaction {
            hash: keccak256(&raw),
            raw: raw.into(),
            nonce: tx.nonce,
        })
    }
}

/// Probe settings for tests: short timeout, no status caching.
pub fn test_settings() -> ClientManagerSettings {
    ClientManagerSettings {
        probe_timeout: Duration::from_millis(200),
        status_cache_ttl: Duration::ZERO,
        max_sync_lag: 0,
    }
}

pub fn execution_manager(
    primary: &Arc<FakeExecutionClient>,
    fallback: Option<&Arc<FakeExecutionClient>>,
) -> Arc<ExecutionClientManager> {
    Arc::new(ClientManager::new(
        ClientLayer::Execution,
        primary.clone() as Arc<dyn ExecutionClient>,
        fallback.map(|f| f.clone() as Arc<dyn ExecutionClient>),
        test_settings(),
    ))
}

pub fn beacon_manager(
    primary: &Arc<FakeBeaconClient>,
    fallback: Option<&Arc<FakeBeaconClient>>,
) -> Arc<BeaconClientManager> {
    Arc::new(ClientManager::new(
        ClientLayer::Beacon,
        primary.clone() as Arc<dyn BeaconClient>,
        fallback.map(|f| f.clone() as Arc<dyn BeaconClient>),
        test_settings(),
    ))
}

/// ABI-encoded call to `echo(uint256)`; the fake returns the argument.
pub mod echo {
    use alloy::sol;

    sol! {
        function echo(uint256 value) external view returns (uint256);
    }
}

pub fn echo_call(target: Address, value: u64) -> node_daemon::query::ContractCall {
    node_daemon::query::ContractCall::sol(
        target,
        &echo::echoCall {
            value: alloy::primitives::U256::from(value),
        },
    )
}
