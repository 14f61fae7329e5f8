//! Routing and health types shared by both client layers.

use alloy::primitives::{Address, Bytes, TxHash, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Which chain layer a manager fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientLayer {
    Execution,
    Beacon,
}

impl ClientLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientLayer::Execution => "execution",
            ClientLayer::Beacon => "beacon",
        }
    }
}

impl fmt::Display for ClientLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a physical client within a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    Primary,
    Fallback,
}

impl ClientRole {
    /// The alternate role.
    pub fn other(self) -> Self {
        match self {
            ClientRole::Primary => ClientRole::Fallback,
            ClientRole::Fallback => ClientRole::Primary,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientRole::Primary => "primary",
            ClientRole::Fallback => "fallback",
        }
    }
}

impl fmt::Display for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw sync report returned by a physical client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProgress {
    /// Whether the client reports itself as syncing.
    pub is_syncing: bool,
    /// Local head (block number or slot).
    pub head: u64,
    /// Distance to the network head, in blocks or slots.
    pub lag: u64,
}

impl SyncProgress {
    pub fn synced(head: u64) -> Self {
        Self {
            is_syncing: false,
            head,
            lag: 0,
        }
    }

    pub fn syncing(head: u64, lag: u64) -> Self {
        Self {
            is_syncing: true,
            head,
            lag,
        }
    }
}

/// Health of one endpoint as seen by its last probe.
///
/// Reachability and sync are folded into a single enum so an unreachable
/// endpoint can never also be considered routable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EndpointHealth {
    Unreachable { reason: String },
    Syncing { head: u64, lag: u64 },
    Synced { head: u64 },
}

impl EndpointHealth {
    pub fn is_reachable(&self) -> bool {
        !matches!(self, EndpointHealth::Unreachable { .. })
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, EndpointHealth::Synced { .. })
    }

    /// Whether calls may be routed here under the given sync policy.
    pub fn is_usable(&self, ignore_sync_check: bool) -> bool {
        match self {
            EndpointHealth::Unreachable { .. } => false,
            EndpointHealth::Syncing { .. } => ignore_sync_check,
            EndpointHealth::Synced { .. } => true,
        }
    }
}

impl fmt::Display for EndpointHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointHealth::Unreachable { reason } => write!(f, "unreachable ({})", reason),
            EndpointHealth::Syncing { head, lag } => write!(f, "syncing at {} ({} behind)", head, lag),
            EndpointHealth::Synced { head } => write!(f, "synced at {}", head),
        }
    }
}

/// Snapshot of one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointStatus {
    pub role: ClientRole,
    /// Display name of the endpoint (usually its URL).
    pub name: String,
    pub health: EndpointHealth,
    pub checked_at: SystemTime,
}

impl EndpointStatus {
    /// Compare everything except the probe timestamp.
    pub fn same_state(&self, other: &EndpointStatus) -> bool {
        self.role == other.role && self.name == other.name && self.health == other.health
    }
}

/// Manager-wide override flags. Always read and written as one value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingFlags {
    /// Treat any reachable endpoint as usable, synced or not.
    pub ignore_sync_check: bool,
    /// Prefer the fallback whenever it is reachable.
    pub force_fallback: bool,
}

/// Per-call overrides, OR-ed with the manager's flags for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub ignore_sync_check: bool,
    pub force_fallback: bool,
}

impl RoutingFlags {
    pub fn merge(self, options: CallOptions) -> RoutingFlags {
        RoutingFlags {
            ignore_sync_check: self.ignore_sync_check || options.ignore_sync_check,
            force_fallback: self.force_fallback || options.force_fallback,
        }
    }
}

/// Outcome of routing a single call. Never cached beyond that call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDecision {
    UsePrimary,
    UseFallback,
    NoneAvailable,
}

impl RoutingDecision {
    /// Apply the selection order: forced fallback, primary, fallback, none.
    pub fn decide(
        primary: &EndpointHealth,
        fallback: Option<&EndpointHealth>,
        flags: RoutingFlags,
    ) -> RoutingDecision {
        if flags.force_fallback && fallback.is_some_and(EndpointHealth::is_reachable) {
            return RoutingDecision::UseFallback;
        }
        if primary.is_usable(flags.ignore_sync_check) {
            return RoutingDecision::UsePrimary;
        }
        if fallback.is_some_and(|f| f.is_usable(flags.ignore_sync_check)) {
            return RoutingDecision::UseFallback;
        }
        RoutingDecision::NoneAvailable
    }

    pub fn role(&self) -> Option<ClientRole> {
        match self {
            RoutingDecision::UsePrimary => Some(ClientRole::Primary),
            RoutingDecision::UseFallback => Some(ClientRole::Fallback),
            RoutingDecision::NoneAvailable => None,
        }
    }
}

/// The endpoint a status snapshot would route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveClient {
    Primary,
    Fallback,
    None,
}

impl From<RoutingDecision> for ActiveClient {
    fn from(decision: RoutingDecision) -> Self {
        match decision {
            RoutingDecision::UsePrimary => ActiveClient::Primary,
            RoutingDecision::UseFallback => ActiveClient::Fallback,
            RoutingDecision::NoneAvailable => ActiveClient::None,
        }
    }
}

/// Immutable view of a manager: both endpoints plus the active choice.
///
/// "No client available" is a regular value (`active == ActiveClient::None`),
/// so monitoring can render degraded states instead of failing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub layer: ClientLayer,
    pub primary: EndpointStatus,
    pub fallback: Option<EndpointStatus>,
    pub active: ActiveClient,
    pub flags: RoutingFlags,
}

impl ManagerStatus {
    pub fn new(
        layer: ClientLayer,
        primary: EndpointStatus,
        fallback: Option<EndpointStatus>,
        flags: RoutingFlags,
    ) -> Self {
        let active = RoutingDecision::decide(
            &primary.health,
            fallback.as_ref().map(|f| &f.health),
            flags,
        )
        .into();
        Self {
            layer,
            primary,
            fallback,
            active,
            flags,
        }
    }

    /// Routing decision for this snapshot under (possibly different) flags.
    pub fn decide(&self, flags: RoutingFlags) -> RoutingDecision {
        RoutingDecision::decide(
            &self.primary.health,
            self.fallback.as_ref().map(|f| &f.health),
            flags,
        )
    }

    /// Same snapshot with the active choice recomputed for new flags.
    pub fn with_flags(mut self, flags: RoutingFlags) -> Self {
        self.active = self.decide(flags).into();
        self.flags = flags;
        self
    }

    pub fn endpoint(&self, role: ClientRole) -> Option<&EndpointStatus> {
        match role {
            ClientRole::Primary => Some(&self.primary),
            ClientRole::Fallback => self.fallback.as_ref(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.active != ActiveClient::None
    }

    /// Compare everything except probe timestamps.
    pub fn same_state(&self, other: &ManagerStatus) -> bool {
        let fallback_same = match (&self.fallback, &other.fallback) {
            (Some(a), Some(b)) => a.same_state(b),
            (None, None) => true,
            _ => false,
        };
        self.layer == other.layer
            && self.primary.same_state(&other.primary)
            && fallback_same
            && self.active == other.active
            && self.flags == other.flags
    }
}

/// Read-only call against the execution layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallMsg {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

impl CallMsg {
    pub fn new(to: Address, data: Bytes) -> Self {
        Self {
            from: None,
            to,
            data,
            value: U256::ZERO,
        }
    }

    pub fn with_from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

/// Fee parameters suggested by the execution client (EIP-1559).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSuggestion {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// Minimal view of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    /// False when the transaction reverted.
    pub success: bool,
}
