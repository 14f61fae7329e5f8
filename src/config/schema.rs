//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the daemon.
//! All types derive Serde traits for deserialization from config files.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::query::multicall::MULTICALL3_ADDRESS;

/// Root configuration for the daemon.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Chain the execution clients must be on.
    pub chain_id: u64,

    /// Execution client pair.
    #[serde(default = "ClientPairConfig::execution")]
    pub execution: ClientPairConfig,

    /// Beacon node pair.
    #[serde(default = "ClientPairConfig::beacon")]
    pub beacon: ClientPairConfig,

    /// Batched read settings.
    pub query: QueryConfig,

    /// Transaction pipeline settings.
    pub transactions: TransactionConfig,

    /// Status monitor settings for `run`.
    pub monitor: MonitorConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            execution: ClientPairConfig::execution(),
            beacon: ClientPairConfig::beacon(),
            query: QueryConfig::default(),
            transactions: TransactionConfig::default(),
            monitor: MonitorConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// A primary client and an optional fallback for one layer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientPairConfig {
    /// The operator's own client.
    pub primary_url: String,

    /// External client used when the primary is unavailable.
    #[serde(default)]
    pub fallback_url: Option<String>,

    /// Timeout for a regular request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Timeout for one reachability/sync probe.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// How long probe results are reused (0 = probe on every call).
    #[serde(default = "default_status_cache_ttl_ms")]
    pub status_cache_ttl_ms: u64,

    /// Largest lag (blocks or slots) still treated as synced.
    #[serde(default)]
    pub max_sync_lag: u64,
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_status_cache_ttl_ms() -> u64 {
    2_000
}

impl ClientPairConfig {
    pub fn new(primary_url: impl Into<String>) -> Self {
        Self {
            primary_url: primary_url.into(),
            fallback_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            status_cache_ttl_ms: default_status_cache_ttl_ms(),
            max_sync_lag: 0,
        }
    }

    /// Local execution client on the standard JSON-RPC port.
    pub fn execution() -> Self {
        Self::new("http://localhost:8545")
    }

    /// Local beacon node on the standard REST port.
    pub fn beacon() -> Self {
        Self::new("http://localhost:5052")
    }
}

/// Batched read configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Batches in flight at once (0 = half the available cores).
    pub concurrency_limit: usize,

    /// Calls per multicall round trip.
    pub batch_size: usize,

    /// Multicall3 contract address.
    pub multicall_address: Address,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 0,
            batch_size: 100,
            multicall_address: MULTICALL3_ADDRESS,
        }
    }
}

/// Transaction pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Fixed gas added to every estimate.
    pub safe_gas_buffer: u64,

    /// Proportional gas headroom.
    pub safe_gas_multiplier: f64,

    /// Delay between receipt polls.
    pub poll_interval_ms: u64,

    /// Default bound for waiting on a receipt.
    pub wait_timeout_secs: u64,

    /// How long an executed intent id is remembered for replay protection.
    pub intent_retention_secs: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            safe_gas_buffer: 0,
            safe_gas_multiplier: 1.5,
            poll_interval_ms: 2_000,
            wait_timeout_secs: 300,
            intent_retention_secs: 3_600,
        }
    }
}

/// Status monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between status probes while running.
    pub status_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            status_interval_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9102".to_string(),
        }
    }
}
