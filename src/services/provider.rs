//! Composition root.
//!
//! Builds one client manager per layer and the query and transaction
//! managers on top of the execution manager. Every consumer receives its
//! collaborators from here instead of constructing them.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::clients::error::RpcError;
use crate::clients::types::{CallOptions, ClientLayer, ManagerStatus, RoutingFlags};
use crate::clients::{
    AlloyExecutionClient, BeaconClient, BeaconClientManager, ClientError, ClientManager,
    ClientManagerSettings, ExecutionClient, ExecutionClientManager, HttpBeaconClient,
};
use crate::config::schema::{ClientPairConfig, DaemonConfig};
use crate::lifecycle::CancelToken;
use crate::query::{QueryManager, QuerySettings};
use crate::transactions::{TransactionManager, TransactionSettings};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid {field} '{url}': {reason}")]
    InvalidUrl {
        field: String,
        url: String,
        reason: String,
    },

    #[error("failed to create {layer} client: {source}")]
    Client {
        layer: ClientLayer,
        #[source]
        source: RpcError,
    },

    #[error("chain ID mismatch: expected {expected}, got {actual}")]
    ChainMismatch { expected: u64, actual: u64 },

    #[error(transparent)]
    Unavailable(#[from] ClientError),
}

/// Status of both layers, for display and monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatusReport {
    pub execution: ManagerStatus,
    pub beacon: ManagerStatus,
}

impl ClientStatusReport {
    /// Both layers have a usable client.
    pub fn is_healthy(&self) -> bool {
        self.execution.is_available() && self.beacon.is_available()
    }
}

/// Shared services for one daemon process.
pub struct ServiceProvider {
    config: DaemonConfig,
    execution: Arc<ExecutionClientManager>,
    beacon: Arc<BeaconClientManager>,
    query: Arc<QueryManager>,
    transactions: Arc<TransactionManager>,
}

impl ServiceProvider {
    /// Compose the services from already constructed clients.
    pub fn new(
        config: DaemonConfig,
        execution_primary: Arc<dyn ExecutionClient>,
        execution_fallback: Option<Arc<dyn ExecutionClient>>,
        beacon_primary: Arc<dyn BeaconClient>,
        beacon_fallback: Option<Arc<dyn BeaconClient>>,
    ) -> Self {
        let execution = Arc::new(ClientManager::new(
            ClientLayer::Execution,
            execution_primary,
            execution_fallback,
            ClientManagerSettings::from(&config.execution),
        ));
        let beacon = Arc::new(ClientManager::new(
            ClientLayer::Beacon,
            beacon_primary,
            beacon_fallback,
            ClientManagerSettings::from(&config.beacon),
        ));

        let query = Arc::new(QueryManager::new(
            execution.clone(),
            QuerySettings::from(&config.query),
        ));
        let transactions = Arc::new(TransactionManager::new(
            execution.clone(),
            config.chain_id,
            TransactionSettings::from(&config.transactions),
        ));

        Self {
            config,
            execution,
            beacon,
            query,
            transactions,
        }
    }

    /// Build HTTP clients for every configured URL and compose the services.
    ///
    /// Nothing is contacted here; unreachable endpoints show up in status.
    pub fn from_config(config: DaemonConfig) -> Result<Self, ServiceError> {
        let (execution_primary, execution_fallback) = execution_clients(&config.execution)?;
        let (beacon_primary, beacon_fallback) = beacon_clients(&config.beacon)?;

        Ok(Self::new(
            config,
            execution_primary,
            execution_fallback,
            beacon_primary,
            beacon_fallback,
        ))
    }

    // --- Getters ---

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn execution(&self) -> &Arc<ExecutionClientManager> {
        &self.execution
    }

    pub fn beacon(&self) -> &Arc<BeaconClientManager> {
        &self.beacon
    }

    pub fn query(&self) -> &Arc<QueryManager> {
        &self.query
    }

    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.transactions
    }

    // --- Operations ---

    /// Probe both layers. Never fails; degraded states are part of the value.
    pub async fn client_status(&self) -> ClientStatusReport {
        let (execution, beacon) = tokio::join!(self.execution.check_status(), self.beacon.check_status());
        ClientStatusReport { execution, beacon }
    }

    /// Apply the same override flags to both managers.
    pub fn set_routing_flags(&self, flags: RoutingFlags) {
        self.execution.set_flags(flags);
        self.beacon.set_flags(flags);
    }

    /// Check that the execution client serves the configured chain.
    pub async fn verify_chain_id(&self, cancel: &CancelToken) -> Result<(), ServiceError> {
        let actual = self
            .execution
            .run(CallOptions::default(), cancel, |client| async move { client.chain_id().await })
            .await?;

        if actual != self.config.chain_id {
            return Err(ServiceError::ChainMismatch {
                expected: self.config.chain_id,
                actual,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("chain_id", &self.config.chain_id)
            .field("execution", &self.execution)
            .field("beacon", &self.beacon)
            .field("query", &self.query)
            .field("transactions", &self.transactions)
            .finish()
    }
}

type ClientPair<C> = (Arc<C>, Option<Arc<C>>);

fn parse_url(field: &str, value: &str) -> Result<url::Url, ServiceError> {
    value.parse().map_err(|e: url::ParseError| ServiceError::InvalidUrl {
        field: field.to_string(),
        url: value.to_string(),
        reason: e.to_string(),
    })
}

fn execution_clients(config: &ClientPairConfig) -> Result<ClientPair<dyn ExecutionClient>, ServiceError> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let primary = parse_url("execution.primary_url", &config.primary_url)?;
    let primary = Arc::new(AlloyExecutionClient::new(primary, timeout)) as Arc<dyn ExecutionClient>;

    let fallback = match &config.fallback_url {
        Some(url) => {
            let url = parse_url("execution.fallback_url", url)?;
            Some(Arc::new(AlloyExecutionClient::new(url, timeout)) as Arc<dyn ExecutionClient>)
        }
        None => None,
    };
    Ok((primary, fallback))
}

fn beacon_clients(config: &ClientPairConfig) -> Result<ClientPair<dyn BeaconClient>, ServiceError> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let build = |field: &str, value: &str| -> Result<Arc<dyn BeaconClient>, ServiceError> {
        let url = parse_url(field, value)?;
        let client = HttpBeaconClient::new(url, timeout).map_err(|source| ServiceError::Client {
            layer: ClientLayer::Beacon,
            source,
        })?;
        Ok(Arc::new(client) as Arc<dyn BeaconClient>)
    };

    let primary = build("beacon.primary_url", &config.primary_url)?;
    let fallback = match &config.fallback_url {
        Some(url) => Some(build("beacon.fallback_url", url)?),
        None => None,
    };
    Ok((primary, fallback))
}
