//! Batched concurrent reads through the execution client manager.
//!
//! # Responsibilities
//! - Split a request into multicall batches
//! - Run batches concurrently, bounded by a process-wide slot limit
//! - Return exactly one result per input call, in input order
//! - Survive an endpoint failing mid-request
//!
//! # Design Decisions
//! - The endpoint is resolved once per request and shared by its batches
//! - A transient failure marks that shared view stale; batches that start
//!   later re-resolve instead of hitting the dead endpoint
//! - A failed batch gives its slot back before retrying elsewhere

use alloy::primitives::Address;
use futures_util::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

use crate::clients::error::{ClientError, RpcError};
use crate::clients::manager::ResolvedClient;
use crate::clients::traits::ExecutionClient;
use crate::clients::types::{CallMsg, CallOptions};
use crate::clients::ExecutionClientManager;
use crate::config::schema::QueryConfig;
use crate::lifecycle::CancelToken;
use crate::observability::metrics;
use crate::query::multicall::{BatchCallGroup, MULTICALL3_ADDRESS};
use crate::query::types::{CallOutput, ContractCall, QueryError, QueryResult};

/// Default number of batches in flight: half the available cores, at least one.
pub fn default_concurrency_limit() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}

/// Construction parameters for a [`QueryManager`].
#[derive(Debug, Clone, Copy)]
pub struct QuerySettings {
    pub multicall_address: Address,
    /// Calls per multicall round trip.
    pub batch_size: usize,
    /// Batches in flight across all requests.
    pub concurrency_limit: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            multicall_address: MULTICALL3_ADDRESS,
            batch_size: 100,
            concurrency_limit: default_concurrency_limit(),
        }
    }
}

impl From<&QueryConfig> for QuerySettings {
    fn from(config: &QueryConfig) -> Self {
        Self {
            multicall_address: config.multicall_address,
            batch_size: config.batch_size,
            concurrency_limit: if config.concurrency_limit == 0 {
                default_concurrency_limit()
            } else {
                config.concurrency_limit
            },
        }
    }
}

/// Endpoint shared by the batches of one request.
struct RequestView {
    current: Mutex<ResolvedClient<dyn ExecutionClient>>,
    stale: AtomicBool,
}

/// Why a single batch attempt failed.
enum BatchFailure {
    Rpc(RpcError),
    Query(QueryError),
}

/// Executes batched read calls.
pub struct QueryManager {
    clients: Arc<ExecutionClientManager>,
    multicall: Address,
    batch_size: usize,
    concurrency_limit: usize,
    slots: Arc<Semaphore>,
}

impl QueryManager {
    pub fn new(clients: Arc<ExecutionClientManager>, settings: QuerySettings) -> Self {
        let concurrency_limit = settings.concurrency_limit.max(1);
        let batch_size = settings.batch_size.max(1);

        tracing::info!(
            multicall = %settings.multicall_address,
            batch_size = batch_size,
            concurrency_limit = concurrency_limit,
            "Query manager initialized"
        );

        Self {
            clients,
            multicall: settings.multicall_address,
            batch_size,
            concurrency_limit,
            slots: Arc::new(Semaphore::new(concurrency_limit)),
        }
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Slots currently free. Equals the limit when nothing is in flight.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Run `calls` with the manager's routing flags.
    pub async fn query(
        &self,
        calls: Vec<ContractCall>,
        cancel: &CancelToken,
    ) -> Vec<QueryResult<CallOutput>> {
        self.query_with(calls, CallOptions::default(), cancel).await
    }

    /// Run a single call.
    pub async fn query_one(&self, call: ContractCall, cancel: &CancelToken) -> QueryResult<CallOutput> {
        self.query(vec![call], cancel)
            .await
            .pop()
            .unwrap_or(Err(QueryError::Cancelled))
    }

    /// Run `calls` with per-request routing overrides.
    ///
    /// Always returns one result per input call, in input order.
    pub async fn query_with(
        &self,
        calls: Vec<ContractCall>,
        options: CallOptions,
        cancel: &CancelToken,
    ) -> Vec<QueryResult<CallOutput>> {
        let total = calls.len();
        if total == 0 {
            return Vec::new();
        }

        let resolved = match cancel.run_until_cancelled(self.clients.resolve(options)).await {
            None => return vec![Err(QueryError::Cancelled); total],
            Some(Err(e)) => {
                tracing::warn!(calls = total, error = %e, "Query failed to resolve a client");
                return vec![Err(QueryError::Client(e)); total];
            }
            Some(Ok(resolved)) => resolved,
        };

        let view = RequestView {
            current: Mutex::new(resolved),
            stale: AtomicBool::new(false),
        };

        let groups = BatchCallGroup::partition(calls, self.batch_size);
        tracing::debug!(calls = total, batches = groups.len(), "Running query");

        let batches = groups
            .iter()
            .map(|group| self.run_group(&view, group, options, cancel));
        let results: Vec<QueryResult<CallOutput>> = join_all(batches).await.into_iter().flatten().collect();

        debug_assert_eq!(results.len(), total);
        results
    }

    /// Run one group to completion, retrying once on another endpoint.
    ///
    /// Always returns `group.len()` results.
    async fn run_group(
        &self,
        view: &RequestView,
        group: &BatchCallGroup,
        options: CallOptions,
        cancel: &CancelToken,
    ) -> Vec<QueryResult<CallOutput>> {
        let client = match self.current_client(view, options, cancel).await {
            Ok(client) => client,
            Err(e) => return self.fail_group(group, e),
        };

        let first_error = match self.send_batch(&client, group, cancel).await {
            Ok(results) => {
                metrics::record_query_batch("success", group.len());
                return results;
            }
            Err(BatchFailure::Query(e)) => return self.fail_group(group, e),
            Err(BatchFailure::Rpc(e)) if !e.is_transient() => {
                return self.fail_group(
                    group,
                    QueryError::Client(ClientError::Node {
                        layer: self.clients.layer(),
                        endpoint: client.name().to_string(),
                        source: e,
                    }),
                )
            }
            Err(BatchFailure::Rpc(e)) => e,
        };

        tracing::warn!(
            endpoint = %client.name(),
            offset = group.offset,
            calls = group.len(),
            error = %first_error,
            "Query batch failed"
        );

        // Later batches of this request must not reuse the failed endpoint.
        view.stale.store(true, Ordering::SeqCst);
        self.clients.invalidate_status();

        let retry = match self.current_client(view, options, cancel).await {
            Ok(next) if next.name() != client.name() => next,
            Ok(_) | Err(ClientError::NoAvailableClient { .. }) => {
                return self.fail_group(
                    group,
                    QueryError::Client(ClientError::Unreachable {
                        layer: self.clients.layer(),
                        role: client.role,
                        endpoint: client.name().to_string(),
                        reason: first_error.to_string(),
                    }),
                )
            }
            Err(e) => return self.fail_group(group, e),
        };

        metrics::record_failover(self.clients.layer());
        tracing::info!(
            endpoint = %retry.name(),
            offset = group.offset,
            "Retrying query batch on alternate client"
        );

        match self.send_batch(&retry, group, cancel).await {
            Ok(results) => {
                metrics::record_query_batch("retried", group.len());
                results
            }
            Err(BatchFailure::Query(e)) => self.fail_group(group, e),
            Err(BatchFailure::Rpc(e)) => {
                view.stale.store(true, Ordering::SeqCst);
                let error = if e.is_transient() {
                    ClientError::AllEndpointsFailed {
                        layer: self.clients.layer(),
                        attempts: vec![
                            (client.name().to_string(), first_error),
                            (retry.name().to_string(), e),
                        ],
                    }
                } else {
                    ClientError::Node {
                        layer: self.clients.layer(),
                        endpoint: retry.name().to_string(),
                        source: e,
                    }
                };
                self.fail_group(group, QueryError::Client(error))
            }
        }
    }

    /// Endpoint for the next batch, re-resolving if the view went stale.
    async fn current_client(
        &self,
        view: &RequestView,
        options: CallOptions,
        cancel: &CancelToken,
    ) -> Result<ResolvedClient<dyn ExecutionClient>, ClientError> {
        let mut current = cancel
            .run_until_cancelled(view.current.lock())
            .await
            .ok_or(ClientError::Cancelled)?;

        if view.stale.swap(false, Ordering::SeqCst) {
            match cancel.run_until_cancelled(self.clients.resolve(options)).await {
                Some(Ok(resolved)) => {
                    tracing::debug!(endpoint = %resolved.name(), "Query re-resolved client");
                    *current = resolved;
                }
                Some(Err(e)) => {
                    view.stale.store(true, Ordering::SeqCst);
                    return Err(e);
                }
                None => {
                    view.stale.store(true, Ordering::SeqCst);
                    return Err(ClientError::Cancelled);
                }
            }
        }
        Ok(current.clone())
    }

    /// One round trip for one group, holding a slot only for its duration.
    async fn send_batch(
        &self,
        client: &ResolvedClient<dyn ExecutionClient>,
        group: &BatchCallGroup,
        cancel: &CancelToken,
    ) -> Result<Vec<QueryResult<CallOutput>>, BatchFailure> {
        let msg = CallMsg::new(self.multicall, group.encode());

        let _permit = match cancel.run_until_cancelled(self.slots.acquire()).await {
            Some(Ok(permit)) => permit,
            Some(Err(_)) | None => return Err(BatchFailure::Query(QueryError::Cancelled)),
        };

        let raw = match cancel.run_until_cancelled(client.client.call(&msg)).await {
            None => return Err(BatchFailure::Query(QueryError::Cancelled)),
            Some(Err(e)) => return Err(BatchFailure::Rpc(e)),
            Some(Ok(raw)) => raw,
        };

        group.decode(&raw).map_err(BatchFailure::Query)
    }

    fn fail_group(&self, group: &BatchCallGroup, error: impl Into<QueryError>) -> Vec<QueryResult<CallOutput>> {
        let error = error.into();
        let outcome = match error {
            QueryError::Cancelled | QueryError::Client(ClientError::Cancelled) => "cancelled",
            _ => "failed",
        };
        metrics::record_query_batch(outcome, group.len());

        let error = match error {
            QueryError::Client(ClientError::Cancelled) => QueryError::Cancelled,
            other => other,
        };
        vec![Err(error); group.len()]
    }
}

impl std::fmt::Debug for QueryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryManager")
            .field("multicall", &self.multicall)
            .field("batch_size", &self.batch_size)
            .field("concurrency_limit", &self.concurrency_limit)
            .finish()
    }
}
