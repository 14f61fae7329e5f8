//! Primary/fallback client manager.
//!
//! # Responsibilities
//! - Present one logical client backed by up to two physical endpoints
//! - Probe endpoint health on demand, caching results for a short TTL
//! - Route each call by the selection order below
//! - Retry once on the alternate endpoint after a network failure
//!
//! # Selection Order
//! ```text
//! 1. force_fallback and fallback reachable                → fallback
//! 2. primary reachable and (synced or ignore_sync_check)  → primary
//! 3. fallback reachable and (synced or ignore_sync_check) → fallback
//! 4. otherwise                                            → NoAvailableClient
//! ```
//!
//! # Design Decisions
//! - Primary is preferred over a healthy fallback unless forced; it is the
//!   operator's own node
//! - Override flags are swapped as one value, never observed half-updated
//! - Routing is recomputed per call; only probe results are cached

use arc_swap::{ArcSwap, ArcSwapOption};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clients::error::{ClientError, ClientResult, RpcError};
use crate::clients::sync::SyncStatusChecker;
use crate::clients::traits::NodeClient;
use crate::clients::types::{
    CallOptions, ClientLayer, ClientRole, EndpointHealth, EndpointStatus, ManagerStatus,
    RoutingDecision, RoutingFlags,
};
use crate::config::schema::ClientPairConfig;
use crate::lifecycle::CancelToken;
use crate::observability::metrics;

/// Tunables for a [`ClientManager`].
#[derive(Debug, Clone, Copy)]
pub struct ClientManagerSettings {
    /// Upper bound for one reachability/sync probe.
    pub probe_timeout: Duration,
    /// How long probe results are reused. Zero disables caching.
    pub status_cache_ttl: Duration,
    /// Largest lag (blocks or slots) still treated as synced.
    pub max_sync_lag: u64,
}

impl Default for ClientManagerSettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            status_cache_ttl: Duration::from_secs(2),
            max_sync_lag: 0,
        }
    }
}

impl From<&ClientPairConfig> for ClientManagerSettings {
    fn from(config: &ClientPairConfig) -> Self {
        Self {
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
            status_cache_ttl: Duration::from_millis(config.status_cache_ttl_ms),
            max_sync_lag: config.max_sync_lag,
        }
    }
}

/// The endpoint chosen for one call.
pub struct ResolvedClient<C: ?Sized> {
    pub role: ClientRole,
    pub client: Arc<C>,
}

impl<C: NodeClient + ?Sized> ResolvedClient<C> {
    pub fn name(&self) -> &str {
        self.client.name()
    }
}

impl<C: ?Sized> Clone for ResolvedClient<C> {
    fn clone(&self) -> Self {
        Self {
            role: self.role,
            client: self.client.clone(),
        }
    }
}

impl<C: NodeClient + ?Sized> std::fmt::Debug for ResolvedClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedClient")
            .field("role", &self.role)
            .field("client", &self.client.name())
            .finish()
    }
}

struct CachedStatus {
    status: ManagerStatus,
    probed_at: Instant,
}

/// One logical client over a primary and an optional fallback.
pub struct ClientManager<C: ?Sized> {
    layer: ClientLayer,
    primary: Arc<C>,
    fallback: Option<Arc<C>>,
    checker: SyncStatusChecker,
    status_cache_ttl: Duration,
    flags: ArcSwap<RoutingFlags>,
    cache: ArcSwapOption<CachedStatus>,
}

impl<C: NodeClient + ?Sized> ClientManager<C> {
    /// Create a manager.
    ///
    /// # Arguments
    /// * `layer` - Execution or beacon, used in errors, logs and metrics
    /// * `primary` - The operator's own client
    /// * `fallback` - Optional external client
    /// * `settings` - Probe timeout, status TTL and sync threshold
    pub fn new(
        layer: ClientLayer,
        primary: Arc<C>,
        fallback: Option<Arc<C>>,
        settings: ClientManagerSettings,
    ) -> Self {
        tracing::info!(
            layer = %layer,
            primary = %primary.name(),
            fallback = fallback.as_ref().map(|f| f.name()).unwrap_or("none"),
            "Client manager initialized"
        );

        Self {
            layer,
            primary,
            fallback,
            checker: SyncStatusChecker::new(settings.probe_timeout, settings.max_sync_lag),
            status_cache_ttl: settings.status_cache_ttl,
            flags: ArcSwap::from_pointee(RoutingFlags::default()),
            cache: ArcSwapOption::empty(),
        }
    }

    pub fn layer(&self) -> ClientLayer {
        self.layer
    }

    pub fn primary_name(&self) -> &str {
        self.primary.name()
    }

    pub fn fallback_name(&self) -> Option<&str> {
        self.fallback.as_ref().map(|f| f.name())
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    // --- Override flags ---

    /// Current override flags, read as one consistent pair.
    pub fn flags(&self) -> RoutingFlags {
        **self.flags.load()
    }

    /// Replace both override flags at once.
    pub fn set_flags(&self, flags: RoutingFlags) {
        self.flags.store(Arc::new(flags));
        tracing::info!(
            layer = %self.layer,
            ignore_sync_check = flags.ignore_sync_check,
            force_fallback = flags.force_fallback,
            "Routing flags updated"
        );
    }

    pub fn set_ignore_sync_check(&self, ignore_sync_check: bool) {
        self.flags.rcu(|current| RoutingFlags {
            ignore_sync_check,
            ..**current
        });
    }

    pub fn set_force_fallback(&self, force_fallback: bool) {
        self.flags.rcu(|current| RoutingFlags {
            force_fallback,
            ..**current
        });
    }

    // --- Status ---

    /// Probe both endpoints now and return the combined snapshot.
    ///
    /// Never fails and never waits longer than one probe timeout; the probes
    /// run concurrently.
    pub async fn check_status(&self) -> ManagerStatus {
        let (primary, fallback) = tokio::join!(
            self.checker.probe(ClientRole::Primary, self.primary.as_ref()),
            async {
                match &self.fallback {
                    Some(fallback) => Some(self.checker.probe(ClientRole::Fallback, fallback.as_ref()).await),
                    None => None,
                }
            }
        );

        metrics::record_endpoint_health(self.layer, ClientRole::Primary, &primary.health);
        if let Some(fallback) = &fallback {
            metrics::record_endpoint_health(self.layer, ClientRole::Fallback, &fallback.health);
        }

        let status = ManagerStatus::new(self.layer, primary, fallback, self.flags());
        if let Some(previous) = self.cache.load_full() {
            if previous.status.active != status.active {
                tracing::info!(
                    layer = %self.layer,
                    previous = ?previous.status.active,
                    active = ?status.active,
                    "Active client changed"
                );
            }
        }

        self.cache.store(Some(Arc::new(CachedStatus {
            status: status.clone(),
            probed_at: Instant::now(),
        })));
        status
    }

    /// Cached snapshot if still fresh, otherwise a new probe.
    pub async fn status(&self) -> ManagerStatus {
        if let Some(cached) = self.cache.load_full() {
            if cached.probed_at.elapsed() < self.status_cache_ttl {
                return cached.status.clone().with_flags(self.flags());
            }
        }
        self.check_status().await
    }

    /// Drop cached probe results so the next call re-probes.
    pub fn invalidate_status(&self) {
        self.cache.store(None);
    }

    // --- Routing ---

    /// Pick the endpoint for one call.
    pub async fn resolve(&self, options: CallOptions) -> ClientResult<ResolvedClient<C>> {
        let status = self.status().await;
        let flags = self.flags().merge(options);

        match status.decide(flags) {
            RoutingDecision::UsePrimary => Ok(ResolvedClient {
                role: ClientRole::Primary,
                client: self.primary.clone(),
            }),
            RoutingDecision::UseFallback => match &self.fallback {
                Some(fallback) => Ok(ResolvedClient {
                    role: ClientRole::Fallback,
                    client: fallback.clone(),
                }),
                None => Err(self.no_client_error(&status)),
            },
            RoutingDecision::NoneAvailable => Err(self.no_client_error(&status)),
        }
    }

    /// Physical client for a role, if configured.
    pub fn client(&self, role: ClientRole) -> Option<Arc<C>> {
        match role {
            ClientRole::Primary => Some(self.primary.clone()),
            ClientRole::Fallback => self.fallback.clone(),
        }
    }

    /// Run `op` on the resolved endpoint.
    ///
    /// A network-level failure is retried once on the alternate endpoint,
    /// provided a fresh probe finds it usable under the call's flags; a
    /// lagging alternate is never used to mask the failure. Node-level errors are returned as-is; the alternate would reject the
    /// same request. Both the resolution and each attempt honor `cancel`.
    pub async fn run<T, F, Fut>(
        &self,
        options: CallOptions,
        cancel: &CancelToken,
        op: F,
    ) -> ClientResult<T>
    where
        F: Fn(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let resolved = cancel
            .run_until_cancelled(self.resolve(options))
            .await
            .ok_or(ClientError::Cancelled)??;

        let first_error = match cancel.run_until_cancelled(op(resolved.client.clone())).await {
            None => return Err(ClientError::Cancelled),
            Some(Ok(value)) => return Ok(value),
            Some(Err(e)) if !e.is_transient() => {
                return Err(ClientError::Node {
                    layer: self.layer,
                    endpoint: resolved.name().to_string(),
                    source: e,
                })
            }
            Some(Err(e)) => e,
        };

        tracing::warn!(
            layer = %self.layer,
            role = %resolved.role,
            endpoint = %resolved.name(),
            error = %first_error,
            "Client call failed"
        );
        self.invalidate_status();

        let alternate_role = resolved.role.other();
        let Some(alternate) = self.client(alternate_role) else {
            return Err(ClientError::Unreachable {
                layer: self.layer,
                role: resolved.role,
                endpoint: resolved.name().to_string(),
                reason: first_error.to_string(),
            });
        };

        // The alternate must pass the same routing rules as a fresh resolve.
        let status = cancel
            .run_until_cancelled(self.status())
            .await
            .ok_or(ClientError::Cancelled)?;
        let flags = self.flags().merge(options);
        let alternate_cause = status
            .endpoint(alternate_role)
            .filter(|endpoint| !endpoint.health.is_usable(flags.ignore_sync_check))
            .and_then(|endpoint| self.endpoint_cause(endpoint));
        if let Some(cause) = alternate_cause {
            tracing::warn!(
                layer = %self.layer,
                role = %alternate_role,
                endpoint = %alternate.name(),
                cause = %cause,
                "Alternate client not usable, not retrying"
            );
            return Err(ClientError::NoAvailableClient {
                layer: self.layer,
                causes: vec![
                    ClientError::Unreachable {
                        layer: self.layer,
                        role: resolved.role,
                        endpoint: resolved.name().to_string(),
                        reason: first_error.to_string(),
                    },
                    cause,
                ],
            });
        }

        metrics::record_failover(self.layer);
        tracing::info!(
            layer = %self.layer,
            role = %alternate_role,
            endpoint = %alternate.name(),
            "Retrying on alternate client"
        );

        match cancel.run_until_cancelled(op(alternate.clone())).await {
            None => Err(ClientError::Cancelled),
            Some(Ok(value)) => Ok(value),
            Some(Err(e)) if !e.is_transient() => Err(ClientError::Node {
                layer: self.layer,
                endpoint: alternate.name().to_string(),
                source: e,
            }),
            Some(Err(e)) => Err(ClientError::AllEndpointsFailed {
                layer: self.layer,
                attempts: vec![
                    (resolved.name().to_string(), first_error),
                    (alternate.name().to_string(), e),
                ],
            }),
        }
    }

    fn no_client_error(&self, status: &ManagerStatus) -> ClientError {
        let causes = std::iter::once(&status.primary)
            .chain(status.fallback.iter())
            .filter_map(|endpoint| self.endpoint_cause(endpoint))
            .collect();

        ClientError::NoAvailableClient {
            layer: self.layer,
            causes,
        }
    }

    /// Why an endpoint cannot serve calls; `None` when it is synced.
    fn endpoint_cause(&self, endpoint: &EndpointStatus) -> Option<ClientError> {
        match &endpoint.health {
            EndpointHealth::Unreachable { reason } => Some(ClientError::Unreachable {
                layer: self.layer,
                role: endpoint.role,
                endpoint: endpoint.name.clone(),
                reason: reason.clone(),
            }),
            EndpointHealth::Syncing { lag, .. } => Some(ClientError::NotSynced {
                layer: self.layer,
                role: endpoint.role,
                endpoint: endpoint.name.clone(),
                lag: *lag,
            }),
            EndpointHealth::Synced { .. } => None,
        }
    }
}

impl<C: NodeClient + ?Sized> std::fmt::Debug for ClientManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientManager")
            .field("layer", &self.layer)
            .field("primary", &self.primary_name())
            .field("fallback", &self.fallback_name())
            .field("flags", &self.flags())
            .finish()
    }
}
