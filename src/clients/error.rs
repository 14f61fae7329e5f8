//! Error taxonomy for client access.

use std::time::Duration;
use thiserror::Error;

use crate::clients::types::{ClientLayer, ClientRole};

/// Failure reported by one physical client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// Connection refused, reset, DNS failure and similar.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request exceeded its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The node answered with an error payload.
    #[error("node error {code}: {message}")]
    Node { code: i64, message: String },

    /// The node answered with something we could not interpret.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    /// Network-level failures are worth retrying on another endpoint.
    /// Node answers are not: the other endpoint would say the same.
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Transport(_) | RpcError::Timeout(_))
    }

    /// Message carried by a node error payload, if any.
    pub fn node_message(&self) -> Option<&str> {
        match self {
            RpcError::Node { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Errors surfaced by a [`ClientManager`](crate::clients::ClientManager).
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Endpoint failed at the network level and no alternate was available.
    #[error("{layer} {role} client {endpoint} is unreachable: {reason}")]
    Unreachable {
        layer: ClientLayer,
        role: ClientRole,
        endpoint: String,
        reason: String,
    },

    /// Endpoint is reachable but lagging behind the chain head.
    #[error("{layer} {role} client {endpoint} is not synced ({lag} behind)")]
    NotSynced {
        layer: ClientLayer,
        role: ClientRole,
        endpoint: String,
        lag: u64,
    },

    /// Routing exhausted: no endpoint is usable under the current flags.
    #[error("no {layer} client available: {}", join_causes(.causes))]
    NoAvailableClient {
        layer: ClientLayer,
        causes: Vec<ClientError>,
    },

    /// Both endpoints failed, first the resolved one and then its alternate.
    #[error("all {layer} clients failed: {}", join_attempts(.attempts))]
    AllEndpointsFailed {
        layer: ClientLayer,
        attempts: Vec<(String, RpcError)>,
    },

    /// The node rejected the request itself.
    #[error("{layer} client {endpoint} rejected the request: {source}")]
    Node {
        layer: ClientLayer,
        endpoint: String,
        #[source]
        source: RpcError,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl ClientError {
    /// The node error payload, when the request reached a node and was refused.
    pub fn node_error(&self) -> Option<&RpcError> {
        match self {
            ClientError::Node { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn join_causes(causes: &[ClientError]) -> String {
    if causes.is_empty() {
        return "no endpoints configured".to_string();
    }
    causes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_attempts(attempts: &[(String, RpcError)]) -> String {
    attempts
        .iter()
        .map(|(endpoint, err)| format!("{} ({})", endpoint, err))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for client-manager operations.
pub type ClientResult<T> = Result<T, ClientError>;
