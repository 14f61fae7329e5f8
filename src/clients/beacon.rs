//! Consensus-layer adapter over the standard beacon node REST API.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::clients::error::RpcError;
use crate::clients::traits::{BeaconClient, NodeClient};
use crate::clients::types::SyncProgress;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Body of `/eth/v1/node/syncing`. Numbers are quoted decimal strings.
#[derive(Debug, Deserialize)]
struct SyncingData {
    head_slot: String,
    sync_distance: String,
    is_syncing: bool,
}

#[derive(Debug, Deserialize)]
struct VersionData {
    version: String,
}

/// One physical beacon node reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBeaconClient {
    name: String,
    base_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpBeaconClient {
    pub fn new(url: url::Url, request_timeout: Duration) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RpcError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name: url.to_string(),
            base_url: url.as_str().trim_end_matches('/').to_string(),
            client,
            request_timeout,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RpcError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;
        Ok(envelope.data)
    }

    fn map_request_error(&self, e: reqwest::Error) -> RpcError {
        if e.is_timeout() {
            RpcError::Timeout(self.request_timeout)
        } else {
            RpcError::Transport(e.to_string())
        }
    }
}

/// Gateway failures mean the node behind a proxy is unavailable, so they
/// count as transport errors and trigger failover. Other statuses are the
/// node's own answer.
fn status_error(status: reqwest::StatusCode, body: String) -> RpcError {
    let message = if body.is_empty() { status.to_string() } else { body };
    match status {
        reqwest::StatusCode::BAD_GATEWAY
        | reqwest::StatusCode::SERVICE_UNAVAILABLE
        | reqwest::StatusCode::GATEWAY_TIMEOUT => RpcError::Transport(format!("HTTP {}: {}", status.as_u16(), message)),
        _ => RpcError::Node {
            code: i64::from(status.as_u16()),
            message,
        },
    }
}

fn parse_quoted(field: &str, value: &str) -> Result<u64, RpcError> {
    value
        .parse()
        .map_err(|_| RpcError::InvalidResponse(format!("{} is not a number: {:?}", field, value)))
}

impl TryFrom<SyncingData> for SyncProgress {
    type Error = RpcError;

    fn try_from(data: SyncingData) -> Result<Self, Self::Error> {
        let head = parse_quoted("head_slot", &data.head_slot)?;
        let lag = parse_quoted("sync_distance", &data.sync_distance)?;
        Ok(if data.is_syncing {
            SyncProgress::syncing(head, lag)
        } else {
            SyncProgress::synced(head)
        })
    }
}

#[async_trait]
impl NodeClient for HttpBeaconClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn sync_status(&self) -> Result<SyncProgress, RpcError> {
        let data: SyncingData = self.get("/eth/v1/node/syncing").await?;
        data.try_into()
    }
}

#[async_trait]
impl BeaconClient for HttpBeaconClient {
    async fn node_version(&self) -> Result<String, RpcError> {
        let data: VersionData = self.get("/eth/v1/node/version").await?;
        Ok(data.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_syncing_body() {
        let body = r#"{"data":{"head_slot":"8123","sync_distance":"64","is_syncing":true,"is_optimistic":false,"el_offline":false}}"#;
        let envelope: Envelope<SyncingData> = serde_json::from_str(body).unwrap();
        let progress = SyncProgress::try_from(envelope.data).unwrap();
        assert_eq!(progress, SyncProgress::syncing(8123, 64));
    }

    #[test]
    fn test_parse_synced_body() {
        let body = r#"{"data":{"head_slot":"100","sync_distance":"0","is_syncing":false}}"#;
        let envelope: Envelope<SyncingData> = serde_json::from_str(body).unwrap();
        let progress = SyncProgress::try_from(envelope.data).unwrap();
        assert_eq!(progress, SyncProgress::synced(100));
    }

    #[test]
    fn test_garbage_number_is_invalid_response() {
        let data = SyncingData {
            head_slot: "abc".into(),
            sync_distance: "0".into(),
            is_syncing: false,
        };
        assert!(matches!(
            SyncProgress::try_from(data),
            Err(RpcError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_gateway_errors_are_transient() {
        for status in [
            reqwest::StatusCode::BAD_GATEWAY,
            reqwest::StatusCode::SERVICE_UNAVAILABLE,
            reqwest::StatusCode::GATEWAY_TIMEOUT,
        ] {
            let err = status_error(status, String::new());
            assert!(err.is_transient(), "{status} should fail over");
        }

        let err = status_error(reqwest::StatusCode::NOT_FOUND, "unknown route".into());
        assert_eq!(
            err,
            RpcError::Node {
                code: 404,
                message: "unknown route".into()
            }
        );
        assert!(!status_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR, String::new()).is_transient());
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = HttpBeaconClient::new(
            "http://localhost:5052/".parse().unwrap(),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(client.base_url, "http://localhost:5052");
    }
}
