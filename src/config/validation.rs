//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate endpoint URLs and value ranges
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DaemonConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{ClientPairConfig, DaemonConfig};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// One semantic problem, tied to the field it concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &DaemonConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.chain_id == 0 {
        errors.push(ValidationError::new("chain_id", "must be greater than 0"));
    }

    validate_client_pair("execution", &config.execution, &mut errors);
    validate_client_pair("beacon", &config.beacon, &mut errors);

    if config.query.batch_size == 0 {
        errors.push(ValidationError::new("query.batch_size", "must be greater than 0"));
    }

    let tx = &config.transactions;
    if !tx.safe_gas_multiplier.is_finite() || tx.safe_gas_multiplier < 1.0 {
        errors.push(ValidationError::new(
            "transactions.safe_gas_multiplier",
            format!("must be a finite number >= 1.0, got {}", tx.safe_gas_multiplier),
        ));
    }
    if tx.poll_interval_ms == 0 {
        errors.push(ValidationError::new("transactions.poll_interval_ms", "must be greater than 0"));
    }
    if tx.wait_timeout_secs == 0 {
        errors.push(ValidationError::new("transactions.wait_timeout_secs", "must be greater than 0"));
    } else if tx.poll_interval_ms >= tx.wait_timeout_secs.saturating_mul(1_000) {
        errors.push(ValidationError::new(
            "transactions.poll_interval_ms",
            "must be shorter than wait_timeout_secs",
        ));
    }

    if tx.intent_retention_secs == 0 {
        errors.push(ValidationError::new(
            "transactions.intent_retention_secs",
            "must be greater than 0",
        ));
    }

    if config.monitor.status_interval_secs == 0 {
        errors.push(ValidationError::new("monitor.status_interval_secs", "must be greater than 0"));
    }

    let obs = &config.observability;
    if !LOG_LEVELS.contains(&obs.log_level.to_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}', expected one of {}", obs.log_level, LOG_LEVELS.join(", ")),
        ));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_client_pair(section: &str, pair: &ClientPairConfig, errors: &mut Vec<ValidationError>) {
    validate_url(&format!("{section}.primary_url"), &pair.primary_url, errors);

    if let Some(fallback) = &pair.fallback_url {
        validate_url(&format!("{section}.fallback_url"), fallback, errors);
        if fallback.trim_end_matches('/') == pair.primary_url.trim_end_matches('/') {
            errors.push(ValidationError::new(
                format!("{section}.fallback_url"),
                "must differ from primary_url",
            ));
        }
    }

    if pair.request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            format!("{section}.request_timeout_secs"),
            "must be greater than 0",
        ));
    }
    if pair.probe_timeout_ms == 0 {
        errors.push(ValidationError::new(
            format!("{section}.probe_timeout_ms"),
            "must be greater than 0",
        ));
    }
}

fn validate_url(field: &str, value: &str, errors: &mut Vec<ValidationError>) {
    match value.parse::<url::Url>() {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(ValidationError::new(
            field,
            format!("unsupported scheme '{}', expected http or https", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid URL '{}': {}", value, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&DaemonConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = DaemonConfig::default();
        config.chain_id = 0;
        config.execution.primary_url = "not a url".into();
        config.beacon.fallback_url = Some(config.beacon.primary_url.clone());
        config.query.batch_size = 0;
        config.transactions.safe_gas_multiplier = 0.5;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "chain_id",
                "execution.primary_url",
                "beacon.fallback_url",
                "query.batch_size",
                "transactions.safe_gas_multiplier",
            ]
        );
    }

    #[test]
    fn test_rejects_non_http_scheme() {
        let mut config = DaemonConfig::default();
        config.execution.fallback_url = Some("ws://localhost:8546".into());
        let errors = validate_config(&config).unwrap_err();
        assert!(errors[0].message.contains("unsupported scheme"));
    }

    #[test]
    fn test_zero_intent_retention_rejected() {
        let mut config = DaemonConfig::default();
        assert_eq!(config.transactions.intent_retention_secs, 3_600);
        config.transactions.intent_retention_secs = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "transactions.intent_retention_secs");
    }

    #[test]
    fn test_metrics_address_checked_only_when_enabled() {
        let mut config = DaemonConfig::default();
        config.observability.metrics_address = "nowhere".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
