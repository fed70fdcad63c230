//! Settings validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacity and timeouts > 0, retry limits consistent)
//! - Check addresses parse (management URL, metrics bind address)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SyncSettings → Result<(), Vec<ValidationError>>

use std::fmt;
use std::net::SocketAddr;

use url::Url;

use crate::config::schema::SyncSettings;

/// One rejected setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(settings: &SyncSettings) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match Url::parse(&settings.management.url) {
        Ok(url) if url.host_str().is_none() => {
            errors.push(ValidationError::new("management.url", "missing host"));
        }
        Ok(_) => {}
        Err(e) => errors.push(ValidationError::new("management.url", e.to_string())),
    }
    if settings.management.pool_capacity == 0 {
        errors.push(ValidationError::new("management.pool_capacity", "must be greater than 0"));
    }
    if settings.management.request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "management.request_timeout_secs",
            "must be greater than 0",
        ));
    }

    if settings.source.path.is_empty() {
        errors.push(ValidationError::new("source.path", "must not be empty"));
    }
    if settings.source.config_key.is_empty() {
        errors.push(ValidationError::new("source.config_key", "must not be empty"));
    }
    if settings.source.max_update_retries == 0 {
        errors.push(ValidationError::new("source.max_update_retries", "must be greater than 0"));
    }

    if settings.credentials.output_path.is_empty() {
        errors.push(ValidationError::new("credentials.output_path", "must not be empty"));
    }

    let reconcile = &settings.reconcile;
    if reconcile.fast_retries == 0 {
        errors.push(ValidationError::new("reconcile.fast_retries", "must be greater than 0"));
    }
    if reconcile.backoff_base_ms == 0 {
        errors.push(ValidationError::new("reconcile.backoff_base_ms", "must be greater than 0"));
    }
    if reconcile.backoff_max_ms < reconcile.backoff_base_ms {
        errors.push(ValidationError::new(
            "reconcile.backoff_max_ms",
            format!("must be at least backoff_base_ms ({})", reconcile.backoff_base_ms),
        ));
    }

    if settings.observability.metrics_enabled
        && settings.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address '{}'", settings.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
