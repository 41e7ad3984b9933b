//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (worker count, retry budget, sniff limit)
//! - Check that the sticky header is a legal HTTP header name
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DispatcherConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{DispatcherConfig, StickySource};

/// Smallest accepted sniff buffer.
pub const MIN_SNIFF_BYTES: usize = 1024;
/// Largest accepted sniff buffer; keeps CONNECTION frames well under the control frame cap.
pub const MAX_SNIFF_BYTES: usize = 128 * 1024;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("cluster.workers must be at least 1")]
    NoWorkers,

    #[error("startup.wait_attempts must be at least 1")]
    NoWaitAttempts,

    #[error("startup.wait_interval_ms must be greater than 0")]
    ZeroWaitInterval,

    #[error("routing.sticky header {0:?} is not a valid header name")]
    InvalidStickyHeader(String),

    #[error(
        "routing.max_sniff_bytes must be between {min} and {max}, got {0}",
        min = MIN_SNIFF_BYTES,
        max = MAX_SNIFF_BYTES
    )]
    SniffLimitOutOfRange(usize),

    #[error("observability.metrics_address {0:?} is not a socket address")]
    InvalidMetricsAddress(String),

    #[error("process.program must not be empty")]
    EmptyProgram,
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &DispatcherConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.cluster.workers == 0 {
        errors.push(ValidationError::NoWorkers);
    }
    if config.startup.wait_attempts == 0 {
        errors.push(ValidationError::NoWaitAttempts);
    }
    if config.startup.wait_interval_ms == 0 {
        errors.push(ValidationError::ZeroWaitInterval);
    }

    if let StickySource::Header(name) = &config.routing.sticky {
        if !is_token(name) {
            errors.push(ValidationError::InvalidStickyHeader(name.clone()));
        }
    }

    let sniff = config.routing.max_sniff_bytes;
    if !(MIN_SNIFF_BYTES..=MAX_SNIFF_BYTES).contains(&sniff) {
        errors.push(ValidationError::SniffLimitOutOfRange(sniff));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if let Some(program) = &config.process.program {
        if program.as_os_str().is_empty() {
            errors.push(ValidationError::EmptyProgram);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// RFC 9110 token characters.
fn is_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^'
                        | b'_' | b'`' | b'|' | b'~'
                )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&DispatcherConfig::default()), Ok(()));
    }

    #[test]
    fn reports_every_error() {
        let mut config = DispatcherConfig::default();
        config.cluster.workers = 0;
        config.startup.wait_interval_ms = 0;
        config.routing.sticky = StickySource::Header("x forwarded".into());
        config.routing.max_sniff_bytes = 10;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::NoWorkers));
        assert!(errors.contains(&ValidationError::ZeroWaitInterval));
        assert!(errors.contains(&ValidationError::SniffLimitOutOfRange(10)));
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = DispatcherConfig::default();
        config.observability.metrics_address = "nonsense".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::InvalidMetricsAddress("nonsense".into())])
        );
    }
}
