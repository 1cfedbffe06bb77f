use std::collections::HashSet;

use http::HeaderName;
use regex::Regex;
use tracing_subscriber::EnvFilter;

use crate::config::models::{LoggingConfig, MarkerConfig, MediationConfig, RoutingConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Mediation configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire configuration, reporting every problem at once
    pub fn validate(config: &MediationConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(mut marker_errors) = Self::validate_marker_config(&config.marker) {
            errors.append(&mut marker_errors);
        }

        if let Err(mut routing_errors) = Self::validate_routing_config(&config.routing) {
            errors.append(&mut routing_errors);
        }

        if let Err(e) = Self::validate_logging_config(&config.logging) {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate marker detection and propagation rules
    fn validate_marker_config(config: &MarkerConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if config.marker_key.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "marker.marker_key".to_string(),
            });
        } else if let Err(e) = Self::validate_key(&config.marker_key, "marker.marker_key") {
            errors.push(e);
        }

        if let Err(e) = Self::validate_key(&config.trace_id_key, "marker.trace_id_key") {
            errors.push(e);
        } else if config.trace_id_key.eq_ignore_ascii_case(&config.marker_key) {
            errors.push(ValidationError::InvalidField {
                field: "marker.trace_id_key".to_string(),
                message: "Trace id key must differ from the marker key".to_string(),
            });
        }

        if config.truthy_values.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "marker.truthy_values".to_string(),
            });
        }
        for (i, value) in config.truthy_values.iter().enumerate() {
            if value.trim().is_empty() {
                errors.push(ValidationError::InvalidField {
                    field: format!("marker.truthy_values[{i}]"),
                    message: "Truthy values must not be blank".to_string(),
                });
            }
        }

        let mut seen = HashSet::new();
        for (i, key) in config.propagation_keys.iter().enumerate() {
            let field = format!("marker.propagation_keys[{i}]");
            if let Err(e) = Self::validate_key(key, &field) {
                errors.push(e);
            }
            if !seen.insert(key.to_ascii_lowercase()) {
                errors.push(ValidationError::InvalidField {
                    field,
                    message: format!("Duplicate propagation key '{key}'"),
                });
            }
        }

        if let Some(prefix) = &config.test_prefix {
            if prefix.is_empty() {
                errors.push(ValidationError::InvalidField {
                    field: "marker.test_prefix".to_string(),
                    message: "Use no prefix instead of an empty one; an empty prefix marks every resource"
                        .to_string(),
                });
            }
        }

        for (i, wrapper) in config.wrapper_prefixes.iter().enumerate() {
            if wrapper.is_empty() {
                errors.push(ValidationError::InvalidField {
                    field: format!("marker.wrapper_prefixes[{i}]"),
                    message: "Wrapper prefixes must not be empty".to_string(),
                });
            }
        }

        for (i, pattern) in config.patterns.iter().enumerate() {
            if let Err(e) = Regex::new(pattern) {
                errors.push(ValidationError::InvalidField {
                    field: format!("marker.patterns[{i}]"),
                    message: format!("Invalid regular expression '{pattern}': {e}"),
                });
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Validate the routing whitelist
    fn validate_routing_config(config: &RoutingConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        for (i, resource) in config.whitelist.iter().enumerate() {
            let field = format!("routing.whitelist[{i}]");
            if resource.trim().is_empty() {
                errors.push(ValidationError::InvalidField {
                    field,
                    message: "Whitelisted resource names must not be blank".to_string(),
                });
            } else if !seen.insert(resource.as_str()) {
                errors.push(ValidationError::InvalidField {
                    field,
                    message: format!("Duplicate whitelisted resource '{resource}'"),
                });
            }
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Propagation keys travel as header / property names, so they must be valid header names
    fn validate_key(key: &str, field: &str) -> ValidationResult<()> {
        HeaderName::from_bytes(key.as_bytes())
            .map(|_| ())
            .map_err(|_| ValidationError::InvalidField {
                field: field.to_string(),
                message: format!("'{key}' is not a valid header name"),
            })
    }

    /// Validate logging configuration
    fn validate_logging_config(config: &LoggingConfig) -> ValidationResult<()> {
        EnvFilter::try_new(&config.level)
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidField {
                field: "logging.level".to_string(),
                message: format!("Invalid filter directive '{}': {e}", config.level),
            })
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
