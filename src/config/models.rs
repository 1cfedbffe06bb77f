//! Configuration data structures for shadowline.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files.
//! Every section carries defaults so an empty file is a valid configuration.
use serde::{Deserialize, Serialize};

use crate::core::{
    marker::{DEFAULT_MARKER_KEY, DEFAULT_TEST_PREFIX, DEFAULT_TRACE_ID_KEY},
    scope::ScopePolicy,
};

/// Root configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct MediationConfig {
    /// Test-traffic marker detection and propagation
    pub marker: MarkerConfig,
    /// Routing switch and fallback behaviour
    pub routing: RoutingConfig,
    /// Scope guard defaults for adapters
    pub scope: ScopeConfig,
    /// Structured logging
    pub logging: LoggingConfig,
}

/// Marker detection rules
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MarkerConfig {
    /// Propagation key carrying the explicit test-traffic flag
    pub marker_key: String,
    /// Propagation key of the trace id stamped on root contexts; always carried
    pub trace_id_key: String,
    /// Values of `marker_key` meaning "marked" (case-insensitive)
    pub truthy_values: Vec<String>,
    /// Additional keys forwarded across call boundaries (tenant, region, ...)
    pub propagation_keys: Vec<String>,
    /// Reserved prefix of test resource names (e.g. `PT_orders`)
    pub test_prefix: Option<String>,
    /// Namespaces a test prefix may hide behind (e.g. `%RETRY%PT_group`)
    pub wrapper_prefixes: Vec<String>,
    /// Regular expressions matched against resource names
    pub patterns: Vec<String>,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            marker_key: DEFAULT_MARKER_KEY.to_string(),
            trace_id_key: DEFAULT_TRACE_ID_KEY.to_string(),
            truthy_values: vec!["true".to_string(), "1".to_string()],
            propagation_keys: Vec::new(),
            test_prefix: Some(DEFAULT_TEST_PREFIX.to_string()),
            wrapper_prefixes: vec!["%RETRY%".to_string(), "%DLQ%".to_string()],
            patterns: Vec::new(),
        }
    }
}

/// Routing configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RoutingConfig {
    /// Global switch; when off, marked traffic is rejected instead of routed
    pub enabled: bool,
    /// Log and count marked calls that fell back to the business handle
    pub flag_fallback: bool,
    /// Resource names marked traffic may reach on the business handle without
    /// substitution (e.g. a read-only third-party endpoint)
    pub whitelist: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            flag_fallback: true,
            whitelist: Vec::new(),
        }
    }
}

/// Scope guard defaults
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ScopeConfig {
    /// Policy used when an adapter does not pick one explicitly
    pub default_policy: ScopePolicy,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            default_policy: ScopePolicy::Boundary,
        }
    }
}

/// Logging configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `shadowline=debug`
    pub level: String,
    /// Emit JSON lines instead of pretty console output
    pub json: bool,
    /// Attach span context to JSON records
    pub include_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            include_spans: false,
        }
    }
}
