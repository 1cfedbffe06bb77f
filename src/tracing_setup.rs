use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::models::LoggingConfig;

/// Initialize structured logging with JSON output
pub fn init_tracing() -> Result<()> {
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(true)
                .with_target(true)
                .with_thread_ids(true),
        )
        .try_init()
        .wrap_err("Failed to install JSON tracing subscriber")?;

    tracing::info!("Shadowline structured logging initialized");
    Ok(())
}

/// Initialize console-friendly logging for development
pub fn init_console_tracing() -> Result<()> {
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_ids(true),
        )
        .try_init()
        .wrap_err("Failed to install console tracing subscriber")?;

    tracing::info!("Shadowline console logging initialized");
    Ok(())
}

/// Initialize tracing from the `logging` configuration section.
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
pub fn init_tracing_with_config(config: &LoggingConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .wrap_err_with(|| format!("Invalid log level: {}", config.level))?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    if config.json {
        Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(config.include_spans)
                    .with_span_list(config.include_spans),
            )
            .try_init()
            .wrap_err("Failed to install JSON tracing subscriber")?;
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init()
            .wrap_err("Failed to install console tracing subscriber")?;
    }

    tracing::info!(
        level = %config.level,
        json = config.json,
        spans = config.include_spans,
        "Shadowline logging initialized"
    );
    Ok(())
}

/// Configure tracing for specific components
pub fn configure_component_tracing(component: &str) -> tracing::Span {
    tracing::info_span!("component", name = component)
}

/// Span around one routed call
pub fn create_dispatch_span(boundary: &str, resource: Option<&str>) -> tracing::Span {
    tracing::info_span!(
        "dispatch",
        boundary = boundary,
        resource = resource,
        route = tracing::field::Empty,
    )
}

/// Span around shadow provisioning for one identity; the identity must be redacted
pub fn create_provision_span(identity: &str) -> tracing::Span {
    tracing::info_span!(
        "provision_shadow",
        identity = identity,
        duration_ms = tracing::field::Empty,
    )
}
