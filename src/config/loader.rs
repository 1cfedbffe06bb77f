use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::MediationConfig;

/// Prefix of environment overrides, e.g. `SHADOWLINE__ROUTING__ENABLED=false`
pub const ENV_PREFIX: &str = "SHADOWLINE";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from a file using the config crate
/// Supports multiple formats: YAML, JSON, TOML, INI
pub async fn load_config(config_path: &str) -> Result<MediationConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously, overlaying `SHADOWLINE__SECTION__FIELD` variables
pub fn load_config_sync(config_path: &str) -> Result<MediationConfig> {
    load_with_environment(config_path, environment())
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}

fn load_with_environment(config_path: &str, env: Environment) -> Result<MediationConfig> {
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Yaml, // Default to YAML
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .add_source(env)
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let mediation_config: MediationConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(mediation_config)
}
