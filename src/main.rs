use std::path::Path;

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use http::HeaderMap;
use shadowline::{
    config::{ConfigValidator, MediationConfig, loader::load_config},
    core::{
        identity::{IdentityResolver, ResourceDescriptor},
        marker::MarkerPropagator,
    },
    ports::carrier::Carrier,
    tracing_setup,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Commands,

    /// Emit debug logs to the console
    #[clap(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "shadowline.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "shadowline.toml")]
        config: String,
    },
    /// Print the canonical identity of a resource description
    Resolve {
        #[clap(long)]
        endpoint: String,
        #[clap(long)]
        port: Option<String>,
        #[clap(long)]
        namespace: Option<String>,
        /// Credential token; never printed
        #[clap(long)]
        token: Option<String>,
        #[clap(long)]
        principal: Option<String>,
        /// Print JSON instead of text
        #[clap(long)]
        json: bool,
    },
    /// Show whether a call carrying the given headers would be treated as test traffic
    Inspect {
        /// Configuration file; built-in defaults when omitted
        #[clap(short, long)]
        config: Option<String>,
        /// Name of the touched resource (topic, table, key prefix)
        #[clap(short, long)]
        resource: Option<String>,
        /// Inbound propagation entry as `key=value`, repeatable
        #[clap(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },
}

fn parse_header(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    if args.verbose {
        tracing_setup::init_console_tracing()
            .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    }

    match args.command {
        Commands::Validate { config } => validate_config_command(&config).await,
        Commands::Init { config } => init_config_command(&config).await,
        Commands::Resolve {
            endpoint,
            port,
            namespace,
            token,
            principal,
            json,
        } => {
            let descriptor = ResourceDescriptor {
                endpoint: Some(endpoint),
                port,
                namespace,
                credential_token: token,
                principal,
            };
            resolve_command(&descriptor, json)
        }
        Commands::Inspect {
            config,
            resource,
            headers,
        } => inspect_command(config.as_deref(), resource.as_deref(), &headers).await,
    }
}

/// Validate a configuration file
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match ConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Marker Key: {}", config.marker.marker_key);
            println!(
                "   • Test Prefix: {}",
                config.marker.test_prefix.as_deref().unwrap_or("(none)")
            );
            println!("   • Name Patterns: {}", config.marker.patterns.len());
            println!("   • Shadow Routing Enabled: {}", config.routing.enabled);
            println!("   • Whitelisted Resources: {}", config.routing.whitelist.len());
            println!("   • Default Scope Policy: {:?}", config.scope.default_policy);
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Propagation keys must be valid header names (no spaces)");
            println!("   • Escape regex metacharacters in marker patterns");
            println!("   • Use RUST_LOG syntax for logging.level (e.g. 'shadowline=debug')");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Shadowline mediation configuration

[marker]
# Propagation key carrying the explicit test-traffic flag
marker_key = "x-shadow-test"
# Propagation key of the trace id stamped on root contexts
trace_id_key = "x-shadow-trace-id"
truthy_values = ["true", "1"]
# Extra keys forwarded across call boundaries; marker and trace id keys are always forwarded
propagation_keys = []
# Resources named with this prefix are test resources (also behind wrapper prefixes)
test_prefix = "PT_"
wrapper_prefixes = ["%RETRY%", "%DLQ%"]
# Regular expressions matched against resource names
patterns = []

[routing]
# When false, test traffic is rejected instead of touching any resource
enabled = true
flag_fallback = true
# Resources test traffic may reach on the business handle without substitution
whitelist = []

[scope]
# "boundary" fires mediation once per outer call, "internal" on every call
default_policy = "boundary"

[logging]
level = "info"
json = true
include_spans = false
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'shadowline validate --config {config_path}' to check it");
    Ok(())
}

/// Print the redacted identity of a resource
fn resolve_command(descriptor: &ResourceDescriptor, json: bool) -> Result<()> {
    let identity = IdentityResolver::resolve(descriptor).context("Failed to resolve identity")?;

    if json {
        let output = serde_json::json!({
            "identity": identity.redacted(),
            "endpoint": descriptor.endpoint,
            "port": descriptor.port,
            "namespace": descriptor.namespace,
            "has_credential_token": descriptor.credential_token.is_some(),
            "principal": descriptor.principal,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to encode identity")?
        );
    } else {
        println!("🔑 Resource identity: {identity}");
    }
    Ok(())
}

/// Evaluate the marker rules against an inbound carrier
async fn inspect_command(
    config_path: Option<&str>,
    resource: Option<&str>,
    headers: &[(String, String)],
) -> Result<()> {
    let config = match config_path {
        Some(path) => load_config(path)
            .await
            .with_context(|| format!("Failed to load config from {path}"))?,
        None => MediationConfig::default(),
    };
    let propagator =
        MarkerPropagator::from_config(&config.marker).context("Invalid marker configuration")?;

    let mut carrier = HeaderMap::new();
    for (key, value) in headers {
        carrier
            .set(key, value)
            .with_context(|| format!("Header '{key}' cannot be carried"))?;
    }

    let ctx = propagator.adopt(&carrier);
    let detection = propagator.detect(&ctx, resource);

    println!("📨 Adopted {} propagation entries", ctx.len());
    for (key, value) in ctx.entries() {
        println!("   • {key}: {value}");
    }
    match detection.decided_by {
        Some(kind) => println!("🧪 Test traffic: {} (decided by {kind:?})", detection.marked),
        None => println!("🧪 Test traffic: false (no detector matched)"),
    }
    if let Some(trace_id) = propagator.trace_id(&ctx) {
        println!("🔗 Trace id: {trace_id}");
    }
    if detection.marked && !config.routing.enabled {
        println!("⛔ Shadow routing is switched off; this call would be rejected");
    } else if detection.marked
        && resource.is_some_and(|name| config.routing.whitelist.iter().any(|w| w == name))
    {
        println!("✅ Resource is whitelisted; this call would run on the business resource");
    }
    Ok(())
}
