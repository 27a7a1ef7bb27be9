//! Federated SSO agent
//!
//! Command-line front end for the federation service: inspect and update
//! federation preferences, build login requests, process IdP callbacks and
//! print the SP metadata document.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{error, info};

use federated_sso::preferences::PreferencesPatch;
use federated_sso::{AgentConfig, Binding, BootOutcome, CallbackRequest, FederationService, SsoError};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "federated-sso-agent")]
#[command(about = "Federated SAML single sign-on agent")]
struct Args {
    /// Public base address of this instance
    #[arg(long, default_value = "http://localhost:8080", env = "SSO_BASE_URL")]
    base_url: String,

    /// Assertion Consumer Service path
    #[arg(long, default_value = "/saml/acs", env = "SSO_ACS_PATH")]
    acs_path: String,

    /// SP metadata path (also the SP entity ID)
    #[arg(long, default_value = "/saml/metadata", env = "SSO_METADATA_PATH")]
    metadata_path: String,

    /// Deployment is licensed for federated login
    #[arg(long, env = "SSO_LICENSED")]
    licensed: bool,

    /// Create local users on first federated login
    #[arg(long, env = "SSO_JIT_PROVISIONING")]
    jit_provisioning: bool,

    /// Metadata fetch timeout in seconds
    #[arg(long, default_value = "10", env = "SSO_METADATA_FETCH_TIMEOUT")]
    metadata_fetch_timeout: u64,

    /// Clock skew tolerance in seconds for assertion conditions
    #[arg(long, default_value = "300", env = "SSO_CLOCK_SKEW")]
    clock_skew: i64,

    /// Settings database path
    #[arg(long, default_value = "/var/lib/federated-sso/settings.redb", env = "SSO_SETTINGS_PATH")]
    settings_path: PathBuf,

    /// User directory database path
    #[arg(long, default_value = "/var/lib/federated-sso/users.redb", env = "SSO_USERS_PATH")]
    users_path: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, env = "VERBOSE")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the boot outcome and current preferences
    Status,
    /// Apply a JSON preferences patch from a file
    Configure {
        #[arg(long)]
        patch: PathBuf,
    },
    /// Build a login request
    LoginUrl {
        #[arg(long)]
        relay_state: Option<String>,
        /// redirect or post
        #[arg(long)]
        binding: Option<Binding>,
    },
    /// Process an IdP callback
    Callback {
        /// redirect or post
        #[arg(long)]
        binding: Binding,
        /// Encoded SAMLResponse as received
        #[arg(long)]
        saml_response: String,
        #[arg(long)]
        relay_state: Option<String>,
    },
    /// Print the SP metadata document
    SpMetadata,
}

fn config_from_args(args: &Args) -> Result<AgentConfig> {
    let config = AgentConfig {
        base_url: args.base_url.clone(),
        acs_path: args.acs_path.clone(),
        metadata_path: args.metadata_path.clone(),
        licensed: args.licensed,
        jit_provisioning: args.jit_provisioning,
        metadata_fetch_timeout_secs: args.metadata_fetch_timeout,
        clock_skew_secs: args.clock_skew,
        settings_path: args.settings_path.clone(),
        users_path: args.users_path.clone(),
    };
    config.validate().map_err(|e| anyhow!(e))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Logs go to stderr; stdout carries command output
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("{}={},federated_sso={}", env!("CARGO_CRATE_NAME"), log_level, log_level))
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = config_from_args(&args)?;

    info!(
        base_url = %config.base_url,
        licensed = config.licensed,
        jit_provisioning = config.jit_provisioning,
        "Configuration loaded"
    );

    let service = FederationService::open(config)?;
    let boot = service.boot()?;

    match run(&service, &boot, args.command).await {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            error!(code = e.code(), error = %e, "Command failed");
            let body = serde_json::json!({
                "error": e.code(),
                "status": e.status_code(),
                "message": e.to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
            std::process::exit(1);
        }
    }
}

async fn run(service: &FederationService, boot: &BootOutcome, command: Command) -> Result<String, SsoError> {
    match command {
        Command::Status => {
            let body = serde_json::json!({
                "boot": boot,
                "preferences": service.get_preferences()?,
            });
            to_json(&body)
        }
        Command::Configure { patch } => {
            let raw = std::fs::read_to_string(&patch).map_err(|e| {
                SsoError::BadRequest(format!("Failed to read patch file {:?}: {}", patch, e))
            })?;
            let patch: PreferencesPatch = serde_json::from_str(&raw)
                .map_err(|e| SsoError::BadRequest(format!("Invalid patch: {}", e)))?;
            to_json(&service.set_preferences(patch).await?)
        }
        Command::LoginUrl {
            relay_state,
            binding,
        } => to_json(&service.get_login_request_url(relay_state.as_deref(), binding)?),
        Command::Callback {
            binding,
            saml_response,
            relay_state,
        } => {
            let mut fields = HashMap::from([("SAMLResponse".to_string(), saml_response)]);
            if let Some(relay_state) = relay_state {
                fields.insert("RelayState".to_string(), relay_state);
            }
            let request = match binding {
                Binding::Post => CallbackRequest {
                    form: fields,
                    ..Default::default()
                },
                Binding::Redirect => CallbackRequest {
                    query: fields,
                    ..Default::default()
                },
            };
            to_json(&service.handle_login(&request, binding)?)
        }
        Command::SpMetadata => service.sp_metadata(),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, SsoError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| SsoError::Internal(format!("Failed to serialize output: {}", e)))
}
