//! Session Gateway - OAuth2/OIDC session authentication in front of a simulation backend

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use session_gateway::{
    cli::{Cli, Command},
    config::Config,
    gateway::{Gateway, server::http_client},
    setup_tracing,
    token::KeySet,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // Handle subcommands
    match cli.command {
        Some(Command::Keys) => run_keys(&cli).await,
        Some(Command::CheckConfig) => run_check_config(&cli),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> Option<Config> {
    match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            Some(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// Validate configuration and print the resolved endpoints
fn run_check_config(cli: &Cli) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    if let Err(e) = config.validate() {
        eprintln!("❌ {e}");
        return ExitCode::FAILURE;
    }

    println!("✅ Configuration is valid");
    println!("   Issuer:    {}", config.provider.issuer());
    println!("   JWKS:      {}", config.provider.jwks_uri());
    println!("   Audience:  {}", config.provider.audience);
    println!("   Backend:   {}", config.backend.base_url());
    println!("   Listen:    {}:{}", config.server.host, config.server.port);
    ExitCode::SUCCESS
}

/// Fetch the provider's key set and list key ids
async fn run_keys(cli: &Cli) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    let http = match http_client(config.provider.timeout) {
        Ok(http) => http,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    match KeySet::fetch(&http, &config.provider.issuer(), &config.provider.jwks_uri()).await {
        Ok(keys) => {
            println!("Issuer: {}", keys.issuer());
            for kid in keys.key_ids() {
                let alg = keys
                    .get_key(kid)
                    .and_then(|k| k.algorithm)
                    .map_or_else(|| "-".to_string(), |a| format!("{a:?}"));
                println!("  {kid}  {alg}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(cli: Cli) -> ExitCode {
    let Some(config) = load_config(&cli) else {
        return ExitCode::FAILURE;
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        environment = ?config.server.environment,
        "Starting Session Gateway"
    );

    // Create and run gateway
    let gateway = match Gateway::new(config).await {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
