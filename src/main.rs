//! Integration Relay - resilient access to external media-stack services

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use integration_relay::{
    cli::{Cli, Command},
    client::IntegrationRegistry,
    config::Config,
    ingress::{EventBus, IngressServer},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Check) => run_check(&cli),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Validate configuration and print the resolved service table
fn run_check(cli: &Cli) -> ExitCode {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Configuration invalid: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("Configuration valid. {} service(s):\n", config.services.len());

    let mut names: Vec<_> = config.services.keys().collect();
    names.sort();
    for name in names {
        let service = &config.services[name];
        let status = if service.enabled { "enabled" } else { "disabled" };
        println!("  {name} ({status})");
        if !service.description.is_empty() {
            println!("    {}", service.description);
        }
        println!(
            "    rate limit: {}/{}s, breaker: {} failures / {}s reset, retries: {}",
            service.rate_limit.limit,
            service.rate_limit.window.as_secs(),
            service.circuit_breaker.failure_threshold,
            service.circuit_breaker.reset_timeout.as_secs(),
            service.retry.max_attempts,
        );
    }

    println!("\nWebhook sources:");
    let mut sources: Vec<_> = config.webhooks.sources.keys().collect();
    sources.sort();
    for source in sources {
        let has_secret = config.webhooks.sources[source].resolve_secret().is_some();
        let secret_info = if has_secret { "secret set" } else { "no secret" };
        println!("  {}/{source} ({secret_info})", config.webhooks.base_path);
    }

    ExitCode::SUCCESS
}

/// Run the ingress server
async fn run_server(cli: Cli) -> ExitCode {
    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        services = config.services.len(),
        "Starting integration relay"
    );

    let registry = Arc::new(IntegrationRegistry::from_config(&config));
    let bus = Arc::new(EventBus::default());

    let server = IngressServer::new(config, registry, bus);
    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
