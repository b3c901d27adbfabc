//! # Meshwork
//!
//! Control-plane binary: runs the orchestrator (registry API, service mesh,
//! API gateway, event bus) and offers operator commands against the registry
//! database.
//!
//! ## Usage
//!
//! ```bash
//! # Registry API on 8000, gateway on 8080
//! meshwork serve --port 8000 --gateway-port 8080
//!
//! # Operator commands
//! meshwork -D meshwork.redb services
//! meshwork -D meshwork.redb export -o registry.json
//! meshwork --config meshwork.toml config
//! ```

mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // MESHWORK_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("MESHWORK_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "meshwork=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_banner() {
    println!(
        r#"
  ┌┬┐┌─┐┌─┐┬ ┬┬ ┬┌─┐┬─┐┬┌─
  │││├┤ └─┐├─┤││││ │├┬┘├┴┐
  ┴ ┴└─┘└─┘┴ ┴└┴┘└─┘┴└─┴ ┴

  Service mesh control plane v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
