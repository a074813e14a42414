//! traefik-tower - forward-auth adapter for Traefik
//!
//! Main entry point: load configuration, set up logging and tracing, build
//! the verification engine and serve until SIGINT or SIGTERM.

use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;

use traefik_tower::cli::{Cli, Commands};
use traefik_tower::config::Config;
use traefik_tower::server::{self, AppState};
use traefik_tower::services::AuthService;
use traefik_tower::tracer::TracerHandle;
use traefik_tower::{metrics, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let mut config = Config::load(cli.config_path(), &cli)?;

    // Initialize logging
    telemetry::init_logging(&config)?;
    for warning in config.take_load_warnings() {
        tracing::warn!("{}", warning);
    }

    // Validate configuration
    config.validate()?;

    match cli.command.clone().unwrap_or(Commands::Serve {
        host: None,
        port: None,
    }) {
        Commands::Serve { .. } => run_server(config).await,
        Commands::CheckConfig => {
            println!(
                "Configuration OK: strategy {}, listening on {}:{}",
                config.effective_mode(),
                config.server.host,
                config.server.port
            );
            Ok(())
        }
    }
}

async fn run_server(config: Config) -> Result<()> {
    let provider = telemetry::init_tracer_provider(&config.tracing)?;
    let tracer = TracerHandle::from_provider(&provider).with_debug(config.tracing.debug);

    let auth = AuthService::from_config(&config, tracer).await?;
    let state = AppState::new(auth)
        .with_metrics(metrics::init_metrics_exporter())
        .with_debug(config.debug);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(
        strategy = state.auth.strategy_name(),
        "traefik-tower listening on {}",
        listener.local_addr()?
    );

    let result = server::serve(
        listener,
        server::build_router(state),
        server::shutdown_signal(),
        Duration::from_secs(config.server.shutdown_timeout_secs),
    )
    .await;

    telemetry::shutdown_tracer_provider(&provider);
    tracing::info!("traefik-tower stopped");
    result
}
