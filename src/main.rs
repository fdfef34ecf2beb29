use anyhow::Context;
use clap::Parser;
use rig_telemetry::cli::{Cli, Commands};
use rig_telemetry::config::ServerConfig;
use rig_telemetry::hub::TelemetryHub;
use rig_telemetry::sample::{PhysicsConfig, PhysicsSampleSource};
use rig_telemetry::server::{cors_layer, router, spawn_background_tasks};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rig_telemetry=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = ServerConfig::from_env().context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::PrintConfig => {
            println!("{:#?}", config);
            Ok(())
        }
        Commands::Serve => serve(config, cli.seed).await,
    }
}

async fn serve(config: ServerConfig, seed: Option<u64>) -> anyhow::Result<()> {
    info!("🚀 Starting rig telemetry server");

    let hub = TelemetryHub::shared(config.hub_config());

    let start_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let source = match seed {
        Some(seed) => {
            info!("   Mock rig seed: {}", seed);
            PhysicsSampleSource::seeded(PhysicsConfig::default(), seed, start_ms, config.tick_interval_ms)
        }
        None => PhysicsSampleSource::new(PhysicsConfig::default(), start_ms, config.tick_interval_ms),
    };

    let shutdown = CancellationToken::new();
    let tasks = spawn_background_tasks(hub.clone(), Box::new(source), shutdown.clone());

    if config.cors_origins.is_empty() {
        info!("   CORS origins: any");
    } else {
        info!("   CORS origins: {:?}", config.cors_origins);
    }
    let hub_for_shutdown = hub.clone();
    let app = router(hub, cors_layer(&config.cors_origins));

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_address()))?;
    info!("🎧 Listening on http://{}", addr);
    info!("📡 WebSocket endpoint: ws://{}/ws", addr);
    info!("🔑 Health endpoint: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!("Failed to listen for shutdown signal: {}", e);
                    }
                }
                _ = signal.cancelled() => {}
            }
            info!("Shutting down");
            hub_for_shutdown.close_all("Server shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    Ok(())
}
