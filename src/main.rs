use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use polite_proxy::config::{ConfigManager, LogFormat, LoggingConfig};
use polite_proxy::service::{PolitenessApi, PolitenessService};
use polite_proxy::{AppState, ProxyServer};

#[derive(Parser)]
#[command(name = "polite-proxy")]
#[command(about = "A politeness-enforcing caching proxy for web crawlers")]
struct Args {
    #[arg(short, long, default_value = "config/config.toml")]
    config: String,

    /// Overrides `server.bind`
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter_directive(verbose)));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config_manager = ConfigManager::new(&args.config).await?;
    let config = config_manager.get_config();
    init_tracing(&config.logging, args.verbose);

    info!("Starting polite-proxy");
    info!("Loaded configuration from {}", args.config);

    let state = AppState::from_config(&config)?;
    let _background = state.spawn_background_tasks(&config);

    if let Some(path) = &config.cache.snapshot_path {
        if config.cache.enabled {
            state.cache.store().load_snapshot(path).await;
        }
    }

    let reload_state = state.clone();
    config_manager.set_reload_hook(move |cfg| {
        if let Err(e) = reload_state.apply_reload(cfg) {
            warn!("Failed to apply reloaded configuration: {}", e);
        }
    });
    if let Err(e) = config_manager.start_hot_reload().await {
        warn!("Config hot reload disabled: {}", e);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let wait_for_shutdown = |mut rx: watch::Receiver<bool>| async move {
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    };

    let service_task = config.server.service_bind.map(|service_bind| {
        let api = PolitenessApi::new(PolitenessService::new(
            state.robots.clone(),
            state.limiter.clone(),
        ));
        let shutdown = wait_for_shutdown(shutdown_rx.clone());
        tokio::spawn(async move {
            if let Err(e) = api.run_until(service_bind, shutdown).await {
                error!("Politeness service error: {}", e);
            }
        })
    });

    let bind = args.bind.unwrap_or(config.server.bind);
    let proxy_server = ProxyServer::new(bind, state.clone());
    let proxy_task = tokio::spawn(proxy_server.run_until(wait_for_shutdown(shutdown_rx)));

    match tokio::signal::ctrl_c().await {
        Ok(()) => warn!("Received CTRL+C, shutting down gracefully..."),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
    let _ = shutdown_tx.send(true);

    match proxy_task.await {
        Ok(Err(e)) => error!("Proxy server error: {}", e),
        Err(e) => error!("Proxy server task failed: {}", e),
        Ok(Ok(())) => {}
    }
    if let Some(task) = service_task {
        let _ = task.await;
    }

    if let Some(path) = &config.cache.snapshot_path {
        if config.cache.enabled {
            if let Err(e) = state.cache.store().save_snapshot(path).await {
                error!("Failed to save cache snapshot: {}", e);
            }
        }
    }

    info!("polite-proxy shutdown complete");
    Ok(())
}
