use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use edge_gateway::config::LogFormat;
use edge_gateway::metrics::try_init_metrics;
use edge_gateway::quota::RedisCounterStore;
use edge_gateway::{AppState, Config, build_router, utils};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from_env();

    // Logging comes up before config errors are reported
    match &config {
        Ok(c) => init_tracing(&c.log_level, c.log_format),
        Err(_) => init_tracing("info", LogFormat::Text),
    }

    info!("Starting edge gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Run the gateway, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        backend = %config.backend_url,
        protected_prefix = %config.protected_prefix,
        public_prefix = %config.public_prefix,
        "Configuration loaded"
    );

    if let Some(metrics_addr) = config.metrics_addr() {
        try_init_metrics(metrics_addr);
    } else {
        info!("Metrics disabled (METRICS_PORT=0)");
    }

    // Connects lazily; the gateway starts and fails open while Redis is down
    let store = RedisCounterStore::new(&config.redis_url, config.rate_limit_store_timeout)
        .map_err(|e| {
            error!("Invalid REDIS_URL: {e}");
            exitcode::CONFIG
        })?;
    info!(
        read = config.rate_limit_read,
        write = config.rate_limit_write,
        search = config.rate_limit_search,
        window_secs = config.rate_limit_window.as_secs(),
        "Quota limits configured"
    );

    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;

    let state = AppState::new(config, Arc::new(store));
    let app = build_router(state);

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Gateway listening on http://{addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(utils::shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    info!("Gateway shutdown complete");
    Ok(())
}
