//! Application entry point. Initializes tracing, loads configuration from
//! the environment, wires the token provider and SQL client into shared
//! state, and serves the Axum router until SIGTERM/Ctrl+C.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use epigram::config::{AppConfig, DEFAULT_LOG_FILTER};
use epigram::http::shutdown::shutdown_signal;
use epigram::routes::create_router;
use epigram::state::AppState;

/// Epigram: random quote service with managed identity SQL auth
#[derive(Parser, Debug)]
#[command(name = "epigram", version, about)]
struct Args {
    /// Log level filter (e.g., "epigram=debug,tower_http=info")
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = AppConfig::from_env()?;

    // Filter precedence: CLI flag, then RUST_LOG, then the built-in default
    let log_filter = args
        .log_level
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    let registry = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_filter));
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!(
        app_name = %config.app_name,
        sql_server = %config.sql_server,
        database = %config.sql_database,
        "Application starting"
    );

    let addr = config.bind_addr();
    // Not named `debug`: the info! expansion imports tracing::field::debug,
    // which would shadow a local of that name.
    let debug_mode = config.debug;
    let state = AppState::new(config);
    let app = create_router(state);

    tracing::info!(debug = debug_mode, "Starting server at http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
