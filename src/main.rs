use clap::Parser;
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use std::path::Path;
use tile_market::{
    client,
    config::Args,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

const LOG_FILE_PREFIX: &str = "tile-market.log";

/// Logs go to a daily rolling file; the terminal belongs to the UI.
fn init_tracing(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .wrap_err_with(|| format!("cannot create log directory {}", log_dir.display()))?;
    let appender = rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    Ok(guard)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let config = args.grid_config();
    let _log_guard = init_tracing(&config.log_dir_path()?)?;
    tracing::info!(server_url = %config.server_url, "starting tile-market client");
    client::run_app(config).await
}
