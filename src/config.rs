use crate::tile_state::{
    DEFAULT_QR_PROVIDER,
    DEFAULT_QR_SIZE,
};
use clap::Parser;
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use std::{
    path::PathBuf,
    time::Duration,
};

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";
pub const DEFAULT_REFRESH_MS: u64 = 3_000;
pub const DEFAULT_RETRY_MS: u64 = 2_000;
pub const DEFAULT_TICK_MS: u64 = 1_000;
pub const DEFAULT_LOG_DIR: &str = "~/.tile-market/logs";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GridConfig {
    pub server_url: String,
    /// Address/tile refresh cadence.
    pub refresh: Duration,
    /// Purchase retry evaluation cadence.
    pub retry: Duration,
    /// Countdown tick cadence.
    pub tick: Duration,
    pub qr_provider: String,
    pub qr_size: u32,
    /// Directory for the rolling log file; `~` and environment variables are
    /// expanded by [`GridConfig::log_dir_path`].
    pub log_dir: String,
}

impl GridConfig {
    pub fn log_dir_path(&self) -> Result<PathBuf> {
        let expanded = shellexpand::full(&self.log_dir)
            .wrap_err_with(|| format!("cannot expand log directory {}", self.log_dir))?;
        Ok(PathBuf::from(expanded.into_owned()))
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            refresh: Duration::from_millis(DEFAULT_REFRESH_MS),
            retry: Duration::from_millis(DEFAULT_RETRY_MS),
            tick: Duration::from_millis(DEFAULT_TICK_MS),
            qr_provider: DEFAULT_QR_PROVIDER.to_string(),
            qr_size: DEFAULT_QR_SIZE,
            log_dir: DEFAULT_LOG_DIR.to_string(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(version, about = "Terminal client for the tile market", long_about = None)]
pub struct Args {
    /// Base URL of the tile server
    #[arg(long, default_value = DEFAULT_SERVER_URL)]
    pub server_url: String,

    /// Address/tile refresh interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_REFRESH_MS, value_parser = clap::value_parser!(u64).range(1..))]
    pub refresh_ms: u64,

    /// Purchase retry interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_RETRY_MS, value_parser = clap::value_parser!(u64).range(1..))]
    pub retry_ms: u64,

    /// Countdown tick interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_TICK_MS, value_parser = clap::value_parser!(u64).range(1..))]
    pub tick_ms: u64,

    /// QR chart provider queried with the tile address
    #[arg(long, default_value = DEFAULT_QR_PROVIDER)]
    pub qr_provider: String,

    /// QR image edge length in pixels
    #[arg(long, default_value_t = DEFAULT_QR_SIZE)]
    pub qr_size: u32,

    /// Directory for the rolling log file (`~` is expanded)
    #[arg(long, default_value = DEFAULT_LOG_DIR)]
    pub log_dir: String,
}

impl Args {
    pub fn grid_config(&self) -> GridConfig {
        GridConfig {
            server_url: self.server_url.clone(),
            refresh: Duration::from_millis(self.refresh_ms),
            retry: Duration::from_millis(self.retry_ms),
            tick: Duration::from_millis(self.tick_ms),
            qr_provider: self.qr_provider.clone(),
            qr_size: self.qr_size,
            log_dir: self.log_dir.clone(),
        }
    }
}
