mod app;
mod archive_list;
mod cli;
mod config;
mod desktop;
mod error;
mod extract;
mod game;
mod instance;
mod lifecycle;
mod locator;
mod nexus;
mod plugins;
mod registry;
mod vfs;

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "VAULTLINK_LOG";

fn main() -> Result<()> {
    cli::run()
}

/// Logs go to stderr so list output stays machine readable.
pub(crate) fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .with_env_var(LOG_ENV)
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
