//! `orc` binary entry point.

use anyhow::Result;
use clap::Parser;

use orchestra_core::cli::{run, Cli};
use orchestra_core::infrastructure::config::ConfigLoader;
use orchestra_core::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load()?;
    let _logger = LoggerImpl::init(&config.logging)?;

    run(cli, &config).await
}
