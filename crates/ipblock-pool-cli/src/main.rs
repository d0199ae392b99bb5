#![doc = include_str!("../README.md")]

mod cli;

use clap::Parser;
use cli::Cli;
use ipblock_pool::{PoolConfig, PoolManager};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let config = PoolConfig::try_from(&args.pool)?;
    let pool = PoolManager::new(config, args.pool.connect_store()).await?;

    let result = args.command.run(&pool, &mut std::io::stdout().lock()).await;
    pool.flush_deferred_releases().await;
    result
}
