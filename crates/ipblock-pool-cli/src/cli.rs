use clap::{Args, Parser, Subcommand};
use ipblock_pool::{BlockInfo, Error, PoolArgs, PoolManager, ReleaseMode, parse_block_address};
use std::io::Write;

#[derive(Parser, Debug)]
#[command(name = "ipblock-pool", version, about = "IPv4 block allocator")]
pub struct Cli {
    #[command(flatten)]
    pub pool: PoolArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Look up a block by start address or key.
    #[command(visible_alias = "g")]
    Lookup(Selector),

    /// Allocate a new block, or return the one already held by `--key`.
    #[command(visible_alias = "a")]
    Allocate {
        /// Block key.
        #[arg(long, default_value = "")]
        key: String,

        /// Keep the pool locked for `--deferred-release-secs` afterwards.
        #[arg(long)]
        delay: bool,
    },

    /// Free a block by start address or key.
    #[command(visible_alias = "d")]
    Free(Selector),
}

/// Identifies a block. `--block` wins when both are given.
#[derive(Args, Debug)]
pub struct Selector {
    /// Starting IP address of the block.
    #[arg(long, default_value = "")]
    pub block: String,

    /// Block key.
    #[arg(long, default_value = "")]
    pub key: String,
}

impl Command {
    pub async fn run(&self, pool: &PoolManager, out: &mut impl Write) -> anyhow::Result<()> {
        match self {
            Self::Lookup(selector) => {
                let block = parse_block_address(Some(selector.block.as_str()))?;
                match pool.lookup(block, Some(selector.key.as_str())).await? {
                    Some(info) => print_block(out, &info)?,
                    None => writeln!(out, "Block not found")?,
                }
            }
            Self::Allocate { key, delay } => {
                let release = if *delay {
                    ReleaseMode::Deferred
                } else {
                    ReleaseMode::Immediate
                };
                let info = pool.allocate(Some(key.as_str()), release).await?;
                print_block(out, &info)?;
            }
            Self::Free(selector) => {
                let block = parse_block_address(Some(selector.block.as_str()))?;
                match pool.free(block, Some(selector.key.as_str())).await {
                    Ok(_) => writeln!(out, "Done!")?,
                    Err(Error::BlockNotFound) => writeln!(out, "Block not found!")?,
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }
}

fn print_block(out: &mut impl Write, info: &BlockInfo) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, info)?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipblock_pool::{FailurePolicy, MemoryStore, PoolConfig};
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    async fn pool() -> PoolManager {
        let config = PoolConfig {
            start_range: Ipv4Addr::new(10, 0, 0, 0),
            end_range: Ipv4Addr::new(10, 0, 0, 252),
            failure_policy: FailurePolicy::Propagate,
            ..Default::default()
        };
        PoolManager::new(config, Arc::new(MemoryStore::new()))
            .await
            .unwrap()
    }

    async fn run(pool: &PoolManager, args: &[&str]) -> anyhow::Result<String> {
        let cli = Cli::try_parse_from(
            ["ipblock-pool", "--store", "memory"]
                .iter()
                .chain(args.iter())
                .copied(),
        )?;
        let mut out = Vec::new();
        cli.command.run(pool, &mut out).await?;
        Ok(String::from_utf8(out)?)
    }

    #[tokio::test]
    async fn allocate_prints_indented_record() {
        let pool = pool().await;
        let out = run(&pool, &["allocate", "--key", "svc"]).await.unwrap();

        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["start"], "10.0.0.0");
        assert_eq!(value["key"], "svc");
        assert!(out.contains("\n  \"start\""));
    }

    #[tokio::test]
    async fn aliases_cover_full_lifecycle() {
        let pool = pool().await;
        run(&pool, &["a", "--key", "svc"]).await.unwrap();

        let out = run(&pool, &["g", "--key", "svc"]).await.unwrap();
        assert!(out.contains("\"10.0.0.0\""));

        assert_eq!(run(&pool, &["d", "--block", "10.0.0.0"]).await.unwrap(), "Done!\n");
        assert_eq!(
            run(&pool, &["d", "--block", "10.0.0.0"]).await.unwrap(),
            "Block not found!\n"
        );
        assert_eq!(
            run(&pool, &["lookup", "--key", "svc"]).await.unwrap(),
            "Block not found\n"
        );
    }

    #[tokio::test]
    async fn lookup_without_selector_is_not_found() {
        let pool = pool().await;
        run(&pool, &["allocate"]).await.unwrap();
        assert_eq!(run(&pool, &["lookup"]).await.unwrap(), "Block not found\n");
    }

    #[tokio::test]
    async fn malformed_block_is_an_error() {
        let pool = pool().await;
        let err = run(&pool, &["free", "--block", "nope"]).await.unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
