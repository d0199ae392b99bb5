use anyhow::Context;
use clap::Parser;
use ipblock_pool::{ConsulConfig, PoolArgs, PoolConfig, StoreBackend};
use std::net::SocketAddr;

/// Runtime configuration for the `ipblock-pool-server` binary.
///
/// All values are parsed from CLI arguments or environment variables. A
/// `.env` file in the working directory is loaded first.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ipblock-pool-server",
    version,
    about = "An HTTP service allocating IPv4 blocks from a shared pool"
)]
pub struct CliArgs {
    #[command(flatten)]
    pub pool: PoolArgs,

    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:5555"))]
    pub server_addr: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: SocketAddr,
    pub backend: StoreBackend,
    pub consul: ConsulConfig,
    pub pool: PoolConfig,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let server_addr = args
            .server_addr
            .parse()
            .with_context(|| format!("SERVER_ADDR `{}` is not a socket address", args.server_addr))?;
        let pool = PoolConfig::try_from(&args.pool)?;

        Ok(Self {
            server_addr,
            backend: args.pool.store,
            consul: args.pool.consul_config(),
            pool,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_listen_on_5555() {
        let args = CliArgs::try_parse_from(["ipblock-pool-server", "--store", "memory"]).unwrap();
        let config = ServerConfig::try_from(args).unwrap();
        assert_eq!(config.server_addr.port(), 5555);
        assert_eq!(config.backend, StoreBackend::Memory);
    }

    #[test]
    fn rejects_bad_listen_address() {
        let args =
            CliArgs::try_parse_from(["ipblock-pool-server", "--server-addr", "localhost"]).unwrap();
        let err = ServerConfig::try_from(args).unwrap_err();
        assert!(err.to_string().contains("SERVER_ADDR"));
    }

    #[test]
    fn rejects_invalid_pool() {
        let args = CliArgs::try_parse_from([
            "ipblock-pool-server",
            "--start-range",
            "10.0.1.0",
            "--end-range",
            "10.0.0.0",
        ])
        .unwrap();
        assert!(ServerConfig::try_from(args).is_err());
    }
}
