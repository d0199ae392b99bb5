//! Command-line and environment configuration shared by the binaries.
//!
//! [`PoolArgs`] is meant to be `#[command(flatten)]`-ed into a binary's own
//! `clap::Parser`. Every flag can also be set from the environment.

use crate::error::{Error, Result};
use crate::policy::FailurePolicy;
use crate::pool::PoolConfig;
use crate::pool::config::{
    DEFAULT_BLOCK_SIZE, DEFAULT_DEFERRED_RELEASE_DELAY, DEFAULT_END_RANGE, DEFAULT_START_RANGE,
};
use crate::store::{ConsulConfig, ConsulStore, CoordinationStore, MemoryStore};
use clap::{Args, ValueEnum};
use core::time::Duration;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Which [`CoordinationStore`] backs the pool.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    /// Consul KV and sessions.
    #[default]
    Consul,
    /// Process-local store; state is lost on exit.
    Memory,
}

impl StoreBackend {
    /// Builds the store; `consul` is ignored for [`StoreBackend::Memory`].
    pub fn connect(self, consul: ConsulConfig) -> Arc<dyn CoordinationStore> {
        match self {
            Self::Memory => Arc::new(MemoryStore::new()),
            Self::Consul => Arc::new(ConsulStore::new(consul)),
        }
    }
}

/// Which [`FailurePolicy`] applies to store and decode failures.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyKind {
    /// Log and exit with status 1.
    #[default]
    Abort,
    /// Return the failure to the caller.
    Propagate,
    /// Retry store I/O with exponential backoff, then return the failure.
    Retry,
}

#[derive(Args, Debug, Clone)]
pub struct PoolArgs {
    /// Coordination store backend.
    ///
    /// Environment variable: `STORE_BACKEND`
    #[arg(long = "store", env = "STORE_BACKEND", value_enum, default_value_t = StoreBackend::Consul)]
    pub store: StoreBackend,

    /// Consul agent address as `host:port`.
    ///
    /// Environment variable: `CONSUL_ADDR`
    #[arg(long, env = "CONSUL_ADDR", default_value_t = String::from("127.0.0.1:8500"))]
    pub consul_addr: String,

    /// URI scheme used to reach the Consul agent.
    ///
    /// Environment variable: `CONSUL_SCHEME`
    #[arg(long, env = "CONSUL_SCHEME", default_value_t = String::from("http"))]
    pub consul_scheme: String,

    /// Consul datacenter; the agent's own datacenter when unset.
    ///
    /// Environment variable: `CONSUL_DATACENTER`
    #[arg(long, env = "CONSUL_DATACENTER")]
    pub consul_datacenter: Option<String>,

    /// ACL token sent with every Consul request.
    ///
    /// Environment variable: `CONSUL_TOKEN`
    #[arg(long, env = "CONSUL_TOKEN", hide_env_values = true)]
    pub consul_token: Option<String>,

    /// First address of a freshly created pool.
    ///
    /// Ignored once the store holds a pool cursor.
    ///
    /// Environment variable: `POOL_START_RANGE`
    #[arg(long, env = "POOL_START_RANGE", default_value_t = DEFAULT_START_RANGE)]
    pub start_range: Ipv4Addr,

    /// Last address a block of a freshly created pool may start at.
    ///
    /// Environment variable: `POOL_END_RANGE`
    #[arg(long, env = "POOL_END_RANGE", default_value_t = DEFAULT_END_RANGE)]
    pub end_range: Ipv4Addr,

    /// Addresses per block.
    ///
    /// Environment variable: `POOL_BLOCK_SIZE`
    #[arg(long, env = "POOL_BLOCK_SIZE", default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: u32,

    /// What store failures and corrupt records do.
    ///
    /// Environment variable: `FAILURE_POLICY`
    #[arg(long, env = "FAILURE_POLICY", value_enum, default_value_t = PolicyKind::Abort)]
    pub failure_policy: PolicyKind,

    /// Attempts per store operation under `--failure-policy retry`.
    ///
    /// Environment variable: `RETRY_ATTEMPTS`
    #[arg(long, env = "RETRY_ATTEMPTS", default_value_t = 5)]
    pub retry_attempts: u32,

    /// Delay before the first retry; doubles on every further attempt.
    ///
    /// Environment variable: `RETRY_BASE_DELAY_MS`
    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value_t = 100)]
    pub retry_base_delay_ms: u64,

    /// How long a deferred-release allocation keeps the pool locked.
    ///
    /// Environment variable: `DEFERRED_RELEASE_SECS`
    #[arg(long, env = "DEFERRED_RELEASE_SECS", default_value_t = DEFAULT_DEFERRED_RELEASE_DELAY.as_secs())]
    pub deferred_release_secs: u64,
}

impl PoolArgs {
    /// Builds the selected store backend.
    pub fn connect_store(&self) -> Arc<dyn CoordinationStore> {
        self.store.connect(self.consul_config())
    }

    pub fn consul_config(&self) -> ConsulConfig {
        ConsulConfig {
            address: self.consul_addr.clone(),
            scheme: self.consul_scheme.clone(),
            datacenter: self.consul_datacenter.clone().filter(|s| !s.is_empty()),
            token: self.consul_token.clone().filter(|s| !s.is_empty()),
            ..Default::default()
        }
    }

    fn resolve_failure_policy(&self) -> Result<FailurePolicy> {
        Ok(match self.failure_policy {
            PolicyKind::Abort => FailurePolicy::Abort,
            PolicyKind::Propagate => FailurePolicy::Propagate,
            PolicyKind::Retry => {
                if self.retry_attempts == 0 {
                    return Err(Error::InvalidConfig(
                        "RETRY_ATTEMPTS must be greater than 0".to_string(),
                    ));
                }
                FailurePolicy::Retry {
                    max_attempts: self.retry_attempts,
                    base_delay: Duration::from_millis(self.retry_base_delay_ms),
                }
            }
        })
    }
}

impl TryFrom<&PoolArgs> for PoolConfig {
    type Error = Error;

    fn try_from(args: &PoolArgs) -> Result<Self> {
        let config = Self {
            start_range: args.start_range,
            end_range: args.end_range,
            block_size: args.block_size,
            failure_policy: args.resolve_failure_policy()?,
            deferred_release_delay: Duration::from_secs(args.deferred_release_secs),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct Cli {
        #[command(flatten)]
        pool: PoolArgs,
    }

    fn parse(args: &[&str]) -> PoolArgs {
        Cli::try_parse_from(std::iter::once("test").chain(args.iter().copied()))
            .unwrap()
            .pool
    }

    #[test]
    fn explicit_flags_build_config() {
        let args = parse(&[
            "--store",
            "memory",
            "--start-range",
            "10.0.0.0",
            "--end-range",
            "10.0.0.252",
            "--block-size",
            "8",
            "--failure-policy",
            "retry",
            "--retry-attempts",
            "3",
            "--retry-base-delay-ms",
            "20",
            "--deferred-release-secs",
            "2",
        ]);
        assert_eq!(args.store, StoreBackend::Memory);

        let config = PoolConfig::try_from(&args).unwrap();
        assert_eq!(config.start_range, Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(config.end_range, Ipv4Addr::new(10, 0, 0, 252));
        assert_eq!(config.block_size, 8);
        assert_eq!(
            config.failure_policy,
            FailurePolicy::Retry {
                max_attempts: 3,
                base_delay: Duration::from_millis(20),
            }
        );
        assert_eq!(config.deferred_release_delay, Duration::from_secs(2));
    }

    #[test]
    fn rejects_invalid_values() {
        let args = parse(&["--block-size", "0"]);
        assert!(matches!(
            PoolConfig::try_from(&args),
            Err(Error::InvalidConfig(_))
        ));

        let args = parse(&["--failure-policy", "retry", "--retry-attempts", "0"]);
        assert!(matches!(
            PoolConfig::try_from(&args),
            Err(Error::InvalidConfig(_))
        ));

        let cli = Cli::try_parse_from(["test", "--start-range", "10.0.0"]);
        assert!(cli.is_err());
    }

    #[test]
    fn empty_consul_options_are_unset() {
        let args = parse(&["--consul-datacenter", "", "--consul-addr", "consul:8500"]);
        let consul = args.consul_config();
        assert_eq!(consul.address, "consul:8500");
        assert_eq!(consul.datacenter, None);
    }
}
