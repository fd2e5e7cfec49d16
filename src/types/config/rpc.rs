use std::env;
use std::num::{NonZeroU32, NonZeroUsize};

use anyhow::Context;
use serde::Deserialize;
use url::Url;

use crate::raw_data::historical::ranges::DEFAULT_WINDOW_SIZE;
use crate::rpc::{RateLimitConfig, RetryConfig, RpcClientConfig};

const DEFAULT_CONCURRENCY: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// Name of the env var holding the endpoint URL.
    pub url_env_var: String,
    /// Max in-flight requests. `RPC_CONCURRENCY` overrides.
    pub concurrency: Option<usize>,
    /// Window width of one `eth_getLogs` query. `RPC_WINDOW_SIZE` overrides.
    pub window_size: Option<u64>,
    pub requests_per_second: Option<u32>,
    /// Transport-level retries per request, 0 unless configured.
    #[serde(default)]
    pub max_retries: u32,
}

fn env_override<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}

impl RpcConfig {
    pub fn concurrency(&self) -> NonZeroUsize {
        let value = env_override("RPC_CONCURRENCY")
            .or(self.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY);
        NonZeroUsize::new(value).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn window_size(&self) -> u64 {
        env_override("RPC_WINDOW_SIZE")
            .or(self.window_size)
            .unwrap_or(DEFAULT_WINDOW_SIZE)
    }

    pub fn url(&self) -> anyhow::Result<Url> {
        let raw = env::var(&self.url_env_var)
            .with_context(|| format!("env var {} not set", self.url_env_var))?;
        Url::parse(&raw).with_context(|| format!("env var {} is not a valid URL", self.url_env_var))
    }

    pub fn client_config(&self) -> anyhow::Result<RpcClientConfig> {
        let mut config =
            RpcClientConfig::new(self.url()?).with_retry(RetryConfig::new(self.max_retries));
        if let Some(rps) = self.requests_per_second.and_then(NonZeroU32::new) {
            config = config.with_rate_limit(RateLimitConfig::per_second(rps));
        }
        Ok(config)
    }
}
