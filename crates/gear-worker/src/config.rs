//! Worker configuration from the environment

use std::str::FromStr;
use std::time::Duration;

use gear::GearConfig;
use tracing::warn;

/// A proxy endpoint given as `ip:port:priority`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySpec {
    pub ip: String,
    pub port: u16,
    pub priority: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("expected ip:port:priority, got {0:?}")]
    MalformedProxy(String),

    #[error("invalid port in {0:?}")]
    InvalidPort(String),

    #[error("invalid priority in {0:?}")]
    InvalidPriority(String),
}

impl FromStr for ProxySpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().rsplitn(3, ':');
        let (Some(priority), Some(port), Some(ip)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(ConfigError::MalformedProxy(s.to_string()));
        };
        if ip.is_empty() {
            return Err(ConfigError::MalformedProxy(s.to_string()));
        }

        Ok(Self {
            ip: ip.to_string(),
            port: port
                .parse()
                .map_err(|_| ConfigError::InvalidPort(s.to_string()))?,
            priority: priority
                .parse()
                .map_err(|_| ConfigError::InvalidPriority(s.to_string()))?,
        })
    }
}

/// Settings for the worker process
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Task types to serve
    pub tasks: Vec<String>,
    /// Move stranded working payloads back to pending on start
    pub restore: bool,
    pub echo_concurrency: usize,
    pub page_concurrency: usize,
    /// Countdown submitted to `echo` on start
    pub echo_seed: Option<u32>,
    /// URLs submitted to `page` on start
    pub seed_urls: Vec<String>,
    pub proxies: Vec<ProxySpec>,
    /// JSON list of `[ip, port, priority]` polled by the `proxy` task type
    pub proxy_feed_url: Option<String>,
    /// Pause between two polls of the proxy feed
    pub proxy_refresh: Duration,
    pub gear: GearConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tasks: vec!["echo".to_string(), "page".to_string(), "proxy".to_string()],
            restore: true,
            echo_concurrency: 2,
            page_concurrency: 4,
            echo_seed: None,
            seed_urls: vec![],
            proxies: vec![],
            proxy_feed_url: None,
            proxy_refresh: Duration::from_secs(30),
            gear: GearConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create configuration from environment variables
    ///
    /// - `GEAR_TASKS`: comma-separated task types to serve (default `echo,page,proxy`)
    /// - `GEAR_RESTORE`: `true`/`false` (default `true`)
    /// - `GEAR_ECHO_CONCURRENCY`, `GEAR_PAGE_CONCURRENCY`
    /// - `GEAR_ECHO_SEED`: countdown to submit to `echo`
    /// - `GEAR_SEED_URLS`: comma-separated URLs to submit to `page`
    /// - `GEAR_PROXIES`: comma-separated `ip:port:priority` entries
    /// - `GEAR_PROXY_FEED_URL`: proxy list submitted to `proxy` on start
    /// - `GEAR_PROXY_REFRESH_SECS`: pause between feed polls (default 30)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let tasks = std::env::var("GEAR_TASKS")
            .ok()
            .map(|s| split_list(&s))
            .filter(|tasks| !tasks.is_empty())
            .unwrap_or(defaults.tasks);

        let restore = std::env::var("GEAR_RESTORE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.restore);

        let echo_concurrency = std::env::var("GEAR_ECHO_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.echo_concurrency);

        let page_concurrency = std::env::var("GEAR_PAGE_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.page_concurrency);

        let echo_seed = std::env::var("GEAR_ECHO_SEED")
            .ok()
            .and_then(|s| s.parse().ok());

        let seed_urls = std::env::var("GEAR_SEED_URLS")
            .map(|s| split_list(&s))
            .unwrap_or_default();

        let proxies = std::env::var("GEAR_PROXIES")
            .map(|s| parse_proxies(&s))
            .unwrap_or_default();

        let proxy_feed_url = std::env::var("GEAR_PROXY_FEED_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let proxy_refresh = std::env::var("GEAR_PROXY_REFRESH_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.proxy_refresh);

        Self {
            tasks,
            restore,
            echo_concurrency,
            page_concurrency,
            echo_seed,
            seed_urls,
            proxies,
            proxy_feed_url,
            proxy_refresh,
            gear: GearConfig::from_env(),
        }
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a proxy list, skipping malformed entries
pub fn parse_proxies(s: &str) -> Vec<ProxySpec> {
    split_list(s)
        .into_iter()
        .filter_map(|entry| match entry.parse() {
            Ok(spec) => Some(spec),
            Err(e) => {
                warn!(error = %e, "Skipping proxy entry");
                None
            }
        })
        .collect()
}
