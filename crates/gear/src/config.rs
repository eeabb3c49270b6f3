//! Library-level configuration
//!
//! Durations are serialized as integer milliseconds. [`GearConfig::from_env`]
//! reads overrides from `GEAR_*` environment variables and falls back to
//! defaults for anything missing or unparsable.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::proxy::ProxyPoolConfig;
use crate::worker::DispatchConfig;

/// Dispatch and proxy settings for one process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GearConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub proxy: ProxyPoolConfig,
}

impl GearConfig {
    /// Build from environment variables
    ///
    /// - `GEAR_DISPATCH_MIN_BACKOFF_MS`
    /// - `GEAR_DISPATCH_MAX_BACKOFF_MS`
    /// - `GEAR_PROXY_BASE_CREDITS`
    /// - `GEAR_PROXY_RETRY_MS`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_parse::<u64>("GEAR_DISPATCH_MIN_BACKOFF_MS") {
            config.dispatch = config.dispatch.with_min_backoff(Duration::from_millis(ms));
        }
        if let Some(ms) = env_parse::<u64>("GEAR_DISPATCH_MAX_BACKOFF_MS") {
            config.dispatch = config.dispatch.with_max_backoff(Duration::from_millis(ms));
        }
        if let Some(credits) = env_parse::<i64>("GEAR_PROXY_BASE_CREDITS") {
            config.proxy = config.proxy.with_base_credits(credits);
        }
        if let Some(ms) = env_parse::<u64>("GEAR_PROXY_RETRY_MS") {
            config.proxy = config
                .proxy
                .with_empty_retry_interval(Duration::from_millis(ms));
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
