//! Interceptor configuration.
//!
//! Defaults match the production behaviour of the trade bus; every value can
//! be overridden through `TRADE_STREAM_*` environment variables, e.g.
//! `TRADE_STREAM_SEEN_TTL_SECS=120`.

use std::time::Duration;

use crate::error::StreamError;

/// Prefix of environment variables read by [`InterceptorConfig::from_env`].
pub const ENV_PREFIX: &str = "TRADE_STREAM_";

const DEFAULT_SEEN_TTL_SECS: u64 = 60;
const DEFAULT_PRUNE_THRESHOLD: usize = 8_000;
const DEFAULT_EVENT_BUFFER: usize = 64;
const DEFAULT_CHANNEL_SIZE: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
pub struct InterceptorConfig {
    /// Age after which a seen dedup key becomes eligible for eviction.
    #[serde(default = "default_seen_ttl_secs")]
    pub seen_ttl_secs: u64,

    /// Seen-set size above which stale keys are pruned on insert.
    #[serde(default = "default_prune_threshold")]
    pub prune_threshold: usize,

    /// Capacity of each connection's lifecycle event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Default capacity of channel-based subscriptions.
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
}

impl InterceptorConfig {
    /// Load configuration from `TRADE_STREAM_*` environment variables,
    /// falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self, StreamError> {
        Ok(envy::prefixed(ENV_PREFIX).from_env()?)
    }

    pub fn seen_ttl(&self) -> Duration {
        Duration::from_secs(self.seen_ttl_secs)
    }
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            seen_ttl_secs: DEFAULT_SEEN_TTL_SECS,
            prune_threshold: DEFAULT_PRUNE_THRESHOLD,
            event_buffer: DEFAULT_EVENT_BUFFER,
            channel_size: DEFAULT_CHANNEL_SIZE,
        }
    }
}

fn default_seen_ttl_secs() -> u64 {
    DEFAULT_SEEN_TTL_SECS
}

fn default_prune_threshold() -> usize {
    DEFAULT_PRUNE_THRESHOLD
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

fn default_channel_size() -> usize {
    DEFAULT_CHANNEL_SIZE
}
