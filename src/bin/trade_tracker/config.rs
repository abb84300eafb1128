//! Configuration for the trade tracker.
//!
//! Interceptor tuning comes from `TRADE_STREAM_*` environment variables
//! (via .env file or shell), feeds and output options from CLI arguments.

use clap::Parser;
use url::Url;

/// CLI arguments of the trade tracker.
#[derive(Debug, Parser)]
#[command(name = "trade_tracker")]
#[command(about = "Track realtime trades from one or more DEX feeds")]
pub struct CliConfig {
    /// Feed URLs to connect to (ws:// or wss://)
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Stop after this many trades (0 = run until interrupted)
    #[arg(short, long, default_value = "0")]
    pub limit: usize,

    /// Subscription message sent to every feed once connected
    #[arg(short, long)]
    pub subscribe: Option<String>,
}

impl CliConfig {
    /// Checks the feed URLs before any connection is attempted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for url in &self.urls {
            let parsed =
                Url::parse(url).map_err(|_| ConfigError::InvalidUrl(url.clone()))?;
            if !matches!(parsed.scheme(), "ws" | "wss") {
                return Err(ConfigError::UnsupportedScheme(url.clone()));
            }
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid feed URL {0}")]
    InvalidUrl(String),

    #[error("Feed URL {0} is not a WebSocket URL")]
    UnsupportedScheme(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let cli = CliConfig::parse_from([
            "trade_tracker",
            "--limit",
            "5",
            "wss://a.test/trades",
            "wss://b.test/trades",
        ]);
        assert_eq!(cli.limit, 5);
        assert_eq!(cli.urls.len(), 2);
        assert!(cli.subscribe.is_none());
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_websocket_url() {
        let cli = CliConfig::parse_from(["trade_tracker", "https://a.test/trades"]);
        assert!(matches!(
            cli.validate(),
            Err(ConfigError::UnsupportedScheme(_))
        ));

        let cli = CliConfig::parse_from(["trade_tracker", "a.test"]);
        assert!(matches!(cli.validate(), Err(ConfigError::InvalidUrl(_))));
    }
}
