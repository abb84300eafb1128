//! Trade tracker binary - connects to trade feeds and prints every trade
//! once, however many feeds publish it.

mod config;

use std::process::exit;

use clap::Parser;
use dex_trade_stream::{
    InterceptorConfig, TradeMessage, TradeStreamInterceptor, transport::WsConnector,
};
use tracing::{error, info};

use config::CliConfig;

fn format_trade(trade: &TradeMessage) -> String {
    let field = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
    format!(
        "{:<24} │ {:<42} │ {:<4} │ in: {:<20} │ out: {:<20} │ {}",
        trade.key().as_str(),
        field(trade.party().map(str::to_string)),
        field(trade.side().map(|side| format!("{side:?}"))),
        field(trade.amount_in().map(|amount| amount.to_string())),
        field(trade.amount_out().map(|amount| amount.to_string())),
        field(trade.token_symbol().map(str::to_string)),
    )
}

#[tokio::main]
async fn main() {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Failed to load .env file: {}", e);
    }

    let env_config = match InterceptorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to parse environment configuration: {}", e);
            exit(1);
        }
    };

    let cli_config = CliConfig::parse();
    if let Err(e) = cli_config.validate() {
        eprintln!("Invalid configuration: {}", e);
        exit(1);
    }

    // Set up logging
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let interceptor = TradeStreamInterceptor::new(env_config);
    interceptor.initialize(WsConnector);
    let mut trades = interceptor.subscribe_channel();

    let mut connections = Vec::with_capacity(cli_config.urls.len());
    for url in &cli_config.urls {
        match interceptor.open_tracked_connection(url) {
            Ok(connection) => {
                if let Some(message) = &cli_config.subscribe {
                    if let Err(e) = connection.send(message.as_str()) {
                        error!(%e, %url, "Failed to queue subscription message");
                    }
                }
                connections.push(connection);
            }
            Err(e) => {
                eprintln!("Failed to open {}: {}", url, e);
                exit(1);
            }
        }
    }

    println!("Listening for trades... (Ctrl+C to stop)");

    let mut count = 0;
    loop {
        tokio::select! {
            trade = trades.recv() => {
                let Some(trade) = trade else { break };
                println!("{}", format_trade(&trade));
                count += 1;
                if cli_config.limit != 0 && count >= cli_config.limit {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
            _ = all_closed(&connections) => {
                info!("All feeds closed");
                break;
            }
        }
    }

    let stats = interceptor.stats();
    info!(
        trades = count,
        frames = stats.frames,
        duplicates = stats.duplicates,
        "Trade tracker shutting down"
    );
    interceptor.reset();
}

async fn all_closed(connections: &[dex_trade_stream::TrackedConnection]) {
    futures::future::join_all(connections.iter().map(|c| c.closed())).await;
}
