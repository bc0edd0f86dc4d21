use std::path::PathBuf;

use anyhow::Context;
use battletris::config::GameRules;
use battletris::hub::Hub;
use battletris::logging::init_log;
use battletris::net;
use clap::Parser;
use log::{info, LevelFilter};
use tokio::net::TcpListener;

/// Session authority for two-player battle matches over WebSocket.
#[derive(Parser, Debug, Clone)]
struct Opts {
    /// Address to listen for websocket connections
    #[arg(long, default_value = "127.0.0.1:3000")]
    listen: String,
    /// Optional JSON file overriding the default game rules
    #[arg(long)]
    rules: Option<PathBuf>,
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    init_log(opts.log_level, opts.log_file.as_deref())?;

    let rules = match opts.rules.as_ref() {
        Some(path) => GameRules::from_json_file(path)?,
        None => GameRules::default(),
    };
    info!(
        "rules: life {}, gauge {}, countdown {}ms",
        rules.max_life, rules.gauge_max, rules.countdown_ms
    );

    let listener = TcpListener::bind(&opts.listen)
        .await
        .with_context(|| format!("binding {}", opts.listen))?;
    let hub = Hub::spawn(rules);
    net::serve(listener, hub).await
}
