use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use battletris::ability::Character;
use battletris::bot::{BotConfig, BotDriver};
use battletris::client::{Backoff, ClientBridge, ClientPhase};
use battletris::config::GameRules;
use battletris::logging::init_log;
use battletris::now_ms;
use battletris::protocol::{ClientMessage, ServerMessage};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use log::{info, warn, LevelFilter};
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Headless player: joins a room, readies up, and plays with a placement bot.
#[derive(Parser, Debug, Clone)]
struct Opts {
    /// Authority websocket url
    #[arg(long, default_value = "ws://127.0.0.1:3000")]
    url: String,
    #[arg(long)]
    player: String,
    /// Room to join; omitted asks the server for a fresh one
    #[arg(long)]
    room: Option<String>,
    /// char1, char2, char3 or default
    #[arg(long, default_value = "default", value_parser = parse_character)]
    character: Character,
    /// Keep accepting rematches instead of exiting after one match
    #[arg(long)]
    rematch: bool,
    /// Bot speed in pieces per second
    #[arg(long, default_value_t = 1.5)]
    pps: f32,
    /// Rules file; must match the server's for local numbers to agree
    #[arg(long)]
    rules: Option<PathBuf>,
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn parse_character(s: &str) -> Result<Character, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).map_err(|e| e.to_string())
}

enum SessionEnd {
    Finished,
    Dropped,
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    init_log(opts.log_level, None)?;
    let rules = match opts.rules.as_ref() {
        Some(path) => GameRules::from_json_file(path)?,
        None => GameRules::default(),
    };

    let mut bridge = ClientBridge::new(opts.player.clone(), opts.character, rules);
    let mut backoff = Backoff::default();
    loop {
        match connect_async(opts.url.as_str()).await {
            Ok((ws, _)) => {
                info!("connected to {}", opts.url);
                backoff.reset();
                match run_session(ws, &mut bridge, &opts).await {
                    Ok(SessionEnd::Finished) => return Ok(()),
                    Ok(SessionEnd::Dropped) => warn!("connection closed by server"),
                    Err(e) => warn!("session error: {:?}", e),
                }
                bridge.on_disconnect();
            }
            Err(e) => warn!("connect to {} failed: {}", opts.url, e),
        }
        let delay = backoff.next_delay();
        info!("reconnecting in {:?} (attempt {})", delay, backoff.attempt());
        tokio::time::sleep(delay).await;
    }
}

async fn run_session(
    ws: WsStream,
    bridge: &mut ClientBridge,
    opts: &Opts,
) -> anyhow::Result<SessionEnd> {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut outgoing = vec![bridge.join_message(opts.room.clone())];
    let mut driver = BotDriver::new(BotConfig { pps: opts.pps });
    let mut ticker = tokio::time::interval(Duration::from_millis(16));
    let mut last = Instant::now();

    loop {
        for msg in outgoing.drain(..) {
            let text = serde_json::to_string(&msg)?;
            ws_tx.send(Message::Text(text)).await.context("sending frame")?;
        }
        tokio::select! {
            _ = ticker.tick() => {
                let now = now_ms();
                let dt = last.elapsed().as_secs_f32() * 1000.0;
                last = Instant::now();
                outgoing.extend(bridge.tick(now));
                if bridge.phase() == ClientPhase::Playing {
                    let engine = bridge.engine();
                    let actions = driver.update(
                        engine.board(),
                        engine.current(),
                        engine.player().gauge.ready,
                        dt,
                    );
                    for action in actions {
                        outgoing.extend(bridge.act(action, now));
                    }
                }
            }
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(t))) => {
                    let msg = match serde_json::from_str::<ServerMessage>(&t) {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!("dropping unreadable frame: {}", e);
                            continue;
                        }
                    };
                    let ended = matches!(msg, ServerMessage::GameEnd { .. });
                    let joined = matches!(msg, ServerMessage::Joined { .. });
                    outgoing.extend(bridge.on_server(msg, now_ms()));
                    if joined {
                        outgoing.push(ClientMessage::Ready);
                    }
                    if ended {
                        if !opts.rematch {
                            return Ok(SessionEnd::Finished);
                        }
                        outgoing.push(ClientMessage::RematchReady);
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Dropped),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("reading frame"),
            },
        }
    }
}
