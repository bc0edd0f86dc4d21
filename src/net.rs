//! WebSocket front door of the authority. Each connection gets a task that
//! decodes frames, routes them to its room actor, and writes back whatever
//! the room puts in its outbox.

use anyhow::Context;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use crate::error::SessionError;
use crate::hub::{Hub, Outbox, RoomHandle};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::ConnId;

pub async fn serve(listener: TcpListener, hub: Hub) -> anyhow::Result<()> {
    info!("listening on ws://{}", listener.local_addr()?);
    loop {
        let (stream, addr) = listener.accept().await?;
        debug!("ws connected: {}", addr);
        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_conn(stream, hub).await {
                warn!("connection error {}: {:?}", addr, e);
            }
        });
    }
}

async fn handle_conn(stream: TcpStream, hub: Hub) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await.context("websocket handshake")?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut session = Session {
        conn: hub.next_conn_id(),
        hub,
        outbox: out_tx,
        room: None,
    };

    let result = async {
        loop {
            tokio::select! {
                Some(msg) = out_rx.recv() => {
                    let text = serde_json::to_string(&msg)?;
                    ws_tx.send(Message::Text(text)).await?;
                }
                frame = ws_rx.next() => match frame {
                    Some(Ok(Message::Text(t))) => session.on_text(&t).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("conn {}: read error: {}", session.conn, e);
                        break;
                    }
                },
            }
        }
        anyhow::Ok(())
    }
    .await;

    session.leave();
    result
}

/// Per-connection routing state.
struct Session {
    conn: ConnId,
    hub: Hub,
    outbox: Outbox,
    room: Option<RoomHandle>,
}

impl Session {
    async fn on_text(&mut self, text: &str) {
        let msg = match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("conn {}: dropping malformed frame: {}", self.conn, e);
                return;
            }
        };
        let Some(room) = self.room.clone() else {
            match msg {
                ClientMessage::JoinRoom {
                    player_id,
                    room_id,
                    character,
                } => {
                    let joined = self
                        .hub
                        .join(room_id, self.conn, player_id, character, self.outbox.clone())
                        .await;
                    match joined {
                        Ok(handle) => self.room = Some(handle),
                        Err(err) => self.reject(err),
                    }
                }
                _ => self.reject(SessionError::NotInRoom),
            }
            return;
        };
        let leaving = matches!(msg, ClientMessage::LeaveRoom);
        if let Err(err) = room.send(self.conn, msg) {
            self.room = None;
            self.reject(err);
        } else if leaving {
            self.room = None;
        }
    }

    fn reject(&self, err: SessionError) {
        debug!("conn {}: {}", self.conn, err);
        let _ = self.outbox.send(ServerMessage::error(err));
    }

    fn leave(&mut self) {
        if let Some(room) = self.room.take() {
            room.disconnect(self.conn);
        }
    }
}
