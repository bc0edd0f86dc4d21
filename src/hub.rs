//! Room actors and the registry that routes joins to them. Every room runs in
//! its own task and handles its commands strictly one at a time, so damage
//! arithmetic on a defender never races.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Duration, Instant};

use crate::ability::Character;
use crate::config::GameRules;
use crate::error::SessionError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::{ConnId, Envelope, Room};

pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Millisecond clock anchored to wall time at creation and advanced by the
/// tokio clock, so paused-time tests see timers fire.
#[derive(Clone, Copy, Debug)]
pub struct Clock {
    origin: Instant,
    base_ms: u64,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            base_ms: crate::now_ms(),
        }
    }

    pub fn now(&self) -> u64 {
        self.base_ms + self.origin.elapsed().as_millis() as u64
    }

    pub fn instant_at(&self, ms: u64) -> Instant {
        self.origin + Duration::from_millis(ms.saturating_sub(self.base_ms))
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

enum RoomCommand {
    Join {
        conn: ConnId,
        player_id: String,
        character: Character,
        outbox: Outbox,
        handle: RoomHandle,
        reply: oneshot::Sender<Result<RoomHandle, SessionError>>,
    },
    Message {
        conn: ConnId,
        msg: ClientMessage,
    },
    Disconnect {
        conn: ConnId,
    },
    CloseIfEmpty {
        reply: oneshot::Sender<bool>,
    },
}

enum HubCommand {
    Join {
        room_id: Option<String>,
        conn: ConnId,
        player_id: String,
        character: Character,
        outbox: Outbox,
        reply: oneshot::Sender<Result<RoomHandle, SessionError>>,
    },
    RoomEmptied {
        room_id: String,
    },
    RoomCount {
        reply: oneshot::Sender<usize>,
    },
}

/// Sending side of one room actor.
#[derive(Clone, Debug)]
pub struct RoomHandle {
    id: String,
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl std::fmt::Debug for RoomCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoomCommand::Join { conn, player_id, .. } => {
                write!(f, "Join({}, {})", conn, player_id)
            }
            RoomCommand::Message { conn, msg } => write!(f, "Message({}, {:?})", conn, msg),
            RoomCommand::Disconnect { conn } => write!(f, "Disconnect({})", conn),
            RoomCommand::CloseIfEmpty { .. } => write!(f, "CloseIfEmpty"),
        }
    }
}

impl RoomHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn send(&self, conn: ConnId, msg: ClientMessage) -> Result<(), SessionError> {
        self.tx
            .send(RoomCommand::Message { conn, msg })
            .map_err(|_| SessionError::RoomClosed(self.id.clone()))
    }

    /// Leaves the room. A closed room has nothing left to leave.
    pub fn disconnect(&self, conn: ConnId) {
        let _ = self.tx.send(RoomCommand::Disconnect { conn });
    }
}

/// Cloneable entry point to the room registry.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::UnboundedSender<HubCommand>,
    next_conn: Arc<AtomicU64>,
}

impl Hub {
    /// Starts the registry task on the current runtime.
    pub fn spawn(rules: GameRules) -> Hub {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Registry {
            rules,
            rooms: HashMap::new(),
            next_room: 1,
            clock: Clock::new(),
            hub_tx: tx.clone(),
        };
        tokio::spawn(registry.run(rx));
        Hub {
            tx,
            next_conn: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_conn_id(&self) -> ConnId {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    /// Attaches `conn` to `room_id`, creating the room if needed. An empty or
    /// missing id gets a generated one. Frames for the connection are pushed
    /// into `outbox` from then on.
    pub async fn join(
        &self,
        room_id: Option<String>,
        conn: ConnId,
        player_id: String,
        character: Character,
        outbox: Outbox,
    ) -> Result<RoomHandle, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Join {
                room_id,
                conn,
                player_id,
                character,
                outbox,
                reply,
            })
            .map_err(|_| SessionError::HubClosed)?;
        rx.await.map_err(|_| SessionError::HubClosed)?
    }

    pub async fn room_count(&self) -> Result<usize, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::RoomCount { reply })
            .map_err(|_| SessionError::HubClosed)?;
        rx.await.map_err(|_| SessionError::HubClosed)
    }
}

struct Registry {
    rules: GameRules,
    rooms: HashMap<String, RoomHandle>,
    next_room: u64,
    clock: Clock,
    hub_tx: mpsc::UnboundedSender<HubCommand>,
}

impl Registry {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<HubCommand>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                HubCommand::Join {
                    room_id,
                    conn,
                    player_id,
                    character,
                    outbox,
                    reply,
                } => {
                    let room_id = match room_id.filter(|id| !id.is_empty()) {
                        Some(id) => id,
                        None => self.generate_id(),
                    };
                    let handle = self.room(&room_id);
                    let cmd = RoomCommand::Join {
                        conn,
                        player_id,
                        character,
                        outbox,
                        handle: handle.clone(),
                        reply,
                    };
                    if let Err(mpsc::error::SendError(cmd)) = handle.tx.send(cmd) {
                        warn!("room {} actor is gone", room_id);
                        self.rooms.remove(&room_id);
                        if let RoomCommand::Join { reply, .. } = cmd {
                            let _ = reply.send(Err(SessionError::RoomClosed(room_id)));
                        }
                    }
                }
                HubCommand::RoomEmptied { room_id } => {
                    let Some(handle) = self.rooms.get(&room_id) else {
                        continue;
                    };
                    let (reply, closed) = oneshot::channel();
                    if handle.tx.send(RoomCommand::CloseIfEmpty { reply }).is_err() {
                        self.rooms.remove(&room_id);
                        continue;
                    }
                    // a join queued ahead of the close keeps the room alive
                    if closed.await.unwrap_or(true) {
                        self.rooms.remove(&room_id);
                        info!("room {} destroyed ({} open)", room_id, self.rooms.len());
                    }
                }
                HubCommand::RoomCount { reply } => {
                    let _ = reply.send(self.rooms.len());
                }
            }
        }
    }

    fn generate_id(&mut self) -> String {
        loop {
            let id = format!("room_{}", self.next_room);
            self.next_room += 1;
            if !self.rooms.contains_key(&id) {
                return id;
            }
        }
    }

    fn room(&mut self, room_id: &str) -> RoomHandle {
        if let Some(handle) = self.rooms.get(room_id) {
            return handle.clone();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = RoomHandle {
            id: room_id.to_string(),
            tx,
        };
        let actor = RoomActor {
            room: Room::new(room_id, self.rules.clone()),
            outboxes: HashMap::new(),
            hub_tx: self.hub_tx.clone(),
            clock: self.clock,
        };
        let task = tokio::spawn(actor.run(rx));
        // a room that died still has to leave the registry
        let hub_tx = self.hub_tx.clone();
        let id = room_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = task.await {
                warn!("room {} actor failed: {}", id, e);
                let _ = hub_tx.send(HubCommand::RoomEmptied { room_id: id });
            }
        });
        self.rooms.insert(room_id.to_string(), handle.clone());
        info!("room {} created ({} open)", room_id, self.rooms.len());
        handle
    }
}

struct RoomActor {
    room: Room,
    outboxes: HashMap<ConnId, Outbox>,
    hub_tx: mpsc::UnboundedSender<HubCommand>,
    clock: Clock,
}

impl RoomActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RoomCommand>) {
        loop {
            let deadline = self.room.next_deadline().map(|ms| self.clock.instant_at(ms));
            let timer = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    debug!("room {}: {:?}", self.room.id(), cmd);
                    if !self.on_command(cmd) {
                        break;
                    }
                }
                _ = timer => {
                    let out = self.room.tick(self.clock.now());
                    self.deliver(out);
                }
            }
        }
        debug!("room {} actor stopped", self.room.id());
    }

    /// Returns false once the actor should stop.
    fn on_command(&mut self, cmd: RoomCommand) -> bool {
        let now = self.clock.now();
        match cmd {
            RoomCommand::Join {
                conn,
                player_id,
                character,
                outbox,
                handle,
                reply,
            } => match self.room.join(conn, &player_id, character, now) {
                Ok(out) => {
                    self.outboxes.insert(conn, outbox);
                    self.deliver(out);
                    let _ = reply.send(Ok(handle));
                }
                Err(err) => {
                    info!("room {}: join by {} rejected: {}", self.room.id(), player_id, err);
                    let _ = reply.send(Err(err));
                    self.report_if_empty();
                }
            },
            RoomCommand::Message { conn, msg } => {
                let out = self.room.handle(conn, msg, now);
                self.deliver(out);
                if !self.room.contains(conn) && self.outboxes.remove(&conn).is_some() {
                    self.report_if_empty();
                }
            }
            RoomCommand::Disconnect { conn } => {
                let out = self.room.disconnect(conn, now);
                self.outboxes.remove(&conn);
                self.deliver(out);
                self.report_if_empty();
            }
            RoomCommand::CloseIfEmpty { reply } => {
                let empty = self.room.is_empty();
                let _ = reply.send(empty);
                return !empty;
            }
        }
        true
    }

    fn deliver(&self, out: Vec<Envelope>) {
        for Envelope { to, msg } in out {
            match self.outboxes.get(&to) {
                Some(outbox) => {
                    if outbox.send(msg).is_err() {
                        debug!("room {}: outbox for {} closed", self.room.id(), to);
                    }
                }
                None => debug!("room {}: no outbox for {}", self.room.id(), to),
            }
        }
    }

    fn report_if_empty(&self) {
        if self.room.is_empty() {
            let _ = self.hub_tx.send(HubCommand::RoomEmptied {
                room_id: self.room.id().to_string(),
            });
        }
    }
}
