//! Client side of the match: drives a local [`Engine`] from server frames and
//! turns engine events into frames for the authority.

use std::time::Duration;

use log::{info, warn};

use crate::ability::Character;
use crate::board::Board;
use crate::config::GameRules;
use crate::engine::{Action, Engine, EngineEvent};
use crate::protocol::{ClientMessage, EndReason, ServerMessage};

/// Capped exponential delay between transport reconnect attempts.
#[derive(Clone, Debug)]
pub struct Backoff {
    attempt: u32,
    base_ms: u64,
    max_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempt: 0,
            base_ms: 1_000,
            max_ms: 30_000,
        }
    }
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            attempt: 0,
            base_ms,
            max_ms,
        }
    }

    /// Delay before the next attempt: `base * 2^(attempt - 1)`, capped.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let shift = (self.attempt - 1).min(32);
        let ms = self.base_ms.saturating_mul(1u64 << shift).min(self.max_ms);
        Duration::from_millis(ms)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientPhase {
    Lobby,
    Joined,
    Countdown { until: u64 },
    Playing,
    Ended,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpponentView {
    pub player_id: String,
    pub character: Character,
    pub board: Board,
    pub score: u32,
    pub level: u32,
    pub hp: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchResult {
    pub won: bool,
    pub reason: EndReason,
}

pub struct ClientBridge {
    engine: Engine,
    player_id: String,
    room_id: Option<String>,
    phase: ClientPhase,
    opponent: Option<OpponentView>,
    last_result: Option<MatchResult>,
}

impl ClientBridge {
    pub fn new(player_id: impl Into<String>, character: Character, rules: GameRules) -> Self {
        let player_id = player_id.into();
        Self {
            engine: Engine::new(player_id.clone(), character, rules),
            player_id,
            room_id: None,
            phase: ClientPhase::Lobby,
            opponent: None,
            last_result: None,
        }
    }

    pub fn with_engine(engine: Engine) -> Self {
        Self {
            player_id: engine.player().id.clone(),
            engine,
            room_id: None,
            phase: ClientPhase::Lobby,
            opponent: None,
            last_result: None,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn opponent(&self) -> Option<&OpponentView> {
        self.opponent.as_ref()
    }

    pub fn last_result(&self) -> Option<&MatchResult> {
        self.last_result.as_ref()
    }

    /// First frame after connecting. Rejoins the last room after a reconnect.
    pub fn join_message(&self, room_id: Option<String>) -> ClientMessage {
        ClientMessage::JoinRoom {
            player_id: self.player_id.clone(),
            room_id: self.room_id.clone().or(room_id),
            character: self.engine.player().character,
        }
    }

    /// Transport dropped. In-match state is not resumable.
    pub fn on_disconnect(&mut self) {
        self.engine.stop();
        self.opponent = None;
        self.phase = ClientPhase::Lobby;
    }

    pub fn on_server(&mut self, msg: ServerMessage, now: u64) -> Vec<ClientMessage> {
        match msg {
            ServerMessage::Joined { room, .. } => {
                info!("joined {} ({} players)", room.id, room.player_count);
                self.room_id = Some(room.id);
                self.phase = ClientPhase::Joined;
            }
            ServerMessage::PlayerJoined { player } => {
                info!("{} joined as {:?}", player.id, player.character);
            }
            ServerMessage::GameStart { countdown_ms, .. } => {
                self.engine.stop();
                self.opponent = None;
                self.phase = ClientPhase::Countdown {
                    until: now + countdown_ms,
                };
            }
            ServerMessage::OpponentUpdate {
                board,
                score,
                level,
                hp,
                player_id,
                character,
                ..
            } => {
                self.opponent = Some(OpponentView {
                    player_id,
                    character,
                    board,
                    score,
                    level,
                    hp,
                });
            }
            ServerMessage::Attack { lines, hp, .. } => {
                let events = self.engine.receive_attack(lines, Some(hp));
                return self.translate(events);
            }
            ServerMessage::AttackSent { hp, .. } => {
                if let Some(opponent) = self.opponent.as_mut() {
                    opponent.hp = hp;
                }
            }
            ServerMessage::SkillDeactivated { player_id, .. } => {
                if player_id == self.player_id {
                    self.engine.end_skill();
                }
            }
            ServerMessage::GameEnd { winner, reason, .. } => {
                self.engine.stop();
                self.phase = ClientPhase::Ended;
                let won = winner.as_deref() == Some(self.player_id.as_str());
                info!("match over: {} ({:?})", if won { "won" } else { "lost" }, reason);
                self.last_result = Some(MatchResult { won, reason });
            }
            ServerMessage::PlayerLeft { player_id, .. } => {
                info!("{} left", player_id);
                self.opponent = None;
            }
            ServerMessage::Error { message } => warn!("server error: {}", message),
            ServerMessage::PlayerReady { .. }
            | ServerMessage::SkillActivated { .. }
            | ServerMessage::RematchReady { .. } => {}
        }
        Vec::new()
    }

    /// Ends the local countdown and runs gravity and timers.
    pub fn tick(&mut self, now: u64) -> Vec<ClientMessage> {
        if let ClientPhase::Countdown { until } = self.phase {
            if now < until {
                return Vec::new();
            }
            self.engine.start(now);
            self.phase = ClientPhase::Playing;
        }
        if self.phase != ClientPhase::Playing {
            return Vec::new();
        }
        let events = self.engine.tick(now);
        self.translate(events)
    }

    pub fn act(&mut self, action: Action, now: u64) -> Vec<ClientMessage> {
        if self.phase != ClientPhase::Playing {
            return Vec::new();
        }
        let events = self.engine.apply(action, now);
        self.translate(events)
    }

    /// Attacks go out before the board snapshot, and top-out last.
    fn translate(&self, events: Vec<EngineEvent>) -> Vec<ClientMessage> {
        let mut out = Vec::new();
        let mut snapshot = false;
        let mut topped_out = false;
        for event in events {
            match event {
                EngineEvent::Locked { .. } => snapshot = true,
                EngineEvent::AttackSent(attack) => out.push(ClientMessage::LinesCleared {
                    lines: attack.lines,
                    attack_type: Some(attack.label),
                }),
                EngineEvent::SkillActivated { character, .. } => {
                    out.push(ClientMessage::SkillActivated {
                        character: Some(character),
                    });
                    snapshot = true;
                }
                EngineEvent::ToppedOut => topped_out = true,
                EngineEvent::GaugeReady | EngineEvent::SkillDeactivated { .. } => {}
            }
        }
        if snapshot {
            out.push(self.board_update());
        }
        if topped_out {
            out.push(ClientMessage::GameOver);
        }
        out
    }

    pub fn board_update(&self) -> ClientMessage {
        let player = self.engine.player();
        ClientMessage::BoardUpdate {
            board: self.engine.board().clone(),
            score: player.score,
            level: player.level,
            hp: Some(player.life),
            skill_gauge: Some(player.gauge.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use crate::board::{CELL_EMPTY, CELL_GARBAGE};
    use crate::piece::{Piece, Tetromino};
    use crate::protocol::RoomInfo;
    use crate::session::{ConnId, Envelope, MatchPhase, Room};
    use crate::{BOARD_HEIGHT, BOARD_WIDTH};

    fn bridge() -> ClientBridge {
        ClientBridge::with_engine(Engine::with_seed(
            "me",
            Character::HealLink,
            GameRules::default(),
            3,
        ))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        for _ in 0..100 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));
    }

    #[test]
    fn countdown_then_play() {
        let mut client = bridge();
        client.on_server(
            ServerMessage::Joined {
                player_id: "me".to_string(),
                room: RoomInfo {
                    id: "room_1".to_string(),
                    players: Vec::new(),
                    player_count: 1,
                },
            },
            0,
        );
        assert_eq!(client.room_id(), Some("room_1"));
        client.on_server(
            ServerMessage::GameStart {
                timestamp: 0,
                countdown_ms: 3_000,
            },
            100,
        );
        assert!(client.act(Action::HardDrop, 200).is_empty());
        assert!(client.tick(3_000).is_empty());
        assert_eq!(client.phase(), ClientPhase::Countdown { until: 3_100 });
        client.tick(3_100);
        assert_eq!(client.phase(), ClientPhase::Playing);

        let out = client.act(Action::HardDrop, 3_200);
        assert!(matches!(out.as_slice(), [ClientMessage::BoardUpdate { hp: Some(10), .. }]));
    }

    #[test]
    fn attack_frame_applies_garbage_and_life() {
        let mut client = bridge();
        client.on_server(
            ServerMessage::GameStart {
                timestamp: 0,
                countdown_ms: 0,
            },
            0,
        );
        client.tick(0);
        client.on_server(
            ServerMessage::Attack {
                lines: 2,
                from: "them".to_string(),
                attack_type: "Triple".to_string(),
                hp: 8,
            },
            10,
        );
        assert_eq!(client.engine().player().life, 8);
        assert_eq!(client.engine().board().max_height(), 2);
    }

    #[test]
    fn tetris_becomes_lines_cleared_then_snapshot() {
        let mut engine = Engine::with_seed("me", Character::Plain, GameRules::default(), 11);
        engine.start(0);
        let mut client = ClientBridge::with_engine(engine);
        client.phase = ClientPhase::Playing;
        let events = vec![
            EngineEvent::Locked {
                lines: 4,
                spin: false,
                score_delta: 800,
            },
            EngineEvent::AttackSent(crate::scoring::AttackEvent {
                lines: 4,
                label: "Tetris".to_string(),
                source: "me".to_string(),
            }),
            EngineEvent::ToppedOut,
        ];
        let out = client.translate(events);
        assert_eq!(out.len(), 3);
        assert_eq!(
            out[0],
            ClientMessage::LinesCleared {
                lines: 4,
                attack_type: Some("Tetris".to_string())
            }
        );
        assert!(matches!(out[1], ClientMessage::BoardUpdate { .. }));
        assert_eq!(out[2], ClientMessage::GameOver);
    }

    #[test]
    fn game_end_records_result_and_stops() {
        let mut client = bridge();
        client.on_server(
            ServerMessage::GameStart {
                timestamp: 0,
                countdown_ms: 0,
            },
            0,
        );
        client.tick(0);
        client.on_server(
            ServerMessage::GameEnd {
                winner: Some("me".to_string()),
                loser: Some("them".to_string()),
                reason: EndReason::Forfeit,
            },
            50,
        );
        assert_eq!(
            client.last_result(),
            Some(&MatchResult {
                won: true,
                reason: EndReason::Forfeit
            })
        );
        assert!(!client.engine().is_active());
        assert!(client.tick(10_000).is_empty());
    }

    /// Routes room output to the clients and their replies back to the room
    /// until nothing is left in flight. Connection `n` is `clients[n - 1]`.
    fn pump(
        room: &mut Room,
        clients: &mut [ClientBridge; 2],
        first: Vec<Envelope>,
        sent: Vec<(ConnId, ClientMessage)>,
        now: u64,
    ) {
        let mut inbound: VecDeque<Envelope> = first.into();
        let mut outbound: VecDeque<(ConnId, ClientMessage)> = sent.into();
        while !inbound.is_empty() || !outbound.is_empty() {
            while let Some(Envelope { to, msg }) = inbound.pop_front() {
                let replies = clients[to as usize - 1].on_server(msg, now);
                outbound.extend(replies.into_iter().map(|reply| (to, reply)));
            }
            if let Some((conn, msg)) = outbound.pop_front() {
                inbound.extend(room.handle(conn, msg, now));
            }
        }
    }

    fn plain(player_id: &str, seed: u64) -> ClientBridge {
        let engine = Engine::with_seed(player_id, Character::Plain, GameRules::default(), seed);
        ClientBridge::with_engine(engine)
    }

    /// Rows `from..BOARD_HEIGHT` filled except column 0.
    fn well(from: usize) -> Board {
        let mut board = Board::new();
        for y in from..BOARD_HEIGHT {
            for x in 1..BOARD_WIDTH {
                board.set_cell(y as i32, x as i32, CELL_GARBAGE);
            }
        }
        board
    }

    fn vertical_i() -> Piece {
        let mut piece = Piece::spawn(Tetromino::I);
        piece.shape = piece.shape.rotated_cw();
        piece.x = 0;
        piece
    }

    /// The first client drops a vertical I into a well and everything it
    /// sends is played through the room.
    fn drop_into_well(room: &mut Room, clients: &mut [ClientBridge; 2], from: usize, now: u64) {
        clients[0].engine.load(well(from), vertical_i());
        let sent = clients[0].act(Action::HardDrop, now);
        let sent = sent.into_iter().map(|msg| (1, msg)).collect();
        pump(room, clients, Vec::new(), sent, now);
    }

    #[test]
    fn locks_drive_the_opponent_to_zero_through_the_room() {
        let rules = GameRules::default();
        let mut room = Room::new("r1", rules.clone());
        let mut clients = [plain("alice", 5), plain("bob", 9)];
        let out = room.join(1, "alice", Character::Plain, 0).unwrap();
        pump(&mut room, &mut clients, out, Vec::new(), 0);
        let out = room.join(2, "bob", Character::Plain, 0).unwrap();
        pump(&mut room, &mut clients, out, Vec::new(), 0);
        let ready = vec![(1, ClientMessage::Ready), (2, ClientMessage::Ready)];
        pump(&mut room, &mut clients, Vec::new(), ready, 0);
        assert_eq!(room.phase(), MatchPhase::Countdown);

        let start = rules.countdown_ms;
        let out = room.tick(start);
        pump(&mut room, &mut clients, out, Vec::new(), start);
        for client in clients.iter_mut() {
            client.tick(start);
            assert_eq!(client.phase(), ClientPhase::Playing);
        }
        assert_eq!(room.phase(), MatchPhase::InProgress);

        // tetris: 4
        drop_into_well(&mut room, &mut clients, 16, start + 100);
        assert_eq!(clients[1].engine().player().life, 6);
        assert_eq!(room.player(2).map(|p| p.life), Some(6));
        let board = clients[1].engine().board();
        let hole = (0..BOARD_WIDTH)
            .find(|&x| board.cell(BOARD_HEIGHT - 1, x) == CELL_EMPTY)
            .unwrap();
        for y in BOARD_HEIGHT - 4..BOARD_HEIGHT {
            for x in 0..BOARD_WIDTH {
                let expected = if x == hole { CELL_EMPTY } else { CELL_GARBAGE };
                assert_eq!(board.cell(y, x), expected);
            }
        }
        assert_eq!(clients[1].opponent().map(|o| o.player_id.as_str()), Some("alice"));

        // back-to-back tetris: 4 + 1
        drop_into_well(&mut room, &mut clients, 16, start + 200);
        assert_eq!(clients[1].engine().player().life, 1);
        assert_eq!(room.player(2).map(|p| p.life), Some(1));

        // double on the same chain: 1 + 1 + 1
        drop_into_well(&mut room, &mut clients, 18, start + 300);
        assert_eq!(clients[1].engine().player().life, 0);
        assert_eq!(room.phase(), MatchPhase::Ended);
        assert_eq!(clients[1].phase(), ClientPhase::Ended);
        assert_eq!(
            clients[1].last_result(),
            Some(&MatchResult {
                won: false,
                reason: EndReason::Knockout
            })
        );
        assert!(clients[0].last_result().is_some_and(|r| r.won));
    }
}

