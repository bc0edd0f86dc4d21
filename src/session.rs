use std::collections::HashSet;

use log::{debug, info, warn};

use crate::ability::{self, Character, Gauge};
use crate::board::Board;
use crate::config::GameRules;
use crate::error::SessionError;
use crate::player::PlayerState;
use crate::protocol::{ClientMessage, EndReason, PlayerSummary, RoomInfo, ServerMessage};
use crate::schedule::Scheduler;
use crate::BOARD_HEIGHT;

pub type ConnId = u64;

pub const ROOM_CAPACITY: usize = 2;

/// Outgoing frame addressed to one connection.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub to: ConnId,
    pub msg: ServerMessage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchPhase {
    Empty,
    Waiting,
    ReadyCheck,
    Countdown,
    InProgress,
    Ended,
    RematchPending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RoomEffect {
    CountdownEnd { round: u64 },
    SkillExpiry { conn: ConnId, generation: u64 },
}

struct Occupant {
    conn: ConnId,
    ready: bool,
    state: PlayerState,
    board: Board,
}

impl Occupant {
    fn summary(&self) -> PlayerSummary {
        PlayerSummary {
            id: self.state.id.clone(),
            ready: self.ready,
            character: self.state.character,
        }
    }
}

/// Authoritative state of one match. Pure: every call takes the current time
/// and returns the frames to deliver, and nothing else leaves the room.
pub struct Room {
    id: String,
    rules: GameRules,
    occupants: Vec<Occupant>,
    phase: MatchPhase,
    rematch: HashSet<ConnId>,
    schedule: Scheduler<RoomEffect>,
    round: u64,
}

impl Room {
    pub fn new(id: impl Into<String>, rules: GameRules) -> Self {
        Self {
            id: id.into(),
            rules,
            occupants: Vec::with_capacity(ROOM_CAPACITY),
            phase: MatchPhase::Empty,
            rematch: HashSet::new(),
            schedule: Scheduler::new(),
            round: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn player_count(&self) -> usize {
        self.occupants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occupants.is_empty()
    }

    pub fn contains(&self, conn: ConnId) -> bool {
        self.index_of(conn).is_some()
    }

    pub fn player(&self, conn: ConnId) -> Option<&PlayerState> {
        self.index_of(conn).map(|i| &self.occupants[i].state)
    }

    pub fn player_by_id(&self, player_id: &str) -> Option<&PlayerState> {
        self.occupants
            .iter()
            .find(|o| o.state.id == player_id)
            .map(|o| &o.state)
    }

    /// When the room next needs a `tick`.
    pub fn next_deadline(&self) -> Option<u64> {
        self.schedule.next_deadline()
    }

    fn index_of(&self, conn: ConnId) -> Option<usize> {
        self.occupants.iter().position(|o| o.conn == conn)
    }

    fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id.clone(),
            players: self.occupants.iter().map(Occupant::summary).collect(),
            player_count: self.occupants.len(),
        }
    }

    pub fn join(
        &mut self,
        conn: ConnId,
        player_id: &str,
        character: Character,
        now: u64,
    ) -> Result<Vec<Envelope>, SessionError> {
        let mut out = self.tick(now);
        if player_id.is_empty() {
            return Err(SessionError::EmptyPlayerId);
        }
        if self.contains(conn) {
            return Err(SessionError::AlreadyJoined(self.id.clone()));
        }
        if self.occupants.len() >= ROOM_CAPACITY {
            return Err(SessionError::RoomFull(self.id.clone()));
        }
        if self.player_by_id(player_id).is_some() {
            return Err(SessionError::DuplicatePlayer {
                room: self.id.clone(),
                player: player_id.to_string(),
            });
        }

        let occupant = Occupant {
            conn,
            ready: false,
            state: PlayerState::new(player_id, character, &self.rules),
            board: Board::new(),
        };
        let joined = occupant.summary();
        for o in &self.occupants {
            out.push(Envelope {
                to: o.conn,
                msg: ServerMessage::PlayerJoined {
                    player: joined.clone(),
                },
            });
        }
        self.occupants.push(occupant);

        if self.occupants.len() == ROOM_CAPACITY {
            for o in &mut self.occupants {
                o.ready = false;
            }
            self.rematch.clear();
            self.phase = MatchPhase::ReadyCheck;
        } else {
            self.phase = MatchPhase::Waiting;
        }
        info!(
            "room {}: {} joined ({}/{})",
            self.id,
            player_id,
            self.occupants.len(),
            ROOM_CAPACITY
        );

        out.push(Envelope {
            to: conn,
            msg: ServerMessage::Joined {
                player_id: player_id.to_string(),
                room: self.info(),
            },
        });
        Ok(out)
    }

    /// Processes one frame from `conn`. Frames that do not fit the current
    /// phase are dropped.
    pub fn handle(&mut self, conn: ConnId, msg: ClientMessage, now: u64) -> Vec<Envelope> {
        let mut out = self.tick(now);
        let Some(idx) = self.index_of(conn) else {
            warn!("room {}: frame from unknown connection {}", self.id, conn);
            return out;
        };

        match msg {
            ClientMessage::JoinRoom { .. } => {
                self.send(
                    &mut out,
                    idx,
                    ServerMessage::error(SessionError::AlreadyJoined(self.id.clone())),
                );
            }
            ClientMessage::Ready => match self.phase {
                MatchPhase::Ended | MatchPhase::RematchPending => {
                    self.rematch_ready(&mut out, idx, now)
                }
                MatchPhase::Waiting | MatchPhase::ReadyCheck => self.ready(&mut out, idx, now),
                phase => debug!("room {}: ready ignored in {:?}", self.id, phase),
            },
            ClientMessage::RematchReady => match self.phase {
                MatchPhase::Ended | MatchPhase::RematchPending => {
                    self.rematch_ready(&mut out, idx, now)
                }
                phase => debug!("room {}: rematchReady ignored in {:?}", self.id, phase),
            },
            ClientMessage::BoardUpdate {
                board,
                score,
                level,
                hp,
                skill_gauge,
            } => {
                if matches!(self.phase, MatchPhase::Countdown | MatchPhase::InProgress) {
                    self.board_update(&mut out, idx, board, score, level, hp, skill_gauge);
                } else {
                    debug!("room {}: boardUpdate ignored in {:?}", self.id, self.phase);
                }
            }
            ClientMessage::LinesCleared { lines, attack_type } => {
                if self.phase == MatchPhase::InProgress {
                    self.lines_cleared(&mut out, idx, lines, attack_type);
                } else {
                    debug!("room {}: attack ignored in {:?}", self.id, self.phase);
                }
            }
            ClientMessage::SkillActivated { .. } => {
                if self.phase == MatchPhase::InProgress {
                    self.skill_activated(&mut out, idx, now);
                }
            }
            ClientMessage::GameOver => {
                if self.phase == MatchPhase::InProgress {
                    let winner = self.opponent_of(idx);
                    self.end(&mut out, winner, Some(idx), EndReason::TopOut);
                }
            }
            ClientMessage::LeaveRoom => {
                out.extend(self.disconnect(conn, now));
            }
        }
        out
    }

    /// Removes `conn` from the room. Leaving mid-match forfeits it.
    pub fn disconnect(&mut self, conn: ConnId, now: u64) -> Vec<Envelope> {
        let mut out = self.tick(now);
        let Some(idx) = self.index_of(conn) else {
            return out;
        };
        let gone = self.occupants.remove(idx);
        self.schedule.retain(|e| match e {
            RoomEffect::SkillExpiry { conn: c, .. } => *c != conn,
            RoomEffect::CountdownEnd { .. } => true,
        });
        self.rematch.remove(&conn);
        info!("room {}: {} left", self.id, gone.state.id);

        let left = ServerMessage::PlayerLeft {
            player_id: gone.state.id.clone(),
            player_count: self.occupants.len(),
        };
        self.broadcast(&mut out, left);

        if self.occupants.is_empty() {
            self.phase = MatchPhase::Empty;
            self.schedule.clear();
            return out;
        }

        match self.phase {
            MatchPhase::Countdown | MatchPhase::InProgress => {
                let winner = &self.occupants[0];
                let msg = ServerMessage::GameEnd {
                    winner: Some(winner.state.id.clone()),
                    loser: Some(gone.state.id),
                    reason: EndReason::Forfeit,
                };
                info!("room {}: {} wins by forfeit", self.id, winner.state.id);
                self.finish(&mut out, msg);
            }
            MatchPhase::Ended | MatchPhase::RematchPending => {
                self.phase = MatchPhase::Ended;
                self.rematch.clear();
            }
            _ => {
                for o in &mut self.occupants {
                    o.ready = false;
                }
                self.phase = MatchPhase::Waiting;
            }
        }
        out
    }

    /// Fires due timers: countdown completion and skill expiry.
    pub fn tick(&mut self, now: u64) -> Vec<Envelope> {
        let mut out = Vec::new();
        for effect in self.schedule.due(now) {
            match effect {
                RoomEffect::CountdownEnd { round } => {
                    if self.phase == MatchPhase::Countdown && round == self.round {
                        self.phase = MatchPhase::InProgress;
                        info!("room {}: round {} in progress", self.id, round);
                    }
                }
                RoomEffect::SkillExpiry { conn, generation } => {
                    let Some(idx) = self.index_of(conn) else {
                        continue;
                    };
                    let state = &mut self.occupants[idx].state;
                    if ability::expire(&mut state.ability, generation) {
                        let msg = ServerMessage::SkillDeactivated {
                            player_id: state.id.clone(),
                            character: state.character,
                        };
                        self.broadcast(&mut out, msg);
                    }
                }
            }
        }
        out
    }

    fn ready(&mut self, out: &mut Vec<Envelope>, idx: usize, now: u64) {
        self.occupants[idx].ready = true;
        let msg = ServerMessage::PlayerReady {
            player_id: self.occupants[idx].state.id.clone(),
        };
        self.broadcast(out, msg);
        if self.occupants.len() == ROOM_CAPACITY && self.occupants.iter().all(|o| o.ready) {
            self.start_countdown(out, now);
        }
    }

    fn rematch_ready(&mut self, out: &mut Vec<Envelope>, idx: usize, now: u64) {
        let conn = self.occupants[idx].conn;
        self.rematch.insert(conn);
        self.phase = MatchPhase::RematchPending;
        let msg = ServerMessage::RematchReady {
            player_id: self.occupants[idx].state.id.clone(),
        };
        self.broadcast(out, msg);
        if self.occupants.len() == ROOM_CAPACITY
            && self.occupants.iter().all(|o| self.rematch.contains(&o.conn))
        {
            self.start_countdown(out, now);
        }
    }

    fn start_countdown(&mut self, out: &mut Vec<Envelope>, now: u64) {
        for o in &mut self.occupants {
            o.state.reset(&self.rules);
            o.board = Board::new();
            o.ready = false;
        }
        self.rematch.clear();
        self.schedule.clear();
        self.round += 1;
        if self.rules.countdown_ms == 0 {
            self.phase = MatchPhase::InProgress;
        } else {
            self.phase = MatchPhase::Countdown;
            self.schedule.schedule(
                now + self.rules.countdown_ms,
                RoomEffect::CountdownEnd { round: self.round },
            );
        }
        info!("room {}: round {} starting", self.id, self.round);
        self.broadcast(
            out,
            ServerMessage::GameStart {
                timestamp: now,
                countdown_ms: self.rules.countdown_ms,
            },
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn board_update(
        &mut self,
        out: &mut Vec<Envelope>,
        idx: usize,
        board: Board,
        score: u32,
        level: u32,
        hp: Option<u32>,
        skill_gauge: Option<u32>,
    ) {
        let max_life = self.rules.max_life;
        let gauge_max = self.rules.gauge_max;
        let trust_life = self.rules.trust_client_life;
        let o = &mut self.occupants[idx];
        o.board = board;
        o.state.score = score;
        o.state.level = level;
        if trust_life {
            if let Some(hp) = hp {
                o.state.life = hp.min(max_life);
            }
        }
        if let Some(value) = skill_gauge {
            let value = value.min(gauge_max);
            o.state.gauge = Gauge {
                value,
                ready: value >= gauge_max,
            };
        }
        let msg = ServerMessage::OpponentUpdate {
            board: o.board.clone(),
            score,
            level,
            hp: o.state.life,
            skill_gauge: o.state.gauge.value,
            player_id: o.state.id.clone(),
            character: o.state.character,
        };
        if let Some(other) = self.opponent_of(idx) {
            self.send(out, other, msg);
        }
    }

    fn lines_cleared(
        &mut self,
        out: &mut Vec<Envelope>,
        idx: usize,
        lines: u32,
        attack_type: Option<String>,
    ) {
        if lines == 0 {
            return;
        }
        let Some(def) = self.opponent_of(idx) else {
            return;
        };
        // nothing larger than a full board of garbage is meaningful
        let cap = BOARD_HEIGHT as u32;
        if lines > cap {
            warn!("room {}: clamping reported attack of {} lines", self.id, lines);
        }
        let attacker = &self.occupants[idx].state;
        let sent = ability::amplify_attack(
            attacker.character,
            &attacker.ability,
            lines.min(cap),
            &self.rules,
        )
        .min(cap);
        let attacker_id = attacker.id.clone();

        let defender = &mut self.occupants[def].state;
        let outcome = ability::resolve_incoming(
            defender.character,
            &mut defender.ability,
            defender.life,
            sent,
            &self.rules,
        );
        defender.life = outcome.life;
        let defender_alive = defender.is_alive();
        let defender_id = defender.id.clone();
        let defender_character = defender.character;
        debug!(
            "room {}: {} -> {}: {} sent, {} applied, life {}",
            self.id, attacker_id, defender_id, sent, outcome.damage, outcome.life
        );

        let label = attack_type.unwrap_or_else(|| "ATTACK".to_string());
        self.send(
            out,
            def,
            ServerMessage::Attack {
                lines: outcome.damage,
                from: attacker_id.clone(),
                attack_type: label.clone(),
                hp: outcome.life,
            },
        );
        self.send(
            out,
            idx,
            ServerMessage::AttackSent {
                lines: outcome.damage,
                to: defender_id.clone(),
                attack_type: label,
                hp: outcome.life,
            },
        );
        if outcome.ability_ended {
            self.broadcast(
                out,
                ServerMessage::SkillDeactivated {
                    player_id: defender_id,
                    character: defender_character,
                },
            );
        }
        if !defender_alive {
            self.end(out, Some(idx), Some(def), EndReason::Knockout);
        }
    }

    fn skill_activated(&mut self, out: &mut Vec<Envelope>, idx: usize, now: u64) {
        let gauge_max = self.rules.gauge_max;
        let conn = self.occupants[idx].conn;
        let state = &mut self.occupants[idx].state;
        // the client spends its own gauge; the authority only tracks the effect
        state.gauge = Gauge {
            value: gauge_max,
            ready: true,
        };
        let Some(activation) = ability::activate(
            state.character,
            &mut state.gauge,
            &mut state.ability,
            &mut state.life,
            &self.rules,
        ) else {
            return;
        };
        let msg = ServerMessage::SkillActivated {
            player_id: state.id.clone(),
            character: state.character,
        };
        self.schedule.schedule(
            now + self.rules.skill_duration_ms,
            RoomEffect::SkillExpiry {
                conn,
                generation: activation.generation,
            },
        );
        self.broadcast(out, msg);
    }

    fn end(
        &mut self,
        out: &mut Vec<Envelope>,
        winner: Option<usize>,
        loser: Option<usize>,
        reason: EndReason,
    ) {
        let name = |i: Option<usize>| i.map(|i| self.occupants[i].state.id.clone());
        let msg = ServerMessage::GameEnd {
            winner: name(winner),
            loser: name(loser),
            reason,
        };
        info!("room {}: round {} over ({:?})", self.id, self.round, reason);
        self.finish(out, msg);
    }

    fn finish(&mut self, out: &mut Vec<Envelope>, msg: ServerMessage) {
        self.phase = MatchPhase::Ended;
        self.schedule.clear();
        self.rematch.clear();
        for o in &mut self.occupants {
            o.ready = false;
            o.state.ability.active = false;
        }
        self.broadcast(out, msg);
    }

    fn opponent_of(&self, idx: usize) -> Option<usize> {
        (0..self.occupants.len()).find(|&i| i != idx)
    }

    fn send(&self, out: &mut Vec<Envelope>, idx: usize, msg: ServerMessage) {
        out.push(Envelope {
            to: self.occupants[idx].conn,
            msg,
        });
    }

    fn broadcast(&self, out: &mut Vec<Envelope>, msg: ServerMessage) {
        for o in &self.occupants {
            out.push(Envelope {
                to: o.conn,
                msg: msg.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ConnId = 1;
    const B: ConnId = 2;

    fn room_with(a: Character, b: Character) -> Room {
        let mut room = Room::new("r1", GameRules::default());
        room.join(A, "alice", a, 0).unwrap();
        room.join(B, "bob", b, 0).unwrap();
        room
    }

    fn live_room(a: Character, b: Character) -> Room {
        let mut room = room_with(a, b);
        room.handle(A, ClientMessage::Ready, 0);
        room.handle(B, ClientMessage::Ready, 10);
        room.tick(3_010);
        assert_eq!(room.phase(), MatchPhase::InProgress);
        room
    }

    fn attack(lines: u32) -> ClientMessage {
        ClientMessage::LinesCleared {
            lines,
            attack_type: Some("Tetris".to_string()),
        }
    }

    fn to(out: &[Envelope], conn: ConnId) -> Vec<&ServerMessage> {
        out.iter().filter(|e| e.to == conn).map(|e| &e.msg).collect()
    }

    #[test]
    fn join_fills_then_rejects() {
        let mut room = Room::new("r1", GameRules::default());
        let out = room.join(A, "alice", Character::HealLink, 0).unwrap();
        assert_eq!(room.phase(), MatchPhase::Waiting);
        assert!(matches!(
            to(&out, A)[0],
            ServerMessage::Joined { room, .. } if room.player_count == 1
        ));

        let out = room.join(B, "bob", Character::DownBarrier, 0).unwrap();
        assert_eq!(room.phase(), MatchPhase::ReadyCheck);
        assert!(matches!(
            to(&out, A)[0],
            ServerMessage::PlayerJoined { player } if player.id == "bob"
        ));
        assert!(matches!(
            to(&out, B)[0],
            ServerMessage::Joined { room, .. } if room.players.len() == 2
        ));

        assert_eq!(
            room.join(3, "carol", Character::Plain, 0),
            Err(SessionError::RoomFull("r1".to_string()))
        );
    }

    #[test]
    fn duplicate_and_empty_ids_are_rejected() {
        let mut room = Room::new("r1", GameRules::default());
        room.join(A, "alice", Character::Plain, 0).unwrap();
        assert!(matches!(
            room.join(B, "alice", Character::Plain, 0),
            Err(SessionError::DuplicatePlayer { .. })
        ));
        assert_eq!(
            room.join(B, "", Character::Plain, 0),
            Err(SessionError::EmptyPlayerId)
        );
        assert_eq!(room.player_count(), 1);
    }

    #[test]
    fn both_ready_starts_countdown_then_match() {
        let mut room = room_with(Character::Plain, Character::Plain);
        let out = room.handle(A, ClientMessage::Ready, 0);
        assert_eq!(out.len(), 2);
        assert_eq!(room.phase(), MatchPhase::ReadyCheck);

        let out = room.handle(B, ClientMessage::Ready, 100);
        assert_eq!(room.phase(), MatchPhase::Countdown);
        assert!(to(&out, A).contains(&&ServerMessage::GameStart {
            timestamp: 100,
            countdown_ms: 3_000
        }));
        assert_eq!(room.next_deadline(), Some(3_100));

        // attacks during the countdown are dropped
        room.handle(A, attack(4), 200);
        assert_eq!(room.player(B).map(|p| p.life), Some(10));

        room.tick(3_100);
        assert_eq!(room.phase(), MatchPhase::InProgress);
    }

    #[test]
    fn countdown_advances_lazily_on_next_frame() {
        let mut room = room_with(Character::Plain, Character::Plain);
        room.handle(A, ClientMessage::Ready, 0);
        room.handle(B, ClientMessage::Ready, 0);
        let out = room.handle(A, attack(2), 3_000);
        assert_eq!(room.phase(), MatchPhase::InProgress);
        assert_eq!(room.player(B).map(|p| p.life), Some(8));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn three_attacks_knock_out_the_defender() {
        let mut room = live_room(Character::Plain, Character::Plain);

        let out = room.handle(A, attack(4), 4_000);
        assert_eq!(
            to(&out, B),
            vec![&ServerMessage::Attack {
                lines: 4,
                from: "alice".to_string(),
                attack_type: "Tetris".to_string(),
                hp: 6
            }]
        );
        assert!(matches!(
            to(&out, A)[0],
            ServerMessage::AttackSent { lines: 4, hp: 6, .. }
        ));

        room.handle(A, attack(5), 5_000);
        assert_eq!(room.player(B).map(|p| p.life), Some(1));

        let out = room.handle(A, attack(1), 6_000);
        assert_eq!(room.player(B).map(|p| p.life), Some(0));
        assert_eq!(room.phase(), MatchPhase::Ended);
        assert!(to(&out, B).contains(&&ServerMessage::GameEnd {
            winner: Some("alice".to_string()),
            loser: Some("bob".to_string()),
            reason: EndReason::Knockout
        }));
    }

    #[test]
    fn amplified_attack_and_mitigated_defence() {
        let mut room = live_room(Character::ChainBoost, Character::DownBarrier);
        room.handle(A, ClientMessage::SkillActivated { character: None }, 4_000);
        room.handle(B, ClientMessage::SkillActivated { character: None }, 4_000);
        // 4 * 1.5 = 6, life 10 is above the mitigation threshold
        room.handle(A, attack(4), 4_100);
        assert_eq!(room.player(B).map(|p| p.life), Some(4));
        // ceil(2 * 1.5) = 3, then ceil(3 * 0.8) = 3
        room.handle(A, attack(2), 4_200);
        assert_eq!(room.player(B).map(|p| p.life), Some(1));
    }

    #[test]
    fn lethal_hit_is_negated_once_and_ends_the_skill() {
        let mut room = live_room(Character::Plain, Character::ChainBoost);
        room.handle(B, ClientMessage::SkillActivated { character: None }, 4_000);
        room.handle(A, attack(9), 4_100);
        assert_eq!(room.player(B).map(|p| p.life), Some(1));

        let out = room.handle(A, attack(3), 4_200);
        assert_eq!(room.player(B).map(|p| p.life), Some(1));
        assert!(to(&out, A).contains(&&ServerMessage::SkillDeactivated {
            player_id: "bob".to_string(),
            character: Character::ChainBoost
        }));

        room.handle(A, attack(1), 4_300);
        assert_eq!(room.phase(), MatchPhase::Ended);
    }

    #[test]
    fn oversized_attack_is_clamped_to_the_board() {
        let mut room = live_room(Character::ChainBoost, Character::DownBarrier);
        room.handle(A, ClientMessage::SkillActivated { character: None }, 4_000);
        room.handle(B, ClientMessage::SkillActivated { character: None }, 4_000);
        let out = room.handle(
            A,
            ClientMessage::LinesCleared {
                lines: u32::MAX,
                attack_type: None,
            },
            4_100,
        );
        assert!(to(&out, B).contains(&&ServerMessage::Attack {
            lines: BOARD_HEIGHT as u32,
            from: "alice".to_string(),
            attack_type: "ATTACK".to_string(),
            hp: 0
        }));
        assert_eq!(room.phase(), MatchPhase::Ended);
        assert!(room.contains(A) && room.contains(B));
    }

    #[test]
    fn skill_expires_through_the_schedule() {
        let mut room = live_room(Character::HealLink, Character::Plain);
        room.handle(B, attack(6), 3_500);
        assert_eq!(room.player(A).map(|p| p.life), Some(7));

        let out = room.handle(A, ClientMessage::SkillActivated { character: None }, 4_000);
        assert_eq!(to(&out, B).len(), 1);
        assert_eq!(room.player(A).map(|p| p.life), Some(10));
        assert_eq!(room.next_deadline(), Some(9_000));

        let out = room.tick(9_000);
        assert_eq!(out.len(), 2);
        assert!(!room.player(A).map(|p| p.ability.active).unwrap_or(true));
    }

    #[test]
    fn board_update_is_relayed_to_the_opponent() {
        let mut room = live_room(Character::Plain, Character::DownBarrier);
        let mut board = Board::new();
        board.set_cell(19, 0, 3);
        let out = room.handle(
            B,
            ClientMessage::BoardUpdate {
                board: board.clone(),
                score: 400,
                level: 1,
                hp: Some(7),
                skill_gauge: Some(12),
            },
            4_000,
        );
        assert_eq!(
            out,
            vec![Envelope {
                to: A,
                msg: ServerMessage::OpponentUpdate {
                    board,
                    score: 400,
                    level: 1,
                    hp: 7,
                    skill_gauge: 10,
                    player_id: "bob".to_string(),
                    character: Character::DownBarrier,
                }
            }]
        );
        assert_eq!(room.player(B).map(|p| p.life), Some(7));
    }

    #[test]
    fn untrusted_life_is_not_taken_from_updates() {
        let rules = GameRules {
            trust_client_life: false,
            ..GameRules::default()
        };
        let mut room = Room::new("r1", rules);
        room.join(A, "alice", Character::Plain, 0).unwrap();
        room.join(B, "bob", Character::Plain, 0).unwrap();
        room.handle(A, ClientMessage::Ready, 0);
        room.handle(B, ClientMessage::Ready, 0);
        room.tick(3_000);
        room.handle(
            B,
            ClientMessage::BoardUpdate {
                board: Board::new(),
                score: 0,
                level: 1,
                hp: Some(99),
                skill_gauge: None,
            },
            3_500,
        );
        assert_eq!(room.player(B).map(|p| p.life), Some(10));
    }

    #[test]
    fn disconnect_mid_match_is_a_forfeit() {
        let mut room = live_room(Character::Plain, Character::Plain);
        let out = room.disconnect(B, 5_000);
        assert_eq!(room.phase(), MatchPhase::Ended);
        assert_eq!(
            to(&out, A),
            vec![
                &ServerMessage::PlayerLeft {
                    player_id: "bob".to_string(),
                    player_count: 1
                },
                &ServerMessage::GameEnd {
                    winner: Some("alice".to_string()),
                    loser: Some("bob".to_string()),
                    reason: EndReason::Forfeit
                }
            ]
        );

        // a newcomer replaces the departed side
        room.join(3, "carol", Character::Plain, 6_000).unwrap();
        assert_eq!(room.phase(), MatchPhase::ReadyCheck);

        room.disconnect(A, 7_000);
        room.disconnect(3, 7_000);
        assert!(room.is_empty());
        assert_eq!(room.phase(), MatchPhase::Empty);
    }

    #[test]
    fn disconnect_before_start_vacates_the_slot() {
        let mut room = room_with(Character::Plain, Character::Plain);
        room.handle(A, ClientMessage::Ready, 0);
        let out = room.disconnect(B, 10);
        assert_eq!(room.phase(), MatchPhase::Waiting);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn rematch_needs_both_sides() {
        let mut room = live_room(Character::Plain, Character::Plain);
        room.handle(A, ClientMessage::GameOver, 4_000);
        assert_eq!(room.phase(), MatchPhase::Ended);

        room.handle(A, ClientMessage::RematchReady, 5_000);
        assert_eq!(room.phase(), MatchPhase::RematchPending);
        // the play-again button sends a plain ready
        let out = room.handle(B, ClientMessage::Ready, 5_100);
        assert_eq!(room.phase(), MatchPhase::Countdown);
        assert!(to(&out, B).iter().any(|m| matches!(m, ServerMessage::GameStart { .. })));
        assert_eq!(room.player(B).map(|p| p.life), Some(10));
    }

    #[test]
    fn leave_room_frame_acts_as_disconnect() {
        let mut room = room_with(Character::Plain, Character::Plain);
        room.handle(B, ClientMessage::LeaveRoom, 0);
        assert!(!room.contains(B));
        assert_eq!(room.player_count(), 1);
    }
}
