use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::ability::{self, Character};
use crate::board::Board;
use crate::clear::{is_lock_out, resolve_lock};
use crate::config::GameRules;
use crate::piece::{Piece, Tetromino};
use crate::player::PlayerState;
use crate::schedule::Scheduler;
use crate::scoring::{score_clear, AttackEvent};
use crate::{BOARD_HEIGHT, BOARD_WIDTH};

/// Discrete player inputs. Each one is applied atomically.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    MoveLeft,
    MoveRight,
    SoftDrop,
    HardDrop,
    Rotate,
    Hold,
    ActivateSkill,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    Locked {
        lines: u32,
        spin: bool,
        score_delta: u32,
    },
    AttackSent(AttackEvent),
    GaugeReady,
    SkillActivated {
        character: Character,
        purged: usize,
        healed: u32,
    },
    SkillDeactivated {
        character: Character,
    },
    ToppedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Effect {
    SkillExpiry { generation: u64 },
}

/// One player's deterministic game. The host feeds it actions and clock
/// ticks, and forwards the returned events.
pub struct Engine {
    rules: GameRules,
    rng: StdRng,
    board: Board,
    current: Piece,
    next: Tetromino,
    held: Option<Piece>,
    hold_used: bool,
    player: PlayerState,
    schedule: Scheduler<Effect>,
    active: bool,
    topped_out: bool,
    last_drop: u64,
}

impl Engine {
    pub fn new(player_id: impl Into<String>, character: Character, rules: GameRules) -> Self {
        Self::from_rng(player_id, character, rules, StdRng::from_entropy())
    }

    pub fn with_seed(
        player_id: impl Into<String>,
        character: Character,
        rules: GameRules,
        seed: u64,
    ) -> Self {
        Self::from_rng(player_id, character, rules, StdRng::seed_from_u64(seed))
    }

    fn from_rng(
        player_id: impl Into<String>,
        character: Character,
        rules: GameRules,
        mut rng: StdRng,
    ) -> Self {
        let current = Piece::spawn(Tetromino::random(&mut rng));
        let next = Tetromino::random(&mut rng);
        let player = PlayerState::new(player_id, character, &rules);
        Self {
            rules,
            rng,
            board: Board::new(),
            current,
            next,
            held: None,
            hold_used: false,
            player,
            schedule: Scheduler::new(),
            active: false,
            topped_out: false,
            last_drop: 0,
        }
    }

    /// Fresh board and player values, then input and gravity are unblocked.
    pub fn start(&mut self, now: u64) {
        self.board = Board::new();
        self.player.reset(&self.rules);
        self.schedule.clear();
        self.held = None;
        self.hold_used = false;
        self.topped_out = false;
        self.next = Tetromino::random(&mut self.rng);
        self.active = true;
        self.spawn(now);
    }

    /// Halts the game. Pending effects are dropped and never fire.
    pub fn stop(&mut self) {
        self.active = false;
        self.schedule.clear();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_topped_out(&self) -> bool {
        self.topped_out
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn player(&self) -> &PlayerState {
        &self.player
    }

    pub fn current(&self) -> &Piece {
        &self.current
    }

    pub fn next_piece(&self) -> Tetromino {
        self.next
    }

    pub fn held(&self) -> Option<&Piece> {
        self.held.as_ref()
    }

    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    /// Where the current piece would land on a hard drop.
    pub fn ghost(&self) -> Piece {
        self.current.dropped(&self.board)
    }

    /// Earliest time at which `tick` has something to do.
    pub fn next_deadline(&self) -> Option<u64> {
        if !self.active {
            return None;
        }
        let gravity = self.last_drop + self.player.drop_interval_ms;
        Some(match self.schedule.next_deadline() {
            Some(at) => at.min(gravity),
            None => gravity,
        })
    }

    pub fn apply(&mut self, action: Action, now: u64) -> Vec<EngineEvent> {
        if !self.active {
            return Vec::new();
        }
        match action {
            Action::MoveLeft => {
                self.shift(-1);
                Vec::new()
            }
            Action::MoveRight => {
                self.shift(1);
                Vec::new()
            }
            Action::SoftDrop => self.soft_drop(now),
            Action::HardDrop => {
                self.current = self.current.dropped(&self.board);
                self.lock(now)
            }
            Action::Rotate => {
                self.current.try_rotate(&self.board);
                Vec::new()
            }
            Action::Hold => self.hold(now),
            Action::ActivateSkill => self.activate_skill(now),
        }
    }

    /// Fires due effects, then applies gravity if the drop interval elapsed.
    pub fn tick(&mut self, now: u64) -> Vec<EngineEvent> {
        if !self.active {
            return Vec::new();
        }
        let mut events = Vec::new();
        for effect in self.schedule.due(now) {
            match effect {
                Effect::SkillExpiry { generation } => {
                    if ability::expire(&mut self.player.ability, generation) {
                        events.push(EngineEvent::SkillDeactivated {
                            character: self.player.character,
                        });
                    }
                }
            }
        }
        if now.saturating_sub(self.last_drop) >= self.player.drop_interval_ms {
            events.extend(self.soft_drop(now));
        }
        events
    }

    /// Takes an opponent's attack: `lines` garbage rows sharing one hole.
    /// `life` is the authority's figure for this player after the hit; without
    /// one the damage is resolved locally.
    pub fn receive_attack(&mut self, lines: u32, life: Option<u32>) -> Vec<EngineEvent> {
        let lines = lines.min(BOARD_HEIGHT as u32);
        match life {
            Some(hp) => self.player.life = hp.min(self.rules.max_life),
            None => {
                let outcome = ability::resolve_incoming(
                    self.player.character,
                    &mut self.player.ability,
                    self.player.life,
                    lines,
                    &self.rules,
                );
                self.player.life = outcome.life;
            }
        }
        if lines == 0 || !self.active {
            return Vec::new();
        }
        let hole = self.rng.gen_range(0..BOARD_WIDTH);
        let overflow = self.board.push_garbage_rows(lines, hole);
        // the stack rose under the falling piece
        while !self.current.fits(&self.board) && self.current.y > -(lines as i32) {
            self.current.y -= 1;
        }
        if overflow {
            return self.top_out();
        }
        Vec::new()
    }

    /// Authority-side end of the skill, e.g. after a negated lethal hit.
    pub fn end_skill(&mut self) {
        self.player.ability.active = false;
    }

    fn shift(&mut self, dx: i32) -> bool {
        let moved = self.current.shifted(dx, 0);
        if moved.fits(&self.board) {
            self.current = moved;
            return true;
        }
        false
    }

    fn soft_drop(&mut self, now: u64) -> Vec<EngineEvent> {
        let moved = self.current.shifted(0, 1);
        if moved.fits(&self.board) {
            self.current = moved;
            self.last_drop = now;
            return Vec::new();
        }
        self.lock(now)
    }

    fn hold(&mut self, now: u64) -> Vec<EngineEvent> {
        if self.hold_used {
            return Vec::new();
        }
        self.hold_used = true;
        let mut outgoing = self.current.clone();
        outgoing.rotated_before_lock = false;
        match self.held.replace(outgoing) {
            Some(mut swapped) => {
                swapped.recenter();
                self.current = swapped;
                self.last_drop = now;
                if !self.current.fits(&self.board) {
                    return self.top_out();
                }
                Vec::new()
            }
            None => self.spawn(now),
        }
    }

    fn lock(&mut self, now: u64) -> Vec<EngineEvent> {
        let locked_out = is_lock_out(&self.current);
        let clear = resolve_lock(&mut self.board, &self.current);
        self.hold_used = false;

        let scored = score_clear(
            &self.rules.attack_table,
            &mut self.player.streak,
            clear,
            self.player.level,
        );
        self.player.score += scored.score_delta;
        self.player.add_lines(clear.lines, &self.rules);

        let mut events = vec![EngineEvent::Locked {
            lines: clear.lines,
            spin: clear.spin,
            score_delta: scored.score_delta,
        }];
        if let Some((lines, label)) = scored.attack {
            debug!("{} sends {} ({})", self.player.id, lines, label);
            events.push(EngineEvent::AttackSent(AttackEvent {
                lines,
                label,
                source: self.player.id.clone(),
            }));
        }
        if self.player.gauge.accrue(clear.lines, self.rules.gauge_max) {
            events.push(EngineEvent::GaugeReady);
        }
        if locked_out {
            events.extend(self.top_out());
        } else {
            events.extend(self.spawn(now));
        }
        events
    }

    fn spawn(&mut self, now: u64) -> Vec<EngineEvent> {
        let kind = std::mem::replace(&mut self.next, Tetromino::random(&mut self.rng));
        self.current = Piece::spawn(kind);
        self.last_drop = now;
        if !self.current.fits(&self.board) {
            return self.top_out();
        }
        Vec::new()
    }

    fn top_out(&mut self) -> Vec<EngineEvent> {
        debug!("{} topped out", self.player.id);
        self.topped_out = true;
        self.stop();
        vec![EngineEvent::ToppedOut]
    }

    fn activate_skill(&mut self, now: u64) -> Vec<EngineEvent> {
        if !self.player.gauge.ready {
            return Vec::new();
        }
        let purged = self.board.purge_garbage_rows(self.rules.garbage_purge_rows);
        let player = &mut self.player;
        let Some(activation) = ability::activate(
            player.character,
            &mut player.gauge,
            &mut player.ability,
            &mut player.life,
            &self.rules,
        ) else {
            return Vec::new();
        };
        self.schedule.schedule(
            now + self.rules.skill_duration_ms,
            Effect::SkillExpiry {
                generation: activation.generation,
            },
        );
        vec![EngineEvent::SkillActivated {
            character: player.character,
            purged,
            healed: activation.healed,
        }]
    }

    /// Replaces the board and the falling piece, for setting up positions.
    #[cfg(test)]
    pub(crate) fn load(&mut self, board: Board, current: Piece) {
        self.board = board;
        self.current = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::CELL_GARBAGE;

    fn started(character: Character) -> Engine {
        let mut engine = Engine::with_seed("p1", character, GameRules::default(), 7);
        engine.start(0);
        engine
    }

    fn vertical_i(x: i32) -> Piece {
        let mut piece = Piece::spawn(Tetromino::I);
        piece.shape = piece.shape.rotated_cw();
        piece.x = x;
        piece
    }

    /// Fills rows `from..BOARD_HEIGHT` except column 0.
    fn well(engine: &mut Engine, from: usize) {
        for y in from..BOARD_HEIGHT {
            for x in 1..BOARD_WIDTH {
                engine.board.set_cell(y as i32, x as i32, CELL_GARBAGE);
            }
        }
    }

    #[test]
    fn idle_engine_ignores_input() {
        let mut engine = Engine::with_seed("p1", Character::Plain, GameRules::default(), 1);
        let before = engine.current().clone();
        assert!(engine.apply(Action::HardDrop, 10).is_empty());
        assert!(engine.tick(5_000).is_empty());
        assert_eq!(engine.current(), &before);
    }

    #[test]
    fn start_spawns_at_center_top() {
        let engine = started(Character::Plain);
        let piece = engine.current();
        assert_eq!(piece.y, 0);
        assert_eq!(piece.x, 5 - piece.shape.width() as i32 / 2);
        assert!(engine.is_active());
    }

    #[test]
    fn hard_drop_locks_and_spawns_next() {
        let mut engine = started(Character::Plain);
        let expected_next = engine.next_piece();
        let events = engine.apply(Action::HardDrop, 5);
        assert_eq!(
            events,
            vec![EngineEvent::Locked {
                lines: 0,
                spin: false,
                score_delta: 0
            }]
        );
        assert_eq!(engine.current().kind, expected_next);
        let filled: usize = engine
            .board()
            .rows()
            .iter()
            .map(|r| r.iter().filter(|&&c| c != 0).count())
            .sum();
        assert_eq!(filled, 4);
    }

    #[test]
    fn tetris_sends_attack_and_fills_gauge() {
        let mut engine = started(Character::Plain);
        well(&mut engine, 16);
        engine.current = vertical_i(0);
        let events = engine.apply(Action::HardDrop, 5);
        assert_eq!(
            events[0],
            EngineEvent::Locked {
                lines: 4,
                spin: false,
                score_delta: 800
            }
        );
        assert_eq!(
            events[1],
            EngineEvent::AttackSent(AttackEvent {
                lines: 4,
                label: "Tetris".to_string(),
                source: "p1".to_string()
            })
        );
        assert_eq!(engine.player().gauge.value, 4);
        assert_eq!(engine.player().lines, 4);
        assert_eq!(engine.board().max_height(), 0);
    }

    #[test]
    fn hold_once_per_turn() {
        let mut engine = started(Character::Plain);
        let first = engine.current().kind;
        let second = engine.next_piece();
        engine.apply(Action::Hold, 1);
        assert_eq!(engine.held().map(|p| p.kind), Some(first));
        assert_eq!(engine.current().kind, second);

        engine.apply(Action::Hold, 2);
        assert_eq!(engine.current().kind, second);

        engine.apply(Action::HardDrop, 3);
        let third = engine.current().kind;
        engine.apply(Action::Hold, 4);
        assert_eq!(engine.current().kind, first);
        let spawn_x = 5 - engine.current().shape.width() as i32 / 2;
        assert_eq!((engine.current().x, engine.current().y), (spawn_x, 0));
        assert_eq!(engine.held().map(|p| p.kind), Some(third));
    }

    #[test]
    fn gravity_follows_drop_interval() {
        let mut engine = started(Character::Plain);
        assert_eq!(engine.next_deadline(), Some(1_000));
        engine.tick(999);
        assert_eq!(engine.current().y, 0);
        engine.tick(1_000);
        assert_eq!(engine.current().y, 1);
        engine.tick(1_500);
        assert_eq!(engine.current().y, 1);
    }

    #[test]
    fn skill_purges_garbage_and_expires() {
        let mut engine = started(Character::HealLink);
        engine.board.push_garbage_rows(3, 4);
        engine.player.gauge.value = 10;
        engine.player.gauge.ready = true;
        engine.player.life = 5;

        let events = engine.apply(Action::ActivateSkill, 100);
        assert_eq!(
            events,
            vec![EngineEvent::SkillActivated {
                character: Character::HealLink,
                purged: 2,
                healed: 3
            }]
        );
        assert_eq!(engine.player().life, 8);
        assert_eq!(engine.board().max_height(), 1);
        assert!(engine.player().ability.active);
        assert!(engine.apply(Action::ActivateSkill, 200).is_empty());

        let events = engine.tick(5_100);
        assert!(events.contains(&EngineEvent::SkillDeactivated {
            character: Character::HealLink
        }));
        assert!(!engine.player().ability.active);
    }

    #[test]
    fn incoming_attack_shares_one_hole() {
        let mut engine = started(Character::Plain);
        engine.receive_attack(3, Some(7));
        assert_eq!(engine.player().life, 7);
        let rows = engine.board().rows();
        let holes: Vec<usize> = rows[17..]
            .iter()
            .map(|r| r.iter().position(|&c| c == 0).unwrap())
            .collect();
        assert_eq!(holes.len(), 3);
        assert!(holes.iter().all(|&h| h == holes[0]));
    }

    #[test]
    fn oversized_attack_fills_the_board_then_locks_out() {
        let mut engine = started(Character::Plain);
        assert!(engine.receive_attack(u32::MAX, Some(0)).is_empty());
        assert_eq!(engine.board().max_height(), BOARD_HEIGHT);
        assert!(engine.current().cells().all(|(row, _)| row < 0));

        let events = engine.apply(Action::HardDrop, 10);
        assert_eq!(events.last(), Some(&EngineEvent::ToppedOut));
        assert!(engine.is_topped_out());
    }

    #[test]
    fn local_damage_without_authority_life() {
        let mut engine = started(Character::HealLink);
        engine.receive_attack(4, None);
        // 10 - 4 + 2
        assert_eq!(engine.player().life, 8);
    }

    #[test]
    fn blocked_spawn_tops_out() {
        let mut engine = started(Character::Plain);
        for (y, x) in [(0, 4), (0, 5), (1, 4), (1, 5)] {
            engine.board.set_cell(y, x, CELL_GARBAGE);
        }
        let mut o = Piece::spawn(Tetromino::O);
        o.x = 0;
        o.y = 10;
        engine.current = o;
        let events = engine.apply(Action::HardDrop, 10);
        assert_eq!(events.last(), Some(&EngineEvent::ToppedOut));
        assert!(engine.is_topped_out());
        assert!(!engine.is_active());
        assert!(engine.tick(100_000).is_empty());
    }

    #[test]
    fn ghost_matches_hard_drop_landing() {
        let mut engine = started(Character::Plain);
        let ghost = engine.ghost();
        let cells: Vec<(i32, i32)> = ghost.cells().collect();
        engine.apply(Action::HardDrop, 1);
        for (row, col) in cells {
            assert!(engine.board().is_occupied(row, col));
        }
    }

    #[test]
    fn stop_cancels_pending_expiry() {
        let mut engine = started(Character::ChainBoost);
        engine.player.gauge.ready = true;
        engine.apply(Action::ActivateSkill, 0);
        engine.stop();
        assert!(engine.tick(10_000).is_empty());
        assert!(engine.player().ability.active);
    }
}
