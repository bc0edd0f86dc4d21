use serde::{Deserialize, Serialize};

use crate::clear::ClearEvent;
use crate::config::GameRules;

/// Lines sent per clear kind. Four-line spins do not exist and send nothing.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AttackTable {
    pub _1_line_single: u32,
    pub _2_lines_double: u32,
    pub _3_lines_triple: u32,
    pub _4_lines: u32,
    pub t_spin_single: u32,
    pub t_spin_double: u32,
    pub t_spin_triple: u32,
    pub back_to_back_bonus: u32,
}

pub fn default_attack_table() -> AttackTable {
    AttackTable {
        _1_line_single: 0,
        _2_lines_double: 1,
        _3_lines_triple: 2,
        _4_lines: 4,
        t_spin_single: 2,
        t_spin_double: 4,
        t_spin_triple: 6,
        back_to_back_bonus: 1,
    }
}

impl AttackTable {
    pub fn base(&self, lines: u32, spin: bool) -> (u32, &'static str) {
        match (spin, lines) {
            (true, 1) => (self.t_spin_single, "T-Spin Single"),
            (true, 2) => (self.t_spin_double, "T-Spin Double"),
            (true, 3) => (self.t_spin_triple, "T-Spin Triple"),
            (true, _) => (0, ""),
            (false, 1) => (self._1_line_single, "Single"),
            (false, 2) => (self._2_lines_double, "Double"),
            (false, 3) => (self._3_lines_triple, "Triple"),
            (false, 4) => (self._4_lines, "Tetris"),
            (false, _) => (0, ""),
        }
    }
}

/// REN bonus indexed by the streak length before the current clear.
pub const COMBO_RAMP: [u32; 12] = [0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 4, 5];

const SPIN_SCORE: [u32; 4] = [400, 800, 1200, 1600];
const LINE_SCORE: [u32; 4] = [100, 300, 500, 800];

/// Outgoing attack, before the authority applies any amplification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackEvent {
    pub lines: u32,
    pub label: String,
    pub source: String,
}

/// Combo and back-to-back state carried between locks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Streak {
    pub combo: u32,
    pub back_to_back: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScoredClear {
    /// `(lines, label)` when the lock sends garbage.
    pub attack: Option<(u32, String)>,
    pub score_delta: u32,
}

/// Folds one lock into the streak and returns what it is worth. `level` is
/// the level before this clear's lines are counted.
pub fn score_clear(
    table: &AttackTable,
    streak: &mut Streak,
    event: ClearEvent,
    level: u32,
) -> ScoredClear {
    let (base, name) = table.base(event.lines, event.spin);

    let attack = if base > 0 {
        let mut total = base;
        let mut label = name.to_string();
        if streak.back_to_back {
            total += table.back_to_back_bonus;
            label = format!("B2B {}", label);
        }
        streak.back_to_back = event.spin || event.lines >= 4;

        if streak.combo > 0 {
            let idx = (streak.combo as usize).min(COMBO_RAMP.len() - 1);
            total += COMBO_RAMP[idx];
            label = format!("{} ({} REN)", label, streak.combo + 1);
        }
        streak.combo += 1;
        Some((total, label))
    } else {
        *streak = Streak::default();
        None
    };

    let score_delta = if event.spin {
        SPIN_SCORE[(event.lines as usize).min(3)] * level
    } else if event.lines > 0 {
        LINE_SCORE[(event.lines as usize - 1).min(3)] * level
    } else {
        0
    };

    ScoredClear {
        attack,
        score_delta,
    }
}

pub fn level_for_lines(total_lines: u32, rules: &GameRules) -> u32 {
    total_lines / rules.lines_per_level + 1
}

/// Gravity period in milliseconds for a level.
pub fn drop_interval(level: u32, rules: &GameRules) -> u64 {
    let step = (level.saturating_sub(1) as u64).saturating_mul(rules.drop_step_ms);
    rules
        .base_drop_ms
        .saturating_sub(step)
        .max(rules.min_drop_ms)
}
