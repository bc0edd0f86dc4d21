use serde::{Deserialize, Serialize};

use crate::ability::{AbilityState, Character, Gauge};
use crate::config::GameRules;
use crate::scoring::{drop_interval, level_for_lines, Streak};

/// Per-player match state. The engine owns one for its local player, and the
/// authority keeps one per occupant as its cached view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub id: String,
    pub character: Character,
    pub life: u32,
    pub score: u32,
    pub lines: u32,
    pub level: u32,
    pub drop_interval_ms: u64,
    pub gauge: Gauge,
    pub ability: AbilityState,
    pub streak: Streak,
}

impl PlayerState {
    pub fn new(id: impl Into<String>, character: Character, rules: &GameRules) -> Self {
        Self {
            id: id.into(),
            character,
            life: rules.max_life,
            score: 0,
            lines: 0,
            level: 1,
            drop_interval_ms: drop_interval(1, rules),
            gauge: Gauge::default(),
            ability: AbilityState::default(),
            streak: Streak::default(),
        }
    }

    /// Back to match-start values, keeping identity and character. The
    /// activation generation keeps counting so old expiries stay stale.
    pub fn reset(&mut self, rules: &GameRules) {
        let generation = self.ability.generation;
        *self = PlayerState::new(std::mem::take(&mut self.id), self.character, rules);
        self.ability.generation = generation;
    }

    /// Counts cleared lines and recomputes level and gravity.
    pub fn add_lines(&mut self, lines: u32, rules: &GameRules) {
        self.lines += lines;
        self.level = level_for_lines(self.lines, rules);
        self.drop_interval_ms = drop_interval(self.level, rules);
    }

    pub fn is_alive(&self) -> bool {
        self.life > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_restores_defaults_but_keeps_identity() {
        let rules = GameRules::default();
        let mut player = PlayerState::new("p1", Character::ChainBoost, &rules);
        player.life = 2;
        player.score = 900;
        player.add_lines(23, &rules);
        player.ability.generation = 4;
        player.ability.active = true;
        player.gauge.ready = true;

        player.reset(&rules);

        assert_eq!(player.id, "p1");
        assert_eq!(player.character, Character::ChainBoost);
        assert_eq!(player.life, rules.max_life);
        assert_eq!((player.score, player.lines, player.level), (0, 0, 1));
        assert_eq!(player.ability.generation, 4);
        assert!(!player.ability.active);
        assert_eq!(player.gauge, Gauge::default());
    }

    #[test]
    fn lines_drive_level_and_gravity() {
        let rules = GameRules::default();
        let mut player = PlayerState::new("p1", Character::Plain, &rules);
        player.add_lines(10, &rules);
        assert_eq!(player.level, 2);
        assert_eq!(player.drop_interval_ms, 950);
    }
}
