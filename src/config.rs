use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::scoring::{default_attack_table, AttackTable};

/// Match tunables shared by the engine and the session authority. Both sides
/// must run with the same rules for the damage arithmetic to agree.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct GameRules {
    pub max_life: u32,
    pub gauge_max: u32,
    pub skill_duration_ms: u64,
    pub countdown_ms: u64,
    /// Share of `max_life` restored by the regeneration skill.
    pub regen_heal_percent: u32,
    /// Mitigation only applies while life is at or below this share of `max_life`.
    pub mitigation_threshold_percent: u32,
    pub mitigation_percent: u32,
    pub amplify_percent: u32,
    pub passive_heal_min_lines: u32,
    pub base_drop_ms: u64,
    pub min_drop_ms: u64,
    pub drop_step_ms: u64,
    pub lines_per_level: u32,
    pub garbage_purge_rows: usize,
    /// Accept `hp` from `boardUpdate` into the authority's cached life.
    pub trust_client_life: bool,
    pub attack_table: AttackTable,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            max_life: 10,
            gauge_max: 10,
            skill_duration_ms: 5_000,
            countdown_ms: 3_000,
            regen_heal_percent: 30,
            mitigation_threshold_percent: 50,
            mitigation_percent: 80,
            amplify_percent: 150,
            passive_heal_min_lines: 2,
            base_drop_ms: 1_000,
            min_drop_ms: 200,
            drop_step_ms: 50,
            lines_per_level: 10,
            garbage_purge_rows: 2,
            trust_client_life: true,
            attack_table: default_attack_table(),
        }
    }
}

impl GameRules {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let rules: GameRules = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive: [(&'static str, u64); 5] = [
            ("max_life", self.max_life as u64),
            ("gauge_max", self.gauge_max as u64),
            ("lines_per_level", self.lines_per_level as u64),
            ("min_drop_ms", self.min_drop_ms),
            ("amplify_percent", self.amplify_percent as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.min_drop_ms > self.base_drop_ms {
            return Err(ConfigError::Invalid {
                field: "min_drop_ms",
                reason: format!("{} exceeds base_drop_ms {}", self.min_drop_ms, self.base_drop_ms),
            });
        }
        if self.mitigation_percent > 100 {
            return Err(ConfigError::Invalid {
                field: "mitigation_percent",
                reason: "a mitigation above 100% would amplify damage".to_string(),
            });
        }
        Ok(())
    }
}
