use serde::{Deserialize, Serialize};

use crate::config::GameRules;

/// Selectable characters. The wire names are the ones the browser client uses.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Default)]
pub enum Character {
    /// Regeneration: heals on activation, and passively when hit by 2+ lines.
    #[serde(rename = "char1")]
    HealLink,
    /// Mitigation: cuts incoming damage while active and at low life.
    #[serde(rename = "char2")]
    DownBarrier,
    /// Amplification: boosts outgoing attack and can survive one lethal hit.
    #[serde(rename = "char3")]
    ChainBoost,
    #[default]
    #[serde(rename = "default", other)]
    Plain,
}

/// Skill meter. Fills by cleared lines and stays full until spent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gauge {
    pub value: u32,
    pub ready: bool,
}

impl Gauge {
    /// Returns true on the accrual that fills the meter.
    pub fn accrue(&mut self, lines: u32, max: u32) -> bool {
        if self.ready || lines == 0 {
            return false;
        }
        self.value = self.value.saturating_add(lines);
        if self.value >= max {
            self.value = max;
            self.ready = true;
            return true;
        }
        false
    }

    pub fn consume(&mut self) -> bool {
        if !self.ready {
            return false;
        }
        *self = Gauge::default();
        true
    }
}

/// Timed skill state. `generation` counts activations so a stale expiry
/// cannot end a newer one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilityState {
    pub active: bool,
    pub generation: u64,
    pub lethal_saved: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Activation {
    pub generation: u64,
    pub healed: u32,
}

/// Spends a full gauge and starts the character's skill. `life` receives the
/// regeneration heal. Returns `None` when the gauge is not ready.
pub fn activate(
    character: Character,
    gauge: &mut Gauge,
    ability: &mut AbilityState,
    life: &mut u32,
    rules: &GameRules,
) -> Option<Activation> {
    if !gauge.consume() {
        return None;
    }
    ability.active = true;
    ability.generation += 1;
    ability.lethal_saved = false;

    let mut healed = 0;
    if character == Character::HealLink {
        let amount = rules.max_life * rules.regen_heal_percent / 100;
        let before = *life;
        *life = life.saturating_add(amount).min(rules.max_life);
        healed = *life - before;
    }
    Some(Activation {
        generation: ability.generation,
        healed,
    })
}

/// Ends the activation `generation` if it is still the running one.
pub fn expire(ability: &mut AbilityState, generation: u64) -> bool {
    if ability.active && ability.generation == generation {
        ability.active = false;
        return true;
    }
    false
}

/// Outgoing attack after the attacker's own modifiers, rounded up.
pub fn amplify_attack(
    character: Character,
    ability: &AbilityState,
    lines: u32,
    rules: &GameRules,
) -> u32 {
    if character == Character::ChainBoost && ability.active {
        ceil_percent(lines, rules.amplify_percent)
    } else {
        lines
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DamageOutcome {
    /// Life actually removed, after mitigation or negation.
    pub damage: u32,
    pub life: u32,
    pub healed: u32,
    pub negated: bool,
    /// The defender's skill ended as part of this hit.
    pub ability_ended: bool,
}

/// Applies `incoming` lines of attack to a defender with `life` left.
pub fn resolve_incoming(
    character: Character,
    ability: &mut AbilityState,
    life: u32,
    incoming: u32,
    rules: &GameRules,
) -> DamageOutcome {
    let mut outcome = DamageOutcome {
        damage: incoming,
        life,
        ..DamageOutcome::default()
    };

    if character == Character::DownBarrier
        && ability.active
        && life.saturating_mul(100)
            <= rules.max_life.saturating_mul(rules.mitigation_threshold_percent)
    {
        outcome.damage = ceil_percent(incoming, rules.mitigation_percent);
    }

    if character == Character::ChainBoost
        && ability.active
        && !ability.lethal_saved
        && life == 1
        && outcome.damage >= 1
    {
        outcome.damage = 0;
        outcome.negated = true;
        outcome.ability_ended = true;
        ability.lethal_saved = true;
        ability.active = false;
    }

    outcome.life = life.saturating_sub(outcome.damage);

    if character == Character::HealLink && incoming >= rules.passive_heal_min_lines {
        let before = outcome.life;
        outcome.life = outcome.life.saturating_add(incoming / 2).min(rules.max_life);
        outcome.healed = outcome.life - before;
    }
    outcome
}

fn ceil_percent(value: u32, percent: u32) -> u32 {
    value.saturating_mul(percent).div_ceil(100)
}
