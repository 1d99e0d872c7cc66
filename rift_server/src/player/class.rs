//! Per-class tuning. These are multipliers over the config's base values, so
//! rebalancing a class doesn't touch the config surface.

use rift_common::net::sb::{AbilityKind, PlayerClass};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassStats {
  pub speed_mul:        f64,
  pub damage_mul:       f64,
  pub attack_range_mul: f64,
  pub crit_chance:      f64,
  pub strength:         i32,
  pub armor:            i32,
  pub max_shield:       i32,
}

pub fn stats(class: PlayerClass) -> ClassStats {
  match class {
    PlayerClass::Scout => ClassStats {
      speed_mul:        1.1,
      damage_mul:       1.0,
      attack_range_mul: 1.0,
      crit_chance:      0.15,
      strength:         4,
      armor:            1,
      max_shield:       20,
    },
    PlayerClass::Support => ClassStats {
      speed_mul:        1.0,
      damage_mul:       0.9,
      attack_range_mul: 1.1,
      crit_chance:      0.08,
      strength:         3,
      armor:            2,
      max_shield:       25,
    },
    PlayerClass::Tank => ClassStats {
      speed_mul:        0.9,
      damage_mul:       1.1,
      attack_range_mul: 0.9,
      crit_chance:      0.05,
      strength:         6,
      armor:            4,
      max_shield:       40,
    },
  }
}

/// Which abilities a class may use. Everything else is rejected at input
/// validation.
pub fn abilities(class: PlayerClass) -> &'static [AbilityKind] {
  match class {
    PlayerClass::Scout => &[AbilityKind::Dash, AbilityKind::Stealth],
    PlayerClass::Tank => &[AbilityKind::Charge, AbilityKind::Shield],
    PlayerClass::Support => &[AbilityKind::Heal, AbilityKind::Buff],
  }
}

pub fn can_use(class: PlayerClass, ability: AbilityKind) -> bool {
  abilities(class).contains(&ability)
}
