//! Item types and templates. Items spawn into the world as loot, move into a
//! player's inventory on pickup, and are consumed, equipped, or spent from
//! there. Every item is rolled from one of the templates in [`TEMPLATES`].

mod inventory;

pub use inventory::Inventory;

use crate::player::status::StatusKind;
use rand::Rng;
use rift_common::util::LootId;
use std::collections::HashMap;

/// What an item does. Unlike rarity, the kind is fixed by the template.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
  Consumable(ConsumableEffect),
  Weapon,
  Armor,
  Key,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConsumableEffect {
  /// Restores health, up to the player's max.
  Heal(i32),
  /// Restores mana, up to the player's max.
  Mana(i32),
  /// Applies a status effect with the given magnitude for the given number
  /// of seconds.
  Status(StatusKind, f64, f64),
}

/// A rolled item. `rarity` is 1 to 5; stats scale with it at roll time.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
  pub id:       LootId,
  pub name:     String,
  pub kind:     ItemKind,
  pub rarity:   u8,
  pub stats:    HashMap<String, i32>,
  pub equipped: bool,
}

impl Item {
  pub fn is_weapon(&self) -> bool { matches!(self.kind, ItemKind::Weapon) }
  pub fn is_armor(&self) -> bool { matches!(self.kind, ItemKind::Armor) }

  /// Keys are consumed on use, except the master key.
  pub fn consumed_on_use(&self) -> bool {
    match self.kind {
      ItemKind::Consumable(_) => true,
      ItemKind::Key => self.name != "master key",
      _ => false,
    }
  }
}

pub struct Template {
  pub name:   &'static str,
  pub kind:   ItemKind,
  /// Relative weight in the loot table. Higher is more common.
  pub weight: u32,
}

/// The loot table. Weights are relative; rarity is decided separately by the
/// loot manager and scales the rolled stats.
pub fn templates() -> &'static [Template] {
  use ConsumableEffect::*;
  use ItemKind::*;
  static TEMPLATES: &[Template] = &[
    Template { name: "medkit", kind: Consumable(Heal(30)), weight: 20 },
    Template { name: "mana vial", kind: Consumable(Mana(25)), weight: 16 },
    Template { name: "adrenal shot", kind: Consumable(Status(StatusKind::Speed, 1.5, 5.0)), weight: 8 },
    Template { name: "venom flask", kind: Consumable(Status(StatusKind::Poison, 5.0, 6.0)), weight: 5 },
    Template { name: "mending charm", kind: Consumable(Status(StatusKind::Regen, 4.0, 8.0)), weight: 7 },
    Template { name: "shiv", kind: Weapon, weight: 12 },
    Template { name: "arc blade", kind: Weapon, weight: 6 },
    Template { name: "breaker maul", kind: Weapon, weight: 4 },
    Template { name: "scrap vest", kind: Armor, weight: 10 },
    Template { name: "plated carapace", kind: Armor, weight: 5 },
    Template { name: "rusted key", kind: Key, weight: 4 },
    Template { name: "master key", kind: Key, weight: 1 },
  ];
  TEMPLATES
}

/// Rolls an item from the template table. The caller decides the rarity; the
/// roll decides the template and the stats.
pub fn roll(id: LootId, rarity: u8, rng: &mut impl Rng) -> Item {
  let table = templates();
  let total: u32 = table.iter().map(|t| t.weight).sum();
  let mut pick = rng.gen_range(0..total);
  let mut chosen = &table[0];
  for t in table {
    if pick < t.weight {
      chosen = t;
      break;
    }
    pick -= t.weight;
  }
  let mut stats = HashMap::new();
  match chosen.kind {
    ItemKind::Weapon => {
      stats.insert("damage".into(), 2 + 3 * i32::from(rarity));
    }
    ItemKind::Armor => {
      stats.insert("armor".into(), 1 + 2 * i32::from(rarity));
    }
    _ => {}
  }
  Item {
    id,
    name: chosen.name.into(),
    kind: chosen.kind.clone(),
    rarity: rarity.clamp(1, 5),
    stats,
    equipped: false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn weapon_stats_scale_with_rarity() {
    let mut rng = rand::thread_rng();
    for _ in 0..64 {
      let it = roll(LootId::new("l1"), 5, &mut rng);
      assert_eq!(it.rarity, 5);
      if it.is_weapon() {
        assert_eq!(it.stats["damage"], 17);
      }
    }
  }

  #[test]
  fn master_key_survives_use() {
    let master = Item {
      id:       LootId::new("k1"),
      name:     "master key".into(),
      kind:     ItemKind::Key,
      rarity:   5,
      stats:    HashMap::new(),
      equipped: false,
    };
    assert!(!master.consumed_on_use());
    let rusted = Item { name: "rusted key".into(), ..master };
    assert!(rusted.consumed_on_use());
  }
}
