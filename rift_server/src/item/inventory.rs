use super::Item;
use crate::error::GameError;
use rift_common::util::LootId;

/// A player's inventory. Capacity is fixed at construction (config
/// `game_balance.max_inventory_size`). At most one weapon and one armor piece
/// may be equipped at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct Inventory {
  items:    Vec<Item>,
  capacity: usize,
}

impl Inventory {
  pub fn new(capacity: usize) -> Self { Inventory { items: Vec::new(), capacity } }

  pub fn len(&self) -> usize { self.items.len() }
  pub fn is_empty(&self) -> bool { self.items.is_empty() }
  pub fn is_full(&self) -> bool { self.items.len() >= self.capacity }
  pub fn items(&self) -> &[Item] { &self.items }

  pub fn get(&self, id: &LootId) -> Option<&Item> { self.items.iter().find(|i| &i.id == id) }

  /// Adds an item. Fails with `InventoryFull` and hands the item back if
  /// there is no space, so the caller can put it back where it came from.
  pub fn add(&mut self, item: Item) -> Result<(), (Item, GameError)> {
    if self.is_full() {
      return Err((item, GameError::InventoryFull));
    }
    self.items.push(item);
    Ok(())
  }

  /// Removes and returns the item with the given id.
  pub fn remove(&mut self, id: &LootId) -> Option<Item> {
    let idx = self.items.iter().position(|i| &i.id == id)?;
    Some(self.items.remove(idx))
  }

  /// Equips the item with the given id, unequipping whatever of the same
  /// slot was equipped before. Returns the new equipped state.
  pub fn toggle_equip(&mut self, id: &LootId) -> Result<bool, GameError> {
    let idx = self.items.iter().position(|i| &i.id == id).ok_or(GameError::NotFound)?;
    let is_weapon = self.items[idx].is_weapon();
    if self.items[idx].equipped {
      self.items[idx].equipped = false;
      return Ok(false);
    }
    for it in self.items.iter_mut() {
      if it.is_weapon() == is_weapon && (it.is_weapon() || it.is_armor()) {
        it.equipped = false;
      }
    }
    self.items[idx].equipped = true;
    Ok(true)
  }

  /// Total bonus damage from the equipped weapon.
  pub fn weapon_damage(&self) -> i32 {
    self
      .items
      .iter()
      .filter(|i| i.equipped && i.is_weapon())
      .filter_map(|i| i.stats.get("damage"))
      .sum()
  }

  /// Total armor from equipped armor pieces.
  pub fn armor(&self) -> i32 {
    self
      .items
      .iter()
      .filter(|i| i.equipped && i.is_armor())
      .filter_map(|i| i.stats.get("armor"))
      .sum()
  }

  /// The `count` highest rarity items, removed from the inventory. Used for
  /// death drops.
  pub fn take_top_rarity(&mut self, count: usize) -> Vec<Item> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
      let Some((idx, _)) = self
        .items
        .iter()
        .enumerate()
        .max_by_key(|(_, i)| i.rarity)
      else {
        break;
      };
      out.push(self.items.remove(idx));
    }
    out
  }

  /// Sum of rarities over the whole inventory. Extraction XP is based on
  /// this.
  pub fn rarity_sum(&self) -> i64 { self.items.iter().map(|i| i64::from(i.rarity)).sum() }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::item::{roll, ItemKind};
  use pretty_assertions::assert_eq;

  fn weapon(id: &str, rarity: u8) -> Item {
    let mut it = Item {
      id:       LootId::new(id),
      name:     "shiv".into(),
      kind:     ItemKind::Weapon,
      rarity,
      stats:    Default::default(),
      equipped: false,
    };
    it.stats.insert("damage".into(), i32::from(rarity) * 3);
    it
  }

  #[test]
  fn capacity_is_enforced() {
    let mut inv = Inventory::new(2);
    assert!(inv.add(weapon("a", 1)).is_ok());
    assert!(inv.add(weapon("b", 1)).is_ok());
    let (item, err) = inv.add(weapon("c", 1)).unwrap_err();
    assert_eq!(err, GameError::InventoryFull);
    assert_eq!(item.id, LootId::new("c"));
    assert_eq!(inv.len(), 2);
  }

  #[test]
  fn single_weapon_equipped() {
    let mut inv = Inventory::new(20);
    inv.add(weapon("a", 1)).unwrap();
    inv.add(weapon("b", 3)).unwrap();
    assert!(inv.toggle_equip(&LootId::new("a")).unwrap());
    assert!(inv.toggle_equip(&LootId::new("b")).unwrap());
    // Equipping b unequipped a.
    assert_eq!(inv.weapon_damage(), 9);
    // Toggling b again unequips it.
    assert!(!inv.toggle_equip(&LootId::new("b")).unwrap());
    assert_eq!(inv.weapon_damage(), 0);
  }

  #[test]
  fn top_rarity_drops() {
    let mut inv = Inventory::new(20);
    for (id, rarity) in [("a", 1), ("b", 5), ("c", 3), ("d", 4)] {
      inv.add(weapon(id, rarity)).unwrap();
    }
    let top = inv.take_top_rarity(3);
    let rarities: Vec<u8> = top.iter().map(|i| i.rarity).collect();
    assert_eq!(rarities, vec![5, 4, 3]);
    assert_eq!(inv.len(), 1);
  }

  #[test]
  fn rolled_items_fit() {
    let mut inv = Inventory::new(20);
    let mut rng = rand::thread_rng();
    inv.add(roll(LootId::new("r"), 2, &mut rng)).unwrap();
    assert_eq!(inv.rarity_sum(), 2);
  }
}
