//! The loot manager. Loot spawns from world generation, a periodic respawn
//! timer, mob deaths, room clears, and player deaths. Items expire after a
//! configurable age, and rooms over their density cap evict the oldest
//! items first.

use crate::{
  config::LootConfig,
  error::GameError,
  event::WorldEvent,
  item::{self, ConsumableEffect, Item, ItemKind},
  player::Player,
};
use rand::Rng;
use rift_common::{
  math::Vec2,
  util::{LootId, PlayerId, RoomId},
};
use std::{
  collections::HashMap,
  time::{Duration, Instant},
};

/// An item lying on the floor of a room.
#[derive(Debug, Clone, PartialEq)]
pub struct LootItem {
  pub item:       Item,
  pub position:   Vec2,
  pub room_id:    RoomId,
  pub spawned_at: Instant,
}

/// Why a piece of loot is being rolled. Each trigger adds a rarity bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
  WorldSpawn,
  Respawn,
  MobDeath,
  BossDeath,
  RoomClear,
}

impl Trigger {
  fn rarity_bonus(&self) -> f64 {
    match self {
      Self::WorldSpawn | Self::Respawn => 0.0,
      Self::MobDeath => 0.5,
      Self::BossDeath => 2.0,
      Self::RoomClear => 1.0,
    }
  }
}

/// Context for a rarity roll that depends on world state.
#[derive(Debug, Clone, Copy)]
pub struct RarityCtx {
  /// Fraction of rooms completed, `0.0..=1.0`.
  pub world_completion: f64,
  /// True when the drop lands near the room center.
  pub near_room_center: bool,
  /// Age of the world.
  pub world_age:        Duration,
}

/// The dynamic rarity roll: base + completion bonus + room center bonus +
/// trigger bonus + age bonus, clamped to 1..=5. With dynamic rarity off the
/// roll is a flat luck-scaled base.
pub fn roll_rarity(cfg: &LootConfig, trigger: Trigger, ctx: RarityCtx, rng: &mut impl Rng) -> u8 {
  let base = 1.0 + rng.gen_range(0.0..1.5) * cfg.luck_multiplier;
  if !cfg.enable_dynamic_rarity {
    return (base.round() as i64).clamp(1, 5) as u8;
  }
  let mut r = base;
  r += ctx.world_completion * 2.0;
  if ctx.near_room_center {
    r += 0.5;
  }
  r += trigger.rarity_bonus();
  if ctx.world_age >= Duration::from_secs(600) {
    r += 1.0;
  }
  (r.round() as i64).clamp(1, 5) as u8
}

/// Spawns one rolled item into the loot map.
#[allow(clippy::too_many_arguments)]
pub fn spawn(
  loot: &mut HashMap<LootId, LootItem>,
  id: LootId,
  rarity: u8,
  position: Vec2,
  room_id: RoomId,
  now: Instant,
  events: &mut Vec<WorldEvent>,
  rng: &mut impl Rng,
) {
  let item = item::roll(id.clone(), rarity, rng);
  events.push(WorldEvent::LootSpawned {
    loot: id.clone(),
    name: item.name.clone(),
    rarity: item.rarity,
    room: room_id.clone(),
    position,
  });
  loot.insert(id, LootItem { item, position, room_id, spawned_at: now });
}

/// Places an already rolled item back on the floor (player death drops).
pub fn drop_item(
  loot: &mut HashMap<LootId, LootItem>,
  item: Item,
  position: Vec2,
  room_id: RoomId,
  now: Instant,
  events: &mut Vec<WorldEvent>,
) {
  events.push(WorldEvent::LootSpawned {
    loot: item.id.clone(),
    name: item.name.clone(),
    rarity: item.rarity,
    room: room_id.clone(),
    position,
  });
  loot.insert(item.id.clone(), LootItem { item, position, room_id, spawned_at: now });
}

/// Validates and executes a pickup. On success the item moves from the
/// world to the player's inventory in one step.
pub fn grab(
  loot: &mut HashMap<LootId, LootItem>,
  player: &mut Player,
  loot_id: &LootId,
  cfg: &LootConfig,
  events: &mut Vec<WorldEvent>,
) -> Result<(), GameError> {
  if !player.alive() {
    return Err(GameError::NotAlive);
  }
  let entry = loot.get(loot_id).ok_or(GameError::NotFound)?;
  if entry.room_id != player.current_room {
    return Err(GameError::NotInSameRoom);
  }
  if entry.position.dist(player.position()) > cfg.grab_range {
    return Err(GameError::OutOfRange);
  }
  if player.inventory.is_full() {
    return Err(GameError::InventoryFull);
  }
  // Checks passed; the move is atomic from here.
  let LootItem { item, position, room_id, spawned_at } =
    loot.remove(loot_id).ok_or(GameError::NotFound)?;
  match player.inventory.add(item) {
    Ok(()) => {
      events.push(WorldEvent::LootPickedUp { loot: loot_id.clone(), by: player.id().clone() });
      Ok(())
    }
    Err((item, e)) => {
      // Put it back; the capacity check above makes this unreachable in
      // practice, but the map must never lose an item.
      loot.insert(loot_id.clone(), LootItem { item, position, room_id, spawned_at });
      Err(e)
    }
  }
}

/// Uses an item from the player's inventory. Consumables apply and are
/// removed; weapons and armor toggle equipped; keys are consumed unless
/// they are the master key.
pub fn use_item(
  player: &mut Player,
  item_id: &LootId,
  now: Instant,
  events: &mut Vec<WorldEvent>,
) -> Result<(), GameError> {
  if !player.alive() {
    return Err(GameError::NotAlive);
  }
  let Some(item) = player.inventory.get(item_id).cloned() else {
    return Err(GameError::NotFound);
  };
  match &item.kind {
    ItemKind::Consumable(effect) => {
      // Reject uses that would do nothing.
      match effect {
        ConsumableEffect::Heal(_) if player.vitals.health >= player.vitals.max_health => {
          return Err(GameError::LockedTarget);
        }
        ConsumableEffect::Mana(_) if player.vitals.mana >= player.vitals.max_mana => {
          return Err(GameError::LockedTarget);
        }
        _ => {}
      }
      match *effect {
        ConsumableEffect::Heal(amount) => player.heal(amount),
        ConsumableEffect::Mana(amount) => player.restore_mana(f64::from(amount)),
        ConsumableEffect::Status(kind, magnitude, duration_s) => {
          let source = player.id().clone();
          player.status.apply(kind, magnitude, duration_s, Some(source), now);
        }
      }
      player.inventory.remove(item_id);
    }
    ItemKind::Weapon | ItemKind::Armor => {
      player.inventory.toggle_equip(item_id)?;
    }
    ItemKind::Key => {
      if item.consumed_on_use() {
        player.inventory.remove(item_id);
      }
    }
  }
  events.push(WorldEvent::ItemUsed { player: player.id().clone(), item: item_id.clone() });
  Ok(())
}

/// Removes loot past the expiration age, and evicts the oldest items from
/// rooms over the density cap.
pub fn expire_and_evict(
  loot: &mut HashMap<LootId, LootItem>,
  cfg: &LootConfig,
  now: Instant,
  events: &mut Vec<WorldEvent>,
) {
  let max_age = Duration::from_secs_f64(cfg.expiration_minutes * 60.0);
  let expired: Vec<LootId> = loot
    .iter()
    .filter(|(_, l)| now.duration_since(l.spawned_at) >= max_age)
    .map(|(id, _)| id.clone())
    .collect();
  for id in expired {
    loot.remove(&id);
    events.push(WorldEvent::LootRemoved { loot: id });
  }

  // Density cap per room, oldest out first.
  let mut per_room: HashMap<RoomId, Vec<(Instant, LootId)>> = HashMap::new();
  for (id, l) in loot.iter() {
    per_room.entry(l.room_id.clone()).or_default().push((l.spawned_at, id.clone()));
  }
  for (_, mut items) in per_room {
    if items.len() <= cfg.max_per_room {
      continue;
    }
    items.sort_by_key(|(t, _)| *t);
    let overflow = items.len() - cfg.max_per_room;
    for (_, id) in items.into_iter().take(overflow) {
      loot.remove(&id);
      events.push(WorldEvent::LootRemoved { loot: id });
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::BalanceConfig;
  use pretty_assertions::assert_eq;
  use rift_common::{net::sb::PlayerClass, util::TeamId};

  fn test_player(pos: Vec2) -> Player {
    Player::new(
      PlayerId::new("p1"),
      "tester".into(),
      TeamId::new("team1"),
      PlayerClass::Scout,
      pos,
      RoomId::new("room_0_0"),
      &BalanceConfig::default(),
      Instant::now(),
    )
  }

  fn floor_item(id: &str, pos: Vec2, room: &str, now: Instant) -> (LootId, LootItem) {
    let lid = LootId::new(id);
    let item = item::roll(lid.clone(), 3, &mut rand::thread_rng());
    (lid, LootItem { item, position: pos, room_id: RoomId::new(room), spawned_at: now })
  }

  #[test]
  fn grab_succeeds_then_not_found() {
    let now = Instant::now();
    let cfg = LootConfig::default();
    let mut loot = HashMap::new();
    let (id, l) = floor_item("l1", Vec2::new(1.0, 0.0), "room_0_0", now);
    loot.insert(id.clone(), l);
    let mut p = test_player(Vec2::zero());
    let mut events = vec![];

    assert_eq!(grab(&mut loot, &mut p, &id, &cfg, &mut events), Ok(()));
    assert_eq!(p.inventory.len(), 1);
    // The same grab again: the item is gone.
    assert_eq!(grab(&mut loot, &mut p, &id, &cfg, &mut events), Err(GameError::NotFound));
  }

  #[test]
  fn grab_validations() {
    let now = Instant::now();
    let cfg = LootConfig::default();
    let mut events = vec![];

    // Wrong room.
    let mut loot = HashMap::new();
    let (id, l) = floor_item("l1", Vec2::new(1.0, 0.0), "room_1_0", now);
    loot.insert(id.clone(), l);
    let mut p = test_player(Vec2::zero());
    assert_eq!(grab(&mut loot, &mut p, &id, &cfg, &mut events), Err(GameError::NotInSameRoom));

    // Same room, too far.
    let mut loot = HashMap::new();
    let (id, l) = floor_item("l2", Vec2::new(10.0, 0.0), "room_0_0", now);
    loot.insert(id.clone(), l);
    assert_eq!(grab(&mut loot, &mut p, &id, &cfg, &mut events), Err(GameError::OutOfRange));

    // Full inventory.
    let mut loot = HashMap::new();
    let (id, l) = floor_item("l3", Vec2::new(1.0, 0.0), "room_0_0", now);
    loot.insert(id.clone(), l);
    let mut full = test_player(Vec2::zero());
    for i in 0..BalanceConfig::default().max_inventory_size {
      let item = item::roll(LootId::new(format!("fill{i}")), 1, &mut rand::thread_rng());
      full.inventory.add(item).unwrap();
    }
    assert_eq!(grab(&mut loot, &mut full, &id, &cfg, &mut events), Err(GameError::InventoryFull));
    assert!(loot.contains_key(&id));
  }

  #[test]
  fn heal_at_full_health_is_rejected() {
    let now = Instant::now();
    let mut p = test_player(Vec2::zero());
    let item = Item {
      id:       LootId::new("med"),
      name:     "medkit".into(),
      kind:     ItemKind::Consumable(ConsumableEffect::Heal(30)),
      rarity:   1,
      stats:    HashMap::new(),
      equipped: false,
    };
    p.inventory.add(item).unwrap();
    let mut events = vec![];
    assert_eq!(
      use_item(&mut p, &LootId::new("med"), now, &mut events),
      Err(GameError::LockedTarget)
    );
    // Damaged, the same medkit works and is consumed.
    p.vitals.health = 50;
    assert_eq!(use_item(&mut p, &LootId::new("med"), now, &mut events), Ok(()));
    assert_eq!(p.vitals.health, 80);
    assert_eq!(p.inventory.len(), 0);
  }

  #[test]
  fn rarity_clamps_and_scales() {
    let mut rng = rand::thread_rng();
    let cfg = LootConfig::default();
    let ctx = RarityCtx {
      world_completion: 1.0,
      near_room_center: true,
      world_age:        Duration::from_secs(601),
    };
    for _ in 0..32 {
      let r = roll_rarity(&cfg, Trigger::BossDeath, ctx, &mut rng);
      assert_eq!(r, 5, "boss drop in a completed old world should cap out");
    }
    let ctx = RarityCtx {
      world_completion: 0.0,
      near_room_center: false,
      world_age:        Duration::from_secs(0),
    };
    for _ in 0..32 {
      let r = roll_rarity(&cfg, Trigger::WorldSpawn, ctx, &mut rng);
      assert!((1..=3).contains(&r));
    }
  }

  #[test]
  fn expiry_removes_old_items() {
    let cfg = LootConfig::default();
    let start = Instant::now();
    let mut loot = HashMap::new();
    let (id_old, l) = floor_item("old", Vec2::zero(), "room_0_0", start);
    loot.insert(id_old.clone(), l);
    let late = start + Duration::from_secs(60 * 11);
    let (id_new, l) = floor_item("new", Vec2::zero(), "room_0_0", late);
    loot.insert(id_new.clone(), l);
    let mut events = vec![];
    expire_and_evict(&mut loot, &cfg, late, &mut events);
    assert!(!loot.contains_key(&id_old));
    assert!(loot.contains_key(&id_new));
  }

  #[test]
  fn density_cap_evicts_oldest() {
    let cfg = LootConfig { max_per_room: 3, ..LootConfig::default() };
    let start = Instant::now();
    let mut loot = HashMap::new();
    for i in 0..5 {
      let (id, l) = floor_item(
        &format!("l{i}"),
        Vec2::zero(),
        "room_0_0",
        start + Duration::from_secs(i),
      );
      loot.insert(id, l);
    }
    let mut events = vec![];
    expire_and_evict(&mut loot, &cfg, start + Duration::from_secs(10), &mut events);
    assert_eq!(loot.len(), 3);
    // The two oldest are gone.
    assert!(!loot.contains_key(&LootId::new("l0")));
    assert!(!loot.contains_key(&LootId::new("l1")));
    assert!(loot.contains_key(&LootId::new("l4")));
  }
}
