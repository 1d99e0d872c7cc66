//! Players. A player is plain data owned by its world; every mutation
//! happens inside the world's tick, so nothing here needs a lock. The
//! related state is split into small structs (motion, vitals, progress) to
//! keep each system reading only what it owns.

pub mod anticheat;
pub mod class;
pub mod movement;
pub mod status;

use crate::{
  config::BalanceConfig,
  event::Damager,
  item::Inventory,
};
use rift_common::{
  math::Vec2,
  net::sb::{AbilityKind, PlayerClass},
  util::{PlayerId, RoomId, TeamId},
};
use status::StatusSet;
use std::{collections::HashMap, time::Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CooldownKey {
  Attack,
  Ability(AbilityKind),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Motion {
  pub position:  Vec2,
  pub velocity:  Vec2,
  /// Unit aim direction.
  pub aim:       Vec2,
  pub sprinting: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vitals {
  pub health:     i32,
  pub max_health: i32,
  pub mana:       f64,
  pub max_mana:   f64,
  /// The flat shield pool. Damage burns this before health.
  pub shield:     i32,
  pub max_shield: i32,
  pub alive:      bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
  pub level: u32,
  pub xp:    i64,
}

#[derive(Debug, Clone)]
pub struct Player {
  id:    PlayerId,
  name:  String,
  team:  TeamId,
  class: PlayerClass,

  pub motion:       Motion,
  pub vitals:       Vitals,
  pub progress:     Progress,
  pub inventory:    Inventory,
  pub status:       StatusSet,
  pub current_room: RoomId,
  pub tracker:      anticheat::Tracker,

  /// Base strength from the class. Weapon damage comes from the inventory.
  pub strength: i32,
  /// Base armor from the class. Equipment armor comes from the inventory.
  base_armor:   i32,

  cooldowns: HashMap<CooldownKey, Instant>,

  /// The most recent damager, for killer attribution.
  pub last_damage: Option<(Damager, Instant)>,

  pub joined_at: Instant,
}

impl Player {
  pub fn new(
    id: PlayerId,
    name: String,
    team: TeamId,
    class: PlayerClass,
    position: Vec2,
    room: RoomId,
    balance: &BalanceConfig,
    now: Instant,
  ) -> Self {
    let cs = class::stats(class);
    Player {
      id,
      name,
      team,
      class,
      motion: Motion {
        position,
        velocity: Vec2::zero(),
        aim: Vec2::new(1.0, 0.0),
        sprinting: false,
      },
      vitals: Vitals {
        health:     balance.base_health,
        max_health: balance.base_health,
        mana:       f64::from(balance.base_mana),
        max_mana:   f64::from(balance.base_mana),
        shield:     0,
        max_shield: cs.max_shield,
        alive:      true,
      },
      progress: Progress { level: 1, xp: 0 },
      inventory: Inventory::new(balance.max_inventory_size),
      status: StatusSet::new(),
      current_room: room,
      tracker: anticheat::Tracker::new(),
      strength: cs.strength,
      base_armor: cs.armor,
      cooldowns: HashMap::new(),
      last_damage: None,
      joined_at: now,
    }
  }

  pub fn id(&self) -> &PlayerId { &self.id }
  pub fn name(&self) -> &str { &self.name }
  pub fn team(&self) -> &TeamId { &self.team }
  pub fn class(&self) -> PlayerClass { self.class }
  pub fn class_stats(&self) -> class::ClassStats { class::stats(self.class) }
  pub fn alive(&self) -> bool { self.vitals.alive }
  pub fn position(&self) -> Vec2 { self.motion.position }

  /// Total armor: class base plus equipped gear.
  pub fn armor(&self) -> i32 { self.base_armor + self.inventory.armor() }

  pub fn cooldown_ready(&self, key: CooldownKey, now: Instant) -> bool {
    match self.cooldowns.get(&key) {
      Some(ready_at) => now >= *ready_at,
      None => true,
    }
  }

  pub fn set_cooldown(&mut self, key: CooldownKey, now: Instant, secs: f64) {
    self.cooldowns.insert(key, now + std::time::Duration::from_secs_f64(secs));
  }

  pub fn heal(&mut self, amount: i32) {
    self.vitals.health = (self.vitals.health + amount).min(self.vitals.max_health);
  }

  pub fn restore_mana(&mut self, amount: f64) {
    self.vitals.mana = (self.vitals.mana + amount).min(self.vitals.max_mana);
  }

  /// Burns the shield pool first and returns the damage left over.
  pub fn absorb_with_shield(&mut self, amount: i32) -> i32 {
    let absorbed = amount.min(self.vitals.shield);
    self.vitals.shield -= absorbed;
    amount - absorbed
  }

  /// Adds XP and applies any level ups. Returns the levels gained this
  /// call, in order.
  pub fn add_xp(&mut self, amount: i64) -> Vec<u32> {
    let mut gained = vec![];
    self.progress.xp += amount;
    // Each level costs level * 100 xp.
    while self.progress.xp >= i64::from(self.progress.level) * 100 {
      self.progress.xp -= i64::from(self.progress.level) * 100;
      self.progress.level += 1;
      self.vitals.max_health += 10;
      self.vitals.max_mana += 5.0;
      self.vitals.health = self.vitals.max_health;
      self.vitals.mana = self.vitals.max_mana;
      gained.push(self.progress.level);
    }
    gained
  }

  /// The fastest this player could legally move right now, in units per
  /// second. The anti-cheat tracker judges against this.
  pub fn expected_max_speed(&self, base_speed: f64, sprint_mul: f64) -> f64 {
    let mut speed = base_speed * self.class_stats().speed_mul;
    speed *= self.status.speed_multiplier().max(1.0);
    if self.motion.sprinting {
      speed *= sprint_mul;
    }
    speed
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn test_player() -> Player {
    Player::new(
      PlayerId::new("p1"),
      "tester".into(),
      TeamId::new("team1"),
      PlayerClass::Scout,
      Vec2::zero(),
      RoomId::new("room_0_0"),
      &BalanceConfig::default(),
      Instant::now(),
    )
  }

  #[test]
  fn level_ups_carry_over() {
    let mut p = test_player();
    // Level 1 needs 100, level 2 needs 200. 350 xp is two levels with 50
    // left over.
    let gained = p.add_xp(350);
    assert_eq!(gained, vec![2, 3]);
    assert_eq!(p.progress.level, 3);
    assert_eq!(p.progress.xp, 50);
    assert_eq!(p.vitals.max_health, 120);
  }

  #[test]
  fn shield_absorbs_before_health() {
    let mut p = test_player();
    p.vitals.shield = 30;
    let left = p.absorb_with_shield(40);
    assert_eq!(left, 10);
    assert_eq!(p.vitals.shield, 0);
    let left = p.absorb_with_shield(5);
    assert_eq!(left, 5);
  }

  #[test]
  fn cooldowns_expire() {
    let mut p = test_player();
    let now = Instant::now();
    assert!(p.cooldown_ready(CooldownKey::Attack, now));
    p.set_cooldown(CooldownKey::Attack, now, 0.8);
    assert!(!p.cooldown_ready(CooldownKey::Attack, now));
    assert!(p.cooldown_ready(CooldownKey::Attack, now + std::time::Duration::from_secs(1)));
  }
}
