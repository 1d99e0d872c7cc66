//! Combat resolution. Player attacks are collected during input application
//! and resolved here; mob attacks are decided by the AI phase and applied
//! here. Everything runs inside the world's tick, so the maps are free to
//! mutate without locks.

pub mod ability;

use crate::{
  config::BalanceConfig,
  event::{Damager, WorldEvent},
  mob::Mob,
  player::{CooldownKey, Player},
  world::spatial::SpatialIndex,
};
use rand::Rng;
use rift_common::{
  math::Vec2,
  util::{MobId, PlayerId},
};
use std::{collections::HashMap, time::Instant};

/// Half angle of the attack cone: 60 degrees total.
const CONE_HALF_ANGLE_COS: f64 = 0.866_025_403_784_438_6; // cos(30 deg)

/// Rolls attack damage: `(base + strength * 2) * (1 +- 0.2) * class_mul`,
/// times 1.5 on a crit. Weapon damage counts into the base.
pub fn roll_damage(
  base_damage: i32,
  strength: i32,
  weapon_damage: i32,
  class_mul: f64,
  crit_chance: f64,
  rng: &mut impl Rng,
) -> (i32, bool) {
  let base = f64::from(base_damage + weapon_damage + strength * 2);
  let variance = rng.gen_range(0.8..=1.2);
  let crit = rng.gen_bool(crit_chance.clamp(0.0, 1.0));
  let mut dmg = base * variance * class_mul;
  if crit {
    dmg *= 1.5;
  }
  (dmg.round().max(1.0) as i32, crit)
}

/// Applies damage to a player: reduction status first, then the shield
/// pool, then armor (which can never reduce a hit below 1). Returns `true`
/// if this killed them.
pub fn apply_damage_to_player(
  p: &mut Player,
  amount: i32,
  source: Damager,
  now: Instant,
  events: &mut Vec<WorldEvent>,
  killer_window_s: f64,
) -> bool {
  if !p.alive() {
    return false;
  }
  let reduced = (f64::from(amount) * p.status.damage_multiplier()).round() as i32;
  let after_shield = p.absorb_with_shield(reduced);
  if after_shield <= 0 {
    p.last_damage = Some((source, now));
    return false;
  }
  let final_damage = (after_shield - p.armor()).max(1);
  p.vitals.health -= final_damage;
  p.last_damage = Some((source, now));
  if p.vitals.health <= 0 {
    p.vitals.health = 0;
    p.vitals.alive = false;
    let killer = killer_of(p, now, killer_window_s);
    events.push(WorldEvent::PlayerDeath { victim: p.id().clone(), killer });
    true
  } else {
    false
  }
}

/// The killer for attribution: the last damager, if it hit inside the
/// window.
pub fn killer_of(p: &Player, now: Instant, window_s: f64) -> Option<Damager> {
  p.last_damage
    .as_ref()
    .filter(|(_, t)| now.duration_since(*t).as_secs_f64() <= window_s)
    .map(|(d, _)| d.clone())
}

/// True when `target` sits inside the 60 degree cone in front of `aim` at
/// `origin`, within `range`.
pub fn in_cone(origin: Vec2, aim: Vec2, target: Vec2, range: f64) -> bool {
  let to_target = target - origin;
  let d = to_target.len();
  if d > range {
    return false;
  }
  if d < 1e-6 {
    return true;
  }
  to_target.normalized().dot(aim.normalized()) >= CONE_HALF_ANGLE_COS
}

struct AttackerView {
  id:          PlayerId,
  position:    Vec2,
  aim:         Vec2,
  team:        rift_common::util::TeamId,
  range:       f64,
  base_damage: i32,
  strength:    i32,
  weapon:      i32,
  class_mul:   f64,
  crit_chance: f64,
}

enum Target {
  Player(PlayerId),
  Mob(MobId),
}

/// Resolves this tick's basic attacks. Each attacker hits the nearest valid
/// target in their cone: enemy players (never teammates) and mobs.
#[allow(clippy::too_many_arguments)]
pub fn resolve_attacks(
  attackers: &[PlayerId],
  players: &mut HashMap<PlayerId, Player>,
  mobs: &mut HashMap<MobId, Mob>,
  spatial: &SpatialIndex,
  balance: &BalanceConfig,
  now: Instant,
  events: &mut Vec<WorldEvent>,
  rng: &mut impl Rng,
) {
  for attacker_id in attackers {
    let view = {
      let Some(p) = players.get_mut(attacker_id) else { continue };
      if !p.alive() || !p.cooldown_ready(CooldownKey::Attack, now) {
        continue;
      }
      p.set_cooldown(CooldownKey::Attack, now, balance.attack_cooldown_ms as f64 / 1000.0);
      // Attacking breaks stealth.
      p.status.remove(crate::player::status::StatusKind::Stealth);
      let cs = p.class_stats();
      AttackerView {
        id:          p.id().clone(),
        position:    p.position(),
        aim:         p.motion.aim,
        team:        p.team().clone(),
        range:       balance.attack_range * cs.attack_range_mul,
        base_damage: balance.base_damage,
        strength:    p.strength,
        weapon:      p.inventory.weapon_damage(),
        class_mul:   cs.damage_mul,
        crit_chance: cs.crit_chance,
      }
    };

    // Nearest target inside the cone. Teammates are skipped outright.
    let mut best: Option<(f64, Target)> = None;
    for (pid, pos) in spatial.players_near(view.position, view.range) {
      if &pid == attacker_id {
        continue;
      }
      let Some(other) = players.get(&pid) else { continue };
      if !other.alive() || other.team() == &view.team {
        continue;
      }
      if in_cone(view.position, view.aim, pos, view.range) {
        let d = pos.dist(view.position);
        if best.as_ref().map(|(bd, _)| d < *bd).unwrap_or(true) {
          best = Some((d, Target::Player(pid)));
        }
      }
    }
    for (mid, pos) in spatial.mobs_near(view.position, view.range) {
      let Some(mob) = mobs.get(&mid) else { continue };
      if !mob.alive() {
        continue;
      }
      if in_cone(view.position, view.aim, pos, view.range) {
        let d = pos.dist(view.position);
        if best.as_ref().map(|(bd, _)| d < *bd).unwrap_or(true) {
          best = Some((d, Target::Mob(mid)));
        }
      }
    }

    let Some((_, target)) = best else { continue };
    let (damage, crit) = roll_damage(
      view.base_damage,
      view.strength,
      view.weapon,
      view.class_mul,
      view.crit_chance,
      rng,
    );
    match target {
      Target::Player(pid) => {
        events.push(WorldEvent::Attack {
          attacker: view.id.clone(),
          target:   Damager::Player(pid.clone()),
          damage,
          crit,
        });
        if let Some(other) = players.get_mut(&pid) {
          apply_damage_to_player(
            other,
            damage,
            Damager::Player(view.id.clone()),
            now,
            events,
            balance.killer_window_s,
          );
        }
      }
      Target::Mob(mid) => {
        events.push(WorldEvent::Attack {
          attacker: view.id.clone(),
          target:   Damager::Mob(mid.clone()),
          damage,
          crit,
        });
        let died = match mobs.get_mut(&mid) {
          Some(mob) => mob.take_damage(damage, Some(&view.id), now),
          None => false,
        };
        if died {
          on_mob_death(&mid, players, mobs, now, balance.killer_window_s, events);
        }
      }
    }
  }
}

/// Applies the attacks the AI phase decided. Targets are re-validated
/// against range with a small grace, since both sides moved this tick.
pub fn apply_mob_attacks(
  attacks: &[crate::mob::ai::MobAttack],
  players: &mut HashMap<PlayerId, Player>,
  mobs: &HashMap<MobId, Mob>,
  balance: &BalanceConfig,
  now: Instant,
  events: &mut Vec<WorldEvent>,
) {
  for atk in attacks {
    let Some(mob) = mobs.get(&atk.mob) else { continue };
    if !mob.alive() {
      continue;
    }
    let Some(target) = players.get_mut(&atk.target) else { continue };
    if !target.alive() {
      continue;
    }
    if target.position().dist(mob.position) > mob.stats.attack_range * 1.5 {
      continue;
    }
    apply_damage_to_player(
      target,
      atk.damage,
      Damager::Mob(atk.mob.clone()),
      now,
      events,
      balance.killer_window_s,
    );
  }
}

/// Bookkeeping for a mob death: the killer gets the mob's XP and the event
/// is recorded. Loot drops are handled by the loot phase, which scans the
/// tick's events.
pub fn on_mob_death(
  mob_id: &MobId,
  players: &mut HashMap<PlayerId, Player>,
  mobs: &HashMap<MobId, Mob>,
  now: Instant,
  killer_window_s: f64,
  events: &mut Vec<WorldEvent>,
) {
  let Some(mob) = mobs.get(mob_id) else { return };
  let killer = mob
    .last_damager
    .as_ref()
    .filter(|(_, t)| now.duration_since(*t).as_secs_f64() <= killer_window_s)
    .map(|(p, _)| p.clone());
  if let Some(k) = &killer {
    if let Some(p) = players.get_mut(k) {
      for level in p.add_xp(mob.stats.xp) {
        events.push(WorldEvent::LevelUp { player: k.clone(), level });
      }
    }
  }
  events.push(WorldEvent::MobDeath { mob: mob_id.clone(), killer });
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    mob::{spawn::new_mob, MobType},
    world::spatial::Body,
  };
  use pretty_assertions::assert_eq;
  use rift_common::{
    net::sb::PlayerClass,
    util::{RoomId, TeamId},
  };

  fn player(id: &str, team: &str, pos: Vec2) -> Player {
    Player::new(
      PlayerId::new(id),
      id.into(),
      TeamId::new(team),
      PlayerClass::Scout,
      pos,
      RoomId::new("room_0_0"),
      &BalanceConfig::default(),
      Instant::now(),
    )
  }

  #[test]
  fn cone_accepts_forward_rejects_behind() {
    let origin = Vec2::zero();
    let aim = Vec2::new(1.0, 0.0);
    assert!(in_cone(origin, aim, Vec2::new(3.0, 0.5), 5.0));
    assert!(!in_cone(origin, aim, Vec2::new(-3.0, 0.0), 5.0));
    // 45 degrees off axis is outside a 60 degree cone.
    assert!(!in_cone(origin, aim, Vec2::new(2.0, 2.0), 5.0));
    // Beyond range misses even when aligned.
    assert!(!in_cone(origin, aim, Vec2::new(6.0, 0.0), 5.0));
  }

  #[test]
  fn damage_reaches_at_least_one() {
    let mut rng = rand::thread_rng();
    let (dmg, _) = roll_damage(1, 0, 0, 0.1, 0.0, &mut rng);
    assert!(dmg >= 1);
  }

  #[test]
  fn teammates_are_never_hit() {
    let balance = BalanceConfig::default();
    let now = Instant::now();
    let mut players = HashMap::new();
    let attacker = player("a", "team1", Vec2::zero());
    let friend = player("b", "team1", Vec2::new(2.0, 0.0));
    let mut spatial = SpatialIndex::new();
    spatial.insert(Body::Player(PlayerId::new("a")), Vec2::zero());
    spatial.insert(Body::Player(PlayerId::new("b")), Vec2::new(2.0, 0.0));
    players.insert(PlayerId::new("a"), attacker);
    players.insert(PlayerId::new("b"), friend);
    let mut mobs = HashMap::new();
    let mut events = vec![];
    resolve_attacks(
      &[PlayerId::new("a")],
      &mut players,
      &mut mobs,
      &spatial,
      &balance,
      now,
      &mut events,
      &mut rand::thread_rng(),
    );
    assert_eq!(players[&PlayerId::new("b")].vitals.health, balance.base_health);
    assert!(events.is_empty());
  }

  #[test]
  fn enemy_in_cone_takes_damage_and_cooldown_applies() {
    let balance = BalanceConfig::default();
    let now = Instant::now();
    let mut players = HashMap::new();
    players.insert(PlayerId::new("a"), player("a", "team1", Vec2::zero()));
    players.insert(PlayerId::new("b"), player("b", "team2", Vec2::new(2.0, 0.0)));
    let mut spatial = SpatialIndex::new();
    spatial.insert(Body::Player(PlayerId::new("a")), Vec2::zero());
    spatial.insert(Body::Player(PlayerId::new("b")), Vec2::new(2.0, 0.0));
    let mut mobs = HashMap::new();
    let mut events = vec![];
    // Two attack requests in the same instant: the second is inside the
    // cooldown and does nothing.
    resolve_attacks(
      &[PlayerId::new("a"), PlayerId::new("a")],
      &mut players,
      &mut mobs,
      &spatial,
      &balance,
      now,
      &mut events,
      &mut rand::thread_rng(),
    );
    assert!(players[&PlayerId::new("b")].vitals.health < balance.base_health);
    let hits = events
      .iter()
      .filter(|e| matches!(e, WorldEvent::Attack { .. }))
      .count();
    assert_eq!(hits, 1);
  }

  #[test]
  fn mob_death_awards_xp_to_killer() {
    let balance = BalanceConfig::default();
    let now = Instant::now();
    let mut rng = rand::thread_rng();
    let mut players = HashMap::new();
    players.insert(PlayerId::new("a"), player("a", "team1", Vec2::zero()));
    let mut mobs = HashMap::new();
    let mut mob = new_mob(
      MobId::new("m1"),
      MobType::Husk,
      Vec2::new(1.5, 0.0),
      RoomId::new("room_0_0"),
      1.0,
      0.0,
      now,
      &mut rng,
    );
    mob.hp = 1;
    let xp = mob.stats.xp;
    mobs.insert(MobId::new("m1"), mob);
    let mut spatial = SpatialIndex::new();
    spatial.insert(Body::Player(PlayerId::new("a")), Vec2::zero());
    spatial.insert(Body::Mob(MobId::new("m1")), Vec2::new(1.5, 0.0));
    let mut events = vec![];
    resolve_attacks(
      &[PlayerId::new("a")],
      &mut players,
      &mut mobs,
      &spatial,
      &balance,
      now,
      &mut events,
      &mut rng,
    );
    assert!(mobs[&MobId::new("m1")].state.is_dead());
    assert!(events.iter().any(|e| matches!(e, WorldEvent::MobDeath { .. })));
    assert_eq!(players[&PlayerId::new("a")].progress.xp, xp);
  }

  #[test]
  fn shield_pool_then_armor() {
    let balance = BalanceConfig::default();
    let now = Instant::now();
    let mut p = player("a", "team1", Vec2::zero());
    p.vitals.shield = 10;
    let armor = p.armor();
    let mut events = vec![];
    let died = apply_damage_to_player(
      &mut p,
      20,
      Damager::Mob(MobId::new("m1")),
      now,
      &mut events,
      balance.killer_window_s,
    );
    assert!(!died);
    assert_eq!(p.vitals.shield, 0);
    // 20 damage: 10 absorbed, 10 - armor to health, at least 1.
    let expected = balance.base_health - (10 - armor).max(1);
    assert_eq!(p.vitals.health, expected);
  }
}
