//! Mob spawning: type templates, the initial world population, periodic
//! dynamic spawns, and difficulty scaling.

use super::{BossState, GroupId, Mob, MobGroup, MobState, MobStats, MobType, Priority};
use crate::config::AiConfig;
use rand::Rng;
use rift_common::{
  math::Vec2,
  util::{MobId, RoomId},
};
use std::time::Instant;

/// Base stats per mob type, before difficulty scaling.
pub fn template(ty: MobType) -> MobStats {
  match ty {
    MobType::Husk => MobStats {
      max_hp:            50,
      damage:            6,
      speed:             2.5,
      detection_range:   12.0,
      attack_range:      1.5,
      attack_cooldown_s: 1.5,
      aggression:        0.8,
      xp:                25,
    },
    MobType::Stalker => MobStats {
      max_hp:            35,
      damage:            9,
      speed:             4.5,
      detection_range:   18.0,
      attack_range:      1.5,
      attack_cooldown_s: 1.0,
      aggression:        1.2,
      xp:                35,
    },
    MobType::Warden => MobStats {
      max_hp:            90,
      damage:            8,
      speed:             2.0,
      detection_range:   10.0,
      attack_range:      2.0,
      attack_cooldown_s: 2.0,
      aggression:        0.6,
      xp:                45,
    },
    MobType::Ravager => MobStats {
      max_hp:            60,
      damage:            12,
      speed:             3.5,
      detection_range:   15.0,
      attack_range:      1.8,
      attack_cooldown_s: 1.2,
      aggression:        1.4,
      xp:                55,
    },
    MobType::Boss => MobStats {
      max_hp:            1000,
      damage:            20,
      speed:             3.0,
      detection_range:   25.0,
      attack_range:      3.0,
      attack_cooldown_s: 2.0,
      aggression:        1.0,
      xp:                500,
    },
  }
}

/// Weighted pick of a non-boss type. Boss promotion is a separate roll.
pub fn weighted_type(rng: &mut impl Rng) -> MobType {
  const TABLE: &[(MobType, u32)] =
    &[(MobType::Husk, 40), (MobType::Stalker, 25), (MobType::Warden, 20), (MobType::Ravager, 15)];
  let total: u32 = TABLE.iter().map(|(_, w)| w).sum();
  let mut pick = rng.gen_range(0..total);
  for &(ty, w) in TABLE {
    if pick < w {
      return ty;
    }
    pick -= w;
  }
  MobType::Husk
}

/// The stat multiplier for a spawn: worlds get harder as they age and as
/// their players level.
pub fn difficulty_multiplier(age_hours: f64, avg_player_level: f64, setting: f64) -> f64 {
  (1.0 + age_hours * 0.1) * (1.0 + (avg_player_level - 1.0) * 0.15) * setting
}

fn scaled(base: MobStats, mul: f64) -> MobStats {
  MobStats {
    max_hp: (f64::from(base.max_hp) * mul).round() as i32,
    damage: (f64::from(base.damage) * mul).round() as i32,
    ..base
  }
}

/// Builds one mob. A non-boss type may be promoted to the boss template by
/// the promotion roll; a promoted mob is rescaled to boss stats before its
/// first tick, it does not keep the original template's numbers.
pub fn new_mob(
  id: MobId,
  mut ty: MobType,
  position: Vec2,
  room_id: RoomId,
  difficulty: f64,
  boss_chance: f64,
  now: Instant,
  rng: &mut impl Rng,
) -> Mob {
  if ty != MobType::Boss && rng.gen_bool(boss_chance.clamp(0.0, 1.0)) {
    ty = MobType::Boss;
  }
  let stats = scaled(template(ty), difficulty);
  let boss = (ty == MobType::Boss).then(|| BossState::new(stats.attack_cooldown_s));
  Mob {
    id,
    ty,
    position,
    room_id,
    state: MobState::Spawning,
    hp: stats.max_hp,
    stats,
    target: None,
    patrol_target: None,
    home: position,
    last_attack: None,
    priority: Priority::Low,
    group: None,
    boss,
    dirty: true,
    spawned_at: now,
    died_at: None,
    state_since: now,
    last_damager: None,
  }
}

/// A room the spawner may place mobs in.
pub struct SpawnRoom {
  pub id:     RoomId,
  pub center: Vec2,
  pub size:   f64,
  /// Rooms holding extraction points never spawn mobs dynamically.
  pub has_extraction: bool,
}

/// Spawns the initial population: `mobs_per_room` in every room, grouped
/// into packs when group behaviour is on.
pub fn initial_population(
  rooms: &[SpawnRoom],
  mobs_per_room: usize,
  cfg: &AiConfig,
  difficulty: f64,
  now: Instant,
  rng: &mut impl Rng,
  mut next_id: impl FnMut() -> MobId,
  mut next_group: impl FnMut() -> GroupId,
) -> (Vec<Mob>, Vec<MobGroup>) {
  let mut mobs = vec![];
  let mut groups = vec![];
  for room in rooms {
    let mut group: Option<MobGroup> = None;
    for _ in 0..mobs_per_room {
      let off = Vec2::new(
        rng.gen_range(-room.size / 2.0..room.size / 2.0),
        rng.gen_range(-room.size / 2.0..room.size / 2.0),
      );
      let mut mob = new_mob(
        next_id(),
        weighted_type(rng),
        room.center + off,
        room.id.clone(),
        difficulty,
        cfg.boss_spawn_chance,
        now,
        rng,
      );
      if cfg.enable_group_behavior && !mob.is_boss() {
        let g = group.get_or_insert_with(|| MobGroup::new(next_group()));
        if !g.is_full() {
          g.members.push(mob.id.clone());
          mob.group = Some(g.id);
        }
      }
      mobs.push(mob);
    }
    if let Some(g) = group {
      if g.members.len() > 1 {
        groups.push(g);
      }
    }
  }
  (mobs, groups)
}

/// Picks a room for a dynamic spawn: not an extraction room, and below the
/// per-room mob threshold. Returns the spawned mob, or `None` when no room
/// qualifies.
pub fn dynamic_spawn(
  rooms: &[SpawnRoom],
  count_in_room: impl Fn(&RoomId) -> usize,
  cfg: &AiConfig,
  difficulty: f64,
  now: Instant,
  rng: &mut impl Rng,
  next_id: impl FnOnce() -> MobId,
) -> Option<Mob> {
  let candidates: Vec<&SpawnRoom> = rooms
    .iter()
    .filter(|r| !r.has_extraction && count_in_room(&r.id) < cfg.max_mobs_per_room)
    .collect();
  let room = candidates.get(rng.gen_range(0..candidates.len().max(1)))?;
  let off = Vec2::new(
    rng.gen_range(-room.size / 2.0..room.size / 2.0),
    rng.gen_range(-room.size / 2.0..room.size / 2.0),
  );
  Some(new_mob(
    next_id(),
    weighted_type(rng),
    room.center + off,
    room.id.clone(),
    difficulty,
    cfg.boss_spawn_chance,
    now,
    rng,
  ))
}
