//! Class abilities. Mana and cooldown are checked together before any
//! effect runs; the whole check-and-execute happens inside the world's tick,
//! so there is no window where two inputs can both pass the check.

use super::apply_damage_to_player;
use crate::{
  config::{BalanceConfig, MovementConfig},
  error::GameError,
  event::{Damager, WorldEvent},
  mob::Mob,
  player::{class, status::StatusKind, CooldownKey, Player},
  world::spatial::SpatialIndex,
};
use rand::Rng;
use rift_common::{
  math::Vec2,
  net::sb::AbilityKind,
  util::{MobId, PlayerId},
};
use std::{collections::HashMap, time::Instant};

/// Mana cost and cooldown per ability.
pub fn cost(ability: AbilityKind) -> (f64, f64) {
  match ability {
    AbilityKind::Dash => (10.0, 5.0),
    AbilityKind::Stealth => (20.0, 12.0),
    AbilityKind::Charge => (25.0, 10.0),
    AbilityKind::Shield => (30.0, 15.0),
    AbilityKind::Heal => (25.0, 8.0),
    AbilityKind::Buff => (20.0, 12.0),
  }
}

const STEALTH_DURATION_S: f64 = 5.0;
const SHIELD_STATUS_DURATION_S: f64 = 6.0;
const HEAL_AMOUNT: i32 = 30;
const HEAL_RANGE: f64 = 8.0;
const BUFF_RANGE: f64 = 6.0;
const BUFF_DURATION_S: f64 = 5.0;
const CHARGE_DISTANCE: f64 = 8.0;
const CHARGE_DAMAGE_MUL: f64 = 1.5;
const CHARGE_HIT_RADIUS: f64 = 3.0;

/// Tries to execute an ability for a player. Denials come back as events
/// targeted at that player only. An ability the class doesn't own is a
/// validation violation: logged and dropped without a reply.
#[allow(clippy::too_many_arguments)]
pub fn execute(
  player_id: &PlayerId,
  ability: AbilityKind,
  players: &mut HashMap<PlayerId, Player>,
  mobs: &mut HashMap<MobId, Mob>,
  spatial: &SpatialIndex,
  balance: &BalanceConfig,
  movement: &MovementConfig,
  half_extent: f64,
  now: Instant,
  events: &mut Vec<WorldEvent>,
  rng: &mut impl Rng,
) {
  let (mana_cost, cooldown_s) = cost(ability);

  // Checks against the caster, then the deduction, all before any effect.
  {
    let Some(p) = players.get_mut(player_id) else { return };
    if !class::can_use(p.class(), ability) {
      warn!("{} sent ability {ability:?} outside their class kit", p.name());
      return;
    }
    if !p.alive() {
      events.push(WorldEvent::Denied { player: player_id.clone(), error: GameError::NotAlive });
      return;
    }
    if !p.cooldown_ready(CooldownKey::Ability(ability), now) {
      events
        .push(WorldEvent::Denied { player: player_id.clone(), error: GameError::CooldownActive });
      return;
    }
    if p.vitals.mana < mana_cost {
      events.push(WorldEvent::Denied {
        player: player_id.clone(),
        error:  GameError::InsufficientMana,
      });
      return;
    }
    p.vitals.mana -= mana_cost;
    p.set_cooldown(CooldownKey::Ability(ability), now, cooldown_s);
  }

  match ability {
    AbilityKind::Dash => dash(player_id, players, spatial, movement, half_extent, false),
    AbilityKind::Stealth => {
      if let Some(p) = players.get_mut(player_id) {
        p.status.apply(StatusKind::Stealth, 1.0, STEALTH_DURATION_S, None, now);
      }
    }
    AbilityKind::Charge => {
      dash(player_id, players, spatial, movement, half_extent, true);
      charge_impact(player_id, players, mobs, balance, now, events, rng);
    }
    AbilityKind::Shield => {
      if let Some(p) = players.get_mut(player_id) {
        p.vitals.shield = p.vitals.max_shield;
        p.status.apply(StatusKind::Shield, 0.5, SHIELD_STATUS_DURATION_S, None, now);
      }
    }
    AbilityKind::Heal => {
      aoe_allies(player_id, players, HEAL_RANGE, |ally, _src, _now| ally.heal(HEAL_AMOUNT), now);
    }
    AbilityKind::Buff => {
      aoe_allies(
        player_id,
        players,
        BUFF_RANGE,
        |ally, src, now| {
          ally.status.apply(StatusKind::Speed, 1.5, BUFF_DURATION_S, Some(src.clone()), now);
        },
        now,
      );
    }
  }
  events.push(WorldEvent::AbilityUsed { player: player_id.clone(), ability });
}

/// Moves the caster along their aim. Dash goes the full teleport distance,
/// charge a shorter fixed lunge. The landing spot must be unoccupied; when
/// it isn't, the dash shortens until it is.
fn dash(
  player_id: &PlayerId,
  players: &mut HashMap<PlayerId, Player>,
  spatial: &SpatialIndex,
  movement: &MovementConfig,
  half_extent: f64,
  is_charge: bool,
) {
  let Some(p) = players.get_mut(player_id) else { return };
  let max_dist = if is_charge { CHARGE_DISTANCE } else { movement.teleport_max_distance };
  let aim = p.motion.aim.normalized();
  let from = p.motion.position;
  let mut dist = max_dist;
  let target = loop {
    let candidate = (from + aim * dist).clamped_to_plane(half_extent);
    let occupied = spatial
      .players_near(candidate, movement.player_collision_radius)
      .into_iter()
      .any(|(id, _)| &id != player_id);
    if !occupied || dist <= 1.0 {
      break candidate;
    }
    dist -= 1.0;
  };
  p.motion.position = target;
  p.tracker.authorize_teleport();
}

/// The charge's area damage at the landing spot. Same team members are
/// excluded; mobs are not.
fn charge_impact(
  player_id: &PlayerId,
  players: &mut HashMap<PlayerId, Player>,
  mobs: &mut HashMap<MobId, Mob>,
  balance: &BalanceConfig,
  now: Instant,
  events: &mut Vec<WorldEvent>,
  rng: &mut impl Rng,
) {
  let (center, team, damage) = {
    let Some(p) = players.get(player_id) else { return };
    let (dmg, _) = super::roll_damage(
      balance.base_damage,
      p.strength,
      p.inventory.weapon_damage(),
      p.class_stats().damage_mul * CHARGE_DAMAGE_MUL,
      0.0,
      rng,
    );
    (p.position(), p.team().clone(), dmg)
  };

  // The spatial index was built before the dash moved us, so scan the maps
  // directly around the landing spot.
  let nearby_players: Vec<PlayerId> = players
    .iter()
    .filter(|(id, other)| {
      *id != player_id
        && other.alive()
        && other.team() != &team
        && other.position().dist(center) <= CHARGE_HIT_RADIUS
    })
    .map(|(id, _)| id.clone())
    .collect();
  for pid in nearby_players {
    events.push(WorldEvent::Attack {
      attacker: player_id.clone(),
      target:   Damager::Player(pid.clone()),
      damage,
      crit:     false,
    });
    if let Some(other) = players.get_mut(&pid) {
      apply_damage_to_player(
        other,
        damage,
        Damager::Player(player_id.clone()),
        now,
        events,
        balance.killer_window_s,
      );
    }
  }

  let hit_mobs: Vec<MobId> = mobs
    .values()
    .filter(|m| m.alive() && m.position.dist(center) <= CHARGE_HIT_RADIUS)
    .map(|m| m.id.clone())
    .collect();
  for mid in hit_mobs {
    events.push(WorldEvent::Attack {
      attacker: player_id.clone(),
      target:   Damager::Mob(mid.clone()),
      damage,
      crit:     false,
    });
    let died = match mobs.get_mut(&mid) {
      Some(m) => m.take_damage(damage, Some(player_id), now),
      None => false,
    };
    if died {
      super::on_mob_death(&mid, players, mobs, now, balance.killer_window_s, events);
    }
  }
}

/// Applies `f` to the caster and every living teammate within `range`.
fn aoe_allies(
  player_id: &PlayerId,
  players: &mut HashMap<PlayerId, Player>,
  range: f64,
  f: impl Fn(&mut Player, &PlayerId, Instant),
  now: Instant,
) {
  let (center, team) = {
    let Some(p) = players.get(player_id) else { return };
    (p.position(), p.team().clone())
  };
  for other in players.values_mut() {
    if other.alive() && other.team() == &team && other.position().dist(center) <= range {
      f(other, player_id, now);
    }
  }
}
