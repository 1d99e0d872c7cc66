//! Movement integration for one player. The world calls this once per tick
//! with the player's drained input frames, then resolves collisions and
//! updates room membership itself.

use super::Player;
use crate::config::MovementConfig;
use rift_common::net::sb::{AbilityKind, InputFrame};

/// The non-movement intent extracted from a tick's input frames. Attacks and
/// abilities resolve later in the tick, in the combat phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickIntents {
  pub attack:  bool,
  pub ability: Option<AbilityKind>,
}

/// Applies a tick's input frames to the player and integrates their
/// position. Returns the combat intents found in the frames.
///
/// Frames arrive in ascending sequence order. Movement state (aim, move
/// vector, sprint) takes the value of the newest frame; attack and ability
/// intents are collected across all of them so a quickly tapped attack isn't
/// lost to frame coalescing. When no frames arrived this tick the player
/// keeps their last velocity, since a lost datagram shouldn't stop them
/// mid-stride.
pub fn integrate(
  p: &mut Player,
  frames: &[InputFrame],
  dt: f64,
  cfg: &MovementConfig,
  half_extent: f64,
) -> TickIntents {
  if !p.vitals.alive {
    p.motion.velocity = rift_common::math::Vec2::zero();
    return TickIntents::default();
  }

  let mut intents = TickIntents::default();
  for f in frames {
    intents.attack |= f.is_attacking;
    if intents.ability.is_none() {
      intents.ability = f.ability;
    }
  }

  if let Some(last) = frames.last() {
    let aim = last.aim.normalized();
    if aim.len_squared() > 0.0 {
      p.motion.aim = aim;
    }
    p.motion.sprinting = last.is_sprinting;

    let mut speed = cfg.base_speed * p.class_stats().speed_mul;
    speed *= p.status.speed_multiplier();
    if p.motion.sprinting && p.vitals.mana > 0.0 {
      speed *= cfg.sprint_mul;
      p.vitals.mana = (p.vitals.mana - cfg.mana_cost_per_sprint_second * dt).max(0.0);
    }
    p.motion.velocity = last.movement * speed;
  }

  p.motion.position =
    (p.motion.position + p.motion.velocity * dt).clamped_to_plane(half_extent);
  intents
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{config::BalanceConfig, player::Player};
  use pretty_assertions::assert_eq;
  use rift_common::{
    math::Vec2,
    net::sb::PlayerClass,
    util::{PlayerId, RoomId, TeamId},
  };
  use std::time::Instant;

  fn scout() -> Player {
    Player::new(
      PlayerId::new("p1"),
      "runner".into(),
      TeamId::new("team1"),
      PlayerClass::Scout,
      Vec2::zero(),
      RoomId::new("room_0_0"),
      &BalanceConfig::default(),
      Instant::now(),
    )
  }

  fn frame(seq: u32, movement: Vec2, sprint: bool) -> InputFrame {
    InputFrame {
      sequence: seq,
      movement,
      aim: Vec2::new(1.0, 0.0),
      is_attacking: false,
      is_sprinting: sprint,
      ability: None,
    }
  }

  #[test]
  fn walk_speed_uses_class_modifier() {
    let mut p = scout();
    let cfg = MovementConfig::default();
    integrate(&mut p, &[frame(1, Vec2::new(1.0, 0.0), false)], 1.0, &cfg, 240.0);
    // base 5.0 * scout 1.1
    assert_eq!(p.motion.position, Vec2::new(5.5, 0.0));
  }

  #[test]
  fn sprint_multiplies_and_drains_mana() {
    let mut p = scout();
    let cfg = MovementConfig::default();
    let mana_before = p.vitals.mana;
    integrate(&mut p, &[frame(1, Vec2::new(1.0, 0.0), true)], 1.0, &cfg, 240.0);
    assert_eq!(p.motion.position.x, 5.5 * 1.5);
    assert_eq!(p.vitals.mana, mana_before - 1.0);
  }

  #[test]
  fn no_sprint_without_mana() {
    let mut p = scout();
    p.vitals.mana = 0.0;
    let cfg = MovementConfig::default();
    integrate(&mut p, &[frame(1, Vec2::new(1.0, 0.0), true)], 1.0, &cfg, 240.0);
    assert_eq!(p.motion.position.x, 5.5);
  }

  #[test]
  fn velocity_persists_without_frames() {
    let mut p = scout();
    let cfg = MovementConfig::default();
    integrate(&mut p, &[frame(1, Vec2::new(1.0, 0.0), false)], 1.0, &cfg, 240.0);
    integrate(&mut p, &[], 1.0, &cfg, 240.0);
    assert_eq!(p.motion.position, Vec2::new(11.0, 0.0));
  }

  #[test]
  fn position_clamped_to_plane() {
    let mut p = scout();
    let cfg = MovementConfig::default();
    p.motion.position = Vec2::new(239.0, 0.0);
    for seq in 1..=10 {
      integrate(&mut p, &[frame(seq, Vec2::new(1.0, 0.0), false)], 1.0, &cfg, 240.0);
    }
    assert_eq!(p.motion.position.x, 240.0);
  }

  #[test]
  fn intents_collected_across_frames() {
    let mut p = scout();
    let cfg = MovementConfig::default();
    let mut f1 = frame(1, Vec2::zero(), false);
    f1.is_attacking = true;
    let mut f2 = frame(2, Vec2::zero(), false);
    f2.ability = Some(rift_common::net::sb::AbilityKind::Dash);
    let intents = integrate(&mut p, &[f1, f2], 0.016, &cfg, 240.0);
    assert!(intents.attack);
    assert_eq!(intents.ability, Some(rift_common::net::sb::AbilityKind::Dash));
  }

  #[test]
  fn dead_players_do_not_move() {
    let mut p = scout();
    p.vitals.alive = false;
    let cfg = MovementConfig::default();
    let intents = integrate(&mut p, &[frame(1, Vec2::new(1.0, 0.0), false)], 1.0, &cfg, 240.0);
    assert_eq!(p.motion.position, Vec2::zero());
    assert_eq!(intents, TickIntents::default());
  }
}
