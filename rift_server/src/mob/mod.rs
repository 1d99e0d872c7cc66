//! Mobs. One struct covers every NPC; boss behaviour hangs off an optional
//! [`BossState`] extension rather than a subtype, so the simulator and the
//! snapshot layer both see the same shape.

pub mod ai;
pub mod spawn;

use rift_common::{
  math::Vec2,
  util::{MobId, PlayerId, RoomId},
};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MobType {
  Husk,
  Stalker,
  Warden,
  Ravager,
  Boss,
}

impl MobType {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Husk => "husk",
      Self::Stalker => "stalker",
      Self::Warden => "warden",
      Self::Ravager => "ravager",
      Self::Boss => "boss",
    }
  }
}

/// The mob state machine. `Dead` is terminal except through a designed
/// respawn; any state goes to `Dead` when hp hits 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MobState {
  Spawning,
  Idle,
  Patrol,
  Alert,
  Pursuing,
  Attacking,
  Fleeing,
  Guarding,
  Casting,
  /// Boss only.
  Enraged,
  Stunned,
  Dead,
}

impl MobState {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Spawning => "spawning",
      Self::Idle => "idle",
      Self::Patrol => "patrol",
      Self::Alert => "alert",
      Self::Pursuing => "pursuing",
      Self::Attacking => "attacking",
      Self::Fleeing => "fleeing",
      Self::Guarding => "guarding",
      Self::Casting => "casting",
      Self::Enraged => "enraged",
      Self::Stunned => "stunned",
      Self::Dead => "dead",
    }
  }

  pub fn is_dead(&self) -> bool { matches!(self, Self::Dead) }
}

/// A mob's rolled stats. The base values come from the type template and are
/// multiplied by the difficulty scale at spawn time.
#[derive(Debug, Clone, PartialEq)]
pub struct MobStats {
  pub max_hp:            i32,
  pub damage:            i32,
  pub speed:             f64,
  pub detection_range:   f64,
  pub attack_range:      f64,
  pub attack_cooldown_s: f64,
  pub aggression:        f64,
  /// XP granted to the killer.
  pub xp:                i64,
}

/// Priority bucket, by distance to the nearest live player. Each bucket gets
/// a fixed processing budget per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
  Critical,
  High,
  Medium,
  Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u32);

/// Boss-only extension state. Present iff the mob uses the boss template.
#[derive(Debug, Clone, PartialEq)]
pub struct BossState {
  pub enraged:          bool,
  pub minions_summoned: bool,
  /// The cooldown before the enrage multiplier, so enrage can shorten it
  /// exactly once.
  pub base_attack_cooldown_s: f64,
  pub heal_ready_at:    Option<Instant>,
}

impl BossState {
  pub fn new(base_attack_cooldown_s: f64) -> Self {
    BossState {
      enraged: false,
      minions_summoned: false,
      base_attack_cooldown_s,
      heal_ready_at: None,
    }
  }
}

#[derive(Debug, Clone)]
pub struct Mob {
  pub id:       MobId,
  pub ty:       MobType,
  pub position: Vec2,
  pub room_id:  RoomId,
  pub state:    MobState,
  pub hp:       i32,
  pub stats:    MobStats,

  pub target:        Option<PlayerId>,
  pub patrol_target: Option<Vec2>,
  /// Where a guarding or idle mob drifts back to.
  pub home:          Vec2,

  pub last_attack:  Option<Instant>,
  pub priority:     Priority,
  pub group:        Option<GroupId>,
  pub boss:         Option<BossState>,

  /// Set whenever anything snapshot-visible changed this tick.
  pub dirty: bool,

  pub spawned_at:  Instant,
  pub died_at:     Option<Instant>,
  pub state_since: Instant,

  pub last_damager: Option<(PlayerId, Instant)>,
}

impl Mob {
  pub fn alive(&self) -> bool { !self.state.is_dead() }

  pub fn health_pct(&self) -> f64 { f64::from(self.hp.max(0)) / f64::from(self.stats.max_hp) }

  pub fn is_boss(&self) -> bool { self.boss.is_some() }

  /// Moves the state machine. Transitions out of `Dead` are ignored; the
  /// only way back is a designed respawn, which builds a fresh mob.
  pub fn set_state(&mut self, state: MobState, now: Instant) {
    if self.state == state || self.state.is_dead() {
      return;
    }
    self.state = state;
    self.state_since = now;
    self.dirty = true;
  }

  /// Applies damage from a player. Returns `true` if this kills the mob.
  pub fn take_damage(&mut self, amount: i32, from: Option<&PlayerId>, now: Instant) -> bool {
    if self.state.is_dead() {
      return false;
    }
    self.hp -= amount.max(1);
    self.dirty = true;
    if let Some(p) = from {
      self.last_damager = Some((p.clone(), now));
    }
    if self.hp <= 0 {
      self.hp = 0;
      self.state = MobState::Dead;
      self.state_since = now;
      self.died_at = Some(now);
      true
    } else {
      false
    }
  }

  pub fn attack_cooldown(&self) -> f64 { self.stats.attack_cooldown_s }

  pub fn attack_ready(&self, now: Instant) -> bool {
    match self.last_attack {
      Some(t) => now.duration_since(t).as_secs_f64() >= self.attack_cooldown(),
      None => true,
    }
  }
}

/// A pack of up to four mobs that coordinate. The leader is the first
/// member; pursuit spreads members on a circle around the shared target.
#[derive(Debug, Clone, PartialEq)]
pub struct MobGroup {
  pub id:      GroupId,
  pub members: Vec<MobId>,
  pub target:  Option<PlayerId>,
}

pub const MAX_GROUP_SIZE: usize = 4;

impl MobGroup {
  pub fn new(id: GroupId) -> Self { MobGroup { id, members: vec![], target: None } }

  pub fn leader(&self) -> Option<&MobId> { self.members.first() }

  pub fn is_full(&self) -> bool { self.members.len() >= MAX_GROUP_SIZE }
}
