//! Status effects. A player carries at most one effect of each kind;
//! re-applying a kind overwrites its expiry and magnitude instead of
//! stacking. Poison and regen are tick based and accumulate fractional
//! amounts so slow ticks don't lose damage.

use rift_common::util::PlayerId;
use std::{collections::HashMap, time::Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
  /// Flat 50% incoming damage reduction. The separate shield *pool* lives on
  /// the player's vitals; this is the reduction half of the tank's ability.
  Shield,
  /// Halves movement speed.
  Slow,
  /// 1.5x movement speed.
  Speed,
  /// Damage over time, `magnitude` per second. Can kill.
  Poison,
  /// Healing over time, `magnitude` per second.
  Regen,
  /// Hidden from mob detection, broken by attacking.
  Stealth,
}

impl StatusKind {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Shield => "shield",
      Self::Slow => "slow",
      Self::Speed => "speed",
      Self::Poison => "poison",
      Self::Regen => "regen",
      Self::Stealth => "stealth",
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusEffect {
  pub kind:       StatusKind,
  pub magnitude:  f64,
  pub applied_at: Instant,
  pub expires_at: Instant,
  pub source:     Option<PlayerId>,
  /// Fractional damage/heal carried between ticks.
  acc:            f64,
}

/// What a status tick did to the player. Applied by the caller, which owns
/// the vitals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusTick {
  Damage(i32),
  Heal(i32),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSet {
  effects: HashMap<StatusKind, StatusEffect>,
}

impl StatusSet {
  pub fn new() -> Self { StatusSet::default() }

  /// Applies an effect. Same kind overwrites, it never stacks.
  pub fn apply(
    &mut self,
    kind: StatusKind,
    magnitude: f64,
    duration_s: f64,
    source: Option<PlayerId>,
    now: Instant,
  ) {
    self.effects.insert(kind, StatusEffect {
      kind,
      magnitude,
      applied_at: now,
      expires_at: now + std::time::Duration::from_secs_f64(duration_s),
      source,
      acc: 0.0,
    });
  }

  pub fn remove(&mut self, kind: StatusKind) -> Option<StatusEffect> { self.effects.remove(&kind) }
  pub fn has(&self, kind: StatusKind) -> bool { self.effects.contains_key(&kind) }
  pub fn get(&self, kind: StatusKind) -> Option<&StatusEffect> { self.effects.get(&kind) }
  pub fn iter(&self) -> impl Iterator<Item = &StatusEffect> { self.effects.values() }
  pub fn is_empty(&self) -> bool { self.effects.is_empty() }

  /// Advances tick based effects and drops expired ones. Returns the
  /// integer damage/heals to apply, in a stable order.
  pub fn tick(&mut self, dt: f64, now: Instant) -> Vec<StatusTick> {
    let mut out = vec![];
    for e in self.effects.values_mut() {
      if now >= e.expires_at {
        continue;
      }
      match e.kind {
        StatusKind::Poison => {
          e.acc += e.magnitude * dt;
          let whole = e.acc.floor() as i32;
          if whole > 0 {
            e.acc -= f64::from(whole);
            out.push(StatusTick::Damage(whole));
          }
        }
        StatusKind::Regen => {
          e.acc += e.magnitude * dt;
          let whole = e.acc.floor() as i32;
          if whole > 0 {
            e.acc -= f64::from(whole);
            out.push(StatusTick::Heal(whole));
          }
        }
        _ => {}
      }
    }
    self.effects.retain(|_, e| now < e.expires_at);
    out
  }

  /// The combined movement speed multiplier from slow/speed effects.
  pub fn speed_multiplier(&self) -> f64 {
    let mut mul = 1.0;
    if self.has(StatusKind::Slow) {
      mul *= 0.5;
    }
    if let Some(e) = self.get(StatusKind::Speed) {
      mul *= e.magnitude.max(1.0);
    }
    mul
  }

  /// Incoming damage multiplier. 0.5 while the shield status is up.
  pub fn damage_multiplier(&self) -> f64 {
    if self.has(StatusKind::Shield) {
      0.5
    } else {
      1.0
    }
  }

  pub fn is_stealthed(&self) -> bool { self.has(StatusKind::Stealth) }
}
