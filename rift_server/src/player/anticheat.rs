//! The movement validator. Keeps a short rolling history of server side
//! positions per player, and flags speeds or jumps that the player's stats
//! cannot explain. The server is authoritative, so a violation here means a
//! bug or someone poking at the input surface; either way the move is
//! rejected and the player accumulates suspicion.

use rift_common::math::Vec2;
use std::{collections::VecDeque, time::Instant};

/// Speeds up to this factor over the expected maximum are tolerated, to
/// absorb float error and collision push.
const SPEED_TOLERANCE: f64 = 1.2;
/// Flags past this count mark the player as monitored.
const MONITOR_THRESHOLD: u32 = 5;
const HISTORY_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
  Ok,
  /// The move was implausible. The caller should keep the previous
  /// position.
  Rejected,
}

#[derive(Debug, Clone)]
pub struct Tracker {
  history:    VecDeque<(Instant, Vec2)>,
  suspicion:  u32,
  monitored:  bool,
  /// Set for one check when an ability legitimately teleports the player.
  teleport_ok: bool,
}

impl Default for Tracker {
  fn default() -> Self { Tracker::new() }
}

impl Tracker {
  pub fn new() -> Self {
    Tracker {
      history:     VecDeque::with_capacity(HISTORY_LEN),
      suspicion:   0,
      monitored:   false,
      teleport_ok: false,
    }
  }

  pub fn suspicion(&self) -> u32 { self.suspicion }
  pub fn monitored(&self) -> bool { self.monitored }

  /// Marks the next movement check as an authorized teleport (dash).
  pub fn authorize_teleport(&mut self) { self.teleport_ok = true; }

  /// Records a proposed position and judges it against the expected maximum
  /// speed in units per second. `teleport_tolerance` is the longest step
  /// that may happen in a single check without authorization.
  pub fn record(
    &mut self,
    now: Instant,
    pos: Vec2,
    expected_max_speed: f64,
    teleport_tolerance: f64,
  ) -> Verdict {
    let teleport_ok = std::mem::take(&mut self.teleport_ok);
    let verdict = match self.history.back() {
      Some(&(prev_t, prev_pos)) => {
        let dt = now.duration_since(prev_t).as_secs_f64();
        let dist = pos.dist(prev_pos);
        if teleport_ok {
          Verdict::Ok
        } else if dist > teleport_tolerance && dist > expected_max_speed * dt.max(1e-3) {
          Verdict::Rejected
        } else if dt > 1e-3 && self.rolling_speed(now, pos) > expected_max_speed * SPEED_TOLERANCE
        {
          Verdict::Rejected
        } else {
          Verdict::Ok
        }
      }
      None => Verdict::Ok,
    };
    match verdict {
      Verdict::Ok => {
        if self.history.len() == HISTORY_LEN {
          self.history.pop_front();
        }
        self.history.push_back((now, pos));
      }
      Verdict::Rejected => {
        self.suspicion += 1;
        if self.suspicion >= MONITOR_THRESHOLD {
          self.monitored = true;
        }
      }
    }
    verdict
  }

  /// Average speed over the retained history, with `pos` as the newest
  /// sample.
  fn rolling_speed(&self, now: Instant, pos: Vec2) -> f64 {
    let Some(&(oldest_t, oldest_pos)) = self.history.front() else { return 0.0 };
    let elapsed = now.duration_since(oldest_t).as_secs_f64();
    if elapsed < 1e-3 {
      return 0.0;
    }
    let mut dist = 0.0;
    let mut prev = oldest_pos;
    for &(_, p) in self.history.iter().skip(1) {
      dist += p.dist(prev);
      prev = p;
    }
    dist += pos.dist(prev);
    dist / elapsed
  }
}
