//! Extraction. A player near an active point starts a timer; holding inside
//! the stay range until the duration elapses removes them from the world
//! with bonus XP for what they carried out. Multiple players can extract
//! from the same point at once, each on their own timer.

use crate::{
  error::GameError,
  event::WorldEvent,
  player::Player,
  world::ExtractionPoint,
};
use rift_common::util::{ExtractionId, PlayerId};
use std::{collections::HashMap, time::Instant};

/// How close a player must be to start extracting.
pub const ACTIVATION_RANGE: f64 = 5.0;
/// Moving further than this cancels a running extraction.
pub const STAY_RANGE: f64 = 3.0;

pub fn start(
  points: &mut HashMap<ExtractionId, ExtractionPoint>,
  players: &HashMap<PlayerId, Player>,
  player_id: &PlayerId,
  extraction_id: &ExtractionId,
  now: Instant,
  events: &mut Vec<WorldEvent>,
) -> Result<(), GameError> {
  let player = players.get(player_id).ok_or(GameError::NotFound)?;
  if !player.alive() {
    return Err(GameError::NotAlive);
  }
  let point = points.get_mut(extraction_id).ok_or(GameError::NotFound)?;
  if !point.active {
    return Err(GameError::LockedTarget);
  }
  if player.position().dist(point.position) > ACTIVATION_RANGE {
    return Err(GameError::OutOfRange);
  }
  // Starting twice just restarts the timer.
  point.extracting.insert(player_id.clone(), now);
  events.push(WorldEvent::ExtractionStarted {
    player: player_id.clone(),
    point:  extraction_id.clone(),
  });
  Ok(())
}

pub fn cancel(
  points: &mut HashMap<ExtractionId, ExtractionPoint>,
  player_id: &PlayerId,
  extraction_id: &ExtractionId,
  events: &mut Vec<WorldEvent>,
) {
  if let Some(point) = points.get_mut(extraction_id) {
    if point.extracting.remove(player_id).is_some() {
      events.push(WorldEvent::ExtractionCancelled {
        player: player_id.clone(),
        point:  extraction_id.clone(),
      });
    }
  }
}

/// Advances every running extraction. Returns the players whose extraction
/// completed this tick; the caller removes them from the world at the end
/// of the tick.
pub fn tick(
  points: &mut HashMap<ExtractionId, ExtractionPoint>,
  players: &HashMap<PlayerId, Player>,
  now: Instant,
  events: &mut Vec<WorldEvent>,
) -> Vec<PlayerId> {
  let mut completed = vec![];
  for point in points.values_mut() {
    let mut cancelled = vec![];
    let mut done = vec![];
    for (pid, started) in point.extracting.iter() {
      let Some(player) = players.get(pid) else {
        cancelled.push(pid.clone());
        continue;
      };
      if !player.alive() || player.position().dist(point.position) > STAY_RANGE {
        cancelled.push(pid.clone());
        continue;
      }
      if now.duration_since(*started).as_secs_f64() >= point.duration_s {
        done.push(pid.clone());
      }
    }
    for pid in cancelled {
      point.extracting.remove(&pid);
      events.push(WorldEvent::ExtractionCancelled { player: pid, point: point.id.clone() });
    }
    for pid in done {
      point.extracting.remove(&pid);
      let bonus_xp = players.get(&pid).map(|p| p.inventory.rarity_sum() * 100).unwrap_or(0);
      events.push(WorldEvent::ExtractionCompleted {
        player: pid.clone(),
        point: point.id.clone(),
        bonus_xp,
      });
      completed.push(pid);
    }
  }
  completed
}

/// Progress per extracting player for a point, `0.0..=1.0`.
pub fn progress(point: &ExtractionPoint, now: Instant) -> Vec<(PlayerId, f64)> {
  point
    .extracting
    .iter()
    .map(|(pid, started)| {
      let elapsed = now.duration_since(*started).as_secs_f64();
      (pid.clone(), (elapsed / point.duration_s).clamp(0.0, 1.0))
    })
    .collect()
}
