//! Input ingestion. Datagrams arrive in any order; each player gets a
//! reorder buffer keyed by sequence number. A frame is accepted only if its
//! sequence is beyond the last acknowledged one, and the tick drain hands
//! back the largest contiguous run so the simulation always applies inputs
//! in order, each at most once.

use parking_lot::{Mutex, RwLock};
use rift_common::{net::sb::InputFrame, util::PlayerId};
use std::collections::{BTreeMap, HashMap};

/// Most frames a single player may have waiting. Past this the oldest
/// pending frame is dropped; a client this far ahead is resending anyway.
const MAX_PENDING: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
  /// The player has no registered buffer (no session).
  UnknownPlayer,
  /// Sequence at or below the last acknowledged one; a late duplicate.
  Stale,
  /// The move vector is longer than the configured maximum.
  MagnitudeExceeded,
}

#[derive(Debug, Default)]
struct Queue {
  last_acked: u32,
  pending:    BTreeMap<u32, InputFrame>,
}

impl Queue {
  /// Pops the largest contiguous run starting right after `last_acked`.
  fn drain_ready(&mut self) -> Vec<InputFrame> {
    let mut out = vec![];
    let mut next = self.last_acked.wrapping_add(1);
    while let Some(frame) = self.pending.remove(&next) {
      out.push(frame);
      self.last_acked = next;
      next = next.wrapping_add(1);
    }
    out
  }
}

/// The per-player input buffers. Accessed by the transport thread on push
/// and by the tick loop on drain; the per-player mutex keeps contention to
/// a single player's queue.
#[derive(Default)]
pub struct InputBuffer {
  players: RwLock<HashMap<PlayerId, Mutex<Queue>>>,
}

impl InputBuffer {
  pub fn new() -> Self { InputBuffer::default() }

  /// Registers a player, seeding the acknowledgement point. Reconnects seed
  /// with the sequence saved in the session so late duplicates from before
  /// the disconnect stay rejected.
  pub fn register(&self, player: PlayerId, last_acked: u32) {
    self
      .players
      .write()
      .insert(player, Mutex::new(Queue { last_acked, pending: BTreeMap::new() }));
  }

  /// Discards a player's buffered frames and the buffer itself, in one
  /// step. Returns the last acknowledged sequence for session freezing.
  pub fn remove(&self, player: &PlayerId) -> Option<u32> {
    self.players.write().remove(player).map(|q| q.into_inner().last_acked)
  }

  /// Validates and buffers one frame. The magnitude check compares squared
  /// lengths so a vector of exactly the limit is accepted regardless of
  /// how the square root would round.
  pub fn push(
    &self,
    player: &PlayerId,
    frame: InputFrame,
    max_magnitude: f64,
  ) -> Result<(), PushError> {
    if frame.movement.len_squared() > max_magnitude * max_magnitude {
      return Err(PushError::MagnitudeExceeded);
    }
    let players = self.players.read();
    let queue = players.get(player).ok_or(PushError::UnknownPlayer)?;
    let mut q = queue.lock();
    if frame.sequence <= q.last_acked {
      return Err(PushError::Stale);
    }
    if q.pending.len() >= MAX_PENDING {
      let oldest = *q.pending.keys().next().expect("non-empty");
      q.pending.remove(&oldest);
    }
    q.pending.insert(frame.sequence, frame);
    Ok(())
  }

  /// Drains every player's ready frames for this tick.
  pub fn drain_ready(&self) -> HashMap<PlayerId, Vec<InputFrame>> {
    let players = self.players.read();
    let mut out = HashMap::new();
    for (id, queue) in players.iter() {
      let frames = queue.lock().drain_ready();
      if !frames.is_empty() {
        out.insert(id.clone(), frames);
      }
    }
    out
  }

  /// The last consumed sequence for a player, echoed in snapshots.
  pub fn last_acked(&self, player: &PlayerId) -> Option<u32> {
    self.players.read().get(player).map(|q| q.lock().last_acked)
  }

  /// Last consumed sequences for every registered player.
  pub fn all_acked(&self) -> HashMap<PlayerId, u32> {
    self
      .players
      .read()
      .iter()
      .map(|(id, q)| (id.clone(), q.lock().last_acked))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use rift_common::math::Vec2;

  fn frame(seq: u32) -> InputFrame {
    InputFrame {
      sequence:     seq,
      movement:     Vec2::new(1.0, 0.0),
      aim:          Vec2::new(1.0, 0.0),
      is_attacking: false,
      is_sprinting: false,
      ability:      None,
    }
  }

  fn setup() -> (InputBuffer, PlayerId) {
    let buf = InputBuffer::new();
    let p = PlayerId::new("p1");
    buf.register(p.clone(), 0);
    (buf, p)
  }

  #[test]
  fn reordered_frames_drain_in_order() {
    let (buf, p) = setup();
    // Arrive 7, 9, 8.
    for seq in [7, 9, 8] {
      buf.push(&p, frame(seq), 1.1).unwrap();
    }
    // 1..=6 never arrived, so nothing is contiguous with ack 0.
    assert!(buf.drain_ready().is_empty());
    // Fill the gap.
    for seq in 1..=6 {
      buf.push(&p, frame(seq), 1.1).unwrap();
    }
    let drained = buf.drain_ready();
    let seqs: Vec<u32> = drained[&p].iter().map(|f| f.sequence).collect();
    assert_eq!(seqs, (1..=9).collect::<Vec<u32>>());
    assert_eq!(buf.last_acked(&p), Some(9));
  }

  #[test]
  fn late_duplicate_is_dropped() {
    let (buf, p) = setup();
    for seq in [1, 2, 3] {
      buf.push(&p, frame(seq), 1.1).unwrap();
    }
    buf.drain_ready();
    assert_eq!(buf.push(&p, frame(2), 1.1), Err(PushError::Stale));
    assert_eq!(buf.last_acked(&p), Some(3));
  }

  #[test]
  fn magnitude_boundary() {
    let (buf, p) = setup();
    let mut ok = frame(1);
    ok.movement = Vec2::new(1.1, 0.0);
    assert_eq!(buf.push(&p, ok, 1.1), Ok(()));
    let mut too_long = frame(2);
    too_long.movement = Vec2::new(1.1001, 0.0);
    assert_eq!(buf.push(&p, too_long, 1.1), Err(PushError::MagnitudeExceeded));
  }

  #[test]
  fn removal_discards_everything() {
    let (buf, p) = setup();
    for seq in 1..=5 {
      buf.push(&p, frame(seq), 1.1).unwrap();
    }
    assert_eq!(buf.remove(&p), Some(0));
    assert_eq!(buf.push(&p, frame(6), 1.1), Err(PushError::UnknownPlayer));
    assert!(buf.drain_ready().is_empty());
  }

  #[test]
  fn reconnect_seeds_ack() {
    let buf = InputBuffer::new();
    let p = PlayerId::new("p1");
    buf.register(p.clone(), 41);
    assert_eq!(buf.push(&p, frame(40), 1.1), Err(PushError::Stale));
    assert_eq!(buf.push(&p, frame(42), 1.1), Ok(()));
    let drained = buf.drain_ready();
    assert_eq!(drained[&p].len(), 1);
    assert_eq!(buf.last_acked(&p), Some(42));
  }

  #[test]
  fn pending_cap_drops_oldest() {
    let (buf, p) = setup();
    // Leave a gap at 1 so nothing drains, then overflow the buffer.
    for seq in 2..(2 + MAX_PENDING as u32 + 5) {
      buf.push(&p, frame(seq), 1.1).unwrap();
    }
    buf.push(&p, frame(1), 1.1).unwrap();
    let drained = buf.drain_ready();
    // Sequence 2..=6 were evicted by the overflow, so only frame 1 drains.
    assert_eq!(drained[&p].len(), 1);
  }
}
