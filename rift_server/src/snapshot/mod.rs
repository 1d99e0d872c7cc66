//! The snapshot builder. Once per send tick it turns a world's state and
//! the tick's events into delta compressed clientbound packets. Message
//! bodies are rented from striped pools, shared between subscribers behind
//! an `Arc`, and reclaimed after the transport lets go.

pub mod pool;

use crate::{
  event::{Damager, WorldEvent},
  extraction,
  world::World,
};
use parking_lot::Mutex;
use pool::{DeferredReturns, Pool, Recycle};
use rift_common::{
  math::Vec2,
  net::cb,
  util::{PlayerId, RoomId, TeamId, WorldId},
};
use std::{
  collections::HashMap,
  sync::Arc,
  time::Instant,
};

/// Worlds send their essential delta every Nth frame.
const WORLD_SEND_DIVISOR: u64 = 3;
/// Player state batches go out every Nth frame.
const PLAYER_SEND_DIVISOR: u64 = 2;

const POSITION_EPSILON: f64 = 0.01;
const VELOCITY_EPSILON: f64 = 0.01;
const DIRECTION_EPSILON: f64 = 0.5;

impl Recycle for cb::WorldEssential {
  fn reset(&mut self) {
    self.world_id = WorldId::new("");
    self.frame = 0;
    self.completed = false;
    self.winning_team = None;
    self.rooms.clear();
    self.extraction.clear();
  }
}
impl Recycle for cb::PlayerBatch {
  fn reset(&mut self) {
    self.world_id = WorldId::new("");
    self.frame = 0;
    self.players.clear();
    self.acknowledged_inputs.clear();
  }
}
impl Recycle for cb::MobChunk {
  fn reset(&mut self) {
    self.world_id = WorldId::new("");
    self.frame = 0;
    self.mobs.clear();
  }
}

#[derive(Debug, Clone, PartialEq)]
struct LastSent {
  position:  Vec2,
  velocity:  Vec2,
  direction: f64,
  health:    i32,
  alive:     bool,
}

#[derive(Default)]
struct SendState {
  players:   HashMap<PlayerId, LastSent>,
  rooms:     HashMap<RoomId, (bool, Option<TeamId>)>,
  completed: bool,
}

/// What one build produced. Broadcast packets go to every subscriber of the
/// world; directed packets go to a single player.
#[derive(Default)]
pub struct Output {
  pub broadcast: Vec<cb::Packet>,
  pub directed:  Vec<(PlayerId, cb::Packet)>,
}

pub struct SnapshotBuilder {
  world_pool:  Pool<cb::WorldEssential>,
  player_pool: Pool<cb::PlayerBatch>,
  mob_pool:    Pool<cb::MobChunk>,

  world_returns:  DeferredReturns<cb::WorldEssential>,
  player_returns: DeferredReturns<cb::PlayerBatch>,
  mob_returns:    DeferredReturns<cb::MobChunk>,

  send_states: Mutex<HashMap<WorldId, SendState>>,
}

impl Default for SnapshotBuilder {
  fn default() -> Self { SnapshotBuilder::new() }
}

impl SnapshotBuilder {
  pub fn new() -> Self {
    SnapshotBuilder {
      world_pool:     Pool::new(4, 16),
      player_pool:    Pool::new(4, 16),
      mob_pool:       Pool::new(4, 16),
      world_returns:  DeferredReturns::default(),
      player_returns: DeferredReturns::default(),
      mob_returns:    DeferredReturns::default(),
      send_states:    Mutex::new(HashMap::new()),
    }
  }

  /// Builds this tick's outbound packets for one world.
  pub fn build(
    &self,
    world: &World,
    events: &[WorldEvent],
    acks: &HashMap<PlayerId, u32>,
    frame: u64,
    now: Instant,
  ) -> Output {
    let mut out = Output::default();
    let mut send_states = self.send_states.lock();
    let send = send_states.entry(world.id().clone()).or_default();

    // Completion and extraction traffic shouldn't wait for the divisor.
    let force_world_send = events.iter().any(|e| {
      matches!(
        e,
        WorldEvent::RoomCompleted { .. }
          | WorldEvent::WorldCompleted { .. }
          | WorldEvent::ExtractionStarted { .. }
          | WorldEvent::ExtractionCancelled { .. }
          | WorldEvent::ExtractionCompleted { .. }
      )
    });

    let mut state = world.lock_state();

    if frame % PLAYER_SEND_DIVISOR == 0 {
      let mut batch = self.player_pool.rent();
      batch.world_id = world.id().clone();
      batch.frame = frame;
      for p in state.players.values() {
        let direction = p.motion.aim.angle();
        let changed = match send.players.get(p.id()) {
          Some(last) => {
            last.position.dist(p.position()) > POSITION_EPSILON
              || (last.velocity - p.motion.velocity).len() > VELOCITY_EPSILON
              || (last.direction - direction).abs() > DIRECTION_EPSILON
              || last.health != p.vitals.health
              || last.alive != p.alive()
          }
          None => true,
        };
        if !changed {
          continue;
        }
        send.players.insert(p.id().clone(), LastSent {
          position: p.position(),
          velocity: p.motion.velocity,
          direction,
          health: p.vitals.health,
          alive: p.alive(),
        });
        batch.players.push(cb::PlayerState {
          player_id: p.id().clone(),
          position:  p.position(),
          velocity:  p.motion.velocity,
          direction,
          health:    p.vitals.health,
          shield:    p.vitals.shield,
          alive:     p.alive(),
          room_id:   p.current_room.clone(),
        });
      }
      // Forget players no longer in the world so a rejoin resends fully.
      send.players.retain(|id, _| state.players.contains_key(id));
      batch.acknowledged_inputs = acks
        .iter()
        .filter(|(id, _)| state.players.contains_key(id))
        .map(|(id, seq)| cb::InputAck { player_id: id.clone(), sequence: *seq })
        .collect();
      if !batch.players.is_empty() || !batch.acknowledged_inputs.is_empty() {
        let arc = Arc::new(*batch);
        self.player_returns.push(arc.clone(), now);
        out.broadcast.push(cb::Packet::PlayerStatesBatch(arc));
      } else {
        self.player_pool.give_back(batch);
      }
    }

    if frame % WORLD_SEND_DIVISOR == 0 || force_world_send {
      // Dirty mobs.
      let mut chunk = self.mob_pool.rent();
      chunk.world_id = world.id().clone();
      chunk.frame = frame;
      for m in state.mobs.values_mut() {
        if !m.dirty {
          continue;
        }
        m.dirty = false;
        chunk.mobs.push(cb::MobUpdate {
          mob_id:   m.id.clone(),
          mob_type: m.ty.name().into(),
          position: m.position,
          room_id:  m.room_id.clone(),
          state:    m.state.name().into(),
          hp:       m.hp,
        });
      }
      if chunk.mobs.is_empty() {
        self.mob_pool.give_back(chunk);
      } else {
        let arc = Arc::new(*chunk);
        self.mob_returns.push(arc.clone(), now);
        out.broadcast.push(cb::Packet::MobUpdatesChunk(arc));
      }

      // Rooms whose completion state changed, extraction points, and the
      // completion flag.
      let mut essential = self.world_pool.rent();
      essential.world_id = world.id().clone();
      essential.frame = frame;
      essential.completed = state.completed;
      essential.winning_team = state.winning_team.clone();
      for room in state.rooms.values() {
        let entry = (room.completed, room.completing_team.clone());
        if send.rooms.get(&room.id) != Some(&entry) {
          send.rooms.insert(room.id.clone(), entry);
          essential.rooms.push(cb::RoomState {
            room_id:         room.id.clone(),
            completed:       room.completed,
            completing_team: room.completing_team.clone(),
          });
        }
      }
      for point in state.extraction.values() {
        essential.extraction.push(cb::ExtractionState {
          extraction_id: point.id.clone(),
          active:        point.active,
          extracting:    extraction::progress(point, now),
        });
      }
      let completion_changed = send.completed != state.completed;
      send.completed = state.completed;
      if !essential.rooms.is_empty()
        || completion_changed
        || essential.extraction.iter().any(|e| e.active || !e.extracting.is_empty())
        || force_world_send
      {
        let arc = Arc::new(*essential);
        self.world_returns.push(arc.clone(), now);
        out.broadcast.push(cb::Packet::WorldStateEssential(arc));
      } else {
        self.world_pool.give_back(essential);
        // Nothing changed; a bare frame beacon keeps client clocks moving.
        out.broadcast.push(cb::Packet::FrameUpdate { world_id: world.id().clone(), frame });
      }
    }

    drop(state);

    // Events: combat and loot fan out to the whole world, denials go back
    // to the player that asked.
    let mut combat_events = vec![];
    let mut loot_updates = vec![];
    for ev in events {
      match ev {
        WorldEvent::Attack { attacker, target, damage, crit } => {
          combat_events.push(cb::CombatEvent::Attack {
            attacker: attacker.clone(),
            target:   target.to_string(),
            damage:   *damage,
            crit:     *crit,
          });
        }
        WorldEvent::AbilityUsed { player, ability } => {
          combat_events
            .push(cb::CombatEvent::AbilityUsed { player: player.clone(), ability: *ability });
        }
        WorldEvent::PlayerDeath { victim, killer } => {
          combat_events.push(cb::CombatEvent::PlayerDeath {
            victim: victim.clone(),
            killer: killer.as_ref().map(Damager::to_string),
          });
        }
        WorldEvent::MobDeath { mob, killer } => {
          combat_events
            .push(cb::CombatEvent::MobDeath { mob: mob.clone(), killer: killer.clone() });
        }
        WorldEvent::BossPhaseChange { mob, phase } => {
          combat_events
            .push(cb::CombatEvent::BossPhase { mob: mob.clone(), phase: phase.name().into() });
        }
        WorldEvent::PvpEncounter { room } => {
          combat_events.push(cb::CombatEvent::PvpEncounter { room_id: room.clone() });
        }
        WorldEvent::LootSpawned { loot, name, rarity, room, position } => {
          loot_updates.push(cb::LootUpdate::Spawned {
            item: cb::LootView {
              loot_id:  loot.clone(),
              name:     name.clone(),
              rarity:   *rarity,
              position: *position,
              room_id:  room.clone(),
            },
          });
        }
        WorldEvent::LootPickedUp { loot, by } => {
          loot_updates.push(cb::LootUpdate::PickedUp { loot_id: loot.clone(), by: by.clone() });
        }
        WorldEvent::LootRemoved { loot } => {
          loot_updates.push(cb::LootUpdate::Removed { loot_id: loot.clone() });
        }
        WorldEvent::Denied { player, error } => {
          out
            .directed
            .push((player.clone(), crate::error::to_packet(error.code(), error)));
        }
        // Room changes ride along in the player batch; level ups show up as
        // max health changes. Extraction events force the world send above.
        WorldEvent::RoomChanged { .. }
        | WorldEvent::RoomCompleted { .. }
        | WorldEvent::WorldCompleted { .. }
        | WorldEvent::ExtractionStarted { .. }
        | WorldEvent::ExtractionCancelled { .. }
        | WorldEvent::ExtractionCompleted { .. }
        | WorldEvent::ItemUsed { .. }
        | WorldEvent::LevelUp { .. } => {}
      }
    }
    if !combat_events.is_empty() {
      out
        .broadcast
        .push(cb::Packet::CombatEvents { world_id: world.id().clone(), events: combat_events });
    }
    if !loot_updates.is_empty() {
      out
        .broadcast
        .push(cb::Packet::LootUpdates { world_id: world.id().clone(), updates: loot_updates });
    }

    out
  }

  /// Takes pooled buffers back once the transport is done with them. Runs
  /// off the tick path.
  pub fn reclaim(&self, now: Instant) {
    self.world_returns.reclaim(&self.world_pool, now);
    self.player_returns.reclaim(&self.player_pool, now);
    self.mob_returns.reclaim(&self.mob_pool, now);
  }

  /// Drops delta tracking for a destroyed world.
  pub fn forget_world(&self, id: &WorldId) { self.send_states.lock().remove(id); }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{config::Config, lobby::NewWorldPlayer};
  use rift_common::net::sb::PlayerClass;
  use rift_common::util::TeamId;

  fn test_world() -> Arc<World> {
    let config = Arc::new(Config::default());
    World::new(
      WorldId::new("world_1"),
      config,
      vec![
        NewWorldPlayer {
          id:    PlayerId::new("p1"),
          name:  "one".into(),
          team:  TeamId::new("team1"),
          class: PlayerClass::Scout,
        },
        NewWorldPlayer {
          id:    PlayerId::new("p2"),
          name:  "two".into(),
          team:  TeamId::new("team2"),
          class: PlayerClass::Tank,
        },
      ],
      Instant::now(),
    )
  }

  #[test]
  fn first_batch_includes_everyone_then_deltas() {
    let builder = SnapshotBuilder::new();
    let world = test_world();
    let acks = HashMap::new();
    let now = Instant::now();

    let out = builder.build(&world, &[], &acks, 2, now);
    let batch = out
      .broadcast
      .iter()
      .find_map(|p| match p {
        cb::Packet::PlayerStatesBatch(b) => Some(b.clone()),
        _ => None,
      })
      .expect("first send has every player");
    assert_eq!(batch.players.len(), 2);

    // Nothing moved: the next batch tick has no player entries.
    let out = builder.build(&world, &[], &acks, 4, now);
    let batch = out.broadcast.iter().find_map(|p| match p {
      cb::Packet::PlayerStatesBatch(b) => Some(b.clone()),
      _ => None,
    });
    assert!(batch.is_none() || batch.unwrap().players.is_empty());
  }

  #[test]
  fn acks_ride_in_player_batches() {
    let builder = SnapshotBuilder::new();
    let world = test_world();
    let mut acks = HashMap::new();
    acks.insert(PlayerId::new("p1"), 9_u32);
    let out = builder.build(&world, &[], &acks, 2, Instant::now());
    let batch = out
      .broadcast
      .iter()
      .find_map(|p| match p {
        cb::Packet::PlayerStatesBatch(b) => Some(b.clone()),
        _ => None,
      })
      .unwrap();
    assert_eq!(batch.acknowledged_inputs.len(), 1);
    assert_eq!(batch.acknowledged_inputs[0].sequence, 9);
  }

  #[test]
  fn denials_are_directed() {
    let builder = SnapshotBuilder::new();
    let world = test_world();
    let events = vec![WorldEvent::Denied {
      player: PlayerId::new("p1"),
      error:  crate::error::GameError::OutOfRange,
    }];
    let out = builder.build(&world, &events, &HashMap::new(), 1, Instant::now());
    assert_eq!(out.directed.len(), 1);
    assert_eq!(out.directed[0].0, PlayerId::new("p1"));
    match &out.directed[0].1 {
      cb::Packet::Error { code, .. } => assert_eq!(code, "out_of_range"),
      p => panic!("expected error, got {p:?}"),
    }
  }

  #[test]
  fn buffers_come_back_after_receivers_drop() {
    let builder = SnapshotBuilder::new();
    let world = test_world();
    let out = builder.build(&world, &[], &HashMap::new(), 2, Instant::now());
    drop(out);
    // All receiver clones are gone; a reclaim past the delay recycles.
    builder.reclaim(Instant::now() + std::time::Duration::from_secs(1));
    let out = builder.build(&world, &[], &HashMap::new(), 4, Instant::now());
    drop(out);
  }
}
