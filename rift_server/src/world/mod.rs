//! Worlds and the world manager.
//!
//! [`World`] owns one match's authoritative state: rooms, players, mobs,
//! loot, and extraction points. All of it sits behind a single mutex that is
//! taken once per tick by whichever worker thread runs this world's
//! `advance`; nothing else mutates game state.
//!
//! [`WorldManager`] owns the set of live worlds and the player to world
//! index. It builds worlds from ready lobbies and tears them down when they
//! empty out.

pub mod gen;
pub mod spatial;

use crate::{
  combat,
  config::Config,
  event::WorldEvent,
  extraction,
  item::Item,
  lobby::NewWorldPlayer,
  loot,
  mob::{ai, spawn, GroupId, Mob, MobGroup},
  player::{anticheat::Verdict, movement, Player},
  with_rng,
};
use gen::RoomLayout;
use parking_lot::{Mutex, MutexGuard, RwLock};
use rand::{seq::IteratorRandom, Rng};
use rift_common::{
  math::{GridPos, Vec2},
  net::sb::{ExtractionAction, InputFrame},
  util::{ExtractionId, LootId, MobId, PlayerId, RoomId, TeamId, WorldId},
};
use std::{
  collections::{HashMap, HashSet},
  sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
  },
  time::{Duration, Instant},
};

/// Dead mobs stay in the map this long before compaction removes them.
const MOB_CORPSE_GRACE: Duration = Duration::from_secs(5 * 60);
/// Fraction of rooms that must be completed to complete the world.
const WORLD_COMPLETION_FRACTION: f64 = 0.8;

#[derive(Debug, Clone, PartialEq)]
pub struct Room {
  pub id:              RoomId,
  pub grid:            GridPos,
  pub center:          Vec2,
  pub size:            f64,
  pub connections:     Vec<RoomId>,
  pub completed:       bool,
  pub completing_team: Option<TeamId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionPoint {
  pub id:         ExtractionId,
  pub position:   Vec2,
  pub room_id:    RoomId,
  pub active:     bool,
  pub duration_s: f64,
  /// Start time per extracting player. Timers are independent.
  pub extracting: HashMap<PlayerId, Instant>,
}

/// A player-scoped command that mutates world state. Queued by the net
/// layer and applied inside the tick, so results are totally ordered with
/// the rest of the simulation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
  LootGrab { player: PlayerId, loot: LootId },
  UseItem { player: PlayerId, item: LootId },
  Extraction { player: PlayerId, point: ExtractionId, action: ExtractionAction },
}

pub struct WorldState {
  pub rooms:      HashMap<RoomId, Room>,
  pub players:    HashMap<PlayerId, Player>,
  pub mobs:       HashMap<MobId, Mob>,
  pub loot:       HashMap<LootId, loot::LootItem>,
  pub extraction: HashMap<ExtractionId, ExtractionPoint>,
  pub groups:     HashMap<GroupId, MobGroup>,
  pub spatial:    spatial::SpatialIndex,

  pub completed:    bool,
  pub winning_team: Option<TeamId>,
  pub frame:        u64,

  events: Vec<WorldEvent>,

  /// Rooms currently contested, so the encounter event fires on the
  /// transition only.
  pvp_rooms: HashSet<RoomId>,

  ai_cursor:        usize,
  next_ai_decision: Instant,
  next_loot_spawn:  Instant,
  next_mob_spawn:   Instant,
  next_mob:         u32,
  next_loot:        u32,
  /// Mob population at generation time; dynamic spawning tops up over this
  /// baseline, bounded by `max_dynamic_mobs`.
  initial_mob_count: usize,
  dynamic_spawned:   usize,
}

pub struct World {
  id:         WorldId,
  created_at: Instant,
  layout:     RoomLayout,
  config:     Arc<Config>,
  state:      Mutex<WorldState>,
  pending:    Mutex<Vec<Command>>,
}

impl World {
  pub(crate) fn new(
    id: WorldId,
    config: Arc<Config>,
    players: Vec<NewWorldPlayer>,
    now: Instant,
  ) -> Arc<Self> {
    let layout = RoomLayout::from_config(&config.world_generation);
    let rooms = gen::rooms(&layout);
    let extraction =
      gen::extraction_points(&layout, config.game_balance.extraction_time_seconds);

    // Teams spawn in distinct corners, ordered by first appearance.
    let mut teams: Vec<TeamId> = vec![];
    for p in &players {
      if !teams.contains(&p.team) {
        teams.push(p.team.clone());
      }
    }
    let mut player_map = HashMap::new();
    for (i, p) in players.into_iter().enumerate() {
      let team_idx = gen::team_index(&teams, &p.team);
      // Offset players of the same team a little so they don't stack.
      let offset = Vec2::from_angle(i as f64 * 1.3) * 2.0;
      let position = layout.team_spawn(team_idx) + offset;
      let room = layout.room_at(position);
      player_map.insert(
        p.id.clone(),
        Player::new(p.id, p.name, p.team, p.class, position, room, &config.game_balance, now),
      );
    }

    let mut next_mob = 0_u32;
    let mut next_group = 0_u32;
    let spawn_rooms: Vec<spawn::SpawnRoom> = rooms
      .values()
      .map(|r| spawn::SpawnRoom {
        id:             r.id.clone(),
        center:         r.center,
        size:           r.size,
        has_extraction: extraction.values().any(|e| e.room_id == r.id),
      })
      .collect();
    let wid = id.clone();
    let (mobs, groups) = with_rng(|rng| {
      spawn::initial_population(
        &spawn_rooms,
        config.world_generation.mobs_per_room,
        &config.ai,
        config.ai.difficulty_scaling,
        now,
        rng,
        || {
          next_mob += 1;
          MobId::new(format!("{wid}_mob_{next_mob}"))
        },
        || {
          next_group += 1;
          GroupId(next_group)
        },
      )
    });
    let initial_mob_count = mobs.len();
    let mob_map: HashMap<MobId, Mob> = mobs.into_iter().map(|m| (m.id.clone(), m)).collect();
    let group_map: HashMap<GroupId, MobGroup> = groups.into_iter().map(|g| (g.id, g)).collect();

    let mut state = WorldState {
      rooms,
      players: player_map,
      mobs: mob_map,
      loot: HashMap::new(),
      extraction,
      groups: group_map,
      spatial: spatial::SpatialIndex::new(),
      completed: false,
      winning_team: None,
      frame: 0,
      events: vec![],
      pvp_rooms: HashSet::new(),
      ai_cursor: 0,
      next_ai_decision: now,
      next_loot_spawn: now
        + Duration::from_secs_f64(config.world_generation.loot_respawn_interval_s),
      next_mob_spawn: now + Duration::from_secs_f64(config.ai.dynamic_spawn_interval_s),
      next_mob,
      next_loot: 0,
      initial_mob_count,
      dynamic_spawned: 0,
    };

    // Initial loot, spread over random rooms.
    let initial = config.world_generation.initial_loot_count;
    let world_id = id.clone();
    with_rng(|rng| {
      for _ in 0..initial {
        let Some(room) = state.rooms.values().choose(rng) else { break };
        let pos = room.center
          + Vec2::new(
            rng.gen_range(-room.size / 2.0..room.size / 2.0),
            rng.gen_range(-room.size / 2.0..room.size / 2.0),
          );
        let near_center = pos.dist(room.center) < room.size * 0.2;
        let room_id = room.id.clone();
        let rarity = loot::roll_rarity(
          &config.loot,
          loot::Trigger::WorldSpawn,
          loot::RarityCtx {
            world_completion: 0.0,
            near_room_center: near_center,
            world_age:        Duration::from_secs(0),
          },
          rng,
        );
        state.next_loot += 1;
        let lid = LootId::new(format!("{}_loot_{}", world_id, state.next_loot));
        loot::spawn(&mut state.loot, lid, rarity, pos, room_id, now, &mut state.events, rng);
      }
    });
    // Generation noise isn't a delta anybody needs; snapshots start clean.
    state.events.clear();

    Arc::new(World {
      id,
      created_at: now,
      layout,
      config,
      state: Mutex::new(state),
      pending: Mutex::new(vec![]),
    })
  }

  pub fn id(&self) -> &WorldId { &self.id }
  pub fn created_at(&self) -> Instant { self.created_at }
  pub fn layout(&self) -> &RoomLayout { &self.layout }

  /// Locks the state. Everything outside the tick (snapshots, tests, the
  /// manager) reads through this; the tick holds it for the whole advance.
  pub fn lock_state(&self) -> MutexGuard<'_, WorldState> { self.state.lock() }

  /// Queues a command for the next tick.
  pub fn queue_command(&self, cmd: Command) { self.pending.lock().push(cmd); }

  pub fn player_count(&self) -> usize { self.state.lock().players.len() }

  pub fn contains_player(&self, id: &PlayerId) -> bool {
    self.state.lock().players.contains_key(id)
  }

  /// Removes a player (disconnect). Returns the player for session
  /// freezing. Any running extraction is abandoned.
  pub fn remove_player(&self, id: &PlayerId) -> Option<Player> {
    let mut state = self.state.lock();
    for point in state.extraction.values_mut() {
      point.extracting.remove(id);
    }
    state.players.remove(id)
  }

  /// Re-inserts a rehydrated player (reconnect).
  pub fn insert_player(&self, player: Player) {
    self.state.lock().players.insert(player.id().clone(), player);
  }

  /// Marks the world completed, activating every extraction point. Used by
  /// ops tooling.
  pub fn force_complete(&self) {
    let mut state = self.state.lock();
    if !state.completed {
      state.completed = true;
      let winner = state.winning_team.clone();
      for point in state.extraction.values_mut() {
        point.active = true;
      }
      state.events.push(WorldEvent::WorldCompleted { winning_team: winner });
    }
  }

  /// Drops mob corpses past the grace period. Called from the engine's
  /// periodic maintenance, not the tick path.
  pub fn compact(&self, now: Instant) {
    let mut guard = self.state.lock();
    let state = &mut *guard;
    state.mobs.retain(|_, m| match m.died_at {
      Some(died) => now.duration_since(died) < MOB_CORPSE_GRACE,
      None => true,
    });
    let mobs = &state.mobs;
    for g in state.groups.values_mut() {
      g.members.retain(|id| mobs.contains_key(id));
    }
    state.groups.retain(|_, g| !g.members.is_empty());
  }

  /// One simulation step. Runs the full pipeline in order: movement,
  /// collision, AI, combat, status, loot, extraction, win checks. Returns
  /// the events generated this tick.
  pub fn advance(
    &self,
    frame: u64,
    dt: f64,
    now: Instant,
    inputs: &HashMap<PlayerId, Vec<InputFrame>>,
  ) -> Vec<WorldEvent> {
    let commands: Vec<Command> = std::mem::take(&mut *self.pending.lock());
    let mut guard = self.state.lock();
    let state = &mut *guard;
    state.frame = frame;
    let cfg = &self.config;
    let half_extent = self.layout.half_extent;

    // Movement phase: apply inputs, collect combat intents.
    let mut attack_intents: Vec<PlayerId> = vec![];
    let mut ability_intents = vec![];
    let mut prev_positions: Vec<(PlayerId, Vec2)> = vec![];
    for (id, p) in state.players.iter_mut() {
      let frames = inputs.get(id).map(Vec::as_slice).unwrap_or(&[]);
      prev_positions.push((id.clone(), p.motion.position));
      let intents = movement::integrate(p, frames, dt, &cfg.movement, half_extent);
      if intents.attack {
        attack_intents.push(id.clone());
      }
      if let Some(a) = intents.ability {
        ability_intents.push((id.clone(), a));
      }
    }

    // The index reflects post-movement positions for collision and combat.
    rebuild_spatial(state);

    // Collision phase: push-apart against players and mobs.
    resolve_collisions(state, cfg, half_extent);

    // Anti-cheat: judge the tick's final movement, revert rejects.
    for (id, prev) in &prev_positions {
      let Some(p) = state.players.get_mut(id) else { continue };
      let expected = p.expected_max_speed(cfg.movement.base_speed, cfg.movement.sprint_mul);
      let pos = p.motion.position;
      if p.tracker.record(now, pos, expected, cfg.movement.teleport_max_distance)
        == Verdict::Rejected
      {
        warn!(
          "{} moved implausibly fast (pos: {}, flags: {})",
          p.name(),
          pos,
          p.tracker.suspicion()
        );
        if p.tracker.monitored() {
          warn!("{} is now monitored for movement violations", p.name());
        }
        p.motion.position = *prev;
      }
    }

    // Room membership and encounter events.
    update_rooms(state, &self.layout);

    // AI phase. Decisions run at the configured rate; movement every tick.
    let decide_pass = now >= state.next_ai_decision;
    if decide_pass {
      state.next_ai_decision =
        now + Duration::from_secs_f64(1.0 / cfg.ai.update_frequency_hz.max(1.0));
    }
    let difficulty = current_difficulty(state, self.created_at, now, cfg);
    let layout = &self.layout;
    let room_at = |pos: Vec2| layout.room_at(pos);
    let wid = self.id.clone();
    let ai_out = {
      let next_mob_counter = &mut state.next_mob;
      let mut next_mob_id = || {
        *next_mob_counter += 1;
        MobId::new(format!("{wid}_mob_{next_mob_counter}"))
      };
      let ctx = ai::AiCtx {
        cfg: &cfg.ai,
        dt,
        now,
        half_extent,
        room_at: &room_at,
        difficulty,
        boss_room_cap: cfg.ai.max_mobs_per_room,
      };
      with_rng(|rng| {
        ai::run(
          &mut state.mobs,
          &mut state.groups,
          &state.players,
          &ctx,
          decide_pass,
          &mut state.ai_cursor,
          &mut next_mob_id,
          rng,
          &mut state.events,
        )
      })
    };
    for m in ai_out.spawned {
      state.mobs.insert(m.id.clone(), m);
    }

    // Dynamic spawning, on its own interval.
    if cfg.ai.enable_dynamic_spawning && now >= state.next_mob_spawn {
      state.next_mob_spawn = now + Duration::from_secs_f64(cfg.ai.dynamic_spawn_interval_s);
      dynamic_mob_spawn(state, &self.id, cfg, difficulty, now);
    }

    // Combat phase: abilities first (they reposition), then basic attacks,
    // then the attacks the AI decided.
    for (id, ability) in ability_intents {
      with_rng(|rng| {
        combat::ability::execute(
          &id,
          ability,
          &mut state.players,
          &mut state.mobs,
          &state.spatial,
          &cfg.game_balance,
          &cfg.movement,
          half_extent,
          now,
          &mut state.events,
          rng,
        )
      });
    }
    with_rng(|rng| {
      combat::resolve_attacks(
        &attack_intents,
        &mut state.players,
        &mut state.mobs,
        &state.spatial,
        &cfg.game_balance,
        now,
        &mut state.events,
        rng,
      )
    });
    combat::apply_mob_attacks(
      &ai_out.attacks,
      &mut state.players,
      &state.mobs,
      &cfg.game_balance,
      now,
      &mut state.events,
    );

    // Status phase: damage over time can kill.
    for p in state.players.values_mut() {
      if !p.alive() {
        continue;
      }
      for outcome in p.status.tick(dt, now) {
        match outcome {
          crate::player::status::StatusTick::Heal(amount) => p.heal(amount),
          crate::player::status::StatusTick::Damage(amount) => {
            p.vitals.health -= amount;
            if p.vitals.health <= 0 {
              p.vitals.health = 0;
              p.vitals.alive = false;
              let killer = combat::killer_of(p, now, cfg.game_balance.killer_window_s);
              state.events.push(WorldEvent::PlayerDeath { victim: p.id().clone(), killer });
            }
          }
        }
      }
    }

    // Abilities can reposition players, so room membership is synced again
    // before anything else reads it.
    update_rooms(state, &self.layout);

    // Loot phase: death drops from this tick's events, queued commands,
    // periodic respawn, expiry.
    process_death_drops(state, cfg, self.created_at, now);
    for cmd in &commands {
      match cmd {
        Command::LootGrab { player, loot: loot_id } => {
          let Some(p) = state.players.get_mut(player) else { continue };
          if let Err(e) = loot::grab(&mut state.loot, p, loot_id, &cfg.loot, &mut state.events) {
            state.events.push(WorldEvent::Denied { player: player.clone(), error: e });
          }
        }
        Command::UseItem { player, item } => {
          let Some(p) = state.players.get_mut(player) else { continue };
          if let Err(e) = loot::use_item(p, item, now, &mut state.events) {
            state.events.push(WorldEvent::Denied { player: player.clone(), error: e });
          }
        }
        Command::Extraction { .. } => {}
      }
    }
    if now >= state.next_loot_spawn {
      state.next_loot_spawn = now + Duration::from_secs_f64(cfg.loot.respawn_interval_s.max(1.0));
      respawn_loot(state, &self.id, cfg, self.created_at, now);
    }
    loot::expire_and_evict(&mut state.loot, &cfg.loot, now, &mut state.events);

    // Extraction phase: queued start/cancel, then timer progress.
    for cmd in &commands {
      if let Command::Extraction { player, point, action } = cmd {
        match action {
          ExtractionAction::Start => {
            if let Err(e) = extraction::start(
              &mut state.extraction,
              &state.players,
              player,
              point,
              now,
              &mut state.events,
            ) {
              state.events.push(WorldEvent::Denied { player: player.clone(), error: e });
            }
          }
          ExtractionAction::Cancel => {
            extraction::cancel(&mut state.extraction, player, point, &mut state.events)
          }
        }
      }
    }
    let extracted =
      extraction::tick(&mut state.extraction, &state.players, now, &mut state.events);
    for pid in &extracted {
      if let Some(p) = state.players.get_mut(pid) {
        let bonus = p.inventory.rarity_sum() * 100;
        p.add_xp(bonus);
      }
    }

    // Win checks, then the bonus drops a fresh room clear earns.
    check_completion(state);
    process_room_clear_drops(state, &self.id, cfg, self.created_at, now);

    // End of tick: extracted players leave the world map. Mid-tick systems
    // above still saw them; the removal is observable from the next tick.
    for pid in &extracted {
      state.players.remove(pid);
      for point in state.extraction.values_mut() {
        point.extracting.remove(pid);
      }
    }

    std::mem::take(&mut state.events)
  }
}

fn rebuild_spatial(state: &mut WorldState) {
  let spatial = &mut state.spatial;
  spatial.clear();
  for p in state.players.values() {
    if p.alive() {
      spatial.insert(spatial::Body::Player(p.id().clone()), p.position());
    }
  }
  for m in state.mobs.values() {
    if m.alive() {
      spatial.insert(spatial::Body::Mob(m.id.clone()), m.position);
    }
  }
}

/// Push-apart collision: players push each other with equal mass; mobs are
/// immovable in this step and push the player the full overlap. Pushed
/// parties have their velocity damped.
fn resolve_collisions(state: &mut WorldState, cfg: &Config, half_extent: f64) {
  let player_r = cfg.movement.player_collision_radius;
  let mob_r = cfg.movement.mob_collision_radius;

  let mut pushes: HashMap<PlayerId, Vec2> = HashMap::new();
  let mut damped: HashSet<PlayerId> = HashSet::new();
  for p in state.players.values() {
    if !p.alive() {
      continue;
    }
    let pos = p.position();
    for (other_id, other_pos) in state.spatial.players_near(pos, player_r * 2.0) {
      // Each unordered pair once.
      if other_id.as_str() <= p.id().as_str() {
        continue;
      }
      let delta = other_pos - pos;
      let dist = delta.len();
      let overlap = player_r * 2.0 - dist;
      if overlap <= 0.0 {
        continue;
      }
      let dir = if dist < 1e-6 { Vec2::new(1.0, 0.0) } else { delta / dist };
      *pushes.entry(p.id().clone()).or_default() -= dir * (overlap / 2.0);
      *pushes.entry(other_id.clone()).or_default() += dir * (overlap / 2.0);
      damped.insert(p.id().clone());
      damped.insert(other_id);
    }
    for (_, mob_pos) in state.spatial.mobs_near(pos, player_r + mob_r) {
      let delta = pos - mob_pos;
      let dist = delta.len();
      let overlap = player_r + mob_r - dist;
      if overlap <= 0.0 {
        continue;
      }
      let dir = if dist < 1e-6 { Vec2::new(1.0, 0.0) } else { delta / dist };
      *pushes.entry(p.id().clone()).or_default() += dir * overlap;
      damped.insert(p.id().clone());
    }
  }
  for (id, push) in pushes {
    if let Some(p) = state.players.get_mut(&id) {
      p.motion.position = (p.motion.position + push).clamped_to_plane(half_extent);
    }
  }
  for id in damped {
    if let Some(p) = state.players.get_mut(&id) {
      p.motion.velocity = p.motion.velocity * 0.5;
    }
  }
}

/// Tracks room membership and contested rooms.
fn update_rooms(state: &mut WorldState, layout: &RoomLayout) {
  let mut teams_in_room: HashMap<RoomId, HashSet<TeamId>> = HashMap::new();
  let events = &mut state.events;
  for p in state.players.values_mut() {
    let room = layout.room_at(p.motion.position);
    if room != p.current_room {
      events.push(WorldEvent::RoomChanged {
        player: p.id().clone(),
        from:   p.current_room.clone(),
        to:     room.clone(),
      });
      p.current_room = room.clone();
    }
    if p.alive() {
      teams_in_room.entry(room).or_default().insert(p.team().clone());
    }
  }
  let pvp_rooms = &mut state.pvp_rooms;
  for (room, teams) in &teams_in_room {
    if teams.len() >= 2 {
      if pvp_rooms.insert(room.clone()) {
        events.push(WorldEvent::PvpEncounter { room: room.clone() });
      }
    } else {
      pvp_rooms.remove(room);
    }
  }
  pvp_rooms.retain(|r| teams_in_room.contains_key(r));
}

/// Difficulty for spawns right now.
fn current_difficulty(state: &WorldState, created_at: Instant, now: Instant, cfg: &Config) -> f64 {
  let age_hours = now.duration_since(created_at).as_secs_f64() / 3600.0;
  let levels: Vec<f64> = state.players.values().map(|p| f64::from(p.progress.level)).collect();
  let avg_level =
    if levels.is_empty() { 1.0 } else { levels.iter().sum::<f64>() / levels.len() as f64 };
  spawn::difficulty_multiplier(age_hours, avg_level, cfg.ai.difficulty_scaling)
}

fn dynamic_mob_spawn(
  state: &mut WorldState,
  world_id: &WorldId,
  cfg: &Config,
  difficulty: f64,
  now: Instant,
) {
  let live = state.mobs.values().filter(|m| m.alive()).count();
  if live >= state.initial_mob_count + cfg.ai.max_dynamic_mobs
    || state.dynamic_spawned >= cfg.ai.max_dynamic_mobs
  {
    return;
  }
  let spawn_rooms: Vec<spawn::SpawnRoom> = state
    .rooms
    .values()
    .map(|r| spawn::SpawnRoom {
      id:             r.id.clone(),
      center:         r.center,
      size:           r.size,
      has_extraction: state.extraction.values().any(|e| e.room_id == r.id),
    })
    .collect();
  let mut counts: HashMap<RoomId, usize> = HashMap::new();
  for m in state.mobs.values().filter(|m| m.alive()) {
    *counts.entry(m.room_id.clone()).or_default() += 1;
  }
  let next = state.next_mob + 1;
  let spawned = with_rng(|rng| {
    spawn::dynamic_spawn(
      &spawn_rooms,
      |room| counts.get(room).copied().unwrap_or(0),
      &cfg.ai,
      difficulty,
      now,
      rng,
      || MobId::new(format!("{world_id}_mob_{next}")),
    )
  });
  if let Some(m) = spawned {
    state.next_mob = next;
    state.dynamic_spawned += 1;
    debug!("dynamic spawn: {} ({}) in {}", m.id, m.ty.name(), m.room_id);
    state.mobs.insert(m.id.clone(), m);
  }
}

/// Mob and player deaths recorded this tick turn into loot drops.
fn process_death_drops(state: &mut WorldState, cfg: &Config, created_at: Instant, now: Instant) {
  let completion = completion_fraction(state);
  let world_age = now.duration_since(created_at);

  // Collect first: events keeps growing while drops spawn.
  let mut mob_deaths: Vec<MobId> = vec![];
  let mut player_deaths: Vec<PlayerId> = vec![];
  for ev in &state.events {
    match ev {
      WorldEvent::MobDeath { mob, .. } => mob_deaths.push(mob.clone()),
      WorldEvent::PlayerDeath { victim, .. } => player_deaths.push(victim.clone()),
      _ => {}
    }
  }

  for mob_id in mob_deaths {
    let Some((pos, room, is_boss)) =
      state.mobs.get(&mob_id).map(|m| (m.position, m.room_id.clone(), m.is_boss()))
    else {
      continue;
    };
    let trigger = if is_boss { loot::Trigger::BossDeath } else { loot::Trigger::MobDeath };
    let near_center =
      state.rooms.get(&room).map(|r| pos.dist(r.center) < r.size * 0.2).unwrap_or(false);
    let max =
      (cfg.loot.max_drops_per_mob as f64 * cfg.loot.global_drop_multiplier).round() as usize;
    let count = if max == 0 { 0 } else { with_rng(|rng| rng.gen_range(0..=max)) };
    for _ in 0..count {
      let rarity = with_rng(|rng| {
        loot::roll_rarity(
          &cfg.loot,
          trigger,
          loot::RarityCtx {
            world_completion: completion,
            near_room_center: near_center,
            world_age,
          },
          rng,
        )
      });
      state.next_loot += 1;
      let lid = LootId::new(format!("drop_{}_{}", mob_id, state.next_loot));
      let off = with_rng(|rng| Vec2::new(rng.gen_range(-1.5..1.5), rng.gen_range(-1.5..1.5)));
      with_rng(|rng| {
        loot::spawn(
          &mut state.loot,
          lid,
          rarity,
          pos + off,
          room.clone(),
          now,
          &mut state.events,
          rng,
        )
      });
    }
  }

  for pid in player_deaths {
    let Some(p) = state.players.get_mut(&pid) else { continue };
    let pos = p.position();
    let room = p.current_room.clone();
    let dropped: Vec<Item> = p.inventory.take_top_rarity(3);
    for (i, item) in dropped.into_iter().enumerate() {
      let off = Vec2::from_angle(i as f64 * 2.1) * 1.2;
      loot::drop_item(&mut state.loot, item, pos + off, room.clone(), now, &mut state.events);
    }
  }
}

/// Rooms completed this tick drop one bonus item at the room center.
fn process_room_clear_drops(
  state: &mut WorldState,
  world_id: &WorldId,
  cfg: &Config,
  created_at: Instant,
  now: Instant,
) {
  let completion = completion_fraction(state);
  let cleared: Vec<RoomId> = state
    .events
    .iter()
    .filter_map(|ev| match ev {
      WorldEvent::RoomCompleted { room, .. } => Some(room.clone()),
      _ => None,
    })
    .collect();
  for room_id in cleared {
    let Some(center) = state.rooms.get(&room_id).map(|r| r.center) else { continue };
    let rarity = with_rng(|rng| {
      loot::roll_rarity(
        &cfg.loot,
        loot::Trigger::RoomClear,
        loot::RarityCtx {
          world_completion: completion,
          near_room_center: true,
          world_age:        now.duration_since(created_at),
        },
        rng,
      )
    });
    state.next_loot += 1;
    let lid = LootId::new(format!("{}_loot_{}", world_id, state.next_loot));
    with_rng(|rng| {
      loot::spawn(&mut state.loot, lid, rarity, center, room_id, now, &mut state.events, rng)
    });
  }
}

fn completion_fraction(state: &WorldState) -> f64 {
  if state.rooms.is_empty() {
    return 0.0;
  }
  state.rooms.values().filter(|r| r.completed).count() as f64 / state.rooms.len() as f64
}

/// Room and world completion checks. Completing the world activates every
/// extraction point.
fn check_completion(state: &mut WorldState) {
  // Room completion: live players present, no live mobs.
  let mut live_players_in: HashMap<RoomId, Vec<TeamId>> = HashMap::new();
  for p in state.players.values().filter(|p| p.alive()) {
    live_players_in.entry(p.current_room.clone()).or_default().push(p.team().clone());
  }
  let mut live_mobs_in: HashMap<RoomId, usize> = HashMap::new();
  for m in state.mobs.values().filter(|m| m.alive()) {
    *live_mobs_in.entry(m.room_id.clone()).or_default() += 1;
  }
  let mut completed_rooms = vec![];
  for room in state.rooms.values_mut() {
    if room.completed {
      continue;
    }
    let Some(teams) = live_players_in.get(&room.id) else { continue };
    if live_mobs_in.get(&room.id).copied().unwrap_or(0) > 0 {
      continue;
    }
    // Majority team present takes the completion credit.
    let mut counts: HashMap<&TeamId, usize> = HashMap::new();
    for t in teams {
      *counts.entry(t).or_default() += 1;
    }
    let Some((team, _)) = counts.into_iter().max_by_key(|(_, c)| *c) else { continue };
    room.completed = true;
    room.completing_team = Some(team.clone());
    completed_rooms.push((room.id.clone(), team.clone()));
  }
  for (room, team) in completed_rooms {
    state.events.push(WorldEvent::RoomCompleted { room, team });
  }

  if state.completed {
    return;
  }

  // World completion: enough rooms done, or only one team left standing.
  let fraction = completion_fraction(state);
  let mut winner: Option<TeamId> = None;
  let mut done = false;
  if fraction >= WORLD_COMPLETION_FRACTION {
    let mut by_team: HashMap<TeamId, usize> = HashMap::new();
    for r in state.rooms.values().filter(|r| r.completed) {
      if let Some(t) = &r.completing_team {
        *by_team.entry(t.clone()).or_default() += 1;
      }
    }
    winner = by_team.into_iter().max_by_key(|(_, c)| *c).map(|(t, _)| t);
    done = true;
  } else {
    let dead = state.players.values().filter(|p| !p.alive()).count();
    let live_teams: HashSet<TeamId> =
      state.players.values().filter(|p| p.alive()).map(|p| p.team().clone()).collect();
    if live_teams.len() == 1 && dead > 0 {
      winner = live_teams.into_iter().next();
      done = true;
    }
  }
  if done {
    state.completed = true;
    state.winning_team = winner.clone();
    for point in state.extraction.values_mut() {
      point.active = true;
    }
    state.events.push(WorldEvent::WorldCompleted { winning_team: winner });
  }
}

fn respawn_loot(
  state: &mut WorldState,
  world_id: &WorldId,
  cfg: &Config,
  created_at: Instant,
  now: Instant,
) {
  let completion = completion_fraction(state);
  let (pos, room_id, near_center) = {
    let picked = with_rng(|rng| {
      state.rooms.values().choose(rng).map(|room| {
        let pos = room.center
          + Vec2::new(
            rng.gen_range(-room.size / 2.0..room.size / 2.0),
            rng.gen_range(-room.size / 2.0..room.size / 2.0),
          );
        (pos, room.id.clone(), pos.dist(room.center) < room.size * 0.2)
      })
    });
    match picked {
      Some(v) => v,
      None => return,
    }
  };
  let rarity = with_rng(|rng| {
    loot::roll_rarity(
      &cfg.loot,
      loot::Trigger::Respawn,
      loot::RarityCtx {
        world_completion: completion,
        near_room_center: near_center,
        world_age:        now.duration_since(created_at),
      },
      rng,
    )
  });
  state.next_loot += 1;
  let lid = LootId::new(format!("{}_loot_{}", world_id, state.next_loot));
  with_rng(|rng| {
    loot::spawn(&mut state.loot, lid, rarity, pos, room_id, now, &mut state.events, rng)
  });
}

/// The world manager: the live world table and the player index.
pub struct WorldManager {
  config:     Arc<Config>,
  worlds:     RwLock<HashMap<WorldId, Arc<World>>>,
  by_player:  RwLock<HashMap<PlayerId, WorldId>>,
  next_world: AtomicU32,
}

impl WorldManager {
  pub fn new(config: Arc<Config>) -> Self {
    WorldManager {
      config,
      worlds: RwLock::new(HashMap::new()),
      by_player: RwLock::new(HashMap::new()),
      next_world: AtomicU32::new(0),
    }
  }

  /// Builds a world from a ready lobby's players.
  pub fn create_world(&self, players: Vec<NewWorldPlayer>, now: Instant) -> Arc<World> {
    let n = self.next_world.fetch_add(1, Ordering::SeqCst) + 1;
    let id = WorldId::new(format!("world_{n}"));
    let ids: Vec<PlayerId> = players.iter().map(|p| p.id.clone()).collect();
    let world = World::new(id.clone(), self.config.clone(), players, now);
    {
      let mut by_player = self.by_player.write();
      for pid in ids {
        by_player.insert(pid, id.clone());
      }
    }
    self.worlds.write().insert(id, world.clone());
    info!("created world {} with {} players", world.id(), world.player_count());
    world
  }

  pub fn get(&self, id: &WorldId) -> Option<Arc<World>> { self.worlds.read().get(id).cloned() }

  pub fn all_worlds(&self) -> Vec<Arc<World>> { self.worlds.read().values().cloned().collect() }

  pub fn find_world_by_player(&self, player: &PlayerId) -> Option<Arc<World>> {
    let id = self.by_player.read().get(player).cloned()?;
    self.get(&id)
  }

  /// True if this player is currently in some world.
  pub fn find_player(&self, player: &PlayerId) -> bool {
    self.by_player.read().contains_key(player)
  }

  /// Removes a player from their world and the index. Returns the player
  /// and the world id, for session freezing.
  pub fn remove_player(&self, player: &PlayerId) -> Option<(Player, WorldId)> {
    let world_id = self.by_player.write().remove(player)?;
    let world = self.get(&world_id)?;
    let p = world.remove_player(player)?;
    Some((p, world_id))
  }

  /// Drops just the index entry. Used after an extraction, where the world
  /// already removed the player at the tick boundary.
  pub fn unregister_player(&self, player: &PlayerId) {
    self.by_player.write().remove(player);
  }

  /// Re-inserts a rehydrated player into their old world, if it is still
  /// alive.
  pub fn insert_player(
    &self,
    world_id: &WorldId,
    player: Player,
  ) -> Result<Arc<World>, crate::error::ReconnectError> {
    let world = self.get(world_id).ok_or(crate::error::ReconnectError::WorldGone)?;
    self.by_player.write().insert(player.id().clone(), world_id.clone());
    world.insert_player(player);
    Ok(world)
  }

  /// Marks a world completed by admin order.
  pub fn force_complete(&self, world_id: &WorldId) -> bool {
    match self.get(world_id) {
      Some(w) => {
        w.force_complete();
        true
      }
      None => false,
    }
  }

  /// Destroys worlds whose player map has emptied. Returns their ids.
  pub fn sweep_empty(&self) -> Vec<WorldId> {
    let empty: Vec<WorldId> = self
      .worlds
      .read()
      .iter()
      .filter(|(_, w)| w.player_count() == 0)
      .map(|(id, _)| id.clone())
      .collect();
    if !empty.is_empty() {
      let mut worlds = self.worlds.write();
      for id in &empty {
        worlds.remove(id);
        info!("destroyed empty world {id}");
      }
    }
    empty
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use rift_common::net::sb::PlayerClass;

  fn two_player_world(cfg: Config) -> Arc<World> {
    World::new(
      WorldId::new("world_t"),
      Arc::new(cfg),
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

  fn small_grid(mobs_per_room: usize) -> Config {
    let mut cfg = Config::default();
    cfg.world_generation.x = 2;
    cfg.world_generation.y = 1;
    cfg.world_generation.mobs_per_room = mobs_per_room;
    cfg.world_generation.initial_loot_count = 0;
    cfg
  }

  #[test]
  fn clearing_every_room_completes_the_world() {
    let world = two_player_world(small_grid(0));
    let events = world.advance(1, 1.0 / 60.0, Instant::now(), &HashMap::new());

    // No mobs anywhere: both occupied rooms complete on the first tick,
    // which is every room on a 2x1 grid.
    assert!(events.iter().any(|e| matches!(e, WorldEvent::RoomCompleted { .. })));
    assert!(events.iter().any(|e| matches!(e, WorldEvent::WorldCompleted { .. })));
    let state = world.lock_state();
    assert!(state.completed);
    assert!(state.extraction.values().all(|p| p.active));
  }

  #[test]
  fn live_mobs_block_room_completion() {
    let world = two_player_world(small_grid(2));
    let now = Instant::now();
    let events = world.advance(1, 1.0 / 60.0, now, &HashMap::new());
    assert!(!events.iter().any(|e| matches!(e, WorldEvent::RoomCompleted { .. })));

    // Clear one room by hand; the next tick completes it and drops the
    // room clear bonus.
    let room_of_p1 = {
      let mut state = world.lock_state();
      let room = state.players[&PlayerId::new("p1")].current_room.clone();
      let ids: Vec<MobId> = state
        .mobs
        .values()
        .filter(|m| m.room_id == room)
        .map(|m| m.id.clone())
        .collect();
      for id in ids {
        if let Some(m) = state.mobs.get_mut(&id) {
          m.take_damage(100_000, None, now);
        }
      }
      room
    };
    let loot_before = world.lock_state().loot.len();
    let events = world.advance(2, 1.0 / 60.0, now, &HashMap::new());
    assert!(events
      .iter()
      .any(|e| matches!(e, WorldEvent::RoomCompleted { room, .. } if *room == room_of_p1)));
    assert!(world.lock_state().loot.len() > loot_before, "room clear drops a bonus item");
    let state = world.lock_state();
    assert_eq!(state.rooms[&room_of_p1].completing_team, Some(TeamId::new("team1")));
  }

  #[test]
  fn unknown_loot_grab_is_denied() {
    let world = two_player_world(small_grid(0));
    world.queue_command(Command::LootGrab {
      player: PlayerId::new("p1"),
      loot:   LootId::new("nothing"),
    });
    let events = world.advance(1, 1.0 / 60.0, Instant::now(), &HashMap::new());
    assert!(events.iter().any(|e| matches!(
      e,
      WorldEvent::Denied { player, error: crate::error::GameError::NotFound }
        if *player == PlayerId::new("p1")
    )));
  }

  #[test]
  fn last_team_standing_wins() {
    let mut cfg = Config::default();
    cfg.world_generation.mobs_per_room = 0;
    cfg.world_generation.initial_loot_count = 0;
    let world = two_player_world(cfg);
    {
      let mut state = world.lock_state();
      let p2 = state.players.get_mut(&PlayerId::new("p2")).unwrap();
      p2.vitals.health = 0;
      p2.vitals.alive = false;
    }
    let events = world.advance(1, 1.0 / 60.0, Instant::now(), &HashMap::new());
    assert!(events.iter().any(|e| matches!(
      e,
      WorldEvent::WorldCompleted { winning_team: Some(t) } if *t == TeamId::new("team1")
    )));
  }

  #[test]
  fn remove_player_abandons_their_extraction() {
    let world = two_player_world(small_grid(0));
    world.force_complete();
    {
      let mut state = world.lock_state();
      let pos = state.extraction.values().next().unwrap().position;
      let point = state.extraction.values().next().unwrap().id.clone();
      let p = state.players.get_mut(&PlayerId::new("p1")).unwrap();
      p.motion.position = pos;
      state
        .extraction
        .get_mut(&point)
        .unwrap()
        .extracting
        .insert(PlayerId::new("p1"), Instant::now());
    }
    world.remove_player(&PlayerId::new("p1"));
    let state = world.lock_state();
    assert!(state.extraction.values().all(|p| p.extracting.is_empty()));
  }
}
