//! The engine: the fixed rate tick loop and the cross-manager flows
//! (connect, reconnect, disconnect, lobby handoff). There is one `Engine`
//! per server process; the net layer holds an `Arc` to it and every
//! handler goes through here.

#[cfg(test)]
mod tests;

use crate::{
  config::Config,
  error::{JoinError, ReconnectError},
  event::WorldEvent,
  input::InputBuffer,
  lobby::{LobbyManager, NewWorldPlayer},
  net::{PeerSender, Registry},
  session::SessionManager,
  snapshot::SnapshotBuilder,
  world::WorldManager,
};
use rayon::prelude::*;
use rift_common::{
  net::{cb, sb::PlayerClass},
  util::{LobbyId, PlayerId, SessionToken, TeamId, WorldId},
};
use std::{
  collections::HashMap,
  net::SocketAddr,
  panic::{catch_unwind, AssertUnwindSafe},
  sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
  },
  thread,
  time::{Duration, Instant},
};

/// Catch-up cap: a long stall never produces a dt above this.
const MAX_DT: f64 = 1.0 / 30.0;
const MAINTENANCE_EVERY: Duration = Duration::from_secs(60);
const PERF_LOG_EVERY: Duration = Duration::from_secs(30);
/// Cadence of the background sweeps (timeouts, sessions, retries).
const SWEEP_EVERY: Duration = Duration::from_secs(1);

pub struct Engine {
  config:    Arc<Config>,
  worlds:    WorldManager,
  lobbies:   LobbyManager,
  sessions:  SessionManager,
  inputs:    InputBuffer,
  registry:  Registry,
  snapshots: SnapshotBuilder,

  /// The tick worker pool, one thread per core. Each world's advance is
  /// one task on it.
  pool: rayon::ThreadPool,

  frame:       AtomicU64,
  running:     AtomicBool,
  next_player: AtomicU64,
}

impl Engine {
  pub fn new(config: Config) -> Self {
    let config = Arc::new(config);
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(rift_common::util::num_cpus())
      .thread_name(|i| format!("world tick {i}"))
      .build()
      .expect("could not build the tick worker pool");
    Engine {
      worlds: WorldManager::new(config.clone()),
      lobbies: LobbyManager::new(config.clone()),
      sessions: SessionManager::new(config.session.token_ttl_s),
      inputs: InputBuffer::new(),
      registry: Registry::new(),
      snapshots: SnapshotBuilder::new(),
      pool,
      frame: AtomicU64::new(0),
      running: AtomicBool::new(true),
      next_player: AtomicU64::new(0),
      config,
    }
  }

  pub fn config(&self) -> &Config { &self.config }
  pub fn worlds(&self) -> &WorldManager { &self.worlds }
  pub fn lobbies(&self) -> &LobbyManager { &self.lobbies }
  pub fn sessions(&self) -> &SessionManager { &self.sessions }
  pub fn inputs(&self) -> &InputBuffer { &self.inputs }
  pub fn registry(&self) -> &Registry { &self.registry }
  pub fn frame(&self) -> u64 { self.frame.load(Ordering::SeqCst) }

  /// Stops the tick loop and the background sweeps. Cooperative: in-flight
  /// ticks complete.
  pub fn shutdown(&self) { self.running.store(false, Ordering::SeqCst); }

  pub fn is_running(&self) -> bool { self.running.load(Ordering::SeqCst) }

  /// The blocking tick loop. Call from a dedicated thread (or the main
  /// one).
  pub fn run(self: Arc<Self>) {
    let tick_time = Duration::from_secs_f64(self.config.tick_interval());
    let slow_frame = tick_time.mul_f64(1.5);
    let mut start = Instant::now();
    let mut last = start;
    let mut last_maintenance = start;
    let mut last_perf = start;
    let mut slow_frames = 0_u64;
    while self.is_running() {
      let now = Instant::now();
      let dt = now.duration_since(last).as_secs_f64().min(MAX_DT);
      last = now;

      self.tick(now, dt);

      if now.duration_since(last_maintenance) >= MAINTENANCE_EVERY {
        last_maintenance = now;
        for world in self.worlds.all_worlds() {
          world.compact(now);
        }
      }
      if now.duration_since(last_perf) >= PERF_LOG_EVERY {
        last_perf = now;
        info!(
          "frame {}: {} worlds, {} slow frames in the last {}s",
          self.frame(),
          self.worlds.all_worlds().len(),
          slow_frames,
          PERF_LOG_EVERY.as_secs(),
        );
        slow_frames = 0;
      }

      let spent = Instant::now().duration_since(now);
      if spent > slow_frame {
        slow_frames += 1;
        warn!("tick took {spent:?} (budget {tick_time:?})");
      }
      start += tick_time;
      match start.checked_duration_since(Instant::now()) {
        Some(t) => spin_sleep::sleep(t),
        None => start = Instant::now(),
      }
    }
    info!("engine stopped at frame {}", self.frame());
  }

  /// Spawns the background sweeps: client timeouts, session TTLs, reliable
  /// retries, lobby abandonment, empty world teardown. These run off the
  /// tick path.
  pub fn spawn_background(self: Arc<Self>) {
    thread::spawn(move || {
      while self.is_running() {
        let now = Instant::now();
        let timeout = Duration::from_secs_f64(self.config.session.client_timeout_s);
        for player in self.registry.idle_peers(now, timeout) {
          info!("{player} timed out after {}s of silence", timeout.as_secs());
          self.freeze_disconnect(&player, now);
        }
        for player in self.sessions.sweep(now) {
          info!("session for {player} expired");
        }
        self.registry.retry_reliable(now);
        self.lobbies.sweep_abandoned(now);
        for world_id in self.worlds.sweep_empty() {
          self.snapshots.forget_world(&world_id);
        }
        thread::sleep(SWEEP_EVERY);
      }
    });
  }

  /// One simulation tick: lobby handoffs, input drain, the parallel world
  /// advance, snapshots.
  pub fn tick(&self, now: Instant, dt: f64) {
    // Frames never skip numbers, whatever happened to the wall clock.
    let frame = self.frame.fetch_add(1, Ordering::SeqCst) + 1;

    // Ready lobbies become worlds.
    for ready in self.lobbies.check_ready(now) {
      self.handoff(ready.lobby_id, ready.players, now);
    }

    let inputs = self.inputs.drain_ready();
    let worlds = self.worlds.all_worlds();

    // One task per world. A panicking world logs and skips its tick;
    // everyone else is unaffected.
    let results: Vec<(Arc<crate::world::World>, Vec<WorldEvent>)> = self.pool.install(|| {
      worlds
        .into_par_iter()
        .filter_map(|world| {
          let result =
            catch_unwind(AssertUnwindSafe(|| world.advance(frame, dt, now, &inputs)));
          match result {
            Ok(events) => Some((world, events)),
            Err(_) => {
              error!("world {} panicked during its tick; continuing", world.id());
              None
            }
          }
        })
        .collect()
    });

    let acks = self.inputs.all_acked();
    for (world, events) in results {
      self.apply_world_events(&world, &events);
      let out = self.snapshots.build(&world, &events, &acks, frame, now);
      let subscribers: Vec<PlayerId> = {
        let state = world.lock_state();
        state.players.keys().cloned().collect()
      };
      for packet in out.broadcast {
        self.registry.send_many(subscribers.iter(), &packet);
      }
      for (player, packet) in out.directed {
        self.registry.send(&player, packet);
      }
    }

    self.snapshots.reclaim(now);
  }

  /// Cross-manager consequences of a world's tick.
  fn apply_world_events(&self, world: &Arc<crate::world::World>, events: &[WorldEvent]) {
    for ev in events {
      match ev {
        WorldEvent::ExtractionCompleted { player, bonus_xp, .. } => {
          info!("{player} extracted from {} (+{bonus_xp} xp)", world.id());
          self.worlds.unregister_player(player);
          self.sessions.invalidate(player);
          self.inputs.remove(player);
          self.registry.send(
            player,
            cb::Packet::PlayerDisconnected { player_id: player.clone(), can_reconnect: false },
          );
          self.registry.remove(player);
        }
        WorldEvent::WorldCompleted { winning_team } => {
          info!(
            "world {} completed, winner: {}",
            world.id(),
            winning_team.as_ref().map(|t| t.as_str()).unwrap_or("none"),
          );
        }
        _ => {}
      }
    }
  }

  /// Builds a world from a ready lobby and tells everyone the game began.
  fn handoff(&self, lobby_id: LobbyId, players: Vec<NewWorldPlayer>, now: Instant) {
    let ids: Vec<PlayerId> = players.iter().map(|p| p.id.clone()).collect();
    let result = catch_unwind(AssertUnwindSafe(|| self.worlds.create_world(players, now)));
    match result {
      Ok(world) => {
        self.lobbies.mark_completed(&lobby_id);
        let spawn_of: HashMap<PlayerId, rift_common::math::Vec2> = {
          let state = world.lock_state();
          state.players.iter().map(|(id, p)| (id.clone(), p.position())).collect()
        };
        for id in ids {
          let spawn = spawn_of.get(&id).copied().unwrap_or_default();
          let world_id = world.id().clone();
          self.registry.send_reliable(
            &id,
            |message_id| cb::Packet::GameStarted { world_id, spawn, message_id },
            now,
          );
        }
      }
      Err(_) => {
        error!("world creation for {lobby_id} failed");
        self.lobbies.mark_errored(&lobby_id);
        let packet = cb::Packet::LobbyUpdate {
          lobby_id: lobby_id.clone(),
          status:   cb::LobbyStatus::Errored,
          players:  vec![],
        };
        self.registry.send_many(ids.iter(), &packet);
      }
    }
  }

  /// Handles a `connect`: validates, creates the player, joins a lobby.
  pub fn connect(
    &self,
    name: &str,
    class: PlayerClass,
    team: &TeamId,
    addr: SocketAddr,
    sender: PeerSender,
    now: Instant,
  ) -> Result<(PlayerId, SessionToken, LobbyId), JoinError> {
    if name.chars().count() < 3 || name.chars().count() > 20 {
      return Err(JoinError::InvalidName);
    }
    if !team.as_str().starts_with("team") {
      return Err(JoinError::InvalidTeam);
    }
    if self.name_in_use(name) {
      return Err(JoinError::NameInUse);
    }
    // One live player per source address.
    if self.registry.has_addr(addr) {
      return Err(JoinError::AlreadyConnected);
    }

    let n = self.next_player.fetch_add(1, Ordering::SeqCst) + 1;
    let player_id = PlayerId::new(format!("player_{n}"));
    let token = self.sessions.create(player_id.clone(), name.to_string(), now);
    self.inputs.register(player_id.clone(), 0);
    self.registry.insert(player_id.clone(), sender, addr, now);

    let member = NewWorldPlayer {
      id:    player_id.clone(),
      name:  name.to_string(),
      team:  team.clone(),
      class,
    };
    let (lobby_id, roster) = self.lobbies.join(member, now);
    info!("{name} connected as {player_id} into {lobby_id}");

    let update = cb::Packet::LobbyUpdate {
      lobby_id: lobby_id.clone(),
      status:   cb::LobbyStatus::Waiting,
      players:  roster.clone(),
    };
    let joined = cb::Packet::PlayerJoined {
      player_id: player_id.clone(),
      name:      name.to_string(),
      team_id:   team.clone(),
    };
    let member_ids: Vec<PlayerId> = roster.iter().map(|m| m.player_id.clone()).collect();
    self.registry.send_many(member_ids.iter(), &update);
    self
      .registry
      .send_many(member_ids.iter().filter(|id| **id != player_id), &joined);

    Ok((player_id, token, lobby_id))
  }

  /// Handles a `reconnect`: validates the token and puts the player back
  /// where they were.
  pub fn reconnect(
    &self,
    token: &SessionToken,
    name: &str,
    addr: SocketAddr,
    sender: PeerSender,
    now: Instant,
  ) -> Result<(PlayerId, Option<WorldId>), ReconnectError> {
    let back = self.sessions.reconnect(token, name, now)?;
    let player_id = back.player.id().clone();
    match &back.world_id {
      Some(world_id) => {
        let world = self.worlds.insert_player(world_id, *back.player).map_err(|e| {
          // The world died while they were away; nothing to restore.
          self.sessions.invalidate(&player_id);
          e
        })?;
        self.inputs.register(player_id.clone(), back.last_acked_input);
        self.registry.insert(player_id.clone(), sender, addr, now);
        let subscribers: Vec<PlayerId> = {
          let state = world.lock_state();
          state.players.keys().cloned().collect()
        };
        let packet = cb::Packet::PlayerReconnected { player_id: player_id.clone() };
        self
          .registry
          .send_many(subscribers.iter().filter(|id| **id != player_id), &packet);
        info!("{name} reconnected as {player_id} into {world_id}");
        Ok((player_id, Some(world_id.clone())))
      }
      None => {
        // They were in a lobby; queue them again.
        self.inputs.register(player_id.clone(), back.last_acked_input);
        self.registry.insert(player_id.clone(), sender, addr, now);
        let member = NewWorldPlayer {
          id:    player_id.clone(),
          name:  name.to_string(),
          team:  back.player.team().clone(),
          class: back.player.class(),
        };
        let (lobby_id, _) = self.lobbies.join(member, now);
        info!("{name} reconnected as {player_id} into {lobby_id}");
        Ok((player_id, None))
      }
    }
  }

  /// Graceful disconnect: no session survives.
  pub fn disconnect_graceful(&self, player: &PlayerId, now: Instant) {
    info!("{player} disconnected");
    let audience = self.audience_of(player);
    if self.worlds.remove_player(player).is_none() {
      if let Some((lobby_id, roster)) = self.lobbies.leave(player, now) {
        let update = cb::Packet::LobbyUpdate {
          lobby_id,
          status: cb::LobbyStatus::Waiting,
          players: roster.clone(),
        };
        let ids: Vec<PlayerId> = roster.iter().map(|m| m.player_id.clone()).collect();
        self.registry.send_many(ids.iter(), &update);
      }
    }
    self.sessions.invalidate(player);
    self.inputs.remove(player);
    self.registry.remove(player);
    let packet =
      cb::Packet::PlayerDisconnected { player_id: player.clone(), can_reconnect: false };
    self.registry.send_many(audience.iter(), &packet);
  }

  /// Abrupt disconnect (transport error or timeout): the player's state is
  /// frozen for the session TTL.
  pub fn freeze_disconnect(&self, player: &PlayerId, now: Instant) {
    let audience = self.audience_of(player);
    let last_acked = self.inputs.remove(player).unwrap_or(0);
    match self.worlds.remove_player(player) {
      Some((p, world_id)) => {
        self.sessions.freeze(player, Some(world_id), Some(p), last_acked, now);
      }
      None => {
        if let Some((lobby_id, roster)) = self.lobbies.leave(player, now) {
          let update = cb::Packet::LobbyUpdate {
            lobby_id,
            status: cb::LobbyStatus::Waiting,
            players: roster.clone(),
          };
          let ids: Vec<PlayerId> = roster.iter().map(|m| m.player_id.clone()).collect();
          self.registry.send_many(ids.iter(), &update);
        }
        self.sessions.freeze(player, None, None, last_acked, now);
      }
    }
    self.registry.remove(player);
    let packet =
      cb::Packet::PlayerDisconnected { player_id: player.clone(), can_reconnect: true };
    self.registry.send_many(audience.iter(), &packet);
  }

  /// Everyone who should hear about this player's comings and goings:
  /// their world's players, or their lobby's members.
  fn audience_of(&self, player: &PlayerId) -> Vec<PlayerId> {
    if let Some(world) = self.worlds.find_world_by_player(player) {
      let state = world.lock_state();
      return state.players.keys().filter(|id| *id != player).cloned().collect();
    }
    if let Some(lobby_id) = self.lobbies.find_lobby_of(player) {
      if let Some(lobby) = self.lobbies.get(&lobby_id) {
        return lobby
          .lock()
          .members()
          .iter()
          .map(|m| m.id.clone())
          .filter(|id| id != player)
          .collect();
      }
    }
    vec![]
  }

  /// Ops surface: pushes a notice to every connected client.
  pub fn admin_broadcast(&self, message: &str) {
    self.registry.broadcast(&cb::Packet::AdminMessage { message: message.into() });
  }

  /// Ops surface: marks a world completed, which activates its extraction
  /// points. Returns false for an unknown world.
  pub fn admin_force_complete(&self, world_id: &WorldId) -> bool {
    let ok = self.worlds.force_complete(world_id);
    if ok {
      warn!("world {world_id} force completed by admin");
      self.admin_broadcast(&format!("world {world_id} has been closed by an operator"));
    }
    ok
  }

  fn name_in_use(&self, name: &str) -> bool {
    if self.lobbies.name_in_use(name) {
      return true;
    }
    self
      .worlds
      .all_worlds()
      .iter()
      .any(|w| w.lock_state().players.values().any(|p| p.name() == name))
  }
}
