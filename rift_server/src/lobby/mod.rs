//! Matchmaking lobbies. Players land in a lobby on connect; when a lobby
//! becomes ready the manager fires a single handoff and the engine builds a
//! world from it.

use crate::config::Config;
use parking_lot::{Mutex, RwLock};
use rift_common::{
  net::{cb, cb::LobbyStatus, sb::PlayerClass},
  util::{LobbyId, PlayerId, TeamId},
};
use std::{
  collections::HashMap,
  sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
  },
  time::{Duration, Instant},
};

/// Empty lobbies are destroyed after this cooldown.
const ABANDON_COOLDOWN: Duration = Duration::from_secs(30);

/// A player queued for a world. This is what the lobby hands to the world
/// manager at handoff.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWorldPlayer {
  pub id:    PlayerId,
  pub name:  String,
  pub team:  TeamId,
  pub class: PlayerClass,
}

#[derive(Debug)]
pub struct Lobby {
  pub id:     LobbyId,
  pub status: LobbyStatus,
  members:    Vec<NewWorldPlayer>,
  created_at: Instant,
  last_join:  Instant,
  emptied_at: Option<Instant>,
}

impl Lobby {
  fn new(id: LobbyId, now: Instant) -> Self {
    Lobby {
      id,
      status: LobbyStatus::Waiting,
      members: vec![],
      created_at: now,
      last_join: now,
      emptied_at: None,
    }
  }

  pub fn members(&self) -> &[NewWorldPlayer] { &self.members }

  pub fn team_count(&self, team: &TeamId) -> usize {
    self.members.iter().filter(|m| &m.team == team).count()
  }

  pub fn distinct_teams(&self) -> usize {
    let mut teams: Vec<&TeamId> = self.members.iter().map(|m| &m.team).collect();
    teams.sort();
    teams.dedup();
    teams.len()
  }

  pub fn roster(&self) -> Vec<cb::LobbyPlayer> {
    self
      .members
      .iter()
      .map(|m| cb::LobbyPlayer {
        player_id: m.id.clone(),
        name:      m.name.clone(),
        team_id:   m.team.clone(),
        class:     m.class,
      })
      .collect()
  }

  /// Whether this lobby should start, per the readiness rules: a quorate
  /// lobby that has been quiet for the join window, a full lobby, or a
  /// quorate lobby past the absolute deadline.
  fn is_ready(&self, cfg: &Config, now: Instant) -> bool {
    if self.status != LobbyStatus::Waiting {
      return false;
    }
    let n = self.members.len();
    if n >= cfg.max_players_per_world {
      return true;
    }
    if n < cfg.lobby.min_players_to_start {
      return false;
    }
    let quorate_teams = self.distinct_teams() >= cfg.lobby.min_teams_to_start;
    let quiet =
      now.duration_since(self.last_join).as_secs_f64() >= cfg.lobby.max_wait_s;
    if quorate_teams && quiet {
      return true;
    }
    now.duration_since(self.created_at).as_secs_f64() >= cfg.lobby.absolute_max_wait_s
  }
}

/// What `check_ready` hands to the engine, once per ready lobby.
#[derive(Debug)]
pub struct ReadyLobby {
  pub lobby_id: LobbyId,
  pub players:  Vec<NewWorldPlayer>,
}

pub struct LobbyManager {
  config:    Arc<Config>,
  lobbies:   RwLock<HashMap<LobbyId, Arc<Mutex<Lobby>>>>,
  by_player: RwLock<HashMap<PlayerId, LobbyId>>,
  next:      AtomicU32,
}

impl LobbyManager {
  pub fn new(config: Arc<Config>) -> Self {
    LobbyManager {
      config,
      lobbies: RwLock::new(HashMap::new()),
      by_player: RwLock::new(HashMap::new()),
      next: AtomicU32::new(0),
    }
  }

  /// Finds an open lobby with room for this team, or creates one.
  pub fn find_or_create_lobby(&self, team: &TeamId, now: Instant) -> Arc<Mutex<Lobby>> {
    {
      let lobbies = self.lobbies.read();
      for lobby in lobbies.values() {
        let l = lobby.lock();
        if l.status == LobbyStatus::Waiting
          && l.members.len() < self.config.max_players_per_world
          && l.team_count(team) < self.config.game_balance.max_team_size
        {
          return lobby.clone();
        }
      }
    }
    let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
    let id = LobbyId::new(format!("lobby_{n}"));
    let lobby = Arc::new(Mutex::new(Lobby::new(id.clone(), now)));
    self.lobbies.write().insert(id.clone(), lobby.clone());
    info!("created lobby {id}");
    lobby
  }

  /// Joins a player to a lobby, balancing their team first when the config
  /// asks for it. Returns the lobby id and the roster after the join.
  pub fn join(
    &self,
    mut member: NewWorldPlayer,
    now: Instant,
  ) -> (LobbyId, Vec<cb::LobbyPlayer>) {
    let lobby = self.find_or_create_lobby(&member.team, now);
    let mut l = lobby.lock();
    if self.config.lobby.auto_balance_teams {
      // Put the player on the smallest existing team if it is strictly
      // smaller than theirs.
      let mut counts: HashMap<&TeamId, usize> = HashMap::new();
      for m in &l.members {
        *counts.entry(&m.team).or_default() += 1;
      }
      if let Some((smallest, n)) = counts.into_iter().min_by_key(|(_, c)| *c) {
        if n < l.team_count(&member.team) {
          member.team = smallest.clone();
        }
      }
    }
    self.by_player.write().insert(member.id.clone(), l.id.clone());
    l.members.push(member);
    l.last_join = now;
    l.emptied_at = None;
    (l.id.clone(), l.roster())
  }

  /// Removes a player from their lobby. Returns the lobby id and the
  /// remaining roster when they were in one.
  pub fn leave(&self, player: &PlayerId, now: Instant) -> Option<(LobbyId, Vec<cb::LobbyPlayer>)> {
    let lobby_id = self.by_player.write().remove(player)?;
    let lobby = self.lobbies.read().get(&lobby_id).cloned()?;
    let mut l = lobby.lock();
    l.members.retain(|m| &m.id != player);
    if l.members.is_empty() {
      l.emptied_at = Some(now);
    }
    Some((lobby_id, l.roster()))
  }

  pub fn find_lobby_of(&self, player: &PlayerId) -> Option<LobbyId> {
    self.by_player.read().get(player).cloned()
  }

  pub fn get(&self, id: &LobbyId) -> Option<Arc<Mutex<Lobby>>> {
    self.lobbies.read().get(id).cloned()
  }

  /// True if any live lobby member has this name.
  pub fn name_in_use(&self, name: &str) -> bool {
    let lobbies = self.lobbies.read();
    lobbies.values().any(|l| l.lock().members.iter().any(|m| m.name == name))
  }

  /// Finds the lobbies that became ready. Each fires exactly once: the
  /// lobby moves to `Starting` here and never comes back to `Waiting`.
  pub fn check_ready(&self, now: Instant) -> Vec<ReadyLobby> {
    let mut out = vec![];
    let lobbies = self.lobbies.read();
    for lobby in lobbies.values() {
      let mut l = lobby.lock();
      if l.is_ready(&self.config, now) {
        l.status = LobbyStatus::Starting;
        out.push(ReadyLobby { lobby_id: l.id.clone(), players: l.members.clone() });
      }
    }
    out
  }

  /// Handoff succeeded: the lobby is done and its players now belong to a
  /// world.
  pub fn mark_completed(&self, id: &LobbyId) {
    if let Some(lobby) = self.get(id) {
      let mut l = lobby.lock();
      l.status = LobbyStatus::Completed;
      let mut by_player = self.by_player.write();
      for m in &l.members {
        by_player.remove(&m.id);
      }
      l.members.clear();
      l.emptied_at = Some(Instant::now());
    }
  }

  /// Handoff failed: the lobby is parked in the error state so clients can
  /// be told; players stay indexed so a later leave cleans up.
  pub fn mark_errored(&self, id: &LobbyId) {
    if let Some(lobby) = self.get(id) {
      lobby.lock().status = LobbyStatus::Errored;
    }
  }

  /// Destroys abandoned lobbies: empty past the cooldown, or completed.
  /// Returns their final (id, status) pairs for the terminal lobby_update.
  pub fn sweep_abandoned(&self, now: Instant) -> Vec<(LobbyId, LobbyStatus)> {
    let mut dead = vec![];
    {
      let lobbies = self.lobbies.read();
      for (id, lobby) in lobbies.iter() {
        let mut l = lobby.lock();
        let expired = match l.emptied_at {
          Some(t) => now.duration_since(t) >= ABANDON_COOLDOWN,
          None => false,
        };
        if expired {
          if l.status == LobbyStatus::Waiting {
            l.status = LobbyStatus::Abandoned;
          }
          dead.push((id.clone(), l.status));
        }
      }
    }
    if !dead.is_empty() {
      let mut lobbies = self.lobbies.write();
      for (id, _) in &dead {
        lobbies.remove(id);
        info!("destroyed lobby {id}");
      }
    }
    dead
  }
}
