//! Reconnection sessions. Every connect issues a token. On an abrupt
//! disconnect the player's whole state is frozen under that token for the
//! TTL; presenting the token (with the matching name) inside the window
//! rehydrates them. Graceful disconnects invalidate the session instead.

use crate::{error::ReconnectError, player::Player};
use parking_lot::Mutex;
use rift_common::util::{PlayerId, SessionToken, WorldId};
use std::{
  collections::HashMap,
  time::{Duration, Instant},
};

#[derive(Debug)]
pub enum SessionState {
  /// The player is connected; the token is just a credential.
  Active,
  /// The player dropped; their state is preserved until the TTL runs out.
  Frozen(Box<Player>),
}

#[derive(Debug)]
pub struct Session {
  pub token:      SessionToken,
  pub player_id:  PlayerId,
  pub name:       String,
  pub world_id:   Option<WorldId>,
  pub is_lobby:   bool,
  pub state:      SessionState,
  pub created_at: Instant,
  pub expires_at: Option<Instant>,
  /// Where the input buffer left off, so acknowledgements resume correctly.
  pub last_acked_input: u32,
}

/// What a successful reconnect hands back to the caller.
#[derive(Debug)]
pub struct Rehydrated {
  pub player:           Box<Player>,
  pub world_id:         Option<WorldId>,
  pub last_acked_input: u32,
}

pub struct SessionManager {
  ttl:       Duration,
  sessions:  Mutex<HashMap<SessionToken, Session>>,
  by_player: Mutex<HashMap<PlayerId, SessionToken>>,
}

impl SessionManager {
  pub fn new(ttl_s: f64) -> Self {
    SessionManager {
      ttl:       Duration::from_secs_f64(ttl_s),
      sessions:  Mutex::new(HashMap::new()),
      by_player: Mutex::new(HashMap::new()),
    }
  }

  /// Issues a token for a fresh connect.
  pub fn create(&self, player_id: PlayerId, name: String, now: Instant) -> SessionToken {
    let token = SessionToken::random();
    let session = Session {
      token:            token.clone(),
      player_id:        player_id.clone(),
      name,
      world_id:         None,
      is_lobby:         true,
      state:            SessionState::Active,
      created_at:       now,
      expires_at:       None,
      last_acked_input: 0,
    };
    self.by_player.lock().insert(player_id, token.clone());
    self.sessions.lock().insert(token.clone(), session);
    token
  }

  /// Freezes a player's state on an abrupt disconnect. `player` is `None`
  /// when they were still in a lobby.
  pub fn freeze(
    &self,
    player_id: &PlayerId,
    world_id: Option<WorldId>,
    player: Option<Player>,
    last_acked_input: u32,
    now: Instant,
  ) {
    let tokens = self.by_player.lock();
    let Some(token) = tokens.get(player_id) else { return };
    let mut sessions = self.sessions.lock();
    let Some(session) = sessions.get_mut(token) else { return };
    session.is_lobby = world_id.is_none();
    session.world_id = world_id;
    session.state = match player {
      Some(p) => SessionState::Frozen(Box::new(p)),
      None => SessionState::Active,
    };
    session.expires_at = Some(now + self.ttl);
    session.last_acked_input = last_acked_input;
  }

  /// Validates a token and takes the frozen state out. The session flips
  /// back to active on success, keeping the same token.
  pub fn reconnect(
    &self,
    token: &SessionToken,
    name: &str,
    now: Instant,
  ) -> Result<Rehydrated, ReconnectError> {
    let mut sessions = self.sessions.lock();
    let session = sessions.get_mut(token).ok_or(ReconnectError::SessionNotFound)?;
    if let Some(expiry) = session.expires_at {
      if now >= expiry {
        let player_id = session.player_id.clone();
        sessions.remove(token);
        self.by_player.lock().remove(&player_id);
        return Err(ReconnectError::SessionExpired);
      }
    }
    if session.name != name {
      return Err(ReconnectError::NameMismatch);
    }
    let state = std::mem::replace(&mut session.state, SessionState::Active);
    let SessionState::Frozen(player) = state else {
      return Err(ReconnectError::SessionNotFound);
    };
    session.expires_at = None;
    Ok(Rehydrated {
      player,
      world_id: session.world_id.clone(),
      last_acked_input: session.last_acked_input,
    })
  }

  /// Invalidates a player's session (graceful disconnect).
  pub fn invalidate(&self, player_id: &PlayerId) {
    if let Some(token) = self.by_player.lock().remove(player_id) {
      self.sessions.lock().remove(&token);
    }
  }

  /// True if this player id belongs to a live session.
  pub fn knows_player(&self, player_id: &PlayerId) -> bool {
    self.by_player.lock().contains_key(player_id)
  }

  pub fn token_of(&self, player_id: &PlayerId) -> Option<SessionToken> {
    self.by_player.lock().get(player_id).cloned()
  }

  /// Drops expired sessions. Returns the owners for logging.
  pub fn sweep(&self, now: Instant) -> Vec<PlayerId> {
    let mut sessions = self.sessions.lock();
    let expired: Vec<SessionToken> = sessions
      .iter()
      .filter(|(_, s)| s.expires_at.map(|e| now >= e).unwrap_or(false))
      .map(|(t, _)| t.clone())
      .collect();
    let mut out = vec![];
    if !expired.is_empty() {
      let mut by_player = self.by_player.lock();
      for token in expired {
        if let Some(s) = sessions.remove(&token) {
          by_player.remove(&s.player_id);
          out.push(s.player_id);
        }
      }
    }
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::BalanceConfig;
  use pretty_assertions::assert_eq;
  use rift_common::{
    math::Vec2,
    net::sb::PlayerClass,
    util::{RoomId, TeamId},
  };

  fn frozen_player(id: &str) -> Player {
    Player::new(
      PlayerId::new(id),
      id.into(),
      TeamId::new("team1"),
      PlayerClass::Scout,
      Vec2::new(30.0, 30.0),
      RoomId::new("room_2_2"),
      &BalanceConfig::default(),
      Instant::now(),
    )
  }

  #[test]
  fn freeze_then_reconnect_restores_state() {
    let mgr = SessionManager::new(300.0);
    let now = Instant::now();
    let pid = PlayerId::new("q");
    let token = mgr.create(pid.clone(), "q".into(), now);
    mgr.freeze(&pid, Some(WorldId::new("world_1")), Some(frozen_player("q")), 17, now);

    let back = mgr
      .reconnect(&token, "q", now + Duration::from_secs(120))
      .unwrap();
    assert_eq!(back.world_id, Some(WorldId::new("world_1")));
    assert_eq!(back.last_acked_input, 17);
    assert_eq!(back.player.position(), Vec2::new(30.0, 30.0));
  }

  #[test]
  fn ttl_expires_sessions() {
    let mgr = SessionManager::new(300.0);
    let now = Instant::now();
    let pid = PlayerId::new("q");
    let token = mgr.create(pid.clone(), "q".into(), now);
    mgr.freeze(&pid, None, None, 0, now);

    let res = mgr.reconnect(&token, "q", now + Duration::from_secs(301));
    assert_eq!(res.unwrap_err(), ReconnectError::SessionExpired);
    // The expired session is gone entirely.
    let res = mgr.reconnect(&token, "q", now);
    assert_eq!(res.unwrap_err(), ReconnectError::SessionNotFound);
  }

  #[test]
  fn name_must_match() {
    let mgr = SessionManager::new(300.0);
    let now = Instant::now();
    let pid = PlayerId::new("q");
    let token = mgr.create(pid.clone(), "q".into(), now);
    mgr.freeze(&pid, None, Some(frozen_player("q")), 0, now);
    let res = mgr.reconnect(&token, "somebody-else", now + Duration::from_secs(1));
    assert_eq!(res.unwrap_err(), ReconnectError::NameMismatch);
    // The session survives a failed attempt.
    assert!(mgr.reconnect(&token, "q", now + Duration::from_secs(2)).is_ok());
  }

  #[test]
  fn graceful_disconnect_invalidates() {
    let mgr = SessionManager::new(300.0);
    let now = Instant::now();
    let pid = PlayerId::new("q");
    let token = mgr.create(pid.clone(), "q".into(), now);
    mgr.invalidate(&pid);
    let res = mgr.reconnect(&token, "q", now);
    assert_eq!(res.unwrap_err(), ReconnectError::SessionNotFound);
  }

  #[test]
  fn sweep_reaps_only_expired() {
    let mgr = SessionManager::new(300.0);
    let now = Instant::now();
    let a = PlayerId::new("a");
    let b = PlayerId::new("b");
    mgr.create(a.clone(), "a".into(), now);
    mgr.create(b.clone(), "b".into(), now);
    mgr.freeze(&a, None, None, 0, now);
    // b stays active: no expiry.
    let reaped = mgr.sweep(now + Duration::from_secs(301));
    assert_eq!(reaped, vec![a]);
    assert!(mgr.knows_player(&b));
  }
}
