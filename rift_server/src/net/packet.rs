//! Handles a single decoded envelope. The transport collaborator calls
//! [`handle`] for every datagram; everything here is validation and
//! routing, the state changes happen in the managers and the tick.

use crate::{
  engine::Engine,
  error,
  input::PushError,
  world::Command,
};
use chrono::Utc;
use rift_common::{
  net::{cb, sb, Envelope},
  util::PlayerId,
};
use std::{net::SocketAddr, sync::Arc, time::Instant};

use super::PeerSender;

const MAX_CHAT_LEN: usize = 200;

/// Handles one serverbound envelope. `sender` is the reply path for this
/// peer; for an already connected player it must match the registered one.
pub fn handle(
  engine: &Arc<Engine>,
  addr: SocketAddr,
  sender: &PeerSender,
  env: Envelope<sb::Packet>,
) {
  let now = Instant::now();
  let player = env.player_id;
  match env.packet {
    sb::Packet::Connect { player_name, player_class, team_id } => {
      match engine.connect(&player_name, player_class, &team_id, addr, sender.clone(), now) {
        Ok((player_id, session_token, lobby_id)) => {
          sender.send(cb::Packet::Connected { player_id, session_token, lobby_id });
        }
        Err(e) => {
          info!("rejected connect from {addr}: {e}");
          sender.send(error::to_packet(e.code(), e));
        }
      }
    }
    sb::Packet::Reconnect { session_token, player_name } => {
      match engine.reconnect(&session_token, &player_name, addr, sender.clone(), now) {
        Ok((player_id, world_id)) => {
          engine.registry().send_reliable(
            &player_id,
            |message_id| cb::Packet::ReconnectResponse {
              success: true,
              world_id,
              error: None,
              message_id,
            },
            now,
          );
        }
        Err(e) => {
          info!("rejected reconnect from {addr}: {e}");
          sender.send(cb::Packet::ReconnectResponse {
            success:    false,
            world_id:   None,
            error:      Some(e.code().into()),
            message_id: rift_common::util::MessageId::new(""),
          });
        }
      }
    }
    sb::Packet::Heartbeat => {
      if authentic(engine, &player, addr) {
        engine.registry().touch(&player, now);
        engine.registry().send(&player, cb::Packet::HeartbeatAck);
      }
    }
    sb::Packet::PlayerInput(frame) => {
      if !authentic(engine, &player, addr) {
        return;
      }
      engine.registry().touch(&player, now);
      let max = engine.config().movement.max_input_magnitude;
      match engine.inputs().push(&player, frame, max) {
        Ok(()) => {}
        Err(PushError::Stale) => {} // late duplicate, silently dropped
        Err(PushError::UnknownPlayer) => {
          debug!("input from {player} with no buffer registered");
        }
        Err(PushError::MagnitudeExceeded) => {
          warn!("{player} sent a move vector past the magnitude limit");
        }
      }
    }
    sb::Packet::LootGrab { loot_id } => {
      if !authentic(engine, &player, addr) {
        return;
      }
      engine.registry().touch(&player, now);
      if let Some(world) = engine.worlds().find_world_by_player(&player) {
        world.queue_command(Command::LootGrab { player, loot: loot_id });
      }
    }
    sb::Packet::UseItem { item_id } => {
      if !authentic(engine, &player, addr) {
        return;
      }
      engine.registry().touch(&player, now);
      if let Some(world) = engine.worlds().find_world_by_player(&player) {
        world.queue_command(Command::UseItem { player, item: item_id });
      }
    }
    sb::Packet::Extraction { extraction_id, action } => {
      if !authentic(engine, &player, addr) {
        return;
      }
      engine.registry().touch(&player, now);
      if let Some(world) = engine.worlds().find_world_by_player(&player) {
        world.queue_command(Command::Extraction { player, point: extraction_id, action });
      }
    }
    sb::Packet::Chat { message, chat_type } => {
      if !authentic(engine, &player, addr) {
        return;
      }
      engine.registry().touch(&player, now);
      handle_chat(engine, &player, addr, message, chat_type, now);
    }
    sb::Packet::Ping { client_data } => {
      // Ping needs no session; it's a transport level probe.
      sender.send(cb::Packet::Pong {
        client_data,
        server_time_ms: Utc::now().timestamp_millis(),
      });
    }
    sb::Packet::MessageAck { message_id, success, error_message } => {
      if !authentic(engine, &player, addr) {
        return;
      }
      if !success {
        warn!(
          "{player} reported delivery failure for {message_id}: {}",
          error_message.as_deref().unwrap_or("no detail"),
        );
      }
      engine.registry().ack(&message_id);
    }
    sb::Packet::Disconnect => {
      if authentic(engine, &player, addr) {
        engine.disconnect_graceful(&player, now);
      }
    }
  }
}

/// A frame whose player id doesn't match the session registered for its
/// source address is discarded.
fn authentic(engine: &Arc<Engine>, player: &PlayerId, addr: SocketAddr) -> bool {
  if player.is_empty() {
    return false;
  }
  match engine.registry().addr_of(player) {
    Some(registered) if registered == addr => true,
    Some(_) => {
      warn!("{player} spoke from the wrong address, dropping");
      false
    }
    None => false,
  }
}

fn handle_chat(
  engine: &Arc<Engine>,
  player: &PlayerId,
  addr: SocketAddr,
  message: String,
  chat_type: sb::ChatScope,
  now: Instant,
) {
  if message.chars().count() > MAX_CHAT_LEN {
    engine.registry().send(
      player,
      error::to_packet("message_too_large", crate::error::EdgeError::MessageTooLarge),
    );
    return;
  }
  if !engine.registry().allow_chat(addr, now) {
    engine
      .registry()
      .send(player, error::to_packet("rate_limited", crate::error::EdgeError::RateLimited("chat")));
    return;
  }
  // Strip control characters; everything else is the client's business.
  let clean: String = message.chars().filter(|c| !c.is_control()).collect();

  let (audience, from_name) = match engine.worlds().find_world_by_player(player) {
    Some(world) => {
      let state = world.lock_state();
      let from_name =
        state.players.get(player).map(|p| p.name().to_string()).unwrap_or_default();
      let team = state.players.get(player).map(|p| p.team().clone());
      let ids = state
        .players
        .values()
        .filter(|p| match chat_type {
          sb::ChatScope::All => true,
          sb::ChatScope::Team => Some(p.team().clone()) == team,
        })
        .map(|p| p.id().clone())
        .collect::<Vec<_>>();
      (ids, from_name)
    }
    None => match engine.lobbies().find_lobby_of(player) {
      Some(lobby_id) => match engine.lobbies().get(&lobby_id) {
        Some(lobby) => {
          let l = lobby.lock();
          let me = l.members().iter().find(|m| &m.id == player);
          let from_name = me.map(|m| m.name.clone()).unwrap_or_default();
          let team = me.map(|m| m.team.clone());
          let ids = l
            .members()
            .iter()
            .filter(|m| match chat_type {
              sb::ChatScope::All => true,
              sb::ChatScope::Team => Some(m.team.clone()) == team,
            })
            .map(|m| m.id.clone())
            .collect::<Vec<_>>();
          (ids, from_name)
        }
        None => return,
      },
      None => return,
    },
  };
  let packet = cb::Packet::ChatReceived {
    from:      player.clone(),
    from_name,
    message:   clean,
    chat_type,
  };
  engine.registry().send_many(audience.iter(), &packet);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;
  use crossbeam_channel::Receiver;
  use rift_common::{net::sb::PlayerClass, util::TeamId};
  use std::time::Instant;

  struct TestPeer {
    engine:    Arc<Engine>,
    player_id: PlayerId,
    addr:      SocketAddr,
    sender:    PeerSender,
    rx:        Receiver<cb::Packet>,
  }

  impl TestPeer {
    fn new() -> Self {
      let engine = Arc::new(Engine::new(Config::default()));
      let addr: SocketAddr = "127.0.0.1:7100".parse().unwrap();
      let (sender, rx) = PeerSender::pair();
      let (player_id, _, _) = engine
        .connect("tester", PlayerClass::Scout, &TeamId::new("team1"), addr, sender.clone(), Instant::now())
        .unwrap();
      // Drop the connect-time traffic.
      while rx.try_recv().is_ok() {}
      TestPeer { engine, player_id, addr, sender, rx }
    }

    fn handle(&self, packet: sb::Packet) {
      let env = Envelope::new(self.player_id.clone(), packet);
      handle(&self.engine, self.addr, &self.sender, env);
    }

    fn replies(&self) -> Vec<cb::Packet> { self.rx.try_iter().collect() }
  }

  #[test]
  fn chat_length_boundary() {
    let peer = TestPeer::new();
    peer.handle(sb::Packet::Chat {
      message:   "x".repeat(200),
      chat_type: sb::ChatScope::All,
    });
    let got = peer.replies();
    assert!(
      got.iter().any(|p| matches!(p, cb::Packet::ChatReceived { .. })),
      "200 chars goes through: {got:?}",
    );

    peer.handle(sb::Packet::Chat {
      message:   "x".repeat(201),
      chat_type: sb::ChatScope::All,
    });
    let got = peer.replies();
    assert!(got.iter().any(|p| matches!(p, cb::Packet::Error { .. })));
    assert!(!got.iter().any(|p| matches!(p, cb::Packet::ChatReceived { .. })));
  }

  #[test]
  fn chat_rate_limit_kicks_in() {
    let peer = TestPeer::new();
    let mut errors = 0;
    for _ in 0..10 {
      peer.handle(sb::Packet::Chat { message: "spam".into(), chat_type: sb::ChatScope::All });
    }
    for p in peer.replies() {
      if let cb::Packet::Error { code, .. } = p {
        assert_eq!(code, "rate_limited");
        errors += 1;
      }
    }
    assert!(errors > 0, "the burst should run out of tokens");
  }

  #[test]
  fn wrong_address_is_dropped() {
    let peer = TestPeer::new();
    let spoofed: SocketAddr = "127.0.0.1:9999".parse().unwrap();
    let env = Envelope::new(peer.player_id.clone(), sb::Packet::Heartbeat);
    handle(&peer.engine, spoofed, &peer.sender, env);
    assert!(peer.replies().is_empty());
  }

  #[test]
  fn decoded_datagram_drives_the_handler() {
    use rift_common::net::{Codec, JsonCodec};

    let peer = TestPeer::new();
    // What an actual datagram looks like after the codec collaborator has
    // had its way with it.
    let bytes = serde_json::to_vec(&serde_json::json!({
      "player_id": peer.player_id.as_str(),
      "timestamp": chrono::Utc::now(),
      "type": "ping",
      "data": { "client_data": "probe" },
    }))
    .unwrap();
    let env = JsonCodec.decode(&bytes).unwrap();
    handle(&peer.engine, peer.addr, &peer.sender, env);
    assert!(peer.replies().iter().any(|p| matches!(
      p,
      cb::Packet::Pong { client_data, .. } if client_data == "probe"
    )));
  }

  #[test]
  fn heartbeat_and_ping() {
    let peer = TestPeer::new();
    peer.handle(sb::Packet::Heartbeat);
    peer.handle(sb::Packet::Ping { client_data: "42".into() });
    let got = peer.replies();
    assert!(got.iter().any(|p| matches!(p, cb::Packet::HeartbeatAck)));
    assert!(got.iter().any(|p| matches!(
      p,
      cb::Packet::Pong { client_data, .. } if client_data == "42"
    )));
  }
}
