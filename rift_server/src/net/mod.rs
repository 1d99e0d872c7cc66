//! The server side of the transport boundary. The datagram socket itself is
//! an external collaborator: it decodes envelopes with a [`Codec`] and
//! calls [`packet::handle`]; outbound packets go through a [`PeerSender`],
//! which is a bounded queue the transport drains.
//!
//! [`Codec`]: rift_common::net::Codec

pub mod packet;
pub mod ratelimit;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use ratelimit::TokenBucket;
use rift_common::{
  net::cb,
  util::{MessageId, PlayerId},
};
use std::{
  collections::HashMap,
  net::SocketAddr,
  sync::atomic::{AtomicU64, Ordering},
  time::{Duration, Instant},
};

/// Chat allowance: a short burst, refilled at one message a second.
const CHAT_BURST: f64 = 5.0;
const CHAT_REFILL_PER_S: f64 = 1.0;

/// Reliable messages stop retrying after this many attempts.
const RELIABLE_MAX_ATTEMPTS: u32 = 5;
const RELIABLE_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Sends packets toward one client. The queue is bounded; the transport is
/// datagram based, so when the queue is full the packet is simply dropped.
/// Sending to a disconnected peer is also a silent drop.
#[derive(Debug, Clone)]
pub struct PeerSender {
  tx: Sender<cb::Packet>,
}

impl PeerSender {
  /// Creates a sender and the receiving end the transport drains. Tests
  /// use the receiver directly.
  pub fn pair() -> (PeerSender, Receiver<cb::Packet>) {
    let (tx, rx) = crossbeam_channel::bounded(512);
    (PeerSender { tx }, rx)
  }

  pub fn send(&self, p: cb::Packet) {
    match self.tx.try_send(p) {
      Ok(()) => {}
      Err(TrySendError::Full(p)) => {
        debug!("peer queue full, dropping {}", p.tag());
      }
      Err(TrySendError::Disconnected(_)) => {}
    }
  }
}

struct Peer {
  sender:        PeerSender,
  addr:          SocketAddr,
  last_activity: Instant,
}

struct PendingMessage {
  to:         PlayerId,
  packet:     cb::Packet,
  attempts:   u32,
  next_retry: Instant,
}

/// The peer registry: who is connected, where from, when they last spoke,
/// and which reliable messages still await an ack.
pub struct Registry {
  peers:        RwLock<HashMap<PlayerId, Peer>>,
  reliable:     Mutex<HashMap<MessageId, PendingMessage>>,
  chat_buckets: Mutex<HashMap<SocketAddr, TokenBucket>>,
  next_message: AtomicU64,
}

impl Default for Registry {
  fn default() -> Self { Registry::new() }
}

impl Registry {
  pub fn new() -> Self {
    Registry {
      peers:        RwLock::new(HashMap::new()),
      reliable:     Mutex::new(HashMap::new()),
      chat_buckets: Mutex::new(HashMap::new()),
      next_message: AtomicU64::new(0),
    }
  }

  pub fn insert(&self, player: PlayerId, sender: PeerSender, addr: SocketAddr, now: Instant) {
    self.peers.write().insert(player, Peer { sender, addr, last_activity: now });
  }

  /// Drops a peer and any reliable messages addressed to them.
  pub fn remove(&self, player: &PlayerId) {
    self.peers.write().remove(player);
    self.reliable.lock().retain(|_, m| &m.to != player);
  }

  pub fn contains(&self, player: &PlayerId) -> bool { self.peers.read().contains_key(player) }

  pub fn addr_of(&self, player: &PlayerId) -> Option<SocketAddr> {
    self.peers.read().get(player).map(|p| p.addr)
  }

  /// Refreshes the liveness clock for a player.
  pub fn touch(&self, player: &PlayerId, now: Instant) {
    if let Some(p) = self.peers.write().get_mut(player) {
      p.last_activity = now;
    }
  }

  /// Players silent for longer than `timeout`.
  pub fn idle_peers(&self, now: Instant, timeout: Duration) -> Vec<PlayerId> {
    self
      .peers
      .read()
      .iter()
      .filter(|(_, p)| now.duration_since(p.last_activity) >= timeout)
      .map(|(id, _)| id.clone())
      .collect()
  }

  pub fn send(&self, player: &PlayerId, p: cb::Packet) {
    if let Some(peer) = self.peers.read().get(player) {
      peer.sender.send(p);
    }
  }

  /// Sends to every listed player.
  pub fn send_many<'a>(&self, players: impl Iterator<Item = &'a PlayerId>, p: &cb::Packet) {
    let peers = self.peers.read();
    for id in players {
      if let Some(peer) = peers.get(id) {
        peer.sender.send(p.clone());
      }
    }
  }

  /// Sends to every connected peer.
  pub fn broadcast(&self, p: &cb::Packet) {
    let peers = self.peers.read();
    for peer in peers.values() {
      peer.sender.send(p.clone());
    }
  }

  /// Sends a message that must be acknowledged, and records it for retry.
  /// The message id is allocated first and handed to `make`, so packets
  /// that carry their own id on the wire can embed it.
  pub fn send_reliable(
    &self,
    player: &PlayerId,
    make: impl FnOnce(MessageId) -> cb::Packet,
    now: Instant,
  ) -> MessageId {
    let n = self.next_message.fetch_add(1, Ordering::SeqCst) + 1;
    let id = MessageId::new(format!("msg_{n}"));
    let packet = make(id.clone());
    self.reliable.lock().insert(id.clone(), PendingMessage {
      to:         player.clone(),
      packet:     packet.clone(),
      attempts:   1,
      next_retry: now + RELIABLE_RETRY_INTERVAL,
    });
    self.send(player, packet);
    id
  }

  /// True if some connected player came from this source address.
  pub fn has_addr(&self, addr: SocketAddr) -> bool {
    self.peers.read().values().any(|p| p.addr == addr)
  }

  /// Clears a pending reliable record. A duplicate or unknown ack is a
  /// no-op.
  pub fn ack(&self, message_id: &MessageId) { self.reliable.lock().remove(message_id); }

  /// Retries due reliable messages and drops the ones past the attempt
  /// cap. Runs on the background sweep, not the tick path.
  pub fn retry_reliable(&self, now: Instant) {
    let mut due = vec![];
    {
      let mut reliable = self.reliable.lock();
      reliable.retain(|id, m| {
        if m.attempts >= RELIABLE_MAX_ATTEMPTS {
          warn!("dropping reliable message {id} to {} after {} attempts", m.to, m.attempts);
          return false;
        }
        true
      });
      for m in reliable.values_mut() {
        if now >= m.next_retry {
          m.attempts += 1;
          m.next_retry = now + RELIABLE_RETRY_INTERVAL;
          due.push((m.to.clone(), m.packet.clone()));
        }
      }
    }
    for (to, packet) in due {
      self.send(&to, packet);
    }
  }

  /// Spends one chat token for this address.
  pub fn allow_chat(&self, addr: SocketAddr, now: Instant) -> bool {
    self
      .chat_buckets
      .lock()
      .entry(addr)
      .or_insert_with(|| TokenBucket::new(CHAT_BURST, CHAT_REFILL_PER_S, now))
      .try_take(now)
  }

  #[cfg(test)]
  pub fn pending_reliable(&self) -> usize { self.reliable.lock().len() }
}
