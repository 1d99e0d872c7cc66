//! The wire message model. Every datagram, in either direction, is an
//! [`Envelope`] around one payload. Serverbound payloads live in [`sb`], and
//! clientbound payloads live in [`cb`].
//!
//! The actual socket and the byte codec are collaborators. The server never
//! touches bytes; it hands typed packets to a [`Codec`] implementation
//! somewhere else. Every payload has a fixed shape, and the envelope's type
//! tag decides which shape the data field has. There is no free-form value
//! anywhere in the protocol.

pub mod cb;
pub mod sb;

use crate::util::PlayerId;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// The envelope around every message. `player_id` is empty for
/// server-originated broadcasts and for messages sent before a player id is
/// assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<P> {
  pub player_id: PlayerId,
  pub timestamp: DateTime<Utc>,
  #[serde(flatten)]
  pub packet:    P,
}

impl<P> Envelope<P> {
  pub fn new(player_id: PlayerId, packet: P) -> Self {
    Envelope { player_id, timestamp: Utc::now(), packet }
  }

  /// An envelope with an empty player id. Used for server broadcasts.
  pub fn broadcast(packet: P) -> Self { Envelope::new(PlayerId::new(""), packet) }
}

#[derive(Debug, Error)]
pub enum CodecError {
  #[error("message too large: {0} bytes")]
  TooLarge(usize),
  #[error("malformed message: {0}")]
  Malformed(String),
}

/// The byte codec collaborator. Implementations are external to the server;
/// the only one in this repository is the JSON codec used by tests.
pub trait Codec: Send + Sync {
  fn encode(&self, msg: &Envelope<cb::Packet>) -> Result<Vec<u8>, CodecError>;
  fn decode(&self, bytes: &[u8]) -> Result<Envelope<sb::Packet>, CodecError>;
}

/// A codec that encodes envelopes as JSON. This exists for tests and smoke
/// runs; production deployments plug in a binary codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
  fn encode(&self, msg: &Envelope<cb::Packet>) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(msg).map_err(|e| CodecError::Malformed(e.to_string()))
  }
  fn decode(&self, bytes: &[u8]) -> Result<Envelope<sb::Packet>, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))
  }
}

/// Round-trips a value through the test codec. Handy in tests that want to
/// prove a payload shape survives serialization.
pub fn json_roundtrip<T: Serialize + DeserializeOwned>(v: &T) -> T {
  serde_json::from_slice(&serde_json::to_vec(v).unwrap()).unwrap()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn envelope_carries_type_tag() {
    let env = Envelope::new(PlayerId::new("p1"), sb::Packet::Heartbeat);
    let bytes = serde_json::to_vec(&env).unwrap();
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("\"type\":\"heartbeat\""), "got: {text}");
  }

  #[test]
  fn codec_roundtrip() {
    let codec = JsonCodec;
    let env = Envelope::new(
      PlayerId::new("p1"),
      sb::Packet::Chat { message: "hello".into(), chat_type: sb::ChatScope::Team },
    );
    let bytes = serde_json::to_vec(&env).unwrap();
    let back = codec.decode(&bytes).unwrap();
    assert_eq!(back.player_id, PlayerId::new("p1"));
    match back.packet {
      sb::Packet::Chat { message, chat_type } => {
        assert_eq!(message, "hello");
        assert_eq!(chat_type, sb::ChatScope::Team);
      }
      p => panic!("expected chat, got {p:?}"),
    }
  }
}
