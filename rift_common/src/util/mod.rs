use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Defines an opaque string id. All the game entities are keyed by ids like
/// these. They are cheap enough to clone, and keeping them distinct types
/// means a loot id cannot be passed where a player id is expected.
macro_rules! string_id {
  ( $(#[$attr:meta])* $name:ident ) => {
    $(#[$attr])*
    #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct $name(String);

    impl $name {
      pub fn new(id: impl Into<String>) -> Self { $name(id.into()) }
      pub fn as_str(&self) -> &str { &self.0 }
      pub fn is_empty(&self) -> bool { self.0.is_empty() }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.0) }
    }

    impl From<&str> for $name {
      fn from(s: &str) -> Self { $name(s.into()) }
    }
  };
}

string_id!(
  /// A player's unique id. Assigned by the server on connect, and stable
  /// across reconnects.
  PlayerId
);
string_id!(WorldId);
string_id!(
  /// A room id, in the form `room_X_Y`.
  RoomId
);
string_id!(MobId);
string_id!(LootId);
string_id!(LobbyId);
string_id!(ExtractionId);
string_id!(
  /// An id for a reliable clientbound message. Echoed back in `message_ack`.
  MessageId
);
string_id!(
  /// A team id. Must begin with `team`; validated on connect.
  TeamId
);

/// A reconnection token. Handed to the client on connect, and presented again
/// on reconnect. The token is random, and the state it maps to only ever
/// lives server side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
  /// Generates a new random token. This uses the OS random number generator,
  /// so tokens are not guessable from earlier tokens.
  pub fn random() -> Self {
    let mut bytes = [0_u8; 16];
    OsRng.fill_bytes(&mut bytes);
    let mut s = String::with_capacity(32);
    for b in bytes {
      s.push_str(&format!("{b:02x}"));
    }
    SessionToken(s)
  }

  pub fn new(tok: impl Into<String>) -> Self { SessionToken(tok.into()) }
  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for SessionToken {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.0) }
}

pub use num_cpus::get as num_cpus;
