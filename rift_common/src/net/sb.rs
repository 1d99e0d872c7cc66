//! Serverbound packets. These are the only messages clients can send. Each
//! variant is one envelope type tag, and the variant's fields are the fixed
//! payload shape for that tag.

use crate::{
  math::Vec2,
  util::{ExtractionId, LootId, MessageId, SessionToken, TeamId},
};
use serde::{Deserialize, Serialize};

/// A player's class. Decided at connect time and fixed for the life of the
/// player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerClass {
  Scout,
  Tank,
  Support,
}

impl PlayerClass {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Scout => "scout",
      Self::Tank => "tank",
      Self::Support => "support",
    }
  }
}

impl std::str::FromStr for PlayerClass {
  type Err = ();

  fn from_str(s: &str) -> Result<Self, ()> {
    match s {
      "scout" => Ok(Self::Scout),
      "tank" => Ok(Self::Tank),
      "support" => Ok(Self::Support),
      _ => Err(()),
    }
  }
}

/// The abilities a player can trigger from an input frame. Which of these a
/// given player may use depends on their class; the server rejects the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbilityKind {
  Dash,
  Stealth,
  Charge,
  Shield,
  Heal,
  Buff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionAction {
  Start,
  Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatScope {
  All,
  Team,
}

/// One frame of player input. Sequences are strictly increasing per player;
/// the server applies each sequence at most once and acknowledges the
/// largest sequence it consumed in the next snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFrame {
  pub sequence:     u32,
  /// Desired movement. Length must be at most 1.1; anything longer is a
  /// validation violation and the frame is dropped.
  pub movement:     Vec2,
  /// Aim direction. Not required to be unit length; the server normalizes.
  pub aim:          Vec2,
  pub is_attacking: bool,
  pub is_sprinting: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ability:      Option<AbilityKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Packet {
  Connect {
    player_name:  String,
    player_class: PlayerClass,
    team_id:      TeamId,
  },
  Reconnect {
    session_token: SessionToken,
    player_name:   String,
  },
  Heartbeat,
  PlayerInput(InputFrame),
  LootGrab {
    loot_id: LootId,
  },
  UseItem {
    item_id: LootId,
  },
  Extraction {
    extraction_id: ExtractionId,
    action:        ExtractionAction,
  },
  Chat {
    message:   String,
    chat_type: ChatScope,
  },
  Ping {
    client_data: String,
  },
  MessageAck {
    message_id:    MessageId,
    success:       bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
  },
  Disconnect,
}

impl Packet {
  /// The envelope type tag for this packet. Used for rate limit bookkeeping
  /// and logging.
  pub fn tag(&self) -> &'static str {
    match self {
      Self::Connect { .. } => "connect",
      Self::Reconnect { .. } => "reconnect",
      Self::Heartbeat => "heartbeat",
      Self::PlayerInput(_) => "player_input",
      Self::LootGrab { .. } => "loot_grab",
      Self::UseItem { .. } => "use_item",
      Self::Extraction { .. } => "extraction",
      Self::Chat { .. } => "chat",
      Self::Ping { .. } => "ping",
      Self::MessageAck { .. } => "message_ack",
      Self::Disconnect => "disconnect",
    }
  }
}
