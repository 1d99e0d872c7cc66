//! Clientbound packets. Snapshot-shaped payloads ([`WorldEssential`],
//! [`PlayerBatch`], [`MobChunk`]) are built once per world per send tick and
//! shared between subscribers behind an `Arc`, so cloning a packet for each
//! recipient never copies the body.

use crate::{
  math::Vec2,
  util::{
    ExtractionId, LobbyId, LootId, MessageId, MobId, PlayerId, RoomId, SessionToken, TeamId,
    WorldId,
  },
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::sb::{AbilityKind, ChatScope, PlayerClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyStatus {
  Waiting,
  Starting,
  Completed,
  Errored,
  Abandoned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyPlayer {
  pub player_id: PlayerId,
  pub name:      String,
  pub team_id:   TeamId,
  pub class:     PlayerClass,
}

/// One player's state in a [`PlayerBatch`]. Only players whose state moved
/// past the delta thresholds appear in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
  pub player_id: PlayerId,
  pub position:  Vec2,
  pub velocity:  Vec2,
  /// Aim direction, radians.
  pub direction: f64,
  pub health:    i32,
  pub shield:    i32,
  pub alive:     bool,
  pub room_id:   RoomId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAck {
  pub player_id: PlayerId,
  /// The largest input sequence the server has consumed for this player.
  pub sequence:  u32,
}

/// The per-player state batch, sent every player-batch tick. Carries the
/// input acknowledgements clients need for prediction reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerBatch {
  pub world_id:            WorldId,
  pub frame:               u64,
  pub players:             Vec<PlayerState>,
  pub acknowledged_inputs: Vec<InputAck>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobUpdate {
  pub mob_id:   MobId,
  pub mob_type: String,
  pub position: Vec2,
  pub room_id:  RoomId,
  pub state:    String,
  pub hp:       i32,
}

/// Dirty mobs since the last send.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MobChunk {
  pub world_id: WorldId,
  pub frame:    u64,
  pub mobs:     Vec<MobUpdate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomState {
  pub room_id:        RoomId,
  pub completed:      bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub completing_team: Option<TeamId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionState {
  pub extraction_id: ExtractionId,
  pub active:        bool,
  /// Progress per extracting player, in `0.0..=1.0`.
  pub extracting:    Vec<(PlayerId, f64)>,
}

/// The world-level delta, sent every world tick. Rooms appear only when
/// their completion state changed since the last send.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldEssential {
  pub world_id:     WorldId,
  pub frame:        u64,
  pub completed:    bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub winning_team: Option<TeamId>,
  pub rooms:        Vec<RoomState>,
  pub extraction:   Vec<ExtractionState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CombatEvent {
  Attack {
    attacker: PlayerId,
    target:   String,
    damage:   i32,
    crit:     bool,
  },
  AbilityUsed {
    player:  PlayerId,
    ability: AbilityKind,
  },
  PlayerDeath {
    victim: PlayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    killer: Option<String>,
  },
  MobDeath {
    mob:    MobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    killer: Option<PlayerId>,
  },
  BossPhase {
    mob:   MobId,
    phase: String,
  },
  PvpEncounter {
    room_id: RoomId,
  },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LootView {
  pub loot_id:  LootId,
  pub name:     String,
  pub rarity:   u8,
  pub position: Vec2,
  pub room_id:  RoomId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LootUpdate {
  Spawned { item: LootView },
  PickedUp { loot_id: LootId, by: PlayerId },
  Removed { loot_id: LootId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Packet {
  Connected {
    player_id:     PlayerId,
    session_token: SessionToken,
    lobby_id:      LobbyId,
  },
  ReconnectResponse {
    success:    bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    world_id:   Option<WorldId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error:      Option<String>,
    message_id: MessageId,
  },
  HeartbeatAck,
  Error {
    code:    String,
    message: String,
  },
  PlayerJoined {
    player_id: PlayerId,
    name:      String,
    team_id:   TeamId,
  },
  PlayerDisconnected {
    player_id:     PlayerId,
    can_reconnect: bool,
  },
  PlayerReconnected {
    player_id: PlayerId,
  },
  LobbyUpdate {
    lobby_id: LobbyId,
    status:   LobbyStatus,
    players:  Vec<LobbyPlayer>,
  },
  GameStarted {
    world_id:   WorldId,
    spawn:      Vec2,
    message_id: MessageId,
  },
  WorldStateEssential(Arc<WorldEssential>),
  PlayerStatesBatch(Arc<PlayerBatch>),
  MobUpdatesChunk(Arc<MobChunk>),
  CombatEvents {
    world_id: WorldId,
    events:   Vec<CombatEvent>,
  },
  LootUpdates {
    world_id: WorldId,
    updates:  Vec<LootUpdate>,
  },
  ChatReceived {
    from:      PlayerId,
    from_name: String,
    message:   String,
    chat_type: ChatScope,
  },
  AdminMessage {
    message: String,
  },
  Pong {
    client_data:    String,
    server_time_ms: i64,
  },
  FrameUpdate {
    world_id: WorldId,
    frame:    u64,
  },
}

impl Packet {
  pub fn tag(&self) -> &'static str {
    match self {
      Self::Connected { .. } => "connected",
      Self::ReconnectResponse { .. } => "reconnect_response",
      Self::HeartbeatAck => "heartbeat_ack",
      Self::Error { .. } => "error",
      Self::PlayerJoined { .. } => "player_joined",
      Self::PlayerDisconnected { .. } => "player_disconnected",
      Self::PlayerReconnected { .. } => "player_reconnected",
      Self::LobbyUpdate { .. } => "lobby_update",
      Self::GameStarted { .. } => "game_started",
      Self::WorldStateEssential(_) => "world_state_essential",
      Self::PlayerStatesBatch(_) => "player_states_batch",
      Self::MobUpdatesChunk(_) => "mob_updates_chunk",
      Self::CombatEvents { .. } => "combat_events",
      Self::LootUpdates { .. } => "loot_updates",
      Self::ChatReceived { .. } => "chat_received",
      Self::AdminMessage { .. } => "admin_message",
      Self::Pong { .. } => "pong",
      Self::FrameUpdate { .. } => "frame_update",
    }
  }
}
