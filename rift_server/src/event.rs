//! World events. Everything observable that happens inside a tick is pushed
//! onto the world's event list, in generation order. After the tick barrier
//! the engine reads them for cross-manager consequences (extraction
//! completion, deaths) and the snapshot builder turns them into clientbound
//! packets.

use crate::error::GameError;
use rift_common::{
  net::sb::AbilityKind,
  util::{ExtractionId, LootId, MobId, PlayerId, RoomId, TeamId},
};
use std::fmt;

/// Something that dealt damage. Used for killer attribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Damager {
  Player(PlayerId),
  Mob(MobId),
}

impl fmt::Display for Damager {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Self::Player(id) => write!(f, "{id}"),
      Self::Mob(id) => write!(f, "{id}"),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BossPhase {
  Summon,
  Enrage,
}

impl BossPhase {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Summon => "summon",
      Self::Enrage => "enrage",
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
  RoomChanged {
    player: PlayerId,
    from:   RoomId,
    to:     RoomId,
  },
  /// A room holds live players from two or more teams.
  PvpEncounter {
    room: RoomId,
  },
  Attack {
    attacker: PlayerId,
    target:   Damager,
    damage:   i32,
    crit:     bool,
  },
  AbilityUsed {
    player:  PlayerId,
    ability: AbilityKind,
  },
  PlayerDeath {
    victim: PlayerId,
    killer: Option<Damager>,
  },
  MobDeath {
    mob:    MobId,
    killer: Option<PlayerId>,
  },
  BossPhaseChange {
    mob:   MobId,
    phase: BossPhase,
  },
  RoomCompleted {
    room: RoomId,
    team: TeamId,
  },
  WorldCompleted {
    winning_team: Option<TeamId>,
  },
  ExtractionStarted {
    player: PlayerId,
    point:  ExtractionId,
  },
  ExtractionCancelled {
    player: PlayerId,
    point:  ExtractionId,
  },
  /// The player left the world. The engine destroys their session and index
  /// entry when it sees this; the removal from the world map itself happens
  /// at the end of the tick that generated this.
  ExtractionCompleted {
    player:   PlayerId,
    point:    ExtractionId,
    bonus_xp: i64,
  },
  LootSpawned {
    loot:   LootId,
    name:   String,
    rarity: u8,
    room:   RoomId,
    position: rift_common::math::Vec2,
  },
  LootPickedUp {
    loot: LootId,
    by:   PlayerId,
  },
  LootRemoved {
    loot: LootId,
  },
  ItemUsed {
    player: PlayerId,
    item:   LootId,
  },
  LevelUp {
    player: PlayerId,
    level:  u32,
  },
  /// A typed gameplay denial, routed back to only the player that asked.
  Denied {
    player: PlayerId,
    error:  GameError,
  },
}
