//! The error taxonomy. Validation and rate errors are surfaced to the
//! originating client and never mutate game state. Gameplay errors come back
//! through the typed result of the input that caused them. Internal errors
//! are logged and swallowed at the world boundary.

use rift_common::net::cb;
use thiserror::Error;

/// Errors from connect validation. These never create a player.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
  #[error("player name must be 3 to 20 characters")]
  InvalidName,
  #[error("unknown player class")]
  InvalidClass,
  #[error("team id must begin with \"team\"")]
  InvalidTeam,
  #[error("a live player already has this name")]
  NameInUse,
  #[error("this client is already connected")]
  AlreadyConnected,
}

impl JoinError {
  pub fn code(&self) -> &'static str {
    match self {
      Self::InvalidName => "invalid_name",
      Self::InvalidClass => "invalid_class",
      Self::InvalidTeam => "invalid_team",
      Self::NameInUse => "name_in_use",
      Self::AlreadyConnected => "already_connected",
    }
  }
}

/// Errors from in-game inputs. Surfaced through the typed result of the
/// input, not a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
  #[error("target out of range")]
  OutOfRange,
  #[error("inventory is full")]
  InventoryFull,
  #[error("player is not alive")]
  NotAlive,
  #[error("ability is on cooldown")]
  CooldownActive,
  #[error("not enough mana")]
  InsufficientMana,
  #[error("not in the same room")]
  NotInSameRoom,
  #[error("no such item")]
  NotFound,
  #[error("item cannot be used right now")]
  LockedTarget,
}

impl GameError {
  pub fn code(&self) -> &'static str {
    match self {
      Self::OutOfRange => "out_of_range",
      Self::InventoryFull => "inventory_full",
      Self::NotAlive => "not_alive",
      Self::CooldownActive => "cooldown_active",
      Self::InsufficientMana => "insufficient_mana",
      Self::NotInSameRoom => "not_in_same_room",
      Self::NotFound => "not_found",
      Self::LockedTarget => "locked_target",
    }
  }
}

/// Errors from a reconnect attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconnectError {
  #[error("session has expired")]
  SessionExpired,
  #[error("no such session")]
  SessionNotFound,
  #[error("player name does not match the session")]
  NameMismatch,
  #[error("the world this session belonged to is gone")]
  WorldGone,
}

impl ReconnectError {
  pub fn code(&self) -> &'static str {
    match self {
      Self::SessionExpired => "session_expired",
      Self::SessionNotFound => "session_not_found",
      Self::NameMismatch => "name_mismatch",
      Self::WorldGone => "world_gone",
    }
  }
}

/// Errors surfaced at the transport edge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EdgeError {
  #[error("message too large")]
  MessageTooLarge,
  #[error("rate limited: {0}")]
  RateLimited(&'static str),
  #[error("unknown message type")]
  UnknownType,
  #[error("internal error")]
  Internal,
}

impl EdgeError {
  pub fn code(&self) -> &'static str {
    match self {
      Self::MessageTooLarge => "message_too_large",
      Self::RateLimited(_) => "rate_limited",
      Self::UnknownType => "unknown_type",
      Self::Internal => "internal",
    }
  }
}

/// Builds the clientbound `error` packet for any error in the taxonomy.
/// Internal errors carry no detail beyond the code.
pub fn to_packet(code: &'static str, message: impl std::fmt::Display) -> cb::Packet {
  if code == "internal" {
    cb::Packet::Error { code: code.into(), message: String::new() }
  } else {
    cb::Packet::Error { code: code.into(), message: message.to_string() }
  }
}
