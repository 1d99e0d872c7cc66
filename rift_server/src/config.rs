//! The server config. One struct per config section, each with defaults that
//! match a sensible small deployment. Everything is loadable from a single
//! TOML file; a missing file means all defaults.

use serde::Deserialize;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  /// Only show info logs by default.
  pub log_level: String,

  /// Simulation tick rate, in ticks per second.
  pub target_fps: u32,

  /// The port the datagram transport binds. The transport is external to
  /// this crate; the value is passed through to it.
  pub udp_port: u16,

  /// Capacity used by the lobby and world managers.
  pub max_players_per_world: usize,

  pub lobby:            LobbyConfig,
  pub game_balance:     BalanceConfig,
  pub world_generation: WorldGenConfig,
  pub movement:         MovementConfig,
  pub loot:             LootConfig,
  pub ai:               AiConfig,
  pub session:          SessionConfig,
}

impl Default for Config {
  fn default() -> Self {
    Config {
      log_level:             "info".into(),
      target_fps:            60,
      udp_port:              7777,
      max_players_per_world: 8,
      lobby:                 LobbyConfig::default(),
      game_balance:          BalanceConfig::default(),
      world_generation:      WorldGenConfig::default(),
      movement:              MovementConfig::default(),
      loot:                  LootConfig::default(),
      ai:                    AiConfig::default(),
      session:               SessionConfig::default(),
    }
  }
}

impl Config {
  /// The tick interval in seconds.
  pub fn tick_interval(&self) -> f64 { 1.0 / self.target_fps as f64 }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LobbyConfig {
  /// A lobby will not start a game below this many players.
  pub min_players_to_start: usize,
  /// A lobby will not start a game below this many distinct teams.
  pub min_teams_to_start:   usize,
  /// Seconds of join silence before a quorate lobby starts.
  pub max_wait_s:           f64,
  /// Seconds after creation when a quorate lobby starts no matter what.
  pub absolute_max_wait_s:  f64,
  /// If set, players joining without a strong team preference are assigned
  /// to the smallest team.
  pub auto_balance_teams:   bool,
}

impl Default for LobbyConfig {
  fn default() -> Self {
    LobbyConfig {
      min_players_to_start: 2,
      min_teams_to_start:   2,
      max_wait_s:           10.0,
      absolute_max_wait_s:  60.0,
      auto_balance_teams:   false,
    }
  }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BalanceConfig {
  /// Largest number of players a single team may field in one world.
  pub max_team_size:           usize,
  /// Base attack range in units, before class modifiers.
  pub attack_range:            f64,
  /// Cooldown between basic attacks.
  pub attack_cooldown_ms:      u64,
  /// Health a fresh level 1 player spawns with.
  pub base_health:             i32,
  pub base_mana:               i32,
  /// Base damage of a basic attack, before stats and class modifiers.
  pub base_damage:             i32,
  pub max_inventory_size:      usize,
  /// Seconds a player must hold an extraction point to leave the world.
  pub extraction_time_seconds: f64,
  /// Seconds after taking damage that the damager still counts as the
  /// killer.
  pub killer_window_s:         f64,
}

impl Default for BalanceConfig {
  fn default() -> Self {
    BalanceConfig {
      max_team_size:           4,
      attack_range:            5.0,
      attack_cooldown_ms:      800,
      base_health:             100,
      base_mana:               50,
      base_damage:             10,
      max_inventory_size:      20,
      extraction_time_seconds: 30.0,
      killer_window_s:         5.0,
    }
  }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WorldGenConfig {
  /// Room grid width.
  pub x:                      u32,
  /// Room grid height.
  pub y:                      u32,
  /// Side length of a room, in units.
  pub room_size:              f64,
  /// Distance between room centers, in units. Larger than `room_size`, so
  /// there are corridors between rooms.
  pub spacing:                f64,
  /// Half extent of the bounded plane. Positions are clamped to this.
  pub half_extent:            f64,
  pub mobs_per_room:          usize,
  pub initial_loot_count:     usize,
  pub loot_respawn_interval_s: f64,
}

impl Default for WorldGenConfig {
  fn default() -> Self {
    WorldGenConfig {
      x:                       4,
      y:                       4,
      room_size:               50.0,
      spacing:                 60.0,
      half_extent:             240.0,
      mobs_per_room:           3,
      initial_loot_count:      12,
      loot_respawn_interval_s: 120.0,
    }
  }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MovementConfig {
  /// Base movement speed in units per second, before class modifiers.
  pub base_speed:                 f64,
  /// Speed multiplier while sprinting.
  pub sprint_mul:                 f64,
  pub player_collision_radius:    f64,
  pub mob_collision_radius:       f64,
  /// Move vectors longer than this are validation violations. Slightly over
  /// 1 is tolerated because clients compute the vector in floats.
  pub max_input_magnitude:        f64,
  /// Longest teleport (dash) a player may take in one step.
  pub teleport_max_distance:      f64,
  pub mana_cost_per_sprint_second: f64,
}

impl Default for MovementConfig {
  fn default() -> Self {
    MovementConfig {
      base_speed:                  5.0,
      sprint_mul:                  1.5,
      player_collision_radius:     0.8,
      mob_collision_radius:        1.0,
      max_input_magnitude:         1.1,
      teleport_max_distance:       15.0,
      mana_cost_per_sprint_second: 1.0,
    }
  }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LootConfig {
  /// Rooms above this many items evict their oldest loot.
  pub max_per_room:          usize,
  /// Items older than this are removed.
  pub expiration_minutes:    f64,
  /// Seconds between periodic loot respawns in live worlds.
  pub respawn_interval_s:    f64,
  /// How close a player must be to pick an item up.
  pub grab_range:            f64,
  pub global_drop_multiplier: f64,
  pub enable_dynamic_rarity: bool,
  pub luck_multiplier:       f64,
  /// Most items a single mob death may drop.
  pub max_drops_per_mob:     usize,
}

impl Default for LootConfig {
  fn default() -> Self {
    LootConfig {
      max_per_room:           10,
      expiration_minutes:     10.0,
      respawn_interval_s:     120.0,
      grab_range:             3.0,
      global_drop_multiplier: 1.0,
      enable_dynamic_rarity:  true,
      luck_multiplier:        1.0,
      max_drops_per_mob:      3,
    }
  }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AiConfig {
  pub global_aggression_mul:   f64,
  /// How often mob decisions run. Movement still integrates every tick.
  pub update_frequency_hz:     f64,
  pub max_mobs_per_room:       usize,
  /// Difficulty multiplier applied on top of age and level scaling.
  pub difficulty_scaling:      f64,
  pub enable_group_behavior:   bool,
  pub enable_dynamic_spawning: bool,
  pub dynamic_spawn_interval_s: f64,
  /// Cap on mobs added by dynamic spawning, over the initial population.
  pub max_dynamic_mobs:        usize,
  /// Mobs further than this from every live player are processed in the low
  /// priority bucket.
  pub optimization_distance:   f64,
  /// Chance that a non-boss spawn is promoted to the boss template.
  pub boss_spawn_chance:       f64,
  /// Radius of a roar. Allies inside it move to Alert and share the target.
  pub help_call_radius:        f64,
}

impl Default for AiConfig {
  fn default() -> Self {
    AiConfig {
      global_aggression_mul:    1.0,
      update_frequency_hz:      20.0,
      max_mobs_per_room:        5,
      difficulty_scaling:       1.0,
      enable_group_behavior:    true,
      enable_dynamic_spawning:  true,
      dynamic_spawn_interval_s: 60.0,
      max_dynamic_mobs:         40,
      optimization_distance:    50.0,
      boss_spawn_chance:        0.05,
      help_call_radius:         15.0,
    }
  }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
  /// Seconds a frozen session survives before it expires.
  pub token_ttl_s:      f64,
  /// Seconds of client silence before the player is removed and their
  /// session frozen.
  pub client_timeout_s: f64,
}

impl Default for SessionConfig {
  fn default() -> Self { SessionConfig { token_ttl_s: 300.0, client_timeout_s: 30.0 } }
}
