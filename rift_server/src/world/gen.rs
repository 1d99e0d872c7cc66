//! World generation: the room grid, extraction points, team spawns, and the
//! position to room mapping used all over the simulation.

use super::{ExtractionPoint, Room};
use crate::config::WorldGenConfig;
use rift_common::{
  math::{GridPos, Vec2},
  util::{ExtractionId, RoomId, TeamId},
};
use std::collections::HashMap;

/// The immutable geometry of a world: grid dimensions and spacing. Built
/// once at generation and used to answer "which room is this position in".
#[derive(Debug, Clone, PartialEq)]
pub struct RoomLayout {
  pub nx:          u32,
  pub ny:          u32,
  pub spacing:     f64,
  pub room_size:   f64,
  pub half_extent: f64,
}

impl RoomLayout {
  pub fn from_config(cfg: &WorldGenConfig) -> Self {
    RoomLayout {
      nx:          cfg.x.max(1),
      ny:          cfg.y.max(1),
      spacing:     cfg.spacing,
      room_size:   cfg.room_size,
      half_extent: cfg.half_extent,
    }
  }

  /// Center of the room at the given grid coordinates. The grid is centered
  /// on the origin.
  pub fn room_center(&self, grid: GridPos) -> Vec2 {
    let ox = (f64::from(self.nx) - 1.0) / 2.0;
    let oy = (f64::from(self.ny) - 1.0) / 2.0;
    Vec2::new(
      (f64::from(grid.x) - ox) * self.spacing,
      (f64::from(grid.y) - oy) * self.spacing,
    )
  }

  /// The grid cell containing `pos`. The grid tiles the whole plane, so
  /// every position maps to some room; positions beyond the outer rooms
  /// clamp to the edge.
  pub fn grid_at(&self, pos: Vec2) -> GridPos {
    let ox = (f64::from(self.nx) - 1.0) / 2.0;
    let oy = (f64::from(self.ny) - 1.0) / 2.0;
    let gx = (pos.x / self.spacing + ox).round();
    let gy = (pos.y / self.spacing + oy).round();
    GridPos::new(
      (gx.max(0.0) as u32).min(self.nx - 1),
      (gy.max(0.0) as u32).min(self.ny - 1),
    )
  }

  pub fn room_id(grid: GridPos) -> RoomId { RoomId::new(format!("room_{}_{}", grid.x, grid.y)) }

  pub fn room_at(&self, pos: Vec2) -> RoomId { Self::room_id(self.grid_at(pos)) }

  /// The four corner grid cells, in a stable order.
  pub fn corners(&self) -> [GridPos; 4] {
    [
      GridPos::new(0, 0),
      GridPos::new(self.nx - 1, 0),
      GridPos::new(0, self.ny - 1),
      GridPos::new(self.nx - 1, self.ny - 1),
    ]
  }

  /// Where a team spawns. Teams begin in distinct corners, offset a little
  /// toward the center so two spawns in the same room don't overlap the
  /// extraction point.
  pub fn team_spawn(&self, team_index: usize) -> Vec2 {
    let corner = self.corners()[team_index % 4];
    let center = self.room_center(corner);
    let toward_origin = (Vec2::zero() - center).normalized() * (self.room_size * 0.2);
    center + toward_origin
  }
}

/// Generates the full room map. Rooms are connected to their orthogonal
/// neighbors.
pub fn rooms(layout: &RoomLayout) -> HashMap<RoomId, Room> {
  let mut out = HashMap::new();
  for x in 0..layout.nx {
    for y in 0..layout.ny {
      let grid = GridPos::new(x, y);
      let id = RoomLayout::room_id(grid);
      let mut connections = vec![];
      if x > 0 {
        connections.push(RoomLayout::room_id(GridPos::new(x - 1, y)));
      }
      if x + 1 < layout.nx {
        connections.push(RoomLayout::room_id(GridPos::new(x + 1, y)));
      }
      if y > 0 {
        connections.push(RoomLayout::room_id(GridPos::new(x, y - 1)));
      }
      if y + 1 < layout.ny {
        connections.push(RoomLayout::room_id(GridPos::new(x, y + 1)));
      }
      out.insert(id.clone(), Room {
        id,
        grid,
        center: layout.room_center(grid),
        size: layout.room_size,
        connections,
        completed: false,
        completing_team: None,
      });
    }
  }
  out
}

/// Places the four extraction points, one per corner room, at the room
/// center. Points start inactive; world completion activates them.
pub fn extraction_points(
  layout: &RoomLayout,
  duration_s: f64,
) -> HashMap<ExtractionId, ExtractionPoint> {
  let mut out = HashMap::new();
  for (i, corner) in layout.corners().into_iter().enumerate() {
    let id = ExtractionId::new(format!("extract_{i}"));
    out.insert(id.clone(), ExtractionPoint {
      id,
      position: layout.room_center(corner),
      room_id: RoomLayout::room_id(corner),
      active: false,
      duration_s,
      extracting: HashMap::new(),
    });
  }
  out
}

/// Stable index for a team within a world, used to assign spawn corners.
pub fn team_index(teams: &[TeamId], team: &TeamId) -> usize {
  teams.iter().position(|t| t == team).unwrap_or(0)
}
