//! A uniform grid over the playfield for proximity queries. Cells are 32
//! units on a side. The index is rebuilt at the start of every tick from the
//! authoritative player and mob maps; at the scale of one world (a handful
//! of players, a few dozen mobs) a rebuild is cheaper than keeping the index
//! incrementally correct through every move.

use rift_common::{
  math::Vec2,
  util::{MobId, PlayerId},
};
use std::collections::HashMap;

pub const CELL_SIZE: f64 = 32.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
  Player(PlayerId),
  Mob(MobId),
}

#[derive(Debug, Clone)]
struct Entry {
  body: Body,
  pos:  Vec2,
}

#[derive(Debug, Default)]
pub struct SpatialIndex {
  cells: HashMap<(i32, i32), Vec<Entry>>,
}

fn cell_of(pos: Vec2) -> (i32, i32) {
  ((pos.x / CELL_SIZE).floor() as i32, (pos.y / CELL_SIZE).floor() as i32)
}

impl SpatialIndex {
  pub fn new() -> Self { SpatialIndex::default() }

  pub fn clear(&mut self) {
    for v in self.cells.values_mut() {
      v.clear();
    }
  }

  pub fn insert(&mut self, body: Body, pos: Vec2) {
    self.cells.entry(cell_of(pos)).or_default().push(Entry { body, pos });
  }

  /// All bodies within `radius` of `center`, excluding `center` itself at
  /// zero distance only if the caller filters. Scans just the cells the
  /// radius can touch.
  pub fn query(&self, center: Vec2, radius: f64) -> Vec<(Body, Vec2)> {
    let r = radius.max(0.0);
    let min = cell_of(center - Vec2::new(r, r));
    let max = cell_of(center + Vec2::new(r, r));
    let mut out = vec![];
    for cx in min.0..=max.0 {
      for cy in min.1..=max.1 {
        let Some(entries) = self.cells.get(&(cx, cy)) else { continue };
        for e in entries {
          if e.pos.dist(center) <= r {
            out.push((e.body.clone(), e.pos));
          }
        }
      }
    }
    out
  }

  /// Players within `radius` of `center`.
  pub fn players_near(&self, center: Vec2, radius: f64) -> Vec<(PlayerId, Vec2)> {
    self
      .query(center, radius)
      .into_iter()
      .filter_map(|(b, pos)| match b {
        Body::Player(id) => Some((id, pos)),
        Body::Mob(_) => None,
      })
      .collect()
  }

  /// Mobs within `radius` of `center`.
  pub fn mobs_near(&self, center: Vec2, radius: f64) -> Vec<(MobId, Vec2)> {
    self
      .query(center, radius)
      .into_iter()
      .filter_map(|(b, pos)| match b {
        Body::Mob(id) => Some((id, pos)),
        Body::Player(_) => None,
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn query_respects_radius() {
    let mut idx = SpatialIndex::new();
    idx.insert(Body::Player(PlayerId::new("a")), Vec2::new(0.0, 0.0));
    idx.insert(Body::Player(PlayerId::new("b")), Vec2::new(3.0, 0.0));
    idx.insert(Body::Player(PlayerId::new("c")), Vec2::new(100.0, 0.0));
    let near = idx.players_near(Vec2::zero(), 5.0);
    let mut ids: Vec<String> = near.iter().map(|(id, _)| id.to_string()).collect();
    ids.sort();
    assert_eq!(ids, vec!["a", "b"]);
  }

  #[test]
  fn query_crosses_cell_borders() {
    let mut idx = SpatialIndex::new();
    // Either side of the x = 0 cell border, and either side of x = 32.
    idx.insert(Body::Mob(MobId::new("m1")), Vec2::new(-0.5, 0.0));
    idx.insert(Body::Mob(MobId::new("m2")), Vec2::new(31.9, 0.0));
    idx.insert(Body::Mob(MobId::new("m3")), Vec2::new(32.1, 0.0));
    assert_eq!(idx.mobs_near(Vec2::new(0.5, 0.0), 2.0).len(), 1);
    assert_eq!(idx.mobs_near(Vec2::new(32.0, 0.0), 1.0).len(), 2);
  }

  #[test]
  fn negative_coordinates() {
    let mut idx = SpatialIndex::new();
    idx.insert(Body::Player(PlayerId::new("a")), Vec2::new(-200.0, -200.0));
    assert_eq!(idx.players_near(Vec2::new(-199.0, -200.0), 2.0).len(), 1);
    assert_eq!(idx.players_near(Vec2::new(-150.0, -200.0), 2.0).len(), 0);
  }
}
