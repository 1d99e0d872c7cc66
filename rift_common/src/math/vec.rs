use serde::{Deserialize, Serialize};
use std::{
  fmt,
  ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign},
};

/// A position or direction on the playfield. The plane is bounded, so all
/// simulation positions stay within the configured half extent. This is not
/// enforced here; the movement code clamps after integrating.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
  pub x: f64,
  pub y: f64,
}

impl fmt::Display for Vec2 {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "({} {})", self.x, self.y) }
}

impl Default for Vec2 {
  fn default() -> Vec2 { Vec2::new(0.0, 0.0) }
}

impl Vec2 {
  #[inline(always)]
  pub fn new(x: f64, y: f64) -> Self { Vec2 { x, y } }

  #[inline(always)]
  pub fn zero() -> Self { Vec2 { x: 0.0, y: 0.0 } }

  /// Returns the length of this vector, squared.
  pub fn len_squared(&self) -> f64 { self.x.powi(2) + self.y.powi(2) }

  /// Returns the length of this vector. If possible, prefer
  /// [`len_squared`](Self::len_squared).
  pub fn len(&self) -> f64 { self.len_squared().sqrt() }

  /// Returns the distance between `self` and `other`.
  pub fn dist(&self, other: Vec2) -> f64 { (*self - other).len() }

  /// Returns the distance between `self` and `other`, squared.
  pub fn dist_squared(&self, other: Vec2) -> f64 { (*self - other).len_squared() }

  pub fn dot(&self, other: Vec2) -> f64 { self.x * other.x + self.y * other.y }

  /// Returns this vector scaled to length 1. The zero vector is returned
  /// unchanged, so callers don't need to special case it.
  pub fn normalized(&self) -> Vec2 {
    let len = self.len();
    if len < 1e-9 {
      Vec2::zero()
    } else {
      *self / len
    }
  }

  /// Returns this vector clamped to the given length. Shorter vectors are
  /// returned unchanged.
  #[must_use = "clamped returns a modified version of self"]
  pub fn clamped(&self, max_len: f64) -> Vec2 {
    let len = self.len();
    if len > max_len {
      *self * (max_len / len)
    } else {
      *self
    }
  }

  /// Returns the angle of this vector in radians, in `-PI..=PI`.
  pub fn angle(&self) -> f64 { self.y.atan2(self.x) }

  /// Returns a unit vector for the given angle in radians.
  pub fn from_angle(angle: f64) -> Vec2 { Vec2 { x: angle.cos(), y: angle.sin() } }

  /// Returns self, with both components clamped to `-extent..=extent`.
  #[must_use = "clamped_to_plane returns a modified version of self"]
  pub fn clamped_to_plane(&self, extent: f64) -> Vec2 {
    Vec2 { x: self.x.clamp(-extent, extent), y: self.y.clamp(-extent, extent) }
  }
}

impl Add for Vec2 {
  type Output = Vec2;

  fn add(self, other: Vec2) -> Vec2 { Vec2 { x: self.x + other.x, y: self.y + other.y } }
}
impl Sub for Vec2 {
  type Output = Vec2;

  fn sub(self, other: Vec2) -> Vec2 { Vec2 { x: self.x - other.x, y: self.y - other.y } }
}
impl AddAssign for Vec2 {
  fn add_assign(&mut self, other: Vec2) {
    self.x += other.x;
    self.y += other.y;
  }
}
impl SubAssign for Vec2 {
  fn sub_assign(&mut self, other: Vec2) {
    self.x -= other.x;
    self.y -= other.y;
  }
}
impl Mul<f64> for Vec2 {
  type Output = Vec2;

  fn mul(self, fac: f64) -> Vec2 { Vec2 { x: self.x * fac, y: self.y * fac } }
}
impl Div<f64> for Vec2 {
  type Output = Vec2;

  fn div(self, fac: f64) -> Vec2 { Vec2 { x: self.x / fac, y: self.y / fac } }
}
impl Neg for Vec2 {
  type Output = Vec2;

  fn neg(self) -> Vec2 { Vec2 { x: -self.x, y: -self.y } }
}
