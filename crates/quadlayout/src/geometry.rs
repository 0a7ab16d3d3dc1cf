//! 2D vector and axis-aligned rectangle types.

use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// A 2D vector used for positions, velocities and forces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    pub fn distance(self, other: Vec2) -> f32 {
        (other - self).length()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Scale the vector down so its length does not exceed `max`.
    pub fn clamp_length(self, max: f32) -> Self {
        let len_sq = self.length_squared();
        if len_sq > max * max && len_sq > 0.0 {
            self * (max / len_sq.sqrt())
        } else {
            self
        }
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Vec2) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for Vec2 {
    fn sub_assign(&mut self, rhs: Vec2) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl Div<f32> for Vec2 {
    type Output = Vec2;
    fn div(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x / rhs, self.y / rhs)
    }
}

impl Neg for Vec2 {
    type Output = Vec2;
    fn neg(self) -> Vec2 {
        Vec2::new(-self.x, -self.y)
    }
}

/// An axis-aligned rectangle, half-open on its upper bounds.
///
/// `contains` includes `min` and excludes `max`, so adjacent quad-tree cells
/// never both claim a point lying on their shared edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Square of edge `extent` centered on the origin.
    pub fn centered_square(extent: f32) -> Self {
        let half = extent / 2.0;
        Self::new(Vec2::new(-half, -half), Vec2::new(half, half))
    }

    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(
            (self.min.x + self.max.x) * 0.5,
            (self.min.y + self.max.y) * 0.5,
        )
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.x < self.max.x && p.y >= self.min.y && p.y < self.max.y
    }

    /// Closed-interval overlap test (touching edges count).
    pub fn intersects(&self, other: &Rect) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }

    /// Grow the rectangle by `amount` on every side.
    pub fn inflate(&self, amount: f32) -> Rect {
        Rect::new(
            Vec2::new(self.min.x - amount, self.min.y - amount),
            Vec2::new(self.max.x + amount, self.max.y + amount),
        )
    }

    /// Clamp a point into the half-open rectangle.
    pub fn clamp(&self, p: Vec2) -> Vec2 {
        let max_x = prev_float(self.max.x).max(self.min.x);
        let max_y = prev_float(self.max.y).max(self.min.y);
        Vec2::new(p.x.clamp(self.min.x, max_x), p.y.clamp(self.min.y, max_y))
    }
}

/// Largest float strictly below `v` (for finite, non-zero-crossing values this
/// is one ulp down).
fn prev_float(v: f32) -> f32 {
    if !v.is_finite() {
        return v;
    }
    if v == 0.0 {
        return -f32::from_bits(1);
    }
    let bits = v.to_bits();
    if v > 0.0 {
        f32::from_bits(bits - 1)
    } else {
        f32::from_bits(bits + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_contains_half_open() {
        let r = Rect::centered_square(2.0);
        assert!(r.contains(Vec2::new(-1.0, -1.0)));
        assert!(r.contains(Vec2::ZERO));
        assert!(!r.contains(Vec2::new(1.0, 0.0)));
        assert!(!r.contains(Vec2::new(0.0, 1.0)));
    }

    #[test]
    fn test_clamp_stays_inside() {
        let r = Rect::centered_square(10.0);
        let p = r.clamp(Vec2::new(100.0, -100.0));
        assert!(r.contains(p));
        assert_eq!(p.y, -5.0);
    }

    #[test]
    fn test_intersects_and_inflate() {
        let a = Rect::new(Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0));
        let b = Rect::new(Vec2::new(2.0, 2.0), Vec2::new(3.0, 3.0));
        assert!(!a.intersects(&b));
        assert!(a.inflate(1.0).intersects(&b));
    }

    #[test]
    fn test_clamp_length() {
        let v = Vec2::new(3.0, 4.0).clamp_length(1.0);
        assert!((v.length() - 1.0).abs() < 1e-5);
        assert_eq!(Vec2::new(0.3, 0.4).clamp_length(1.0), Vec2::new(0.3, 0.4));
    }
}
