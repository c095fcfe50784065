//! Small vector types matching the target's in-memory float layouts.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Two floats: view yaw (x) and pitch (y) in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
#[repr(C)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Bit-packed form used for lock-free storage.
    #[inline]
    pub fn to_bits(self) -> u64 {
        (u64::from(self.x.to_bits()) << 32) | u64::from(self.y.to_bits())
    }

    #[inline]
    pub fn from_bits(bits: u64) -> Self {
        Self {
            x: f32::from_bits((bits >> 32) as u32),
            y: f32::from_bits(bits as u32),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
#[repr(C)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);

    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Finite and not the all-zero "unset" value.
    #[inline]
    pub fn is_normal(self) -> bool {
        self.is_finite() && self != Vec3::ZERO
    }

    #[inline]
    pub fn distance(self, other: Self) -> f32 {
        self.distance_squared(other).sqrt()
    }

    #[inline]
    pub fn distance_squared(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    #[inline]
    pub fn add(self, other: Self) -> Self {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    #[inline]
    pub fn mul(self, other: Self) -> Self {
        Vec3::new(self.x * other.x, self.y * other.y, self.z * other.z)
    }
}

/// Unit quaternion (x, y, z, w).
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
#[repr(C)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Quat::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    /// Rotate `v` by this quaternion.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        // v' = v + 2w(q × v) + 2(q × (q × v))
        let q = Vec3::new(self.x, self.y, self.z);
        let t = cross(q, v);
        let t = Vec3::new(t.x * 2.0, t.y * 2.0, t.z * 2.0);
        let u = cross(q, t);
        Vec3::new(
            v.x + self.w * t.x + u.x,
            v.y + self.w * t.y + u.y,
            v.z + self.w * t.z + u.z,
        )
    }
}

#[inline]
fn cross(a: Vec3, b: Vec3) -> Vec3 {
    Vec3::new(
        a.y * b.z - a.z * b.y,
        a.z * b.x - a.x * b.z,
        a.x * b.y - a.y * b.x,
    )
}

/// Wrap an angle in degrees into `[0, 360)`.
#[inline]
pub fn normalize_angle(degrees: f32) -> f32 {
    let wrapped = degrees % 360.0;
    if wrapped < 0.0 { wrapped + 360.0 } else { wrapped }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        a.distance(b) < 1e-4
    }

    #[test]
    fn test_vec2_bits_roundtrip() {
        let v = Vec2::new(-123.5, 45.25);
        assert_eq!(Vec2::from_bits(v.to_bits()), v);
    }

    #[test]
    fn test_quat_identity() {
        let v = Vec3::new(1.0, 2.0, 3.0);
        assert!(approx(Quat::IDENTITY.rotate(v), v));
    }

    #[test]
    fn test_quat_rotate_90_about_y() {
        let half = std::f32::consts::FRAC_PI_4;
        let q = Quat {
            x: 0.0,
            y: half.sin(),
            z: 0.0,
            w: half.cos(),
        };
        let rotated = q.rotate(Vec3::new(1.0, 0.0, 0.0));
        assert!(approx(rotated, Vec3::new(0.0, 0.0, -1.0)));
    }

    #[test]
    fn test_normalize_angle() {
        assert_eq!(normalize_angle(-90.0), 270.0);
        assert_eq!(normalize_angle(360.0), 0.0);
        assert_eq!(normalize_angle(45.0), 45.0);
    }

    #[test]
    fn test_is_normal() {
        assert!(!Vec3::ZERO.is_normal());
        assert!(!Vec3::new(f32::NAN, 1.0, 1.0).is_normal());
        assert!(Vec3::new(0.0, 1.0, 0.0).is_normal());
    }
}
