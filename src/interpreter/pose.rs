//! Rigid-transform algebra: poses, composition, and inversion.
//!
//! A pose is three translation components plus three orientation components in
//! rotation-vector (axis-angle) form. Composition `a :: b` applies `b` in the
//! frame described by `a`; `~p` is the inverse transform, so `p :: ~p` is the
//! identity within numerical tolerance.

use serde::{Deserialize, Serialize};

/// A 3-component vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
    /// Z component.
    pub z: f64,
}

impl Vector3 {
    /// Build a vector from components.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    fn add(&self, other: &Vector3) -> Vector3 {
        Vector3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    fn scale(&self, factor: f64) -> Vector3 {
        Vector3::new(self.x * factor, self.y * factor, self.z * factor)
    }
}

/// A 6-degree-of-freedom rigid transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Translation.
    pub position: Vector3,
    /// Orientation as a rotation vector (axis scaled by angle in radians).
    pub orientation: Vector3,
}

impl Pose {
    /// The identity transform.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Build a pose from `[x, y, z, rx, ry, rz]`.
    pub fn from_components(c: [f64; 6]) -> Self {
        Self {
            position: Vector3::new(c[0], c[1], c[2]),
            orientation: Vector3::new(c[3], c[4], c[5]),
        }
    }

    /// Pose with the given position and zero orientation.
    pub fn from_position(position: Vector3) -> Self {
        Self {
            position,
            orientation: Vector3::default(),
        }
    }

    /// Flatten to `[x, y, z, rx, ry, rz]`.
    pub fn to_components(&self) -> [f64; 6] {
        [
            self.position.x,
            self.position.y,
            self.position.z,
            self.orientation.x,
            self.orientation.y,
            self.orientation.z,
        ]
    }

    /// Compose with `other` applied in this pose's frame (the `::` operator).
    pub fn compose(&self, other: &Pose) -> Pose {
        let qa = Quaternion::from_rotation_vector(&self.orientation);
        let qb = Quaternion::from_rotation_vector(&other.orientation);
        let position = self.position.add(&qa.rotate(&other.position));
        let orientation = qa.multiply(&qb).to_rotation_vector();
        Pose {
            position,
            orientation,
        }
    }

    /// The inverse transform (the `~` operator): `p.compose(&p.inverse())`
    /// is the identity within tolerance.
    pub fn inverse(&self) -> Pose {
        let q_inv = Quaternion::from_rotation_vector(&self.orientation).conjugate();
        let position = q_inv.rotate(&self.position).scale(-1.0);
        Pose {
            position,
            orientation: q_inv.to_rotation_vector(),
        }
    }

    /// Interpolate towards `other`: linear in position, spherical in
    /// orientation. `t` in `[0, 1]`.
    pub fn interpolate(&self, other: &Pose, t: f64) -> Pose {
        let position = self.position.add(&other.position.add(&self.position.scale(-1.0)).scale(t));
        let qa = Quaternion::from_rotation_vector(&self.orientation);
        let qb = Quaternion::from_rotation_vector(&other.orientation);
        // Relative rotation scaled by t, applied on top of the start.
        let relative = qa.conjugate().multiply(&qb).to_rotation_vector();
        let partial = Quaternion::from_rotation_vector(&relative.scale(t));
        Pose {
            position,
            orientation: qa.multiply(&partial).to_rotation_vector(),
        }
    }

    /// Component-wise approximate equality.
    pub fn approx_eq(&self, other: &Pose, tolerance: f64) -> bool {
        let a = self.to_components();
        let b = other.to_components();
        // Orientation comparison goes through quaternions so equivalent
        // rotation vectors (e.g. zero vs 2*pi about any axis) match.
        let pos_ok = a[..3]
            .iter()
            .zip(&b[..3])
            .all(|(x, y)| (x - y).abs() <= tolerance);
        let qa = Quaternion::from_rotation_vector(&self.orientation);
        let qb = Quaternion::from_rotation_vector(&other.orientation);
        let dot = (qa.w * qb.w + qa.x * qb.x + qa.y * qb.y + qa.z * qb.z).abs();
        pos_ok && (1.0 - dot) <= tolerance
    }
}

/// Unit quaternion used internally for orientation math.
#[derive(Debug, Clone, Copy)]
struct Quaternion {
    w: f64,
    x: f64,
    y: f64,
    z: f64,
}

// Below this angle the sin(a)/a terms switch to their Taylor expansion.
const SMALL_ANGLE: f64 = 1e-9;

impl Quaternion {
    fn from_rotation_vector(v: &Vector3) -> Self {
        let angle = v.norm();
        if angle < SMALL_ANGLE {
            return Self {
                w: 1.0,
                x: v.x / 2.0,
                y: v.y / 2.0,
                z: v.z / 2.0,
            };
        }
        let half = angle / 2.0;
        let k = half.sin() / angle;
        Self {
            w: half.cos(),
            x: v.x * k,
            y: v.y * k,
            z: v.z * k,
        }
    }

    fn to_rotation_vector(&self) -> Vector3 {
        // Normalize the sign so the encoded angle is in [0, pi].
        let (w, x, y, z) = if self.w < 0.0 {
            (-self.w, -self.x, -self.y, -self.z)
        } else {
            (self.w, self.x, self.y, self.z)
        };
        let sin_half = (x * x + y * y + z * z).sqrt();
        if sin_half < SMALL_ANGLE {
            return Vector3::new(x * 2.0, y * 2.0, z * 2.0);
        }
        let angle = 2.0 * sin_half.atan2(w);
        let k = angle / sin_half;
        Vector3::new(x * k, y * k, z * k)
    }

    fn multiply(&self, other: &Quaternion) -> Quaternion {
        Quaternion {
            w: self.w * other.w - self.x * other.x - self.y * other.y - self.z * other.z,
            x: self.w * other.x + self.x * other.w + self.y * other.z - self.z * other.y,
            y: self.w * other.y - self.x * other.z + self.y * other.w + self.z * other.x,
            z: self.w * other.z + self.x * other.y - self.y * other.x + self.z * other.w,
        }
    }

    fn conjugate(&self) -> Quaternion {
        Quaternion {
            w: self.w,
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }

    fn rotate(&self, v: &Vector3) -> Vector3 {
        let p = Quaternion {
            w: 0.0,
            x: v.x,
            y: v.y,
            z: v.z,
        };
        let rotated = self.multiply(&p).multiply(&self.conjugate());
        Vector3::new(rotated.x, rotated.y, rotated.z)
    }
}
