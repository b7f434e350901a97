//! Relative transforms of scene nodes.
//!
//! Position, rotation (as quaternion) and scale, composed parent-first with `*`.

use std::ops::Mul;

use cgmath::{InnerSpace, Matrix4, One, Quaternion, Vector3, VectorSpace};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vector3<f32>,
    pub rotation: Quaternion<f32>,
    pub scale: Vector3<f32>,
}

impl Transform {
    /// Identity transform (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            position: Vector3::new(0.0, 0.0, 0.0),
            rotation: Quaternion::one(),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }

    pub fn to_matrix(&self) -> Matrix4<f32> {
        Matrix4::from_translation(self.position)
            * Matrix4::from(self.rotation)
            * Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }

    /// Largest axis scale, used to grow bounding radii.
    pub fn max_scale(&self) -> f32 {
        self.scale.x.abs().max(self.scale.y.abs()).max(self.scale.z.abs())
    }

    /// Interpolates between two keyframes, `t` in `[0, 1]`.
    pub fn interpolate(&self, other: &Transform, t: f32) -> Transform {
        let rotation = if self.rotation.dot(other.rotation) < 0.0 {
            // take the short way around
            self.rotation.slerp(-other.rotation, t)
        } else {
            self.rotation.slerp(other.rotation, t)
        };
        Transform {
            position: self.position.lerp(other.position, t),
            rotation,
            scale: self.scale.lerp(other.scale, t),
        }
    }
}

impl<'a, 'b> Mul<&'b Transform> for &'a Transform {
    type Output = Transform;

    fn mul(self, rhs: &'b Transform) -> Self::Output {
        let scaled_rhs_pos = Vector3::new(
            self.scale.x * rhs.position.x,
            self.scale.y * rhs.position.y,
            self.scale.z * rhs.position.z,
        );
        Transform {
            position: self.position + (self.rotation * scaled_rhs_pos),
            rotation: self.rotation * rhs.rotation,
            scale: Vector3::new(
                self.scale.x * rhs.scale.x,
                self.scale.y * rhs.scale.y,
                self.scale.z * rhs.scale.z,
            ),
        }
    }
}

impl Mul<Transform> for Transform {
    type Output = Self;

    fn mul(self, rhs: Transform) -> Self::Output {
        &self * &rhs
    }
}

impl From<Vector3<f32>> for Transform {
    fn from(position: Vector3<f32>) -> Self {
        Transform {
            position,
            ..Default::default()
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{Deg, Point3, Rotation3, Transform as _};

    #[test]
    fn composition_matches_matrix_product() {
        let parent = Transform {
            position: Vector3::new(1.0, 2.0, 3.0),
            rotation: Quaternion::from_angle_z(Deg(90.0)),
            scale: Vector3::new(2.0, 2.0, 2.0),
        };
        let child = Transform::from(Vector3::new(1.0, 0.0, 0.0));
        let composed = (&parent * &child).to_matrix();
        let expected = parent.to_matrix() * child.to_matrix();
        let p = Point3::new(0.5, -0.5, 1.0);
        let a = composed.transform_point(p);
        let b = expected.transform_point(p);
        assert!((a - b).magnitude() < 1e-4);
    }

    #[test]
    fn interpolation_hits_endpoints() {
        let a = Transform::new();
        let b = Transform::from(Vector3::new(4.0, 0.0, 0.0));
        assert_eq!(a.interpolate(&b, 0.0).position, a.position);
        assert!((a.interpolate(&b, 0.5).position.x - 2.0).abs() < 1e-5);
    }
}
