//! Small geometry helpers shared by the renderer and the scene graph.

use cgmath::{Deg, EuclideanSpace, InnerSpace, Matrix4, Point3, Vector2};

/// Angle of the line from `from` to `to`, measured counter-clockwise from the
/// positive x axis, in `[0, 360)` degrees.
pub fn angle_between_points(from: Vector2<f32>, to: Vector2<f32>) -> Deg<f32> {
    let delta = to - from;
    let degrees = delta.y.atan2(delta.x).to_degrees();
    if degrees < 0.0 {
        Deg(degrees + 360.0)
    } else {
        Deg(degrees)
    }
}

/// Texture matrix used by cube-reflection layers.
///
/// Rotates generated reflection vectors back by the camera's yaw (eye to target
/// in the xy plane) and pitch (eye to target in the yz plane), so the
/// environment stays fixed in world space while the camera turns.
pub fn reflection_matrix(eye: Point3<f32>, target: Point3<f32>) -> Matrix4<f32> {
    let yaw = angle_between_points(Vector2::new(eye.x, eye.y), Vector2::new(target.x, target.y));
    let pitch = angle_between_points(Vector2::new(eye.y, eye.z), Vector2::new(target.y, target.z));
    Matrix4::from_angle_z(-yaw) * Matrix4::from_angle_x(-pitch)
}

/// Sphere used for culling and level-of-detail distances.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingSphere {
    pub center: Point3<f32>,
    pub radius: f32,
}

impl BoundingSphere {
    pub fn new(center: Point3<f32>, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Smallest sphere enclosing both `self` and `other`.
    pub fn merge(&self, other: &BoundingSphere) -> BoundingSphere {
        let offset = other.center - self.center;
        let distance = offset.magnitude();
        if distance + other.radius <= self.radius {
            return *self;
        }
        if distance + self.radius <= other.radius {
            return *other;
        }
        let radius = (distance + self.radius + other.radius) * 0.5;
        // distance > 0 here, otherwise one sphere would contain the other
        let center = self.center + offset.normalize() * (radius - self.radius);
        BoundingSphere { center, radius }
    }

    pub fn distance_to(&self, point: Point3<f32>) -> f32 {
        (self.center.to_vec() - point.to_vec()).magnitude()
    }
}

impl Default for BoundingSphere {
    fn default() -> Self {
        Self::new(Point3::origin(), 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{SquareMatrix, Transform};

    #[test]
    fn angles_cover_all_quadrants() {
        let o = Vector2::new(0.0, 0.0);
        assert!((angle_between_points(o, Vector2::new(1.0, 0.0)).0 - 0.0).abs() < 1e-4);
        assert!((angle_between_points(o, Vector2::new(0.0, 1.0)).0 - 90.0).abs() < 1e-4);
        assert!((angle_between_points(o, Vector2::new(-1.0, 0.0)).0 - 180.0).abs() < 1e-4);
        assert!((angle_between_points(o, Vector2::new(0.0, -1.0)).0 - 270.0).abs() < 1e-4);
    }

    #[test]
    fn reflection_looking_down_x_is_identity() {
        let m = reflection_matrix(Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 0.0, 0.0));
        let p = m.transform_point(Point3::new(1.0, 2.0, 3.0));
        assert!((p - Point3::new(1.0, 2.0, 3.0)).magnitude() < 1e-4);
        assert!(m.is_invertible());
    }

    #[test]
    fn merge_encloses_both() {
        let a = BoundingSphere::new(Point3::new(0.0, 0.0, 0.0), 1.0);
        let b = BoundingSphere::new(Point3::new(4.0, 0.0, 0.0), 1.0);
        let m = a.merge(&b);
        assert!((m.radius - 3.0).abs() < 1e-5);
        assert!((m.center.x - 2.0).abs() < 1e-5);

        let inner = BoundingSphere::new(Point3::new(0.5, 0.0, 0.0), 0.2);
        assert_eq!(a.merge(&inner), a);
    }
}
