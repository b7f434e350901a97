//! Camera and view frustum.
//!
//! The world is Z-up. The camera is a plain look-at description; the renderer
//! reads its eye and target for cube-map reflections and the scene graph reads
//! its frustum for culling.

use cgmath::{Deg, EuclideanSpace, InnerSpace, Matrix4, Point3, Vector3, Vector4};

use crate::math::BoundingSphere;

#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    pub eye: Point3<f32>,
    pub target: Point3<f32>,
    pub up: Vector3<f32>,
    pub fovy: Deg<f32>,
    pub aspect: f32,
    pub znear: f32,
    pub zfar: f32,
}

impl Camera {
    pub fn new(eye: Point3<f32>, target: Point3<f32>, aspect: f32) -> Self {
        Self {
            eye,
            target,
            up: Vector3::unit_z(),
            fovy: Deg(60.0),
            aspect,
            znear: 0.1,
            zfar: 1000.0,
        }
    }

    pub fn view(&self) -> Matrix4<f32> {
        Matrix4::look_at_rh(self.eye, self.target, self.up)
    }

    pub fn projection(&self) -> Matrix4<f32> {
        cgmath::perspective(self.fovy, self.aspect, self.znear, self.zfar)
    }

    pub fn view_projection(&self) -> Matrix4<f32> {
        self.projection() * self.view()
    }

    /// View matrix with the translation removed, for camera-centred geometry.
    pub fn rotation_only_view(&self) -> Matrix4<f32> {
        let direction = self.target - self.eye;
        Matrix4::look_to_rh(Point3::origin(), direction, self.up)
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_matrix(&self.view_projection())
    }

    pub fn distance_to(&self, point: Point3<f32>) -> f32 {
        (point - self.eye).magnitude()
    }

    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Point3::new(0.0, -10.0, 2.0), Point3::origin(), 16.0 / 9.0)
    }
}

/// Six planes `(normal, d)` with normals pointing inwards.
#[derive(Clone, Debug, PartialEq)]
pub struct Frustum {
    planes: [Vector4<f32>; 6],
}

impl Frustum {
    /// Extracts the planes from a combined view-projection matrix.
    pub fn from_matrix(m: &Matrix4<f32>) -> Self {
        let row = |i: usize| Vector4::new(m.x[i], m.y[i], m.z[i], m.w[i]);
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));
        let planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r3 + r2, r3 - r2].map(|plane| {
            let length = plane.truncate().magnitude();
            if length > 0.0 { plane / length } else { plane }
        });
        Self { planes }
    }

    pub fn intersects_sphere(&self, sphere: &BoundingSphere) -> bool {
        let center = sphere.center.to_vec();
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(center) + plane.w >= -sphere.radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frustum_keeps_what_is_in_front() {
        let camera = Camera::new(Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 0.0, 0.0), 1.0);
        let frustum = camera.frustum();
        let sphere = |x, y| BoundingSphere::new(Point3::new(x, y, 0.0), 1.0);
        assert!(frustum.intersects_sphere(&sphere(20.0, 0.0)));
        assert!(!frustum.intersects_sphere(&sphere(-20.0, 0.0)));
        assert!(!frustum.intersects_sphere(&sphere(5000.0, 0.0)));
        // straddles the left plane
        assert!(frustum.intersects_sphere(&sphere(10.0, 6.5)));
    }
}
