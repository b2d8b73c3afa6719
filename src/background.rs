//! The camera backdrop.
//!
//! A single quad kept in front of the camera at a fixed distance and scaled so
//! that it exactly covers the view frustum there. The scene is drawn over it
//! without depth testing against it, so it reads as infinitely far away.

use cgmath::{InnerSpace, Matrix3, Quaternion, Vector3};

use crate::{
    camera::{Camera, Projection},
    data_structures::{instance::Instance, model::Mesh},
    resources::primitives::backdrop_quad,
};

#[derive(Debug)]
pub struct Backdrop {
    mesh: Mesh,
    distance: f32,
    transform: Instance,
}

impl Backdrop {
    /// `distance` is clamped into the camera's depth range by [`Backdrop::fit`].
    pub fn new(distance: f32) -> Self {
        Self {
            mesh: backdrop_quad(),
            distance,
            transform: Instance::new(),
        }
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// World transform of the quad after the last [`Backdrop::fit`].
    pub fn transform(&self) -> &Instance {
        &self.transform
    }

    /// Place the quad on the view axis and stretch it to the frustum's cross
    /// section at that depth.
    pub fn fit(&mut self, camera: &Camera, projection: &Projection) {
        let distance = self.distance.min(projection.zfar() * 0.99);
        let forward = camera.forward();
        let height = 2.0 * distance * (projection.fovy().0 / 2.0).tan();
        let width = height * projection.aspect();

        let basis = Matrix3::from_cols(camera.right(), camera.true_up(), -forward);
        self.transform = Instance {
            position: camera.eye.to_homogeneous().truncate() + forward * distance,
            rotation: Quaternion::from(basis).normalize(),
            scale: Vector3::new(width, height, 1.0),
        };
    }
}

#[cfg(test)]
mod tests {
    use cgmath::{Deg, Vector4};

    use super::*;

    fn project(camera: &Camera, projection: &Projection, corner: [f32; 3], model: &Instance) -> [f32; 3] {
        let clip = projection.calc_matrix()
            * camera.calc_matrix()
            * model.to_matrix()
            * Vector4::new(corner[0], corner[1], corner[2], 1.0);
        [clip.x / clip.w, clip.y / clip.w, clip.z / clip.w]
    }

    #[test]
    fn quad_covers_the_viewport() {
        let camera = Camera::new((3.0, 2.0, 5.0), (0.0, 0.0, 0.0));
        let projection = Projection::new(1600, 900, Deg(75.0), 0.1, 1000.0);
        let mut backdrop = Backdrop::new(15.0);
        backdrop.fit(&camera, &projection);

        for (corner, expected) in [
            ([-0.5, -0.5, 0.0], [-1.0, -1.0]),
            ([0.5, -0.5, 0.0], [1.0, -1.0]),
            ([0.5, 0.5, 0.0], [1.0, 1.0]),
            ([-0.5, 0.5, 0.0], [-1.0, 1.0]),
        ] {
            let ndc = project(&camera, &projection, corner, backdrop.transform());
            assert!((ndc[0] - expected[0]).abs() < 1e-3, "{ndc:?} vs {expected:?}");
            assert!((ndc[1] - expected[1]).abs() < 1e-3, "{ndc:?} vs {expected:?}");
            assert!(ndc[2] > 0.0 && ndc[2] < 1.0);
        }
    }

    #[test]
    fn distance_stays_inside_the_far_plane() {
        let camera = Camera::new((0.0, 0.0, 5.0), (0.0, 0.0, 0.0));
        let projection = Projection::new(100, 100, Deg(60.0), 0.1, 10.0);
        let mut backdrop = Backdrop::new(50.0);
        backdrop.fit(&camera, &projection);
        let offset = backdrop.transform().position - Vector3::new(0.0, 0.0, 5.0);
        assert!(offset.magnitude() < 10.0);
    }
}
