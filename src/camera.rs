//! Camera, projection and the damped orbit controller.
//!
//! [`Camera`] is the view transform (eye looking at a target), [`Projection`]
//! is the perspective part whose aspect ratio follows the viewport. The
//! [`OrbitController`] turns pointer drags and wheel input into rotation, pan
//! and zoom around the camera target and keeps moving for a few frames after
//! the input stops (inertial damping).

use std::f32::consts::PI;

use cgmath::{EuclideanSpace, InnerSpace, Matrix4, Point3, Rad, Vector3, perspective};

#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub eye: Point3<f32>,
    pub target: Point3<f32>,
    pub up: Vector3<f32>,
}

impl Camera {
    pub fn new(eye: impl Into<Point3<f32>>, target: impl Into<Point3<f32>>) -> Self {
        Self {
            eye: eye.into(),
            target: target.into(),
            up: Vector3::unit_y(),
        }
    }

    pub fn calc_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_at_rh(self.eye, self.target, self.up)
    }

    /// Unit vector from the eye towards the target.
    pub fn forward(&self) -> Vector3<f32> {
        (self.target - self.eye).normalize()
    }

    pub fn right(&self) -> Vector3<f32> {
        self.forward().cross(self.up).normalize()
    }

    /// The camera's up vector, orthogonal to `forward`.
    pub fn true_up(&self) -> Vector3<f32> {
        self.right().cross(self.forward())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projection {
    aspect: f32,
    fovy: Rad<f32>,
    znear: f32,
    zfar: f32,
}

impl Projection {
    pub fn new<F: Into<Rad<f32>>>(width: u32, height: u32, fovy: F, znear: f32, zfar: f32) -> Self {
        Self {
            aspect: width as f32 / height.max(1) as f32,
            fovy: fovy.into(),
            znear,
            zfar,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.aspect = width as f32 / height as f32;
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn fovy(&self) -> Rad<f32> {
        self.fovy
    }

    pub fn zfar(&self) -> f32 {
        self.zfar
    }

    pub fn calc_matrix(&self) -> Matrix4<f32> {
        OPENGL_TO_WGPU_MATRIX * perspective(self.fovy, self.aspect, self.znear, self.zfar)
    }
}

// We need this for Rust to store our data correctly for the shaders
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    view_position: [f32; 4],
    view_proj: [[f32; 4]; 4],
}

impl CameraUniform {
    pub fn new() -> Self {
        use cgmath::SquareMatrix;
        Self {
            view_position: [0.0; 4],
            view_proj: Matrix4::identity().into(),
        }
    }

    pub fn update_view_proj(&mut self, camera: &Camera, projection: &Projection) {
        self.view_position = camera.eye.to_homogeneous().into();
        self.view_proj = (projection.calc_matrix() * camera.calc_matrix()).into();
    }
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self::new()
    }
}

/// GPU side of the camera: uniform buffer and its bind group.
#[derive(Debug)]
pub struct CameraResources {
    pub uniform: CameraUniform,
    pub buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DragMode {
    Rotate,
    Pan,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrbitSettings {
    /// Fraction of the remaining motion applied (and removed) per update.
    /// `None` applies input instantly.
    pub damping: Option<f32>,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    pub pan_speed: f32,
    pub min_distance: f32,
    pub max_distance: f32,
}

impl Default for OrbitSettings {
    fn default() -> Self {
        Self {
            damping: Some(0.05),
            rotate_speed: 1.0,
            zoom_speed: 1.0,
            pan_speed: 1.0,
            min_distance: 0.5,
            max_distance: 500.0,
        }
    }
}

/// Orbit/pan/zoom around `Camera::target` with inertial damping.
#[derive(Debug)]
pub struct OrbitController {
    settings: OrbitSettings,
    delta_theta: f32,
    delta_phi: f32,
    pan_offset: Vector3<f32>,
    scale: f32,
    drag: Option<DragMode>,
    last_cursor: Option<(f64, f64)>,
}

impl OrbitController {
    const EPS: f32 = 1e-6;

    pub fn new(settings: OrbitSettings) -> Self {
        Self {
            settings,
            delta_theta: 0.0,
            delta_phi: 0.0,
            pan_offset: Vector3::new(0.0, 0.0, 0.0),
            scale: 1.0,
            drag: None,
            last_cursor: None,
        }
    }

    pub fn settings(&self) -> &OrbitSettings {
        &self.settings
    }

    pub fn begin_drag(&mut self, mode: DragMode) {
        self.drag = Some(mode);
        self.last_cursor = None;
    }

    pub fn end_drag(&mut self) {
        self.drag = None;
        self.last_cursor = None;
    }

    /// Feed the current cursor position. Only has an effect while dragging.
    pub fn drag_to(
        &mut self,
        x: f64,
        y: f64,
        viewport_height: u32,
        camera: &Camera,
        projection: &Projection,
    ) {
        let Some(mode) = self.drag else {
            return;
        };
        let previous = self.last_cursor.replace((x, y));
        let Some((px, py)) = previous else {
            return;
        };
        let (dx, dy) = ((x - px) as f32, (y - py) as f32);
        match mode {
            DragMode::Rotate => self.rotate(dx, dy, viewport_height),
            DragMode::Pan => self.pan(dx, dy, viewport_height, camera, projection),
        }
    }

    /// Queue a rotation for a pointer movement of `dx`/`dy` pixels.
    pub fn rotate(&mut self, dx: f32, dy: f32, viewport_height: u32) {
        let height = viewport_height.max(1) as f32;
        self.delta_theta -= 2.0 * PI * dx / height * self.settings.rotate_speed;
        self.delta_phi -= 2.0 * PI * dy / height * self.settings.rotate_speed;
    }

    /// Queue a pan so that the target follows the pointer across the screen.
    pub fn pan(
        &mut self,
        dx: f32,
        dy: f32,
        viewport_height: u32,
        camera: &Camera,
        projection: &Projection,
    ) {
        let height = viewport_height.max(1) as f32;
        let distance = (camera.eye - camera.target).magnitude() * (projection.fovy().0 / 2.0).tan();
        let scale = 2.0 * distance / height * self.settings.pan_speed;
        self.pan_offset += camera.right() * (-dx * scale) + camera.true_up() * (dy * scale);
    }

    /// Positive steps move the camera closer to the target.
    pub fn zoom(&mut self, steps: f32) {
        self.scale *= 0.95f32.powf(steps * self.settings.zoom_speed);
    }

    /// Integrate queued input into `camera`. Returns whether the camera moved.
    pub fn update(&mut self, camera: &mut Camera) -> bool {
        let offset = camera.eye - camera.target;
        let mut radius = offset.magnitude();
        if radius < Self::EPS {
            return false;
        }
        let mut theta = offset.x.atan2(offset.z);
        let mut phi = (offset.y / radius).clamp(-1.0, 1.0).acos();

        let factor = self.settings.damping.unwrap_or(1.0);
        theta += self.delta_theta * factor;
        phi = (phi + self.delta_phi * factor).clamp(Self::EPS, PI - Self::EPS);
        radius = (radius * self.scale).clamp(self.settings.min_distance, self.settings.max_distance);
        let pan = self.pan_offset * factor;

        let moved = self.delta_theta.abs() > Self::EPS
            || self.delta_phi.abs() > Self::EPS
            || pan.magnitude2() > Self::EPS * Self::EPS
            || (self.scale - 1.0).abs() > Self::EPS;

        camera.target += pan;
        let sin_phi = phi.sin();
        let new_offset = Vector3::new(
            radius * sin_phi * theta.sin(),
            radius * phi.cos(),
            radius * sin_phi * theta.cos(),
        );
        camera.eye = Point3::from_vec(camera.target.to_vec() + new_offset);

        match self.settings.damping {
            Some(damping) => {
                self.delta_theta *= 1.0 - damping;
                self.delta_phi *= 1.0 - damping;
                self.pan_offset *= 1.0 - damping;
            }
            None => {
                self.delta_theta = 0.0;
                self.delta_phi = 0.0;
                self.pan_offset = Vector3::new(0.0, 0.0, 0.0);
            }
        }
        self.scale = 1.0;
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Camera {
        Camera::new((0.0, 0.0, 5.0), (0.0, 0.0, 0.0))
    }

    #[test]
    fn resize_sets_aspect_from_viewport() {
        let mut projection = Projection::new(800, 600, cgmath::Deg(60.0), 0.1, 1000.0);
        projection.resize(1920, 1080);
        assert_eq!(projection.aspect(), 1920.0 / 1080.0);
    }

    #[test]
    fn undamped_rotation_is_applied_at_once() {
        let mut cam = camera();
        let mut orbit = OrbitController::new(OrbitSettings {
            damping: None,
            ..Default::default()
        });
        orbit.rotate(100.0, 0.0, 1000);

        assert!(orbit.update(&mut cam));
        let after_first = cam;
        assert!(!orbit.update(&mut cam));
        assert_eq!(cam, after_first);
        assert!(((cam.eye - cam.target).magnitude() - 5.0).abs() < 1e-4);
    }

    #[test]
    fn damped_rotation_keeps_moving_with_decaying_steps() {
        let mut cam = camera();
        let mut orbit = OrbitController::new(OrbitSettings::default());
        orbit.rotate(200.0, 0.0, 1000);

        let mut steps = Vec::new();
        for _ in 0..5 {
            let before = cam.eye;
            orbit.update(&mut cam);
            steps.push((cam.eye - before).magnitude());
        }
        assert!(steps.iter().all(|s| *s > 0.0));
        assert!(steps.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn zoom_moves_towards_target_within_bounds() {
        let mut cam = camera();
        let mut orbit = OrbitController::new(OrbitSettings::default());
        orbit.zoom(10.0);
        orbit.update(&mut cam);
        let distance = (cam.eye - cam.target).magnitude();
        assert!(distance < 5.0);
        assert!(distance >= orbit.settings().min_distance);
    }

    #[test]
    fn drag_ignored_when_not_dragging() {
        let cam = camera();
        let projection = Projection::new(100, 100, cgmath::Deg(60.0), 0.1, 100.0);
        let mut orbit = OrbitController::new(OrbitSettings::default());
        orbit.drag_to(0.0, 0.0, 100, &cam, &projection);
        orbit.drag_to(50.0, 50.0, 100, &cam, &projection);
        let mut moved = cam;
        assert!(!orbit.update(&mut moved));
    }
}
