//! The application context.
//!
//! [`Stage`] owns everything the viewer mutates between frames: the scene
//! graph, the camera with its projection and orbit controller, the backdrop and
//! the capture source. Input handlers, finished loads and the render loop all
//! go through its methods; nothing else holds mutable access. It knows nothing
//! about the GPU, so all of it runs in plain unit tests.

use cgmath::Deg;
use winit::event::{MouseButton, MouseScrollDelta};

use crate::{
    background::Backdrop,
    camera::{Camera, OrbitController, OrbitSettings, Projection},
    capture::{CaptureSource, VideoConstraint},
    config::ViewerConfig,
    data_structures::scene_graph::{NodeId, SceneGraph, SceneNode},
    error::LoadError,
    interaction::{drag_mode, normalize_pointer, pointer_to_world, wheel_steps},
    resources::primitives::{create_box, directional_light},
};

#[derive(Debug)]
pub struct Stage {
    config: ViewerConfig,
    scene: SceneGraph,
    camera: Camera,
    projection: Projection,
    orbit: Option<OrbitController>,
    backdrop: Backdrop,
    capture: CaptureSource,
    viewport: (u32, u32),
    interactive: Option<NodeId>,
    spin: (f32, f32),
    frame: u64,
}

impl Stage {
    pub fn new(config: ViewerConfig, width: u32, height: u32) -> Self {
        let camera = Camera::new(config.camera_position, (0.0, 0.0, 0.0));
        let projection = Projection::new(
            width,
            height,
            Deg(config.fov_degrees),
            config.znear,
            config.zfar,
        );
        let orbit = config.orbit.then(|| {
            OrbitController::new(OrbitSettings {
                damping: config.damping,
                ..Default::default()
            })
        });

        let mut scene = SceneGraph::new();
        let interactive = config.show_box.then(|| scene.insert(create_box()));
        scene.insert(directional_light());

        let mut backdrop = Backdrop::new(config.backdrop_distance);
        backdrop.fit(&camera, &projection);

        Self {
            config,
            scene,
            camera,
            projection,
            orbit,
            backdrop,
            capture: CaptureSource::new(),
            viewport: (width.max(1), height.max(1)),
            interactive,
            spin: (0.0, 0.0),
            frame: 0,
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn orbit(&self) -> Option<&OrbitController> {
        self.orbit.as_ref()
    }

    pub fn backdrop(&self) -> &Backdrop {
        &self.backdrop
    }

    pub fn capture(&self) -> &CaptureSource {
        &self.capture
    }

    pub fn capture_mut(&mut self) -> &mut CaptureSource {
        &mut self.capture
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    /// The spinning box, if it is shown.
    pub fn interactive(&self) -> Option<NodeId> {
        self.interactive
    }

    /// Frames advanced so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// The constraint of the first camera request.
    pub fn initial_constraint(&self) -> VideoConstraint {
        VideoConstraint::Facing(self.config.facing)
    }

    /// Apply the outcome of a model load. Failures are logged and leave the
    /// scene untouched; a success adds exactly one root.
    pub fn insert_model(&mut self, url: &str, result: Result<SceneNode, LoadError>) -> Option<NodeId> {
        match result {
            Ok(node) => {
                if !node.animations.is_empty() {
                    log::info!("{} ships animation clips {:?}", url, node.animations);
                }
                let id = self.scene.insert(node);
                log::info!("Inserted {} as {}", url, id);
                Some(id)
            }
            Err(e) => {
                log::error!("Could not load {}: {}", url, e);
                None
            }
        }
    }

    pub fn remove(&mut self, id: NodeId) -> Option<SceneNode> {
        if self.interactive == Some(id) {
            self.interactive = None;
        }
        self.scene.remove(id)
    }

    /// Update viewport and aspect ratio together. Zero sizes (minimized
    /// windows) are ignored and return `false`.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        self.viewport = (width, height);
        self.projection.resize(width, height);
        self.backdrop.fit(&self.camera, &self.projection);
        true
    }

    /// Place the box under the pointer and feed an active orbit drag.
    pub fn pointer_moved(&mut self, x: f64, y: f64) {
        let (width, height) = self.viewport;
        if let Some(orbit) = &mut self.orbit {
            orbit.drag_to(x, y, height, &self.camera, &self.projection);
        }
        let Some(node) = self.interactive.and_then(|id| self.scene.get_mut(id)) else {
            return;
        };
        let (wx, wy) = pointer_to_world(
            normalize_pointer(x, y, width, height),
            self.config.pointer_range,
        );
        node.local.position.x = wx;
        node.local.position.y = wy;
    }

    pub fn mouse_input(&mut self, button: MouseButton, pressed: bool) {
        let (Some(orbit), Some(mode)) = (&mut self.orbit, drag_mode(button)) else {
            return;
        };
        if pressed {
            orbit.begin_drag(mode);
        } else {
            orbit.end_drag();
        }
    }

    pub fn mouse_wheel(&mut self, delta: MouseScrollDelta) {
        if let Some(orbit) = &mut self.orbit {
            orbit.zoom(wheel_steps(delta));
        }
    }

    /// Advance one frame: spin the box, integrate the orbit, refit the backdrop.
    pub fn update(&mut self) {
        self.frame += 1;
        let step = self.config.spin_per_frame;
        self.spin.0 += step;
        self.spin.1 += step;
        if let Some(node) = self.interactive.and_then(|id| self.scene.get_mut(id)) {
            node.local.set_euler(self.spin.0, self.spin.1, 0.0);
        }
        if let Some(orbit) = &mut self.orbit {
            orbit.update(&mut self.camera);
        }
        self.backdrop.fit(&self.camera, &self.projection);
    }
}
