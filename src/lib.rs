//! flow-ar
//!
//! A camera-backdrop augmented-reality viewer on wgpu for native and WASM
//! targets. The live camera feed fills the background, a red box spins in
//! front of it and follows the pointer, and glTF/GLB/FBX models fetched from a
//! URL are added to the scene when they arrive.
//!
//! High-level modules
//! - `background`: the video quad that fills the view frustum
//! - `camera`: camera, projection, uniforms and the damped orbit controller
//! - `capture`: camera stream state machine and the platform backends
//! - `config`: viewer settings from the command line or the page query
//! - `context`: GPU and window context that owns device/queue/pipelines
//! - `data_structures`: scene graph, meshes, instances, textures
//! - `flow`: application lifecycle, event handling and the render loop
//! - `interaction`: pointer, wheel and button mapping
//! - `pipelines`: the mesh and backdrop render pipelines
//! - `render`: per-frame upload and drawing of the scene graph
//! - `resources`: fetching and decoding models, built-in primitives
//! - `stage`: the application context mutated by input, loads and frames
//!

pub mod background;
pub mod camera;
pub mod capture;
pub mod config;
pub mod context;
pub mod data_structures;
pub mod error;
pub mod flow;
pub mod interaction;
pub mod pipelines;
pub mod render;
pub mod resources;
pub mod stage;

pub use config::ViewerConfig;
pub use error::{CaptureError, LoadError};
pub use flow::{run, run_with};
pub use resources::loader::{ModelFormat, ModelLoader, PendingLoad};
pub use stage::Stage;
