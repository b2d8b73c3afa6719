//! Engine data structures: meshes, materials, textures, transforms and the scene graph.
//!
//! - `model` contains CPU-side geometry and material definitions
//! - `texture` contains the GPU texture wrapper and creation utilities
//! - `instance` holds local/world transforms and their GPU layout
//! - `scene_graph` enables hierarchical scene organization

pub mod instance;
pub mod model;
pub mod scene_graph;
pub mod texture;
