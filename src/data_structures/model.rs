//! CPU-side mesh data: geometry, materials and the vertex layout.
//!
//! Decoders and the primitive factory produce [`Geometry`] and [`Material`]
//! values; the renderer uploads them lazily and caches the GPU copies by
//! [`GeometryId`] / [`MaterialId`], so the same geometry shared by several
//! nodes is only uploaded once.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use cgmath::InnerSpace;

pub trait Vertex {
    fn desc() -> wgpu::VertexBufferLayout<'static>;
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelVertex {
    pub position: [f32; 3],
    pub tex_coords: [f32; 2],
    pub normal: [f32; 3],
}

impl Vertex for ModelVertex {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<ModelVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 5]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x3,
                },
            ],
        }
    }
}

static NEXT_GEOMETRY_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_MATERIAL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(u64);

/// Indexed triangle list.
#[derive(Debug)]
pub struct Geometry {
    id: GeometryId,
    pub name: String,
    pub vertices: Vec<ModelVertex>,
    pub indices: Vec<u32>,
}

impl Geometry {
    pub fn new(name: impl Into<String>, vertices: Vec<ModelVertex>, indices: Vec<u32>) -> Self {
        Self {
            id: GeometryId(NEXT_GEOMETRY_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            vertices,
            indices,
        }
    }

    pub fn id(&self) -> GeometryId {
        self.id
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Overwrites all normals with area-weighted face normals.
    ///
    /// Used for sources that ship no normals. Degenerate triangles contribute
    /// nothing; vertices touched only by degenerate triangles point up.
    pub fn compute_normals(&mut self) {
        let mut accumulated = vec![cgmath::Vector3::new(0.0f32, 0.0, 0.0); self.vertices.len()];
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            if a >= self.vertices.len() || b >= self.vertices.len() || c >= self.vertices.len() {
                continue;
            }
            let p0: cgmath::Vector3<f32> = self.vertices[a].position.into();
            let p1: cgmath::Vector3<f32> = self.vertices[b].position.into();
            let p2: cgmath::Vector3<f32> = self.vertices[c].position.into();
            let face = (p1 - p0).cross(p2 - p0);
            accumulated[a] += face;
            accumulated[b] += face;
            accumulated[c] += face;
        }
        for (vertex, normal) in self.vertices.iter_mut().zip(accumulated) {
            vertex.normal = if normal.magnitude2() > f32::EPSILON {
                normal.normalize().into()
            } else {
                [0.0, 1.0, 0.0]
            };
        }
    }
}

/// Surface description for a mesh.
///
/// `base_color` multiplies the optional texture. Unlit materials ignore the
/// scene light (used by the backdrop).
#[derive(Debug)]
pub struct Material {
    id: MaterialId,
    pub name: String,
    pub base_color: [f32; 4],
    pub texture: Option<Arc<image::RgbaImage>>,
    pub lit: bool,
}

impl Material {
    pub fn new(name: impl Into<String>, base_color: [f32; 4]) -> Self {
        Self {
            id: MaterialId(NEXT_MATERIAL_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            base_color,
            texture: None,
            lit: true,
        }
    }

    /// Colour given as `0xRRGGBB`, fully opaque.
    pub fn from_hex(name: impl Into<String>, hex: u32) -> Self {
        let channel = |shift: u32| ((hex >> shift) & 0xff) as f32 / 255.0;
        Self::new(name, [channel(16), channel(8), channel(0), 1.0])
    }

    pub fn with_texture(mut self, texture: Arc<image::RgbaImage>) -> Self {
        self.texture = Some(texture);
        self
    }

    pub fn unlit(mut self) -> Self {
        self.lit = false;
        self
    }

    pub fn id(&self) -> MaterialId {
        self.id
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::new("default", [0.8, 0.8, 0.8, 1.0])
    }
}

/// A drawable pairing of shared geometry and material.
#[derive(Clone, Debug)]
pub struct Mesh {
    pub geometry: Arc<Geometry>,
    pub material: Arc<Material>,
}

impl Mesh {
    pub fn new(geometry: Geometry, material: Material) -> Self {
        Self {
            geometry: Arc::new(geometry),
            material: Arc::new(material),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_colour_maps_to_unit_channels() {
        let red = Material::from_hex("red", 0xff0000);
        assert_eq!(red.base_color, [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn ids_are_unique() {
        let a = Geometry::new("a", Vec::new(), Vec::new());
        let b = Geometry::new("b", Vec::new(), Vec::new());
        assert_ne!(a.id(), b.id());
        assert_ne!(Material::default().id(), Material::default().id());
    }

    #[test]
    fn computed_normals_face_out_of_a_ccw_triangle() {
        let vertex = |x: f32, y: f32| ModelVertex {
            position: [x, y, 0.0],
            ..Default::default()
        };
        let mut tri = Geometry::new(
            "tri",
            vec![vertex(0.0, 0.0), vertex(1.0, 0.0), vertex(0.0, 1.0)],
            vec![0, 1, 2],
        );
        tri.compute_normals();
        for v in &tri.vertices {
            assert_eq!(v.normal, [0.0, 0.0, 1.0]);
        }
    }
}
