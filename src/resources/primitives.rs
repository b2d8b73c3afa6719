//! Built-in scene content that needs no loading.

use cgmath::Vector3;

use crate::data_structures::{
    instance::Instance,
    model::{Geometry, Material, Mesh, ModelVertex},
    scene_graph::{Light, NodeKind, SceneNode},
};

pub const BOX_COLOR: u32 = 0xff0000;
pub const BOX_SCALE: f32 = 2.0;

/// Face normal with two in-plane axes such that `u x v == normal`.
const CUBE_FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
    ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
    ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
    ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
    ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
    ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
];

/// Corner offsets along (u, v) with their texture coordinates, counter-clockwise.
const QUAD_CORNERS: [([f32; 2], [f32; 2]); 4] = [
    ([-0.5, -0.5], [0.0, 1.0]),
    ([0.5, -0.5], [1.0, 1.0]),
    ([0.5, 0.5], [1.0, 0.0]),
    ([-0.5, 0.5], [0.0, 0.0]),
];

const QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

/// Unit cube centred on the origin with one quad (four vertices) per face.
pub fn unit_cube() -> Geometry {
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in CUBE_FACES {
        let base = vertices.len() as u32;
        let (n, u, v) = (Vector3::from(normal), Vector3::from(u), Vector3::from(v));
        for ([du, dv], tex_coords) in QUAD_CORNERS {
            vertices.push(ModelVertex {
                position: (n * 0.5 + u * du + v * dv).into(),
                tex_coords,
                normal,
            });
        }
        indices.extend(QUAD_INDICES.iter().map(|i| base + i));
    }
    Geometry::new("box", vertices, indices)
}

/// The interactive box: red, lit, at the origin, scaled by two.
pub fn create_box() -> SceneNode {
    let mesh = Mesh::new(unit_cube(), Material::from_hex("box", BOX_COLOR));
    SceneNode::new("box", NodeKind::Mesh(mesh)).with_transform(Instance::new().with_uniform_scale(BOX_SCALE))
}

/// White directional light of intensity 2 shining from (1, 1, 1).
pub fn directional_light() -> SceneNode {
    SceneNode::new(
        "light",
        NodeKind::Light(Light {
            color: [1.0, 1.0, 1.0],
            intensity: 2.0,
        }),
    )
    .with_transform(Instance::new().with_position([1.0, 1.0, 1.0]))
}

/// Unit quad in the XY plane facing +Z, unlit white. Texture row 0 is at the top.
pub fn backdrop_quad() -> Mesh {
    let vertices = QUAD_CORNERS
        .iter()
        .map(|([x, y], tex_coords)| ModelVertex {
            position: [*x, *y, 0.0],
            tex_coords: *tex_coords,
            normal: [0.0, 0.0, 1.0],
        })
        .collect();
    Mesh::new(
        Geometry::new("backdrop", vertices, QUAD_INDICES.to_vec()),
        Material::new("backdrop", [1.0; 4]).unlit(),
    )
}

#[cfg(test)]
mod tests {
    use cgmath::InnerSpace;

    use super::*;

    #[test]
    fn box_matches_the_reference_object() {
        let node = create_box();
        let mesh = node.mesh().expect("box is a mesh");
        assert_eq!(mesh.geometry.vertices.len(), 24);
        assert_eq!(mesh.geometry.indices.len(), 36);
        assert_eq!(mesh.material.base_color, [1.0, 0.0, 0.0, 1.0]);
        assert!(mesh.material.lit);
        assert_eq!(node.local.position, Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(node.local.scale, Vector3::new(2.0, 2.0, 2.0));
    }

    #[test]
    fn cube_faces_wind_outwards() {
        let cube = unit_cube();
        for v in &cube.vertices {
            assert!(v.position.iter().all(|c| c.abs() == 0.5));
        }
        for tri in cube.indices.chunks_exact(3) {
            let p = |i: u32| Vector3::from(cube.vertices[i as usize].position);
            let face = (p(tri[1]) - p(tri[0])).cross(p(tri[2]) - p(tri[0]));
            let normal = Vector3::from(cube.vertices[tri[0] as usize].normal);
            assert!(face.dot(normal) > 0.0);
            assert!(p(tri[0]).dot(normal) > 0.0);
        }
    }

    #[test]
    fn create_box_is_deterministic() {
        let (a, b) = (create_box(), create_box());
        let (a, b) = (a.mesh().unwrap(), b.mesh().unwrap());
        assert_eq!(a.geometry.vertices, b.geometry.vertices);
        assert_eq!(a.geometry.indices, b.geometry.indices);
    }

    #[test]
    fn backdrop_is_unlit() {
        let quad = backdrop_quad();
        assert!(!quad.material.lit);
        assert_eq!(quad.geometry.triangle_count(), 2);
    }
}
