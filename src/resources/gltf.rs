//! glTF 2.0 decoding (`.gltf` and `.glb`).
//!
//! Buffers come from the GLB binary chunk, from `data:` URIs or from files
//! next to the model. Images are decoded with the `image` crate; one that
//! cannot be fetched or decoded leaves its material untextured instead of
//! failing the model.

use std::{collections::HashSet, sync::Arc};

use anyhow::{anyhow, bail};
use base64::Engine as _;
use cgmath::{Quaternion, Vector3};

use crate::{
    data_structures::{
        instance::Instance,
        model::{Geometry, Material, Mesh, ModelVertex},
        scene_graph::{NodeKind, SceneNode},
    },
    error::LoadError,
    resources::{Fetch, MAX_NODE_DEPTH, ProgressSink, sibling_url},
};

/// A decoded glTF file. The content to display is `scene`.
#[derive(Debug)]
pub struct GltfAsset {
    pub scene: SceneNode,
    /// Names of the animation clips in the file.
    pub animations: Vec<String>,
}

fn decode_data_uri(uri: &str) -> anyhow::Result<Vec<u8>> {
    let (header, payload) = uri
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(','))
        .ok_or_else(|| anyhow!("malformed data URI"))?;
    if !header.ends_with(";base64") {
        bail!("only base64 data URIs are supported");
    }
    Ok(base64::engine::general_purpose::STANDARD.decode(payload)?)
}

/// Resolves a URI found inside the document to bytes.
async fn resolve_uri(
    model_url: &str,
    uri: &str,
    fetcher: &dyn Fetch,
    progress: &ProgressSink,
) -> Result<Vec<u8>, LoadError> {
    if uri.starts_with("data:") {
        return decode_data_uri(uri).map_err(|source| LoadError::Decode {
            url: model_url.to_string(),
            source,
        });
    }
    let url = sibling_url(model_url, uri);
    fetcher
        .fetch(&url, progress.clone())
        .await
        .map_err(|source| LoadError::Fetch { url, source })
}

pub async fn load(
    url: &str,
    name: &str,
    bytes: Vec<u8>,
    fetcher: &dyn Fetch,
    progress: &ProgressSink,
) -> Result<GltfAsset, LoadError> {
    let decode_err = |source: anyhow::Error| LoadError::Decode {
        url: url.to_string(),
        source,
    };

    let ::gltf::Gltf { document, mut blob } =
        ::gltf::Gltf::from_slice(&bytes).map_err(|e| decode_err(e.into()))?;

    let mut buffers: Vec<Vec<u8>> = Vec::new();
    for buffer in document.buffers() {
        let data = match buffer.source() {
            ::gltf::buffer::Source::Bin => blob
                .take()
                .ok_or_else(|| decode_err(anyhow!("buffer {} refers to a missing GLB chunk", buffer.index())))?,
            ::gltf::buffer::Source::Uri(uri) => resolve_uri(url, uri, fetcher, progress).await?,
        };
        if data.len() < buffer.length() {
            return Err(decode_err(anyhow!(
                "buffer {} holds {} bytes, {} expected",
                buffer.index(),
                data.len(),
                buffer.length()
            )));
        }
        buffers.push(data);
    }

    let mut images: Vec<Option<Arc<image::RgbaImage>>> = Vec::new();
    for img in document.images() {
        let encoded = match img.source() {
            ::gltf::image::Source::View { view, .. } => {
                let range = view.offset()..view.offset() + view.length();
                buffers
                    .get(view.buffer().index())
                    .and_then(|buffer| buffer.get(range))
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| anyhow!("image view {} is out of bounds", view.index()))
            }
            ::gltf::image::Source::Uri { uri, .. } => resolve_uri(url, uri, fetcher, progress)
                .await
                .map_err(anyhow::Error::from),
        };
        let decoded = encoded.and_then(|data| Ok(image::load_from_memory(&data)?.to_rgba8()));
        images.push(match decoded {
            Ok(rgba) => Some(Arc::new(rgba)),
            Err(e) => {
                log::warn!("Image {} of {} left out: {:#}", img.index(), url, e);
                None
            }
        });
    }

    let default_material = Arc::new(Material::default());
    let materials: Vec<Arc<Material>> = document
        .materials()
        .map(|material| {
            let pbr = material.pbr_metallic_roughness();
            let label = material.name().unwrap_or("material");
            let mut converted = Material::new(label, pbr.base_color_factor());
            if let Some(info) = pbr.base_color_texture() {
                if let Some(Some(texture)) = images.get(info.texture().source().index()) {
                    converted = converted.with_texture(texture.clone());
                }
            }
            Arc::new(converted)
        })
        .collect();

    let mut meshes: Vec<Vec<Mesh>> = Vec::new();
    for mesh in document.meshes() {
        let mut primitives = Vec::new();
        for (idx, primitive) in mesh.primitives().enumerate() {
            if primitive.mode() != ::gltf::mesh::Mode::Triangles {
                log::warn!(
                    "Skipping primitive {} of mesh {}: {:?} is not supported",
                    idx,
                    mesh.index(),
                    primitive.mode()
                );
                continue;
            }
            let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));
            let Some(positions) = reader.read_positions() else {
                log::warn!("Skipping primitive {} of mesh {}: no positions", idx, mesh.index());
                continue;
            };
            let mut vertices: Vec<ModelVertex> = positions
                .map(|position| ModelVertex {
                    position,
                    ..Default::default()
                })
                .collect();
            if let Some(tex_coords) = reader.read_tex_coords(0) {
                for (vertex, uv) in vertices.iter_mut().zip(tex_coords.into_f32()) {
                    vertex.tex_coords = uv;
                }
            }
            let has_normals = match reader.read_normals() {
                Some(normals) => {
                    for (vertex, normal) in vertices.iter_mut().zip(normals) {
                        vertex.normal = normal;
                    }
                    true
                }
                None => false,
            };
            let indices = match reader.read_indices() {
                Some(indices) => indices.into_u32().collect(),
                None => (0..vertices.len() as u32).collect(),
            };

            let label = mesh.name().map_or_else(|| format!("{name}/mesh{}", mesh.index()), str::to_string);
            let mut geometry = Geometry::new(label, vertices, indices);
            if !has_normals {
                geometry.compute_normals();
            }
            let material = primitive
                .material()
                .index()
                .and_then(|i| materials.get(i).cloned())
                .unwrap_or_else(|| default_material.clone());
            primitives.push(Mesh {
                geometry: Arc::new(geometry),
                material,
            });
        }
        meshes.push(primitives);
    }

    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or_else(|| decode_err(anyhow!("the file contains no scene")))?;

    let mut root = SceneNode::group(scene.name().unwrap_or(name));
    let mut path = HashSet::new();
    for node in scene.nodes() {
        root.add_child(convert_node(&node, &meshes, &mut path).map_err(decode_err)?);
    }

    let animations = document
        .animations()
        .map(|animation| {
            animation
                .name()
                .map_or_else(|| format!("animation{}", animation.index()), str::to_string)
        })
        .collect();

    Ok(GltfAsset {
        scene: root,
        animations,
    })
}

fn convert_node(
    node: &::gltf::Node<'_>,
    meshes: &[Vec<Mesh>],
    path: &mut HashSet<usize>,
) -> anyhow::Result<SceneNode> {
    if path.len() >= MAX_NODE_DEPTH {
        bail!("node hierarchy deeper than {MAX_NODE_DEPTH} levels");
    }
    if !path.insert(node.index()) {
        bail!("node {} is its own ancestor", node.index());
    }
    let (translation, rotation, scale) = node.transform().decomposed();
    let local = Instance {
        position: Vector3::from(translation),
        rotation: Quaternion::new(rotation[3], rotation[0], rotation[1], rotation[2]),
        scale: Vector3::from(scale),
    };
    let label = node
        .name()
        .map_or_else(|| format!("node{}", node.index()), str::to_string);

    let primitives = node.mesh().and_then(|mesh| meshes.get(mesh.index()));
    let mut converted = match primitives.map(Vec::as_slice) {
        Some([single]) => SceneNode::new(label, NodeKind::Mesh(single.clone())),
        Some(several) => {
            let mut group = SceneNode::group(label);
            for (idx, mesh) in several.iter().enumerate() {
                group.add_child(SceneNode::new(
                    format!("{}/primitive{}", group.name, idx),
                    NodeKind::Mesh(mesh.clone()),
                ));
            }
            group
        }
        None if node.camera().is_some() => SceneNode::new(label, NodeKind::Camera),
        None => SceneNode::group(label),
    }
    .with_transform(local);

    for child in node.children() {
        converted.add_child(convert_node(&child, meshes, path)?);
    }
    path.remove(&node.index());
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{MemoryFetcher, log_progress};

    /// One triangle in the XY plane, no normals, no indices.
    fn triangle_bytes() -> Vec<u8> {
        [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]
            .iter()
            .flat_map(|f| f.to_le_bytes())
            .collect()
    }

    fn triangle_json(buffer: &str) -> String {
        format!(
            r#"{{
  "asset": {{ "version": "2.0" }},
  "scene": 0,
  "scenes": [{{ "name": "Root", "nodes": [0] }}],
  "nodes": [{{ "name": "Tri", "mesh": 0, "translation": [0.0, 2.0, 0.0] }}],
  "meshes": [{{ "primitives": [{{ "attributes": {{ "POSITION": 0 }} }}] }}],
  "buffers": [{{ {buffer}"byteLength": 36 }}],
  "bufferViews": [{{ "buffer": 0, "byteOffset": 0, "byteLength": 36 }}],
  "accessors": [{{
    "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
    "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]
  }}]
}}"#
        )
    }

    fn glb(json: &str, bin: &[u8]) -> Vec<u8> {
        let mut json = json.as_bytes().to_vec();
        while json.len() % 4 != 0 {
            json.push(b' ');
        }
        let mut bin = bin.to_vec();
        while bin.len() % 4 != 0 {
            bin.push(0);
        }
        let total = 12 + 8 + json.len() + 8 + bin.len();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(b"glTF");
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(json.len() as u32).to_le_bytes());
        out.extend_from_slice(b"JSON");
        out.extend_from_slice(&json);
        out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
        out.extend_from_slice(b"BIN\0");
        out.extend_from_slice(&bin);
        out
    }

    fn assert_triangle_scene(asset: &GltfAsset) {
        assert_eq!(asset.scene.name, "Root");
        assert_eq!(asset.scene.children.len(), 1);
        let tri = &asset.scene.children[0];
        assert_eq!(tri.name, "Tri");
        assert_eq!(tri.local.position, Vector3::new(0.0, 2.0, 0.0));
        let mesh = tri.mesh().expect("triangle node carries a mesh");
        assert_eq!(mesh.geometry.indices, [0, 1, 2]);
        assert_eq!(mesh.geometry.vertices[1].position, [1.0, 0.0, 0.0]);
        assert_eq!(mesh.geometry.vertices[0].normal, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn embedded_data_uri() {
        let uri = base64::engine::general_purpose::STANDARD.encode(triangle_bytes());
        let json = triangle_json(&format!(
            "\"uri\": \"data:application/octet-stream;base64,{uri}\", "
        ));
        let fetcher = MemoryFetcher::new();
        let asset = futures::executor::block_on(load(
            "tri.gltf",
            "tri",
            json.into_bytes(),
            &fetcher,
            &log_progress(),
        ))
        .unwrap();
        assert_triangle_scene(&asset);
        assert!(fetcher.requests().is_empty());
    }

    #[test]
    fn external_buffer_is_fetched_next_to_the_model() {
        let json = triangle_json("\"uri\": \"tri.bin\", ");
        let fetcher = MemoryFetcher::new().with("https://cdn.test/models/tri.bin", triangle_bytes());
        let asset = futures::executor::block_on(load(
            "https://cdn.test/models/tri.gltf?sig=abc",
            "tri",
            json.into_bytes(),
            &fetcher,
            &log_progress(),
        ))
        .unwrap();
        assert_triangle_scene(&asset);
        assert_eq!(fetcher.requests(), ["https://cdn.test/models/tri.bin"]);
    }

    #[test]
    fn binary_glb_chunk() {
        let bytes = glb(&triangle_json(""), &triangle_bytes());
        let asset = futures::executor::block_on(load(
            "tri.glb",
            "tri",
            bytes,
            &MemoryFetcher::new(),
            &log_progress(),
        ))
        .unwrap();
        assert_triangle_scene(&asset);
    }

    #[test]
    fn missing_external_buffer_is_a_fetch_error() {
        let json = triangle_json("\"uri\": \"tri.bin\", ");
        let result = futures::executor::block_on(load(
            "tri.gltf",
            "tri",
            json.into_bytes(),
            &MemoryFetcher::new(),
            &log_progress(),
        ));
        match result {
            Err(LoadError::Fetch { url, .. }) => assert_eq!(url, "tri.bin"),
            other => panic!("expected a fetch error, got {other:?}"),
        }
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let result = futures::executor::block_on(load(
            "broken.glb",
            "broken",
            b"definitely not gltf".to_vec(),
            &MemoryFetcher::new(),
            &log_progress(),
        ));
        assert!(matches!(result, Err(LoadError::Decode { .. })));
    }
}
