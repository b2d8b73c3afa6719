use std::sync::{Arc, Mutex};

use base64::Engine;
use flow_ar::resources::{LoadProgress, ProgressSink};

/// Collects every progress report of a loader.
#[derive(Clone, Default)]
pub(crate) struct ProgressLog(Arc<Mutex<Vec<LoadProgress>>>);

impl ProgressLog {
    pub fn sink(&self) -> ProgressSink {
        let reports = self.0.clone();
        Arc::new(move |progress: &LoadProgress| reports.lock().unwrap().push(progress.clone()))
    }

    pub fn reports(&self) -> Vec<LoadProgress> {
        self.0.lock().unwrap().clone()
    }
}

/// A glTF file with one triangle, its buffer embedded as a data URI.
pub(crate) fn triangle_gltf() -> Vec<u8> {
    let positions: Vec<u8> = [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]
        .iter()
        .flat_map(|f| f.to_le_bytes())
        .collect();
    let data = base64::engine::general_purpose::STANDARD.encode(&positions);
    format!(
        r#"{{
  "asset": {{ "version": "2.0" }},
  "scene": 0,
  "scenes": [{{ "nodes": [0] }}],
  "nodes": [{{ "name": "Tri", "mesh": 0 }}],
  "meshes": [{{ "primitives": [{{ "attributes": {{ "POSITION": 0 }} }}] }}],
  "buffers": [{{ "uri": "data:application/octet-stream;base64,{data}", "byteLength": 36 }}],
  "bufferViews": [{{ "buffer": 0, "byteLength": 36 }}],
  "accessors": [{{
    "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
    "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]
  }}]
}}"#
    )
    .into_bytes()
}

/// A binary FBX 7.4 file with empty `Objects` and `Connections` sections.
pub(crate) fn empty_fbx() -> Vec<u8> {
    let mut out = fbx_header();
    for name in ["Objects", "Connections"] {
        let end = out.len() + 13 + name.len();
        out.extend_from_slice(&(end as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.push(name.len() as u8);
        out.extend_from_slice(name.as_bytes());
    }
    out.extend_from_slice(&[0u8; 13]);
    out
}

/// The triangle of [`triangle_gltf`] with a one second clip named `Slide`
/// moving it along x.
pub(crate) fn animated_gltf() -> Vec<u8> {
    let floats: [f32; 9 + 2 + 6] = [
        0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, // positions
        0.0, 1.0, // key times
        0.0, 0.0, 0.0, 1.0, 0.0, 0.0, // translations
    ];
    let bytes: Vec<u8> = floats.iter().flat_map(|f| f.to_le_bytes()).collect();
    let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
    format!(
        r#"{{
  "asset": {{ "version": "2.0" }},
  "scene": 0,
  "scenes": [{{ "nodes": [0] }}],
  "nodes": [{{ "name": "Tri", "mesh": 0 }}],
  "meshes": [{{ "primitives": [{{ "attributes": {{ "POSITION": 0 }} }}] }}],
  "buffers": [{{ "uri": "data:application/octet-stream;base64,{data}", "byteLength": 68 }}],
  "bufferViews": [
    {{ "buffer": 0, "byteLength": 36 }},
    {{ "buffer": 0, "byteOffset": 36, "byteLength": 8 }},
    {{ "buffer": 0, "byteOffset": 44, "byteLength": 24 }}
  ],
  "accessors": [
    {{ "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
       "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] }},
    {{ "bufferView": 1, "componentType": 5126, "count": 2, "type": "SCALAR",
       "min": [0.0], "max": [1.0] }},
    {{ "bufferView": 2, "componentType": 5126, "count": 2, "type": "VEC3" }}
  ],
  "animations": [{{
    "name": "Slide",
    "samplers": [{{ "input": 1, "output": 2 }}],
    "channels": [{{ "sampler": 0, "target": {{ "node": 0, "path": "translation" }} }}]
  }}]
}}"#
    )
    .into_bytes()
}

/// A glTF scene whose nodes form one chain `depth` levels deep.
pub(crate) fn chained_gltf(depth: usize) -> Vec<u8> {
    let nodes: Vec<String> = (0..depth)
        .map(|i| {
            if i + 1 < depth {
                format!(r#"{{ "children": [{}] }}"#, i + 1)
            } else {
                "{}".to_string()
            }
        })
        .collect();
    format!(
        r#"{{ "asset": {{ "version": "2.0" }}, "scene": 0, "scenes": [{{ "nodes": [0] }}], "nodes": [{}] }}"#,
        nodes.join(", ")
    )
    .into_bytes()
}

fn fbx_header() -> Vec<u8> {
    let mut out = b"Kaydara FBX Binary  \0".to_vec();
    out.extend_from_slice(&[0x1a, 0x00]);
    out.extend_from_slice(&7400u32.to_le_bytes());
    out
}

/// A binary FBX file of `depth` records named `N`, each the only child of
/// the previous one. Built without recursion so any depth works.
pub(crate) fn nested_fbx(depth: usize) -> Vec<u8> {
    const HEADER: usize = 27;
    const RECORD: usize = 13 + 1;
    const NULL_RECORD: usize = 13;
    let innermost_end = HEADER + RECORD * depth;
    let mut out = fbx_header();
    for i in 0..depth {
        let end = innermost_end + NULL_RECORD * (depth - 1 - i);
        out.extend_from_slice(&(end as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.push(1);
        out.push(b'N');
    }
    // closes every record with children, then the top level
    out.extend(std::iter::repeat_n(0u8, NULL_RECORD * depth));
    out
}

/// An `Objects` record holding one compressed f64 array that claims
/// `u32::MAX` elements but stores two bytes.
pub(crate) fn forged_array_fbx() -> Vec<u8> {
    let mut property = vec![b'd'];
    property.extend_from_slice(&u32::MAX.to_le_bytes());
    property.extend_from_slice(&1u32.to_le_bytes());
    property.extend_from_slice(&2u32.to_le_bytes());
    property.extend_from_slice(&[0x78, 0x9c]);

    let mut out = fbx_header();
    let name = b"Objects";
    let end = out.len() + 13 + name.len() + property.len();
    out.extend_from_slice(&(end as u32).to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&(property.len() as u32).to_le_bytes());
    out.push(name.len() as u8);
    out.extend_from_slice(name);
    out.extend_from_slice(&property);
    out.extend_from_slice(&[0u8; 13]);
    out
}
