//! Binary FBX decoding.
//!
//! The file is read into a generic node tree first ([`parse`]), then the
//! scene is assembled from the `Objects` and `Connections` sections:
//!
//! - `Geometry` objects become meshes (polygons are fan-triangulated, normals
//!   and UVs are taken from the first layer when present)
//! - `Model` objects carry the hierarchy and `Lcl Translation/Rotation/Scaling`
//! - `Material` objects contribute their diffuse colour
//!
//! Only the binary encoding is supported (FBX 7.x, 32 and 64 bit headers).

use std::{
    collections::{HashMap, HashSet},
    io::Read,
    sync::Arc,
};

use anyhow::{Context as _, anyhow, bail, ensure};
use cgmath::{Deg, Quaternion, Rotation3, Vector3};

use crate::{
    data_structures::{
        instance::Instance,
        model::{Geometry, Material, Mesh, ModelVertex},
        scene_graph::{Light, NodeKind, SceneNode},
    },
    resources::MAX_NODE_DEPTH,
};

const MAGIC: &[u8] = b"Kaydara FBX Binary  \0";
const HEADER_LEN: usize = 27;
/// Zlib cannot expand data by more than this factor.
const MAX_INFLATE_RATIO: usize = 1032;

/// A property value attached to an FBX node.
#[derive(Clone, Debug, PartialEq)]
pub enum Property {
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    BoolArray(Vec<bool>),
    I32Array(Vec<i32>),
    I64Array(Vec<i64>),
    F32Array(Vec<f32>),
    F64Array(Vec<f64>),
    String(String),
    Raw(Vec<u8>),
}

impl Property {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Property::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Property::I16(v) => Some(v.into()),
            Property::I32(v) => Some(v.into()),
            Property::I64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Property::F32(v) => Some(v.into()),
            Property::F64(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// Numeric arrays of any element type, widened to `f64`.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        match self {
            Property::F64Array(v) => Some(v.clone()),
            Property::F32Array(v) => Some(v.iter().map(|&x| x.into()).collect()),
            Property::I32Array(v) => Some(v.iter().map(|&x| x.into()).collect()),
            Property::I64Array(v) => Some(v.iter().map(|&x| x as f64).collect()),
            _ => None,
        }
    }

    pub fn to_i32_vec(&self) -> Option<Vec<i32>> {
        match self {
            Property::I32Array(v) => Some(v.clone()),
            Property::I64Array(v) => v.iter().map(|&x| i32::try_from(x).ok()).collect(),
            _ => None,
        }
    }
}

/// One record of the FBX node tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FbxNode {
    pub name: String,
    pub properties: Vec<Property>,
    pub children: Vec<FbxNode>,
}

impl FbxNode {
    pub fn child(&self, name: &str) -> Option<&FbxNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FbxNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn prop(&self, idx: usize) -> Option<&Property> {
        self.properties.get(idx)
    }

    /// The first property of the child `name` as a string.
    fn child_str(&self, name: &str) -> Option<&str> {
        self.child(name)?.prop(0)?.as_str()
    }

    /// Looks up a `P` entry of the `Properties70` block.
    fn property70(&self, name: &str) -> Option<&FbxNode> {
        self.child("Properties70")?
            .children_named("P")
            .find(|p| p.prop(0).and_then(Property::as_str) == Some(name))
    }

    /// A three component value from `Properties70`, e.g. a translation.
    fn vec3_property(&self, name: &str) -> Option<[f64; 3]> {
        let p = self.property70(name)?;
        Some([
            p.prop(4)?.as_f64()?,
            p.prop(5)?.as_f64()?,
            p.prop(6)?.as_f64()?,
        ])
    }

    fn f64_property(&self, name: &str) -> Option<f64> {
        self.property70(name)?.prop(4)?.as_f64()
    }

    /// The name part of an object name (`"Name\0\x01Class"`).
    fn object_name(&self) -> &str {
        let full = self.prop(1).and_then(Property::as_str).unwrap_or_default();
        full.split("\0\u{1}").next().unwrap_or(full)
    }

    fn object_id(&self) -> Option<i64> {
        self.prop(0)?.as_i64()
    }
}

/// A parsed FBX file.
#[derive(Clone, Debug, PartialEq)]
pub struct FbxDocument {
    pub version: u32,
    pub nodes: Vec<FbxNode>,
}

impl FbxDocument {
    pub fn node(&self, name: &str) -> Option<&FbxNode> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    wide: bool,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> anyhow::Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| anyhow!("unexpected end of file at offset {}", self.pos))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> anyhow::Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> anyhow::Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> anyhow::Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    /// A record header field, 64 bit from version 7500 on.
    fn offset(&mut self) -> anyhow::Result<u64> {
        if self.wide {
            Ok(u64::from_le_bytes(self.array()?))
        } else {
            Ok(self.u32()?.into())
        }
    }

    fn node(&mut self, depth: usize) -> anyhow::Result<Option<FbxNode>> {
        ensure!(depth < MAX_NODE_DEPTH, "records nested deeper than {MAX_NODE_DEPTH} levels");
        let end = self.offset()?;
        let num_properties = self.offset()?;
        let _property_list_len = self.offset()?;
        let name_len = self.u8()?;
        if end == 0 && num_properties == 0 && name_len == 0 {
            return Ok(None);
        }
        let end = usize::try_from(end)?;
        ensure!(
            end <= self.data.len() && end >= self.pos,
            "node ends outside the file ({end})"
        );
        let name = String::from_utf8_lossy(self.take(name_len.into())?).into_owned();

        let mut properties = Vec::new();
        for _ in 0..num_properties {
            properties.push(self.property().with_context(|| format!("in node {name}"))?);
        }

        let mut children = Vec::new();
        while self.pos < end {
            match self.node(depth + 1)? {
                Some(child) => children.push(child),
                None => break,
            }
        }
        self.pos = end;
        Ok(Some(FbxNode {
            name,
            properties,
            children,
        }))
    }

    fn property(&mut self) -> anyhow::Result<Property> {
        let code = self.u8()?;
        Ok(match code {
            b'C' => Property::Bool(self.u8()? != 0),
            b'Y' => Property::I16(i16::from_le_bytes(self.array()?)),
            b'I' => Property::I32(i32::from_le_bytes(self.array()?)),
            b'L' => Property::I64(i64::from_le_bytes(self.array()?)),
            b'F' => Property::F32(f32::from_le_bytes(self.array()?)),
            b'D' => Property::F64(f64::from_le_bytes(self.array()?)),
            b'S' => {
                let len = self.u32()? as usize;
                Property::String(String::from_utf8_lossy(self.take(len)?).into_owned())
            }
            b'R' => {
                let len = self.u32()? as usize;
                Property::Raw(self.take(len)?.to_vec())
            }
            b'b' => Property::BoolArray(self.array_data(1)?.iter().map(|b| *b != 0).collect()),
            b'i' => Property::I32Array(
                self.array_data(4)?
                    .chunks_exact(4)
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            b'f' => Property::F32Array(
                self.array_data(4)?
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            b'l' => Property::I64Array(
                self.array_data(8)?
                    .chunks_exact(8)
                    .map(|c| i64::from_le_bytes(c.try_into().unwrap_or_default()))
                    .collect(),
            ),
            b'd' => Property::F64Array(
                self.array_data(8)?
                    .chunks_exact(8)
                    .map(|c| f64::from_le_bytes(c.try_into().unwrap_or_default()))
                    .collect(),
            ),
            other => bail!("unknown property type {:?}", other as char),
        })
    }

    /// Raw little-endian bytes of an array property, inflated if needed.
    fn array_data(&mut self, element_size: usize) -> anyhow::Result<Vec<u8>> {
        let count = self.u32()? as usize;
        let encoding = self.u32()?;
        let stored_len = self.u32()? as usize;
        let stored = self.take(stored_len)?;
        let expected = count
            .checked_mul(element_size)
            .ok_or_else(|| anyhow!("array of {count} elements is too large"))?;
        let data = match encoding {
            0 => stored.to_vec(),
            1 => {
                // the count is untrusted, size the buffer by what the stream can hold
                let mut inflated =
                    Vec::with_capacity(expected.min(stored.len().saturating_mul(MAX_INFLATE_RATIO)));
                flate2::read::ZlibDecoder::new(stored)
                    .take(expected as u64)
                    .read_to_end(&mut inflated)
                    .context("inflating array")?;
                inflated
            }
            other => bail!("unknown array encoding {other}"),
        };
        ensure!(
            data.len() == expected,
            "array holds {} bytes, {} expected",
            data.len(),
            expected
        );
        Ok(data)
    }
}

/// Parse a binary FBX file into its node tree.
pub fn parse(bytes: &[u8]) -> anyhow::Result<FbxDocument> {
    if !bytes.starts_with(MAGIC) {
        let head = String::from_utf8_lossy(&bytes[..bytes.len().min(256)]);
        if head.contains("FBXHeaderExtension") || head.trim_start().starts_with(';') {
            bail!("ASCII FBX files are not supported, export as binary");
        }
        bail!("not an FBX file");
    }
    ensure!(bytes.len() >= HEADER_LEN, "truncated FBX header");
    let version = u32::from_le_bytes([bytes[23], bytes[24], bytes[25], bytes[26]]);
    let mut reader = Reader {
        data: bytes,
        pos: HEADER_LEN,
        wide: version >= 7500,
    };
    let null_record = if reader.wide { 25 } else { 13 };
    let mut nodes = Vec::new();
    while reader.data.len() - reader.pos >= null_record {
        match reader.node(0)? {
            Some(node) => nodes.push(node),
            None => break,
        }
    }
    Ok(FbxDocument { version, nodes })
}

/// Per-vertex data of a `LayerElement*` block.
struct LayerElement {
    values: Vec<f64>,
    indices: Option<Vec<i32>>,
    by_polygon_vertex: bool,
    width: usize,
}

impl LayerElement {
    fn read(geometry: &FbxNode, element: &str, data: &str, index: &str, width: usize) -> Option<Self> {
        let layer = geometry.child(element)?;
        let values = layer.child(data)?.prop(0)?.to_f64_vec()?;
        let mapping = layer.child_str("MappingInformationType").unwrap_or("ByPolygonVertex");
        let reference = layer.child_str("ReferenceInformationType").unwrap_or("Direct");
        let by_polygon_vertex = match mapping {
            "ByPolygonVertex" => true,
            "ByVertice" | "ByVertex" | "ByControlPoint" => false,
            other => {
                log::warn!("{element}: mapping {other} is not supported");
                return None;
            }
        };
        let indices = match reference {
            "IndexToDirect" | "Index" => Some(layer.child(index)?.prop(0)?.to_i32_vec()?),
            _ => None,
        };
        Some(Self {
            values,
            indices,
            by_polygon_vertex,
            width,
        })
    }

    fn get(&self, polygon_vertex: usize, control_point: usize) -> Option<&[f64]> {
        let slot = if self.by_polygon_vertex {
            polygon_vertex
        } else {
            control_point
        };
        let slot = match &self.indices {
            Some(indices) => usize::try_from(*indices.get(slot)?).ok()?,
            None => slot,
        };
        self.values
            .get(slot * self.width..(slot + 1) * self.width)
    }
}

fn build_geometry(name: &str, node: &FbxNode) -> anyhow::Result<Geometry> {
    let positions = node
        .child("Vertices")
        .and_then(|v| v.prop(0))
        .and_then(Property::to_f64_vec)
        .ok_or_else(|| anyhow!("geometry {name} has no vertices"))?;
    let polygon_indices = node
        .child("PolygonVertexIndex")
        .and_then(|v| v.prop(0))
        .and_then(Property::to_i32_vec)
        .ok_or_else(|| anyhow!("geometry {name} has no polygons"))?;
    let normals = LayerElement::read(node, "LayerElementNormal", "Normals", "NormalsIndex", 3);
    let uvs = LayerElement::read(node, "LayerElementUV", "UV", "UVIndex", 2);

    let control_points = positions.len() / 3;
    let mut vertices = Vec::with_capacity(polygon_indices.len());
    let mut indices = Vec::new();
    let mut polygon_start = 0u32;
    for (polygon_vertex, &raw) in polygon_indices.iter().enumerate() {
        let last_of_polygon = raw < 0;
        let control_point = (if last_of_polygon { !raw } else { raw }) as usize;
        ensure!(
            control_point < control_points,
            "geometry {name} references vertex {control_point} of {control_points}"
        );
        let p = &positions[control_point * 3..control_point * 3 + 3];
        let mut vertex = ModelVertex {
            position: [p[0] as f32, p[1] as f32, p[2] as f32],
            ..Default::default()
        };
        if let Some(n) = normals.as_ref().and_then(|n| n.get(polygon_vertex, control_point)) {
            vertex.normal = [n[0] as f32, n[1] as f32, n[2] as f32];
        }
        if let Some(uv) = uvs.as_ref().and_then(|uv| uv.get(polygon_vertex, control_point)) {
            vertex.tex_coords = [uv[0] as f32, 1.0 - uv[1] as f32];
        }
        vertices.push(vertex);

        if last_of_polygon {
            let polygon_end = vertices.len() as u32;
            for i in polygon_start + 1..polygon_end.saturating_sub(1) {
                indices.extend_from_slice(&[polygon_start, i, i + 1]);
            }
            polygon_start = polygon_end;
        }
    }

    let mut geometry = Geometry::new(name, vertices, indices);
    if normals.is_none() {
        geometry.compute_normals();
    }
    Ok(geometry)
}

fn local_transform(model: &FbxNode) -> Instance {
    let vec3 = |name: &str, default: f64| {
        let v = model.vec3_property(name).unwrap_or([default; 3]);
        Vector3::new(v[0] as f32, v[1] as f32, v[2] as f32)
    };
    let euler = vec3("Lcl Rotation", 0.0);
    // FBX's default XYZ order applies x first.
    let rotation = Quaternion::from_angle_z(Deg(euler.z))
        * Quaternion::from_angle_y(Deg(euler.y))
        * Quaternion::from_angle_x(Deg(euler.x));
    Instance {
        position: vec3("Lcl Translation", 0.0),
        rotation,
        scale: vec3("Lcl Scaling", 1.0),
    }
}

fn build_material(node: &FbxNode) -> Material {
    let color = node
        .vec3_property("DiffuseColor")
        .or_else(|| node.vec3_property("Diffuse"))
        .unwrap_or([0.8; 3]);
    let opacity = node.f64_property("Opacity").unwrap_or(1.0);
    Material::new(
        node.object_name(),
        [color[0] as f32, color[1] as f32, color[2] as f32, opacity as f32],
    )
}

fn build_light(attribute: Option<&FbxNode>) -> Light {
    let color = attribute
        .and_then(|a| a.vec3_property("Color"))
        .unwrap_or([1.0; 3]);
    // stored in percent
    let intensity = attribute
        .and_then(|a| a.f64_property("Intensity"))
        .unwrap_or(100.0);
    Light {
        color: [color[0] as f32, color[1] as f32, color[2] as f32],
        intensity: (intensity / 100.0) as f32,
    }
}

struct Scene<'a> {
    models: HashMap<i64, &'a FbxNode>,
    geometries: HashMap<i64, Arc<Geometry>>,
    materials: HashMap<i64, Arc<Material>>,
    attributes: HashMap<i64, &'a FbxNode>,
    /// Children of each object id in connection order. Id 0 is the root.
    children: HashMap<i64, Vec<i64>>,
    has_parent: HashSet<i64>,
    default_material: Arc<Material>,
}

impl Scene<'_> {
    fn build_node(&self, id: i64, path: &mut HashSet<i64>) -> anyhow::Result<SceneNode> {
        ensure!(
            path.len() < MAX_NODE_DEPTH,
            "model hierarchy deeper than {MAX_NODE_DEPTH} levels"
        );
        ensure!(path.insert(id), "model {id} is its own ancestor");
        let model = self.models[&id];
        let connected = self.children.get(&id).map(Vec::as_slice).unwrap_or_default();
        let class = model.prop(2).and_then(Property::as_str).unwrap_or_default();

        let geometry = connected.iter().find_map(|c| self.geometries.get(c));
        let mut materials = connected.iter().filter_map(|c| self.materials.get(c));
        let kind = match geometry {
            Some(geometry) => NodeKind::Mesh(Mesh {
                geometry: geometry.clone(),
                material: materials
                    .next()
                    .cloned()
                    .unwrap_or_else(|| self.default_material.clone()),
            }),
            None if class == "Light" => {
                let attribute = connected.iter().find_map(|c| self.attributes.get(c)).copied();
                NodeKind::Light(build_light(attribute))
            }
            None if class == "Camera" => NodeKind::Camera,
            None => NodeKind::Group,
        };

        let mut node = SceneNode::new(model.object_name(), kind).with_transform(local_transform(model));
        for child in connected.iter().filter(|c| self.models.contains_key(c)) {
            node.add_child(self.build_node(*child, path)?);
        }
        path.remove(&id);
        Ok(node)
    }
}

/// Assemble the scene of a parsed document into one group named `name`.
pub fn to_scene(name: &str, document: &FbxDocument) -> anyhow::Result<SceneNode> {
    let objects = document
        .node("Objects")
        .ok_or_else(|| anyhow!("no Objects section"))?;

    let mut scene = Scene {
        models: HashMap::new(),
        geometries: HashMap::new(),
        materials: HashMap::new(),
        attributes: HashMap::new(),
        children: HashMap::new(),
        has_parent: HashSet::new(),
        default_material: Arc::new(Material::default()),
    };
    for object in &objects.children {
        let Some(id) = object.object_id() else {
            continue;
        };
        match object.name.as_str() {
            "Model" => {
                scene.models.insert(id, object);
            }
            "Geometry" if object.prop(2).and_then(Property::as_str) == Some("Mesh") => {
                match build_geometry(object.object_name(), object) {
                    Ok(geometry) => {
                        scene.geometries.insert(id, Arc::new(geometry));
                    }
                    Err(e) => log::warn!("Skipping geometry {}: {:#}", id, e),
                }
            }
            "Material" => {
                scene.materials.insert(id, Arc::new(build_material(object)));
            }
            "NodeAttribute" => {
                scene.attributes.insert(id, object);
            }
            _ => {}
        }
    }

    if let Some(connections) = document.node("Connections") {
        for c in connections.children_named("C") {
            if c.prop(0).and_then(Property::as_str) != Some("OO") {
                continue;
            }
            let (Some(child), Some(parent)) = (
                c.prop(1).and_then(Property::as_i64),
                c.prop(2).and_then(Property::as_i64),
            ) else {
                continue;
            };
            scene.children.entry(parent).or_default().push(child);
            if scene.models.contains_key(&parent) || parent == 0 {
                scene.has_parent.insert(child);
            }
        }
    }

    let mut roots: Vec<i64> = scene
        .children
        .get(&0)
        .map(|ids| ids.iter().copied().filter(|id| scene.models.contains_key(id)).collect())
        .unwrap_or_default();
    let mut orphans: Vec<i64> = scene
        .models
        .keys()
        .copied()
        .filter(|id| !scene.has_parent.contains(id))
        .collect();
    orphans.sort_unstable();
    roots.extend(orphans);

    let mut group = SceneNode::group(name);
    let mut path = HashSet::new();
    for id in roots {
        group.add_child(scene.build_node(id, &mut path)?);
    }
    Ok(group)
}

/// Decode a binary FBX file into a group holding its models.
pub fn load(name: &str, bytes: &[u8]) -> anyhow::Result<SceneNode> {
    let document = parse(bytes)?;
    log::debug!("FBX version {} with {} top-level nodes", document.version, document.nodes.len());
    to_scene(name, &document)
}


#[cfg(test)]
mod tests {
    use cgmath::InnerSpace;

    use super::*;

    fn n(name: &str, properties: Vec<Property>, children: Vec<FbxNode>) -> FbxNode {
        FbxNode {
            name: name.into(),
            properties,
            children,
        }
    }

    fn s(value: &str) -> Property {
        Property::String(value.into())
    }

    fn p70(name: &str, kind: &str, values: [f64; 3]) -> FbxNode {
        n(
            "P",
            vec![
                s(name),
                s(kind),
                s(""),
                s("A"),
                Property::F64(values[0]),
                Property::F64(values[1]),
                Property::F64(values[2]),
            ],
            vec![],
        )
    }

    fn connect(child: i64, parent: i64) -> FbxNode {
        n("C", vec![s("OO"), Property::I64(child), Property::I64(parent)], vec![])
    }

    fn quad_geometry(id: i64) -> FbxNode {
        n(
            "Geometry",
            vec![Property::I64(id), s("Quad\0\u{1}Geometry"), s("Mesh")],
            vec![
                n(
                    "Vertices",
                    vec![Property::F64Array(vec![
                        0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0,
                    ])],
                    vec![],
                ),
                n("PolygonVertexIndex", vec![Property::I32Array(vec![0, 1, 2, -4])], vec![]),
            ],
        )
    }

    fn model(id: i64, name: &str, class: &str, props: Vec<FbxNode>) -> FbxNode {
        n(
            "Model",
            vec![Property::I64(id), s(&format!("{name}\0\u{1}Model")), s(class)],
            vec![n("Properties70", vec![], props)],
        )
    }

    fn cube_document() -> Vec<FbxNode> {
        vec![
            n("FBXHeaderExtension", vec![], vec![n("FBXVersion", vec![Property::I32(7400)], vec![])]),
            n(
                "Objects",
                vec![],
                vec![
                    quad_geometry(100),
                    model(
                        200,
                        "Cube",
                        "Mesh",
                        vec![p70("Lcl Translation", "Lcl Translation", [1.0, 2.0, 3.0])],
                    ),
                    n(
                        "Material",
                        vec![Property::I64(300), s("Green\0\u{1}Material"), s("")],
                        vec![n(
                            "Properties70",
                            vec![],
                            vec![p70("DiffuseColor", "Color", [0.0, 1.0, 0.0])],
                        )],
                    ),
                ],
            ),
            n(
                "Connections",
                vec![],
                vec![connect(100, 200), connect(200, 0), connect(300, 200)],
            ),
        ]
    }

    #[test]
    fn mesh_model_with_material() {
        let bytes = writer::write(7400, &cube_document(), false);
        let group = load("cube", &bytes).unwrap();

        assert_eq!(group.name, "cube");
        assert_eq!(group.children.len(), 1);
        let cube = &group.children[0];
        assert_eq!(cube.name, "Cube");
        assert_eq!(cube.local.position, Vector3::new(1.0, 2.0, 3.0));

        let mesh = cube.mesh().expect("model carries the geometry");
        assert_eq!(mesh.geometry.vertices.len(), 4);
        assert_eq!(mesh.geometry.indices, [0, 1, 2, 0, 2, 3]);
        assert_eq!(mesh.geometry.vertices[0].normal, [0.0, 0.0, 1.0]);
        assert_eq!(mesh.material.base_color, [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(mesh.material.name, "Green");
    }

    #[test]
    fn wide_headers_compressed_arrays_and_hierarchy() {
        let mut nodes = cube_document();
        let objects = &mut nodes[1].children;
        objects.push(model(
            400,
            "Pivot",
            "Null",
            vec![
                p70("Lcl Rotation", "Lcl Rotation", [0.0, 90.0, 0.0]),
                p70("Lcl Scaling", "Lcl Scaling", [2.0, 2.0, 2.0]),
            ],
        ));
        nodes[2].children = vec![connect(100, 200), connect(400, 0), connect(200, 400)];

        let bytes = writer::write(7500, &nodes, true);
        let document = parse(&bytes).unwrap();
        assert_eq!(document.version, 7500);

        let group = to_scene("rig", &document).unwrap();
        assert_eq!(group.children.len(), 1);
        let pivot = &group.children[0];
        assert_eq!(pivot.name, "Pivot");
        assert!(matches!(pivot.kind, NodeKind::Group));
        assert_eq!(pivot.local.scale, Vector3::new(2.0, 2.0, 2.0));
        assert_eq!(pivot.children.len(), 1);
        assert!(pivot.children[0].mesh().is_some());

        let world = &pivot.local * &pivot.children[0].local;
        let expected = Vector3::new(6.0, 4.0, -2.0);
        assert!((world.position - expected).magnitude2() < 1e-6, "{:?}", world.position);
    }

    #[test]
    fn ascii_files_are_rejected() {
        let ascii = b"; FBX 7.4.0 project file\nFBXHeaderExtension:  {\n}";
        let err = load("ascii", ascii).unwrap_err();
        assert!(err.to_string().contains("ASCII"), "{err}");
    }

    #[test]
    fn truncated_files_fail_cleanly() {
        let bytes = writer::write(7400, &cube_document(), false);
        for len in [10, HEADER_LEN + 5, bytes.len() / 2] {
            assert!(load("cut", &bytes[..len]).is_err(), "len {len}");
        }
    }

    #[test]
    fn nesting_beyond_the_limit_is_an_error() {
        let mut deep = n("Leaf", vec![], vec![]);
        for _ in 0..MAX_NODE_DEPTH + 8 {
            deep = n("N", vec![], vec![deep]);
        }
        let bytes = writer::write(7400, &[deep], false);
        let err = parse(&bytes).unwrap_err();
        assert!(err.to_string().contains("nested deeper"), "{err}");

        let mut shallow = n("Leaf", vec![], vec![]);
        for _ in 0..MAX_NODE_DEPTH - 2 {
            shallow = n("N", vec![], vec![shallow]);
        }
        assert!(parse(&writer::write(7400, &[shallow], false)).is_ok());
    }

    #[test]
    fn model_chains_beyond_the_limit_are_an_error() {
        let count = MAX_NODE_DEPTH as i64 + 8;
        let models = (1..=count)
            .map(|id| n("Model", vec![Property::I64(id), s("M\0\u{1}Model"), s("Null")], vec![]))
            .collect();
        let connections = std::iter::once(connect(1, 0))
            .chain((2..=count).map(|id| connect(id, id - 1)))
            .collect();
        let document = FbxDocument {
            version: 7400,
            nodes: vec![n("Objects", vec![], models), n("Connections", vec![], connections)],
        };
        let err = to_scene("chain", &document).unwrap_err();
        assert!(err.to_string().contains("hierarchy deeper"), "{err}");
    }

    #[test]
    fn forged_array_counts_are_an_error() {
        let mut property = vec![b'd'];
        property.extend_from_slice(&u32::MAX.to_le_bytes());
        property.extend_from_slice(&1u32.to_le_bytes());
        property.extend_from_slice(&2u32.to_le_bytes());
        property.extend_from_slice(&[0x78, 0x9c]);
        let mut reader = Reader {
            data: &property,
            pos: 0,
            wide: false,
        };
        assert!(reader.property().is_err());
    }

    #[test]
    fn indexed_uv_layer() {
        let mut geometry = quad_geometry(1);
        geometry.children.push(n(
            "LayerElementUV",
            vec![Property::I32(0)],
            vec![
                n("MappingInformationType", vec![s("ByPolygonVertex")], vec![]),
                n("ReferenceInformationType", vec![s("IndexToDirect")], vec![]),
                n("UV", vec![Property::F64Array(vec![0.0, 0.0, 1.0, 1.0])], vec![]),
                n("UVIndex", vec![Property::I32Array(vec![0, 1, 1, 0])], vec![]),
            ],
        ));
        let built = build_geometry("quad", &geometry).unwrap();
        let uvs: Vec<_> = built.vertices.iter().map(|v| v.tex_coords).collect();
        assert_eq!(uvs, [[0.0, 1.0], [1.0, 0.0], [1.0, 0.0], [0.0, 1.0]]);
    }
}
