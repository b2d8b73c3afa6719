//! Scene graph and hierarchical scene organization.
//!
//! The [`SceneGraph`] owns an ordered list of root [`SceneNode`] trees. Every
//! root gets a [`NodeId`] on insertion and stays part of every traversal until
//! it is removed again. Nodes own their children; dropping a node drops its
//! whole subtree.

use std::fmt;

use crate::data_structures::{instance::Instance, model::Mesh};

/// Directional light payload. The light shines from the node's world position
/// towards the origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Light {
    pub color: [f32; 3],
    pub intensity: f32,
}

/// What a node contributes to the frame.
#[derive(Clone, Debug)]
pub enum NodeKind {
    Group,
    Mesh(Mesh),
    Light(Light),
    /// A viewpoint carried by a loaded asset. The viewer always renders
    /// through its own camera; these are kept so the hierarchy stays intact.
    Camera,
}

#[derive(Clone, Debug)]
pub struct SceneNode {
    pub name: String,
    pub local: Instance,
    pub kind: NodeKind,
    pub children: Vec<SceneNode>,
    /// Names of the animation clips shipped with a loaded asset. Only set on
    /// the root of a load; playback is not supported.
    pub animations: Vec<String>,
}

impl SceneNode {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            local: Instance::new(),
            kind,
            children: Vec::new(),
            animations: Vec::new(),
        }
    }

    /// An empty container node.
    pub fn group(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::Group)
    }

    pub fn with_transform(mut self, local: Instance) -> Self {
        self.local = local;
        self
    }

    pub fn add_child(&mut self, child: SceneNode) {
        self.children.push(child);
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.kind, NodeKind::Group) && self.children.is_empty()
    }

    pub fn mesh(&self) -> Option<&Mesh> {
        match &self.kind {
            NodeKind::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    /// Number of nodes in this subtree, `self` included.
    pub fn subtree_len(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(SceneNode::subtree_len)
            .sum::<usize>()
    }

    /// Depth-first pre-order walk handing out each node with its world transform.
    pub fn visit<'a>(&'a self, parent: &Instance, f: &mut dyn FnMut(&Instance, &'a SceneNode)) {
        let world = parent * &self.local;
        f(&world, self);
        for child in &self.children {
            child.visit(&world, f);
        }
    }

    pub fn find(&self, name: &str) -> Option<&SceneNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A mesh reached during traversal, with its composed world transform.
#[derive(Clone, Debug)]
pub struct DrawItem<'a> {
    pub world: Instance,
    pub mesh: &'a Mesh,
}

#[derive(Debug, Default)]
pub struct SceneGraph {
    roots: Vec<(NodeId, SceneNode)>,
    next_id: u64,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `node` as a new root. Traversal order follows insertion order.
    pub fn insert(&mut self, node: SceneNode) -> NodeId {
        self.next_id += 1;
        let id = NodeId(self.next_id);
        self.roots.push((id, node));
        id
    }

    pub fn remove(&mut self, id: NodeId) -> Option<SceneNode> {
        let idx = self.roots.iter().position(|(root, _)| *root == id)?;
        Some(self.roots.remove(idx).1)
    }

    pub fn get(&self, id: NodeId) -> Option<&SceneNode> {
        self.roots
            .iter()
            .find(|(root, _)| *root == id)
            .map(|(_, node)| node)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.roots
            .iter_mut()
            .find(|(root, _)| *root == id)
            .map(|(_, node)| node)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Number of root nodes.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&Instance, &'a SceneNode)) {
        let identity = Instance::new();
        for (_, root) in &self.roots {
            root.visit(&identity, f);
        }
    }

    /// All meshes in traversal order with their world transforms.
    pub fn draw_items(&self) -> Vec<DrawItem<'_>> {
        let mut items = Vec::new();
        self.visit(&mut |world, node| {
            if let NodeKind::Mesh(mesh) = &node.kind {
                items.push(DrawItem {
                    world: *world,
                    mesh,
                });
            }
        });
        items
    }

    /// The first light in traversal order with its world position.
    pub fn primary_light(&self) -> Option<(cgmath::Vector3<f32>, Light)> {
        let mut found = None;
        self.visit(&mut |world, node| {
            if found.is_some() {
                return;
            }
            if let NodeKind::Light(light) = &node.kind {
                found = Some((world.position, *light));
            }
        });
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::model::{Geometry, Material};

    fn mesh_node(name: &str) -> SceneNode {
        SceneNode::new(
            name,
            NodeKind::Mesh(Mesh::new(
                Geometry::new(name, Vec::new(), Vec::new()),
                Material::default(),
            )),
        )
    }

    #[test]
    fn inserted_roots_stay_until_removed() {
        let mut graph = SceneGraph::new();
        let a = graph.insert(mesh_node("a"));
        let b = graph.insert(SceneNode::group("b"));

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.draw_items().len(), 1);

        let removed = graph.remove(a).expect("a was inserted");
        assert_eq!(removed.name, "a");
        assert!(!graph.contains(a));
        assert!(graph.contains(b));
        assert!(graph.draw_items().is_empty());
        assert!(graph.remove(a).is_none());
    }

    #[test]
    fn traversal_composes_parent_transforms() {
        let mut parent =
            SceneNode::group("parent").with_transform(Instance::new().with_position([0.0, 1.0, 0.0]));
        parent.add_child(mesh_node("child").with_transform(Instance::new().with_position([2.0, 0.0, 0.0])));

        let mut graph = SceneGraph::new();
        graph.insert(parent);

        let items = graph.draw_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].world.position, cgmath::Vector3::new(2.0, 1.0, 0.0));
    }

    #[test]
    fn traversal_follows_insertion_order() {
        let mut graph = SceneGraph::new();
        graph.insert(mesh_node("first"));
        graph.insert(mesh_node("second"));

        let names: Vec<_> = graph
            .draw_items()
            .iter()
            .map(|item| item.mesh.geometry.name.clone())
            .collect();
        assert_eq!(names, ["first", "second"]);
    }

    #[test]
    fn primary_light_reports_world_position() {
        let light = Light {
            color: [1.0; 3],
            intensity: 2.0,
        };
        let mut graph = SceneGraph::new();
        graph.insert(
            SceneNode::new("sun", NodeKind::Light(light))
                .with_transform(Instance::new().with_position([1.0, 1.0, 1.0])),
        );
        let (position, found) = graph.primary_light().expect("light present");
        assert_eq!(position, cgmath::Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(found, light);
    }
}
