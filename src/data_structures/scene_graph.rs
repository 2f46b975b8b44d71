//! Scene graph and hierarchical scene organization.
//!
//! Nodes live in an arena owned by [`SceneGraph`] and are addressed by
//! [`NodeId`]. Every node keeps its local transform next to a cached world
//! transform; changing a local transform pushes the new world transform down
//! the subtree so reads are always current.

use std::collections::HashMap;

use log::warn;

use crate::{
    data_structures::transform::Transform,
    error::{EngineError, Result},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
pub struct SceneNode {
    pub name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// (local, world)
    transform: (Transform, Transform),
    visible: bool,
}

impl SceneNode {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn local_transform(&self) -> &Transform {
        &self.transform.0
    }

    pub fn world_transform(&self) -> &Transform {
        &self.transform.1
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }
}

#[derive(Debug)]
pub struct SceneGraph {
    nodes: HashMap<NodeId, SceneNode>,
    root: NodeId,
    next_id: u64,
    alive: bool,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph {
    pub fn new() -> Self {
        let root = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            SceneNode {
                name: "root".to_string(),
                parent: None,
                children: Vec::new(),
                transform: (Transform::default(), Transform::default()),
                visible: true,
            },
        );
        Self {
            nodes,
            root,
            next_id: 1,
            alive: true,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of nodes, the root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn create_child(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        if !self.alive {
            return Err(EngineError::ContextPrecondition(
                "scene graph has been shut down".to_string(),
            ));
        }
        let parent_world = match self.nodes.get(&parent) {
            Some(node) => node.transform.1,
            None => {
                return Err(EngineError::ContextPrecondition(format!(
                    "parent node {:?} does not exist",
                    parent
                )));
            }
        };
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            SceneNode {
                name: name.to_string(),
                parent: Some(parent),
                children: Vec::new(),
                transform: (Transform::default(), parent_world),
                visible: true,
            },
        );
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.push(id);
        }
        Ok(id)
    }

    /// Destroys `id` and its whole subtree. The root cannot be destroyed.
    pub fn destroy(&mut self, id: NodeId) {
        if id == self.root {
            warn!("you tried to destroy the scene root");
            return;
        }
        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        if let Some(parent) = node.parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|c| *c != id);
        }
        for child in node.children {
            self.destroy_detached(child);
        }
    }

    fn destroy_detached(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.remove(&id) {
            for child in node.children {
                self.destroy_detached(child);
            }
        }
    }

    pub fn set_local_transform(&mut self, id: NodeId, transform: Transform) {
        let parent_world = match self.nodes.get(&id) {
            Some(node) => node
                .parent
                .and_then(|p| self.nodes.get(&p))
                .map(|p| p.transform.1)
                .unwrap_or_default(),
            None => {
                warn!("you tried to transform node {:?}, which does not exist", id);
                return;
            }
        };
        if let Some(node) = self.nodes.get_mut(&id) {
            node.transform.0 = transform;
        }
        self.update_world_transforms(id, &parent_world);
    }

    pub fn local_transform(&self, id: NodeId) -> Option<Transform> {
        self.nodes.get(&id).map(|n| n.transform.0)
    }

    pub fn world_transform(&self, id: NodeId) -> Option<Transform> {
        self.nodes.get(&id).map(|n| n.transform.1)
    }

    /// Recomputes world transforms of `id` and its subtree from the parent's world transform.
    fn update_world_transforms(&mut self, id: NodeId, parent_world: &Transform) {
        let (world, children) = match self.nodes.get_mut(&id) {
            Some(node) => {
                node.transform.1 = parent_world * &node.transform.0;
                (node.transform.1, node.children.clone())
            }
            None => return,
        };
        for child in children {
            self.update_world_transforms(child, &world);
        }
    }

    pub fn set_visible(&mut self, id: NodeId, visible: bool) {
        match self.nodes.get_mut(&id) {
            Some(node) => node.visible = visible,
            None => warn!("you tried to change visibility of missing node {:?}", id),
        }
    }

    /// Effective visibility: the node and every ancestor must be visible.
    pub fn is_visible(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(cur) = current {
            match self.nodes.get(&cur) {
                Some(node) if node.visible => current = node.parent,
                _ => return false,
            }
        }
        true
    }

    /// Destroys every node except the root and refuses further creation.
    pub fn shutdown(&mut self) {
        let root = self.root;
        self.nodes.retain(|id, _| *id == root);
        if let Some(root) = self.nodes.get_mut(&root) {
            root.children.clear();
        }
        self.alive = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Vector3;

    #[test]
    fn world_transform_follows_parent_moves() {
        let mut graph = SceneGraph::new();
        let parent = graph.create_child(graph.root(), "parent").unwrap();
        let child = graph.create_child(parent, "child").unwrap();
        graph.set_local_transform(child, Vector3::new(0.0, 1.0, 0.0).into());
        graph.set_local_transform(parent, Vector3::new(5.0, 0.0, 0.0).into());
        let world = graph.world_transform(child).unwrap();
        assert_eq!(world.position, Vector3::new(5.0, 1.0, 0.0));
    }

    #[test]
    fn destroying_a_node_removes_its_subtree() {
        let mut graph = SceneGraph::new();
        let parent = graph.create_child(graph.root(), "parent").unwrap();
        let child = graph.create_child(parent, "child").unwrap();
        graph.destroy(parent);
        assert!(!graph.contains(child));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn shut_down_graph_refuses_new_nodes() {
        let mut graph = SceneGraph::new();
        graph.shutdown();
        assert!(graph.create_child(graph.root(), "late").is_err());
    }

    #[test]
    fn hidden_ancestor_hides_descendants() {
        let mut graph = SceneGraph::new();
        let parent = graph.create_child(graph.root(), "parent").unwrap();
        let child = graph.create_child(parent, "child").unwrap();
        graph.set_visible(parent, false);
        assert!(!graph.is_visible(child));
    }
}
