//! Arena-backed component tree.
//!
//! Nodes are addressed by stable indices and parent links are indices as
//! well, so the tree never contains owning back-references. Paths are
//! derived from the parent chain on demand.

use std::ops::{Index, IndexMut};

use crate::error::{Error, Result};

/// Index of a node in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

pub struct Node<K> {
    pub name: String,
    pub parent: Option<NodeId>,
    pub kind: K,
}

/// Append-only arena. Nodes are never freed; the tree lives as long as its model.
pub struct Arena<K> {
    nodes: Vec<Node<K>>,
}

impl<K> Arena<K> {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn alloc(&mut self, name: impl Into<String>, parent: Option<NodeId>, kind: K) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            name: name.into(),
            parent,
            kind,
        });
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&Node<K>> {
        self.nodes.get(id.index())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node<K>> {
        self.nodes.get_mut(id.index())
    }

    pub fn is_valid(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// Re-parent a node. Fails if `parent` is the node itself or one of its descendants.
    pub fn set_parent(&mut self, id: NodeId, parent: NodeId) -> Result<()> {
        if !self.is_valid(id) || !self.is_valid(parent) {
            return Err(Error::fatal("Unknown tree node."));
        }
        if self.ancestors_or_self(parent).any(|ancestor| ancestor == id) {
            return Err(Error::fatal_at(
                &self.path(id),
                format!("Setting parent \"{}\" would create a cycle.", self.path(parent)),
            ));
        }
        self[id].parent = Some(parent);
        Ok(())
    }

    /// The node itself and then every ancestor up to the root.
    pub fn ancestors_or_self(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), move |current| {
            self.get(*current).and_then(|node| node.parent)
        })
    }

    /// Nearest strict ancestor whose kind satisfies `matches`.
    pub fn find_ancestor(&self, id: NodeId, mut matches: impl FnMut(&K) -> bool) -> Option<NodeId> {
        self.ancestors_or_self(id)
            .skip(1)
            .find(|ancestor| matches(&self[*ancestor].kind))
    }

    /// Nearest node, starting with `id` itself, whose kind satisfies `matches`.
    pub fn find_self_or_ancestor(&self, id: NodeId, mut matches: impl FnMut(&K) -> bool) -> Option<NodeId> {
        self.ancestors_or_self(id)
            .find(|ancestor| matches(&self[*ancestor].kind))
    }

    /// Full path, `"/" + name` segments from the root down.
    pub fn path(&self, id: NodeId) -> String {
        let mut names: Vec<&str> = self
            .ancestors_or_self(id)
            .filter_map(|ancestor| self.get(ancestor).map(|node| node.name.as_str()))
            .collect();
        names.reverse();
        let mut path = String::new();
        for name in names {
            path.push('/');
            path.push_str(name);
        }
        path
    }
}

impl<K> Default for Arena<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Index<NodeId> for Arena<K> {
    type Output = Node<K>;

    fn index(&self, id: NodeId) -> &Self::Output {
        &self.nodes[id.index()]
    }
}

impl<K> IndexMut<NodeId> for Arena<K> {
    fn index_mut(&mut self, id: NodeId) -> &mut Self::Output {
        &mut self.nodes[id.index()]
    }
}
