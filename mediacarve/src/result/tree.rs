//! Result tree: an arena of parsed headers.
//!
//! Nodes are addressed by [`NodeId`]. A node keeps its parent as an index,
//! so the tree has no reference cycles and parent lookup stays O(1).

use std::ops::Range;

use crate::formats::FormatId;
use crate::result::attribute::{Attribute, AttributeName};
use crate::result::HeaderName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One parsed header.
///
/// `offset..offset + length` is the header's own byte range. Children can lie
/// after it (an MPEG picture is listed under its GOP header even though the
/// bytes follow the GOP header), so [`ResultTree::span`] gives the range that
/// covers the whole subtree.
#[derive(Debug, Clone)]
pub struct ResultNode {
    pub name: HeaderName,
    pub attributes: Vec<Attribute>,
    pub offset: u64,
    pub length: u64,
    pub valid: bool,
    pub detector: FormatId,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    extent_end: u64,
}

impl ResultNode {
    pub(crate) fn new(
        name: HeaderName,
        attributes: Vec<Attribute>,
        children: Vec<NodeId>,
        offset: u64,
        length: u64,
        valid: bool,
        detector: FormatId,
    ) -> Self {
        Self {
            name,
            attributes,
            offset,
            length,
            valid,
            detector,
            children,
            parent: None,
            extent_end: offset + length,
        }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn attribute(&self, name: &AttributeName) -> Option<&Attribute> {
        self.attributes.iter().find(|a| &a.name == name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResultTree {
    nodes: Vec<ResultNode>,
    roots: Vec<NodeId>,
}

impl ResultTree {
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> &ResultNode {
        &self.nodes[id.0]
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &ResultNode> {
        self.nodes[id.0].children.iter().map(|c| &self.nodes[c.0])
    }

    pub fn parent(&self, id: NodeId) -> Option<&ResultNode> {
        self.nodes[id.0].parent.map(|p| &self.nodes[p.0])
    }

    /// Byte range covering the node and all of its descendants.
    pub fn span(&self, id: NodeId) -> Range<u64> {
        let node = &self.nodes[id.0];
        node.offset..node.extent_end
    }

    /// Depth-first, pre-order walk yielding `(depth, id)`.
    pub fn walk(&self) -> impl Iterator<Item = (usize, NodeId)> + '_ {
        let mut stack: Vec<(usize, NodeId)> = self.roots.iter().rev().map(|&r| (0, r)).collect();
        std::iter::from_fn(move || {
            let (depth, id) = stack.pop()?;
            stack.extend(
                self.nodes[id.0]
                    .children
                    .iter()
                    .rev()
                    .map(|&c| (depth + 1, c)),
            );
            Some((depth, id))
        })
    }

    /// First node, in walk order, with the given name.
    pub fn find(&self, name: HeaderName) -> Option<NodeId> {
        self.walk()
            .map(|(_, id)| id)
            .find(|&id| self.nodes[id.0].name == name)
    }

    /// Stores a frozen node whose children are already in the arena.
    pub(crate) fn insert(&mut self, node: ResultNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        let mut extent_end = node.extent_end;
        for &child in &node.children {
            let child = &mut self.nodes[child.0];
            child.parent = Some(id);
            extent_end = extent_end.max(child.extent_end);
        }
        self.nodes.push(ResultNode { extent_end, ..node });
        id
    }

    pub(crate) fn attach_root(&mut self, id: NodeId) {
        self.roots.push(id);
    }

    /// Attaches an already stored node under a logical parent.
    pub(crate) fn attach_child(&mut self, parent: NodeId, id: NodeId) {
        let extent_end = self.nodes[id.0].extent_end;
        self.nodes[id.0].parent = Some(parent);
        self.nodes[parent.0].children.push(id);

        let mut ancestor = Some(parent);
        while let Some(a) = ancestor {
            let node = &mut self.nodes[a.0];
            node.extent_end = node.extent_end.max(extent_end);
            ancestor = node.parent;
        }
    }

    /// Copy of the tree without the nodes starting at or after `end`.
    ///
    /// Kept nodes reaching past `end` are cut short, and spans are recomputed.
    pub fn truncated(&self, end: u64) -> ResultTree {
        let mut tree = ResultTree::default();
        for &root in &self.roots {
            if let Some(id) = self.copy_subtree(root, end, &mut tree) {
                tree.roots.push(id);
            }
        }
        tree
    }

    fn copy_subtree(&self, id: NodeId, end: u64, into: &mut ResultTree) -> Option<NodeId> {
        let node = &self.nodes[id.0];
        if node.offset >= end {
            return None;
        }

        let children = node
            .children
            .iter()
            .filter_map(|&c| self.copy_subtree(c, end, into))
            .collect();

        let length = node.length.min(end - node.offset);
        Some(into.insert(ResultNode {
            children,
            parent: None,
            length,
            extent_end: node.offset + length,
            ..node.clone()
        }))
    }
}
