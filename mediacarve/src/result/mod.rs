//! Parse results.
//!
//! Carvers describe what they found as a tree of [`ResultNode`]s. Each node is
//! assembled by a [`ResultBuilder`] while its header is being parsed and frozen
//! into the [`ResultTree`] arena once the header is complete.

pub mod attribute;
pub mod builder;
pub mod tree;

use std::fmt::{self, Display};

use crate::formats::h264::H264Header;
use crate::formats::mpeg_system::SystemHeader;
use crate::formats::mpeg2_video::Mpeg2VideoHeader;

pub use mediacarve_macros::Named;

pub use attribute::{Attribute, AttributeName, AttributeValue, ValueFormat};
pub use builder::ResultBuilder;
pub use tree::{NodeId, ResultNode, ResultTree};

/// Display name of a header or attribute kind.
///
/// Implemented with `#[derive(Named)]` for the per-format name enums.
pub trait Named {
    fn name(&self) -> &'static str;
}

/// Name of a parsed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderName {
    Mpeg2Video(Mpeg2VideoHeader),
    H264(H264Header),
    MpegSystem(SystemHeader),
    /// Headers of carvers outside the built-in formats.
    Raw(&'static str),
}

impl Named for HeaderName {
    fn name(&self) -> &'static str {
        match self {
            HeaderName::Mpeg2Video(h) => h.name(),
            HeaderName::H264(h) => h.name(),
            HeaderName::MpegSystem(h) => h.name(),
            HeaderName::Raw(s) => s,
        }
    }
}

impl Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Mpeg2VideoHeader> for HeaderName {
    fn from(h: Mpeg2VideoHeader) -> Self {
        HeaderName::Mpeg2Video(h)
    }
}

impl From<H264Header> for HeaderName {
    fn from(h: H264Header) -> Self {
        HeaderName::H264(h)
    }
}

impl From<SystemHeader> for HeaderName {
    fn from(h: SystemHeader) -> Self {
        HeaderName::MpegSystem(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::FormatId;

    fn leaf(tree: &mut ResultTree, name: &'static str, offset: u64, length: u64) -> NodeId {
        tree.insert(ResultBuilder::new(HeaderName::Raw(name), offset, FormatId::Mpeg2Video).build(length))
    }

    #[test]
    fn spans_cover_logical_children() {
        let mut tree = ResultTree::default();
        let seq = leaf(&mut tree, "seq", 0, 12);
        tree.attach_root(seq);
        let gop = leaf(&mut tree, "gop", 12, 8);
        tree.attach_child(seq, gop);
        let pic = leaf(&mut tree, "pic", 20, 8);
        tree.attach_child(gop, pic);

        assert_eq!(tree.span(seq), 0..28);
        assert_eq!(tree.span(gop), 12..28);
        assert_eq!(tree.node(seq).length, 12);
        assert_eq!(tree.parent(pic).map(|n| n.name), Some(HeaderName::Raw("gop")));

        let order: Vec<_> = tree.walk().map(|(depth, id)| (depth, tree.node(id).offset)).collect();
        assert_eq!(order, vec![(0, 0), (1, 12), (2, 20)]);
    }

    #[test]
    fn truncation_drops_late_nodes() {
        let mut tree = ResultTree::default();
        let seq = leaf(&mut tree, "seq", 0, 12);
        tree.attach_root(seq);
        let gop = leaf(&mut tree, "gop", 12, 8);
        tree.attach_child(seq, gop);
        let tail = leaf(&mut tree, "tail", 40, 4);
        tree.attach_root(tail);

        let cut = tree.truncated(20);
        assert_eq!(cut.roots().len(), 1);
        assert_eq!(cut.len(), 2);
        let root = cut.roots()[0];
        assert_eq!(cut.span(root), 0..20);
        assert!(cut.find(HeaderName::Raw("tail")).is_none());
    }

    #[test]
    fn truncation_clamps_straddling_nodes() {
        let mut tree = ResultTree::default();
        let seq = leaf(&mut tree, "seq", 0, 12);
        tree.attach_root(seq);
        let gop = leaf(&mut tree, "gop", 12, 8);
        tree.attach_child(seq, gop);

        let cut = tree.truncated(16);
        let root = cut.roots()[0];
        assert_eq!(cut.span(root), 0..16);
        let gop = cut.node(root).children()[0];
        assert_eq!(cut.node(gop).length, 4);
        assert_eq!(cut.span(gop), 12..16);

        let cut = tree.truncated(8);
        assert_eq!(cut.len(), 1);
        assert_eq!(cut.span(cut.roots()[0]), 0..8);
    }
}
