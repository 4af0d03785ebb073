//! Nested-parse protocol.
//!
//! [`ReaderState`] owns the bitstream reader, the stack of headers currently
//! being parsed and the result tree they are frozen into. A header is parsed
//! by handing a closure to [`ReaderState::parse`]; anything the closure adds
//! lands on the innermost open header, and nested `parse` calls open child
//! headers. The stack is restored when the closure returns, whatever it
//! returns.

use std::io;

use log::{Level, debug, trace};

use crate::formats::FormatId;
use crate::result::attribute::{AttributeName, AttributeValue, Plain, ValueFormat};
use crate::result::{HeaderName, NodeId, ResultBuilder, ResultTree};
use crate::utils::bitstream_io::BitstreamReader;

/// A reader over bytes derived from the input, such as a payload with escape
/// bytes removed, that knows where its positions lie in the input.
pub trait MappedReader {
    /// Input offset of the byte under the cursor.
    fn input_position(&mut self) -> io::Result<u64>;

    /// Input offset just past every bit read so far.
    fn input_end_position(&mut self) -> io::Result<u64>;
}

#[derive(Debug)]
pub struct ReaderState<'a> {
    reader: BitstreamReader<'a>,
    stack: Vec<ResultBuilder>,
    tree: ResultTree,
    /// Cleared when a top-level header closes invalid.
    valid: bool,
    /// Set by a carver that wants the chain to end after a valid header.
    stopped: bool,
    last_attached: Option<NodeId>,
    last_valid_end: u64,
    header_count: usize,
    fail_level: Level,
    detector: FormatId,
}

impl<'a> ReaderState<'a> {
    pub fn new(reader: BitstreamReader<'a>, detector: FormatId, fail_level: Level) -> Self {
        Self {
            reader,
            stack: Vec::new(),
            tree: ResultTree::default(),
            valid: true,
            stopped: false,
            last_attached: None,
            last_valid_end: 0,
            header_count: 0,
            fail_level,
            detector,
        }
    }

    #[inline(always)]
    pub fn reader(&mut self) -> &mut BitstreamReader<'a> {
        &mut self.reader
    }

    pub fn data_len(&self) -> u64 {
        self.reader.len()
    }

    pub fn fail_level(&self) -> Level {
        self.fail_level
    }

    pub fn detector(&self) -> FormatId {
        self.detector
    }

    /// Number of headers attached at the top level since the block began.
    pub fn header_count(&self) -> usize {
        self.header_count
    }

    /// End of the last top-level header that closed valid.
    pub fn last_valid_end(&self) -> u64 {
        self.last_valid_end
    }

    /// Nesting depth of the header being parsed, 0 outside of any `parse`.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Name of the innermost open header.
    pub fn current(&self) -> Option<HeaderName> {
        self.stack.last().map(ResultBuilder::name)
    }

    /// Parses one header nested in the innermost open header.
    ///
    /// Returns whether the header closed valid. Nothing is attached when the
    /// reader did not move, or when the enclosing header is already invalid.
    pub fn parse<F>(&mut self, name: impl Into<HeaderName>, f: F) -> bool
    where
        F: FnOnce(&mut ReaderState<'a>) -> anyhow::Result<()>,
    {
        self.parse_with_parents(name, &[], f)
    }

    /// Like [`parse`](Self::parse), but a top-level header is listed under the
    /// most recently attached header named in `parents` instead of the root.
    pub fn parse_with_parents<F>(&mut self, name: impl Into<HeaderName>, parents: &[HeaderName], f: F) -> bool
    where
        F: FnOnce(&mut ReaderState<'a>) -> anyhow::Result<()>,
    {
        let name = name.into();
        let start = match self.reader.position() {
            Ok(start) => start,
            Err(e) => {
                debug!("{name}: {e}");
                self.invalidate();
                return false;
            }
        };

        self.stack.push(ResultBuilder::new(name, start, self.detector));
        let outcome = f(self);
        let end = self.reader.end_position().unwrap_or(start);
        self.close(outcome, end, parents)
    }

    /// Parses a nested header from a reader over data derived from the input.
    ///
    /// The header's byte range is taken from `reader`, translated back to
    /// input offsets. Attributes and nested headers work as in [`parse`](Self::parse).
    pub fn parse_mapped<R, F>(&mut self, name: impl Into<HeaderName>, reader: &mut R, f: F) -> bool
    where
        R: MappedReader,
        F: FnOnce(&mut ReaderState<'a>, &mut R) -> anyhow::Result<()>,
    {
        let name = name.into();
        let start = match reader.input_position() {
            Ok(start) => start,
            Err(e) => {
                debug!("{name}: {e}");
                self.invalidate();
                return false;
            }
        };

        self.stack.push(ResultBuilder::new(name, start, self.detector));
        let outcome = f(self, reader);
        let end = reader.input_end_position().unwrap_or(start);
        self.close(outcome, end, &[])
    }

    /// Pops the innermost header and attaches it.
    fn close(&mut self, outcome: anyhow::Result<()>, end: u64, parents: &[HeaderName]) -> bool {
        let Some(mut builder) = self.stack.pop() else {
            return false;
        };
        let name = builder.name();
        let start = builder.offset();

        if let Err(e) = outcome {
            debug!("{name} at {start:#X}: {e:#}");
            builder.invalidate();
        }

        let valid = builder.is_valid();
        if end <= start {
            if !valid {
                match self.stack.last_mut() {
                    Some(parent) => parent.invalidate(),
                    None => self.valid = false,
                }
            }
            return false;
        }

        let parent_valid = self.stack.last().map_or(self.valid, ResultBuilder::is_valid);
        if !parent_valid {
            trace!("{name} at {start:#X} dropped, enclosing header is invalid");
            return false;
        }

        let id = self.tree.insert(builder.build(end - start));
        match self.stack.last_mut() {
            Some(parent) => {
                parent.add_child(id);
                if !valid {
                    parent.invalidate();
                }
            }
            None => {
                match self.logical_parent(parents) {
                    Some(parent) => self.tree.attach_child(parent, id),
                    None => self.tree.attach_root(id),
                }
                self.last_attached = Some(id);
                self.header_count += 1;
                if valid {
                    self.last_valid_end = end;
                } else {
                    self.valid = false;
                }
            }
        }

        valid
    }

    fn logical_parent(&self, parents: &[HeaderName]) -> Option<NodeId> {
        if parents.is_empty() {
            return None;
        }

        let mut candidate = self.last_attached;
        while let Some(id) = candidate {
            let node = self.tree.node(id);
            if parents.contains(&node.name) {
                return Some(id);
            }
            candidate = node.parent();
        }
        None
    }

    pub fn add_attribute(&mut self, name: impl Into<AttributeName>, value: impl Into<AttributeValue>) {
        match self.stack.last_mut() {
            Some(builder) => builder.add_attribute(name.into(), value.into()),
            None => debug!("attribute {} outside of any header", name.into()),
        }
    }

    /// Adds an attribute checked by `format`. Returns whether the value passed.
    pub fn add_formatted(
        &mut self,
        name: impl Into<AttributeName>,
        value: impl Into<AttributeValue>,
        format: &dyn ValueFormat,
    ) -> bool {
        match self.stack.last_mut() {
            Some(builder) => builder.add_formatted(name.into(), value.into(), format),
            None => {
                let valid = format.is_valid(&value.into());
                if !valid {
                    self.valid = false;
                }
                valid
            }
        }
    }

    /// Reads `bits` bits and records them as an attribute.
    pub fn read_attribute(&mut self, name: impl Into<AttributeName>, bits: u32) -> io::Result<u32> {
        self.read_formatted(name, bits, &Plain)
    }

    pub fn read_formatted(
        &mut self,
        name: impl Into<AttributeName>,
        bits: u32,
        format: &dyn ValueFormat,
    ) -> io::Result<u32> {
        let value = self.reader.get_bits(bits)?;
        self.add_formatted(name, value, format);
        Ok(value)
    }

    pub fn read_flag(&mut self, name: impl Into<AttributeName>) -> io::Result<bool> {
        let value = self.reader.get()?;
        self.add_attribute(name, value);
        Ok(value)
    }

    pub fn read_ue(&mut self, name: impl Into<AttributeName>) -> io::Result<u32> {
        let value = self.reader.ue()?;
        self.add_attribute(name, value);
        Ok(value)
    }

    pub fn read_se(&mut self, name: impl Into<AttributeName>) -> io::Result<i32> {
        let value = self.reader.se()?;
        self.add_attribute(name, value);
        Ok(value)
    }

    /// Invalidates the innermost open header, or the chain when none is open.
    pub fn invalidate(&mut self) {
        match self.stack.last_mut() {
            Some(builder) => builder.invalidate(),
            None => self.valid = false,
        }
    }

    /// Undoes the invalidation of the innermost open header.
    ///
    /// Used by containers that tolerate a malformed child because they frame
    /// their payload themselves.
    pub fn recover(&mut self) {
        match self.stack.last_mut() {
            Some(builder) => builder.recover(),
            None => self.valid = true,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.stack.last().map_or(self.valid, ResultBuilder::is_valid)
    }

    /// Whether the carve loop should try another header.
    pub fn is_chain_open(&self) -> bool {
        self.valid && !self.stopped
    }

    /// Ends the chain after the current header without invalidating anything.
    pub fn end_chain(&mut self) {
        self.stopped = true;
    }

    /// Starts a new block at the current reader position.
    pub fn begin_block(&mut self) {
        self.reset();
        self.last_valid_end = self.reader.position().unwrap_or(0);
    }

    /// Forgets every header parsed since the block began.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.tree = ResultTree::default();
        self.valid = true;
        self.stopped = false;
        self.last_attached = None;
        self.last_valid_end = 0;
        self.header_count = 0;
    }

    /// Hands out the headers parsed so far that start before `end`.
    pub fn take_results(&mut self, end: u64) -> ResultTree {
        let tree = std::mem::take(&mut self.tree);
        self.reset();
        tree.truncated(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::attribute::Reserved;

    const A: HeaderName = HeaderName::Raw("a");
    const B: HeaderName = HeaderName::Raw("b");
    const C: HeaderName = HeaderName::Raw("c");

    fn state(data: &[u8]) -> ReaderState<'_> {
        ReaderState::new(BitstreamReader::new(data), FormatId::MpegSystem, Level::Error)
    }

    #[test]
    fn nested_headers_follow_the_bitstream() {
        let data = [0xFFu8; 8];
        let mut state = state(&data);

        assert!(state.parse(A, |s| {
            s.read_attribute("first".to_owned(), 8)?;
            s.parse(B, |s| {
                s.read_attribute("inner".to_owned(), 16)?;
                Ok(())
            });
            Ok(())
        }));

        let tree = state.take_results(8);
        let root = tree.roots()[0];
        assert_eq!(tree.span(root), 0..3);
        let child = tree.node(root).children()[0];
        assert_eq!(tree.node(child).offset, 1);
        assert_eq!(tree.node(child).length, 2);
        assert_eq!(tree.parent(child).map(|n| n.name), Some(A));
    }

    #[test]
    fn invalid_child_poisons_every_ancestor() {
        let data = [0x00u8; 8];
        let mut state = state(&data);

        let valid = state.parse(A, |s| {
            s.parse(B, |s| {
                s.parse(C, |s| {
                    s.read_formatted("reserved".to_owned(), 4, &Reserved(0xF))?;
                    Ok(())
                });
                s.reader().skip_n(4)?;
                Ok(())
            });
            Ok(())
        });

        assert!(!valid);
        assert!(!state.is_chain_open());

        let tree = state.take_results(8);
        let a = tree.roots()[0];
        let b = tree.node(a).children()[0];
        let c = tree.node(b).children()[0];
        assert!(!tree.node(a).valid);
        assert!(!tree.node(b).valid);
        assert!(!tree.node(c).valid);
    }

    #[test]
    fn empty_invalid_child_poisons_its_parent() {
        let data = [0x00u8; 8];
        let mut state = state(&data);

        let valid = state.parse(A, |s| {
            s.reader().skip_n(8)?;
            assert!(!s.parse(B, |s| {
                s.invalidate();
                Ok(())
            }));
            Ok(())
        });

        assert!(!valid);
        assert!(!state.is_chain_open());

        let tree = state.take_results(8);
        let a = tree.roots()[0];
        assert!(!tree.node(a).valid);
        assert!(tree.node(a).children().is_empty());
    }

    #[test]
    fn recover_restores_the_immediate_container_only() {
        let data = [0x00u8; 8];
        let mut state = state(&data);

        let valid = state.parse(A, |s| {
            s.parse(B, |s| {
                s.parse(C, |s| {
                    s.reader().skip_n(8)?;
                    s.invalidate();
                    Ok(())
                });
                s.recover();
                Ok(())
            });
            Ok(())
        });

        assert!(valid);
        let tree = state.take_results(8);
        let a = tree.roots()[0];
        let b = tree.node(a).children()[0];
        let c = tree.node(b).children()[0];
        assert!(tree.node(a).valid);
        assert!(tree.node(b).valid);
        assert!(!tree.node(c).valid);
    }

    #[test]
    fn read_past_end_invalidates_instead_of_failing() {
        let data = [0xABu8];
        let mut state = state(&data);

        let valid = state.parse(A, |s| {
            s.read_attribute("byte".to_owned(), 8)?;
            s.read_attribute("missing".to_owned(), 8)?;
            Ok(())
        });

        assert!(!valid);
        assert!(!state.is_chain_open());
        let tree = state.take_results(1);
        assert_eq!(tree.len(), 1);
        assert!(!tree.node(tree.roots()[0]).valid);
    }

    #[test]
    fn empty_parse_attaches_nothing() {
        let data = [0x00u8; 2];
        let mut state = state(&data);

        assert!(!state.parse(A, |_| Ok(())));
        assert!(state.is_chain_open());
        assert!(!state.parse(A, |_| anyhow::bail!("no header here")));
        assert!(!state.is_chain_open());
        assert!(state.take_results(2).is_empty());
    }

    #[test]
    fn logical_parents_are_found_by_walking_up() {
        let data = [0u8; 4];
        let mut state = state(&data);
        let skip = |s: &mut ReaderState| -> anyhow::Result<()> {
            s.reader().skip_n(8)?;
            Ok(())
        };

        state.parse(A, skip);
        state.parse_with_parents(B, &[A], skip);
        state.parse_with_parents(C, &[B], skip);
        // A second C hangs off the same B, not off the first C.
        state.parse_with_parents(C, &[B], skip);
        assert_eq!(state.header_count(), 4);
        assert_eq!(state.last_valid_end(), 4);

        let tree = state.take_results(4);
        assert_eq!(tree.roots().len(), 1);
        let a = tree.roots()[0];
        let b = tree.node(a).children()[0];
        assert_eq!(tree.node(b).children().len(), 2);
        assert_eq!(tree.span(a), 0..4);
        assert_eq!(tree.span(b), 1..4);
    }

    /// A view of the input starting at `base`.
    struct Window<'a> {
        reader: BitstreamReader<'a>,
        base: u64,
    }

    impl MappedReader for Window<'_> {
        fn input_position(&mut self) -> io::Result<u64> {
            Ok(self.base + self.reader.position()?)
        }

        fn input_end_position(&mut self) -> io::Result<u64> {
            Ok(self.base + self.reader.end_position()?)
        }
    }

    #[test]
    fn mapped_headers_get_input_offsets() {
        let data = [0u8; 8];
        let mut state = state(&data);
        let mut window = Window {
            reader: BitstreamReader::new(&data[4..]),
            base: 4,
        };

        assert!(state.parse(A, |s| {
            s.reader().skip_n(64)?;
            s.parse_mapped(B, &mut window, |_, w| {
                w.reader.skip_n(12)?;
                Ok(())
            });
            Ok(())
        }));

        let tree = state.take_results(8);
        let a = tree.roots()[0];
        let b = tree.node(a).children()[0];
        assert_eq!(tree.span(b), 4..6);
        assert_eq!(tree.span(a), 0..8);
    }
}
