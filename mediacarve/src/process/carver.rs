//! Format plug-in contract and carved blocks.

use std::ops::Range;

use crate::formats::{CodecId, FormatId};
use crate::process::reader_state::ReaderState;
use crate::result::{AttributeName, HeaderName, ResultTree};
use crate::utils::bitstream_io::BitstreamReader;

/// Attribute shown as a table column for one header kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    pub header: HeaderName,
    pub attribute: AttributeName,
}

/// A format carver.
///
/// The carve loop drives it in three steps: [`carve`](Self::carve) finds a
/// candidate start, [`parse_header`](Self::parse_header) is called while the
/// chain stays open, and [`validate_data_block`](Self::validate_data_block)
/// accepts or rejects what was parsed.
pub trait DataBlockCarver {
    fn format(&self) -> FormatId;

    /// Clears per-block state. Called before every candidate.
    fn reset(&mut self);

    /// Moves the reader to the next possible header start before `offset_limit`.
    fn carve(&mut self, reader: &mut BitstreamReader<'_>, offset_limit: u64) -> bool;

    /// Parses exactly one header at the current position.
    fn parse_header(&mut self, state: &mut ReaderState<'_>);

    /// Inspects the chain parsed for `start..end` and fills in the block.
    fn validate_data_block(&mut self, block: &mut DataBlockBuilder, start: u64, end: u64) -> bool;

    fn columns(&self) -> Vec<Column> {
        Vec::new()
    }
}

/// Payload of one elementary stream inside a container block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodecStream {
    pub stream_id: u8,
    pub codec: CodecId,
    pub ranges: Vec<Range<u64>>,
}

impl CodecStream {
    pub fn new(stream_id: u8, codec: CodecId) -> Self {
        Self {
            stream_id,
            codec,
            ranges: Vec::new(),
        }
    }

    /// Appends a payload range, merging it with the previous one when adjacent.
    pub fn push_range(&mut self, range: Range<u64>) {
        if range.is_empty() {
            return;
        }
        match self.ranges.last_mut() {
            Some(last) if last.end == range.start => last.end = range.end,
            _ => self.ranges.push(range),
        }
    }

    pub fn len(&self) -> u64 {
        self.ranges.iter().map(|r| r.end - r.start).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Block fields a carver fills in during validation.
#[derive(Clone, Debug)]
pub struct DataBlockBuilder {
    pub format: FormatId,
    pub codec: CodecId,
    pub start: u64,
    pub end: u64,
    /// The chain was cut by a header limit and continues in the next block.
    pub is_fragmented: bool,
    pub codec_streams: Vec<CodecStream>,
}

impl DataBlockBuilder {
    pub fn new(format: FormatId, start: u64, end: u64) -> Self {
        Self {
            format,
            codec: CodecId::Unknown,
            start,
            end,
            is_fragmented: false,
            codec_streams: Vec::new(),
        }
    }

    pub fn build(self, results: ResultTree) -> DataBlock {
        DataBlock {
            format: self.format,
            codec: self.codec,
            start: self.start,
            end: self.end,
            is_fragmented: self.is_fragmented,
            fragment_index: 0,
            codec_streams: self.codec_streams,
            results,
        }
    }
}

/// A validated run of headers.
#[derive(Clone, Debug)]
pub struct DataBlock {
    pub format: FormatId,
    pub codec: CodecId,
    pub start: u64,
    pub end: u64,
    pub is_fragmented: bool,
    /// Position of the block in a chain of fragments, 0 for the first.
    pub fragment_index: usize,
    pub codec_streams: Vec<CodecStream>,
    pub results: ResultTree,
}

impl DataBlock {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn range(&self) -> Range<u64> {
        self.start..self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacent_payloads_merge() {
        let mut stream = CodecStream::new(0xE0, CodecId::Mpeg2Video);
        stream.push_range(10..20);
        stream.push_range(20..30);
        stream.push_range(30..30);
        stream.push_range(40..45);
        assert_eq!(stream.ranges, vec![10..30, 40..45]);
        assert_eq!(stream.len(), 25);
    }
}
