use anyhow::{Result, bail};
use log::{debug, trace};

use crate::config::Mpeg2VideoConfig;
use crate::formats::mpeg2_video::{
    EXTENSION_START_CODE, GROUP_START_CODE, Mpeg2VideoAttribute as Attr, Mpeg2VideoHeader as Header,
    PICTURE_START_CODE, SEQUENCE_END_CODE, SEQUENCE_HEADER_CODE, SLICE_START_CODE_MAX, SLICE_START_CODE_MIN,
    START_CODE_PREFIX, USER_DATA_START_CODE, extension, is_video_start_code, picture, sequence,
};
use crate::formats::{CodecId, FormatId};
use crate::process::carver::{Column, DataBlockBuilder, DataBlockCarver};
use crate::process::reader_state::ReaderState;
use crate::result::HeaderName;
use crate::result::attribute::Hex;
use crate::utils::bitstream_io::BitstreamReader;
use crate::utils::errors::ParseError;

/// Stream parameters carried from one header to the next within a block.
#[derive(Clone, Debug, Default)]
pub struct StreamContext {
    pub vertical_size: u32,
    /// A sequence extension was seen, so the stream is MPEG-2.
    pub mpeg2: bool,
    pub picture_coding_type: u32,
    pub max_zero_byte_stuffing: u64,
}

const SEQUENCE_PARENTS: &[HeaderName] = &[HeaderName::Mpeg2Video(Header::SequenceHeader)];
const PICTURE_PARENTS: &[HeaderName] = &[
    HeaderName::Mpeg2Video(Header::GroupOfPicturesHeader),
    HeaderName::Mpeg2Video(Header::SequenceHeader),
];
const SLICE_PARENTS: &[HeaderName] = &[HeaderName::Mpeg2Video(Header::PictureHeader)];
const EXTENSION_PARENTS: &[HeaderName] = &[
    HeaderName::Mpeg2Video(Header::PictureHeader),
    HeaderName::Mpeg2Video(Header::SequenceHeader),
];
const USER_DATA_PARENTS: &[HeaderName] = &[
    HeaderName::Mpeg2Video(Header::PictureHeader),
    HeaderName::Mpeg2Video(Header::GroupOfPicturesHeader),
    HeaderName::Mpeg2Video(Header::SequenceHeader),
];

pub struct Mpeg2VideoCarver {
    config: Mpeg2VideoConfig,
    context: StreamContext,
    header_count: usize,
    fragmented: bool,
}

impl Mpeg2VideoCarver {
    pub fn new(config: Mpeg2VideoConfig) -> Self {
        let context = StreamContext {
            max_zero_byte_stuffing: config.max_zero_byte_stuffing,
            ..Default::default()
        };
        Self {
            config,
            context,
            header_count: 0,
            fragmented: false,
        }
    }
}

impl Default for Mpeg2VideoCarver {
    fn default() -> Self {
        Self::new(Mpeg2VideoConfig::default())
    }
}

impl DataBlockCarver for Mpeg2VideoCarver {
    fn format(&self) -> FormatId {
        FormatId::Mpeg2Video
    }

    fn reset(&mut self) {
        self.context = StreamContext {
            max_zero_byte_stuffing: self.config.max_zero_byte_stuffing,
            ..Default::default()
        };
        self.header_count = 0;
        self.fragmented = false;
    }

    fn carve(&mut self, reader: &mut BitstreamReader<'_>, offset_limit: u64) -> bool {
        loop {
            match reader.find_start_code(24, START_CODE_PREFIX, 8, offset_limit.saturating_add(4)) {
                Ok(Some((offset, code))) if offset < offset_limit => {
                    if is_video_start_code(code as u8) {
                        return reader.set_position(offset).is_ok();
                    }
                    trace!("skipping start code {code:#04X} at {offset:#X}");
                    if reader.set_position(offset + 1).is_err() {
                        return false;
                    }
                }
                Ok(_) => return false,
                Err(e) => {
                    debug!("start code search failed: {e}");
                    return false;
                }
            }
        }
    }

    fn parse_header(&mut self, state: &mut ReaderState<'_>) {
        if self.header_count >= self.config.max_header_count {
            self.fragmented = true;
            state.end_chain();
            return;
        }

        let code = match state.reader().show_bits(32) {
            Ok(word) if word >> 8 == START_CODE_PREFIX => (word & 0xFF) as u8,
            _ => {
                state.invalidate();
                return;
            }
        };

        let context = &mut self.context;
        let valid = match code {
            SEQUENCE_HEADER_CODE => state.parse(Header::SequenceHeader, |s| {
                sequence::sequence_header(s, context)?;
                finish_header(s, context, false)
            }),
            EXTENSION_START_CODE => {
                let id = extension_identifier(state);
                let (name, parents) = match id {
                    Some(1) => (Header::SequenceExtension, SEQUENCE_PARENTS),
                    Some(2) => (Header::SequenceDisplayExtension, SEQUENCE_PARENTS),
                    Some(3) => (Header::QuantMatrixExtension, EXTENSION_PARENTS),
                    Some(4) => (Header::CopyrightExtension, EXTENSION_PARENTS),
                    Some(8) => (Header::PictureCodingExtension, EXTENSION_PARENTS),
                    _ => (Header::Extension, EXTENSION_PARENTS),
                };
                state.parse_with_parents(name, parents, |s| {
                    let opaque = extension::extension(s, context)?;
                    finish_header(s, context, opaque)
                })
            }
            GROUP_START_CODE => state.parse_with_parents(Header::GroupOfPicturesHeader, SEQUENCE_PARENTS, |s| {
                picture::group_of_pictures_header(s)?;
                finish_header(s, context, false)
            }),
            PICTURE_START_CODE => state.parse_with_parents(Header::PictureHeader, PICTURE_PARENTS, |s| {
                picture::picture_header(s, context)?;
                finish_header(s, context, false)
            }),
            SLICE_START_CODE_MIN..=SLICE_START_CODE_MAX => {
                state.parse_with_parents(Header::Slice, SLICE_PARENTS, |s| {
                    picture::slice(s, context)?;
                    finish_header(s, context, true)
                })
            }
            USER_DATA_START_CODE => state.parse_with_parents(Header::UserData, USER_DATA_PARENTS, |s| {
                read_start_code(s)?;
                finish_header(s, context, true)
            }),
            SEQUENCE_END_CODE => state.parse_with_parents(Header::SequenceEnd, SEQUENCE_PARENTS, |s| {
                read_start_code(s)?;
                finish_header(s, context, false)
            }),
            _ => {
                trace!("start code {code:#04X} ends the video chain");
                state.invalidate();
                false
            }
        };

        if valid {
            self.header_count += 1;
        }
    }

    fn validate_data_block(&mut self, block: &mut DataBlockBuilder, start: u64, end: u64) -> bool {
        if self.header_count < self.config.min_header_count {
            trace!(
                "video candidate {start:#X}..{end:#X}: {} headers, {} needed",
                self.header_count, self.config.min_header_count
            );
            return false;
        }

        block.codec = if self.context.mpeg2 {
            CodecId::Mpeg2Video
        } else {
            CodecId::Mpeg1Video
        };
        block.is_fragmented = self.fragmented;
        true
    }

    fn columns(&self) -> Vec<Column> {
        [
            (Header::SequenceHeader, Attr::HorizontalSizeValue),
            (Header::SequenceHeader, Attr::VerticalSizeValue),
            (Header::SequenceHeader, Attr::FrameRateCode),
            (Header::PictureHeader, Attr::TemporalReference),
            (Header::PictureHeader, Attr::PictureCodingType),
        ]
        .into_iter()
        .map(|(header, attribute)| Column {
            header: header.into(),
            attribute: attribute.into(),
        })
        .collect()
    }
}

fn extension_identifier(state: &mut ReaderState<'_>) -> Option<u8> {
    let position = state.reader().position().ok()? as usize;
    state.reader().data().get(position + 4).map(|b| b >> 4)
}

/// Reads the 32-bit start code of a header and returns its 8-bit code.
pub(crate) fn read_start_code(s: &mut ReaderState<'_>) -> Result<u8> {
    let word = s.reader().get_bits(32)?;
    if word >> 8 != START_CODE_PREFIX {
        bail!(ParseError::MissingStartCode);
    }
    s.add_formatted(Attr::StartCode, word, &Hex);
    Ok((word & 0xFF) as u8)
}

/// Ends a header at the next start code.
///
/// Slices, user data and opaque extensions run up to the next start code or
/// the end of the data. Other headers may only be followed by zero bytes;
/// their byte range ends at the last field when anything else follows, when
/// no start code follows at all, or when the zeros exceed the stuffing limit.
fn finish_header(s: &mut ReaderState<'_>, context: &StreamContext, swallow: bool) -> Result<()> {
    s.reader().byte_align();
    let position = s.reader().position()?;
    let data = s.reader().data();
    let len = data.len() as u64;

    let Some((next, _)) = s.reader().find_start_code(24, START_CODE_PREFIX, 8, len)? else {
        if swallow {
            s.reader().set_position(len)?;
        }
        return Ok(());
    };

    if swallow {
        s.reader().set_position(next)?;
        return Ok(());
    }

    if data[position as usize..next as usize].iter().any(|&b| b != 0) {
        trace!("data between header end {position:#X} and start code {next:#X}");
        return Ok(());
    }

    let stuffing = next - position;
    if stuffing > context.max_zero_byte_stuffing {
        debug!(
            "{}",
            ParseError::ExcessiveStuffing {
                found: stuffing,
                max: context.max_zero_byte_stuffing
            }
        );
        s.end_chain();
        return Ok(());
    }

    if stuffing > 0 {
        s.add_attribute(Attr::ZeroByteStuffing, stuffing);
    }
    s.reader().set_position(next)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CarveConfig;
    use crate::formats::mpeg2_video::tests::{STUFFED_STREAM, ZERO_BYTE_STUFFING_AT_END};
    use crate::process::detect;
    use crate::result::{Named, ResultTree};

    fn scan(data: &[u8]) -> anyhow::Result<Vec<crate::process::carver::DataBlock>> {
        Ok(detect(data, FormatId::Mpeg2Video, &CarveConfig::default(), None).collect::<Result<Vec<_>, _>>()?)
    }

    fn only_child(tree: &ResultTree, id: crate::result::NodeId) -> crate::result::NodeId {
        let children = tree.node(id).children();
        assert_eq!(children.len(), 1, "children of {}", tree.node(id).name);
        children[0]
    }

    #[test]
    fn zero_byte_stuffing_at_end() -> anyhow::Result<()> {
        assert_eq!(ZERO_BYTE_STUFFING_AT_END.len(), 35);
        let blocks = scan(ZERO_BYTE_STUFFING_AT_END)?;
        assert_eq!(blocks.len(), 1);

        let block = &blocks[0];
        assert_eq!(block.range(), 0..28);
        assert_eq!(block.codec, CodecId::Mpeg1Video);

        let tree = &block.results;
        assert_eq!(tree.roots().len(), 1);
        let sequence = tree.roots()[0];
        let node = tree.node(sequence);
        assert_eq!(node.name.name(), "SequenceHeader");
        assert_eq!((node.offset, node.length), (0, 12));
        assert!(node.attribute(&Attr::ZeroByteStuffing.into()).is_none());

        let gop = only_child(tree, sequence);
        let node = tree.node(gop);
        assert_eq!(node.name.name(), "GroupOfPicturesHeader");
        assert_eq!((node.offset, node.length), (12, 8));

        let picture = only_child(tree, gop);
        let node = tree.node(picture);
        assert_eq!(node.name.name(), "PictureHeader");
        assert_eq!((node.offset, node.length), (20, 8));
        assert!(node.children().is_empty());

        assert!(tree.walk().all(|(_, id)| tree.node(id).valid));
        Ok(())
    }

    #[test]
    fn stuffing_between_headers_is_reported() -> anyhow::Result<()> {
        let blocks = scan(STUFFED_STREAM)?;
        assert_eq!(blocks.len(), 1);
        let tree = &blocks[0].results;

        let sequence = tree.roots()[0];
        let stuffing = tree.node(sequence).attribute(&Attr::ZeroByteStuffing.into());
        assert_eq!(stuffing.map(|a| a.value.as_u64()), Some(Some(3)));
        assert_eq!(tree.node(sequence).length, 15);
        Ok(())
    }

    #[test]
    fn excessive_stuffing_ends_the_block() -> anyhow::Result<()> {
        let mut config = CarveConfig::default();
        config.mpeg2_video.max_zero_byte_stuffing = 2;
        config.mpeg2_video.min_header_count = 1;
        let blocks = detect(STUFFED_STREAM, FormatId::Mpeg2Video, &config, None).collect::<Result<Vec<_>, _>>()?;

        assert_eq!(blocks[0].range(), 0..12);
        assert_eq!(blocks[0].results.len(), 1);
        Ok(())
    }

    #[test]
    fn header_limit_cuts_fragments() -> anyhow::Result<()> {
        let mut config = CarveConfig::default();
        config.mpeg2_video.max_header_count = 2;
        config.mpeg2_video.min_header_count = 1;
        let blocks =
            detect(ZERO_BYTE_STUFFING_AT_END, FormatId::Mpeg2Video, &config, None).collect::<Result<Vec<_>, _>>()?;

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].range(), 0..20);
        assert!(blocks[0].is_fragmented);
        assert_eq!(blocks[1].range(), 20..28);
        assert_eq!(blocks[1].fragment_index, 1);
        Ok(())
    }

    #[test]
    fn rescanning_a_block_reproduces_it() -> anyhow::Result<()> {
        let mut data = vec![0x5A; 7];
        data.extend_from_slice(STUFFED_STREAM);
        data.extend_from_slice(&[0x00, 0x00, 0x01, 0xB3, 0xFF]);

        let blocks = scan(&data)?;
        assert_eq!(blocks.len(), 1);
        let block = &blocks[0];

        let again = scan(&data[block.start as usize..block.end as usize])?;
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].len(), block.len());
        assert_eq!(again[0].format, block.format);
        assert_eq!(again[0].results.len(), block.results.len());
        Ok(())
    }

    #[test]
    fn spans_nest_and_siblings_do_not_overlap() -> anyhow::Result<()> {
        let blocks = scan(STUFFED_STREAM)?;
        let tree = &blocks[0].results;
        for (_, id) in tree.walk() {
            let span = tree.span(id);
            let mut previous_end = tree.node(id).end();
            for &child in tree.node(id).children() {
                let child_span = tree.span(child);
                assert!(span.start <= child_span.start && child_span.end <= span.end);
                assert!(child_span.start >= previous_end);
                previous_end = child_span.end;
            }
        }
        Ok(())
    }
}
