use std::ops::Range;

use anyhow::Result;
use log::{debug, trace};

use crate::config::MpegSystemConfig;
use crate::formats::mpeg_system::{
    PACK_START_CODE, PADDING_STREAM, PROGRAM_END_CODE, SYSTEM_HEADER_START_CODE, SystemAttribute as Attr,
    SystemHeader as Header, pack, pes, stream_codec,
};
use crate::formats::{CodecId, FormatId};
use crate::process::carver::{CodecStream, Column, DataBlockBuilder, DataBlockCarver};
use crate::process::reader_state::ReaderState;
use crate::result::HeaderName;
use crate::utils::bitstream_io::BitstreamReader;
use crate::utils::errors::ParseError;

const START_CODE_PREFIX: u32 = 0x00_0001;

const PACK_PARENTS: &[HeaderName] = &[HeaderName::MpegSystem(Header::PackHeader)];

/// Carver for MPEG-1/2 program streams.
///
/// Blocks start at a pack header. PES payloads are collected per stream id
/// and handed out as codec streams of the block.
pub struct MpegSystemCarver {
    config: MpegSystemConfig,
    header_count: usize,
    has_pack: bool,
    mpeg2: bool,
    streams: Vec<CodecStream>,
    fragmented: bool,
}

impl MpegSystemCarver {
    pub fn new(config: MpegSystemConfig) -> Self {
        Self {
            config,
            header_count: 0,
            has_pack: false,
            mpeg2: false,
            streams: Vec::new(),
            fragmented: false,
        }
    }

    fn push_payload(&mut self, stream_id: u8, payload: Range<u64>) {
        let index = match self.streams.iter().position(|s| s.stream_id == stream_id) {
            Some(index) => index,
            None => {
                self.streams
                    .push(CodecStream::new(stream_id, stream_codec(stream_id, self.mpeg2)));
                self.streams.len() - 1
            }
        };
        self.streams[index].push_range(payload);
    }
}

impl Default for MpegSystemCarver {
    fn default() -> Self {
        Self::new(MpegSystemConfig::default())
    }
}

impl DataBlockCarver for MpegSystemCarver {
    fn format(&self) -> FormatId {
        FormatId::MpegSystem
    }

    fn reset(&mut self) {
        self.header_count = 0;
        self.has_pack = false;
        self.mpeg2 = false;
        self.streams.clear();
        self.fragmented = false;
    }

    fn carve(&mut self, reader: &mut BitstreamReader<'_>, offset_limit: u64) -> bool {
        loop {
            match reader.find_start_code(24, START_CODE_PREFIX, 8, offset_limit.saturating_add(4)) {
                Ok(Some((offset, code))) if offset < offset_limit => {
                    if code as u8 == PACK_START_CODE {
                        return reader.set_position(offset).is_ok();
                    }
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

        let max_stuffing = self.config.max_zero_byte_stuffing;
        let valid = match code {
            PACK_START_CODE => {
                let mut mpeg2 = false;
                let valid = state.parse(Header::PackHeader, |s| {
                    mpeg2 = pack::pack_header(s)?;
                    finish_header(s, max_stuffing)
                });
                if valid {
                    self.has_pack = true;
                    self.mpeg2 = mpeg2;
                }
                valid
            }
            SYSTEM_HEADER_START_CODE => state.parse_with_parents(Header::SystemHeader, PACK_PARENTS, |s| {
                pack::system_header(s)?;
                finish_header(s, max_stuffing)
            }),
            PROGRAM_END_CODE => {
                let valid = state.parse_with_parents(Header::ProgramEnd, PACK_PARENTS, pes::program_end);
                state.end_chain();
                valid
            }
            PADDING_STREAM => state.parse_with_parents(Header::PaddingStream, PACK_PARENTS, |s| {
                pes::padding_stream(s)?;
                finish_header(s, max_stuffing)
            }),
            0xBC..=0xFF => {
                let mut payload = None;
                let valid = state.parse_with_parents(Header::PesPacket, PACK_PARENTS, |s| {
                    payload = pes::pes_packet(s)?;
                    finish_header(s, max_stuffing)
                });
                if let (true, Some(payload)) = (valid, payload) {
                    self.push_payload(code, payload);
                }
                valid
            }
            _ => {
                trace!("start code {code:#04X} ends the system chain");
                state.invalidate();
                false
            }
        };

        if valid {
            self.header_count += 1;
        }
    }

    fn validate_data_block(&mut self, block: &mut DataBlockBuilder, start: u64, end: u64) -> bool {
        if self.header_count < self.config.min_header_count || !self.has_pack {
            trace!(
                "system candidate {start:#X}..{end:#X}: {} headers, pack header seen: {}",
                self.header_count, self.has_pack
            );
            return false;
        }

        block.codec = CodecId::MpegSystem;
        block.is_fragmented = self.fragmented;
        block.codec_streams = std::mem::take(&mut self.streams);
        true
    }

    fn columns(&self) -> Vec<Column> {
        [
            (Header::PackHeader, Attr::SystemClockReferenceBase),
            (Header::PackHeader, Attr::ProgramMuxRate),
            (Header::PesPacket, Attr::StreamId),
            (Header::PesPacket, Attr::PesPacketLength),
            (Header::PesHeader, Attr::Pts),
        ]
        .into_iter()
        .map(|(header, attribute)| Column {
            header: header.into(),
            attribute: attribute.into(),
        })
        .collect()
    }
}

/// Takes zero bytes before the next start code into the header.
///
/// Zeros at the end of the data, or zeros followed by anything but a start
/// code, stay outside. More than `max_stuffing` zeros end the chain.
fn finish_header(s: &mut ReaderState<'_>, max_stuffing: u64) -> Result<()> {
    let position = s.reader().position()?;
    let data = s.reader().data();
    let zeros = data[position as usize..].iter().take_while(|&&b| b == 0).count() as u64;
    let after = position + zeros;
    if zeros <= 2 || data.get(after as usize) != Some(&1) {
        return Ok(());
    }

    let stuffing = zeros - 2;
    if stuffing > max_stuffing {
        debug!(
            "{}",
            ParseError::ExcessiveStuffing {
                found: stuffing,
                max: max_stuffing
            }
        );
        s.end_chain();
        return Ok(());
    }

    s.add_attribute(Attr::ZeroByteStuffing, stuffing);
    s.reader().set_position(position + stuffing)?;
    Ok(())
}
