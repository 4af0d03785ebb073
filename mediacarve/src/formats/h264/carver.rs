use std::collections::HashMap;

use anyhow::Result;
use log::{debug, trace};

use crate::config::H264Config;
use crate::formats::h264::nal::{self, Continuation, NalFrame};
use crate::formats::h264::pps::{Pps, pic_parameter_set};
use crate::formats::h264::rbsp::{Rbsp, RbspReader};
use crate::formats::h264::slice_data::{Slice, SliceDataEnd, slice_data};
use crate::formats::h264::slice_header::{NalHeader, slice_header};
use crate::formats::h264::sps::{Sps, seq_parameter_set};
use crate::formats::h264::{
    H264Attribute as Attr, H264Header as Header, NAL_AUD, NAL_END_OF_SEQUENCE, NAL_END_OF_STREAM, NAL_FILLER_DATA,
    NAL_PPS, NAL_SEI, NAL_SLICE, NAL_SLICE_DATA_PARTITION_A, NAL_SLICE_DATA_PARTITION_B,
    NAL_SLICE_DATA_PARTITION_C, NAL_SLICE_IDR, NAL_SPS,
};
use crate::formats::{CodecId, FormatId};
use crate::process::carver::{Column, DataBlockBuilder, DataBlockCarver};
use crate::process::reader_state::{MappedReader, ReaderState};
use crate::result::attribute::{Hex, Reserved};
use crate::utils::bitstream_io::BitstreamReader;
use crate::utils::errors::ParseError;

/// Whether a block may start with a NAL unit of this type.
fn starts_block(nal_unit_type: u8) -> bool {
    (NAL_SLICE..=NAL_FILLER_DATA).contains(&nal_unit_type)
}

/// Whether a NAL unit of this type may continue a block. Reserved and
/// unspecified types end it.
fn continues_block(nal_unit_type: u8) -> bool {
    matches!(nal_unit_type, 1..=15 | 19..=21)
}

fn is_slice(nal_unit_type: u8) -> bool {
    matches!(
        nal_unit_type,
        NAL_SLICE | NAL_SLICE_DATA_PARTITION_A | NAL_SLICE_IDR
    )
}

/// Carver for H.264 Annex B byte streams.
///
/// Parameter sets are remembered per block: a slice can only be decoded when
/// its PPS and SPS were seen earlier in the same block.
pub struct H264Carver {
    config: H264Config,
    sps: HashMap<u32, Sps>,
    pps: HashMap<u32, Pps>,
    nal_count: usize,
    slice_count: usize,
    fragmented: bool,
}

impl H264Carver {
    pub fn new(config: H264Config) -> Self {
        Self {
            config,
            sps: HashMap::new(),
            pps: HashMap::new(),
            nal_count: 0,
            slice_count: 0,
            fragmented: false,
        }
    }

    /// `byte_stream_nal_unit()`: start code, NAL unit header and payload.
    fn nal_unit(&mut self, s: &mut ReaderState<'_>, frame: &NalFrame) -> Result<()> {
        let data = s.reader().data();
        if frame.zero_byte {
            s.read_formatted(Attr::ZeroByte, 8, &Reserved(0))?;
        }
        s.read_formatted(Attr::StartCodePrefixOneThreeBytes, 24, &Hex)?;
        let header = nal::nal_unit_header(s)?;

        let payload = &data[frame.payload_start() as usize..frame.payload_end as usize];
        let rbsp = Rbsp::new(payload, frame.payload_start());
        if rbsp.escape_count() > 0 {
            s.add_attribute(Attr::EmulationPreventionBytes, rbsp.escape_count());
        }

        let mut r = rbsp.reader();
        if let Some(end) = self.payload(s, &mut r, header)? {
            s.reader().set_position(end)?;
            s.end_chain();
            return Ok(());
        }

        s.reader().set_position(frame.end)?;
        if frame.trailing_zeros > 0 {
            s.add_attribute(Attr::TrailingZeroBytes, frame.trailing_zeros);
        }
        match frame.continuation {
            Continuation::StartCode | Continuation::EndOfData => {}
            Continuation::ExcessiveZeros(found) => {
                debug!(
                    "{}",
                    ParseError::ExcessiveStuffing {
                        found,
                        max: self.config.max_zero_stuffing,
                    }
                );
                s.end_chain();
            }
            Continuation::Garbage => {
                trace!("NAL unit at {:#X} is not followed by a start code", frame.start);
                s.end_chain();
            }
        }
        Ok(())
    }

    /// Parses the RBSP of one NAL unit.
    ///
    /// Returns the input offset the unit ends at when slice data had to be
    /// salvaged, as nothing after the last complete macroblock belongs to the
    /// block.
    fn payload(&mut self, s: &mut ReaderState<'_>, r: &mut RbspReader<'_>, header: NalHeader) -> Result<Option<u64>> {
        match header.nal_unit_type {
            NAL_SPS => {
                let sps = seq_parameter_set(s, r)?;
                if s.is_valid() {
                    self.sps.insert(sps.seq_parameter_set_id, sps);
                }
            }
            NAL_PPS => {
                if let Some(pps) = pic_parameter_set(s, r, &self.sps)? {
                    if s.is_valid() {
                        self.pps.insert(pps.pic_parameter_set_id, pps);
                    }
                }
            }
            NAL_SLICE | NAL_SLICE_IDR | NAL_SLICE_DATA_PARTITION_A => return self.slice(s, r, header),
            NAL_SLICE_DATA_PARTITION_B | NAL_SLICE_DATA_PARTITION_C => {
                r.read_ue(s, Attr::SliceId)?;
                r.skip_to_end()?;
            }
            NAL_SEI => nal::sei(s, r)?,
            NAL_AUD => nal::access_unit_delimiter(s, r)?,
            NAL_FILLER_DATA => nal::filler_data(s, r)?,
            NAL_END_OF_SEQUENCE | NAL_END_OF_STREAM => nal::end_of_unit(s, r)?,
            _ => {
                s.add_attribute(Attr::NalUnitPayload, r.rbsp().len());
                r.skip_to_end()?;
            }
        }
        Ok(None)
    }

    fn slice(&self, s: &mut ReaderState<'_>, r: &mut RbspReader<'_>, nal: NalHeader) -> Result<Option<u64>> {
        let (sps_table, pps_table) = (&self.sps, &self.pps);
        let mut parsed = None;
        let valid = s.parse_mapped(Header::SliceHeader, r, |s, r| {
            parsed = slice_header(s, r, nal, sps_table, pps_table)?;
            Ok(())
        });
        if !valid {
            return Ok(None);
        }
        let Some(header) = parsed else {
            r.skip_to_end()?;
            return Ok(None);
        };
        if nal.nal_unit_type == NAL_SLICE_DATA_PARTITION_A {
            r.read_ue(s, Attr::SliceId)?;
        }

        let pps = pps_table.get(&header.pic_parameter_set_id);
        let sps = pps.and_then(|pps| sps_table.get(&pps.seq_parameter_set_id));
        let (Some(pps), Some(sps)) = (pps, sps) else {
            r.skip_to_end()?;
            return Ok(None);
        };

        let slice = Slice {
            nal,
            sps,
            pps,
            header: &header,
        };
        let config = &self.config;
        let mut end = SliceDataEnd::Complete;
        let valid = s.parse_mapped(Header::SliceData, r, |s, r| {
            end = slice_data(s, r, slice, config)?;
            Ok(())
        });
        if valid && end == SliceDataEnd::Salvaged {
            return Ok(Some(r.input_end_position()?));
        }
        Ok(None)
    }
}

impl Default for H264Carver {
    fn default() -> Self {
        Self::new(H264Config::default())
    }
}

impl DataBlockCarver for H264Carver {
    fn format(&self) -> FormatId {
        FormatId::H264
    }

    fn reset(&mut self) {
        self.sps.clear();
        self.pps.clear();
        self.nal_count = 0;
        self.slice_count = 0;
        self.fragmented = false;
    }

    fn carve(&mut self, reader: &mut BitstreamReader<'_>, offset_limit: u64) -> bool {
        let from = match reader.position() {
            Ok(position) => position,
            Err(_) => return false,
        };
        loop {
            match reader.find_start_code(24, 1, 8, offset_limit.saturating_add(4)) {
                Ok(Some((offset, header))) if offset < offset_limit => {
                    let nal_unit_type = (header & 0x1F) as u8;
                    if header & 0x80 == 0 && starts_block(nal_unit_type) {
                        let data = reader.data();
                        let start = if offset > from && data[offset as usize - 1] == 0 {
                            offset - 1
                        } else {
                            offset
                        };
                        return reader.set_position(start).is_ok();
                    }
                    trace!("skipping NAL unit type {nal_unit_type} at {offset:#X}");
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
        if self.nal_count >= self.config.max_nal_unit_count {
            self.fragmented = true;
            state.end_chain();
            return;
        }

        let Ok(position) = state.reader().position() else {
            state.invalidate();
            return;
        };
        let data = state.reader().data();
        let Some(frame) = NalFrame::locate(data, position, self.config.max_zero_stuffing) else {
            state.invalidate();
            return;
        };

        let nal_unit_type = data[frame.header as usize] & 0x1F;
        if !continues_block(nal_unit_type) {
            trace!("NAL unit type {nal_unit_type} ends the chain at {position:#X}");
            state.invalidate();
            return;
        }

        let valid = state.parse(Header::for_nal_unit_type(nal_unit_type), |s| self.nal_unit(s, &frame));
        if valid {
            self.nal_count += 1;
            if is_slice(nal_unit_type) {
                self.slice_count += 1;
            }
        }
    }

    fn validate_data_block(&mut self, block: &mut DataBlockBuilder, start: u64, end: u64) -> bool {
        if self.nal_count < self.config.min_nal_unit_count || self.slice_count == 0 {
            trace!(
                "H.264 candidate {start:#X}..{end:#X}: {} NAL units, {} slices",
                self.nal_count, self.slice_count
            );
            return false;
        }

        block.codec = CodecId::H264;
        block.is_fragmented = self.fragmented;
        true
    }

    fn columns(&self) -> Vec<Column> {
        [
            (Header::SequenceParameterSet, Attr::ProfileIdc),
            (Header::SequenceParameterSet, Attr::LevelIdc),
            (Header::SequenceParameterSet, Attr::PicWidthInMbsMinus1),
            (Header::SequenceParameterSet, Attr::PicHeightInMapUnitsMinus1),
            (Header::SliceHeader, Attr::SliceType),
        ]
        .into_iter()
        .map(|(header, attribute)| Column {
            header: header.into(),
            attribute: attribute.into(),
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CarveConfig;
    use crate::formats::h264::slice_data::tests::INTRA_SLICE;
    use crate::formats::h264::tests::{PPS, SPS};
    use crate::process::carver::DataBlock;
    use crate::process::detect;
    use crate::result::{HeaderName, Named};

    fn stream() -> Vec<u8> {
        let mut data = SPS.to_vec();
        data.extend_from_slice(&PPS);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x65]);
        data.extend_from_slice(&INTRA_SLICE);
        data
    }

    fn scan_with(data: &[u8], config: &CarveConfig) -> anyhow::Result<Vec<DataBlock>> {
        Ok(detect(data, FormatId::H264, config, None).collect::<Result<Vec<_>, _>>()?)
    }

    fn scan(data: &[u8]) -> anyhow::Result<Vec<DataBlock>> {
        scan_with(data, &CarveConfig::default())
    }

    #[test]
    fn parameter_sets_and_an_idr_slice() -> anyhow::Result<()> {
        let data = stream();
        let blocks = scan(&data)?;
        assert_eq!(blocks.len(), 1);

        let block = &blocks[0];
        assert_eq!(block.range(), 0..30);
        assert_eq!(block.codec, CodecId::H264);
        assert!(!block.is_fragmented);

        let tree = &block.results;
        let names: Vec<_> = tree.roots().iter().map(|&id| tree.node(id).name.name()).collect();
        assert_eq!(
            names,
            ["SequenceParameterSet", "PictureParameterSet", "CodedSliceIdr"]
        );
        assert_eq!(tree.span(tree.roots()[0]), 0..11);
        assert_eq!(tree.span(tree.roots()[2]), 19..30);

        let slice = tree.roots()[2];
        let children: Vec<_> = tree.node(slice).children().iter().map(|&id| tree.node(id).name.name()).collect();
        assert_eq!(children, ["SliceHeader", "SliceData"]);
        assert!(tree.walk().all(|(_, id)| tree.node(id).valid));
        Ok(())
    }

    #[test]
    fn leading_garbage_is_skipped() -> anyhow::Result<()> {
        let mut data = vec![0x12, 0x00, 0x00, 0x01, 0xE7, 0x00];
        data.extend_from_slice(&stream());
        let blocks = scan(&data)?;
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].range(), 6..36);
        Ok(())
    }

    #[test]
    fn parameter_sets_alone_are_not_a_block() -> anyhow::Result<()> {
        let mut data = SPS.to_vec();
        data.extend_from_slice(&PPS);
        data.extend_from_slice(&PPS);
        assert!(scan(&data)?.is_empty());

        let mut config = CarveConfig::default();
        config.h264.min_nal_unit_count = 4;
        assert!(scan_with(&stream(), &config)?.is_empty());
        Ok(())
    }

    #[test]
    fn slices_without_a_header_are_not_counted() -> anyhow::Result<()> {
        for payload in [&[][..], &[0x01][..]] {
            let mut data = SPS.to_vec();
            data.extend_from_slice(&PPS);
            data.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x65]);
            data.extend_from_slice(payload);
            data.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x09, 0xF0]);
            assert!(scan(&data)?.is_empty(), "slice payload {payload:02X?}");
        }
        Ok(())
    }

    #[test]
    fn salvaged_slice_ends_the_block() -> anyhow::Result<()> {
        let mut data = SPS.to_vec();
        data.extend_from_slice(&PPS);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0xA5, 0xD7, 0x0D, 0xC0]);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x09, 0xF0]);

        let mut config = CarveConfig::default();
        config.h264.min_salvaged_macroblocks = 2;
        let blocks = scan_with(&data, &config)?;
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].range(), 0..28);

        let tree = &blocks[0].results;
        let slice = tree.find(HeaderName::H264(Header::SliceData)).expect("slice data");
        let salvaged = tree.node(slice).attribute(&Attr::SalvagedMacroblocks.into());
        assert_eq!(salvaged.map(|a| a.value.as_u64()), Some(Some(2)));
        Ok(())
    }

    #[test]
    fn excessive_zeros_end_the_block() -> anyhow::Result<()> {
        let mut data = SPS.to_vec();
        data.extend_from_slice(&PPS);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x65]);
        data.extend_from_slice(&INTRA_SLICE);
        data.extend_from_slice(&[0; 8]);
        data.extend_from_slice(&stream());

        let mut config = CarveConfig::default();
        config.h264.max_zero_stuffing = 4;
        let blocks = scan_with(&data, &config)?;
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].range(), 0..30);
        assert_eq!(blocks[1].range(), 38..68);

        let blocks = scan(&data)?;
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].range(), 0..68);
        Ok(())
    }

    #[test]
    fn nal_limit_fragments_the_stream() -> anyhow::Result<()> {
        let mut config = CarveConfig::default();
        config.h264.max_nal_unit_count = 3;
        let mut data = stream();
        data.extend_from_slice(&stream());
        let blocks = scan_with(&data, &config)?;
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].is_fragmented);
        assert_eq!(blocks[0].range(), 0..30);
        assert_eq!(blocks[1].range(), 30..60);
        Ok(())
    }

    #[test]
    fn rescanning_a_block_reproduces_it() -> anyhow::Result<()> {
        let mut data = vec![0xC3; 5];
        data.extend_from_slice(&stream());
        data.extend_from_slice(&[0x00, 0x00, 0x02, 0x77]);

        let blocks = scan(&data)?;
        assert_eq!(blocks.len(), 1);
        let block = &blocks[0];

        let again = scan(&data[block.start as usize..block.end as usize])?;
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].len(), block.len());
        assert_eq!(again[0].results.len(), block.results.len());
        Ok(())
    }

    #[test]
    fn columns_name_parameter_set_fields() {
        let columns = H264Carver::default().columns();
        assert_eq!(columns.len(), 5);
        assert_eq!(columns[0].attribute.to_string(), "profile_idc");
    }
}
