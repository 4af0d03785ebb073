//! CAVLC slice data.
//!
//! Macroblocks are decoded only as far as needed to find where each one
//! ends: prediction syntax is read and discarded, and residual blocks are
//! decoded for their coefficient counts, which feed `nC` prediction of the
//! following blocks.

use anyhow::{Result, bail};

use crate::config::H264Config;
use crate::formats::h264::H264Attribute as Attr;
use crate::formats::h264::NAL_SLICE_DATA_PARTITION_A;
use crate::formats::h264::cavlc::{NC_CHROMA_DC, NC_CHROMA422_DC, residual_block};
use crate::formats::h264::coded_coefficients::{
    BlockLayout, CodedCoefficients, PCM_COEFFICIENTS, Plane, chroma_block_position, luma_block_position,
};
use crate::formats::h264::macroblock::{MbType, PredMode, SubMbType, coded_block_pattern};
use crate::formats::h264::pps::Pps;
use crate::formats::h264::rbsp::RbspReader;
use crate::formats::h264::slice_group::{MapGeometry, next_mb_address};
use crate::formats::h264::slice_header::{NalHeader, SliceHeader};
use crate::formats::h264::sps::Sps;
use crate::process::reader_state::{MappedReader, ReaderState};
use crate::utils::errors::{CavlcError, H264Error, ScanError};

/// Everything slice data decoding depends on.
#[derive(Debug, Clone, Copy)]
pub struct Slice<'c> {
    pub nal: NalHeader,
    pub sps: &'c Sps,
    pub pps: &'c Pps,
    pub header: &'c SliceHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceDataEnd {
    /// Decoded up to and including the trailing bits.
    Complete,
    /// Not decoded; the reader was moved to the end of the payload.
    Skipped,
    /// Decoding failed; the reader was moved back to the end of the last
    /// complete macroblock.
    Salvaged,
}

#[derive(Debug, Clone, Copy, Default)]
struct Summary {
    macroblocks: u32,
    skipped: u32,
    intra: u32,
    pcm: u32,
}

/// `slice_data()`
pub fn slice_data(
    s: &mut ReaderState<'_>,
    r: &mut RbspReader<'_>,
    slice: Slice<'_>,
    config: &H264Config,
) -> Result<SliceDataEnd> {
    if let Some(reason) = skip_reason(slice, config) {
        s.add_attribute(Attr::SliceDataSkipped, reason);
        r.skip_to_end()?;
        return Ok(SliceDataEnd::Skipped);
    }

    let mut decoder = MacroblockDecoder::new(slice);
    let mut summary = Summary::default();
    let mut last_good = r.bits().bit_position()?;
    let outcome = decoder.decode(s, r, &mut summary, &mut last_good);

    s.add_attribute(Attr::MacroblockCount, summary.macroblocks);
    s.add_attribute(Attr::SkippedMacroblocks, summary.skipped);
    s.add_attribute(Attr::IntraMacroblocks, summary.intra);
    s.add_attribute(Attr::PcmMacroblocks, summary.pcm);

    match outcome {
        Ok(()) => Ok(SliceDataEnd::Complete),
        Err(e) if e.downcast_ref::<ScanError>().is_some() => Err(e),
        Err(e) if summary.macroblocks >= config.min_salvaged_macroblocks => {
            r.bits().set_bit_position(last_good)?;
            s.add_attribute(Attr::SalvagedMacroblocks, summary.macroblocks);
            s.add_attribute(Attr::DecodeError, format!("{e:#}"));
            Ok(SliceDataEnd::Salvaged)
        }
        Err(e) => Err(e),
    }
}

fn skip_reason(slice: Slice<'_>, config: &H264Config) -> Option<&'static str> {
    if !config.decode_slice_data {
        Some("disabled")
    } else if slice.pps.entropy_coding_mode {
        Some("CABAC")
    } else if slice.header.mbaff(slice.sps) {
        Some("MBAFF")
    } else if slice.nal.nal_unit_type == NAL_SLICE_DATA_PARTITION_A {
        Some("data partitioning")
    } else {
        None
    }
}

struct MacroblockDecoder<'c> {
    slice: Slice<'c>,
    counts: CodedCoefficients,
    map: Vec<u8>,
    pic_size_in_mbs: u32,
    chroma_array_type: u32,
    chroma: BlockLayout,
    qp_bd_offset_y: i32,
}

impl<'c> MacroblockDecoder<'c> {
    fn new(slice: Slice<'c>) -> Self {
        let Slice { sps, pps, header, .. } = slice;
        let pic_size_in_mbs = header.pic_size_in_mbs(sps);
        let geometry = MapGeometry {
            pic_width_in_mbs: sps.pic_width_in_mbs,
            pic_height_in_map_units: sps.pic_height_in_map_units,
            frame_mbs_only: sps.frame_mbs_only,
            field_pic: header.field_pic,
            mbaff: header.mbaff(sps),
            pic_size_in_mbs,
        };
        let chroma_array_type = sps.chroma_array_type();
        Self {
            slice,
            counts: CodedCoefficients::new(sps.pic_width_in_mbs, pic_size_in_mbs),
            map: pps
                .slice_groups
                .mb_to_slice_group_map(&geometry, header.slice_group_change_cycle),
            pic_size_in_mbs,
            chroma_array_type,
            chroma: BlockLayout::chroma(chroma_array_type),
            qp_bd_offset_y: sps.qp_bd_offset_y(),
        }
    }

    fn decode(
        &mut self,
        s: &mut ReaderState<'_>,
        r: &mut RbspReader<'_>,
        summary: &mut Summary,
        last_good: &mut u64,
    ) -> Result<()> {
        let slice_type = self.slice.header.slice_type;
        let mut mb_addr = self.slice.header.first_mb_in_slice;

        loop {
            if s.reader().is_cancelled() {
                bail!(ScanError::Cancelled(r.input_position()?));
            }

            let mut more_data = true;
            if !slice_type.is_intra() {
                let run = r.bits().ue()?;
                for skipped in 0..run {
                    if mb_addr >= self.pic_size_in_mbs {
                        bail!(CavlcError::SkipRun {
                            run,
                            remaining: skipped
                        });
                    }
                    self.counts.fill(mb_addr, 0);
                    summary.macroblocks += 1;
                    summary.skipped += 1;
                    mb_addr = next_mb_address(&self.map, mb_addr);
                }
                *last_good = r.bits().bit_position()?;
                if run > 0 {
                    more_data = r.more_rbsp_data()?;
                }
            }

            if more_data {
                if mb_addr >= self.pic_size_in_mbs {
                    bail!(H264Error::OutOfRange {
                        name: "CurrMbAddr",
                        value: i64::from(mb_addr),
                        min: 0,
                        max: i64::from(self.pic_size_in_mbs) - 1
                    });
                }
                self.macroblock_layer(r, mb_addr, summary)?;
                summary.macroblocks += 1;
                *last_good = r.bits().bit_position()?;
            }

            if !r.more_rbsp_data()? {
                break;
            }
            mb_addr = next_mb_address(&self.map, mb_addr);
        }

        r.trailing_bits(s)
    }

    fn macroblock_layer(&mut self, r: &mut RbspReader<'_>, mb_addr: u32, summary: &mut Summary) -> Result<()> {
        let Slice { sps, pps, header, .. } = self.slice;
        self.counts.fill(mb_addr, 0);

        let mb_type = MbType::decode(header.slice_type, r.bits().ue()?)?;
        if mb_type.is_intra() {
            summary.intra += 1;
        }
        if mb_type == MbType::IPcm {
            summary.pcm += 1;
            self.pcm_samples(r)?;
            self.counts.fill(mb_addr, PCM_COEFFICIENTS);
            return Ok(());
        }

        let mut no_sub_mb_part_size_less_than_8x8 = true;
        match mb_type {
            MbType::Sub8x8 { ref0 } => {
                no_sub_mb_part_size_less_than_8x8 = self.sub_mb_pred(r, ref0)?;
            }
            _ => {
                let transform_8x8 = pps.transform_8x8_mode && mb_type == MbType::INxN && r.bits().get()?;
                self.mb_pred(r, mb_type, transform_8x8)?;
            }
        }

        let (cbp_luma, cbp_chroma) = match mb_type {
            MbType::I16x16 {
                cbp_luma, cbp_chroma, ..
            } => (cbp_luma, cbp_chroma),
            _ => {
                let code = r.bits().ue()?;
                let cbp = coded_block_pattern(code, mb_type.is_intra(), self.chroma_array_type)?;
                if cbp.0 > 0
                    && pps.transform_8x8_mode
                    && mb_type != MbType::INxN
                    && no_sub_mb_part_size_less_than_8x8
                    && (mb_type != MbType::BDirect16x16 || sps.direct_8x8_inference)
                {
                    // transform_size_8x8_flag; CAVLC codes 8x8 blocks as four 4x4 blocks
                    r.bits().get()?;
                }
                cbp
            }
        };

        let intra_16x16 = matches!(mb_type, MbType::I16x16 { .. });
        if cbp_luma > 0 || cbp_chroma > 0 || intra_16x16 {
            let range = 26 + self.qp_bd_offset_y / 2;
            let mb_qp_delta = r.bits().se()?;
            if !(-range..range).contains(&mb_qp_delta) {
                bail!(CavlcError::QpDelta(mb_qp_delta));
            }
            self.residual(r, mb_addr, intra_16x16, cbp_luma, cbp_chroma)?;
        }
        Ok(())
    }

    fn pcm_samples(&mut self, r: &mut RbspReader<'_>) -> Result<()> {
        let sps = self.slice.sps;
        while !r.bits().is_byte_aligned() {
            if r.bits().get()? {
                bail!(H264Error::OutOfRange {
                    name: "pcm_alignment_zero_bit",
                    value: 1,
                    min: 0,
                    max: 0
                });
            }
        }

        let mut bits = 256 * sps.bit_depth_luma;
        if self.chroma_array_type != 0 {
            let (mb_width_c, mb_height_c) = match self.chroma_array_type {
                1 => (8, 8),
                2 => (8, 16),
                _ => (16, 16),
            };
            bits += 2 * mb_width_c * mb_height_c * sps.bit_depth_chroma;
        }
        r.bits().skip_n(bits)?;
        Ok(())
    }

    fn ref_idx(r: &mut RbspReader<'_>, num_ref_idx_active: u32) -> Result<()> {
        let max = num_ref_idx_active.saturating_sub(1);
        let index = r.bits().te(max)?;
        if index > max {
            bail!(CavlcError::RefIdx { index, max });
        }
        Ok(())
    }

    fn mvd(r: &mut RbspReader<'_>) -> Result<()> {
        r.bits().se()?;
        r.bits().se()?;
        Ok(())
    }

    fn mb_pred(&mut self, r: &mut RbspReader<'_>, mb_type: MbType, transform_8x8: bool) -> Result<()> {
        let header = self.slice.header;
        match mb_type {
            MbType::INxN | MbType::Si | MbType::I16x16 { .. } => {
                let modes = match mb_type {
                    MbType::I16x16 { .. } => 0,
                    MbType::INxN if transform_8x8 => 4,
                    _ => 16,
                };
                for _ in 0..modes {
                    // prev_intra_pred_mode_flag, rem_intra_pred_mode
                    if !r.bits().get()? {
                        r.bits().skip_n(3)?;
                    }
                }
                if matches!(self.chroma_array_type, 1 | 2) {
                    let mode = r.bits().ue()?;
                    if mode > 3 {
                        bail!(H264Error::OutOfRange {
                            name: "intra_chroma_pred_mode",
                            value: i64::from(mode),
                            min: 0,
                            max: 3
                        });
                    }
                }
            }
            MbType::Inter { partitions, modes } => {
                let modes = &modes[..usize::from(partitions)];
                if header.num_ref_idx_l0_active > 1 {
                    for _ in modes.iter().filter(|m| m.uses_l0()) {
                        Self::ref_idx(r, header.num_ref_idx_l0_active)?;
                    }
                }
                if header.num_ref_idx_l1_active > 1 {
                    for _ in modes.iter().filter(|m| m.uses_l1()) {
                        Self::ref_idx(r, header.num_ref_idx_l1_active)?;
                    }
                }
                for _ in modes.iter().filter(|m| m.uses_l0()) {
                    Self::mvd(r)?;
                }
                for _ in modes.iter().filter(|m| m.uses_l1()) {
                    Self::mvd(r)?;
                }
            }
            MbType::BDirect16x16 | MbType::IPcm | MbType::Sub8x8 { .. } => {}
        }
        Ok(())
    }

    /// `sub_mb_pred()`. Returns `noSubMbPartSizeLessThan8x8Flag`.
    fn sub_mb_pred(&mut self, r: &mut RbspReader<'_>, ref0: bool) -> Result<bool> {
        let Slice { sps, header, .. } = self.slice;
        let mut sub = [SubMbType {
            mode: PredMode::Direct,
            partitions: 4,
        }; 4];
        for sub_mb_type in &mut sub {
            *sub_mb_type = SubMbType::decode(header.slice_type, r.bits().ue()?)?;
        }

        let predicted = |t: &&SubMbType| t.mode != PredMode::Direct;
        if !ref0 && header.num_ref_idx_l0_active > 1 {
            for _ in sub.iter().filter(predicted).filter(|t| t.mode.uses_l0()) {
                Self::ref_idx(r, header.num_ref_idx_l0_active)?;
            }
        }
        if header.num_ref_idx_l1_active > 1 {
            for _ in sub.iter().filter(predicted).filter(|t| t.mode.uses_l1()) {
                Self::ref_idx(r, header.num_ref_idx_l1_active)?;
            }
        }
        for t in sub.iter().filter(predicted).filter(|t| t.mode.uses_l0()) {
            for _ in 0..t.partitions {
                Self::mvd(r)?;
            }
        }
        for t in sub.iter().filter(predicted).filter(|t| t.mode.uses_l1()) {
            for _ in 0..t.partitions {
                Self::mvd(r)?;
            }
        }

        Ok(!sub.iter().any(|t| t.is_smaller_than_8x8(sps.direct_8x8_inference)))
    }

    fn residual(
        &mut self,
        r: &mut RbspReader<'_>,
        mb_addr: u32,
        intra_16x16: bool,
        cbp_luma: u8,
        cbp_chroma: u8,
    ) -> Result<()> {
        self.residual_luma(r, Plane::Y, mb_addr, intra_16x16, cbp_luma)?;

        match self.chroma_array_type {
            1 | 2 => {
                let num_c8x8 = if self.chroma_array_type == 1 { 1 } else { 2 };
                let dc_n_c = if self.chroma_array_type == 1 {
                    NC_CHROMA_DC
                } else {
                    NC_CHROMA422_DC
                };
                if cbp_chroma & 3 != 0 {
                    for _ in 0..2 {
                        residual_block(r.bits(), dc_n_c, 0, 4 * num_c8x8 - 1, 4 * num_c8x8)?;
                    }
                }
                if cbp_chroma & 2 != 0 {
                    for plane in [Plane::Cb, Plane::Cr] {
                        for blk_idx in 0..4 * num_c8x8 {
                            let position = chroma_block_position(blk_idx);
                            let n_c = self.counts.predict(plane, self.chroma, mb_addr, position);
                            let block = residual_block(r.bits(), n_c, 0, 14, 15)?;
                            self.counts
                                .set(plane, self.chroma, mb_addr, position, block.total_coeff);
                        }
                    }
                }
            }
            3 => {
                self.residual_luma(r, Plane::Cb, mb_addr, intra_16x16, cbp_luma)?;
                self.residual_luma(r, Plane::Cr, mb_addr, intra_16x16, cbp_luma)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn residual_luma(
        &mut self,
        r: &mut RbspReader<'_>,
        plane: Plane,
        mb_addr: u32,
        intra_16x16: bool,
        cbp_luma: u8,
    ) -> Result<()> {
        let layout = BlockLayout::LUMA;
        if intra_16x16 {
            let n_c = self.counts.predict(plane, layout, mb_addr, (0, 0));
            residual_block(r.bits(), n_c, 0, 15, 16)?;
        }

        for i8x8 in 0..4 {
            if cbp_luma & (1 << i8x8) == 0 {
                continue;
            }
            for i4x4 in 0..4 {
                let position = luma_block_position(i8x8 * 4 + i4x4);
                let n_c = self.counts.predict(plane, layout, mb_addr, position);
                let block = if intra_16x16 {
                    residual_block(r.bits(), n_c, 0, 14, 15)?
                } else {
                    residual_block(r.bits(), n_c, 0, 15, 16)?
                };
                self.counts.set(plane, layout, mb_addr, position, block.total_coeff);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use log::Level;

    use super::*;
    use crate::formats::FormatId;
    use crate::formats::h264::rbsp::Rbsp;
    use crate::formats::h264::slice_header::slice_header;
    use crate::formats::h264::slice_header::tests::tables;
    use crate::formats::h264::{H264Header, NAL_SLICE_IDR};
    use crate::result::attribute::AttributeName;
    use crate::result::{HeaderName, ResultTree};
    use crate::utils::bitstream_io::BitstreamReader;

    /// IDR slice header of the 2x2 macroblock picture followed by four
    /// `I_16x16_0_0_0` macroblocks without residual.
    pub(crate) const INTRA_SLICE: [u8; 6] = [0x88, 0x84, 0xA5, 0xD7, 0x5D, 0x78];

    const IDR: NalHeader = NalHeader {
        nal_ref_idc: 3,
        nal_unit_type: NAL_SLICE_IDR,
    };

    fn decode(payload: &[u8], config: &H264Config) -> (Option<SliceDataEnd>, ResultTree, u64) {
        let (sps_table, pps_table) = tables();
        let rbsp = Rbsp::new(payload, 0);
        let mut r = rbsp.reader();
        let mut state = ReaderState::new(BitstreamReader::new(payload), FormatId::H264, Level::Error);

        let mut header = None;
        state.parse_mapped(H264Header::SliceHeader, &mut r, |s, r| {
            header = slice_header(s, r, IDR, &sps_table, &pps_table)?;
            Ok(())
        });
        let header = header.expect("slice header");

        let slice = Slice {
            nal: IDR,
            sps: &sps_table[&0],
            pps: &pps_table[&0],
            header: &header,
        };
        let mut end = None;
        state.parse_mapped(H264Header::SliceData, &mut r, |s, r| {
            end = Some(slice_data(s, r, slice, config)?);
            Ok(())
        });
        let position = r.bits().bit_position().unwrap_or(0);
        (end, state.take_results(payload.len() as u64), position)
    }

    fn value(tree: &ResultTree, name: Attr) -> Option<u64> {
        let id = tree.find(HeaderName::H264(H264Header::SliceData))?;
        let name: AttributeName = name.into();
        tree.node(id).attribute(&name)?.value.as_u64()
    }

    #[test]
    fn intra_macroblocks_to_the_stop_bit() {
        let (end, tree, position) = decode(&INTRA_SLICE, &H264Config::default());
        assert_eq!(end, Some(SliceDataEnd::Complete));
        assert_eq!(position, 48);
        assert_eq!(value(&tree, Attr::MacroblockCount), Some(4));
        assert_eq!(value(&tree, Attr::IntraMacroblocks), Some(4));
        assert_eq!(value(&tree, Attr::SkippedMacroblocks), Some(0));

        let id = tree.find(HeaderName::H264(H264Header::SliceData)).expect("slice data");
        assert_eq!(tree.span(id), 2..6);
        assert!(tree.node(id).valid);
    }

    #[test]
    fn disabled_decoding_skips_to_the_end() {
        let config = H264Config {
            decode_slice_data: false,
            ..Default::default()
        };
        let (end, tree, position) = decode(&INTRA_SLICE, &config);
        assert_eq!(end, Some(SliceDataEnd::Skipped));
        assert_eq!(position, 48);
        assert!(value(&tree, Attr::MacroblockCount).is_none());
    }

    #[test]
    fn broken_macroblock_is_salvaged() {
        // third macroblock has mb_type 26
        let payload = [0x88, 0x84, 0xA5, 0xD7, 0x0D, 0xC0];
        let config = H264Config {
            min_salvaged_macroblocks: 2,
            ..Default::default()
        };
        let (end, tree, position) = decode(&payload, &config);
        assert_eq!(end, Some(SliceDataEnd::Salvaged));
        assert_eq!(position, 32);
        assert_eq!(value(&tree, Attr::SalvagedMacroblocks), Some(2));

        let (end, _, _) = decode(&payload, &H264Config::default());
        assert_eq!(end, None);
    }

    #[test]
    fn macroblocks_past_the_picture_fail() {
        // a stray zero bit before the stop bit asks for a fifth macroblock
        let payload = [0x88, 0x84, 0xA5, 0xD7, 0x5D, 0x74];
        let (end, _, _) = decode(&payload, &H264Config::default());
        assert_eq!(end, None);
    }
}
