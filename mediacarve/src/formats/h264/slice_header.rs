//! Slice headers with reference list modification, weighted prediction and
//! reference picture marking.

use std::collections::HashMap;

use anyhow::{Result, bail};
use log::Level::Warn;

use crate::formats::h264::pps::{MAX_PPS_COUNT, Pps};
use crate::formats::h264::rbsp::RbspReader;
use crate::formats::h264::slice_group::change_cycle_bits;
use crate::formats::h264::sps::Sps;
use crate::formats::h264::{H264Attribute as Attr, H264Header, NAL_SLICE_IDR};
use crate::log_or_invalidate;
use crate::process::reader_state::ReaderState;
use crate::result::attribute::{InRange, Lookup};
use crate::utils::errors::H264Error;

const SLICE_TYPE: Lookup = Lookup(&[
    Some("P"),
    Some("B"),
    Some("I"),
    Some("SP"),
    Some("SI"),
    Some("P, whole picture"),
    Some("B, whole picture"),
    Some("I, whole picture"),
    Some("SP, whole picture"),
    Some("SI, whole picture"),
]);

/// Upper bound on list modification and memory management operations.
const MAX_OPERATIONS: usize = 66;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    P,
    B,
    I,
    Sp,
    Si,
}

impl SliceType {
    pub fn from_code(slice_type: u32) -> Self {
        match slice_type % 5 {
            0 => Self::P,
            1 => Self::B,
            2 => Self::I,
            3 => Self::Sp,
            _ => Self::Si,
        }
    }

    pub fn is_intra(self) -> bool {
        matches!(self, Self::I | Self::Si)
    }

    /// P and SP slices predict from list 0 only.
    pub fn is_p(self) -> bool {
        matches!(self, Self::P | Self::Sp)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::P => "P",
            Self::B => "B",
            Self::I => "I",
            Self::Sp => "SP",
            Self::Si => "SI",
        }
    }
}

/// NAL unit header fields a slice header depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader {
    pub nal_ref_idc: u8,
    pub nal_unit_type: u8,
}

impl NalHeader {
    pub fn is_idr(&self) -> bool {
        self.nal_unit_type == NAL_SLICE_IDR
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceHeader {
    pub first_mb_in_slice: u32,
    pub slice_type: SliceType,
    pub pic_parameter_set_id: u32,
    pub field_pic: bool,
    pub bottom_field: bool,
    pub num_ref_idx_l0_active: u32,
    pub num_ref_idx_l1_active: u32,
    /// `SliceQPY`
    pub slice_qp: i32,
    pub slice_group_change_cycle: u32,
}

impl SliceHeader {
    /// `MbaffFrameFlag`
    pub fn mbaff(&self, sps: &Sps) -> bool {
        sps.mb_adaptive_frame_field && !self.field_pic
    }

    /// `PicHeightInMbs`
    pub fn pic_height_in_mbs(&self, sps: &Sps) -> u32 {
        sps.frame_height_in_mbs() / (1 + u32::from(self.field_pic))
    }

    /// `PicSizeInMbs`
    pub fn pic_size_in_mbs(&self, sps: &Sps) -> u32 {
        sps.pic_width_in_mbs * self.pic_height_in_mbs(sps)
    }
}

/// `slice_header()`.
///
/// Returns `None` when the referenced PPS or its SPS is unknown; the rest of
/// the header cannot be parsed without them.
pub fn slice_header(
    s: &mut ReaderState<'_>,
    r: &mut RbspReader<'_>,
    nal: NalHeader,
    sps_table: &HashMap<u32, Sps>,
    pps_table: &HashMap<u32, Pps>,
) -> Result<Option<SliceHeader>> {
    let first_mb_in_slice = r.read_ue(s, Attr::FirstMbInSlice)?;
    let slice_type_code = r.bits().ue()?;
    s.add_formatted(Attr::SliceType, slice_type_code, &SLICE_TYPE);
    if slice_type_code > 9 {
        bail!(H264Error::SliceType(slice_type_code));
    }
    let slice_type = SliceType::from_code(slice_type_code);
    if nal.is_idr() && !slice_type.is_intra() {
        log_or_invalidate!(s, log::Level::Error, H264Error::SliceType(slice_type_code));
    }

    let pic_parameter_set_id = r.read_ue_in(s, Attr::PicParameterSetId, 0, MAX_PPS_COUNT - 1)?;
    let Some(pps) = pps_table.get(&pic_parameter_set_id) else {
        log_or_invalidate!(
            s,
            Warn,
            H264Error::UndefinedParameterSet {
                kind: "PPS",
                id: pic_parameter_set_id
            }
        );
        return Ok(None);
    };
    let Some(sps) = sps_table.get(&pps.seq_parameter_set_id) else {
        log_or_invalidate!(
            s,
            Warn,
            H264Error::UndefinedParameterSet {
                kind: "SPS",
                id: pps.seq_parameter_set_id
            }
        );
        return Ok(None);
    };

    if sps.separate_colour_plane {
        r.read_with(s, Attr::ColourPlaneId, 2, &InRange(0, 2))?;
    }
    r.read(s, Attr::FrameNum, sps.log2_max_frame_num)?;

    let mut field_pic = false;
    let mut bottom_field = false;
    if !sps.frame_mbs_only {
        field_pic = r.read_flag(s, Attr::FieldPicFlag)?;
        if field_pic {
            bottom_field = r.read_flag(s, Attr::BottomFieldFlag)?;
        }
    }

    let mut header = SliceHeader {
        first_mb_in_slice,
        slice_type,
        pic_parameter_set_id,
        field_pic,
        bottom_field,
        num_ref_idx_l0_active: pps.num_ref_idx_l0_default_active,
        num_ref_idx_l1_active: pps.num_ref_idx_l1_default_active,
        slice_qp: 0,
        slice_group_change_cycle: 0,
    };

    let pic_size_in_mbs = header.pic_size_in_mbs(sps);
    let first_mb_scale = 1 + u32::from(header.mbaff(sps));
    if u64::from(first_mb_in_slice) * u64::from(first_mb_scale) >= u64::from(pic_size_in_mbs) {
        bail!(H264Error::OutOfRange {
            name: "first_mb_in_slice",
            value: i64::from(first_mb_in_slice),
            min: 0,
            max: i64::from(pic_size_in_mbs / first_mb_scale) - 1
        });
    }

    if nal.is_idr() {
        r.read_ue_in(s, Attr::IdrPicId, 0, 65535)?;
    }

    match sps.pic_order_cnt_type {
        0 => {
            r.read(s, Attr::PicOrderCntLsb, sps.log2_max_pic_order_cnt_lsb)?;
            if pps.bottom_field_pic_order_in_frame_present && !field_pic {
                r.read_se(s, Attr::DeltaPicOrderCntBottom)?;
            }
        }
        1 if !sps.delta_pic_order_always_zero => {
            r.read_se(s, Attr::DeltaPicOrderCnt0)?;
            if pps.bottom_field_pic_order_in_frame_present && !field_pic {
                r.read_se(s, Attr::DeltaPicOrderCnt1)?;
            }
        }
        _ => {}
    }

    if pps.redundant_pic_cnt_present {
        r.read_ue_in(s, Attr::RedundantPicCnt, 0, 127)?;
    }

    if slice_type == SliceType::B {
        r.read_flag(s, Attr::DirectSpatialMvPredFlag)?;
    }

    if !slice_type.is_intra() && r.read_flag(s, Attr::NumRefIdxActiveOverrideFlag)? {
        let max = if field_pic { 31 } else { 15 };
        header.num_ref_idx_l0_active = r.read_ue_in(s, Attr::NumRefIdxL0ActiveMinus1, 0, max)? + 1;
        if slice_type == SliceType::B {
            header.num_ref_idx_l1_active = r.read_ue_in(s, Attr::NumRefIdxL1ActiveMinus1, 0, max)? + 1;
        }
    }

    if !slice_type.is_intra() {
        s.parse_mapped(H264Header::RefPicListModification, r, |s, r| {
            ref_pic_list_modification(s, r, slice_type)
        });
    }

    if (pps.weighted_pred && slice_type.is_p()) || (pps.weighted_bipred_idc == 1 && slice_type == SliceType::B) {
        let header = &header;
        s.parse_mapped(H264Header::PredWeightTable, r, |s, r| pred_weight_table(s, r, sps, header));
    }

    if nal.nal_ref_idc != 0 {
        s.parse_mapped(H264Header::DecRefPicMarking, r, |s, r| dec_ref_pic_marking(s, r, nal));
    }

    if pps.entropy_coding_mode && !slice_type.is_intra() {
        r.read_ue_in(s, Attr::CabacInitIdc, 0, 2)?;
    }

    let qp_bd_offset = sps.qp_bd_offset_y();
    let slice_qp_delta = r.read_se_in(s, Attr::SliceQpDelta, -qp_bd_offset - pps.pic_init_qp, 51 - pps.pic_init_qp)?;
    header.slice_qp = pps.pic_init_qp + slice_qp_delta;

    if matches!(slice_type, SliceType::Sp | SliceType::Si) {
        if slice_type == SliceType::Sp {
            r.read_flag(s, Attr::SpForSwitchFlag)?;
        }
        r.read_se(s, Attr::SliceQsDelta)?;
    }

    if pps.deblocking_filter_control_present {
        let idc = r.read_ue_in(s, Attr::DisableDeblockingFilterIdc, 0, 2)?;
        if idc != 1 {
            r.read_se_in(s, Attr::SliceAlphaC0OffsetDiv2, -6, 6)?;
            r.read_se_in(s, Attr::SliceBetaOffsetDiv2, -6, 6)?;
        }
    }

    if let Some(rate) = pps.slice_groups.map_type.as_ref().and_then(|m| m.change_rate()) {
        let bits = change_cycle_bits(sps.pic_size_in_map_units(), rate);
        header.slice_group_change_cycle = r.read(s, Attr::SliceGroupChangeCycle, bits)?;
    }

    Ok(Some(header))
}

fn ref_pic_list_modification(s: &mut ReaderState<'_>, r: &mut RbspReader<'_>, slice_type: SliceType) -> Result<()> {
    if r.read_flag(s, Attr::RefPicListModificationFlagL0)? {
        modification_operations(s, r)?;
    }
    if slice_type == SliceType::B && r.read_flag(s, Attr::RefPicListModificationFlagL1)? {
        modification_operations(s, r)?;
    }
    Ok(())
}

fn modification_operations(s: &mut ReaderState<'_>, r: &mut RbspReader<'_>) -> Result<()> {
    for _ in 0..MAX_OPERATIONS {
        match r.read_ue_in(s, Attr::ModificationOfPicNumsIdc, 0, 3)? {
            0 | 1 => {
                r.read_ue(s, Attr::AbsDiffPicNumMinus1)?;
            }
            2 => {
                r.read_ue(s, Attr::LongTermPicNum)?;
            }
            _ => return Ok(()),
        }
    }
    bail!(H264Error::OutOfRange {
        name: "modification_of_pic_nums_idc",
        value: MAX_OPERATIONS as i64,
        min: 0,
        max: MAX_OPERATIONS as i64 - 1
    })
}

fn pred_weight_table(s: &mut ReaderState<'_>, r: &mut RbspReader<'_>, sps: &Sps, header: &SliceHeader) -> Result<()> {
    r.read_ue_in(s, Attr::LumaLog2WeightDenom, 0, 7)?;
    let chroma = sps.chroma_array_type() != 0;
    if chroma {
        r.read_ue_in(s, Attr::ChromaLog2WeightDenom, 0, 7)?;
    }

    weights(s, r, header.num_ref_idx_l0_active, chroma)?;
    if header.slice_type == SliceType::B {
        weights(s, r, header.num_ref_idx_l1_active, chroma)?;
    }
    Ok(())
}

fn weights(s: &mut ReaderState<'_>, r: &mut RbspReader<'_>, count: u32, chroma: bool) -> Result<()> {
    for _ in 0..count {
        if r.read_flag(s, Attr::LumaWeightFlag)? {
            r.read_se_in(s, Attr::LumaWeight, -128, 127)?;
            r.read_se_in(s, Attr::LumaOffset, -128, 127)?;
        }
        if chroma && r.read_flag(s, Attr::ChromaWeightFlag)? {
            for _ in 0..2 {
                r.read_se_in(s, Attr::ChromaWeight, -128, 127)?;
                r.read_se_in(s, Attr::ChromaOffset, -128, 127)?;
            }
        }
    }
    Ok(())
}

fn dec_ref_pic_marking(s: &mut ReaderState<'_>, r: &mut RbspReader<'_>, nal: NalHeader) -> Result<()> {
    if nal.is_idr() {
        r.read_flag(s, Attr::NoOutputOfPriorPicsFlag)?;
        r.read_flag(s, Attr::LongTermReferenceFlag)?;
        return Ok(());
    }

    if !r.read_flag(s, Attr::AdaptiveRefPicMarkingModeFlag)? {
        return Ok(());
    }

    for _ in 0..MAX_OPERATIONS {
        let operation = r.read_ue_in(s, Attr::MemoryManagementControlOperation, 0, 6)?;
        if operation == 0 {
            return Ok(());
        }
        if operation == 1 || operation == 3 {
            r.read_ue(s, Attr::DifferenceOfPicNumsMinus1)?;
        }
        if operation == 2 {
            r.read_ue(s, Attr::LongTermPicNum)?;
        }
        if operation == 3 || operation == 6 {
            r.read_ue(s, Attr::LongTermFrameIdx)?;
        }
        if operation == 4 {
            r.read_ue(s, Attr::MaxLongTermFrameIdxPlus1)?;
        }
    }
    bail!(H264Error::OutOfRange {
        name: "memory_management_control_operation",
        value: MAX_OPERATIONS as i64,
        min: 0,
        max: MAX_OPERATIONS as i64 - 1
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use log::Level;

    use super::*;
    use crate::formats::FormatId;
    use crate::formats::h264::rbsp::Rbsp;
    use crate::formats::h264::slice_group::SliceGroups;
    use crate::utils::bitstream_io::BitstreamReader;

    pub(crate) fn tables() -> (HashMap<u32, Sps>, HashMap<u32, Pps>) {
        let sps = Sps {
            profile_idc: 66,
            chroma_format_idc: 1,
            bit_depth_luma: 8,
            bit_depth_chroma: 8,
            log2_max_frame_num: 4,
            pic_order_cnt_type: 2,
            max_num_ref_frames: 1,
            pic_width_in_mbs: 2,
            pic_height_in_map_units: 2,
            frame_mbs_only: true,
            direct_8x8_inference: true,
            ..Default::default()
        };
        let pps = Pps {
            pic_parameter_set_id: 0,
            seq_parameter_set_id: 0,
            entropy_coding_mode: false,
            bottom_field_pic_order_in_frame_present: false,
            slice_groups: SliceGroups::default(),
            num_ref_idx_l0_default_active: 1,
            num_ref_idx_l1_default_active: 1,
            weighted_pred: false,
            weighted_bipred_idc: 0,
            pic_init_qp: 26,
            deblocking_filter_control_present: true,
            constrained_intra_pred: false,
            redundant_pic_cnt_present: false,
            transform_8x8_mode: false,
        };
        (HashMap::from([(0, sps)]), HashMap::from([(0, pps)]))
    }

    fn parse(payload: &[u8], nal: NalHeader) -> (bool, Option<SliceHeader>, u64) {
        let (sps, pps) = tables();
        let rbsp = Rbsp::new(payload, 0);
        let mut r = rbsp.reader();
        let mut state = ReaderState::new(BitstreamReader::new(payload), FormatId::H264, Level::Error);
        let mut header = None;
        let valid = state.parse_mapped(H264Header::SliceHeader, &mut r, |s, r| {
            header = slice_header(s, r, nal, &sps, &pps)?;
            Ok(())
        });
        let position = r.bits().bit_position().unwrap_or(0);
        (valid, header, position)
    }

    const IDR: NalHeader = NalHeader {
        nal_ref_idc: 3,
        nal_unit_type: NAL_SLICE_IDR,
    };

    #[test]
    fn idr_header() {
        // first_mb 0, slice_type 7 (I), pps 0, frame_num 0, idr_pic_id 0,
        // no_output_of_prior_pics 0, long_term_reference 0, slice_qp_delta 0,
        // disable_deblocking_filter_idc 1
        let payload = [0b1000_1000, 0b1000_0100, 0b1010_0000];
        let (valid, header, position) = parse(&payload, IDR);
        assert!(valid);
        let header = header.expect("header");
        assert_eq!(header.slice_type, SliceType::I);
        assert_eq!(header.slice_qp, 26);
        assert_eq!(position, 20);
    }

    #[test]
    fn first_mb_beyond_the_picture() {
        // first_mb_in_slice 4 in a four macroblock picture
        let payload = [0b0010_1000, 0b1000_1000, 0b0100_0010, 0b0100_0000];
        let (valid, _, _) = parse(&payload, IDR);
        assert!(!valid);
    }

    #[test]
    fn p_slice_in_idr_is_rejected() {
        // slice_type 5 (P)
        let payload = [0b1001_1010, 0b0001_0000, 0b1001_0000];
        let (valid, _, _) = parse(&payload, IDR);
        assert!(!valid);
    }

    #[test]
    fn unknown_pps_stops_the_header() {
        // pps id 1
        let payload = [0b1000_1000, 0b0100_0000];
        let (valid, header, _) = parse(&payload, IDR);
        assert!(valid);
        assert!(header.is_none());
    }
}
