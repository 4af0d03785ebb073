//! Picture parameter sets.

use std::collections::HashMap;

use anyhow::{Result, bail};
use log::Level::Warn;

use crate::formats::h264::H264Attribute as Attr;
use crate::formats::h264::rbsp::RbspReader;
use crate::formats::h264::slice_group::{SliceGroupMapType, SliceGroups};
use crate::formats::h264::sps::{MAX_SPS_COUNT, Sps, scaling_matrix};
use crate::log_or_invalidate;
use crate::process::reader_state::ReaderState;
use crate::result::attribute::InRange;
use crate::utils::errors::H264Error;

pub const MAX_PPS_COUNT: u32 = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pps {
    pub pic_parameter_set_id: u32,
    pub seq_parameter_set_id: u32,
    pub entropy_coding_mode: bool,
    pub bottom_field_pic_order_in_frame_present: bool,
    pub slice_groups: SliceGroups,
    pub num_ref_idx_l0_default_active: u32,
    pub num_ref_idx_l1_default_active: u32,
    pub weighted_pred: bool,
    pub weighted_bipred_idc: u32,
    pub pic_init_qp: i32,
    pub deblocking_filter_control_present: bool,
    pub constrained_intra_pred: bool,
    pub redundant_pic_cnt_present: bool,
    pub transform_8x8_mode: bool,
}

/// `pic_parameter_set_rbsp()`.
///
/// Returns `None` when the referenced SPS is unknown: the rest of the syntax
/// depends on it, so the PPS is kept opaque.
pub fn pic_parameter_set(
    s: &mut ReaderState<'_>,
    r: &mut RbspReader<'_>,
    sps_table: &HashMap<u32, Sps>,
) -> Result<Option<Pps>> {
    let pic_parameter_set_id = r.read_ue_in(s, Attr::PicParameterSetId, 0, MAX_PPS_COUNT - 1)?;
    let seq_parameter_set_id = r.read_ue_in(s, Attr::SeqParameterSetId, 0, MAX_SPS_COUNT - 1)?;
    let Some(sps) = sps_table.get(&seq_parameter_set_id) else {
        log_or_invalidate!(
            s,
            Warn,
            H264Error::UndefinedParameterSet {
                kind: "SPS",
                id: seq_parameter_set_id
            }
        );
        r.skip_to_end()?;
        return Ok(None);
    };

    let entropy_coding_mode = r.read_flag(s, Attr::EntropyCodingModeFlag)?;
    let bottom_field_pic_order_in_frame_present = r.read_flag(s, Attr::BottomFieldPicOrderInFramePresentFlag)?;
    let slice_groups = slice_groups(s, r, sps)?;

    let num_ref_idx_l0_default_active = r.read_ue_in(s, Attr::NumRefIdxL0DefaultActiveMinus1, 0, 31)? + 1;
    let num_ref_idx_l1_default_active = r.read_ue_in(s, Attr::NumRefIdxL1DefaultActiveMinus1, 0, 31)? + 1;
    let weighted_pred = r.read_flag(s, Attr::WeightedPredFlag)?;
    let weighted_bipred_idc = r.read_with(s, Attr::WeightedBipredIdc, 2, &InRange(0, 2))?;
    let pic_init_qp = 26 + r.read_se_in(s, Attr::PicInitQpMinus26, -(26 + sps.qp_bd_offset_y()), 25)?;
    r.read_se_in(s, Attr::PicInitQsMinus26, -26, 25)?;
    r.read_se_in(s, Attr::ChromaQpIndexOffset, -12, 12)?;
    let deblocking_filter_control_present = r.read_flag(s, Attr::DeblockingFilterControlPresentFlag)?;
    let constrained_intra_pred = r.read_flag(s, Attr::ConstrainedIntraPredFlag)?;
    let redundant_pic_cnt_present = r.read_flag(s, Attr::RedundantPicCntPresentFlag)?;

    let mut transform_8x8_mode = false;
    if r.more_rbsp_data()? {
        transform_8x8_mode = r.read_flag(s, Attr::Transform8x8ModeFlag)?;
        if r.read_flag(s, Attr::PicScalingMatrixPresentFlag)? {
            let chroma_lists = if sps.chroma_format_idc != 3 { 2 } else { 6 };
            scaling_matrix(s, r, 6 + chroma_lists * usize::from(transform_8x8_mode))?;
        }
        r.read_se_in(s, Attr::SecondChromaQpIndexOffset, -12, 12)?;
    }
    r.trailing_bits(s)?;

    Ok(Some(Pps {
        pic_parameter_set_id,
        seq_parameter_set_id,
        entropy_coding_mode,
        bottom_field_pic_order_in_frame_present,
        slice_groups,
        num_ref_idx_l0_default_active,
        num_ref_idx_l1_default_active,
        weighted_pred,
        weighted_bipred_idc,
        pic_init_qp,
        deblocking_filter_control_present,
        constrained_intra_pred,
        redundant_pic_cnt_present,
        transform_8x8_mode,
    }))
}

fn slice_groups(s: &mut ReaderState<'_>, r: &mut RbspReader<'_>, sps: &Sps) -> Result<SliceGroups> {
    let count = r.read_ue_in(s, Attr::NumSliceGroupsMinus1, 0, 7)? + 1;
    if count == 1 {
        return Ok(SliceGroups::default());
    }

    let map_type = r.read_ue_in(s, Attr::SliceGroupMapType, 0, 6)?;
    let size = sps.pic_size_in_map_units();

    let map_type = match map_type {
        0 => {
            let mut run_length_minus1 = Vec::with_capacity(count as usize);
            for _ in 0..count {
                run_length_minus1.push(r.read_ue_in(s, Attr::RunLengthMinus1, 0, size - 1)?);
            }
            SliceGroupMapType::Interleaved { run_length_minus1 }
        }
        1 => SliceGroupMapType::Dispersed,
        2 => {
            let mut top_left = Vec::with_capacity(count as usize - 1);
            let mut bottom_right = Vec::with_capacity(count as usize - 1);
            for _ in 0..count - 1 {
                let tl = r.read_ue_in(s, Attr::TopLeft, 0, size - 1)?;
                let br = r.read_ue_in(s, Attr::BottomRight, tl, size - 1)?;
                if tl % sps.pic_width_in_mbs > br % sps.pic_width_in_mbs {
                    bail!(H264Error::OutOfRange {
                        name: "top_left",
                        value: i64::from(tl),
                        min: 0,
                        max: i64::from(br)
                    });
                }
                top_left.push(tl);
                bottom_right.push(br);
            }
            SliceGroupMapType::Foreground { top_left, bottom_right }
        }
        3..=5 => {
            let change_direction = r.read_flag(s, Attr::SliceGroupChangeDirectionFlag)?;
            let change_rate = r.read_ue_in(s, Attr::SliceGroupChangeRateMinus1, 0, size - 1)? + 1;
            match map_type {
                3 => SliceGroupMapType::BoxOut {
                    change_direction,
                    change_rate,
                },
                4 => SliceGroupMapType::RasterScan {
                    change_direction,
                    change_rate,
                },
                _ => SliceGroupMapType::Wipe {
                    change_direction,
                    change_rate,
                },
            }
        }
        _ => {
            let units = r.read_ue_in(s, Attr::PicSizeInMapUnitsMinus1, size - 1, size - 1)? + 1;
            let bits = u32::BITS - (count - 1).leading_zeros();
            let mut slice_group_id = Vec::with_capacity(units as usize);
            for _ in 0..units {
                let id = r.bits().get_bits(bits)?;
                if id >= count {
                    bail!(H264Error::OutOfRange {
                        name: "slice_group_id",
                        value: i64::from(id),
                        min: 0,
                        max: i64::from(count - 1)
                    });
                }
                slice_group_id.push(id);
            }
            SliceGroupMapType::Explicit { slice_group_id }
        }
    };

    Ok(SliceGroups {
        count,
        map_type: Some(map_type),
    })
}

#[cfg(test)]
mod tests {
    use log::Level;

    use super::*;
    use crate::formats::FormatId;
    use crate::formats::h264::H264Header;
    use crate::formats::h264::rbsp::Rbsp;
    use crate::formats::h264::tests::PPS;
    use crate::utils::bitstream_io::BitstreamReader;

    fn parse(payload: &[u8], level: Level, sps_table: &HashMap<u32, Sps>) -> (bool, Option<Pps>) {
        let rbsp = Rbsp::new(payload, 0);
        let mut state = ReaderState::new(BitstreamReader::new(payload), FormatId::H264, level);
        let mut pps = None;
        let valid = state.parse(H264Header::PictureParameterSet, |s| {
            pps = pic_parameter_set(s, &mut rbsp.reader(), sps_table)?;
            s.reader().set_position(payload.len() as u64)?;
            Ok(())
        });
        (valid, pps)
    }

    fn sps_table() -> HashMap<u32, Sps> {
        let sps = Sps {
            chroma_format_idc: 1,
            bit_depth_luma: 8,
            bit_depth_chroma: 8,
            pic_width_in_mbs: 2,
            pic_height_in_map_units: 2,
            frame_mbs_only: true,
            ..Default::default()
        };
        HashMap::from([(0, sps)])
    }

    #[test]
    fn baseline_pps() {
        let (valid, pps) = parse(&PPS[5..], Level::Error, &sps_table());
        assert!(valid);
        let pps = pps.expect("pps");
        assert!(!pps.entropy_coding_mode);
        assert_eq!(pps.slice_groups.count, 1);
        assert_eq!(pps.pic_init_qp, 26);
        assert!(pps.deblocking_filter_control_present);
        assert!(!pps.transform_8x8_mode);
    }

    #[test]
    fn unknown_sps_is_a_soft_error() {
        let (valid, pps) = parse(&PPS[5..], Level::Error, &HashMap::new());
        assert!(valid);
        assert!(pps.is_none());

        let (valid, _) = parse(&PPS[5..], Level::Warn, &HashMap::new());
        assert!(!valid);
    }
}
