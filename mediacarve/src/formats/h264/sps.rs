//! Sequence parameter sets, with VUI and HRD parameters.

use anyhow::{Result, bail};
use log::Level::Error;

use crate::formats::h264::rbsp::RbspReader;
use crate::formats::h264::{H264Attribute as Attr, H264Header};
use crate::log_or_invalidate;
use crate::process::reader_state::ReaderState;
use crate::result::attribute::{AttributeValue, Forbidden, Lookup, Reserved, ValueFormat};
use crate::utils::errors::H264Error;

/// Largest frame of any level (level 6.2, 8192x4320 and beyond).
pub const MAX_FRAME_SIZE_IN_MBS: u32 = 139_264;

pub const MAX_SPS_COUNT: u32 = 32;

const VIDEO_FORMAT: Lookup = Lookup(&[
    Some("component"),
    Some("PAL"),
    Some("NTSC"),
    Some("SECAM"),
    Some("MAC"),
    Some("unspecified"),
]);

const EXTENDED_SAR: u32 = 255;

/// `profile_idc` display names. Unknown values are checked separately.
pub struct Profile;

impl Profile {
    pub fn label(profile_idc: u32) -> Option<&'static str> {
        Some(match profile_idc {
            44 => "CAVLC 4:4:4 Intra",
            66 => "Baseline",
            77 => "Main",
            83 => "Scalable Baseline",
            86 => "Scalable High",
            88 => "Extended",
            100 => "High",
            110 => "High 10",
            118 => "Multiview High",
            122 => "High 4:2:2",
            128 => "Stereo High",
            134 => "MFC High",
            135 => "MFC Depth High",
            138 => "Multiview Depth High",
            139 => "Enhanced Multiview Depth High",
            244 => "High 4:4:4 Predictive",
            _ => return None,
        })
    }

    /// Profiles whose SPS carries chroma format, bit depth and scaling lists.
    pub fn is_high(profile_idc: u32) -> bool {
        matches!(profile_idc, 100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135)
    }
}

impl ValueFormat for Profile {
    fn display(&self, value: &AttributeValue) -> String {
        let label = value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .and_then(Profile::label)
            .unwrap_or("unknown");
        format!("{value} ({label})")
    }
}

/// `aspect_ratio_idc`: table entries 0-16 and `Extended_SAR`.
struct AspectRatioIdc;

impl AspectRatioIdc {
    const TABLE: [&'static str; 17] = [
        "unspecified",
        "1:1",
        "12:11",
        "10:11",
        "16:11",
        "40:33",
        "24:11",
        "20:11",
        "32:11",
        "80:33",
        "18:11",
        "15:11",
        "64:33",
        "160:99",
        "4:3",
        "3:2",
        "2:1",
    ];
}

impl ValueFormat for AspectRatioIdc {
    fn display(&self, value: &AttributeValue) -> String {
        let label = match value.as_u64() {
            Some(v) if v == u64::from(EXTENDED_SAR) => "Extended_SAR",
            Some(v) => Self::TABLE.get(v as usize).copied().unwrap_or("reserved"),
            None => "reserved",
        };
        format!("{value} ({label})")
    }

    fn is_valid(&self, value: &AttributeValue) -> bool {
        value
            .as_u64()
            .is_some_and(|v| v < Self::TABLE.len() as u64 || v == u64::from(EXTENDED_SAR))
    }
}

/// The fields of a sequence parameter set later syntax depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sps {
    pub profile_idc: u32,
    pub seq_parameter_set_id: u32,
    pub chroma_format_idc: u32,
    pub separate_colour_plane: bool,
    pub bit_depth_luma: u32,
    pub bit_depth_chroma: u32,
    pub log2_max_frame_num: u32,
    pub pic_order_cnt_type: u32,
    pub log2_max_pic_order_cnt_lsb: u32,
    pub delta_pic_order_always_zero: bool,
    pub max_num_ref_frames: u32,
    pub pic_width_in_mbs: u32,
    pub pic_height_in_map_units: u32,
    pub frame_mbs_only: bool,
    pub mb_adaptive_frame_field: bool,
    pub direct_8x8_inference: bool,
}

impl Sps {
    /// `ChromaArrayType`
    pub fn chroma_array_type(&self) -> u32 {
        if self.separate_colour_plane {
            0
        } else {
            self.chroma_format_idc
        }
    }

    pub fn frame_height_in_mbs(&self) -> u32 {
        (2 - u32::from(self.frame_mbs_only)) * self.pic_height_in_map_units
    }

    pub fn pic_size_in_map_units(&self) -> u32 {
        self.pic_width_in_mbs * self.pic_height_in_map_units
    }

    /// `QpBdOffsetY`
    pub fn qp_bd_offset_y(&self) -> i32 {
        6 * (self.bit_depth_luma as i32 - 8)
    }
}

/// `seq_parameter_set_data()` followed by the trailing bits.
pub fn seq_parameter_set(s: &mut ReaderState<'_>, r: &mut RbspReader<'_>) -> Result<Sps> {
    let sps = seq_parameter_set_data(s, r)?;
    r.trailing_bits(s)?;
    Ok(sps)
}

pub fn seq_parameter_set_data(s: &mut ReaderState<'_>, r: &mut RbspReader<'_>) -> Result<Sps> {
    let mut sps = Sps {
        chroma_format_idc: 1,
        bit_depth_luma: 8,
        bit_depth_chroma: 8,
        ..Default::default()
    };

    sps.profile_idc = r.read_with(s, Attr::ProfileIdc, 8, &Profile)?;
    if Profile::label(sps.profile_idc).is_none() {
        log_or_invalidate!(s, Error, H264Error::UnknownProfile(sps.profile_idc));
    }
    r.read_flag(s, Attr::ConstraintSet0Flag)?;
    r.read_flag(s, Attr::ConstraintSet1Flag)?;
    r.read_flag(s, Attr::ConstraintSet2Flag)?;
    r.read_flag(s, Attr::ConstraintSet3Flag)?;
    r.read_flag(s, Attr::ConstraintSet4Flag)?;
    r.read_flag(s, Attr::ConstraintSet5Flag)?;
    r.read_with(s, Attr::ReservedZero2Bits, 2, &Reserved(0))?;
    r.read_with(s, Attr::LevelIdc, 8, &Forbidden(0))?;
    sps.seq_parameter_set_id = r.read_ue_in(s, Attr::SeqParameterSetId, 0, MAX_SPS_COUNT - 1)?;

    if Profile::is_high(sps.profile_idc) {
        sps.chroma_format_idc = r.read_ue_in(s, Attr::ChromaFormatIdc, 0, 3)?;
        if sps.chroma_format_idc == 3 {
            sps.separate_colour_plane = r.read_flag(s, Attr::SeparateColourPlaneFlag)?;
        }
        sps.bit_depth_luma = 8 + r.read_ue_in(s, Attr::BitDepthLumaMinus8, 0, 6)?;
        sps.bit_depth_chroma = 8 + r.read_ue_in(s, Attr::BitDepthChromaMinus8, 0, 6)?;
        r.read_flag(s, Attr::QpprimeYZeroTransformBypassFlag)?;
        if r.read_flag(s, Attr::SeqScalingMatrixPresentFlag)? {
            let count = if sps.chroma_format_idc != 3 { 8 } else { 12 };
            scaling_matrix(s, r, count)?;
        }
    }

    sps.log2_max_frame_num = 4 + r.read_ue_in(s, Attr::Log2MaxFrameNumMinus4, 0, 12)?;
    sps.pic_order_cnt_type = r.read_ue_in(s, Attr::PicOrderCntType, 0, 2)?;
    match sps.pic_order_cnt_type {
        0 => {
            sps.log2_max_pic_order_cnt_lsb = 4 + r.read_ue_in(s, Attr::Log2MaxPicOrderCntLsbMinus4, 0, 12)?;
        }
        1 => {
            sps.delta_pic_order_always_zero = r.read_flag(s, Attr::DeltaPicOrderAlwaysZeroFlag)?;
            r.read_se(s, Attr::OffsetForNonRefPic)?;
            r.read_se(s, Attr::OffsetForTopToBottomField)?;
            let cycle = r.read_ue_in(s, Attr::NumRefFramesInPicOrderCntCycle, 0, 255)?;
            for _ in 0..cycle {
                r.read_se(s, Attr::OffsetForRefFrame)?;
            }
        }
        _ => {}
    }

    sps.max_num_ref_frames = r.read_ue_in(s, Attr::MaxNumRefFrames, 0, 16)?;
    r.read_flag(s, Attr::GapsInFrameNumValueAllowedFlag)?;
    let width = r.read_ue_in(s, Attr::PicWidthInMbsMinus1, 0, MAX_FRAME_SIZE_IN_MBS - 1)? + 1;
    let height = r.read_ue_in(s, Attr::PicHeightInMapUnitsMinus1, 0, MAX_FRAME_SIZE_IN_MBS - 1)? + 1;
    sps.pic_width_in_mbs = width;
    sps.pic_height_in_map_units = height;
    sps.frame_mbs_only = r.read_flag(s, Attr::FrameMbsOnlyFlag)?;
    if !sps.frame_mbs_only {
        sps.mb_adaptive_frame_field = r.read_flag(s, Attr::MbAdaptiveFrameFieldFlag)?;
    }
    if u64::from(width) * u64::from(sps.frame_height_in_mbs()) > u64::from(MAX_FRAME_SIZE_IN_MBS) {
        bail!(H264Error::PictureTooLarge {
            width,
            height: sps.frame_height_in_mbs()
        });
    }
    sps.direct_8x8_inference = r.read_flag(s, Attr::Direct8x8InferenceFlag)?;
    if !sps.frame_mbs_only && !sps.direct_8x8_inference {
        log_or_invalidate!(
            s,
            Error,
            H264Error::OutOfRange {
                name: "direct_8x8_inference_flag",
                value: 0,
                min: 1,
                max: 1
            }
        );
    }

    if r.read_flag(s, Attr::FrameCroppingFlag)? {
        r.read_ue(s, Attr::FrameCropLeftOffset)?;
        r.read_ue(s, Attr::FrameCropRightOffset)?;
        r.read_ue(s, Attr::FrameCropTopOffset)?;
        r.read_ue(s, Attr::FrameCropBottomOffset)?;
    }

    if r.read_flag(s, Attr::VuiParametersPresentFlag)? {
        s.parse_mapped(H264Header::VuiParameters, r, |s, r| vui_parameters(s, r));
    }

    Ok(sps)
}

/// `scaling_list()` for each of `count` lists. Only whether a list is
/// explicit, default or falls back is recorded.
pub fn scaling_matrix(s: &mut ReaderState<'_>, r: &mut RbspReader<'_>, count: usize) -> Result<()> {
    for i in 0..count {
        let present = r.bits().get()?;
        let kind = if !present {
            "fall-back"
        } else if scaling_list(r, if i < 6 { 16 } else { 64 })? {
            "default"
        } else {
            "explicit"
        };
        s.add_attribute(Attr::ScalingList, format!("{i}: {kind}"));
    }
    Ok(())
}

/// Reads one list of delta-coded scale values. Returns `true` when the list
/// selects the default matrix.
fn scaling_list(r: &mut RbspReader<'_>, size: usize) -> Result<bool> {
    let mut last_scale = 8;
    let mut next_scale = 8;
    let mut use_default = false;

    for j in 0..size {
        if next_scale != 0 {
            let delta = r.bits().se()?;
            if !(-128..=127).contains(&delta) {
                bail!(H264Error::OutOfRange {
                    name: "delta_scale",
                    value: i64::from(delta),
                    min: -128,
                    max: 127
                });
            }
            next_scale = (last_scale + delta + 256) % 256;
            use_default = j == 0 && next_scale == 0;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }

    Ok(use_default)
}

fn vui_parameters(s: &mut ReaderState<'_>, r: &mut RbspReader<'_>) -> Result<()> {
    if r.read_flag(s, Attr::AspectRatioInfoPresentFlag)? {
        let idc = r.read_with(s, Attr::AspectRatioIdc, 8, &AspectRatioIdc)?;
        if idc == EXTENDED_SAR {
            r.read(s, Attr::SarWidth, 16)?;
            r.read(s, Attr::SarHeight, 16)?;
        }
    }

    if r.read_flag(s, Attr::OverscanInfoPresentFlag)? {
        r.read_flag(s, Attr::OverscanAppropriateFlag)?;
    }

    if r.read_flag(s, Attr::VideoSignalTypePresentFlag)? {
        r.read_with(s, Attr::VideoFormat, 3, &VIDEO_FORMAT)?;
        r.read_flag(s, Attr::VideoFullRangeFlag)?;
        if r.read_flag(s, Attr::ColourDescriptionPresentFlag)? {
            r.read(s, Attr::ColourPrimaries, 8)?;
            r.read(s, Attr::TransferCharacteristics, 8)?;
            r.read(s, Attr::MatrixCoefficients, 8)?;
        }
    }

    if r.read_flag(s, Attr::ChromaLocInfoPresentFlag)? {
        r.read_ue_in(s, Attr::ChromaSampleLocTypeTopField, 0, 5)?;
        r.read_ue_in(s, Attr::ChromaSampleLocTypeBottomField, 0, 5)?;
    }

    if r.read_flag(s, Attr::TimingInfoPresentFlag)? {
        r.read_with(s, Attr::NumUnitsInTick, 32, &Forbidden(0))?;
        r.read_with(s, Attr::TimeScale, 32, &Forbidden(0))?;
        r.read_flag(s, Attr::FixedFrameRateFlag)?;
    }

    let nal_hrd = r.read_flag(s, Attr::NalHrdParametersPresentFlag)?;
    if nal_hrd {
        s.parse_mapped(H264Header::HrdParameters, r, |s, r| hrd_parameters(s, r));
    }
    let vcl_hrd = r.read_flag(s, Attr::VclHrdParametersPresentFlag)?;
    if vcl_hrd {
        s.parse_mapped(H264Header::HrdParameters, r, |s, r| hrd_parameters(s, r));
    }
    if nal_hrd || vcl_hrd {
        r.read_flag(s, Attr::LowDelayHrdFlag)?;
    }

    r.read_flag(s, Attr::PicStructPresentFlag)?;
    if r.read_flag(s, Attr::BitstreamRestrictionFlag)? {
        r.read_flag(s, Attr::MotionVectorsOverPicBoundariesFlag)?;
        r.read_ue_in(s, Attr::MaxBytesPerPicDenom, 0, 16)?;
        r.read_ue_in(s, Attr::MaxBitsPerMbDenom, 0, 16)?;
        r.read_ue_in(s, Attr::Log2MaxMvLengthHorizontal, 0, 16)?;
        r.read_ue_in(s, Attr::Log2MaxMvLengthVertical, 0, 16)?;
        r.read_ue(s, Attr::MaxNumReorderFrames)?;
        r.read_ue(s, Attr::MaxDecFrameBuffering)?;
    }
    Ok(())
}

fn hrd_parameters(s: &mut ReaderState<'_>, r: &mut RbspReader<'_>) -> Result<()> {
    let cpb_cnt = r.read_ue_in(s, Attr::CpbCntMinus1, 0, 31)? + 1;
    r.read(s, Attr::BitRateScale, 4)?;
    r.read(s, Attr::CpbSizeScale, 4)?;
    for _ in 0..cpb_cnt {
        r.read_ue_in(s, Attr::BitRateValueMinus1, 0, u32::MAX - 1)?;
        r.read_ue_in(s, Attr::CpbSizeValueMinus1, 0, u32::MAX - 1)?;
        r.read_flag(s, Attr::CbrFlag)?;
    }
    r.read(s, Attr::InitialCpbRemovalDelayLengthMinus1, 5)?;
    r.read(s, Attr::CpbRemovalDelayLengthMinus1, 5)?;
    r.read(s, Attr::DpbOutputDelayLengthMinus1, 5)?;
    r.read(s, Attr::TimeOffsetLength, 5)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use log::Level;

    use super::*;
    use crate::formats::FormatId;
    use crate::formats::h264::rbsp::Rbsp;
    use crate::utils::bitstream_io::BitstreamReader;

    fn parse(payload: &[u8]) -> (bool, Option<Sps>) {
        let rbsp = Rbsp::new(payload, 0);
        let mut state = ReaderState::new(BitstreamReader::new(payload), FormatId::H264, Level::Error);
        let mut sps = None;
        let valid = state.parse(H264Header::SequenceParameterSet, |s| {
            let mut r = rbsp.reader();
            sps = Some(seq_parameter_set(s, &mut r)?);
            s.reader().set_position(payload.len() as u64)?;
            Ok(())
        });
        (valid, sps)
    }

    #[test]
    fn baseline_sps() {
        let (valid, sps) = parse(&crate::formats::h264::tests::SPS[5..]);
        assert!(valid);
        let sps = sps.expect("sps");
        assert_eq!(sps.profile_idc, 66);
        assert_eq!(sps.pic_width_in_mbs, 2);
        assert_eq!(sps.pic_height_in_map_units, 2);
        assert_eq!(sps.pic_order_cnt_type, 2);
        assert!(sps.frame_mbs_only);
        assert_eq!(sps.chroma_array_type(), 1);
    }

    #[test]
    fn unknown_profile_invalidates() {
        let mut payload = crate::formats::h264::tests::SPS[5..].to_vec();
        payload[0] = 0x43;
        assert!(!parse(&payload).0);
    }

    #[test]
    fn missing_stop_bit_invalidates() {
        let mut payload = crate::formats::h264::tests::SPS[5..].to_vec();
        payload.push(0x10);
        assert!(!parse(&payload).0);
    }

    #[test]
    fn default_scaling_list() -> anyhow::Result<()> {
        // delta_scale = -8 turns the first scale to zero
        let rbsp = Rbsp::new(&[0b0000_1000, 0b1000_0000], 0);
        let mut r = rbsp.reader();
        assert!(scaling_list(&mut r, 16)?);
        assert_eq!(r.bits().bit_position()?, 9);
        Ok(())
    }
}
