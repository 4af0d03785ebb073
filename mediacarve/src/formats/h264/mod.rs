//! H.264/AVC Annex B byte streams (ITU-T H.264).
//!
//! ## Framing
//!
//! NAL units follow a `00 00 01` start code prefix, optionally preceded by a
//! zero byte. The first byte after the prefix is the NAL unit header:
//!
//! ```text
//!  7   6 5   4 3 2 1 0
//! +---+-----+---------+
//! | F | NRI |  Type   |
//! +---+-----+---------+
//! ```
//!
//! The payload runs to the next `00 00 00`, `00 00 01` or `00 00 02`. Inside
//! it every `00 00 03` has its `03` removed to recover the RBSP; nested result
//! nodes parsed from the RBSP are mapped back to input offsets.
//!
//! ## Slice Data
//!
//! CAVLC coded slices are entropy decoded macroblock by macroblock, which is
//! the strongest check this carver has: a random byte run rarely survives a
//! full slice. CABAC slices, MBAFF frames and data partitions are framed only.

pub mod carver;
pub mod cavlc;
pub mod coded_coefficients;
pub mod macroblock;
pub mod nal;
pub mod pps;
pub mod rbsp;
pub mod slice_data;
pub mod slice_group;
pub mod slice_header;
pub mod sps;

pub use carver::H264Carver;

use crate::result::Named;
use crate::result::attribute::Lookup;

pub const NAL_SLICE: u8 = 1;
pub const NAL_SLICE_DATA_PARTITION_A: u8 = 2;
pub const NAL_SLICE_DATA_PARTITION_B: u8 = 3;
pub const NAL_SLICE_DATA_PARTITION_C: u8 = 4;
pub const NAL_SLICE_IDR: u8 = 5;
pub const NAL_SEI: u8 = 6;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;
pub const NAL_AUD: u8 = 9;
pub const NAL_END_OF_SEQUENCE: u8 = 10;
pub const NAL_END_OF_STREAM: u8 = 11;
pub const NAL_FILLER_DATA: u8 = 12;
pub const NAL_SPS_EXTENSION: u8 = 13;
pub const NAL_PREFIX: u8 = 14;
pub const NAL_SUBSET_SPS: u8 = 15;
pub const NAL_AUXILIARY_SLICE: u8 = 19;
pub const NAL_SLICE_EXTENSION: u8 = 20;

pub const NAL_UNIT_TYPE: Lookup = Lookup(&[
    Some("Unspecified"),
    Some("Coded slice of a non-IDR picture"),
    Some("Coded slice data partition A"),
    Some("Coded slice data partition B"),
    Some("Coded slice data partition C"),
    Some("Coded slice of an IDR picture"),
    Some("Supplemental enhancement information"),
    Some("Sequence parameter set"),
    Some("Picture parameter set"),
    Some("Access unit delimiter"),
    Some("End of sequence"),
    Some("End of stream"),
    Some("Filler data"),
    Some("Sequence parameter set extension"),
    Some("Prefix NAL unit"),
    Some("Subset sequence parameter set"),
    Some("Reserved"),
    Some("Reserved"),
    Some("Reserved"),
    Some("Coded slice of an auxiliary coded picture"),
    Some("Coded slice extension"),
    Some("Coded slice extension for depth view components"),
    Some("Reserved"),
    Some("Reserved"),
    Some("Unspecified"),
    Some("Unspecified"),
    Some("Unspecified"),
    Some("Unspecified"),
    Some("Unspecified"),
    Some("Unspecified"),
    Some("Unspecified"),
    Some("Unspecified"),
]);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Named)]
pub enum H264Header {
    /// Reserved and unspecified NAL unit types, kept opaque.
    NalUnit,
    CodedSliceNonIdr,
    CodedSliceDataPartitionA,
    CodedSliceDataPartitionB,
    CodedSliceDataPartitionC,
    CodedSliceIdr,
    #[named(rename = "SupplementalEnhancementInformation")]
    Sei,
    SequenceParameterSet,
    PictureParameterSet,
    AccessUnitDelimiter,
    EndOfSequence,
    EndOfStream,
    FillerData,
    SequenceParameterSetExtension,
    PrefixNalUnit,
    SubsetSequenceParameterSet,
    CodedSliceAuxiliary,
    CodedSliceExtension,

    VuiParameters,
    HrdParameters,
    SeiMessage,
    SliceHeader,
    RefPicListModification,
    PredWeightTable,
    DecRefPicMarking,
    SliceData,
}

impl H264Header {
    /// Result node name of a NAL unit of type `nal_unit_type`.
    pub fn for_nal_unit_type(nal_unit_type: u8) -> Self {
        match nal_unit_type {
            NAL_SLICE => Self::CodedSliceNonIdr,
            NAL_SLICE_DATA_PARTITION_A => Self::CodedSliceDataPartitionA,
            NAL_SLICE_DATA_PARTITION_B => Self::CodedSliceDataPartitionB,
            NAL_SLICE_DATA_PARTITION_C => Self::CodedSliceDataPartitionC,
            NAL_SLICE_IDR => Self::CodedSliceIdr,
            NAL_SEI => Self::Sei,
            NAL_SPS => Self::SequenceParameterSet,
            NAL_PPS => Self::PictureParameterSet,
            NAL_AUD => Self::AccessUnitDelimiter,
            NAL_END_OF_SEQUENCE => Self::EndOfSequence,
            NAL_END_OF_STREAM => Self::EndOfStream,
            NAL_FILLER_DATA => Self::FillerData,
            NAL_SPS_EXTENSION => Self::SequenceParameterSetExtension,
            NAL_PREFIX => Self::PrefixNalUnit,
            NAL_SUBSET_SPS => Self::SubsetSequenceParameterSet,
            NAL_AUXILIARY_SLICE => Self::CodedSliceAuxiliary,
            NAL_SLICE_EXTENSION => Self::CodedSliceExtension,
            _ => Self::NalUnit,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Named)]
#[named(rename_all = "snake_case")]
pub enum H264Attribute {
    // Byte stream framing
    ZeroByte,
    #[named(rename = "start_code_prefix_one_3bytes")]
    StartCodePrefixOneThreeBytes,
    #[named(rename = "trailing_zero_8bits")]
    TrailingZeroBytes,
    EmulationPreventionBytes,
    NalUnitPayload,

    // nal_unit()
    ForbiddenZeroBit,
    NalRefIdc,
    NalUnitType,

    RbspStopOneBit,

    // seq_parameter_set_data()
    ProfileIdc,
    ConstraintSet0Flag,
    ConstraintSet1Flag,
    ConstraintSet2Flag,
    ConstraintSet3Flag,
    ConstraintSet4Flag,
    ConstraintSet5Flag,
    #[named(rename = "reserved_zero_2bits")]
    ReservedZero2Bits,
    LevelIdc,
    SeqParameterSetId,
    ChromaFormatIdc,
    SeparateColourPlaneFlag,
    BitDepthLumaMinus8,
    BitDepthChromaMinus8,
    QpprimeYZeroTransformBypassFlag,
    SeqScalingMatrixPresentFlag,
    ScalingList,
    Log2MaxFrameNumMinus4,
    PicOrderCntType,
    Log2MaxPicOrderCntLsbMinus4,
    DeltaPicOrderAlwaysZeroFlag,
    OffsetForNonRefPic,
    OffsetForTopToBottomField,
    NumRefFramesInPicOrderCntCycle,
    OffsetForRefFrame,
    MaxNumRefFrames,
    GapsInFrameNumValueAllowedFlag,
    PicWidthInMbsMinus1,
    PicHeightInMapUnitsMinus1,
    FrameMbsOnlyFlag,
    MbAdaptiveFrameFieldFlag,
    #[named(rename = "direct_8x8_inference_flag")]
    Direct8x8InferenceFlag,
    FrameCroppingFlag,
    FrameCropLeftOffset,
    FrameCropRightOffset,
    FrameCropTopOffset,
    FrameCropBottomOffset,
    VuiParametersPresentFlag,

    // vui_parameters()
    AspectRatioInfoPresentFlag,
    AspectRatioIdc,
    SarWidth,
    SarHeight,
    OverscanInfoPresentFlag,
    OverscanAppropriateFlag,
    VideoSignalTypePresentFlag,
    VideoFormat,
    VideoFullRangeFlag,
    ColourDescriptionPresentFlag,
    ColourPrimaries,
    TransferCharacteristics,
    MatrixCoefficients,
    ChromaLocInfoPresentFlag,
    ChromaSampleLocTypeTopField,
    ChromaSampleLocTypeBottomField,
    TimingInfoPresentFlag,
    NumUnitsInTick,
    TimeScale,
    FixedFrameRateFlag,
    NalHrdParametersPresentFlag,
    VclHrdParametersPresentFlag,
    LowDelayHrdFlag,
    PicStructPresentFlag,
    BitstreamRestrictionFlag,
    MotionVectorsOverPicBoundariesFlag,
    MaxBytesPerPicDenom,
    MaxBitsPerMbDenom,
    Log2MaxMvLengthHorizontal,
    Log2MaxMvLengthVertical,
    MaxNumReorderFrames,
    MaxDecFrameBuffering,

    // hrd_parameters()
    CpbCntMinus1,
    BitRateScale,
    CpbSizeScale,
    BitRateValueMinus1,
    CpbSizeValueMinus1,
    CbrFlag,
    InitialCpbRemovalDelayLengthMinus1,
    CpbRemovalDelayLengthMinus1,
    DpbOutputDelayLengthMinus1,
    TimeOffsetLength,

    // pic_parameter_set_rbsp()
    PicParameterSetId,
    EntropyCodingModeFlag,
    BottomFieldPicOrderInFramePresentFlag,
    NumSliceGroupsMinus1,
    SliceGroupMapType,
    RunLengthMinus1,
    TopLeft,
    BottomRight,
    SliceGroupChangeDirectionFlag,
    SliceGroupChangeRateMinus1,
    PicSizeInMapUnitsMinus1,
    SliceGroupId,
    NumRefIdxL0DefaultActiveMinus1,
    NumRefIdxL1DefaultActiveMinus1,
    WeightedPredFlag,
    WeightedBipredIdc,
    PicInitQpMinus26,
    PicInitQsMinus26,
    ChromaQpIndexOffset,
    DeblockingFilterControlPresentFlag,
    ConstrainedIntraPredFlag,
    RedundantPicCntPresentFlag,
    #[named(rename = "transform_8x8_mode_flag")]
    Transform8x8ModeFlag,
    PicScalingMatrixPresentFlag,
    SecondChromaQpIndexOffset,

    // access_unit_delimiter_rbsp(), filler_data_rbsp()
    PrimaryPicType,
    FillerBytes,

    // sei_message()
    PayloadType,
    PayloadSize,

    // slice_header()
    FirstMbInSlice,
    SliceType,
    ColourPlaneId,
    FrameNum,
    FieldPicFlag,
    BottomFieldFlag,
    IdrPicId,
    PicOrderCntLsb,
    DeltaPicOrderCntBottom,
    #[named(rename = "delta_pic_order_cnt[0]")]
    DeltaPicOrderCnt0,
    #[named(rename = "delta_pic_order_cnt[1]")]
    DeltaPicOrderCnt1,
    RedundantPicCnt,
    DirectSpatialMvPredFlag,
    NumRefIdxActiveOverrideFlag,
    NumRefIdxL0ActiveMinus1,
    NumRefIdxL1ActiveMinus1,
    CabacInitIdc,
    SliceQpDelta,
    SpForSwitchFlag,
    SliceQsDelta,
    DisableDeblockingFilterIdc,
    #[named(rename = "slice_alpha_c0_offset_div2")]
    SliceAlphaC0OffsetDiv2,
    SliceBetaOffsetDiv2,
    SliceGroupChangeCycle,
    SliceId,

    // ref_pic_list_modification()
    #[named(rename = "ref_pic_list_modification_flag_l0")]
    RefPicListModificationFlagL0,
    #[named(rename = "ref_pic_list_modification_flag_l1")]
    RefPicListModificationFlagL1,
    ModificationOfPicNumsIdc,
    AbsDiffPicNumMinus1,
    LongTermPicNum,

    // pred_weight_table()
    LumaLog2WeightDenom,
    ChromaLog2WeightDenom,
    LumaWeightFlag,
    LumaWeight,
    LumaOffset,
    ChromaWeightFlag,
    ChromaWeight,
    ChromaOffset,

    // dec_ref_pic_marking()
    NoOutputOfPriorPicsFlag,
    LongTermReferenceFlag,
    AdaptiveRefPicMarkingModeFlag,
    MemoryManagementControlOperation,
    DifferenceOfPicNumsMinus1,
    LongTermFrameIdx,
    MaxLongTermFrameIdxPlus1,

    // slice_data()
    #[named(rename = "MacroblockCount")]
    MacroblockCount,
    #[named(rename = "SkippedMacroblocks")]
    SkippedMacroblocks,
    #[named(rename = "IntraMacroblocks")]
    IntraMacroblocks,
    #[named(rename = "PcmMacroblocks")]
    PcmMacroblocks,
    #[named(rename = "SalvagedMacroblocks")]
    SalvagedMacroblocks,
    #[named(rename = "DecodeError")]
    DecodeError,
    #[named(rename = "SliceDataSkipped")]
    SliceDataSkipped,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Baseline profile, level 3.0, 32x32 pixels (2x2 macroblocks), POC type 2.
    pub(crate) const SPS: [u8; 11] = [0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E, 0xDA, 0x25, 0x90];

    /// PPS 0 referencing SPS 0, CAVLC, one slice group.
    pub(crate) const PPS: [u8; 8] = [0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x3C, 0x80];

    #[test]
    fn names() {
        assert_eq!(H264Header::for_nal_unit_type(NAL_SPS), H264Header::SequenceParameterSet);
        assert_eq!(H264Header::for_nal_unit_type(23), H264Header::NalUnit);
        assert_eq!(H264Header::Sei.name(), "SupplementalEnhancementInformation");
        assert_eq!(H264Attribute::Direct8x8InferenceFlag.name(), "direct_8x8_inference_flag");
        assert_eq!(H264Attribute::Log2MaxFrameNumMinus4.name(), "log2_max_frame_num_minus4");
        assert_eq!(H264Attribute::TrailingZeroBytes.name(), "trailing_zero_8bits");
    }
}
