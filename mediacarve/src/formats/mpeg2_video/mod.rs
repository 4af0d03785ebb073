//! MPEG-1/2 video elementary streams (ISO/IEC 11172-2, ISO/IEC 13818-2).
//!
//! ## Start Codes
//!
//! Every header begins with the 24-bit prefix `00 00 01` followed by an 8-bit code:
//!
//! - **0x00**: Picture header
//! - **0x01-0xAF**: Slice, the code is the slice vertical position
//! - **0xB2**: User data
//! - **0xB3**: Sequence header
//! - **0xB5**: Extension, identified by a 4-bit extension start code identifier
//! - **0xB7**: Sequence end
//! - **0xB8**: Group of pictures header
//!
//! ## Result Nesting
//!
//! Headers follow each other flat in the bitstream. In the result tree a group
//! of pictures is listed under its sequence header, a picture under its group
//! (or sequence) and a slice under its picture.

pub mod carver;
pub mod extension;
pub mod picture;
pub mod sequence;

pub use carver::Mpeg2VideoCarver;

use crate::result::Named;

pub const START_CODE_PREFIX: u32 = 0x00_0001;

pub const PICTURE_START_CODE: u8 = 0x00;
pub const SLICE_START_CODE_MIN: u8 = 0x01;
pub const SLICE_START_CODE_MAX: u8 = 0xAF;
pub const USER_DATA_START_CODE: u8 = 0xB2;
pub const SEQUENCE_HEADER_CODE: u8 = 0xB3;
pub const EXTENSION_START_CODE: u8 = 0xB5;
pub const SEQUENCE_END_CODE: u8 = 0xB7;
pub const GROUP_START_CODE: u8 = 0xB8;

/// Whether `code` can start a video header.
pub fn is_video_start_code(code: u8) -> bool {
    matches!(
        code,
        PICTURE_START_CODE
            | SLICE_START_CODE_MIN..=SLICE_START_CODE_MAX
            | USER_DATA_START_CODE
            | SEQUENCE_HEADER_CODE
            | EXTENSION_START_CODE
            | SEQUENCE_END_CODE
            | GROUP_START_CODE
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Named)]
pub enum Mpeg2VideoHeader {
    SequenceHeader,
    SequenceEnd,
    GroupOfPicturesHeader,
    PictureHeader,
    Slice,
    UserData,
    SequenceExtension,
    SequenceDisplayExtension,
    QuantMatrixExtension,
    CopyrightExtension,
    PictureCodingExtension,
    Extension,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Named)]
#[named(rename_all = "snake_case")]
pub enum Mpeg2VideoAttribute {
    StartCode,
    #[named(rename = "ZeroByteStuffing")]
    ZeroByteStuffing,

    // sequence_header()
    HorizontalSizeValue,
    VerticalSizeValue,
    AspectRatioInformation,
    FrameRateCode,
    BitRateValue,
    MarkerBit,
    VbvBufferSizeValue,
    ConstrainedParametersFlag,
    LoadIntraQuantiserMatrix,
    IntraQuantiserMatrix,
    LoadNonIntraQuantiserMatrix,
    NonIntraQuantiserMatrix,

    // extensions
    ExtensionStartCodeIdentifier,
    ProfileAndLevelIndication,
    ProgressiveSequence,
    ChromaFormat,
    HorizontalSizeExtension,
    VerticalSizeExtension,
    BitRateExtension,
    VbvBufferSizeExtension,
    LowDelay,
    FrameRateExtensionN,
    FrameRateExtensionD,
    VideoFormat,
    ColourDescription,
    ColourPrimaries,
    TransferCharacteristics,
    MatrixCoefficients,
    DisplayHorizontalSize,
    DisplayVerticalSize,
    LoadChromaIntraQuantiserMatrix,
    ChromaIntraQuantiserMatrix,
    LoadChromaNonIntraQuantiserMatrix,
    ChromaNonIntraQuantiserMatrix,
    CopyrightFlag,
    CopyrightIdentifier,
    OriginalOrCopy,
    Reserved,
    CopyrightNumber1,
    CopyrightNumber2,
    CopyrightNumber3,
    #[named(rename = "f_code[0][0]")]
    FCodeForwardHorizontal,
    #[named(rename = "f_code[0][1]")]
    FCodeForwardVertical,
    #[named(rename = "f_code[1][0]")]
    FCodeBackwardHorizontal,
    #[named(rename = "f_code[1][1]")]
    FCodeBackwardVertical,
    IntraDcPrecision,
    PictureStructure,
    TopFieldFirst,
    FramePredFrameDct,
    ConcealmentMotionVectors,
    QScaleType,
    IntraVlcFormat,
    AlternateScan,
    RepeatFirstField,
    #[named(rename = "chroma_420_type")]
    Chroma420Type,
    ProgressiveFrame,
    CompositeDisplayFlag,
    VAxis,
    FieldSequence,
    SubCarrier,
    BurstAmplitude,
    SubCarrierPhase,

    // group_of_pictures_header()
    DropFrameFlag,
    TimeCodeHours,
    TimeCodeMinutes,
    TimeCodeSeconds,
    TimeCodePictures,
    ClosedGop,
    BrokenLink,

    // picture_header()
    TemporalReference,
    PictureCodingType,
    VbvDelay,
    FullPelForwardVector,
    ForwardFCode,
    FullPelBackwardVector,
    BackwardFCode,
    ExtraInformationPicture,

    // slice()
    SliceVerticalPosition,
    SliceVerticalPositionExtension,
    QuantiserScaleCode,

    UserData,
    ExtensionData,
}

#[cfg(test)]
pub(crate) mod tests {
    /// Sequence, group of pictures and intra picture headers followed by seven
    /// zero bytes that no start code follows.
    pub const ZERO_BYTE_STUFFING_AT_END: &[u8] = &[
        0x00, 0x00, 0x01, 0xB3, 0x2D, 0x02, 0x40, 0x23, 0x04, 0x93, 0xE0, 0xA0, // sequence_header
        0x00, 0x00, 0x01, 0xB8, 0x00, 0x08, 0x00, 0x40, // group_of_pictures_header
        0x00, 0x00, 0x01, 0x00, 0x00, 0x0F, 0xFF, 0xF8, // picture_header
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];

    /// Three stuffing bytes after the sequence header, one slice and a sequence end.
    pub const STUFFED_STREAM: &[u8] = &[
        0x00, 0x00, 0x01, 0xB3, 0x2D, 0x02, 0x40, 0x23, 0x04, 0x93, 0xE0, 0xA0, // sequence_header
        0x00, 0x00, 0x00, // stuffing
        0x00, 0x00, 0x01, 0xB8, 0x00, 0x08, 0x00, 0x40, // group_of_pictures_header
        0x00, 0x00, 0x01, 0x00, 0x00, 0x0F, 0xFF, 0xF8, // picture_header
        0x00, 0x00, 0x01, 0x01, 0x40, 0x12, 0x34, // slice
        0x00, 0x00, 0x01, 0xB7, // sequence_end_code
    ];
}
