//! Group of pictures, picture and slice headers.

use anyhow::Result;
use log::Level::Warn;

use crate::formats::mpeg2_video::Mpeg2VideoAttribute as Attr;
use crate::formats::mpeg2_video::carver::{StreamContext, read_start_code};
use crate::log_or_invalidate;
use crate::process::reader_state::ReaderState;
use crate::result::attribute::{Forbidden, InRange, Lookup, MARKER_BIT};
use crate::utils::errors::Mpeg2VideoError;

pub const PICTURE_CODING_TYPE: Lookup = Lookup(&[None, Some("I"), Some("P"), Some("B"), Some("D")]);

pub const PICTURE_STRUCTURE: Lookup =
    Lookup(&[None, Some("Top Field"), Some("Bottom Field"), Some("Frame Picture")]);

pub const INTRA_DC_PRECISION: Lookup = Lookup(&[Some("8 bits"), Some("9 bits"), Some("10 bits"), Some("11 bits")]);

/// `f_code` 1-9, or 15 when the motion vector is unused.
pub const F_CODE: Lookup = Lookup(&[
    None,
    Some("1"),
    Some("2"),
    Some("3"),
    Some("4"),
    Some("5"),
    Some("6"),
    Some("7"),
    Some("8"),
    Some("9"),
    None,
    None,
    None,
    None,
    None,
    Some("unused"),
]);

const PICTURE_TYPE_P: u32 = 2;
const PICTURE_TYPE_B: u32 = 3;
const PICTURE_TYPE_D: u32 = 4;

/// Vertical sizes above this carry a slice vertical position extension.
const LARGE_PICTURE_HEIGHT: u32 = 2800;

pub fn group_of_pictures_header(s: &mut ReaderState<'_>) -> Result<()> {
    read_start_code(s)?;

    s.read_flag(Attr::DropFrameFlag)?;
    s.read_formatted(Attr::TimeCodeHours, 5, &InRange(0, 23))?;
    s.read_formatted(Attr::TimeCodeMinutes, 6, &InRange(0, 59))?;
    s.read_formatted(Attr::MarkerBit, 1, &MARKER_BIT)?;
    s.read_formatted(Attr::TimeCodeSeconds, 6, &InRange(0, 59))?;
    s.read_formatted(Attr::TimeCodePictures, 6, &InRange(0, 59))?;
    s.read_flag(Attr::ClosedGop)?;
    s.read_flag(Attr::BrokenLink)?;
    Ok(())
}

pub fn picture_header(s: &mut ReaderState<'_>, context: &mut StreamContext) -> Result<()> {
    read_start_code(s)?;

    s.read_attribute(Attr::TemporalReference, 10)?;
    let coding_type = s.read_formatted(Attr::PictureCodingType, 3, &PICTURE_CODING_TYPE)?;
    s.read_attribute(Attr::VbvDelay, 16)?;

    if coding_type == PICTURE_TYPE_P || coding_type == PICTURE_TYPE_B {
        s.read_flag(Attr::FullPelForwardVector)?;
        s.read_formatted(Attr::ForwardFCode, 3, &Forbidden(0))?;
    }
    if coding_type == PICTURE_TYPE_B {
        s.read_flag(Attr::FullPelBackwardVector)?;
        s.read_formatted(Attr::BackwardFCode, 3, &Forbidden(0))?;
    }

    while s.reader().get()? {
        s.read_attribute(Attr::ExtraInformationPicture, 8)?;
    }

    if coding_type == PICTURE_TYPE_D && context.mpeg2 {
        log_or_invalidate!(
            s,
            Warn,
            Mpeg2VideoError::ReservedValue {
                field: "picture_coding_type",
                value: coding_type
            }
        );
    }

    context.picture_coding_type = coding_type;
    Ok(())
}

pub fn picture_coding_extension(s: &mut ReaderState<'_>) -> Result<()> {
    s.read_formatted(Attr::FCodeForwardHorizontal, 4, &F_CODE)?;
    s.read_formatted(Attr::FCodeForwardVertical, 4, &F_CODE)?;
    s.read_formatted(Attr::FCodeBackwardHorizontal, 4, &F_CODE)?;
    s.read_formatted(Attr::FCodeBackwardVertical, 4, &F_CODE)?;
    s.read_formatted(Attr::IntraDcPrecision, 2, &INTRA_DC_PRECISION)?;
    s.read_formatted(Attr::PictureStructure, 2, &PICTURE_STRUCTURE)?;
    s.read_flag(Attr::TopFieldFirst)?;
    s.read_flag(Attr::FramePredFrameDct)?;
    s.read_flag(Attr::ConcealmentMotionVectors)?;
    s.read_flag(Attr::QScaleType)?;
    s.read_flag(Attr::IntraVlcFormat)?;
    s.read_flag(Attr::AlternateScan)?;
    s.read_flag(Attr::RepeatFirstField)?;
    s.read_flag(Attr::Chroma420Type)?;
    s.read_flag(Attr::ProgressiveFrame)?;

    if s.read_flag(Attr::CompositeDisplayFlag)? {
        s.read_flag(Attr::VAxis)?;
        s.read_attribute(Attr::FieldSequence, 3)?;
        s.read_flag(Attr::SubCarrier)?;
        s.read_attribute(Attr::BurstAmplitude, 7)?;
        s.read_attribute(Attr::SubCarrierPhase, 8)?;
    }
    Ok(())
}

/// Slice header fields up to the quantiser scale. Macroblock data is not
/// decoded.
pub fn slice(s: &mut ReaderState<'_>, context: &mut StreamContext) -> Result<()> {
    let code = read_start_code(s)?;
    s.add_attribute(Attr::SliceVerticalPosition, code);

    if context.vertical_size > LARGE_PICTURE_HEIGHT {
        s.read_attribute(Attr::SliceVerticalPositionExtension, 3)?;
    } else if context.vertical_size > 0 && u32::from(code - 1) * 16 >= context.vertical_size {
        log_or_invalidate!(s, Warn, Mpeg2VideoError::SliceOutsidePicture(u32::from(code)));
    }

    s.read_formatted(Attr::QuantiserScaleCode, 5, &Forbidden(0))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use log::Level;

    use super::*;
    use crate::formats::FormatId;
    use crate::formats::mpeg2_video::Mpeg2VideoHeader;
    use crate::utils::bitstream_io::BitstreamReader;

    fn state(data: &[u8], level: Level) -> ReaderState<'_> {
        ReaderState::new(BitstreamReader::new(data), FormatId::Mpeg2Video, level)
    }

    #[test]
    fn time_code_out_of_range() {
        // hours = 31
        let data = [0x00, 0x00, 0x01, 0xB8, 0x7C, 0x08, 0x00, 0x40];
        let mut state = state(&data, Level::Error);
        assert!(!state.parse(Mpeg2VideoHeader::GroupOfPicturesHeader, group_of_pictures_header));
    }

    #[test]
    fn b_picture_reads_both_vectors() -> anyhow::Result<()> {
        // temporal_reference 1, B, vbv_delay 0xFFFF, f_codes 7 and 2
        let data = [0x00, 0x00, 0x01, 0x00, 0x00, 0x5F, 0xFF, 0xFB, 0x90, 0x00];
        let mut state = state(&data, Level::Error);
        let mut context = StreamContext::default();
        assert!(state.parse(Mpeg2VideoHeader::PictureHeader, |s| picture_header(s, &mut context)));
        assert_eq!(context.picture_coding_type, PICTURE_TYPE_B);
        assert_eq!(state.reader().bit_position()?, 32 + 29 + 8 + 1);
        Ok(())
    }

    #[test]
    fn reserved_picture_coding_type_invalidates() {
        let data = [0x00, 0x00, 0x01, 0x00, 0x00, 0x3F, 0xFF, 0xF8];
        let mut state = state(&data, Level::Error);
        let mut context = StreamContext::default();
        assert!(!state.parse(Mpeg2VideoHeader::PictureHeader, |s| picture_header(s, &mut context)));
    }

    #[test]
    fn slice_below_the_picture() {
        let data = [0x00, 0x00, 0x01, 0x40, 0x40];
        let mut context = StreamContext {
            vertical_size: 576,
            ..Default::default()
        };

        let mut lenient = state(&data, Level::Error);
        assert!(lenient.parse(Mpeg2VideoHeader::Slice, |s| slice(s, &mut context)));

        let mut strict = state(&data, Level::Warn);
        assert!(!strict.parse(Mpeg2VideoHeader::Slice, |s| slice(s, &mut context)));
    }
}
