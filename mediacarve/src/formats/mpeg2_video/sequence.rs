//! Sequence level headers.

use anyhow::Result;

use crate::formats::mpeg2_video::Mpeg2VideoAttribute as Attr;
use crate::formats::mpeg2_video::carver::{StreamContext, read_start_code};
use crate::process::reader_state::ReaderState;
use crate::result::attribute::{Forbidden, Hex, Lookup, MARKER_BIT};

/// `aspect_ratio_information`. Codes 1-4 are shared by both standards, 5-14
/// are MPEG-1 pel aspect ratios.
pub const ASPECT_RATIO: Lookup = Lookup(&[
    None,
    Some("1:1"),
    Some("4:3"),
    Some("16:9"),
    Some("2.21:1"),
    Some("0.8055"),
    Some("0.8437"),
    Some("0.8935"),
    Some("0.9157"),
    Some("0.9815"),
    Some("1.0255"),
    Some("1.0695"),
    Some("1.0950"),
    Some("1.1575"),
    Some("1.2015"),
]);

pub const FRAME_RATE: Lookup = Lookup(&[
    None,
    Some("23.976"),
    Some("24"),
    Some("25"),
    Some("29.97"),
    Some("30"),
    Some("50"),
    Some("59.94"),
    Some("60"),
]);

pub const CHROMA_FORMAT: Lookup = Lookup(&[None, Some("4:2:0"), Some("4:2:2"), Some("4:4:4")]);

pub const VIDEO_FORMAT: Lookup = Lookup(&[
    Some("component"),
    Some("PAL"),
    Some("NTSC"),
    Some("SECAM"),
    Some("MAC"),
    Some("unspecified"),
]);

/// A quantiser matrix is 64 8-bit entries, not byte aligned.
const QUANTISER_MATRIX_BITS: u32 = 64 * 8;

pub fn sequence_header(s: &mut ReaderState<'_>, context: &mut StreamContext) -> Result<()> {
    read_start_code(s)?;

    s.read_formatted(Attr::HorizontalSizeValue, 12, &Forbidden(0))?;
    context.vertical_size = s.read_formatted(Attr::VerticalSizeValue, 12, &Forbidden(0))?;
    s.read_formatted(Attr::AspectRatioInformation, 4, &ASPECT_RATIO)?;
    s.read_formatted(Attr::FrameRateCode, 4, &FRAME_RATE)?;
    s.read_formatted(Attr::BitRateValue, 18, &Forbidden(0))?;
    s.read_formatted(Attr::MarkerBit, 1, &MARKER_BIT)?;
    s.read_attribute(Attr::VbvBufferSizeValue, 10)?;
    s.read_flag(Attr::ConstrainedParametersFlag)?;

    if s.read_flag(Attr::LoadIntraQuantiserMatrix)? {
        quantiser_matrix(s, Attr::IntraQuantiserMatrix)?;
    }
    if s.read_flag(Attr::LoadNonIntraQuantiserMatrix)? {
        quantiser_matrix(s, Attr::NonIntraQuantiserMatrix)?;
    }
    Ok(())
}

/// Skips a quantiser matrix and records where it lies.
pub(crate) fn quantiser_matrix(s: &mut ReaderState<'_>, name: Attr) -> Result<()> {
    let offset = s.reader().position()?;
    s.reader().skip_n(QUANTISER_MATRIX_BITS)?;
    s.add_attribute(
        name,
        crate::result::AttributeValue::DataRange {
            offset,
            length: u64::from(QUANTISER_MATRIX_BITS / 8),
        },
    );
    Ok(())
}

/// `sequence_extension()`, the marker of an MPEG-2 stream.
pub fn sequence_extension(s: &mut ReaderState<'_>, context: &mut StreamContext) -> Result<()> {
    s.read_formatted(Attr::ProfileAndLevelIndication, 8, &Hex)?;
    s.read_flag(Attr::ProgressiveSequence)?;
    s.read_formatted(Attr::ChromaFormat, 2, &CHROMA_FORMAT)?;
    s.read_attribute(Attr::HorizontalSizeExtension, 2)?;
    let vertical_extension = s.read_attribute(Attr::VerticalSizeExtension, 2)?;
    s.read_attribute(Attr::BitRateExtension, 12)?;
    s.read_formatted(Attr::MarkerBit, 1, &MARKER_BIT)?;
    s.read_attribute(Attr::VbvBufferSizeExtension, 8)?;
    s.read_flag(Attr::LowDelay)?;
    s.read_attribute(Attr::FrameRateExtensionN, 2)?;
    s.read_attribute(Attr::FrameRateExtensionD, 5)?;

    context.vertical_size |= vertical_extension << 12;
    context.mpeg2 = true;
    Ok(())
}

pub fn sequence_display_extension(s: &mut ReaderState<'_>) -> Result<()> {
    s.read_formatted(Attr::VideoFormat, 3, &VIDEO_FORMAT)?;
    if s.read_flag(Attr::ColourDescription)? {
        s.read_attribute(Attr::ColourPrimaries, 8)?;
        s.read_attribute(Attr::TransferCharacteristics, 8)?;
        s.read_attribute(Attr::MatrixCoefficients, 8)?;
    }
    s.read_attribute(Attr::DisplayHorizontalSize, 14)?;
    s.read_formatted(Attr::MarkerBit, 1, &MARKER_BIT)?;
    s.read_attribute(Attr::DisplayVerticalSize, 14)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use log::Level;

    use super::*;
    use crate::formats::FormatId;
    use crate::formats::mpeg2_video::Mpeg2VideoHeader;
    use crate::utils::bitstream_io::BitstreamReader;

    fn parse(data: &[u8]) -> (bool, StreamContext) {
        let mut state = ReaderState::new(BitstreamReader::new(data), FormatId::Mpeg2Video, Level::Error);
        let mut context = StreamContext::default();
        let valid = state.parse(Mpeg2VideoHeader::SequenceHeader, |s| sequence_header(s, &mut context));
        (valid, context)
    }

    #[test]
    fn sequence_header_fields() {
        // 720x576, 4:3, 25 fps
        let data = [0x00, 0x00, 0x01, 0xB3, 0x2D, 0x02, 0x40, 0x23, 0x04, 0x93, 0xE0, 0xA0];
        let (valid, context) = parse(&data);
        assert!(valid);
        assert_eq!(context.vertical_size, 576);
    }

    #[test]
    fn cleared_marker_bit_invalidates() {
        let data = [0x00, 0x00, 0x01, 0xB3, 0x2D, 0x02, 0x40, 0x23, 0x04, 0x93, 0xC0, 0xA0];
        assert!(!parse(&data).0);
    }

    #[test]
    fn zero_frame_rate_code_invalidates() {
        let data = [0x00, 0x00, 0x01, 0xB3, 0x2D, 0x02, 0x40, 0x20, 0x04, 0x93, 0xE0, 0xA0];
        assert!(!parse(&data).0);
    }
}
