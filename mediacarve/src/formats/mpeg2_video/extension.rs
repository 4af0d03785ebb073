//! `extension_and_user_data()` headers.

use anyhow::Result;
use log::Level::Warn;

use crate::formats::mpeg2_video::Mpeg2VideoAttribute as Attr;
use crate::formats::mpeg2_video::carver::{StreamContext, read_start_code};
use crate::formats::mpeg2_video::{picture, sequence};
use crate::log_or_invalidate;
use crate::process::reader_state::ReaderState;
use crate::result::attribute::{Lookup, MARKER_BIT, Reserved};
use crate::utils::errors::Mpeg2VideoError;

pub const EXTENSION_IDENTIFIER: Lookup = Lookup(&[
    None,
    Some("Sequence Extension"),
    Some("Sequence Display Extension"),
    Some("Quant Matrix Extension"),
    Some("Copyright Extension"),
    Some("Sequence Scalable Extension"),
    None,
    Some("Picture Display Extension"),
    Some("Picture Coding Extension"),
    Some("Picture Spatial Scalable Extension"),
    Some("Picture Temporal Scalable Extension"),
]);

/// Parses one extension. Returns `true` for extensions kept opaque, whose
/// data runs up to the next start code.
pub fn extension(s: &mut ReaderState<'_>, context: &mut StreamContext) -> Result<bool> {
    read_start_code(s)?;
    let id = s.read_formatted(Attr::ExtensionStartCodeIdentifier, 4, &EXTENSION_IDENTIFIER)?;

    if id != 1 && !context.mpeg2 {
        log_or_invalidate!(
            s,
            Warn,
            Mpeg2VideoError::ExtensionWithoutSequenceExtension(
                EXTENSION_IDENTIFIER.0.get(id as usize).copied().flatten().unwrap_or("Reserved extension")
            )
        );
    }

    match id {
        1 => sequence::sequence_extension(s, context)?,
        2 => sequence::sequence_display_extension(s)?,
        3 => quant_matrix_extension(s)?,
        4 => copyright_extension(s)?,
        8 => picture::picture_coding_extension(s)?,
        _ => {
            let offset = s.reader().position()?;
            s.add_attribute(
                Attr::ExtensionData,
                crate::result::AttributeValue::DataRange { offset, length: 0 },
            );
            return Ok(true);
        }
    }
    Ok(false)
}

fn quant_matrix_extension(s: &mut ReaderState<'_>) -> Result<()> {
    if s.read_flag(Attr::LoadIntraQuantiserMatrix)? {
        sequence::quantiser_matrix(s, Attr::IntraQuantiserMatrix)?;
    }
    if s.read_flag(Attr::LoadNonIntraQuantiserMatrix)? {
        sequence::quantiser_matrix(s, Attr::NonIntraQuantiserMatrix)?;
    }
    if s.read_flag(Attr::LoadChromaIntraQuantiserMatrix)? {
        sequence::quantiser_matrix(s, Attr::ChromaIntraQuantiserMatrix)?;
    }
    if s.read_flag(Attr::LoadChromaNonIntraQuantiserMatrix)? {
        sequence::quantiser_matrix(s, Attr::ChromaNonIntraQuantiserMatrix)?;
    }
    Ok(())
}

fn copyright_extension(s: &mut ReaderState<'_>) -> Result<()> {
    s.read_flag(Attr::CopyrightFlag)?;
    s.read_attribute(Attr::CopyrightIdentifier, 8)?;
    s.read_flag(Attr::OriginalOrCopy)?;
    s.read_formatted(Attr::Reserved, 7, &Reserved(0))?;
    s.read_formatted(Attr::MarkerBit, 1, &MARKER_BIT)?;
    s.read_attribute(Attr::CopyrightNumber1, 20)?;
    s.read_formatted(Attr::MarkerBit, 1, &MARKER_BIT)?;
    s.read_attribute(Attr::CopyrightNumber2, 22)?;
    s.read_formatted(Attr::MarkerBit, 1, &MARKER_BIT)?;
    s.read_attribute(Attr::CopyrightNumber3, 22)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use log::Level;

    use super::*;
    use crate::formats::FormatId;
    use crate::formats::mpeg2_video::Mpeg2VideoHeader;
    use crate::utils::bitstream_io::BitstreamReader;

    // Main profile at main level, progressive, 4:2:0.
    const SEQUENCE_EXTENSION: [u8; 10] = [0x00, 0x00, 0x01, 0xB5, 0x14, 0x8A, 0x00, 0x01, 0x00, 0x00];
    const PICTURE_CODING_EXTENSION: [u8; 9] = [0x00, 0x00, 0x01, 0xB5, 0x8F, 0xFF, 0xF3, 0x41, 0x80];

    fn parse(data: &[u8], level: Level, context: &mut StreamContext) -> bool {
        let mut state = ReaderState::new(BitstreamReader::new(data), FormatId::Mpeg2Video, level);
        state.parse(Mpeg2VideoHeader::Extension, |s| extension(s, context).map(|_| ()))
    }

    #[test]
    fn sequence_extension_marks_mpeg2() {
        let mut context = StreamContext::default();
        assert!(parse(&SEQUENCE_EXTENSION, Level::Error, &mut context));
        assert!(context.mpeg2);
    }

    #[test]
    fn picture_extension_before_sequence_extension_is_a_soft_error() {
        let mut context = StreamContext::default();
        assert!(parse(&PICTURE_CODING_EXTENSION, Level::Error, &mut context));
        assert!(!parse(&PICTURE_CODING_EXTENSION, Level::Warn, &mut context));

        context.mpeg2 = true;
        assert!(parse(&PICTURE_CODING_EXTENSION, Level::Warn, &mut context));
    }

    #[test]
    fn reserved_extension_identifier_invalidates() {
        let mut context = StreamContext {
            mpeg2: true,
            ..Default::default()
        };
        let data = [0x00, 0x00, 0x01, 0xB5, 0x60, 0x00];
        assert!(!parse(&data, Level::Error, &mut context));
    }
}
