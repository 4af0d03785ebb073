//! Pack headers and the system header.

use anyhow::{Result, bail};
use log::Level::{Error, Warn};

use crate::formats::mpeg_system::{SystemAttribute as Attr, stream_label};
use crate::log_or_invalidate;
use crate::process::reader_state::ReaderState;
use crate::result::attribute::{AttributeValue, Hex, Reserved, ValueFormat};
use crate::utils::errors::{ParseError, SystemError};

/// Display of a stream id with the kind of stream it selects.
pub struct StreamIdFormat;

impl ValueFormat for StreamIdFormat {
    fn display(&self, value: &AttributeValue) -> String {
        match value.as_u64().and_then(|v| u8::try_from(v).ok()) {
            Some(id) => format!("{id:#04X} ({})", stream_label(id)),
            None => value.to_string(),
        }
    }
}

/// Reads the 32-bit start code of a system level header and checks its code.
pub(crate) fn read_start_code(s: &mut ReaderState<'_>) -> Result<u8> {
    let word = s.reader().get_bits(32)?;
    if word >> 8 != 0x00_0001 {
        bail!(ParseError::MissingStartCode);
    }
    s.add_formatted(Attr::StartCode, word, &Hex);
    Ok((word & 0xFF) as u8)
}

/// A marker bit that must be one.
pub(crate) fn marker_bit(s: &mut ReaderState<'_>, field: &'static str) -> Result<()> {
    if !s.reader().get()? {
        log_or_invalidate!(s, Error, SystemError::MarkerBit(field));
    }
    Ok(())
}

/// A 33-bit clock value split in three parts by marker bits.
pub(crate) fn timestamp(s: &mut ReaderState<'_>, name: Attr, field: &'static str) -> Result<u64> {
    let high = u64::from(s.reader().get_bits(3)?);
    marker_bit(s, field)?;
    let middle = u64::from(s.reader().get_bits(15)?);
    marker_bit(s, field)?;
    let low = u64::from(s.reader().get_bits(15)?);
    marker_bit(s, field)?;
    let value = (high << 30) | (middle << 15) | low;
    s.add_attribute(name, value);
    Ok(value)
}

/// `pack_header()`. Returns whether the pack uses the MPEG-2 syntax.
pub fn pack_header(s: &mut ReaderState<'_>) -> Result<bool> {
    read_start_code(s)?;

    let mpeg2 = match s.reader().show_bits(4)? {
        0b0100..=0b0111 => true,
        0b0010 => false,
        other => {
            s.add_formatted(Attr::MpegVersion, other, &Reserved(0b0010));
            bail!(SystemError::MarkerBit("pack_header"));
        }
    };

    if mpeg2 {
        s.reader().skip_n(2)?;
        s.add_attribute(Attr::MpegVersion, 2u8);
        timestamp(s, Attr::SystemClockReferenceBase, "system_clock_reference")?;
        s.read_attribute(Attr::SystemClockReferenceExtension, 9)?;
        marker_bit(s, "system_clock_reference")?;
        mux_rate(s)?;
        marker_bit(s, "program_mux_rate")?;
        marker_bit(s, "program_mux_rate")?;
        s.read_attribute(Attr::Reserved, 5)?;

        let stuffing = s.read_attribute(Attr::PackStuffingLength, 3)?;
        for _ in 0..stuffing {
            let byte = s.reader().get_byte()?;
            if byte != 0xFF {
                log_or_invalidate!(s, Warn, SystemError::StuffingByte(byte));
            }
        }
    } else {
        s.reader().skip_n(4)?;
        s.add_attribute(Attr::MpegVersion, 1u8);
        timestamp(s, Attr::SystemClockReferenceBase, "system_clock_reference")?;
        marker_bit(s, "program_mux_rate")?;
        mux_rate(s)?;
        marker_bit(s, "program_mux_rate")?;
    }
    Ok(mpeg2)
}

fn mux_rate(s: &mut ReaderState<'_>) -> Result<()> {
    if s.read_attribute(Attr::ProgramMuxRate, 22)? == 0 {
        log_or_invalidate!(s, Error, SystemError::ZeroMuxRate);
    }
    Ok(())
}

/// `system_header()`, including its stream table.
pub fn system_header(s: &mut ReaderState<'_>) -> Result<()> {
    read_start_code(s)?;
    let header_length = s.read_attribute(Attr::HeaderLength, 16)?;
    let fields_start = s.reader().position()?;
    let end = fields_start + u64::from(header_length);
    if end > s.data_len() {
        bail!(SystemError::Truncated {
            header: "system_header",
            length: u64::from(header_length)
        });
    }

    marker_bit(s, "rate_bound")?;
    s.read_attribute(Attr::RateBound, 22)?;
    marker_bit(s, "rate_bound")?;
    s.read_attribute(Attr::AudioBound, 6)?;
    s.read_flag(Attr::FixedFlag)?;
    s.read_flag(Attr::CspsFlag)?;
    s.read_flag(Attr::SystemAudioLockFlag)?;
    s.read_flag(Attr::SystemVideoLockFlag)?;
    marker_bit(s, "video_bound")?;
    s.read_attribute(Attr::VideoBound, 5)?;
    s.read_flag(Attr::PacketRateRestrictionFlag)?;
    s.read_attribute(Attr::Reserved, 7)?;

    while s.reader().position()? < end && s.reader().show_bits(1)? == 1 {
        let stream_id = s.reader().get_bits(8)? as u8;
        s.add_formatted(Attr::StreamId, stream_id, &StreamIdFormat);
        if stream_id < 0xB8 {
            log_or_invalidate!(s, Error, SystemError::StreamId(stream_id));
        }
        s.read_formatted(Attr::Reserved, 2, &Reserved(0b11))?;
        s.read_flag(Attr::PStdBufferBoundScale)?;
        s.read_attribute(Attr::PStdBufferSizeBound, 13)?;
    }

    let position = s.reader().position()?;
    if position > end {
        bail!(SystemError::HeaderLength {
            header: "system_header",
            declared: header_length,
            needed: (position - fields_start) as u32
        });
    }
    s.reader().set_position(end)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use log::Level;

    use super::*;
    use crate::formats::FormatId;
    use crate::formats::mpeg_system::SystemHeader;
    use crate::formats::mpeg_system::tests::MPEG2_PACK;
    use crate::utils::bitstream_io::BitstreamReader;

    fn parse(data: &[u8], f: fn(&mut ReaderState<'_>) -> Result<()>) -> (bool, u64) {
        let mut state = ReaderState::new(BitstreamReader::new(data), FormatId::MpegSystem, Level::Error);
        let valid = state.parse(SystemHeader::PackHeader, f);
        let position = state.reader().position().unwrap_or(0);
        (valid, position)
    }

    #[test]
    fn mpeg2_pack() {
        assert_eq!(parse(&MPEG2_PACK, |s| pack_header(s).map(drop)), (true, 14));
    }

    #[test]
    fn mpeg1_pack() {
        // SCR 0, mux rate 1
        let data = [0x00, 0x00, 0x01, 0xBA, 0x21, 0x00, 0x01, 0x00, 0x01, 0x80, 0x00, 0x03];
        assert_eq!(parse(&data, |s| pack_header(s).map(drop)), (true, 12));
    }

    #[test]
    fn zero_mux_rate_is_rejected() {
        let mut data = MPEG2_PACK;
        data[10] = 0x00;
        data[11] = 0x00;
        data[12] = 0x03;
        assert!(!parse(&data, |s| pack_header(s).map(drop)).0);
    }

    #[test]
    fn system_header_with_two_streams() {
        let data = [
            0x00, 0x00, 0x01, 0xBB, 0x00, 0x0C, 0x80, 0xC4, 0xE1, 0x04, 0xE1, 0xFF, 0xE0, 0xE0, 0xE8, 0xC0, 0xC0,
            0x20,
        ];
        assert_eq!(parse(&data, system_header), (true, 18));

        let mut bad = data;
        bad[12] = 0x80;
        assert!(!parse(&bad, system_header).0);
    }
}
