//! PES packets, padding and the program end code.

use std::ops::Range;

use anyhow::{Result, bail};
use log::Level::{Error, Warn};

use crate::formats::mpeg_system::pack::{StreamIdFormat, marker_bit, read_start_code, timestamp};
use crate::formats::mpeg_system::{SystemAttribute as Attr, SystemHeader, has_pes_header};
use crate::log_or_invalidate;
use crate::process::reader_state::ReaderState;
use crate::result::Named;
use crate::result::attribute::{Forbidden, Reserved};
use crate::utils::errors::SystemError;

/// MPEG-1 packets allow at most this many stuffing bytes.
const MAX_MPEG1_STUFFING: u32 = 16;

/// Reads a start code and `PES_packet_length`, and returns where the packet ends.
fn packet_start(s: &mut ReaderState<'_>) -> Result<(u8, u64)> {
    let stream_id = read_start_code(s)?;
    s.add_formatted(Attr::StreamId, stream_id, &StreamIdFormat);
    let length = u64::from(s.read_attribute(Attr::PesPacketLength, 16)?);
    let end = s.reader().position()? + length;
    if end > s.data_len() {
        bail!(SystemError::Truncated {
            header: "PES_packet",
            length
        });
    }
    Ok((stream_id, end))
}

/// `PES_packet()`.
///
/// Returns the payload range when the optional header could be parsed. A
/// malformed optional header only invalidates its own node, as
/// `PES_packet_length` still frames the packet.
pub fn pes_packet(s: &mut ReaderState<'_>) -> Result<Option<Range<u64>>> {
    let (stream_id, end) = packet_start(s)?;

    let mut payload_start = Some(s.reader().position()?);
    if has_pes_header(stream_id) {
        if s.parse(SystemHeader::PesHeader, |s| pes_header(s, end)) {
            payload_start = Some(s.reader().position()?);
        } else {
            s.recover();
            payload_start = None;
        }
    }

    s.reader().set_position(end)?;
    let payload = payload_start.map(|start| start..end);
    if let Some(payload) = &payload {
        s.add_attribute(Attr::PayloadLength, payload.end - payload.start);
    }
    Ok(payload)
}

/// The optional PES header in either syntax.
fn pes_header(s: &mut ReaderState<'_>, packet_end: u64) -> Result<()> {
    if s.reader().show_bits(2)? == 0b10 {
        mpeg2_pes_header(s)?;
    } else {
        mpeg1_pes_header(s)?;
    }

    let position = s.reader().position()?;
    if position > packet_end {
        bail!(SystemError::Truncated {
            header: "PES_header",
            length: position - packet_end
        });
    }
    Ok(())
}

/// A PTS or DTS with its 4-bit prefix.
fn prefixed_timestamp(s: &mut ReaderState<'_>, name: Attr, prefix: u32) -> Result<()> {
    if s.reader().get_bits(4)? != prefix {
        log_or_invalidate!(s, Error, SystemError::MarkerBit(name.name()));
    }
    timestamp(s, name, name.name())?;
    Ok(())
}

fn mpeg2_pes_header(s: &mut ReaderState<'_>) -> Result<()> {
    s.reader().skip_n(2)?;
    s.read_attribute(Attr::PesScramblingControl, 2)?;
    s.read_flag(Attr::PesPriority)?;
    s.read_flag(Attr::DataAlignmentIndicator)?;
    s.read_flag(Attr::Copyright)?;
    s.read_flag(Attr::OriginalOrCopy)?;
    let pts_dts = s.read_formatted(Attr::PtsDtsFlags, 2, &Forbidden(0b01))?;
    let escr = s.read_flag(Attr::EscrFlag)?;
    let es_rate = s.read_flag(Attr::EsRateFlag)?;
    let dsm_trick_mode = s.read_flag(Attr::DsmTrickModeFlag)?;
    let additional_copy_info = s.read_flag(Attr::AdditionalCopyInfoFlag)?;
    let crc = s.read_flag(Attr::PesCrcFlag)?;
    let extension = s.read_flag(Attr::PesExtensionFlag)?;
    let declared = s.read_attribute(Attr::PesHeaderDataLength, 8)?;
    let fields_start = s.reader().position()?;

    match pts_dts {
        0b10 => prefixed_timestamp(s, Attr::Pts, 0b0010)?,
        0b11 => {
            prefixed_timestamp(s, Attr::Pts, 0b0011)?;
            prefixed_timestamp(s, Attr::Dts, 0b0001)?;
        }
        _ => {}
    }
    if escr {
        s.reader().skip_n(2)?;
        timestamp(s, Attr::EscrBase, "ESCR")?;
        s.read_attribute(Attr::EscrExtension, 9)?;
        marker_bit(s, "ESCR")?;
    }
    if es_rate {
        marker_bit(s, "ES_rate")?;
        s.read_attribute(Attr::EsRate, 22)?;
        marker_bit(s, "ES_rate")?;
    }
    if dsm_trick_mode {
        s.reader().skip_n(8)?;
    }
    if additional_copy_info {
        marker_bit(s, "additional_copy_info")?;
        s.reader().skip_n(7)?;
    }
    if crc {
        s.reader().skip_n(16)?;
    }
    if extension {
        pes_extension(s)?;
    }

    let needed = (s.reader().position()? - fields_start) as u32;
    if needed > declared {
        bail!(SystemError::HeaderLength {
            header: "PES_header",
            declared,
            needed
        });
    }

    let stuffing = declared - needed;
    if stuffing > 0 {
        s.add_attribute(Attr::StuffingBytes, stuffing);
    }
    for _ in 0..stuffing {
        let byte = s.reader().get_byte()?;
        if byte != 0xFF {
            log_or_invalidate!(s, Warn, SystemError::StuffingByte(byte));
        }
    }
    Ok(())
}

/// `PES_extension` fields. Only their lengths matter here.
fn pes_extension(s: &mut ReaderState<'_>) -> Result<()> {
    let private_data = s.reader().get()?;
    let pack_header_field = s.reader().get()?;
    let sequence_counter = s.reader().get()?;
    let p_std_buffer = s.reader().get()?;
    s.reader().skip_n(3)?;
    let extension_2 = s.reader().get()?;

    if private_data {
        s.reader().skip_n(128)?;
    }
    if pack_header_field {
        let length = s.reader().get_bits(8)?;
        s.reader().skip_n(length * 8)?;
    }
    if sequence_counter {
        s.reader().skip_n(16)?;
    }
    if p_std_buffer {
        s.reader().skip_n(16)?;
    }
    if extension_2 {
        marker_bit(s, "PES_extension_field_length")?;
        let length = s.reader().get_bits(7)?;
        s.reader().skip_n(length * 8)?;
    }
    Ok(())
}

fn mpeg1_pes_header(s: &mut ReaderState<'_>) -> Result<()> {
    let mut stuffing = 0;
    while stuffing < MAX_MPEG1_STUFFING && s.reader().show_bits(8)? == 0xFF {
        s.reader().skip_n(8)?;
        stuffing += 1;
    }
    if stuffing > 0 {
        s.add_attribute(Attr::StuffingBytes, stuffing);
    }

    if s.reader().show_bits(2)? == 0b01 {
        s.reader().skip_n(2)?;
        s.read_flag(Attr::StdBufferScale)?;
        s.read_attribute(Attr::StdBufferSize, 13)?;
    }

    match s.reader().show_bits(4)? {
        0b0010 => prefixed_timestamp(s, Attr::Pts, 0b0010)?,
        0b0011 => {
            prefixed_timestamp(s, Attr::Pts, 0b0011)?;
            prefixed_timestamp(s, Attr::Dts, 0b0001)?;
        }
        _ => {
            if s.read_formatted(Attr::Reserved, 8, &Reserved(0x0F))? != 0x0F {
                bail!(SystemError::MarkerBit("PES_packet"));
            }
        }
    }
    Ok(())
}

/// `padding_stream`: a PES framed run of stuffing bytes.
pub fn padding_stream(s: &mut ReaderState<'_>) -> Result<()> {
    let (_, end) = packet_start(s)?;
    let start = s.reader().position()?;
    let data = s.reader().data();
    if let Some(&byte) = data[start as usize..end as usize].iter().find(|&&b| b != 0xFF) {
        log_or_invalidate!(s, Warn, SystemError::StuffingByte(byte));
    }
    s.reader().set_position(end)?;
    Ok(())
}

/// `MPEG_program_end_code`
pub fn program_end(s: &mut ReaderState<'_>) -> Result<()> {
    read_start_code(s)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use log::Level;

    use super::*;
    use crate::formats::FormatId;
    use crate::formats::mpeg_system::tests::{AUDIO_PES, VIDEO_PES};
    use crate::result::HeaderName;
    use crate::utils::bitstream_io::BitstreamReader;

    fn packet(data: &[u8]) -> (bool, Option<Range<u64>>, crate::result::ResultTree) {
        let mut state = ReaderState::new(BitstreamReader::new(data), FormatId::MpegSystem, Level::Error);
        let mut payload = None;
        let valid = state.parse(SystemHeader::PesPacket, |s| {
            payload = pes_packet(s)?;
            Ok(())
        });
        (valid, payload, state.take_results(data.len() as u64))
    }

    #[test]
    fn mpeg2_header_with_pts() {
        let (valid, payload, tree) = packet(&VIDEO_PES);
        assert!(valid);
        assert_eq!(payload, Some(14..22));

        let header = tree.find(HeaderName::MpegSystem(SystemHeader::PesHeader)).expect("PES header");
        assert_eq!(tree.span(header), 6..14);
        let pts = tree.node(header).attribute(&Attr::Pts.into());
        assert_eq!(pts.map(|a| a.value.as_u64()), Some(Some(0)));
    }

    #[test]
    fn header_without_timestamps() {
        let (valid, payload, _) = packet(&AUDIO_PES);
        assert!(valid);
        assert_eq!(payload, Some(9..11));
    }

    #[test]
    fn mpeg1_header() {
        // two stuffing bytes, STD buffer, PTS
        let data = [
            0x00, 0x00, 0x01, 0xC0, 0x00, 0x0B, 0xFF, 0xFF, 0x40, 0x20, 0x21, 0x00, 0x01, 0x00, 0x01, 0xAA, 0xBB,
        ];
        let (valid, payload, tree) = packet(&data);
        assert!(valid);
        assert_eq!(payload, Some(15..17));
        let header = tree.find(HeaderName::MpegSystem(SystemHeader::PesHeader)).expect("PES header");
        let stuffing = tree.node(header).attribute(&Attr::StuffingBytes.into());
        assert_eq!(stuffing.map(|a| a.value.as_u64()), Some(Some(2)));
    }

    #[test]
    fn malformed_header_keeps_the_packet() {
        let mut data = VIDEO_PES;
        data[9] = 0x20;
        let (valid, payload, tree) = packet(&data);
        assert!(valid);
        assert_eq!(payload, None);

        let header = tree.find(HeaderName::MpegSystem(SystemHeader::PesHeader)).expect("PES header");
        assert!(!tree.node(header).valid);
        assert_eq!(tree.span(tree.roots()[0]), 0..22);
        assert!(tree.node(tree.roots()[0]).valid);
    }

    #[test]
    fn header_length_too_short() {
        let mut data = VIDEO_PES;
        data[8] = 0x04;
        let (valid, payload, _) = packet(&data);
        assert!(valid);
        assert_eq!(payload, None);
    }

    #[test]
    fn packet_past_the_end() {
        let (valid, _, _) = packet(&VIDEO_PES[..20]);
        assert!(!valid);
    }
}
