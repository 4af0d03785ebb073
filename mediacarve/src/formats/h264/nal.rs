//! NAL unit framing, the NAL unit header and the small non-VCL payloads.

use anyhow::{Result, bail};
use log::Level::Error;

use crate::formats::h264::rbsp::RbspReader;
use crate::formats::h264::slice_header::NalHeader;
use crate::formats::h264::{
    H264Attribute as Attr, H264Header, NAL_AUD, NAL_END_OF_SEQUENCE, NAL_END_OF_STREAM, NAL_FILLER_DATA, NAL_PPS,
    NAL_SEI, NAL_SLICE_IDR, NAL_SPS, NAL_UNIT_TYPE,
};
use crate::log_or_invalidate;
use crate::process::reader_state::ReaderState;
use crate::result::attribute::{AttributeValue, Lookup, ValueFormat};
use crate::utils::errors::H264Error;

const PRIMARY_PIC_TYPE: Lookup = Lookup(&[
    Some("I"),
    Some("I, P"),
    Some("I, P, B"),
    Some("SI"),
    Some("SI, SP"),
    Some("I, SI"),
    Some("I, SI, P, SP"),
    Some("I, SI, P, SP, B"),
]);

/// What follows the zero bytes after a NAL unit payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Another `00 00 01` start code.
    StartCode,
    EndOfData,
    /// More zero bytes than the stuffing limit allows.
    ExcessiveZeros(u64),
    /// Anything that is not a start code.
    Garbage,
}

/// Byte layout of one NAL unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalFrame {
    pub start: u64,
    /// A `zero_byte` precedes the start code prefix.
    pub zero_byte: bool,
    /// Offset of the NAL unit header byte.
    pub header: u64,
    pub payload_end: u64,
    /// End of the result node: the payload plus the zero bytes it owns.
    pub end: u64,
    pub trailing_zeros: u64,
    pub continuation: Continuation,
}

impl NalFrame {
    /// Frames the NAL unit whose start code begins at `start`.
    ///
    /// The payload runs to the next `00 00 00`, `00 00 01` or `00 00 02`.
    /// Zero bytes between the payload and the next start code belong to the
    /// unit, unless there are more than `max_zero_stuffing` of them. A four
    /// byte start code keeps its leading zero.
    pub fn locate(data: &[u8], start: u64, max_zero_stuffing: u64) -> Option<Self> {
        let start_index = usize::try_from(start).ok()?;
        let rest = data.get(start_index..)?;
        let (zero_byte, prefix_len) = if rest.starts_with(&[0, 0, 0, 1]) {
            (true, 4)
        } else if rest.starts_with(&[0, 0, 1]) {
            (false, 3)
        } else {
            return None;
        };

        let header = start_index + prefix_len;
        if header >= data.len() {
            return None;
        }
        let payload_start = header + 1;
        let payload_end = data[payload_start..]
            .windows(3)
            .position(|w| w[0] == 0 && w[1] == 0 && w[2] <= 2)
            .map_or(data.len(), |i| payload_start + i);

        let zeros = data[payload_end..].iter().take_while(|&&b| b == 0).count();
        let after = payload_end + zeros;
        let (owned, continuation) = if after == data.len() {
            (zeros, Continuation::EndOfData)
        } else if data[after] == 1 && zeros >= 2 {
            // the last zero before `00 00 01` is the next unit's `zero_byte`
            (zeros.saturating_sub(3), Continuation::StartCode)
        } else {
            (0, Continuation::Garbage)
        };
        let (owned, continuation) = if owned as u64 > max_zero_stuffing {
            (0, Continuation::ExcessiveZeros(owned as u64))
        } else {
            (owned, continuation)
        };

        Some(Self {
            start,
            zero_byte,
            header: header as u64,
            payload_end: payload_end as u64,
            end: (payload_end + owned) as u64,
            trailing_zeros: owned as u64,
            continuation,
        })
    }

    pub fn payload_start(&self) -> u64 {
        self.header + 1
    }
}

/// `nal_unit()` header byte, with the `nal_ref_idc` rules of each type.
pub fn nal_unit_header(s: &mut ReaderState<'_>) -> Result<NalHeader> {
    if s.read_flag(Attr::ForbiddenZeroBit)? {
        bail!(H264Error::ForbiddenZeroBit);
    }
    let nal_ref_idc = s.read_attribute(Attr::NalRefIdc, 2)? as u8;
    let nal_unit_type = s.read_formatted(Attr::NalUnitType, 5, &NAL_UNIT_TYPE)? as u8;

    let expected = match nal_unit_type {
        NAL_SPS | NAL_PPS | NAL_SLICE_IDR if nal_ref_idc == 0 => Some("non-zero"),
        NAL_SEI | NAL_AUD | NAL_END_OF_SEQUENCE | NAL_END_OF_STREAM | NAL_FILLER_DATA if nal_ref_idc != 0 => {
            Some("zero")
        }
        _ => None,
    };
    if let Some(expected) = expected {
        log_or_invalidate!(
            s,
            Error,
            H264Error::NalRefIdc {
                nal_unit_type,
                expected
            }
        );
    }

    Ok(NalHeader {
        nal_ref_idc,
        nal_unit_type,
    })
}

/// Labels of the common SEI payload types. Others are valid but unnamed.
struct SeiPayloadType;

impl SeiPayloadType {
    const NAMES: [&'static str; 7] = [
        "buffering_period",
        "pic_timing",
        "pan_scan_rect",
        "filler_payload",
        "user_data_registered_itu_t_t35",
        "user_data_unregistered",
        "recovery_point",
    ];
}

impl ValueFormat for SeiPayloadType {
    fn display(&self, value: &AttributeValue) -> String {
        let name = value
            .as_u64()
            .and_then(|v| Self::NAMES.get(usize::try_from(v).ok()?).copied());
        match name {
            Some(name) => format!("{value} ({name})"),
            None => value.to_string(),
        }
    }
}

/// A `payloadType` or `payloadSize` value: a run of `FF` bytes, each adding
/// 255, and a final byte.
fn sei_value(r: &mut RbspReader<'_>) -> Result<u32> {
    let mut value = 0u32;
    loop {
        let byte = r.bits().get_byte()?;
        value = value.saturating_add(u32::from(byte));
        if byte != 0xFF {
            return Ok(value);
        }
    }
}

/// `sei_rbsp()`: a list of messages, each kept as a child node.
pub fn sei(s: &mut ReaderState<'_>, r: &mut RbspReader<'_>) -> Result<()> {
    loop {
        let ok = s.parse_mapped(H264Header::SeiMessage, r, |s, r| {
            let payload_type = sei_value(r)?;
            s.add_formatted(Attr::PayloadType, payload_type, &SeiPayloadType);
            let payload_size = sei_value(r)?;
            s.add_attribute(Attr::PayloadSize, payload_size);
            if u64::from(payload_size) * 8 > r.bits().available()? {
                bail!(H264Error::OutOfRange {
                    name: "payloadSize",
                    value: i64::from(payload_size),
                    min: 0,
                    max: (r.bits().available()? / 8) as i64
                });
            }
            r.bits().skip_n(payload_size * 8)?;
            Ok(())
        });
        if !ok {
            return Ok(());
        }
        if !r.more_rbsp_data()? {
            break;
        }
    }
    r.trailing_bits(s)
}

/// `access_unit_delimiter_rbsp()`
pub fn access_unit_delimiter(s: &mut ReaderState<'_>, r: &mut RbspReader<'_>) -> Result<()> {
    r.read_with(s, Attr::PrimaryPicType, 3, &PRIMARY_PIC_TYPE)?;
    r.trailing_bits(s)
}

/// `filler_data_rbsp()`
pub fn filler_data(s: &mut ReaderState<'_>, r: &mut RbspReader<'_>) -> Result<()> {
    let filler = r.rbsp().data().iter().take_while(|&&b| b == 0xFF).count();
    s.add_attribute(Attr::FillerBytes, filler);
    r.bits().skip_n(filler as u32 * 8)?;
    r.trailing_bits(s)
}

/// `end_of_seq_rbsp()` and `end_of_stream_rbsp()`, both empty.
pub fn end_of_unit(s: &mut ReaderState<'_>, r: &mut RbspReader<'_>) -> Result<()> {
    let len = r.rbsp().len();
    if len != 0 {
        log_or_invalidate!(
            s,
            Error,
            H264Error::OutOfRange {
                name: "payload length",
                value: len as i64,
                min: 0,
                max: 0
            }
        );
    }
    r.skip_to_end()
}

#[cfg(test)]
mod tests {
    use log::Level;

    use super::*;
    use crate::formats::FormatId;
    use crate::formats::h264::rbsp::Rbsp;
    use crate::result::attribute::AttributeName;
    use crate::utils::bitstream_io::BitstreamReader;

    #[test]
    fn frames_own_their_trailing_zeros() {
        let data = [0, 0, 0, 1, 0x09, 0xF0, 0, 0, 0, 0, 1, 0x09, 0xF0];
        let frame = NalFrame::locate(&data, 0, 64).expect("frame");
        assert!(frame.zero_byte);
        assert_eq!(frame.header, 4);
        assert_eq!(frame.payload_end, 6);
        assert_eq!(frame.end, 7);
        assert_eq!(frame.trailing_zeros, 1);
        assert_eq!(frame.continuation, Continuation::StartCode);

        let next = NalFrame::locate(&data, frame.end, 64).expect("next frame");
        assert!(next.zero_byte);
        assert_eq!((next.payload_end, next.end), (13, 13));
        assert_eq!(next.continuation, Continuation::EndOfData);
    }

    #[test]
    fn stuffing_limit_and_garbage() {
        let data = [0, 0, 1, 0x09, 0xF0, 0, 0, 0, 0, 0, 1];
        assert_eq!(NalFrame::locate(&data, 0, 2).map(|f| f.end), Some(7));
        let frame = NalFrame::locate(&data, 0, 1).expect("frame");
        assert_eq!(frame.end, 5);
        assert_eq!(frame.continuation, Continuation::ExcessiveZeros(2));

        let data = [0, 0, 1, 0x09, 0xF0, 0, 0, 2, 0xAA];
        let frame = NalFrame::locate(&data, 0, 64).expect("frame");
        assert_eq!(frame.end, 5);
        assert_eq!(frame.continuation, Continuation::Garbage);

        assert!(NalFrame::locate(&[0, 0, 2, 0x09], 0, 64).is_none());
        assert!(NalFrame::locate(&[0, 0, 1], 0, 64).is_none());
    }

    #[test]
    fn escaped_payload_ends_at_the_real_start_code() {
        let data = [0, 0, 1, 0x06, 0x05, 0, 0, 3, 1, 0x80, 0, 0, 1, 0x09];
        let frame = NalFrame::locate(&data, 0, 64).expect("frame");
        assert_eq!(frame.payload_end, 10);
    }

    fn header(byte: u8, level: Level) -> (bool, Option<NalHeader>) {
        let data = [byte];
        let mut state = ReaderState::new(BitstreamReader::new(&data), FormatId::H264, level);
        let mut header = None;
        let valid = state.parse(H264Header::NalUnit, |s| {
            header = Some(nal_unit_header(s)?);
            Ok(())
        });
        (valid, header)
    }

    #[test]
    fn nal_ref_idc_rules() {
        assert!(header(0x67, Level::Error).0);
        // SPS with nal_ref_idc 0
        assert!(!header(0x07, Level::Error).0);
        // AUD with nal_ref_idc 1
        assert!(!header(0x29, Level::Error).0);
        // forbidden_zero_bit
        assert!(!header(0x89, Level::Error).0);
        // non-reference slices may use either
        assert_eq!(
            header(0x01, Level::Error).1,
            Some(NalHeader {
                nal_ref_idc: 0,
                nal_unit_type: 1
            })
        );
    }

    #[test]
    fn sei_messages_become_children() -> anyhow::Result<()> {
        // recovery_point (6) of 2 bytes, user_data_unregistered (5) of 1 byte
        let payload = [0x06, 0x02, 0x80, 0x08, 0x05, 0x01, 0x42, 0x80];
        let rbsp = Rbsp::new(&payload, 0);
        let mut r = rbsp.reader();
        let mut state = ReaderState::new(BitstreamReader::new(&payload), FormatId::H264, Level::Error);
        let valid = state.parse(H264Header::Sei, |s| {
            sei(s, &mut r)?;
            s.reader().set_position(payload.len() as u64)?;
            Ok(())
        });
        assert!(valid);

        let tree = state.take_results(payload.len() as u64);
        let sei = tree.roots()[0];
        let messages = tree.node(sei).children();
        assert_eq!(messages.len(), 2);
        assert_eq!(tree.span(messages[0]), 0..4);
        assert_eq!(tree.span(messages[1]), 4..7);

        let name: AttributeName = Attr::PayloadType.into();
        let payload_type = tree.node(messages[0]).attribute(&name).expect("payloadType");
        assert_eq!(payload_type.display, "6 (recovery_point)");
        Ok(())
    }

    #[test]
    fn filler_and_delimiter() -> anyhow::Result<()> {
        let filler = Rbsp::new(&[0xFF, 0xFF, 0x80], 0);
        let delimiter = Rbsp::new(&[0x30], 0);
        let mut state = ReaderState::new(BitstreamReader::new(&[0; 4]), FormatId::H264, Level::Error);
        let valid = state.parse(H264Header::FillerData, |s| {
            filler_data(s, &mut filler.reader())?;
            access_unit_delimiter(s, &mut delimiter.reader())?;
            s.reader().set_position(4)?;
            Ok(())
        });
        assert!(valid);
        Ok(())
    }
}
