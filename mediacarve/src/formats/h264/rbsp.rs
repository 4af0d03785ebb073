//! Raw byte sequence payloads.
//!
//! [`Rbsp`] holds a NAL unit payload with its emulation prevention bytes
//! removed, and remembers where each removed byte was so that RBSP positions
//! can be translated back to input offsets.

use std::io;

use anyhow::{Result, bail};

use crate::formats::h264::H264Attribute;
use crate::log_or_invalidate;
use crate::process::reader_state::{MappedReader, ReaderState};
use crate::result::Named;
use crate::result::attribute::{InRange, Plain, ValueFormat};
use crate::utils::bitstream_io::BitstreamReader;
use crate::utils::errors::H264Error;

#[derive(Debug, Clone, Default)]
pub struct Rbsp {
    data: Vec<u8>,
    /// RBSP indices of the bytes that followed a removed `03`.
    escapes: Vec<u64>,
    /// Input offset of the first payload byte.
    base: u64,
    /// Bit index of `rbsp_stop_one_bit`, the last set bit.
    stop_bit: Option<u64>,
}

impl Rbsp {
    /// Removes emulation prevention from `payload`, which starts at input offset `base`.
    pub fn new(payload: &[u8], base: u64) -> Self {
        let mut data = Vec::with_capacity(payload.len());
        let mut escapes = Vec::new();
        let mut zeros = 0;

        for &byte in payload {
            if zeros >= 2 && byte == 0x03 {
                escapes.push(data.len() as u64);
                zeros = 0;
                continue;
            }
            zeros = if byte == 0 { zeros + 1 } else { 0 };
            data.push(byte);
        }

        let stop_bit = data
            .iter()
            .rposition(|&b| b != 0)
            .map(|i| (i as u64) * 8 + 7 - u64::from(data[i].trailing_zeros()));

        Self {
            data,
            escapes,
            base,
            stop_bit,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of emulation prevention bytes removed.
    pub fn escape_count(&self) -> usize {
        self.escapes.len()
    }

    pub fn stop_bit(&self) -> Option<u64> {
        self.stop_bit
    }

    /// Input offset of RBSP byte `index`.
    pub fn input_offset(&self, index: u64) -> u64 {
        self.base + index + self.escapes.partition_point(|&e| e <= index) as u64
    }

    /// Input offset just past the first `end` RBSP bytes.
    pub fn input_end(&self, end: u64) -> u64 {
        match end {
            0 => self.base,
            _ => self.input_offset(end - 1) + 1,
        }
    }

    pub fn reader(&self) -> RbspReader<'_> {
        RbspReader {
            rbsp: self,
            bs: BitstreamReader::new(&self.data),
        }
    }
}

/// Bit reader over an [`Rbsp`] that records syntax elements as attributes
/// on the innermost open header of a [`ReaderState`].
pub struct RbspReader<'r> {
    rbsp: &'r Rbsp,
    bs: BitstreamReader<'r>,
}

impl MappedReader for RbspReader<'_> {
    fn input_position(&mut self) -> io::Result<u64> {
        let position = self.bs.position()?;
        Ok(self.rbsp.input_offset(position))
    }

    fn input_end_position(&mut self) -> io::Result<u64> {
        let end = self.bs.end_position()?;
        Ok(self.rbsp.input_end(end))
    }
}

impl<'r> RbspReader<'r> {
    pub fn rbsp(&self) -> &'r Rbsp {
        self.rbsp
    }

    /// The underlying reader, for syntax elements not worth an attribute.
    #[inline(always)]
    pub fn bits(&mut self) -> &mut BitstreamReader<'r> {
        &mut self.bs
    }

    /// `u(n)`
    pub fn read(&mut self, s: &mut ReaderState<'_>, name: H264Attribute, n: u32) -> io::Result<u32> {
        self.read_with(s, name, n, &Plain)
    }

    pub fn read_with(
        &mut self,
        s: &mut ReaderState<'_>,
        name: H264Attribute,
        n: u32,
        format: &dyn ValueFormat,
    ) -> io::Result<u32> {
        let value = self.bs.get_bits(n)?;
        s.add_formatted(name, value, format);
        Ok(value)
    }

    /// `u(1)`
    pub fn read_flag(&mut self, s: &mut ReaderState<'_>, name: H264Attribute) -> io::Result<bool> {
        let value = self.bs.get()?;
        s.add_attribute(name, value);
        Ok(value)
    }

    /// `ue(v)`
    pub fn read_ue(&mut self, s: &mut ReaderState<'_>, name: H264Attribute) -> io::Result<u32> {
        let value = self.bs.ue()?;
        s.add_attribute(name, value);
        Ok(value)
    }

    /// `se(v)`
    pub fn read_se(&mut self, s: &mut ReaderState<'_>, name: H264Attribute) -> io::Result<i32> {
        let value = self.bs.se()?;
        s.add_attribute(name, value);
        Ok(value)
    }

    /// `ue(v)` that must lie in `min..=max`. Later syntax depends on the
    /// value, so a violation fails the header.
    pub fn read_ue_in(&mut self, s: &mut ReaderState<'_>, name: H264Attribute, min: u32, max: u32) -> Result<u32> {
        let value = self.bs.ue()?;
        check_range(s, name, i64::from(value), i64::from(min), i64::from(max))?;
        Ok(value)
    }

    /// `se(v)` that must lie in `min..=max`.
    pub fn read_se_in(&mut self, s: &mut ReaderState<'_>, name: H264Attribute, min: i32, max: i32) -> Result<i32> {
        let value = self.bs.se()?;
        check_range(s, name, i64::from(value), i64::from(min), i64::from(max))?;
        Ok(value)
    }

    /// `more_rbsp_data()`: whether anything precedes `rbsp_stop_one_bit`.
    pub fn more_rbsp_data(&mut self) -> io::Result<bool> {
        let position = self.bs.bit_position()?;
        Ok(self.rbsp.stop_bit.is_some_and(|stop| position < stop))
    }

    /// `rbsp_trailing_bits()`. The cursor must sit on the stop bit; the
    /// alignment bits after it are consumed.
    pub fn trailing_bits(&mut self, s: &mut ReaderState<'_>) -> Result<()> {
        let position = self.bs.bit_position()?;
        if self.rbsp.stop_bit != Some(position) {
            log_or_invalidate!(s, log::Level::Error, H264Error::MissingStopBit);
            return Ok(());
        }
        self.bs.get()?;
        s.add_attribute(H264Attribute::RbspStopOneBit, true);
        self.skip_to_end()
    }

    /// Moves past the last RBSP byte.
    pub fn skip_to_end(&mut self) -> Result<()> {
        self.bs.set_bit_position(self.rbsp.len() * 8)?;
        Ok(())
    }
}

fn check_range(s: &mut ReaderState<'_>, name: H264Attribute, value: i64, min: i64, max: i64) -> Result<()> {
    if !s.add_formatted(name, value, &InRange(min, max)) {
        bail!(H264Error::OutOfRange {
            name: name.name(),
            value,
            min,
            max
        });
    }
    Ok(())
}
