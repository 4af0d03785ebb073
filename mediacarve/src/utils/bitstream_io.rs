//! Bitstream reading for header carving.
//!
//! Wraps `bitstream_io` over an in-memory byte slice and adds the operations
//! carvers need on top of plain bit reads: peeking, Exp-Golomb codes,
//! start-code search and explicit repositioning.

use std::io;
use std::io::SeekFrom;

use bitstream_io::{BigEndian, BitRead, BitReader, SignedInteger, UnsignedInteger};

use crate::utils::cancel::CancelFlag;

/// Longest Exp-Golomb prefix accepted by [`BitstreamReader::ue`].
const MAX_EXP_GOLOMB_PREFIX: u32 = 31;

#[derive(Debug)]
pub struct BitstreamReader<'a> {
    bs: BitReader<io::Cursor<&'a [u8]>, BigEndian>,
    data: &'a [u8],
    len: u64,
    cancel: Option<CancelFlag>,
}

impl<'a> BitstreamReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            bs: BitReader::new(io::Cursor::new(data)),
            data,
            len: (data.len() as u64) << 3,
            cancel: None,
        }
    }

    pub fn with_cancel(data: &'a [u8], cancel: CancelFlag) -> Self {
        Self {
            cancel: Some(cancel),
            ..Self::new(data)
        }
    }

    /// Returns `true` once the attached cancellation flag has been raised.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled)
    }

    pub fn cancel_flag(&self) -> Option<&CancelFlag> {
        self.cancel.as_ref()
    }

    #[inline(always)]
    pub fn get(&mut self) -> io::Result<bool> {
        self.bs.read_bit()
    }

    #[inline(always)]
    pub fn get_n<I: UnsignedInteger>(&mut self, n: u32) -> io::Result<I> {
        match self.bs.read_unsigned_var(n) {
            Ok(val) => Ok(val),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "get_n({}): out of bounds bits at {}",
                    n,
                    self.bs.position_in_bits().unwrap_or(0)
                ),
            )),
            Err(e) => Err(e),
        }
    }

    #[inline(always)]
    pub fn get_s<S: SignedInteger>(&mut self, n: u32) -> io::Result<S> {
        match self.bs.read_signed_var(n) {
            Ok(val) => Ok(val),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "get_s({}): out of bounds bits at {}",
                    n,
                    self.bs.position_in_bits().unwrap_or(0)
                ),
            )),
            Err(e) => Err(e),
        }
    }

    /// Reads `n <= 32` bits, most significant bit first.
    #[inline(always)]
    pub fn get_bits(&mut self, n: u32) -> io::Result<u32> {
        if n > 32 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("get_bits({n}): at most 32 bits per read"),
            ));
        }
        if n == 0 {
            return Ok(0);
        }
        self.get_n(n)
    }

    /// Reads one byte. Takes the aligned path when the cursor sits on a byte boundary.
    #[inline(always)]
    pub fn get_byte(&mut self) -> io::Result<u8> {
        if self.bs.byte_aligned() {
            let pos = self.position()? as usize;
            let byte = *self.data.get(pos).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("get_byte: out of bounds byte at {pos}"),
                )
            })?;
            self.skip_n(8)?;
            return Ok(byte);
        }
        self.get_n(8)
    }

    /// Peeks `n <= 32` bits without moving the cursor.
    pub fn show_bits(&mut self, n: u32) -> io::Result<u32> {
        let position = self.bit_position()?;
        let value = self.get_bits(n);
        self.bs.seek_bits(SeekFrom::Start(position))?;
        value
    }

    /// Unsigned Exp-Golomb code, `ue(v)`.
    pub fn ue(&mut self) -> io::Result<u32> {
        let mut leading_zeros = 0;
        while !self.get()? {
            leading_zeros += 1;
            if leading_zeros > MAX_EXP_GOLOMB_PREFIX {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "ue(v): prefix longer than {MAX_EXP_GOLOMB_PREFIX} bits at {}",
                        self.bit_position().unwrap_or(0)
                    ),
                ));
            }
        }

        if leading_zeros == 0 {
            return Ok(0);
        }

        let suffix: u32 = self.get_n(leading_zeros)?;
        Ok(((1u32 << leading_zeros) - 1) + suffix)
    }

    /// Signed Exp-Golomb code, `se(v)`.
    pub fn se(&mut self) -> io::Result<i32> {
        let code = self.ue()? as i64;
        let value = if code & 1 == 1 {
            (code + 1) >> 1
        } else {
            -(code >> 1)
        };
        Ok(value as i32)
    }

    /// Truncated Exp-Golomb code, `te(v)`, for a syntax element with range `0..=range`.
    pub fn te(&mut self, range: u32) -> io::Result<u32> {
        match range {
            0 => Ok(0),
            1 => Ok(!self.get()? as u32),
            _ => self.ue(),
        }
    }

    #[inline(always)]
    pub fn byte_align(&mut self) {
        self.bs.byte_align();
    }

    #[inline(always)]
    pub fn is_byte_aligned(&self) -> bool {
        self.bs.byte_aligned()
    }

    #[inline(always)]
    pub fn skip_n(&mut self, n: u32) -> io::Result<()> {
        if n as u64 > self.available()? {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "skip_n({}): out of bounds bits at {}",
                    n,
                    self.bit_position().unwrap_or(0)
                ),
            ));
        }
        self.bs.skip(n)
    }

    #[inline(always)]
    pub fn available(&mut self) -> io::Result<u64> {
        self.bs.position_in_bits().map(|pos| self.len - pos)
    }

    #[inline(always)]
    pub fn bit_position(&mut self) -> io::Result<u64> {
        self.bs.position_in_bits()
    }

    pub fn set_bit_position(&mut self, position: u64) -> io::Result<()> {
        if position > self.len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("set_bit_position({position}): beyond {} bits", self.len),
            ));
        }
        self.bs.seek_bits(SeekFrom::Start(position)).map(|_| ())
    }

    /// Byte offset of the cursor. A partially consumed byte counts as not yet consumed.
    #[inline(always)]
    pub fn position(&mut self) -> io::Result<u64> {
        self.bit_position().map(|pos| pos >> 3)
    }

    /// Byte offset just past every bit read so far.
    #[inline(always)]
    pub fn end_position(&mut self) -> io::Result<u64> {
        self.bit_position().map(|pos| pos.div_ceil(8))
    }

    pub fn set_position(&mut self, offset: u64) -> io::Result<()> {
        self.set_bit_position(offset << 3)
    }

    pub fn bytes_remaining(&mut self) -> io::Result<u64> {
        self.available().map(|bits| bits >> 3)
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Searches for a start code from the next byte boundary without moving the cursor.
    ///
    /// A start code is `prefix_bits` bits equal to `prefix_value` followed by
    /// `suffix_bits` bits; both add up to at most 32 and to whole bytes. Returns the
    /// byte offset of the match and its suffix.
    pub fn find_start_code(
        &mut self,
        prefix_bits: u32,
        prefix_value: u32,
        suffix_bits: u32,
        limit: u64,
    ) -> io::Result<Option<(u64, u32)>> {
        let total_bits = prefix_bits + suffix_bits;
        if total_bits == 0 || total_bits > 32 || total_bits & 7 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("start code of {prefix_bits}+{suffix_bits} bits is not byte sized"),
            ));
        }

        let code_len = (total_bits >> 3) as usize;
        let start = self.end_position()? as usize;
        let end = (limit.min(self.len()) as usize).min(self.data.len());
        let suffix_mask = if suffix_bits == 0 {
            0
        } else {
            u32::MAX >> (32 - suffix_bits)
        };

        if start + code_len > end {
            return Ok(None);
        }

        for offset in start..=end - code_len {
            // Short-circuit the common 00 00 01 prefix before assembling the word.
            if prefix_bits >= 16 && prefix_value >> (prefix_bits - 8) == 0 && self.data[offset] != 0
            {
                continue;
            }

            let word = self.data[offset..offset + code_len]
                .iter()
                .fold(0u32, |acc, &b| (acc << 8) | b as u32);

            if word >> suffix_bits == prefix_value {
                return Ok(Some((offset as u64, word & suffix_mask)));
            }
        }

        Ok(None)
    }

    /// Moves the cursor to the next start code before `limit` and returns its suffix.
    ///
    /// When nothing matches the cursor is left untouched.
    pub fn next_start_code(
        &mut self,
        prefix_bits: u32,
        prefix_value: u32,
        suffix_bits: u32,
        limit: u64,
    ) -> io::Result<Option<u32>> {
        match self.find_start_code(prefix_bits, prefix_value, suffix_bits, limit)? {
            Some((offset, suffix)) => {
                self.set_position(offset)?;
                Ok(Some(suffix))
            }
            None => Ok(None),
        }
    }
}

impl Default for BitstreamReader<'_> {
    fn default() -> Self {
        Self::new(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_msb_first() -> io::Result<()> {
        let mut reader = BitstreamReader::new(&[0b1010_0000, 0xFF]);
        assert!(reader.get()?);
        assert_eq!(reader.get_bits(3)?, 0b010);
        assert_eq!(reader.show_bits(8)?, 0b0000_1111);
        assert_eq!(reader.bit_position()?, 4);
        assert_eq!(reader.get_bits(12)?, 0x0FF);
        assert!(reader.get().is_err());
        Ok(())
    }

    #[test]
    fn exp_golomb() -> io::Result<()> {
        // 1 | 010 | 011 | 00100 | 00101
        let mut reader = BitstreamReader::new(&[0b1010_0110, 0b0100_0010, 0b1000_0000]);
        assert_eq!(reader.ue()?, 0);
        assert_eq!(reader.ue()?, 1);
        assert_eq!(reader.se()?, -1);
        assert_eq!(reader.ue()?, 3);
        assert_eq!(reader.se()?, -2);
        Ok(())
    }

    #[test]
    fn te_with_single_bit_range() -> io::Result<()> {
        let mut reader = BitstreamReader::new(&[0b0100_0000]);
        assert_eq!(reader.te(1)?, 1);
        assert_eq!(reader.te(1)?, 0);
        assert_eq!(reader.te(0)?, 0);
        Ok(())
    }

    #[test]
    fn start_code_search() -> io::Result<()> {
        let data = [0xFF, 0x00, 0x00, 0x00, 0x01, 0xB3, 0x00, 0x00, 0x01, 0xB8];
        let mut reader = BitstreamReader::new(&data);

        assert_eq!(reader.next_start_code(24, 1, 8, 10)?, Some(0xB3));
        assert_eq!(reader.position()?, 2);

        reader.skip_n(32)?;
        assert_eq!(reader.find_start_code(24, 1, 8, 10)?, Some((6, 0xB8)));
        assert_eq!(reader.find_start_code(24, 1, 8, 9)?, None);
        assert_eq!(reader.position()?, 6);
        Ok(())
    }

    #[test]
    fn unaligned_search_starts_at_next_byte() -> io::Result<()> {
        let data = [0x00, 0x00, 0x01, 0xB3, 0x00, 0x00, 0x01, 0x00];
        let mut reader = BitstreamReader::new(&data);
        reader.get()?;
        assert_eq!(reader.next_start_code(24, 1, 8, 8)?, Some(0x00));
        assert_eq!(reader.position()?, 4);
        Ok(())
    }

    #[test]
    fn cancellation_flag() {
        let flag = CancelFlag::default();
        let reader = BitstreamReader::with_cancel(&[0u8; 4], flag.clone());
        assert!(!reader.is_cancelled());
        flag.cancel();
        assert!(reader.is_cancelled());
    }
}
