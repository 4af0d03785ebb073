//! CAVLC residual block decoding.
//!
//! Codes are matched against `(length, value)` tables with a 16-bit peek.
//! Tables are indexed by symbol, so the position of the matching entry is
//! the decoded value; zero length entries are unused symbols.

use anyhow::{Result, bail};

use crate::utils::bitstream_io::BitstreamReader;
use crate::utils::errors::CavlcError;

/// Longest `level_prefix` accepted.
const MAX_LEVEL_PREFIX: u32 = 25;

/// Special `nC` of chroma DC blocks in 4:2:0.
pub const NC_CHROMA_DC: i32 = -1;
/// Special `nC` of chroma DC blocks in 4:2:2.
pub const NC_CHROMA422_DC: i32 = -2;

const COEFF_TOKEN_LEN_0: [u8; 68] = [
    1, 0, 0, 0,
    6, 2, 0, 0,
    8, 6, 3, 0,
    9, 8, 7, 5,
    10, 9, 8, 6,
    11, 10, 9, 7,
    13, 11, 10, 8,
    13, 13, 11, 9,
    13, 13, 13, 10,
    14, 14, 13, 11,
    14, 14, 14, 13,
    15, 15, 14, 14,
    15, 15, 15, 14,
    16, 15, 15, 15,
    16, 16, 16, 15,
    16, 16, 16, 16,
    16, 16, 16, 16,
];

const COEFF_TOKEN_BITS_0: [u8; 68] = [
    1, 0, 0, 0,
    5, 1, 0, 0,
    7, 4, 1, 0,
    7, 6, 5, 3,
    7, 6, 5, 3,
    7, 6, 5, 4,
    15, 6, 5, 4,
    11, 14, 5, 4,
    8, 10, 13, 4,
    15, 14, 9, 4,
    11, 10, 13, 12,
    15, 14, 9, 12,
    11, 10, 13, 8,
    15, 1, 9, 12,
    11, 14, 13, 8,
    7, 10, 9, 12,
    4, 6, 5, 8,
];

const COEFF_TOKEN_LEN_1: [u8; 68] = [
    2, 0, 0, 0,
    6, 2, 0, 0,
    6, 5, 3, 0,
    7, 6, 6, 4,
    8, 6, 6, 4,
    8, 7, 7, 5,
    9, 8, 8, 6,
    11, 9, 9, 6,
    11, 11, 11, 7,
    12, 11, 11, 9,
    12, 12, 12, 11,
    12, 12, 12, 11,
    13, 13, 13, 12,
    13, 13, 13, 13,
    13, 14, 13, 13,
    14, 14, 14, 13,
    14, 14, 14, 14,
];

const COEFF_TOKEN_BITS_1: [u8; 68] = [
    3, 0, 0, 0,
    11, 2, 0, 0,
    7, 7, 3, 0,
    7, 10, 9, 5,
    7, 6, 5, 4,
    4, 6, 5, 6,
    7, 6, 5, 8,
    15, 6, 5, 4,
    11, 14, 13, 4,
    15, 10, 9, 4,
    11, 14, 13, 12,
    8, 10, 9, 8,
    15, 14, 13, 12,
    11, 10, 9, 12,
    7, 11, 6, 8,
    9, 8, 10, 1,
    7, 6, 5, 4,
];

const COEFF_TOKEN_LEN_2: [u8; 68] = [
    4, 0, 0, 0,
    6, 4, 0, 0,
    6, 5, 4, 0,
    6, 5, 5, 4,
    7, 5, 5, 4,
    7, 5, 5, 4,
    7, 6, 6, 4,
    7, 6, 6, 4,
    8, 7, 7, 5,
    8, 8, 7, 6,
    9, 8, 8, 7,
    9, 9, 8, 8,
    9, 9, 9, 8,
    10, 9, 9, 9,
    10, 10, 10, 10,
    10, 10, 10, 10,
    10, 10, 10, 10,
];

const COEFF_TOKEN_BITS_2: [u8; 68] = [
    15, 0, 0, 0,
    15, 14, 0, 0,
    11, 15, 13, 0,
    8, 12, 14, 12,
    15, 10, 11, 11,
    11, 8, 9, 10,
    9, 14, 13, 9,
    8, 10, 9, 8,
    15, 14, 13, 13,
    11, 14, 10, 12,
    15, 10, 13, 12,
    11, 14, 9, 12,
    8, 10, 13, 8,
    13, 7, 9, 12,
    9, 12, 11, 10,
    5, 8, 7, 6,
    1, 4, 3, 2,
];

const COEFF_TOKEN_LEN_3: [u8; 68] = [
    6, 0, 0, 0,
    6, 6, 0, 0,
    6, 6, 6, 0,
    6, 6, 6, 6,
    6, 6, 6, 6,
    6, 6, 6, 6,
    6, 6, 6, 6,
    6, 6, 6, 6,
    6, 6, 6, 6,
    6, 6, 6, 6,
    6, 6, 6, 6,
    6, 6, 6, 6,
    6, 6, 6, 6,
    6, 6, 6, 6,
    6, 6, 6, 6,
    6, 6, 6, 6,
    6, 6, 6, 6,
];

const COEFF_TOKEN_BITS_3: [u8; 68] = [
    3, 0, 0, 0,
    0, 1, 0, 0,
    4, 5, 6, 0,
    8, 9, 10, 11,
    12, 13, 14, 15,
    16, 17, 18, 19,
    20, 21, 22, 23,
    24, 25, 26, 27,
    28, 29, 30, 31,
    32, 33, 34, 35,
    36, 37, 38, 39,
    40, 41, 42, 43,
    44, 45, 46, 47,
    48, 49, 50, 51,
    52, 53, 54, 55,
    56, 57, 58, 59,
    60, 61, 62, 63,
];

const CHROMA_DC_COEFF_TOKEN_LEN: [u8; 20] = [
    2, 0, 0, 0,
    6, 1, 0, 0,
    6, 6, 3, 0,
    6, 7, 7, 6,
    6, 8, 8, 7,
];

const CHROMA_DC_COEFF_TOKEN_BITS: [u8; 20] = [
    1, 0, 0, 0,
    7, 1, 0, 0,
    4, 6, 1, 0,
    3, 3, 2, 5,
    2, 3, 2, 0,
];

const CHROMA422_DC_COEFF_TOKEN_LEN: [u8; 36] = [
    1, 0, 0, 0,
    7, 2, 0, 0,
    7, 7, 3, 0,
    9, 7, 7, 5,
    9, 9, 7, 6,
    10, 10, 9, 7,
    11, 11, 10, 7,
    12, 12, 11, 10,
    13, 12, 12, 11,
];

const CHROMA422_DC_COEFF_TOKEN_BITS: [u8; 36] = [
    1, 0, 0, 0,
    15, 1, 0, 0,
    14, 13, 1, 0,
    7, 12, 11, 1,
    6, 5, 10, 1,
    7, 6, 4, 9,
    7, 6, 5, 8,
    7, 6, 5, 4,
    7, 5, 4, 4,
];

const TOTAL_ZEROS_LEN: [&[u8]; 15] = [
    &[1, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 9],
    &[3, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 6, 6, 6, 6],
    &[4, 3, 3, 3, 4, 4, 3, 3, 4, 5, 5, 6, 5, 6],
    &[5, 3, 4, 4, 3, 3, 3, 4, 3, 4, 5, 5, 5],
    &[4, 4, 4, 3, 3, 3, 3, 3, 4, 5, 4, 5],
    &[6, 5, 3, 3, 3, 3, 3, 3, 4, 3, 6],
    &[6, 5, 3, 3, 3, 2, 3, 4, 3, 6],
    &[6, 4, 5, 3, 2, 2, 3, 3, 6],
    &[6, 6, 4, 2, 2, 3, 2, 5],
    &[5, 5, 3, 2, 2, 2, 4],
    &[4, 4, 3, 3, 1, 3],
    &[4, 4, 2, 1, 3],
    &[3, 3, 1, 2],
    &[2, 2, 1],
    &[1, 1],
];

const TOTAL_ZEROS_BITS: [&[u8]; 15] = [
    &[1, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 1],
    &[7, 6, 5, 4, 3, 5, 4, 3, 2, 3, 2, 3, 2, 1, 0],
    &[5, 7, 6, 5, 4, 3, 4, 3, 2, 3, 2, 1, 1, 0],
    &[3, 7, 5, 4, 6, 5, 4, 3, 3, 2, 2, 1, 0],
    &[5, 4, 3, 7, 6, 5, 4, 3, 2, 1, 1, 0],
    &[1, 1, 7, 6, 5, 4, 3, 2, 1, 1, 0],
    &[1, 1, 5, 4, 3, 3, 2, 1, 1, 0],
    &[1, 1, 1, 3, 3, 2, 2, 1, 0],
    &[1, 0, 1, 3, 2, 1, 1, 1],
    &[1, 0, 1, 3, 2, 1, 1],
    &[0, 1, 1, 2, 1, 3],
    &[0, 1, 1, 1, 1],
    &[0, 1, 1, 1],
    &[0, 1, 1],
    &[0, 1],
];

const CHROMA_DC_TOTAL_ZEROS_LEN: [&[u8]; 3] = [
    &[1, 2, 3, 3],
    &[1, 2, 2],
    &[1, 1],
];

const CHROMA_DC_TOTAL_ZEROS_BITS: [&[u8]; 3] = [
    &[1, 1, 1, 0],
    &[1, 1, 0],
    &[1, 0],
];

const CHROMA422_DC_TOTAL_ZEROS_LEN: [&[u8]; 7] = [
    &[1, 3, 3, 4, 4, 4, 5, 5],
    &[3, 2, 3, 3, 3, 3, 3],
    &[3, 3, 2, 2, 3, 3],
    &[3, 2, 2, 2, 3],
    &[2, 2, 2, 2],
    &[2, 2, 1],
    &[1, 1],
];

const CHROMA422_DC_TOTAL_ZEROS_BITS: [&[u8]; 7] = [
    &[1, 2, 3, 2, 3, 1, 1, 0],
    &[0, 1, 1, 4, 5, 6, 7],
    &[0, 1, 1, 2, 6, 7],
    &[6, 0, 1, 2, 7],
    &[0, 1, 2, 3],
    &[0, 1, 1],
    &[0, 1],
];

const RUN_BEFORE_LEN: [&[u8]; 7] = [
    &[1, 1],
    &[1, 2, 2],
    &[2, 2, 2, 2],
    &[2, 2, 2, 3, 3],
    &[2, 2, 3, 3, 3, 3],
    &[2, 3, 3, 3, 3, 3, 3],
    &[3, 3, 3, 3, 3, 3, 3, 4, 5, 6, 7, 8, 9, 10, 11],
];

const RUN_BEFORE_BITS: [&[u8]; 7] = [
    &[1, 0],
    &[1, 1, 0],
    &[3, 2, 1, 0],
    &[3, 2, 1, 1, 0],
    &[3, 2, 3, 2, 1, 0],
    &[3, 0, 1, 3, 2, 5, 4],
    &[7, 6, 5, 4, 3, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1],
];

/// A decoded residual block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResidualBlock {
    /// `TotalCoeff(coeff_token)`
    pub total_coeff: u8,
    /// Coefficient levels in scan order, `startIdx` based.
    pub coeff_level: [i32; 16],
}

/// Reads one variable length code and returns its symbol.
fn read_code(bs: &mut BitstreamReader<'_>, lens: &[u8], codes: &[u8]) -> Result<Option<usize>> {
    let avail = bs.available()?.min(16) as u32;
    let peek = bs.show_bits(avail)? << (16 - avail);

    let symbol = lens.iter().zip(codes).position(|(&len, &code)| {
        let len = u32::from(len);
        len != 0 && len <= avail && peek >> (16 - len) == u32::from(code)
    });
    if let Some(symbol) = symbol {
        bs.skip_n(u32::from(lens[symbol]))?;
    }
    Ok(symbol)
}

fn coeff_token_table(n_c: i32) -> (&'static [u8], &'static [u8]) {
    match n_c {
        NC_CHROMA422_DC => (&CHROMA422_DC_COEFF_TOKEN_LEN, &CHROMA422_DC_COEFF_TOKEN_BITS),
        NC_CHROMA_DC => (&CHROMA_DC_COEFF_TOKEN_LEN, &CHROMA_DC_COEFF_TOKEN_BITS),
        0..2 => (&COEFF_TOKEN_LEN_0, &COEFF_TOKEN_BITS_0),
        2..4 => (&COEFF_TOKEN_LEN_1, &COEFF_TOKEN_BITS_1),
        4..8 => (&COEFF_TOKEN_LEN_2, &COEFF_TOKEN_BITS_2),
        _ => (&COEFF_TOKEN_LEN_3, &COEFF_TOKEN_BITS_3),
    }
}

/// `coeff_token` as `(TotalCoeff, TrailingOnes)`.
pub fn coeff_token(bs: &mut BitstreamReader<'_>, n_c: i32) -> Result<(usize, usize)> {
    let (lens, codes) = coeff_token_table(n_c);
    let symbol = read_code(bs, lens, codes)?.ok_or(CavlcError::CoeffToken(n_c))?;
    Ok((symbol / 4, symbol % 4))
}

fn total_zeros(bs: &mut BitstreamReader<'_>, total_coeff: usize, max_num_coeff: usize) -> Result<usize> {
    let (lens, codes): (&[&[u8]], &[&[u8]]) = match max_num_coeff {
        4 => (&CHROMA_DC_TOTAL_ZEROS_LEN, &CHROMA_DC_TOTAL_ZEROS_BITS),
        8 => (&CHROMA422_DC_TOTAL_ZEROS_LEN, &CHROMA422_DC_TOTAL_ZEROS_BITS),
        _ => (&TOTAL_ZEROS_LEN, &TOTAL_ZEROS_BITS),
    };
    let row = total_coeff - 1;
    let (Some(lens), Some(codes)) = (lens.get(row), codes.get(row)) else {
        bail!(CavlcError::TotalZeros(total_coeff));
    };
    Ok(read_code(bs, lens, codes)?.ok_or(CavlcError::TotalZeros(total_coeff))?)
}

fn run_before(bs: &mut BitstreamReader<'_>, zeros_left: usize) -> Result<usize> {
    let row = zeros_left.min(7) - 1;
    let run = read_code(bs, RUN_BEFORE_LEN[row], RUN_BEFORE_BITS[row])?.ok_or(CavlcError::RunBefore(zeros_left))?;
    if run > zeros_left {
        bail!(CavlcError::RunBefore(zeros_left));
    }
    Ok(run)
}

fn level_prefix(bs: &mut BitstreamReader<'_>) -> Result<u32> {
    let mut prefix = 0;
    while !bs.get()? {
        prefix += 1;
        if prefix > MAX_LEVEL_PREFIX {
            bail!(CavlcError::LevelPrefix(prefix));
        }
    }
    Ok(prefix)
}

/// `residual_block_cavlc(coeffLevel, startIdx, endIdx, maxNumCoeff)`.
pub fn residual_block(
    bs: &mut BitstreamReader<'_>,
    n_c: i32,
    start_idx: usize,
    end_idx: usize,
    max_num_coeff: usize,
) -> Result<ResidualBlock> {
    let mut block = ResidualBlock::default();
    let (total_coeff, trailing_ones) = coeff_token(bs, n_c)?;
    if total_coeff == 0 {
        return Ok(block);
    }
    if total_coeff > max_num_coeff {
        bail!(CavlcError::CoefficientOverflow(total_coeff));
    }
    block.total_coeff = total_coeff as u8;

    let mut level = [0i32; 16];
    let mut suffix_length: u32 = if total_coeff > 10 && trailing_ones < 3 { 1 } else { 0 };
    for i in 0..total_coeff {
        if i < trailing_ones {
            level[i] = if bs.get()? { -1 } else { 1 };
            continue;
        }

        let prefix = level_prefix(bs)?;
        let mut level_code = (prefix.min(15) << suffix_length) as i32;
        let level_suffix_size = match prefix {
            14 if suffix_length == 0 => 4,
            15.. => prefix - 3,
            _ => suffix_length,
        };
        if level_suffix_size > 0 {
            level_code += bs.get_bits(level_suffix_size)? as i32;
        }
        if prefix >= 15 && suffix_length == 0 {
            level_code += 15;
        }
        if prefix >= 16 {
            level_code += (1 << (prefix - 3)) - 4096;
        }
        if i == trailing_ones && trailing_ones < 3 {
            level_code += 2;
        }

        level[i] = if level_code % 2 == 0 {
            (level_code + 2) >> 1
        } else {
            (-level_code - 1) >> 1
        };

        if suffix_length == 0 {
            suffix_length = 1;
        }
        if level[i].unsigned_abs() > (3 << (suffix_length - 1)) && suffix_length < 6 {
            suffix_length += 1;
        }
    }

    let coded = end_idx - start_idx + 1;
    let mut zeros_left = 0;
    if total_coeff < coded {
        zeros_left = total_zeros(bs, total_coeff, max_num_coeff)?;
        if total_coeff + zeros_left > coded {
            bail!(CavlcError::TotalZeros(total_coeff));
        }
    }

    let mut run = [0usize; 16];
    for r in run.iter_mut().take(total_coeff - 1) {
        if zeros_left > 0 {
            *r = run_before(bs, zeros_left)?;
            zeros_left -= *r;
        }
    }
    run[total_coeff - 1] = zeros_left;

    let mut coeff_num = 0;
    for i in (0..total_coeff).rev() {
        coeff_num += run[i] + 1;
        let index = start_idx + coeff_num - 1;
        if index > end_idx {
            bail!(CavlcError::CoefficientOverflow(index));
        }
        block.coeff_level[index] = level[i];
    }
    Ok(block)
}
