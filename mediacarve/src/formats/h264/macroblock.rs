//! Macroblock and sub-macroblock types and the `me(v)` coded block pattern
//! mapping.

use crate::formats::h264::slice_header::SliceType;
use crate::utils::errors::CavlcError;

/// Prediction mode of a macroblock partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredMode {
    Intra4x4,
    Intra8x8,
    Intra16x16,
    PredL0,
    PredL1,
    BiPred,
    Direct,
}

impl PredMode {
    pub fn uses_l0(self) -> bool {
        matches!(self, Self::PredL0 | Self::BiPred)
    }

    pub fn uses_l1(self) -> bool {
        matches!(self, Self::PredL1 | Self::BiPred)
    }
}

/// A decoded `mb_type`, normalised across slice types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbType {
    /// `I_NxN`; 4x4 or 8x8 prediction depending on `transform_size_8x8_flag`.
    INxN,
    I16x16 {
        pred_mode: u8,
        cbp_luma: u8,
        cbp_chroma: u8,
    },
    IPcm,
    /// `SI`: intra 4x4 prediction in SI slices.
    Si,
    /// One or two inter partitions.
    Inter {
        partitions: u8,
        modes: [PredMode; 2],
    },
    /// `P_8x8`, `P_8x8ref0` and `B_8x8`.
    Sub8x8 { ref0: bool },
    /// `B_Direct_16x16`
    BDirect16x16,
}

const I_16X16_TYPES: u32 = 24;

const B_PAIRS: [(PredMode, PredMode); 9] = {
    use PredMode::*;
    [
        (PredL0, PredL0),
        (PredL1, PredL1),
        (PredL0, PredL1),
        (PredL1, PredL0),
        (PredL0, BiPred),
        (PredL1, BiPred),
        (BiPred, PredL0),
        (BiPred, PredL1),
        (BiPred, BiPred),
    ]
};

impl MbType {
    /// Maps `mb_type` of a slice of the given type.
    pub fn decode(slice_type: SliceType, mb_type: u32) -> Result<Self, CavlcError> {
        let invalid = || CavlcError::MbType {
            mb_type,
            slice: slice_type.label(),
        };
        match slice_type {
            SliceType::I => Self::intra(mb_type).ok_or_else(invalid),
            SliceType::Si => match mb_type {
                0 => Ok(Self::Si),
                _ => Self::intra(mb_type - 1).ok_or_else(invalid),
            },
            SliceType::P | SliceType::Sp => match mb_type {
                0 => Ok(Self::inter(1, PredMode::PredL0, PredMode::PredL0)),
                1 | 2 => Ok(Self::inter(2, PredMode::PredL0, PredMode::PredL0)),
                3 => Ok(Self::Sub8x8 { ref0: false }),
                4 => Ok(Self::Sub8x8 { ref0: true }),
                _ => Self::intra(mb_type - 5).ok_or_else(invalid),
            },
            SliceType::B => match mb_type {
                0 => Ok(Self::BDirect16x16),
                1 => Ok(Self::inter(1, PredMode::PredL0, PredMode::PredL0)),
                2 => Ok(Self::inter(1, PredMode::PredL1, PredMode::PredL1)),
                3 => Ok(Self::inter(1, PredMode::BiPred, PredMode::BiPred)),
                4..=21 => {
                    let (first, second) = B_PAIRS[((mb_type - 4) / 2) as usize];
                    Ok(Self::inter(2, first, second))
                }
                22 => Ok(Self::Sub8x8 { ref0: false }),
                _ => Self::intra(mb_type - 23).ok_or_else(invalid),
            },
        }
    }

    fn intra(mb_type: u32) -> Option<Self> {
        match mb_type {
            0 => Some(Self::INxN),
            1..=I_16X16_TYPES => {
                let m = mb_type - 1;
                Some(Self::I16x16 {
                    pred_mode: (m % 4) as u8,
                    cbp_chroma: ((m / 4) % 3) as u8,
                    cbp_luma: if mb_type >= 13 { 15 } else { 0 },
                })
            }
            25 => Some(Self::IPcm),
            _ => None,
        }
    }

    fn inter(partitions: u8, first: PredMode, second: PredMode) -> Self {
        Self::Inter {
            partitions,
            modes: [first, second],
        }
    }

    pub fn is_intra(self) -> bool {
        matches!(self, Self::INxN | Self::I16x16 { .. } | Self::IPcm | Self::Si)
    }
}

/// A decoded `sub_mb_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubMbType {
    pub mode: PredMode,
    pub partitions: u8,
}

const P_SUB_MB_TYPES: [(PredMode, u8); 4] = [
    (PredMode::PredL0, 1),
    (PredMode::PredL0, 2),
    (PredMode::PredL0, 2),
    (PredMode::PredL0, 4),
];

const B_SUB_MB_TYPES: [(PredMode, u8); 13] = {
    use PredMode::*;
    [
        (Direct, 4),
        (PredL0, 1),
        (PredL1, 1),
        (BiPred, 1),
        (PredL0, 2),
        (PredL0, 2),
        (PredL1, 2),
        (PredL1, 2),
        (BiPred, 2),
        (BiPred, 2),
        (PredL0, 4),
        (PredL1, 4),
        (BiPred, 4),
    ]
};

impl SubMbType {
    pub fn decode(slice_type: SliceType, sub_mb_type: u32) -> Result<Self, CavlcError> {
        let table: &[(PredMode, u8)] = if slice_type == SliceType::B {
            &B_SUB_MB_TYPES
        } else {
            &P_SUB_MB_TYPES
        };
        let &(mode, partitions) = table
            .get(sub_mb_type as usize)
            .ok_or(CavlcError::SubMbType(sub_mb_type))?;
        Ok(Self { mode, partitions })
    }

    /// Whether the sub-macroblock is split below 8x8.
    pub fn is_smaller_than_8x8(self, direct_8x8_inference: bool) -> bool {
        match self.mode {
            PredMode::Direct => !direct_8x8_inference,
            _ => self.partitions > 1,
        }
    }
}

const CBP_INTRA_CHROMA: [u8; 48] = [
    47, 31, 15, 0, 23, 27, 29, 30, 7, 11, 13, 14, 39, 43, 45, 46, 16, 3, 5, 10, 12, 19, 21, 26, 28, 35, 37, 42, 44, 1,
    2, 4, 8, 17, 18, 20, 24, 6, 9, 22, 25, 32, 33, 34, 36, 40, 38, 41,
];

const CBP_INTER_CHROMA: [u8; 48] = [
    0, 16, 1, 2, 4, 8, 32, 3, 5, 10, 12, 15, 47, 7, 11, 13, 14, 6, 9, 31, 35, 37, 42, 44, 33, 34, 36, 40, 39, 43, 45,
    46, 17, 18, 20, 24, 19, 21, 26, 28, 23, 27, 29, 30, 22, 25, 38, 41,
];

const CBP_INTRA_MONO: [u8; 16] = [15, 0, 7, 11, 13, 14, 3, 5, 10, 12, 1, 2, 4, 8, 6, 9];

const CBP_INTER_MONO: [u8; 16] = [0, 1, 2, 4, 8, 3, 5, 10, 12, 15, 7, 11, 13, 14, 6, 9];

/// `coded_block_pattern` from its `me(v)` code number, as `(luma, chroma)`.
pub fn coded_block_pattern(code: u32, intra: bool, chroma_array_type: u32) -> Result<(u8, u8), CavlcError> {
    let table: &[u8] = match (chroma_array_type, intra) {
        (1 | 2, true) => &CBP_INTRA_CHROMA,
        (1 | 2, false) => &CBP_INTER_CHROMA,
        (_, true) => &CBP_INTRA_MONO,
        (_, false) => &CBP_INTER_MONO,
    };
    let &cbp = table
        .get(code as usize)
        .ok_or(CavlcError::CodedBlockPattern(code))?;
    Ok((cbp % 16, cbp / 16))
}
