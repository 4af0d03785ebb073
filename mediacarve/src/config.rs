//! Carver configuration.
//!
//! Plain values fixed at construction time. The binary fills them from an
//! optional YAML file.

use log::Level;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mpeg2VideoConfig {
    /// Fewest headers a block needs to be reported.
    pub min_header_count: usize,
    /// Headers after which a block is cut and reported as a fragment.
    pub max_header_count: usize,
    /// Longest run of stuffing zero bytes allowed between two headers.
    pub max_zero_byte_stuffing: u64,
}

impl Default for Mpeg2VideoConfig {
    fn default() -> Self {
        Self {
            min_header_count: 3,
            max_header_count: 100_000,
            max_zero_byte_stuffing: 64,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct H264Config {
    pub min_nal_unit_count: usize,
    pub max_nal_unit_count: usize,
    pub max_zero_stuffing: u64,
    /// Entropy decode slice data. Without it slices are framed by start codes only.
    pub decode_slice_data: bool,
    /// Macroblocks that must decode cleanly before a damaged slice is kept.
    pub min_salvaged_macroblocks: u32,
}

impl Default for H264Config {
    fn default() -> Self {
        Self {
            min_nal_unit_count: 3,
            max_nal_unit_count: 100_000,
            max_zero_stuffing: 64,
            decode_slice_data: true,
            min_salvaged_macroblocks: 8,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MpegSystemConfig {
    pub min_header_count: usize,
    pub max_header_count: usize,
    pub max_zero_byte_stuffing: u64,
}

impl Default for MpegSystemConfig {
    fn default() -> Self {
        Self {
            min_header_count: 2,
            max_header_count: 100_000,
            max_zero_byte_stuffing: 64,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CarveConfig {
    pub mpeg2_video: Mpeg2VideoConfig,
    pub h264: H264Config,
    pub mpeg_system: MpegSystemConfig,
    /// Soft checks at or above this level invalidate the header instead of
    /// only being logged.
    pub fail_level: Level,
}

impl Default for CarveConfig {
    fn default() -> Self {
        Self {
            mpeg2_video: Mpeg2VideoConfig::default(),
            h264: H264Config::default(),
            mpeg_system: MpegSystemConfig::default(),
            fail_level: Level::Error,
        }
    }
}
