/// Logs a soft check failure, or fails the current parse when `$level` is at
/// or above the state's fail level.
///
/// Must be used inside a closure or function returning `anyhow::Result`.
#[macro_export]
macro_rules! log_or_invalidate {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level() {
            return Err(::anyhow::Error::from($err));
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    #[error("Scan cancelled at offset {0}")]
    Cancelled(u64),

    #[error("Reader error at offset {offset}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: std::io::Error,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("Header did not start on a start code")]
    MissingStartCode,

    #[error("Zero byte stuffing of {found} bytes exceeds the maximum of {max}")]
    ExcessiveStuffing { found: u64, max: u64 },
}

#[derive(thiserror::Error, Debug)]
pub enum Mpeg2VideoError {
    #[error("Reserved {field} value {value}")]
    ReservedValue { field: &'static str, value: u32 },

    #[error("Slice vertical position {0} beyond the picture height")]
    SliceOutsidePicture(u32),

    #[error("MPEG-2 extension {0} without a preceding sequence extension")]
    ExtensionWithoutSequenceExtension(&'static str),
}

#[derive(thiserror::Error, Debug)]
pub enum H264Error {
    #[error("forbidden_zero_bit is set")]
    ForbiddenZeroBit,

    #[error("nal_ref_idc must be {expected} for nal_unit_type {nal_unit_type}")]
    NalRefIdc { nal_unit_type: u8, expected: &'static str },

    #[error("{name} out of range: {value} not in {min}..={max}")]
    OutOfRange {
        name: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Unknown profile_idc {0}")]
    UnknownProfile(u32),

    #[error("Reference to undefined {kind} id {id}")]
    UndefinedParameterSet { kind: &'static str, id: u32 },

    #[error("Missing rbsp_stop_one_bit")]
    MissingStopBit,

    #[error("Unsupported slice type {0}")]
    SliceType(u32),

    #[error("Picture size {width}x{height} macroblocks is too large")]
    PictureTooLarge { width: u32, height: u32 },
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CavlcError {
    #[error("No coeff_token code matches for nC = {0}")]
    CoeffToken(i32),

    #[error("No total_zeros code matches for TotalCoeff = {0}")]
    TotalZeros(usize),

    #[error("No run_before code matches for zerosLeft = {0}")]
    RunBefore(usize),

    #[error("level_prefix {0} exceeds the supported range")]
    LevelPrefix(u32),

    #[error("Coefficient index {0} beyond the block")]
    CoefficientOverflow(usize),

    #[error("Invalid mb_type {mb_type} in {slice} slice")]
    MbType { mb_type: u32, slice: &'static str },

    #[error("Invalid sub_mb_type {0}")]
    SubMbType(u32),

    #[error("Invalid coded_block_pattern code {0}")]
    CodedBlockPattern(u32),

    #[error("mb_qp_delta {0} out of range")]
    QpDelta(i32),

    #[error("mb_skip_run {run} runs past the picture ({remaining} macroblocks left)")]
    SkipRun { run: u32, remaining: u32 },

    #[error("Reference index {index} exceeds {max}")]
    RefIdx { index: u32, max: u32 },
}

#[derive(thiserror::Error, Debug)]
pub enum SystemError {
    #[error("Marker bit not set in {0}")]
    MarkerBit(&'static str),

    #[error("{header} length {length} runs past the end of data")]
    Truncated { header: &'static str, length: u64 },

    #[error("{header} length {declared} shorter than its fields ({needed})")]
    HeaderLength {
        header: &'static str,
        declared: u32,
        needed: u32,
    },

    #[error("Unknown stream id {0:#04X} in system header")]
    StreamId(u8),

    #[error("Stuffing byte {0:#04X} is not 0xFF")]
    StuffingByte(u8),

    #[error("Zero mux rate")]
    ZeroMuxRate,
}
