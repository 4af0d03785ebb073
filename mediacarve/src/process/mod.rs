use crate::config::CarveConfig;
use crate::formats::FormatId;
use crate::formats::h264::H264Carver;
use crate::formats::mpeg_system::MpegSystemCarver;
use crate::formats::mpeg2_video::Mpeg2VideoCarver;
use crate::utils::bitstream_io::BitstreamReader;
use crate::utils::cancel::CancelFlag;

/// Format plug-in contract.
///
/// Provides the [`DataBlockCarver`](carver::DataBlockCarver) trait and the
/// [`DataBlock`](carver::DataBlock) a successful carve produces.
pub mod carver;

/// The carve loop driving one carver over one input.
pub mod carver_state;

/// Nested header parsing and result tree assembly.
pub mod reader_state;

/// Iteration over every block of an input.
pub mod scan;

use carver::DataBlockCarver;
use carver_state::CarverState;
use scan::BlockScanner;

/// Builds a fresh carver for `format`.
pub fn carver_for(format: FormatId, config: &CarveConfig) -> Box<dyn DataBlockCarver> {
    match format {
        FormatId::Mpeg2Video => Box::new(Mpeg2VideoCarver::new(config.mpeg2_video.clone())),
        FormatId::H264 => Box::new(H264Carver::new(config.h264.clone())),
        FormatId::MpegSystem => Box::new(MpegSystemCarver::new(config.mpeg_system.clone())),
    }
}

/// Scans `data` for blocks of `format`.
///
/// Every call builds its own reader, carver and state, so scans never share
/// anything but the optional cancellation flag.
pub fn detect<'a>(
    data: &'a [u8],
    format: FormatId,
    config: &CarveConfig,
    cancel: Option<CancelFlag>,
) -> BlockScanner<'a> {
    let reader = match cancel {
        Some(flag) => BitstreamReader::with_cancel(data, flag),
        None => BitstreamReader::new(data),
    };
    let state = CarverState::new(carver_for(format, config), reader, config.fail_level);
    BlockScanner::new(state)
}
