//! Format carvers.
//!
//! - **MPEG-1/2 video** ([`mpeg2_video`]): elementary streams framed by `00 00 01 xx` start codes
//! - **H.264** ([`h264`]): Annex B byte streams, with CAVLC slice data decoding
//! - **MPEG-1/2 systems** ([`mpeg_system`]): program streams of packs and PES packets

pub mod h264;
pub mod mpeg2_video;
pub mod mpeg_system;

use crate::result::Named;

/// Detector that produced a block or a result node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Named)]
pub enum FormatId {
    #[named(rename = "MPEG-1/2 Video")]
    Mpeg2Video,
    #[named(rename = "H.264/AVC")]
    H264,
    #[named(rename = "MPEG-1/2 Systems")]
    MpegSystem,
}

impl FormatId {
    pub const ALL: [FormatId; 3] = [FormatId::Mpeg2Video, FormatId::H264, FormatId::MpegSystem];

    /// Short identifier used on the command line and in file names.
    pub fn key(self) -> &'static str {
        match self {
            FormatId::Mpeg2Video => "mpeg2",
            FormatId::H264 => "h264",
            FormatId::MpegSystem => "mpegps",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key().eq_ignore_ascii_case(key))
    }
}

/// Codec of a carved block or of a stream demultiplexed from one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Named)]
pub enum CodecId {
    #[default]
    Unknown,
    #[named(rename = "MPEG-1 Video")]
    Mpeg1Video,
    #[named(rename = "MPEG-2 Video")]
    Mpeg2Video,
    #[named(rename = "H.264")]
    H264,
    #[named(rename = "MPEG Audio")]
    MpegAudio,
    #[named(rename = "Private Stream 1")]
    PrivateStream1,
    #[named(rename = "Private Stream 2")]
    PrivateStream2,
    Padding,
    #[named(rename = "MPEG Systems")]
    MpegSystem,
}

impl CodecId {
    /// File extension used when the codec is written out raw.
    pub fn extension(self) -> &'static str {
        match self {
            CodecId::Mpeg1Video => "m1v",
            CodecId::Mpeg2Video => "m2v",
            CodecId::H264 => "h264",
            CodecId::MpegAudio => "mpa",
            CodecId::MpegSystem => "mpg",
            CodecId::Unknown | CodecId::PrivateStream1 | CodecId::PrivateStream2 | CodecId::Padding => "bin",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_keys() {
        assert_eq!(FormatId::from_key("H264"), Some(FormatId::H264));
        assert_eq!(FormatId::from_key("quicktime"), None);
        assert_eq!(FormatId::MpegSystem.to_string(), "MPEG-1/2 Systems");
        assert_eq!(CodecId::Padding.name(), "Padding");
    }
}
