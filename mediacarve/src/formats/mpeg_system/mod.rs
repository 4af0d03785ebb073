//! MPEG-1/2 program streams (ISO/IEC 11172-1, ISO/IEC 13818-1).
//!
//! ## Start Codes
//!
//! - **0xB9**: MPEG program end
//! - **0xBA**: Pack header, MPEG-1 or MPEG-2 syntax
//! - **0xBB**: System header
//! - **0xBC-0xFF**: PES packet, the code is the stream id
//!
//! ## Result Nesting
//!
//! A system header and the PES packets that follow a pack header are listed
//! under it. The optional PES header is a child of its packet.

pub mod carver;
pub mod pack;
pub mod pes;

pub use carver::MpegSystemCarver;

use crate::formats::CodecId;
use crate::result::Named;

pub const PROGRAM_END_CODE: u8 = 0xB9;
pub const PACK_START_CODE: u8 = 0xBA;
pub const SYSTEM_HEADER_START_CODE: u8 = 0xBB;

pub const PROGRAM_STREAM_MAP: u8 = 0xBC;
pub const PRIVATE_STREAM_1: u8 = 0xBD;
pub const PADDING_STREAM: u8 = 0xBE;
pub const PRIVATE_STREAM_2: u8 = 0xBF;
pub const ECM_STREAM: u8 = 0xF0;
pub const EMM_STREAM: u8 = 0xF1;
pub const DSMCC_STREAM: u8 = 0xF2;
pub const H222_1_TYPE_E_STREAM: u8 = 0xF8;
pub const PROGRAM_STREAM_DIRECTORY: u8 = 0xFF;

/// Whether `code` can start a system header or a PES packet.
pub fn is_system_start_code(code: u8) -> bool {
    code >= PROGRAM_END_CODE
}

/// Whether packets of this stream carry the optional PES header.
pub fn has_pes_header(stream_id: u8) -> bool {
    !matches!(
        stream_id,
        PROGRAM_STREAM_MAP
            | PADDING_STREAM
            | PRIVATE_STREAM_2
            | ECM_STREAM
            | EMM_STREAM
            | DSMCC_STREAM
            | H222_1_TYPE_E_STREAM
            | PROGRAM_STREAM_DIRECTORY
    )
}

/// Codec of the elementary stream carried under `stream_id`.
pub fn stream_codec(stream_id: u8, mpeg2: bool) -> CodecId {
    match stream_id {
        PRIVATE_STREAM_1 => CodecId::PrivateStream1,
        PRIVATE_STREAM_2 => CodecId::PrivateStream2,
        PADDING_STREAM => CodecId::Padding,
        0xC0..=0xDF => CodecId::MpegAudio,
        0xE0..=0xEF if mpeg2 => CodecId::Mpeg2Video,
        0xE0..=0xEF => CodecId::Mpeg1Video,
        _ => CodecId::Unknown,
    }
}

/// Label of a stream id as it appears in a PES packet or a system header.
pub fn stream_label(stream_id: u8) -> &'static str {
    match stream_id {
        0xB8 => "all audio streams",
        0xB9 => "all video streams",
        PROGRAM_STREAM_MAP => "program_stream_map",
        PRIVATE_STREAM_1 => "private_stream_1",
        PADDING_STREAM => "padding_stream",
        PRIVATE_STREAM_2 => "private_stream_2",
        0xC0..=0xDF => "audio stream",
        0xE0..=0xEF => "video stream",
        ECM_STREAM => "ECM_stream",
        EMM_STREAM => "EMM_stream",
        DSMCC_STREAM => "DSMCC_stream",
        PROGRAM_STREAM_DIRECTORY => "program_stream_directory",
        _ => "reserved data stream",
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Named)]
pub enum SystemHeader {
    PackHeader,
    SystemHeader,
    PesPacket,
    PesHeader,
    PaddingStream,
    ProgramEnd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Named)]
#[named(rename_all = "snake_case")]
pub enum SystemAttribute {
    StartCode,
    #[named(rename = "ZeroByteStuffing")]
    ZeroByteStuffing,
    #[named(rename = "MpegVersion")]
    MpegVersion,

    // pack_header()
    SystemClockReferenceBase,
    SystemClockReferenceExtension,
    ProgramMuxRate,
    Reserved,
    PackStuffingLength,

    // system_header()
    HeaderLength,
    RateBound,
    AudioBound,
    FixedFlag,
    #[named(rename = "CSPS_flag")]
    CspsFlag,
    SystemAudioLockFlag,
    SystemVideoLockFlag,
    VideoBound,
    PacketRateRestrictionFlag,
    StreamId,
    #[named(rename = "P-STD_buffer_bound_scale")]
    PStdBufferBoundScale,
    #[named(rename = "P-STD_buffer_size_bound")]
    PStdBufferSizeBound,

    // PES_packet()
    #[named(rename = "PES_packet_length")]
    PesPacketLength,
    #[named(rename = "PES_scrambling_control")]
    PesScramblingControl,
    #[named(rename = "PES_priority")]
    PesPriority,
    DataAlignmentIndicator,
    Copyright,
    OriginalOrCopy,
    #[named(rename = "PTS_DTS_flags")]
    PtsDtsFlags,
    #[named(rename = "ESCR_flag")]
    EscrFlag,
    #[named(rename = "ES_rate_flag")]
    EsRateFlag,
    #[named(rename = "DSM_trick_mode_flag")]
    DsmTrickModeFlag,
    AdditionalCopyInfoFlag,
    #[named(rename = "PES_CRC_flag")]
    PesCrcFlag,
    #[named(rename = "PES_extension_flag")]
    PesExtensionFlag,
    #[named(rename = "PES_header_data_length")]
    PesHeaderDataLength,
    #[named(rename = "PTS")]
    Pts,
    #[named(rename = "DTS")]
    Dts,
    #[named(rename = "ESCR_base")]
    EscrBase,
    #[named(rename = "ESCR_extension")]
    EscrExtension,
    #[named(rename = "ES_rate")]
    EsRate,
    StuffingBytes,
    #[named(rename = "STD_buffer_scale")]
    StdBufferScale,
    #[named(rename = "STD_buffer_size")]
    StdBufferSize,
    #[named(rename = "PayloadLength")]
    PayloadLength,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// MPEG-2 pack header: SCR 0, mux rate 25200, no stuffing.
    pub(crate) const MPEG2_PACK: [u8; 14] = [
        0x00, 0x00, 0x01, 0xBA, 0x44, 0x00, 0x04, 0x00, 0x04, 0x01, 0x01, 0x89, 0xC3, 0xF8,
    ];

    /// MPEG-2 video PES packet with a PTS and four payload bytes.
    pub(crate) const VIDEO_PES: [u8; 22] = [
        0x00, 0x00, 0x01, 0xE0, 0x00, 0x10, 0x81, 0x80, 0x05, 0x21, 0x00, 0x01, 0x00, 0x01, 0xFF, 0xFF, 0x00,
        0x00, 0x01, 0xB3, 0x12, 0x34,
    ];

    /// MPEG audio PES packet without PTS and two payload bytes.
    pub(crate) const AUDIO_PES: [u8; 11] = [0x00, 0x00, 0x01, 0xC0, 0x00, 0x05, 0x80, 0x00, 0x00, 0xFF, 0xFD];

    #[test]
    fn stream_ids() {
        assert_eq!(stream_codec(0xE3, true), CodecId::Mpeg2Video);
        assert_eq!(stream_codec(0xE3, false), CodecId::Mpeg1Video);
        assert_eq!(stream_codec(0xC1, false), CodecId::MpegAudio);
        assert_eq!(stream_codec(0xFA, true), CodecId::Unknown);
        assert!(has_pes_header(0xE0));
        assert!(!has_pes_header(PADDING_STREAM));
        assert!(is_system_start_code(PACK_START_CODE));
        assert!(!is_system_start_code(0xB3));
        assert_eq!(SystemAttribute::PesPacketLength.name(), "PES_packet_length");
        assert_eq!(SystemAttribute::RateBound.name(), "rate_bound");
    }
}
