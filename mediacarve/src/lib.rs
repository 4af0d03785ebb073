//! Forensic carving of multimedia bitstreams.
//!
//! Finds MPEG-1/2 video, H.264 and MPEG-1/2 program streams inside arbitrary
//! bytes, such as an unallocated region of a disk image, without relying on
//! file boundaries. Every header found is checked against its syntax and
//! recorded in a result tree, so partially damaged streams still yield what
//! is intact.
//!
//! ## Carving
//!
//! A carver proposes candidate starts. From each candidate the carve loop
//! parses headers one by one while they stay valid, then asks the carver
//! whether the chain makes a block. Rejected candidates are retried one byte
//! later.
//!
//! ```rust,no_run
//! use mediacarve::config::CarveConfig;
//! use mediacarve::formats::FormatId;
//! use mediacarve::process::detect;
//!
//! let data = std::fs::read("image.dd")?;
//! for block in detect(&data, FormatId::Mpeg2Video, &CarveConfig::default(), None) {
//!     let block = block?;
//!     println!("{} at {:#X}..{:#X}", block.format, block.start, block.end);
//!     for (depth, id) in block.results.walk() {
//!         let node = block.results.node(id);
//!         println!("{:indent$}{} ({} bytes)", "", node.name, node.length, indent = depth * 2);
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Carver configuration knobs.
pub mod config;

/// Format carvers.
///
/// - **MPEG-1/2 video** ([`formats::mpeg2_video`])
/// - **H.264** ([`formats::h264`]), including CAVLC slice data
/// - **MPEG-1/2 systems** ([`formats::mpeg_system`])
pub mod formats;

/// The carve loop, the carver contract and the nested-parse protocol.
pub mod process;

/// Result trees, headers and attributes.
pub mod result;

/// Supporting infrastructure.
///
/// - **Bitstream I/O** ([`utils::bitstream_io`]): Bit-level reading and start code search
/// - **Cancellation** ([`utils::cancel`]): Shared stop flag
/// - **Error Handling** ([`utils::errors`]): Error types
pub mod utils;
