//! Supporting infrastructure: bit-level reading, cancellation and error types.

pub mod bitstream_io;
pub mod cancel;
pub mod errors;
