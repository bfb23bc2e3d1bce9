//! Compressed-audio frame reassembly.
//!
//! Wire audio arrives as base64 chunks of a continuous `audio/mpeg` byte
//! stream with no alignment guarantees. This module turns that stream back
//! into whole decodable frames for the platform decoder.

mod extractor;
mod header;

pub use extractor::FrameExtractor;
pub use header::{FrameHeader, MpegLayer, MpegVersion};
