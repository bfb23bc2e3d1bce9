//! Reassembly of whole decodable frames from an arbitrarily-chunked
//! compressed audio byte stream.

use bytes::Bytes;
use tracing::debug;

use super::header::FrameHeader;

/// Splits a continuous MPEG audio byte stream into whole frames.
///
/// Chunks arriving from the wire are concatenation-safe but carry no frame
/// alignment; `feed` appends them to an internal tail, emits every complete
/// frame found, and keeps the trailing partial frame for the next call.
/// Invalid sync positions advance one byte and resynchronize, so occasional
/// garbage in the stream costs a scan, not a stall.
#[derive(Debug, Default)]
pub struct FrameExtractor {
    tail: Vec<u8>,
}

impl FrameExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every complete frame now available.
    ///
    /// The unconsumed remainder is retained until the next `feed` or
    /// `reset`. Memory use is bounded by the pending tail, never the total
    /// stream.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Bytes> {
        self.tail.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut cursor = 0;

        while cursor + 4 <= self.tail.len() {
            let window = &self.tail[cursor..];
            if !FrameHeader::has_sync(window) {
                cursor += 1;
                continue;
            }

            let Some(header) = FrameHeader::parse(window) else {
                // Sync pattern without a valid header: advance and resync.
                cursor += 1;
                continue;
            };

            let frame_len = header.frame_len();
            if window.len() < frame_len {
                // Partial frame; wait for more bytes.
                break;
            }

            frames.push(Bytes::copy_from_slice(&window[..frame_len]));
            cursor += frame_len;
        }

        if cursor > 0 {
            self.tail.drain(..cursor);
        }

        if !frames.is_empty() {
            debug!(
                frames = frames.len(),
                tail = self.tail.len(),
                "extracted audio frames"
            );
        }

        frames
    }

    /// Bytes currently held back awaiting frame completion.
    pub fn tail_len(&self) -> usize {
        self.tail.len()
    }

    /// Drop any pending tail.
    pub fn reset(&mut self) {
        self.tail.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // MPEG1 Layer III, 128 kbit/s, 44100 Hz, no padding: 417-byte frames.
    fn frame(fill: u8) -> Vec<u8> {
        let mut data = vec![0xFF, 0xFB, 0x90, 0x00];
        data.resize(417, fill);
        data
    }

    #[test]
    fn test_single_complete_frame() {
        let mut extractor = FrameExtractor::new();
        let frames = extractor.feed(&frame(0xAA));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 417);
        assert_eq!(extractor.tail_len(), 0);
    }

    #[test]
    fn test_partial_frame_held_back() {
        let mut extractor = FrameExtractor::new();
        let data = frame(0xAA);

        assert!(extractor.feed(&data[..100]).is_empty());
        assert_eq!(extractor.tail_len(), 100);

        let frames = extractor.feed(&data[100..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), data.as_slice());
        assert_eq!(extractor.tail_len(), 0);
    }

    #[test]
    fn test_split_equals_whole() {
        let mut stream = Vec::new();
        for fill in [0x11, 0x22, 0x33, 0x44] {
            stream.extend_from_slice(&frame(fill));
        }

        let mut whole = FrameExtractor::new();
        let expected = whole.feed(&stream);
        assert_eq!(expected.len(), 4);

        // Arbitrary split sizes, frame boundaries nowhere near chunk
        // boundaries.
        let mut split = FrameExtractor::new();
        let mut got = Vec::new();
        let mut offset = 0;
        for size in [7usize, 131, 29, 1024] {
            let end = (offset + size).min(stream.len());
            got.extend(split.feed(&stream[offset..end]));
            offset = end;
        }
        got.extend(split.feed(&stream[offset..]));

        assert_eq!(got, expected);
        assert_eq!(split.tail_len(), 0);
    }

    #[test]
    fn test_resync_past_garbage() {
        let mut stream = vec![0x00, 0x13, 0xFF, 0x01, 0x42];
        stream.extend_from_slice(&frame(0xAB));

        let mut extractor = FrameExtractor::new();
        let frames = extractor.feed(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 417);
    }

    #[test]
    fn test_sync_without_valid_header_skipped() {
        // 0xFF 0xE0 has the sync bits but reserved version+layer fields.
        let mut stream = vec![0xFF, 0xE0, 0x00, 0x00];
        stream.extend_from_slice(&frame(0xCD));

        let mut extractor = FrameExtractor::new();
        let frames = extractor.feed(&stream);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_tail_nonempty_iff_mid_frame() {
        let mut extractor = FrameExtractor::new();
        let data = frame(0x55);

        extractor.feed(&data);
        assert_eq!(extractor.tail_len(), 0);

        extractor.feed(&data[..50]);
        assert!(extractor.tail_len() > 0);
    }

    #[test]
    fn test_reset_clears_tail() {
        let mut extractor = FrameExtractor::new();
        extractor.feed(&frame(0x55)[..200]);
        assert!(extractor.tail_len() > 0);
        extractor.reset();
        assert_eq!(extractor.tail_len(), 0);
    }
}
