//! Frame reassembly across arbitrary chunk boundaries.

mod common;

use colloquy::core::frame::FrameExtractor;

use common::mp3_frame;

/// Feeding a stream in chunks of [7, 131, 29, 1024, rest] yields exactly
/// the frames of a single feed, and the tail is empty iff the stream ends
/// on a frame boundary.
#[test]
fn test_chunked_feed_equals_single_feed() {
    let mut stream = Vec::new();
    for fill in [0x10, 0x20, 0x30, 0x40, 0x50] {
        stream.extend_from_slice(&mp3_frame(fill));
    }

    let mut whole = FrameExtractor::new();
    let expected = whole.feed(&stream);
    assert_eq!(expected.len(), 5);
    assert_eq!(whole.tail_len(), 0);

    let mut chunked = FrameExtractor::new();
    let mut frames = Vec::new();
    let mut offset = 0;
    for size in [7usize, 131, 29, 1024] {
        let end = (offset + size).min(stream.len());
        frames.extend(chunked.feed(&stream[offset..end]));
        offset = end;
    }
    frames.extend(chunked.feed(&stream[offset..]));

    assert_eq!(frames, expected);
    assert_eq!(chunked.tail_len(), 0);
}

#[test]
fn test_tail_tracks_partial_final_frame() {
    let mut stream = Vec::new();
    stream.extend_from_slice(&mp3_frame(0xAA));
    stream.extend_from_slice(&mp3_frame(0xBB)[..200]);

    let mut extractor = FrameExtractor::new();
    let frames = extractor.feed(&stream);
    assert_eq!(frames.len(), 1);
    assert_eq!(extractor.tail_len(), 200);

    // The remainder completes the second frame.
    let frames = extractor.feed(&mp3_frame(0xBB)[200..]);
    assert_eq!(frames.len(), 1);
    assert_eq!(extractor.tail_len(), 0);
}

#[test]
fn test_interleaved_garbage_resyncs() {
    let mut stream = vec![0u8, 1, 2, 3];
    stream.extend_from_slice(&mp3_frame(0x11));
    stream.extend_from_slice(&[0xFF, 0x00]); // sync byte, bogus header
    stream.extend_from_slice(&mp3_frame(0x22));

    let mut extractor = FrameExtractor::new();
    let frames = extractor.feed(&stream);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].len(), 417);
    assert_eq!(frames[1].len(), 417);
}
