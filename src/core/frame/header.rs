//! MPEG audio frame header parsing.
//!
//! The server streams `audio/mpeg` as a continuous byte stream; chunk
//! boundaries do not align with frame boundaries. Framing only needs the
//! header fields that determine frame length, nothing deeper in the
//! bitstream.

/// MPEG version, from the two version bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

/// MPEG layer, from the two layer bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegLayer {
    LayerI,
    LayerII,
    LayerIII,
}

/// Bitrates in kbit/s, indexed `[version/layer class][bitrate index]`.
/// Index 0 (free format) and 15 are treated as invalid for framing.
const BITRATE_KBPS: [[u32; 16]; 5] = [
    // MPEG1 Layer I
    [
        0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448, 0,
    ],
    // MPEG1 Layer II
    [
        0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 0,
    ],
    // MPEG1 Layer III
    [
        0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0,
    ],
    // MPEG2/2.5 Layer I
    [
        0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256, 0,
    ],
    // MPEG2/2.5 Layer II & III
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0],
];

/// Sample rates in Hz, indexed `[version][sample-rate index]`. Index 3 is
/// reserved.
const SAMPLE_RATE_HZ: [[u32; 3]; 3] = [
    [44100, 48000, 32000], // MPEG1
    [22050, 24000, 16000], // MPEG2
    [11025, 12000, 8000],  // MPEG2.5
];

/// Parsed MPEG audio frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub layer: MpegLayer,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub padding: bool,
}

impl FrameHeader {
    /// Whether `bytes` starts with the 11-bit frame sync pattern.
    #[inline]
    pub fn has_sync(bytes: &[u8]) -> bool {
        bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0
    }

    /// Parse a header from the first four bytes of `bytes`.
    ///
    /// Returns `None` when the sync pattern is absent or any field is a
    /// reserved/invalid value. Free-format bitrate (index 0) is rejected
    /// because the frame length cannot be computed from the header alone.
    pub fn parse(bytes: &[u8]) -> Option<FrameHeader> {
        if bytes.len() < 4 || !Self::has_sync(bytes) {
            return None;
        }

        let version = match (bytes[1] >> 3) & 0x03 {
            0b00 => MpegVersion::Mpeg25,
            0b10 => MpegVersion::Mpeg2,
            0b11 => MpegVersion::Mpeg1,
            _ => return None,
        };

        let layer = match (bytes[1] >> 1) & 0x03 {
            0b01 => MpegLayer::LayerIII,
            0b10 => MpegLayer::LayerII,
            0b11 => MpegLayer::LayerI,
            _ => return None,
        };

        let bitrate_index = (bytes[2] >> 4) & 0x0F;
        if bitrate_index == 0 || bitrate_index == 0x0F {
            return None;
        }

        let sample_rate_index = (bytes[2] >> 2) & 0x03;
        if sample_rate_index == 0x03 {
            return None;
        }

        let bitrate_row = match (version, layer) {
            (MpegVersion::Mpeg1, MpegLayer::LayerI) => 0,
            (MpegVersion::Mpeg1, MpegLayer::LayerII) => 1,
            (MpegVersion::Mpeg1, MpegLayer::LayerIII) => 2,
            (_, MpegLayer::LayerI) => 3,
            (_, _) => 4,
        };
        let bitrate_kbps = BITRATE_KBPS[bitrate_row][bitrate_index as usize];

        let rate_row = match version {
            MpegVersion::Mpeg1 => 0,
            MpegVersion::Mpeg2 => 1,
            MpegVersion::Mpeg25 => 2,
        };
        let sample_rate = SAMPLE_RATE_HZ[rate_row][sample_rate_index as usize];

        Some(FrameHeader {
            version,
            layer,
            bitrate_kbps,
            sample_rate,
            padding: (bytes[2] >> 1) & 0x01 == 1,
        })
    }

    /// Total frame length in bytes, header included.
    pub fn frame_len(&self) -> usize {
        let bitrate = self.bitrate_kbps as usize * 1000;
        let sample_rate = self.sample_rate as usize;
        let padding = self.padding as usize;

        match self.layer {
            MpegLayer::LayerI => (12 * bitrate / sample_rate + padding) * 4,
            MpegLayer::LayerII => 144 * bitrate / sample_rate + padding,
            MpegLayer::LayerIII => match self.version {
                MpegVersion::Mpeg1 => 144 * bitrate / sample_rate + padding,
                // Layer III halves samples-per-frame for MPEG2/2.5.
                _ => 72 * bitrate / sample_rate + padding,
            },
        }
    }
}
