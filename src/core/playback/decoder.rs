//! Platform audio decoder capability.

use std::sync::Arc;

/// A decoded PCM buffer ready for scheduling.
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels,
        }
    }

    /// Audible duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

/// Error from the platform decoder.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("undecodable audio data: {0}")]
    Undecodable(String),
}

/// Decodes a blob of whole compressed frames into PCM.
///
/// The bit-level codec work lives behind this trait; the player only needs
/// buffers with a known duration. Implementations are platform-bound (a
/// system codec, an FFI decoder); tests substitute a fabricated one.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, frames: &[u8]) -> Result<PcmBuffer, DecodeError>;
}
