//! Microphone stream acquisition capability.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::RecordingConfig;
use crate::errors::ClientResult;

/// One unit of captured audio delivered by the platform.
#[derive(Debug, Clone)]
pub enum MediaFrame {
    /// Raw PCM samples in `[-1, 1]` from a real-time processing node.
    Samples(Arc<[f32]>),
    /// A compressed chunk from a time-sliced platform recorder.
    Encoded(Bytes),
}

/// Constraint flags requested when acquiring the microphone.
#[derive(Debug, Clone, Copy)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub sample_rate: u32,
    pub channels: u16,
}

impl From<&RecordingConfig> for CaptureConstraints {
    fn from(recording: &RecordingConfig) -> Self {
        Self {
            echo_cancellation: recording.echo_cancellation,
            noise_suppression: recording.noise_suppression,
            auto_gain_control: recording.auto_gain_control,
            sample_rate: recording.sample_rate,
            channels: recording.channels,
        }
    }
}

/// A live microphone stream: a channel of frames plus the handle that
/// releases the underlying tracks.
pub struct MediaStream {
    frames: Option<mpsc::UnboundedReceiver<MediaFrame>>,
    stopper: Option<Box<dyn FnOnce() + Send>>,
}

impl MediaStream {
    pub fn new(frames: mpsc::UnboundedReceiver<MediaFrame>) -> Self {
        Self {
            frames: Some(frames),
            stopper: None,
        }
    }

    /// Attach a closure invoked when the stream's tracks are stopped.
    pub fn with_stopper(
        frames: mpsc::UnboundedReceiver<MediaFrame>,
        stopper: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            frames: Some(frames),
            stopper: Some(Box::new(stopper)),
        }
    }

    /// Take the frame receiver for pumping. Yields once.
    pub fn take_frames(&mut self) -> Option<mpsc::UnboundedReceiver<MediaFrame>> {
        self.frames.take()
    }

    /// Stop the underlying tracks and release the device.
    pub fn stop_tracks(&mut self) {
        if let Some(stopper) = self.stopper.take() {
            stopper();
        }
        self.frames = None;
    }
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

/// Acquires the microphone. Platform-bound; acquisition failure surfaces
/// as the `mic_denied` error kind.
#[async_trait::async_trait]
pub trait CaptureSource: Send + Sync {
    async fn open(&self, constraints: &CaptureConstraints) -> ClientResult<MediaStream>;
}
