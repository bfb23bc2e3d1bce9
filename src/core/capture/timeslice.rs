//! Fallback recorder: time-sliced compressed chunks.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::router::ChunkRouter;
use super::source::{MediaFrame, MediaStream};
use super::AudioCapture;

/// Interval at which the platform recorder slices its output.
pub const DEFAULT_TIMESLICE: Duration = Duration::from_millis(100);

/// Forwards compressed chunks produced by a time-sliced platform recorder.
///
/// Used where no real-time processing node is available; the platform
/// encoder already frames its output at roughly [`DEFAULT_TIMESLICE`]
/// intervals, so this recorder only routes.
pub struct TimesliceRecorder {
    timeslice: Duration,
    router: Arc<ChunkRouter>,
    stream: Mutex<Option<MediaStream>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    frame_tap: Arc<Mutex<Option<mpsc::UnboundedSender<Arc<[f32]>>>>>,
}

impl TimesliceRecorder {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        Self::with_timeslice(DEFAULT_TIMESLICE)
    }

    pub fn with_timeslice(timeslice: Duration) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (chunks_tx, chunks_rx) = mpsc::unbounded_channel();
        (
            Self {
                timeslice,
                router: Arc::new(ChunkRouter::new(chunks_tx)),
                stream: Mutex::new(None),
                pump: Mutex::new(None),
                frame_tap: Arc::new(Mutex::new(None)),
            },
            chunks_rx,
        )
    }

    /// The slicing interval requested from the platform recorder.
    pub fn timeslice(&self) -> Duration {
        self.timeslice
    }
}

impl AudioCapture for TimesliceRecorder {
    fn initialize(&self, mut stream: MediaStream) {
        let Some(mut frames) = stream.take_frames() else {
            return;
        };
        *self.stream.lock() = Some(stream);

        let router = Arc::clone(&self.router);
        let tap = Arc::clone(&self.frame_tap);
        let pump = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                match frame {
                    MediaFrame::Encoded(chunk) => {
                        if router.is_recording() {
                            router.dispatch(chunk);
                        }
                    }
                    MediaFrame::Samples(samples) => {
                        if let Some(tap) = tap.lock().as_ref() {
                            let _ = tap.send(samples);
                        }
                    }
                }
            }
            debug!("capture stream ended");
        });
        *self.pump.lock() = Some(pump);
    }

    fn set_frame_tap(&self, tap: mpsc::UnboundedSender<Arc<[f32]>>) {
        *self.frame_tap.lock() = Some(tap);
    }

    fn start(&self) {
        self.router.set_recording(true);
    }

    fn stop(&self) -> bool {
        self.router.set_recording(false)
    }

    fn is_recording(&self) -> bool {
        self.router.is_recording()
    }

    fn is_initialized(&self) -> bool {
        self.stream.lock().is_some()
    }

    fn enable_buffering_mode(&self) {
        self.router.set_buffering(true);
    }

    fn disable_buffering_mode(&self) {
        self.router.set_buffering(false);
    }

    fn is_buffering(&self) -> bool {
        self.router.is_buffering()
    }

    fn buffered_audio(&self) -> Vec<Bytes> {
        self.router.drain_buffer()
    }

    fn clear_buffer(&self) {
        self.router.clear_buffer();
    }

    fn teardown(&self) {
        self.stop();
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        if let Some(mut stream) = self.stream.lock().take() {
            stream.stop_tracks();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forwards_encoded_chunks_in_order() {
        let (recorder, mut chunks) = TimesliceRecorder::new();
        let (tx, rx) = mpsc::unbounded_channel();
        recorder.initialize(MediaStream::new(rx));
        recorder.start();

        tx.send(MediaFrame::Encoded(Bytes::from_static(&[1, 2])))
            .unwrap();
        tx.send(MediaFrame::Encoded(Bytes::from_static(&[3, 4])))
            .unwrap();

        assert_eq!(chunks.recv().await.unwrap(), Bytes::from_static(&[1, 2]));
        assert_eq!(chunks.recv().await.unwrap(), Bytes::from_static(&[3, 4]));
    }

    #[tokio::test]
    async fn test_buffering_mode() {
        let (recorder, mut chunks) = TimesliceRecorder::new();
        let (tx, rx) = mpsc::unbounded_channel();
        recorder.initialize(MediaStream::new(rx));
        recorder.start();
        recorder.enable_buffering_mode();

        tx.send(MediaFrame::Encoded(Bytes::from_static(&[9])))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(chunks.try_recv().is_err());
        assert_eq!(recorder.buffered_audio().len(), 1);
    }

    #[test]
    fn test_default_timeslice() {
        let (recorder, _chunks) = TimesliceRecorder::new();
        assert_eq!(recorder.timeslice(), Duration::from_millis(100));
    }
}
