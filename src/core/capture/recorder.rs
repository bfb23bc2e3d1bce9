//! Preferred recorder: fixed-size raw PCM frames from a real-time
//! processing node.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::router::ChunkRouter;
use super::source::{MediaFrame, MediaStream};
use super::AudioCapture;

/// Samples per emitted chunk.
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;

/// Consumes raw sample frames and posts fixed 4096-sample chunks of 16-bit
/// little-endian PCM. All-zero frames are dropped before they reach the
/// router.
pub struct PcmFrameRecorder {
    router: Arc<ChunkRouter>,
    pending: Arc<Mutex<Vec<i16>>>,
    stream: Mutex<Option<MediaStream>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    frame_tap: Arc<Mutex<Option<mpsc::UnboundedSender<Arc<[f32]>>>>>,
}

impl PcmFrameRecorder {
    /// Create a recorder and the receiver its `audio-data` chunks arrive
    /// on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (chunks_tx, chunks_rx) = mpsc::unbounded_channel();
        (
            Self {
                router: Arc::new(ChunkRouter::new(chunks_tx)),
                pending: Arc::new(Mutex::new(Vec::with_capacity(CAPTURE_FRAME_SAMPLES))),
                stream: Mutex::new(None),
                pump: Mutex::new(None),
                frame_tap: Arc::new(Mutex::new(None)),
            },
            chunks_rx,
        )
    }

    fn ingest_samples(router: &ChunkRouter, pending: &Mutex<Vec<i16>>, samples: &[f32]) {
        let mut pending = pending.lock();
        pending.extend(
            samples
                .iter()
                .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16),
        );

        while pending.len() >= CAPTURE_FRAME_SAMPLES {
            let frame: Vec<i16> = pending.drain(..CAPTURE_FRAME_SAMPLES).collect();
            if frame.iter().all(|&s| s == 0) {
                continue;
            }
            let mut bytes = Vec::with_capacity(CAPTURE_FRAME_SAMPLES * 2);
            for sample in frame {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
            router.dispatch(Bytes::from(bytes));
        }
    }
}

impl AudioCapture for PcmFrameRecorder {
    fn initialize(&self, mut stream: MediaStream) {
        let Some(mut frames) = stream.take_frames() else {
            return;
        };
        *self.stream.lock() = Some(stream);

        let router = Arc::clone(&self.router);
        let pending = Arc::clone(&self.pending);
        let tap = Arc::clone(&self.frame_tap);
        let pump = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                match frame {
                    MediaFrame::Samples(samples) => {
                        if let Some(tap) = tap.lock().as_ref() {
                            let _ = tap.send(Arc::clone(&samples));
                        }
                        if router.is_recording() {
                            Self::ingest_samples(&router, &pending, &samples);
                        }
                    }
                    MediaFrame::Encoded(chunk) => {
                        if router.is_recording() {
                            router.dispatch(chunk);
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
        let transitioned = self.router.set_recording(false);
        self.pending.lock().clear();
        transitioned
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
    use tokio::time::{sleep, Duration};

    fn stream_pair() -> (mpsc::UnboundedSender<MediaFrame>, MediaStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, MediaStream::new(rx))
    }

    fn samples(value: f32, count: usize) -> MediaFrame {
        MediaFrame::Samples(vec![value; count].into())
    }

    #[tokio::test]
    async fn test_emits_fixed_size_chunks() {
        let (recorder, mut chunks) = PcmFrameRecorder::new();
        let (tx, stream) = stream_pair();
        recorder.initialize(stream);
        recorder.start();

        // Two half-frames fill exactly one 4096-sample chunk.
        tx.send(samples(0.5, 2048)).unwrap();
        tx.send(samples(0.5, 2048)).unwrap();

        let chunk = chunks.recv().await.unwrap();
        assert_eq!(chunk.len(), CAPTURE_FRAME_SAMPLES * 2);
        // 0.5 * 32767 = 16383, little-endian.
        assert_eq!(&chunk[..2], &16383i16.to_le_bytes());
    }

    #[tokio::test]
    async fn test_clamps_out_of_range_samples() {
        let (recorder, mut chunks) = PcmFrameRecorder::new();
        let (tx, stream) = stream_pair();
        recorder.initialize(stream);
        recorder.start();

        tx.send(samples(2.0, CAPTURE_FRAME_SAMPLES)).unwrap();
        let chunk = chunks.recv().await.unwrap();
        assert_eq!(&chunk[..2], &32767i16.to_le_bytes());
    }

    #[tokio::test]
    async fn test_all_zero_frames_dropped() {
        let (recorder, mut chunks) = PcmFrameRecorder::new();
        let (tx, stream) = stream_pair();
        recorder.initialize(stream);
        recorder.start();

        tx.send(samples(0.0, CAPTURE_FRAME_SAMPLES)).unwrap();
        tx.send(samples(0.25, CAPTURE_FRAME_SAMPLES)).unwrap();

        // Only the non-silent frame arrives.
        let chunk = chunks.recv().await.unwrap();
        assert_eq!(&chunk[..2], &8191i16.to_le_bytes());
        assert!(chunks.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_not_recording_discards_input() {
        let (recorder, mut chunks) = PcmFrameRecorder::new();
        let (tx, stream) = stream_pair();
        recorder.initialize(stream);

        tx.send(samples(0.5, CAPTURE_FRAME_SAMPLES)).unwrap();
        sleep(Duration::from_millis(50)).await;
        assert!(chunks.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_buffering_mode_diverts_chunks() {
        let (recorder, mut chunks) = PcmFrameRecorder::new();
        let (tx, stream) = stream_pair();
        recorder.initialize(stream);
        recorder.start();
        recorder.enable_buffering_mode();

        tx.send(samples(0.5, CAPTURE_FRAME_SAMPLES)).unwrap();
        tx.send(samples(0.5, CAPTURE_FRAME_SAMPLES)).unwrap();
        sleep(Duration::from_millis(50)).await;

        assert!(chunks.try_recv().is_err());
        let buffered = recorder.buffered_audio();
        assert_eq!(buffered.len(), 2);

        recorder.disable_buffering_mode();
        tx.send(samples(0.5, CAPTURE_FRAME_SAMPLES)).unwrap();
        assert!(chunks.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_frame_tap_receives_raw_samples() {
        let (recorder, _chunks) = PcmFrameRecorder::new();
        let (tap_tx, mut tap_rx) = mpsc::unbounded_channel();
        recorder.set_frame_tap(tap_tx);

        let (tx, stream) = stream_pair();
        recorder.initialize(stream);
        // The tap sees frames even while not recording (the detector keeps
        // listening during buffering-mode arming).
        tx.send(samples(0.1, 512)).unwrap();
        let frame = tap_rx.recv().await.unwrap();
        assert_eq!(frame.len(), 512);
    }

    #[tokio::test]
    async fn test_stop_reports_transition() {
        let (recorder, _chunks) = PcmFrameRecorder::new();
        recorder.start();
        assert!(recorder.stop());
        assert!(!recorder.stop());
    }
}
