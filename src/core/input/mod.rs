//! User-input pipeline.
//!
//! Owns the recorder/detector pair: starts and stops them together, encodes
//! captured chunks onto the session as `add_audio` requests, forwards
//! voice-activity transitions to the state machine, and turns the debounced
//! silence signal into the one-shot `input_complete` + `check_turn` pair
//! that ends the user's turn.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::prelude::*;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::InputCapabilities;
use crate::core::capture::{AudioCapture, CaptureConstraints, CaptureSource};
use crate::core::session::{AudioConfig, RequestBody, SessionTransport};
use crate::core::vad::{VadConfig, VadEvent, VoiceActivityDetector};
use crate::errors::ClientResult;

/// Events the pipeline forwards to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// The user started speaking.
    UserSpeaking,
    /// The user stopped speaking (turn not necessarily over).
    UserSilence,
    /// The debounced silence elapsed; the turn is over. One-shot.
    InputComplete,
}

/// Wires the voice-activity detector and the recorder to the session.
pub struct InputPipeline {
    inner: Arc<PipelineInner>,
}

impl Clone for InputPipeline {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PipelineInner {
    transport: SessionTransport,
    recorder: Arc<dyn AudioCapture>,
    capture_source: Arc<dyn CaptureSource>,
    constraints: CaptureConstraints,
    detector: Arc<Mutex<VoiceActivityDetector>>,
    events: mpsc::UnboundedSender<InputEvent>,
    running: AtomicBool,
    vad_active: AtomicBool,
    input_complete_sent: AtomicBool,
    capabilities: Mutex<InputCapabilities>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl InputPipeline {
    /// Build the pipeline and the receiver its events arrive on.
    ///
    /// `chunks` is the recorder's `audio-data` output; the pipeline
    /// registers itself as the recorder's frame tap for the detector.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: SessionTransport,
        recorder: Arc<dyn AudioCapture>,
        chunks: mpsc::UnboundedReceiver<bytes::Bytes>,
        capture_source: Arc<dyn CaptureSource>,
        constraints: CaptureConstraints,
        vad_config: VadConfig,
        classifier: Box<dyn crate::core::vad::SpeechClassifier>,
        capabilities: InputCapabilities,
    ) -> (Self, mpsc::UnboundedReceiver<InputEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (detector, vad_events) = VoiceActivityDetector::new(vad_config, classifier);

        let inner = Arc::new(PipelineInner {
            transport,
            recorder,
            capture_source,
            constraints,
            detector: Arc::new(Mutex::new(detector)),
            events,
            running: AtomicBool::new(false),
            vad_active: AtomicBool::new(false),
            input_complete_sent: AtomicBool::new(false),
            capabilities: Mutex::new(capabilities),
            tasks: Mutex::new(Vec::new()),
        });

        inner.spawn_chunk_pump(chunks);
        inner.spawn_frame_pump();
        inner.spawn_vad_pump(vad_events);

        (Self { inner }, events_rx)
    }

    /// Start detector analysis and the recorder together, acquiring the
    /// microphone on first use.
    pub async fn start(&self) -> ClientResult<()> {
        if !self.inner.capabilities.lock().audio {
            debug!("audio input disabled; not starting capture");
            return Ok(());
        }

        if !self.inner.recorder.is_initialized() {
            let stream = self
                .inner
                .capture_source
                .open(&self.inner.constraints)
                .await?;
            self.inner.recorder.initialize(stream);
        }

        self.inner.recorder.start();
        self.inner.vad_active.store(true, Ordering::Release);
        self.inner.running.store(true, Ordering::Release);
        info!("input pipeline started");
        Ok(())
    }

    /// Stop both. Returns whether this call transitioned the pipeline out
    /// of the running state.
    pub fn stop(&self) -> bool {
        let transitioned = self.inner.running.swap(false, Ordering::AcqRel);
        self.inner.vad_active.store(false, Ordering::Release);
        self.inner.recorder.stop();
        if transitioned {
            info!("input pipeline stopped");
        }
        transitioned
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Fire the one-shot `input_complete` + `check_turn` pair now,
    /// without waiting for the silence timer.
    pub fn send_input_complete(&self) {
        self.inner.send_input_complete();
    }

    pub fn is_input_complete_sent(&self) -> bool {
        self.inner.input_complete_sent.load(Ordering::Acquire)
    }

    /// Re-arm the one-shot and the detector for the next turn.
    pub fn reset(&self) {
        self.inner.input_complete_sent.store(false, Ordering::Release);
        self.inner.detector.lock().reset();
    }

    /// Divert captured chunks into the recorder's buffer instead of the
    /// wire.
    pub fn enable_audio_buffering(&self) {
        self.inner.recorder.enable_buffering_mode();
    }

    /// Send everything captured while buffering, oldest first, then return
    /// to live forwarding.
    pub fn flush_buffered_audio(&self) {
        let chunks = self.inner.recorder.buffered_audio();
        if !chunks.is_empty() {
            debug!(chunks = chunks.len(), "flushing buffered audio");
        }
        for chunk in chunks {
            self.inner.send_audio_chunk(&chunk);
        }
        self.inner.recorder.clear_buffer();
        self.inner.recorder.disable_buffering_mode();
    }

    /// Switch input channels. Disabling audio stops the recorder and
    /// releases the device tracks.
    pub fn update_capabilities(&self, capabilities: InputCapabilities) {
        let previous = {
            let mut slot = self.inner.capabilities.lock();
            std::mem::replace(&mut *slot, capabilities)
        };

        if previous.audio && !capabilities.audio {
            self.stop();
            self.inner.recorder.teardown();
            info!("audio input disabled; capture released");
        }
    }

    pub fn capabilities(&self) -> InputCapabilities {
        *self.inner.capabilities.lock()
    }

    /// Kill the pumps and release capture.
    pub fn shutdown(&self) {
        self.stop();
        self.inner.recorder.teardown();
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl PipelineInner {
    /// Captured chunks → base64 → `add_audio`, skipped while stopped.
    fn spawn_chunk_pump(self: &Arc<Self>, mut chunks: mpsc::UnboundedReceiver<bytes::Bytes>) {
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(chunk) = chunks.recv().await {
                if !inner.running.load(Ordering::Acquire) {
                    continue;
                }
                inner.send_audio_chunk(&chunk);
            }
        });
        self.tasks.lock().push(task);
    }

    /// Raw sample frames → detector, while analysis is active.
    fn spawn_frame_pump(self: &Arc<Self>) {
        let (tap_tx, mut tap_rx) = mpsc::unbounded_channel::<Arc<[f32]>>();
        self.recorder.set_frame_tap(tap_tx);

        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(frame) = tap_rx.recv().await {
                if inner.vad_active.load(Ordering::Acquire) {
                    inner.detector.lock().process(&frame);
                }
            }
        });
        self.tasks.lock().push(task);
    }

    /// Detector events → state-machine events and the turn-end one-shot.
    fn spawn_vad_pump(self: &Arc<Self>, mut vad_events: mpsc::UnboundedReceiver<VadEvent>) {
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(event) = vad_events.recv().await {
                match event {
                    VadEvent::VoiceActivity { is_speaking: true } => {
                        let _ = inner.events.send(InputEvent::UserSpeaking);
                    }
                    VadEvent::VoiceActivity { is_speaking: false } => {
                        let _ = inner.events.send(InputEvent::UserSilence);
                    }
                    VadEvent::Silence => inner.send_input_complete(),
                }
            }
        });
        self.tasks.lock().push(task);
    }

    fn send_audio_chunk(&self, chunk: &[u8]) {
        let body = RequestBody::AddAudio {
            audio: BASE64_STANDARD.encode(chunk),
            config: AudioConfig::default(),
        };
        if let Err(e) = self.transport.submit_request(body) {
            warn!("failed to send audio chunk: {e}");
        }
    }

    fn send_input_complete(&self) {
        if self.input_complete_sent.swap(true, Ordering::AcqRel) {
            debug!("input_complete already sent for this turn");
            return;
        }
        info!("input complete; checking turn");
        let _ = self.events.send(InputEvent::InputComplete);
        if let Err(e) = self.transport.submit_request(RequestBody::CheckTurn) {
            warn!("failed to issue check_turn: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordingConfig;
    use crate::core::capture::{MediaFrame, MediaStream, PcmFrameRecorder};
    use crate::core::session::TransportEvent;
    use crate::errors::ClientError;
    use serde_json::Value;

    struct FakeSource {
        frames: Mutex<Option<mpsc::UnboundedReceiver<MediaFrame>>>,
        deny: bool,
    }

    #[async_trait::async_trait]
    impl CaptureSource for FakeSource {
        async fn open(&self, _constraints: &CaptureConstraints) -> ClientResult<MediaStream> {
            if self.deny {
                return Err(ClientError::MicDenied("permission refused".to_string()));
            }
            let frames = self
                .frames
                .lock()
                .take()
                .expect("capture source opened twice");
            Ok(MediaStream::new(frames))
        }
    }

    struct Harness {
        pipeline: InputPipeline,
        events: mpsc::UnboundedReceiver<InputEvent>,
        wire: mpsc::UnboundedReceiver<String>,
        frames: mpsc::UnboundedSender<MediaFrame>,
        _transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    }

    fn harness(silence_timeout_ms: u64) -> Harness {
        let (transport, transport_events) = SessionTransport::new();
        let wire = transport.test_support().install_pipe();

        let (recorder, chunks) = PcmFrameRecorder::new();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        // Classifier scripted through the first sample of each frame.
        let classifier = |frame: &[f32]| frame.first().copied().unwrap_or(0.0);

        let (pipeline, events) = InputPipeline::new(
            transport,
            Arc::new(recorder),
            chunks,
            Arc::new(FakeSource {
                frames: Mutex::new(Some(frames_rx)),
                deny: false,
            }),
            CaptureConstraints::from(&RecordingConfig::default()),
            VadConfig {
                silence_timeout_ms,
                ..Default::default()
            },
            Box::new(classifier),
            InputCapabilities::default(),
        );

        Harness {
            pipeline,
            events,
            wire,
            frames: frames_tx,
            _transport_events: transport_events,
        }
    }

    fn speech_frame() -> MediaFrame {
        MediaFrame::Samples(vec![0.9; 512].into())
    }

    fn silence_frame() -> MediaFrame {
        MediaFrame::Samples(vec![0.1; 512].into())
    }

    fn wire_kind(raw: &str) -> String {
        let value: Value = serde_json::from_str(raw).unwrap();
        value["kind"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_speech_cycle_emits_events_and_check_turn() {
        let mut h = harness(30);
        h.pipeline.start().await.unwrap();

        for _ in 0..3 {
            h.frames.send(speech_frame()).unwrap();
        }
        assert_eq!(h.events.recv().await, Some(InputEvent::UserSpeaking));

        h.frames.send(silence_frame()).unwrap();
        assert_eq!(h.events.recv().await, Some(InputEvent::UserSilence));

        assert_eq!(h.events.recv().await, Some(InputEvent::InputComplete));
        assert!(h.pipeline.is_input_complete_sent());

        let kind = wire_kind(&h.wire.recv().await.unwrap());
        assert_eq!(kind, "check_turn");
    }

    #[tokio::test]
    async fn test_input_complete_is_one_shot() {
        let mut h = harness(300);
        h.pipeline.start().await.unwrap();

        h.pipeline.send_input_complete();
        h.pipeline.send_input_complete();

        assert_eq!(h.events.recv().await, Some(InputEvent::InputComplete));
        assert!(h.events.try_recv().is_err());

        // One check_turn on the wire.
        assert_eq!(wire_kind(&h.wire.recv().await.unwrap()), "check_turn");
        assert!(h.wire.try_recv().is_err());

        // Reset re-arms the one-shot.
        h.pipeline.reset();
        h.pipeline.send_input_complete();
        assert_eq!(h.events.recv().await, Some(InputEvent::InputComplete));
    }

    #[tokio::test]
    async fn test_chunks_sent_as_add_audio() {
        let mut h = harness(300);
        h.pipeline.start().await.unwrap();

        h.frames
            .send(MediaFrame::Samples(vec![0.5; 4096].into()))
            .unwrap();

        let raw = h.wire.recv().await.unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["kind"], "add_audio");
        assert_eq!(value["config"]["sampling_rate"], 48000);
        assert!(!value["audio"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stopped_pipeline_skips_chunks() {
        let mut h = harness(300);
        h.pipeline.start().await.unwrap();
        assert!(h.pipeline.stop());
        assert!(!h.pipeline.stop());

        h.frames
            .send(MediaFrame::Samples(vec![0.5; 4096].into()))
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(h.wire.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_buffered_audio_flushes_in_order() {
        let mut h = harness(300);
        h.pipeline.start().await.unwrap();
        h.pipeline.enable_audio_buffering();

        // Two distinguishable chunks captured while buffering.
        h.frames
            .send(MediaFrame::Samples(vec![0.25; 4096].into()))
            .unwrap();
        h.frames
            .send(MediaFrame::Samples(vec![0.75; 4096].into()))
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(h.wire.try_recv().is_err());

        h.pipeline.flush_buffered_audio();

        let first: Value = serde_json::from_str(&h.wire.recv().await.unwrap()).unwrap();
        let second: Value = serde_json::from_str(&h.wire.recv().await.unwrap()).unwrap();
        assert_eq!(first["kind"], "add_audio");
        assert_eq!(second["kind"], "add_audio");
        let first_audio = BASE64_STANDARD
            .decode(first["audio"].as_str().unwrap())
            .unwrap();
        let second_audio = BASE64_STANDARD
            .decode(second["audio"].as_str().unwrap())
            .unwrap();
        // 0.25 → 8191, 0.75 → 24575: capture order preserved.
        assert_eq!(&first_audio[..2], &8191i16.to_le_bytes());
        assert_eq!(&second_audio[..2], &24575i16.to_le_bytes());

        // Buffering mode is off again; live chunks flow.
        h.frames
            .send(MediaFrame::Samples(vec![0.5; 4096].into()))
            .unwrap();
        assert_eq!(wire_kind(&h.wire.recv().await.unwrap()), "add_audio");
    }

    #[tokio::test]
    async fn test_disable_audio_capability_stops_recorder() {
        let h = harness(300);
        h.pipeline.start().await.unwrap();
        assert!(h.pipeline.is_running());

        h.pipeline.update_capabilities(InputCapabilities {
            audio: false,
            text: true,
        });
        assert!(!h.pipeline.is_running());
        assert_eq!(
            h.pipeline.capabilities().text,
            true,
            "text channel stays on"
        );
    }

    #[tokio::test]
    async fn test_mic_denied_surfaces() {
        let (transport, _events) = SessionTransport::new();
        let (recorder, chunks) = PcmFrameRecorder::new();
        let (pipeline, _rx) = InputPipeline::new(
            transport,
            Arc::new(recorder),
            chunks,
            Arc::new(FakeSource {
                frames: Mutex::new(None),
                deny: true,
            }),
            CaptureConstraints::from(&RecordingConfig::default()),
            VadConfig::default(),
            Box::new(|_: &[f32]| 0.0),
            InputCapabilities::default(),
        );

        match pipeline.start().await {
            Err(ClientError::MicDenied(_)) => {}
            other => panic!("expected MicDenied, got {other:?}"),
        }
    }
}
