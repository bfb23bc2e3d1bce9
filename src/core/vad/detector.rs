//! Voice-activity detection over classifier probabilities.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::classifier::SpeechClassifier;

/// Detector tuning.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// Debounce after the last speech end before `Silence` fires (ms).
    pub silence_timeout_ms: u64,
    /// Probability at or above which a frame counts as speech.
    pub positive_threshold: f32,
    /// Probability at or below which a frame counts as non-speech.
    pub negative_threshold: f32,
    /// Consecutive speech frames required before speech start is reported.
    pub min_speech_frames: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            silence_timeout_ms: 300,
            positive_threshold: 0.5,
            negative_threshold: 0.35,
            min_speech_frames: 3,
        }
    }
}

/// Events emitted by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Speech started (`is_speaking: true`) or ended (`false`).
    VoiceActivity { is_speaking: bool },
    /// The debounced end-of-turn signal. At most once per turn.
    Silence,
}

/// Hysteresis detector: frames above the positive threshold accumulate
/// toward speech start, frames below the negative threshold end speech,
/// and the band between holds the current decision. A single-shot timer
/// debounces speech end into the `Silence` signal unless speech resumes
/// first.
pub struct VoiceActivityDetector {
    config: VadConfig,
    classifier: Box<dyn SpeechClassifier>,
    events: mpsc::UnboundedSender<VadEvent>,
    speaking: bool,
    tentative_frames: u32,
    silence_fired: Arc<AtomicBool>,
    silence_timer: Option<JoinHandle<()>>,
}

impl VoiceActivityDetector {
    pub fn new(
        config: VadConfig,
        classifier: Box<dyn SpeechClassifier>,
    ) -> (Self, mpsc::UnboundedReceiver<VadEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                classifier,
                events,
                speaking: false,
                tentative_frames: 0,
                silence_fired: Arc::new(AtomicBool::new(false)),
                silence_timer: None,
            },
            events_rx,
        )
    }

    /// Feed one sample frame through the classifier and the hysteresis
    /// state machine.
    pub fn process(&mut self, frame: &[f32]) {
        let probability = self.classifier.probability(frame);

        if probability >= self.config.positive_threshold {
            self.tentative_frames += 1;
            if !self.speaking && self.tentative_frames >= self.config.min_speech_frames {
                self.speaking = true;
                self.cancel_silence_timer();
                debug!(probability, "speech started");
                let _ = self.events.send(VadEvent::VoiceActivity { is_speaking: true });
            }
        } else if probability <= self.config.negative_threshold {
            self.tentative_frames = 0;
            if self.speaking {
                self.speaking = false;
                debug!(probability, "speech ended");
                let _ = self
                    .events
                    .send(VadEvent::VoiceActivity { is_speaking: false });
                self.start_silence_timer();
            }
        }
        // Probabilities inside the hysteresis band hold the current
        // decision.
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Re-arm for a new turn: clears the once-per-turn silence latch and
    /// any pending timer, and resets classifier state.
    pub fn reset(&mut self) {
        self.speaking = false;
        self.tentative_frames = 0;
        self.silence_fired.store(false, Ordering::Release);
        self.cancel_silence_timer();
        self.classifier.reset();
    }

    /// Start the single-shot silence timer. No-op while one is pending.
    fn start_silence_timer(&mut self) {
        if let Some(timer) = &self.silence_timer {
            if !timer.is_finished() {
                return;
            }
        }

        let timeout = Duration::from_millis(self.config.silence_timeout_ms);
        let fired = Arc::clone(&self.silence_fired);
        let events = self.events.clone();
        self.silence_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if !fired.swap(true, Ordering::AcqRel) {
                debug!("silence timeout elapsed");
                let _ = events.send(VadEvent::Silence);
            }
        }));
    }

    fn cancel_silence_timer(&mut self) {
        if let Some(timer) = self.silence_timer.take() {
            timer.abort();
        }
    }
}
