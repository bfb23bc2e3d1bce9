//! Voice-activity detection.
//!
//! Classifier probabilities come from an injected [`SpeechClassifier`]; the
//! [`VoiceActivityDetector`] applies hysteresis thresholds and the debounced
//! single-shot silence timer that ends the user's turn.

mod classifier;
mod detector;

pub use classifier::{EnergyClassifier, SpeechClassifier};
pub use detector::{VadConfig, VadEvent, VoiceActivityDetector};
