pub mod capture;
pub mod frame;
pub mod input;
pub mod orchestrator;
pub mod playback;
pub mod session;
pub mod vad;

// Re-export commonly used types for convenience
pub use capture::{AudioCapture, CaptureSource, MediaFrame, MediaStream, PcmFrameRecorder};
pub use frame::FrameExtractor;
pub use input::{InputEvent, InputPipeline};
pub use orchestrator::{ConversationClient, ConversationState, EventSinks, Platform};
pub use playback::{AudioDecoder, MediaClock, PcmBuffer, PlayerEvent, StreamingAudioPlayer};
pub use session::{
    InteractEvent, InteractRequest, RequestBody, ServerEnvelope, SessionTransport, TokenStore,
};
pub use vad::{SpeechClassifier, VadConfig, VadEvent, VoiceActivityDetector};
