//! Streaming audio playback.
//!
//! Compressed chunks arrive base64-encoded over the session; this module
//! reassembles them into decodable frames, decodes through the platform
//! [`AudioDecoder`], and schedules the PCM gaplessly against a monotonic
//! [`MediaClock`]. The player emits `Ready`/`Playing`/`AboutToComplete`/
//! `Finished` lifecycle events consumed by the conversation state machine.

mod clock;
mod decoder;
mod player;
mod tracker;

pub use clock::{MediaClock, MonotonicClock};
pub use decoder::{AudioDecoder, DecodeError, PcmBuffer};
pub use player::{PlayerEvent, StreamingAudioPlayer, MIN_DECODE_BATCH, STAGING_FLUSH_DELAY};
pub use tracker::{CompletionTracker, TrackerAction, DEFAULT_LEAD_TIME};
