//! Microphone capture.
//!
//! Two recorder implementations share one contract: the preferred
//! [`PcmFrameRecorder`] chunks raw samples from a real-time processing
//! node, the fallback [`TimesliceRecorder`] forwards compressed chunks a
//! platform recorder slices at a fixed interval. Both divert their output
//! into an in-memory FIFO while buffering mode is on, which is how audio
//! spoken during assistant playback survives until the next turn commits.

mod recorder;
mod router;
mod source;
mod timeslice;

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

pub use recorder::{PcmFrameRecorder, CAPTURE_FRAME_SAMPLES};
pub use source::{CaptureConstraints, CaptureSource, MediaFrame, MediaStream};
pub use timeslice::{TimesliceRecorder, DEFAULT_TIMESLICE};

/// Contract shared by the recorder implementations.
///
/// Chunks leave through the receiver returned at construction, except while
/// buffering mode is on, when they accumulate in the internal FIFO until
/// `buffered_audio` drains it.
pub trait AudioCapture: Send + Sync {
    /// Adopt a microphone stream and begin pumping its frames. Frames are
    /// discarded until `start`.
    fn initialize(&self, stream: MediaStream);

    /// Register a tap that receives every raw sample frame, recording or
    /// not. The voice-activity detector listens here.
    fn set_frame_tap(&self, tap: mpsc::UnboundedSender<Arc<[f32]>>);

    fn start(&self);

    /// Stop producing chunks. Returns whether this call transitioned the
    /// recorder out of the recording state.
    fn stop(&self) -> bool;

    fn is_recording(&self) -> bool;

    fn is_initialized(&self) -> bool;

    fn enable_buffering_mode(&self);

    fn disable_buffering_mode(&self);

    fn is_buffering(&self) -> bool;

    /// Drain the buffering-mode FIFO, oldest first.
    fn buffered_audio(&self) -> Vec<Bytes>;

    fn clear_buffer(&self);

    /// Stop recording, kill the pump, and release the device tracks.
    fn teardown(&self);
}
