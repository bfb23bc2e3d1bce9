//! Shared chunk routing for the recorder implementations.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Routes produced chunks either out as `audio-data` events or into the
/// in-memory buffer, depending on buffering mode.
///
/// Buffering mode toggles only at explicit orchestration points; the buffer
/// drains FIFO exactly once per cycle.
pub(crate) struct ChunkRouter {
    recording: AtomicBool,
    buffering: AtomicBool,
    buffer: Mutex<VecDeque<Bytes>>,
    chunks: mpsc::UnboundedSender<Bytes>,
}

impl ChunkRouter {
    pub(crate) fn new(chunks: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            recording: AtomicBool::new(false),
            buffering: AtomicBool::new(false),
            buffer: Mutex::new(VecDeque::new()),
            chunks,
        }
    }

    /// Route one produced chunk. Leading all-zero bytes are trimmed first;
    /// decoders stumble on a zero run at stream start. Fully zero chunks
    /// are dropped.
    pub(crate) fn dispatch(&self, chunk: Bytes) {
        let trimmed = trim_leading_zeros(chunk);
        if trimmed.is_empty() {
            return;
        }
        if self.buffering.load(Ordering::Acquire) {
            self.buffer.lock().push_back(trimmed);
        } else {
            let _ = self.chunks.send(trimmed);
        }
    }

    pub(crate) fn set_recording(&self, on: bool) -> bool {
        self.recording.swap(on, Ordering::AcqRel) != on
    }

    pub(crate) fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    pub(crate) fn set_buffering(&self, on: bool) {
        self.buffering.store(on, Ordering::Release);
        debug!(buffering = on, "capture buffering mode toggled");
    }

    pub(crate) fn is_buffering(&self) -> bool {
        self.buffering.load(Ordering::Acquire)
    }

    /// Drain the buffer FIFO.
    pub(crate) fn drain_buffer(&self) -> Vec<Bytes> {
        self.buffer.lock().drain(..).collect()
    }

    pub(crate) fn clear_buffer(&self) {
        self.buffer.lock().clear();
    }
}

/// Strip a leading run of zero bytes.
pub(crate) fn trim_leading_zeros(chunk: Bytes) -> Bytes {
    match chunk.iter().position(|&b| b != 0) {
        Some(0) => chunk,
        Some(first) => chunk.slice(first..),
        None => Bytes::new(),
    }
}
