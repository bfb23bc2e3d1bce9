//! Streaming audio player with gapless scheduling and early completion
//! signalling.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use base64::prelude::*;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::frame::FrameExtractor;

use super::clock::MediaClock;
use super::decoder::{AudioDecoder, PcmBuffer};
use super::tracker::{CompletionTracker, TrackerAction};

/// Staged chunks are decoded together once this many have accumulated.
/// Single frames decode poorly at stream start; batching smooths that out.
pub const MIN_DECODE_BATCH: usize = 2;

/// A partially filled staging batch is force-decoded after this long.
pub const STAGING_FLUSH_DELAY: Duration = Duration::from_millis(450);

/// Slack when comparing media times, in seconds.
const END_EPSILON: f64 = 0.005;

/// Playback lifecycle events, emitted in this order within one cycle.
/// `Finished` fires at most once per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// First decoded buffer is queued while not yet playing.
    Ready,
    /// Playback started.
    Playing,
    /// Roughly one second of audio remains.
    AboutToComplete,
    /// The stream was marked complete and every scheduled buffer ended.
    Finished,
    /// The stream was marked complete but no playable buffer was ever
    /// established. At most once per cycle; `Finished` does not follow.
    DecodeFailed,
}

/// Accepts base64-encoded compressed chunks, reassembles decodable frames,
/// decodes them, and schedules the PCM back-to-back on the media clock.
pub struct StreamingAudioPlayer {
    shared: Arc<Shared>,
}

struct Shared {
    clock: Arc<dyn MediaClock>,
    decoder: Arc<dyn AudioDecoder>,
    events: mpsc::UnboundedSender<PlayerEvent>,
    state: Mutex<PlayerState>,
}

struct PlayerState {
    staging: Vec<Bytes>,
    extractor: FrameExtractor,
    queue: VecDeque<PcmBuffer>,
    playing: bool,
    paused: bool,
    scheduling: bool,
    has_scheduled: bool,
    scheduled_play_time: f64,
    complete_marked: bool,
    all_played: bool,
    received_audio: bool,
    ready_emitted: bool,
    playing_emitted: bool,
    finished_emitted: bool,
    failure_emitted: bool,
    generation: u64,
    flush_timer: Option<JoinHandle<()>>,
    end_timer: Option<JoinHandle<()>>,
    tracker: CompletionTracker,
}

impl PlayerState {
    fn new() -> Self {
        Self {
            staging: Vec::new(),
            extractor: FrameExtractor::new(),
            queue: VecDeque::new(),
            playing: false,
            paused: false,
            scheduling: false,
            has_scheduled: false,
            scheduled_play_time: 0.0,
            complete_marked: false,
            all_played: false,
            received_audio: false,
            ready_emitted: false,
            playing_emitted: false,
            finished_emitted: false,
            failure_emitted: false,
            generation: 0,
            flush_timer: None,
            end_timer: None,
            tracker: CompletionTracker::default(),
        }
    }

    /// Undispensed queue time plus the still-audible scheduled time.
    fn remaining_secs(&self, now: f64) -> f64 {
        let scheduled = (self.scheduled_play_time - now).max(0.0);
        let queued: f64 = self.queue.iter().map(PcmBuffer::duration).sum();
        scheduled + queued
    }
}

impl StreamingAudioPlayer {
    /// Create a player and the receiver its lifecycle events arrive on.
    pub fn new(
        clock: Arc<dyn MediaClock>,
        decoder: Arc<dyn AudioDecoder>,
    ) -> (Self, mpsc::UnboundedReceiver<PlayerEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            clock,
            decoder,
            events,
            state: Mutex::new(PlayerState::new()),
        });
        (Self { shared }, events_rx)
    }

    /// Stage one base64-encoded compressed chunk.
    ///
    /// Chunks are batch-decoded once [`MIN_DECODE_BATCH`] have accumulated
    /// or the idle flush timer fires, whichever comes first.
    pub fn enqueue(&self, base64_chunk: &str) {
        self.shared.state.lock().received_audio = true;

        let bytes = match BASE64_STANDARD.decode(base64_chunk) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!("dropping audio chunk with invalid base64: {e}");
                return;
            }
        };

        let mut state = self.shared.state.lock();
        state.staging.push(bytes);

        if state.staging.len() >= MIN_DECODE_BATCH {
            Shared::flush_staging_locked(&self.shared, &mut state);
        } else if state.flush_timer.is_none() {
            let shared = Arc::clone(&self.shared);
            let generation = state.generation;
            state.flush_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(STAGING_FLUSH_DELAY).await;
                shared.flush_idle(generation);
            }));
        }
    }

    /// Start (or continue) playback of everything queued.
    pub fn play(&self) {
        let mut state = self.shared.state.lock();
        state.playing = true;
        state.paused = false;
        if !state.has_scheduled {
            state.scheduled_play_time = self.shared.clock.now();
        }
        Shared::schedule_pending_locked(&self.shared, &mut state);
    }

    /// Record that no more audio will arrive for this cycle.
    pub fn mark_complete(&self) {
        let mut state = self.shared.state.lock();
        Shared::flush_staging_locked(&self.shared, &mut state);
        state.complete_marked = true;
        Shared::evaluate_tracker_locked(&self.shared, &mut state);

        // Race: the last scheduled buffer may have ended before the
        // complete mark arrived.
        if state.all_played {
            Shared::emit_finished_locked(&self.shared, &mut state);
        }
        Shared::check_unplayable_locked(&self.shared, &mut state);
    }

    /// Suspend playback.
    pub fn pause(&self) {
        let mut state = self.shared.state.lock();
        if !state.playing || state.paused {
            return;
        }
        state.paused = true;
        self.shared.clock.suspend();
        debug!("playback paused");
    }

    /// Resume suspended playback.
    pub fn resume(&self) {
        let mut state = self.shared.state.lock();
        if !state.paused {
            return;
        }
        state.paused = false;
        self.shared.clock.resume();
        if state.playing && state.has_scheduled {
            Shared::arm_end_timer_locked(&self.shared, &mut state);
        }
        debug!("playback resumed");
    }

    /// Stop playback and discard all cycle state.
    pub fn stop(&self) {
        self.reset();
    }

    /// Reset for a new playback cycle: clear queues, cancel timers and
    /// scheduled audio, clear every latch including the early-completion
    /// tracker.
    pub fn reset(&self) {
        let mut state = self.shared.state.lock();
        state.generation = state.generation.wrapping_add(1);
        if let Some(timer) = state.flush_timer.take() {
            timer.abort();
        }
        if let Some(timer) = state.end_timer.take() {
            timer.abort();
        }
        state.staging.clear();
        state.extractor.reset();
        state.queue.clear();
        state.playing = false;
        state.paused = false;
        state.scheduling = false;
        state.has_scheduled = false;
        state.scheduled_play_time = 0.0;
        state.complete_marked = false;
        state.all_played = false;
        state.received_audio = false;
        state.ready_emitted = false;
        state.playing_emitted = false;
        state.finished_emitted = false;
        state.failure_emitted = false;
        state.tracker.reset();
        if self.shared.clock.is_suspended() {
            self.shared.clock.resume();
        }
    }

    pub fn is_playing(&self) -> bool {
        let state = self.shared.state.lock();
        state.playing && !state.finished_emitted
    }

    /// Remaining audible time in seconds.
    pub fn remaining_secs(&self) -> f64 {
        let state = self.shared.state.lock();
        state.remaining_secs(self.shared.clock.now())
    }
}

impl Shared {
    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    /// Idle flush timer callback.
    fn flush_idle(self: &Arc<Self>, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        state.flush_timer = None;
        Self::flush_staging_locked(self, &mut state);
    }

    /// Decode the staging batch: reassemble frames, decode as one blob,
    /// queue the PCM. Malformed batches are dropped; frames occasionally
    /// arrive damaged and the stream recovers on the next batch.
    fn flush_staging_locked(shared: &Arc<Self>, state: &mut PlayerState) {
        if let Some(timer) = state.flush_timer.take() {
            timer.abort();
        }
        if state.staging.is_empty() {
            return;
        }

        let staged: Vec<Bytes> = state.staging.drain(..).collect();
        let mut frames = Vec::new();
        for chunk in &staged {
            frames.extend(state.extractor.feed(chunk));
        }
        if frames.is_empty() {
            return;
        }

        let blob: Vec<u8> = frames.iter().flat_map(|f| f.iter().copied()).collect();
        match shared.decoder.decode(&blob) {
            Ok(buffer) => {
                debug!(
                    duration = buffer.duration(),
                    queued = state.queue.len() + 1,
                    "decoded audio batch"
                );
                state.queue.push_back(buffer);
                if !state.playing && !state.ready_emitted {
                    state.ready_emitted = true;
                    shared.emit(PlayerEvent::Ready);
                }
                if state.playing && !state.paused {
                    Self::schedule_pending_locked(shared, state);
                }
                if state.complete_marked {
                    Self::evaluate_tracker_locked(shared, state);
                }
            }
            Err(e) => {
                // Transient: frames occasionally arrive damaged and the
                // next batch usually recovers. It stops being transient
                // once the stream is complete and nothing ever played.
                warn!("dropping undecodable audio batch ({} bytes): {e}", blob.len());
                Self::check_unplayable_locked(shared, state);
            }
        }
    }

    /// The stream is complete, audio arrived, and not one buffer became
    /// playable: the cycle cannot end through `Finished`, so report the
    /// failure instead. Latched once per cycle.
    fn check_unplayable_locked(shared: &Arc<Self>, state: &mut PlayerState) {
        if state.failure_emitted
            || !state.complete_marked
            || !state.received_audio
            || state.ready_emitted
            || state.has_scheduled
            || !state.queue.is_empty()
        {
            return;
        }
        state.failure_emitted = true;
        warn!("playback cycle produced no playable buffers");
        shared.emit(PlayerEvent::DecodeFailed);
    }

    /// Schedule every queued buffer back-to-back from the play cursor.
    /// Guarded against re-entrant passes from enqueues racing the end hook.
    fn schedule_pending_locked(shared: &Arc<Self>, state: &mut PlayerState) {
        if state.scheduling {
            return;
        }
        state.scheduling = true;

        let now = shared.clock.now();
        if state.scheduled_play_time < now {
            // The clock slipped past the cursor during an underrun.
            state.scheduled_play_time = now;
        }

        let mut scheduled_any = false;
        while let Some(buffer) = state.queue.pop_front() {
            state.scheduled_play_time += buffer.duration();
            state.has_scheduled = true;
            state.all_played = false;
            scheduled_any = true;
        }

        if scheduled_any {
            if !state.playing_emitted {
                state.playing_emitted = true;
                shared.emit(PlayerEvent::Playing);
            }
            Self::arm_end_timer_locked(shared, state);
        }
        state.scheduling = false;
    }

    /// Arm the end hook for the last-scheduled buffer.
    fn arm_end_timer_locked(shared: &Arc<Self>, state: &mut PlayerState) {
        if let Some(timer) = state.end_timer.take() {
            timer.abort();
        }
        let remaining = (state.scheduled_play_time - shared.clock.now()).max(0.0);
        let generation = state.generation;
        let shared = Arc::clone(shared);
        state.end_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(remaining)).await;
            shared.on_ended(generation);
        }));
    }

    /// End hook for the last scheduled buffer.
    fn on_ended(self: &Arc<Self>, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation || !state.playing {
            return;
        }

        if state.paused {
            // No Finished while suspended; resume re-arms the hook.
            state.end_timer = None;
            return;
        }

        // The media clock may trail wall time (re-scheduling moved the
        // cursor); if audio is still audible, re-arm.
        let remaining = state.scheduled_play_time - self.clock.now();
        if remaining > END_EPSILON {
            Self::arm_end_timer_locked(self, &mut state);
            return;
        }
        state.end_timer = None;

        if !state.queue.is_empty() {
            // More buffers arrived while the previous batch played.
            Self::schedule_pending_locked(self, &mut state);
            return;
        }

        if state.complete_marked {
            Self::emit_finished_locked(self, &mut state);
        } else {
            state.all_played = true;
        }
    }

    fn emit_finished_locked(shared: &Arc<Self>, state: &mut PlayerState) {
        if state.finished_emitted {
            return;
        }
        state.finished_emitted = true;
        state.playing = false;
        debug!("playback cycle finished");
        shared.emit(PlayerEvent::Finished);
    }

    /// Re-evaluate the early-completion signal. Trigger points: the
    /// complete mark, and any enqueue after it.
    fn evaluate_tracker_locked(shared: &Arc<Self>, state: &mut PlayerState) {
        if state.finished_emitted {
            return;
        }
        let remaining = state.remaining_secs(shared.clock.now());
        match state.tracker.evaluate(remaining) {
            TrackerAction::EmitNow => shared.emit(PlayerEvent::AboutToComplete),
            TrackerAction::ArmTimer(delay) => {
                let generation = state.generation;
                let shared = Arc::clone(shared);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                    shared.tracker_fire(generation);
                });
            }
            TrackerAction::Nothing => {}
        }
    }

    /// Armed early-completion timer callback.
    fn tracker_fire(self: &Arc<Self>, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        // Suppressed when the cycle already finished: the threshold timer
        // was set but the last buffer ended early.
        if state.finished_emitted {
            return;
        }
        if state.tracker.fire() {
            self.emit(PlayerEvent::AboutToComplete);
        }
    }
}
