//! The conversation state machine.
//!
//! One event-loop task owns the state and every component handle; public
//! API calls and component events reach it over channels, so transitions
//! are serialized by construction. The cyclic callback graph of the
//! subsystems is flattened here: the machine is the only place that sees
//! transport, player, and input pipeline together.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ClientConfig, InputCapabilities};
use crate::core::capture::{AudioCapture, CaptureConstraints, CaptureSource, PcmFrameRecorder};
use crate::core::input::{InputEvent, InputPipeline};
use crate::core::playback::{
    AudioDecoder, MediaClock, MonotonicClock, PlayerEvent, StreamingAudioPlayer,
};
use crate::core::session::{
    InteractEvent, InteractRequest, MemoryTokenStore, RequestBody, ServerEnvelope, SessionConfig,
    SessionTransport, TokenStore, TransportError, TransportEvent,
};
use crate::core::vad::{EnergyClassifier, SpeechClassifier, VadConfig};
use crate::errors::{ClientError, ClientResult};
use uuid::Uuid;

use super::callbacks::{ClientErrorEvent, EventSinks, SubtitleHighlight};
use super::state::ConversationState;

/// Platform-bound collaborators, injected at construction.
///
/// Tests (and unusual hosts) substitute any of them; the defaults cover a
/// standard deployment except for capture and decode, which only the host
/// can provide.
pub struct Platform {
    pub capture_source: Arc<dyn CaptureSource>,
    pub decoder: Arc<dyn AudioDecoder>,
    pub classifier: Box<dyn SpeechClassifier>,
    pub clock: Arc<dyn MediaClock>,
    pub token_store: Arc<dyn TokenStore>,
    pub vad: VadConfig,
    /// Recorder override; `None` selects the PCM frame recorder.
    pub recorder: Option<(Arc<dyn AudioCapture>, mpsc::UnboundedReceiver<Bytes>)>,
}

impl Platform {
    pub fn new(capture_source: Arc<dyn CaptureSource>, decoder: Arc<dyn AudioDecoder>) -> Self {
        Self {
            capture_source,
            decoder,
            classifier: Box::new(EnergyClassifier::default()),
            clock: Arc::new(MonotonicClock::new()),
            token_store: Arc::new(MemoryTokenStore::new()),
            vad: VadConfig::default(),
            recorder: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn SpeechClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn MediaClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_token_store(mut self, token_store: Arc<dyn TokenStore>) -> Self {
        self.token_store = token_store;
        self
    }

    pub fn with_vad(mut self, vad: VadConfig) -> Self {
        self.vad = vad;
        self
    }

    pub fn with_recorder(
        mut self,
        recorder: Arc<dyn AudioCapture>,
        chunks: mpsc::UnboundedReceiver<Bytes>,
    ) -> Self {
        self.recorder = Some((recorder, chunks));
        self
    }
}

enum Command {
    Initialize(oneshot::Sender<ClientResult<()>>),
    StartListening,
    StopListening,
    Interact(InteractRequest),
    Interrupt,
    Pause,
    Resume,
    ForceInputComplete,
    Stop,
    ToggleTextOnlyInput(bool),
    Submit(RequestBody),
}

/// Public handle to the conversation runtime.
///
/// Construction wires the components and spawns the orchestrator task;
/// methods enqueue work for it. Dropping the handle tears the session
/// down.
pub struct ConversationClient {
    commands: mpsc::UnboundedSender<Command>,
    state: Arc<RwLock<ConversationState>>,
    machine: JoinHandle<()>,
}

impl ConversationClient {
    pub fn new(config: ClientConfig, platform: Platform, sinks: EventSinks) -> ClientResult<Self> {
        config.validate()?;

        let (transport, transport_events) = SessionTransport::with_timeout(config.request_timeout);
        let (player, player_events) =
            StreamingAudioPlayer::new(Arc::clone(&platform.clock), Arc::clone(&platform.decoder));

        let (recorder, chunks) = match platform.recorder {
            Some((recorder, chunks)) => (recorder, chunks),
            None => {
                let (recorder, chunks) = PcmFrameRecorder::new();
                (Arc::new(recorder) as Arc<dyn AudioCapture>, chunks)
            }
        };

        let (input, input_events) = InputPipeline::new(
            transport.clone(),
            recorder,
            chunks,
            platform.capture_source,
            CaptureConstraints::from(&config.recording),
            platform.vad,
            platform.classifier,
            config.input_capabilities,
        );

        let state = Arc::new(RwLock::new(ConversationState::Uninitialized));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let machine = Machine {
            config,
            sinks,
            transport,
            player,
            input,
            token_store: platform.token_store,
            state: Arc::clone(&state),
            active_interaction: None,
            deferred_complete: false,
            handling_complete: false,
        };
        let task = tokio::spawn(machine.run(
            commands_rx,
            transport_events,
            player_events,
            input_events,
        ));

        Ok(Self {
            commands: commands_tx,
            state,
            machine: task,
        })
    }

    /// Connect and run the handshake. Resolves once the session reaches
    /// `waiting` (or fails into `error`).
    pub async fn initialize(&self) -> ClientResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Initialize(reply_tx))
            .map_err(|_| ClientError::InvalidState("conversation task is gone".to_string()))?;
        reply_rx
            .await
            .map_err(|_| ClientError::InvalidState("conversation task is gone".to_string()))?
    }

    pub fn start_listening(&self) {
        let _ = self.commands.send(Command::StartListening);
    }

    pub fn stop_listening(&self) {
        let _ = self.commands.send(Command::StopListening);
    }

    /// Host-initiated turn, usually text in text-only mode.
    pub fn interact(&self, request: InteractRequest) {
        let _ = self.commands.send(Command::Interact(request));
    }

    pub fn interrupt(&self) {
        let _ = self.commands.send(Command::Interrupt);
    }

    pub fn pause(&self) {
        let _ = self.commands.send(Command::Pause);
    }

    pub fn resume(&self) {
        let _ = self.commands.send(Command::Resume);
    }

    /// End the user's turn now instead of waiting for the silence timer
    /// (push-to-talk release).
    pub fn force_input_complete(&self) {
        let _ = self.commands.send(Command::ForceInputComplete);
    }

    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    pub fn toggle_text_only_input(&self, text_only: bool) {
        let _ = self.commands.send(Command::ToggleTextOnlyInput(text_only));
    }

    /// Submit an arbitrary request on the session. Replies route through
    /// the normal message path; errors surface through the error sink.
    pub fn submit(&self, body: RequestBody) {
        let _ = self.commands.send(Command::Submit(body));
    }

    pub fn add_keywords(&self, keywords: Vec<String>) {
        self.submit(RequestBody::AddKeywords { keywords });
    }

    pub fn remove_keywords(&self) {
        self.submit(RequestBody::RemoveKeywords);
    }

    pub fn detect_keywords(&self) {
        self.submit(RequestBody::DetectKeywords);
    }

    /// Enroll a reference voice. `audio` is base64 of codec bytes, like
    /// every audio payload on the wire.
    pub fn add_speaker(&self, speaker: String, audio: String) {
        self.submit(RequestBody::AddSpeaker { speaker, audio });
    }

    pub fn remove_speakers(&self) {
        self.submit(RequestBody::RemoveSpeakers);
    }

    pub fn detect_speakers(&self) {
        self.submit(RequestBody::DetectSpeakers);
    }

    pub fn ping(&self) {
        self.submit(RequestBody::Ping);
    }

    pub fn state(&self) -> ConversationState {
        *self.state.read()
    }
}

impl Drop for ConversationClient {
    fn drop(&mut self) {
        self.machine.abort();
    }
}

struct Machine {
    config: ClientConfig,
    sinks: EventSinks,
    transport: SessionTransport,
    player: StreamingAudioPlayer,
    input: InputPipeline,
    token_store: Arc<dyn TokenStore>,
    state: Arc<RwLock<ConversationState>>,
    active_interaction: Option<Uuid>,
    deferred_complete: bool,
    handling_complete: bool,
}

impl Machine {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        mut player_events: mpsc::UnboundedReceiver<PlayerEvent>,
        mut input_events: mpsc::UnboundedReceiver<InputEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = transport_events.recv() => self.handle_transport_event(event).await,
                Some(event) = player_events.recv() => self.handle_player_event(event).await,
                Some(event) = input_events.recv() => self.handle_input_event(event).await,
                else => break,
            }
        }
        self.input.shutdown();
        self.player.stop();
        self.transport.disconnect();
        debug!("conversation task exited");
    }

    fn current(&self) -> ConversationState {
        *self.state.read()
    }

    /// The single transition point: equality-guarded, observer-notified,
    /// hook-awaited before the next event is processed.
    async fn set_state(&self, new: ConversationState) {
        let old = self.current();
        if old == new {
            return;
        }
        *self.state.write() = new;
        info!(%old, %new, "conversation state changed");
        if let Some(callback) = &self.sinks.on_state_change {
            callback(old, new).await;
        }
    }

    fn refuse(&self, event: &str) {
        warn!(state = %self.current(), event, "transition refused");
    }

    /// Fatal failure: enter `error` and tell the host.
    async fn fail(&self, error: ClientError) {
        error!("conversation error: {error}");
        let kind = error.kind();
        self.set_state(ConversationState::Error).await;
        if let Some(callback) = &self.sinks.on_error {
            callback(ClientErrorEvent {
                kind,
                message: error.to_string(),
            })
            .await;
        }
    }

    /// Non-fatal error: tell the host, stay put.
    async fn surface(&self, error: ClientError) {
        warn!("conversation stream error: {error}");
        if let Some(callback) = &self.sinks.on_error {
            callback(ClientErrorEvent {
                kind: error.kind(),
                message: error.to_string(),
            })
            .await;
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Initialize(reply) => {
                // Legal from scratch and as the recovery path after
                // `stop()` or a fatal error.
                if !matches!(
                    self.current(),
                    ConversationState::Uninitialized
                        | ConversationState::Idle
                        | ConversationState::Error
                ) {
                    let _ = reply.send(Err(ClientError::InvalidState(format!(
                        "initialize called in state {}",
                        self.current()
                    ))));
                    return;
                }
                self.set_state(ConversationState::Initializing).await;
                match self.initialize_session().await {
                    Ok(()) => {
                        self.set_state(ConversationState::Waiting).await;
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e.clone()));
                        self.fail(e).await;
                    }
                }
            }

            Command::StartListening => {
                if self.current() != ConversationState::Idle {
                    self.refuse("startListening");
                    return;
                }
                match self.input.start().await {
                    Ok(()) => self.set_state(ConversationState::Listening).await,
                    Err(e) => self.fail(e).await,
                }
            }

            Command::StopListening => {
                self.input.stop();
                if matches!(
                    self.current(),
                    ConversationState::Listening | ConversationState::UserSpeaking
                ) {
                    self.set_state(ConversationState::Idle).await;
                }
            }

            Command::Interact(request) => self.begin_interaction(Some(request)).await,

            Command::Interrupt => {
                self.player.pause();
                if let Some(target_uid) = self.active_interaction {
                    let _ = self.transport.submit_request(RequestBody::Interrupt {
                        target_uid,
                        at_character: None,
                    });
                    let _ = self.transport.submit_request(RequestBody::ClearAudio);
                }
                self.set_state(ConversationState::Interrupted).await;
            }

            Command::Pause => {
                if self.current() != ConversationState::Playing {
                    self.refuse("pause");
                    return;
                }
                self.player.pause();
                self.set_state(ConversationState::Paused).await;
            }

            Command::Resume => {
                if self.current() != ConversationState::Paused {
                    self.refuse("resume");
                    return;
                }
                self.player.resume();
                self.set_state(ConversationState::Playing).await;
            }

            Command::ForceInputComplete => self.input.send_input_complete(),

            Command::Stop => {
                self.input.stop();
                self.player.pause();
                self.transport.disconnect();
                self.set_state(ConversationState::Idle).await;
            }

            Command::ToggleTextOnlyInput(text_only) => {
                if text_only {
                    self.input.update_capabilities(InputCapabilities {
                        audio: false,
                        text: true,
                    });
                } else {
                    self.input.update_capabilities(InputCapabilities {
                        audio: true,
                        text: self.input.capabilities().text,
                    });
                    if self.current() == ConversationState::Idle {
                        match self.input.start().await {
                            Ok(()) => self.set_state(ConversationState::Listening).await,
                            Err(e) => self.fail(e).await,
                        }
                    }
                }
            }

            Command::Submit(body) => {
                if let Err(e) = self.transport.submit_request(body) {
                    self.surface(classify_transport(e)).await;
                }
            }
        }
    }

    async fn initialize_session(&mut self) -> ClientResult<()> {
        let token = match self.token_store.get() {
            Some(token) => token,
            None => {
                // The bearer token is exchanged out-of-band; fall back to
                // the raw key for direct-key deployments.
                self.token_store.set(self.config.api_key.clone());
                self.config.api_key.clone()
            }
        };

        self.transport
            .connect(&self.config.api_url)
            .await
            .map_err(classify_transport)?;

        let session_config = SessionConfig {
            prompt: Some(self.config.prompt.clone()),
            temperature: None,
            utilities: self.config.utilities.clone(),
            voice_profile: self.config.voice_profile.clone(),
        };
        let handle = self
            .transport
            .handshake(token, session_config)
            .await
            .map_err(classify_transport)?;
        self.active_interaction = Some(handle.uid);
        Ok(())
    }

    /// Start a new dialogue turn: reset playback for the next cycle, stop
    /// live input, and open the interaction stream.
    async fn begin_interaction(&mut self, request: Option<InteractRequest>) {
        match self.current() {
            ConversationState::Uninitialized
            | ConversationState::Initializing
            | ConversationState::Error => {
                self.refuse("interact");
                return;
            }
            _ => {}
        }

        let mut request = request.unwrap_or_default();
        if request.context.is_none() {
            request.context = self.config.context.clone();
        }
        if request.audio_output.is_none() {
            request.audio_output = Some(self.config.capabilities.audio);
        }

        self.input.stop();
        self.player.reset();

        match self.transport.stream_request(RequestBody::Interact(request)) {
            Ok(handle) => {
                self.active_interaction = Some(handle.uid);
                self.set_state(ConversationState::Waiting).await;
            }
            Err(e) => self.fail(classify_transport(e)).await,
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                if let Some(callback) = &self.sinks.on_network_ready {
                    callback().await;
                }
            }
            TransportEvent::Message(envelope) => self.handle_server_message(envelope).await,
            TransportEvent::StreamError(message) => {
                self.surface(ClientError::ServerError(message)).await;
            }
            TransportEvent::Error(message) => {
                self.fail(ClientError::NetworkError(message)).await;
            }
            TransportEvent::Disconnected => {
                let state = self.current();
                if !matches!(
                    state,
                    ConversationState::Idle
                        | ConversationState::Uninitialized
                        | ConversationState::Error
                ) {
                    self.fail(ClientError::NetworkError(
                        "session channel closed".to_string(),
                    ))
                    .await;
                }
            }
        }
    }

    async fn handle_server_message(&mut self, envelope: ServerEnvelope) {
        match envelope.kind.as_str() {
            "check_turn" => self.handle_check_turn(&envelope).await,
            "interact" => self.handle_interact_event(&envelope).await,
            other => debug!(kind = other, "ignoring reply"),
        }
    }

    async fn handle_check_turn(&mut self, envelope: &ServerEnvelope) {
        let state = self.current();

        // An accidental pickup must not cut the assistant off; the turn
        // check only matters between turns.
        if state.is_playback_active() {
            debug!("ignoring check_turn during playback");
            return;
        }

        if envelope.bool_field("is_user_still_speaking") == Some(true) {
            debug!("user still speaking; re-arming turn end");
            self.input.reset();
            return;
        }

        if state != ConversationState::Waiting {
            debug!(%state, "check_turn outside waiting; ignoring");
            return;
        }

        // Commit the captured turn.
        self.begin_interaction(None).await;
    }

    async fn handle_interact_event(&mut self, envelope: &ServerEnvelope) {
        let Some(event) = envelope.event else {
            debug!("interact message without event discriminator");
            return;
        };

        match event {
            InteractEvent::InteractionStarted => debug!("interaction started"),

            InteractEvent::Audio => {
                if let Some(audio) = envelope.str_field("audio") {
                    self.player.enqueue(audio);
                }
            }

            InteractEvent::AudioComplete => self.player.mark_complete(),

            InteractEvent::Text => {
                if let Some(text) = envelope.str_field("text") {
                    if let Some(callback) = &self.sinks.on_text {
                        callback(text.to_string()).await;
                    }
                }
            }

            InteractEvent::TextComplete => debug!("text stream complete"),

            InteractEvent::Subtitles => {
                if let Some(line) = envelope.str_field("text") {
                    if let Some(callback) = &self.sinks.on_subtitle_change {
                        callback(line.to_string()).await;
                    }
                }
                if let (Some(word), Some(index)) = (
                    envelope.str_field("word"),
                    envelope.field("word_index").and_then(|v| v.as_u64()),
                ) {
                    if let Some(callback) = &self.sinks.on_subtitle_word_highlight {
                        callback(SubtitleHighlight {
                            word: word.to_string(),
                            index: index as usize,
                        })
                        .await;
                    }
                }
            }

            InteractEvent::Image => {
                if let Some(url) = envelope
                    .str_field("url")
                    .or_else(|| envelope.str_field("image"))
                {
                    if let Some(callback) = &self.sinks.on_image_change {
                        callback(url.to_string()).await;
                    }
                }
            }

            InteractEvent::Viseme => {
                if let Some(name) = envelope
                    .str_field("viseme")
                    .or_else(|| envelope.str_field("animation"))
                {
                    if let Some(callback) = &self.sinks.on_avatar_animation {
                        callback(name.to_string()).await;
                    }
                }
            }

            InteractEvent::Data => {
                if let Some(data) = envelope.field("data") {
                    if let Some(callback) = &self.sinks.on_message {
                        callback(data.to_string()).await;
                    }
                }
            }

            InteractEvent::InteractionError => {
                let message = envelope
                    .error
                    .clone()
                    .or_else(|| envelope.str_field("message").map(str::to_string))
                    .unwrap_or_else(|| "interaction error".to_string());
                self.surface(ClientError::ServerError(message)).await;
            }

            InteractEvent::InteractionComplete => {
                if self.current() == ConversationState::Playing {
                    // Playback outlives the dialogue stream; run the
                    // cleanup when the last buffer ends.
                    debug!("deferring interaction_complete until playback finishes");
                    self.deferred_complete = true;
                } else {
                    self.handle_interaction_complete().await;
                }
            }
        }
    }

    async fn handle_player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::Ready => {
                if self.current() == ConversationState::Waiting {
                    self.player.play();
                    self.set_state(ConversationState::Playing).await;
                } else {
                    debug!(state = %self.current(), "audio ready outside waiting");
                }
            }

            PlayerEvent::Playing => debug!("playback started"),

            PlayerEvent::AboutToComplete => {
                if self.current() != ConversationState::Playing {
                    return;
                }
                // Pre-arm the recorder so a barge-in loses no audio: divert
                // chunks into the buffer and spin capture up off the hot
                // path.
                self.input.enable_audio_buffering();
                let input = self.input.clone();
                tokio::spawn(async move {
                    if let Err(e) = input.start().await {
                        warn!("failed to pre-arm input pipeline: {e}");
                    }
                });
            }

            PlayerEvent::Finished => {
                if self.current() != ConversationState::Playing {
                    // A stale Finished can trail a reset; the cycle that
                    // produced it is gone.
                    debug!(state = %self.current(), "ignoring playback finish");
                    return;
                }
                self.input.reset();
                if self.deferred_complete {
                    self.handle_interaction_complete().await;
                } else {
                    self.set_state(ConversationState::Idle).await;
                }
            }

            PlayerEvent::DecodeFailed => {
                self.deferred_complete = false;
                self.fail(ClientError::DecodeError(
                    "no playable buffers could be established for this response".to_string(),
                ))
                .await;
            }
        }
    }

    async fn handle_input_event(&mut self, event: InputEvent) {
        match event {
            InputEvent::UserSpeaking => match self.current() {
                ConversationState::Listening => {
                    self.set_state(ConversationState::UserSpeaking).await;
                }
                ConversationState::Playing => {
                    debug!("user speech during playback captured to buffer");
                }
                _ => self.refuse("speech-start"),
            },

            InputEvent::UserSilence => {
                if self.current() == ConversationState::UserSpeaking {
                    self.set_state(ConversationState::Listening).await;
                }
            }

            InputEvent::InputComplete => match self.current() {
                ConversationState::Listening | ConversationState::UserSpeaking => {
                    self.set_state(ConversationState::Waiting).await;
                }
                // A barge-in turn runs with the machine already idle; the
                // pipeline is live, so the turn end is still meaningful.
                ConversationState::Idle if self.input.is_running() => {
                    self.set_state(ConversationState::Waiting).await;
                }
                _ => debug!(state = %self.current(), "input complete ignored"),
            },
        }
    }

    /// The one cleanup for a finished interaction. Idempotent: the latch
    /// blocks re-entry, and every step tolerates running twice.
    async fn handle_interaction_complete(&mut self) {
        if self.current() == ConversationState::Error {
            // The turn already failed; cleanup must not revive it.
            debug!("interaction_complete after failure; keeping error state");
            return;
        }
        if self.handling_complete {
            debug!("interaction_complete already being handled");
            return;
        }
        self.handling_complete = true;
        self.deferred_complete = false;

        self.player.reset();
        self.input.reset();
        self.input.flush_buffered_audio();
        self.set_state(ConversationState::Idle).await;

        self.handling_complete = false;
    }
}

fn classify_transport(error: TransportError) -> ClientError {
    match error {
        TransportError::RequestTimeout { .. }
        | TransportError::ConnectTimeout(_)
        | TransportError::NotConnected => ClientError::NetworkTimeout(error.to_string()),
        TransportError::Server(message) => ClientError::ServerError(message),
        TransportError::WebSocket(_) | TransportError::ChannelClosed | TransportError::Encode(_) => {
            ClientError::NetworkError(error.to_string())
        }
    }
}
