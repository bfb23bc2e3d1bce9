//! Wire envelopes for the bidirectional session channel.
//!
//! Every exchange is a newline-free JSON object. Client envelopes carry a
//! `type` (`request` or `stream`), a `kind` discriminator, a v4 `uid` the
//! server echoes on every related response, and `client_start_time`.
//! Server envelopes echo the request `kind`, or carry `kind: "interact"`
//! with an `event` discriminator for streamed interaction events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Exchange discriminator: one reply, or a stream of messages terminated
/// by `kind: "close"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    Request,
    Stream,
}

/// Audio payload description attached to `add_audio`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sampling_rate: u32,
    pub mime_type: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 48000,
            mime_type: "audio/mpeg".to_string(),
        }
    }
}

/// Session configuration installed during the handshake.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utilities: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_profile: Option<crate::config::VoiceProfile>,
}

/// An `interact` request: one dialogue turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InteractRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speakers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_input_non_blocking: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_output: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
}

impl InteractRequest {
    /// Text-only turn.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// The priming turn sent right after the handshake; the server needs
    /// one trigger to produce its opening utterance.
    pub fn priming() -> Self {
        Self::text(".")
    }
}

/// Request payloads, discriminated by `kind` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestBody {
    Authenticate {
        access_token: String,
    },
    SetConfiguration {
        config: SessionConfig,
    },
    MergeConfiguration {
        #[serde(skip_serializing_if = "Option::is_none")]
        references: Option<Value>,
    },
    GetConfiguration,
    RenderPrompt {
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
    },
    AddAudio {
        audio: String,
        config: AudioConfig,
    },
    ClearAudio,
    CheckTurn,
    Transcribe {
        #[serde(skip_serializing_if = "Option::is_none")]
        language_code: Option<String>,
    },
    AddKeywords {
        keywords: Vec<String>,
    },
    RemoveKeywords,
    DetectKeywords,
    AddSpeaker {
        speaker: String,
        audio: String,
    },
    RemoveSpeakers,
    DetectSpeakers,
    Interact(InteractRequest),
    Interrupt {
        target_uid: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        at_character: Option<u64>,
    },
    Run {
        #[serde(skip_serializing_if = "Option::is_none")]
        utilities: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        bindings: Option<Value>,
    },
    Ping,
}

impl RequestBody {
    /// The wire `kind` for this request.
    pub fn kind(&self) -> &'static str {
        match self {
            RequestBody::Authenticate { .. } => "authenticate",
            RequestBody::SetConfiguration { .. } => "set_configuration",
            RequestBody::MergeConfiguration { .. } => "merge_configuration",
            RequestBody::GetConfiguration => "get_configuration",
            RequestBody::RenderPrompt { .. } => "render_prompt",
            RequestBody::AddAudio { .. } => "add_audio",
            RequestBody::ClearAudio => "clear_audio",
            RequestBody::CheckTurn => "check_turn",
            RequestBody::Transcribe { .. } => "transcribe",
            RequestBody::AddKeywords { .. } => "add_keywords",
            RequestBody::RemoveKeywords => "remove_keywords",
            RequestBody::DetectKeywords => "detect_keywords",
            RequestBody::AddSpeaker { .. } => "add_speaker",
            RequestBody::RemoveSpeakers => "remove_speakers",
            RequestBody::DetectSpeakers => "detect_speakers",
            RequestBody::Interact(_) => "interact",
            RequestBody::Interrupt { .. } => "interrupt",
            RequestBody::Run { .. } => "run",
            RequestBody::Ping => "ping",
        }
    }
}

/// Full client → server envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEnvelope {
    #[serde(rename = "type")]
    pub exchange: ExchangeType,
    pub uid: Uuid,
    pub client_start_time: String,
    #[serde(flatten)]
    pub body: RequestBody,
}

/// Events carried inside the `interact` response stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractEvent {
    InteractionStarted,
    Text,
    TextComplete,
    Audio,
    AudioComplete,
    Data,
    Image,
    Subtitles,
    Viseme,
    InteractionError,
    InteractionComplete,
}

/// Server → client envelope.
///
/// Kind-specific fields stay in `rest`; accessors pull the commonly used
/// ones without committing the whole union to static types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEnvelope {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<InteractEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl ServerEnvelope {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.rest.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.rest.get(name).and_then(Value::as_str)
    }

    pub fn bool_field(&self, name: &str) -> Option<bool> {
        self.rest.get(name).and_then(Value::as_bool)
    }
}
