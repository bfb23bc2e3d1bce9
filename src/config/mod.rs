//! Client configuration.
//!
//! Everything the hosting program can tune is collected in [`ClientConfig`],
//! passed once at construction. The split mirrors the public API surface:
//!
//! - connection settings (API URL, key, federated identity)
//! - dialogue settings (prompt, context, voice profile, utilities)
//! - output capabilities (audio playback, subtitles, avatar)
//! - input capabilities (microphone, text)
//! - microphone constraints
//!
//! Validation happens up front in [`ClientConfig::validate`]; a rejected
//! config never reaches the server.

mod validation;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ClientResult;

/// Voice profile forwarded to the server in `set_configuration`.
///
/// Ranges are enforced client-side: `speed` 0.7–1.2, `stability` and
/// `similarity_boost` 0.0–1.0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_boost: Option<f64>,
}

/// Which assistant outputs the host renders.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Capabilities {
    pub audio: bool,
    pub subtitles: bool,
    pub avatar: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            audio: true,
            subtitles: true,
            avatar: false,
        }
    }
}

/// Which user input channels are active.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InputCapabilities {
    pub audio: bool,
    pub text: bool,
}

impl Default for InputCapabilities {
    fn default() -> Self {
        Self {
            audio: true,
            text: false,
        }
    }
}

/// Microphone acquisition constraints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RecordingConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the conversation service.
    pub api_url: String,
    /// API key exchanged out-of-band for a bearer token.
    pub api_key: String,
    /// Federated identity forwarded during authentication.
    pub federated_id: String,
    /// System prompt installed with `set_configuration`.
    pub prompt: String,
    /// Optional opaque context object forwarded with `interact` requests.
    pub context: Option<Value>,
    /// Voice tuning forwarded with `set_configuration`.
    pub voice_profile: Option<VoiceProfile>,
    /// Utility declarations forwarded with `set_configuration`.
    pub utilities: Option<Value>,
    pub capabilities: Capabilities,
    pub input_capabilities: InputCapabilities,
    pub recording: RecordingConfig,
    /// Per-request timeout on the session channel.
    pub request_timeout: std::time::Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: String::new(),
            federated_id: String::new(),
            prompt: String::new(),
            context: None,
            voice_profile: None,
            utilities: None,
            capabilities: Capabilities::default(),
            input_capabilities: InputCapabilities::default(),
            recording: RecordingConfig::default(),
            request_timeout: crate::core::session::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Validate the configuration, rejecting values the server would refuse.
    pub fn validate(&self) -> ClientResult<()> {
        validation::validate_connection(&self.api_url, &self.api_key)?;
        if let Some(profile) = &self.voice_profile {
            validation::validate_voice_profile(profile)?;
        }
        validation::validate_recording(&self.recording)?;
        Ok(())
    }
}
