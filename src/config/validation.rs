//! Configuration validation logic.

use crate::errors::{ClientError, ClientResult};

use super::{RecordingConfig, VoiceProfile};

/// Validate connection settings.
pub fn validate_connection(api_url: &str, api_key: &str) -> ClientResult<()> {
    if api_url.trim().is_empty() {
        return Err(ClientError::ConfigurationError(
            "api_url must not be empty".to_string(),
        ));
    }
    if !api_url.starts_with("ws://") && !api_url.starts_with("wss://") {
        return Err(ClientError::ConfigurationError(format!(
            "api_url must be a ws:// or wss:// endpoint, got {api_url}"
        )));
    }
    if api_key.trim().is_empty() {
        return Err(ClientError::ConfigurationError(
            "api_key must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validate voice profile ranges: speed 0.7–1.2, stability and
/// similarity_boost 0.0–1.0.
pub fn validate_voice_profile(profile: &VoiceProfile) -> ClientResult<()> {
    if let Some(speed) = profile.speed {
        if !(0.7..=1.2).contains(&speed) {
            return Err(ClientError::ConfigurationError(format!(
                "voice_profile.speed must be within 0.7..=1.2, got {speed}"
            )));
        }
    }
    if let Some(stability) = profile.stability {
        if !(0.0..=1.0).contains(&stability) {
            return Err(ClientError::ConfigurationError(format!(
                "voice_profile.stability must be within 0.0..=1.0, got {stability}"
            )));
        }
    }
    if let Some(boost) = profile.similarity_boost {
        if !(0.0..=1.0).contains(&boost) {
            return Err(ClientError::ConfigurationError(format!(
                "voice_profile.similarity_boost must be within 0.0..=1.0, got {boost}"
            )));
        }
    }
    Ok(())
}

/// Validate microphone constraints.
pub fn validate_recording(recording: &RecordingConfig) -> ClientResult<()> {
    if recording.sample_rate == 0 {
        return Err(ClientError::ConfigurationError(
            "recording.sample_rate must be non-zero".to_string(),
        ));
    }
    if recording.channels == 0 || recording.channels > 2 {
        return Err(ClientError::ConfigurationError(format!(
            "recording.channels must be 1 or 2, got {}",
            recording.channels
        )));
    }
    Ok(())
}
