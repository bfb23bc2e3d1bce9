//! Conversation states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The single conversation state. Exactly one holds at any moment;
/// transitions are serialized through the orchestrator task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversationState {
    Uninitialized,
    Initializing,
    Idle,
    Paused,
    Listening,
    UserSpeaking,
    Waiting,
    Playing,
    Completed,
    Interrupted,
    Error,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::Uninitialized => "uninitialized",
            ConversationState::Initializing => "initializing",
            ConversationState::Idle => "idle",
            ConversationState::Paused => "paused",
            ConversationState::Listening => "listening",
            ConversationState::UserSpeaking => "userSpeaking",
            ConversationState::Waiting => "waiting",
            ConversationState::Playing => "playing",
            ConversationState::Completed => "completed",
            ConversationState::Interrupted => "interrupted",
            ConversationState::Error => "error",
        }
    }

    /// Whether assistant playback is in progress or suspended.
    pub fn is_playback_active(&self) -> bool {
        matches!(self, ConversationState::Playing | ConversationState::Paused)
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_value(ConversationState::UserSpeaking).unwrap(),
            "userSpeaking"
        );
        assert_eq!(
            serde_json::to_value(ConversationState::Uninitialized).unwrap(),
            "uninitialized"
        );
        assert_eq!(ConversationState::Playing.as_str(), "playing");
    }

    #[test]
    fn test_playback_active() {
        assert!(ConversationState::Playing.is_playback_active());
        assert!(ConversationState::Paused.is_playback_active());
        assert!(!ConversationState::Waiting.is_playback_active());
    }
}
