//! Conversation orchestration.
//!
//! [`ConversationClient`] is the public entry point: it constructs every
//! subsystem, owns the serialized state machine, and exposes the turn-level
//! API (`initialize`, `start_listening`, `interact`, `interrupt`, ...).

mod callbacks;
mod machine;
mod state;

pub use callbacks::{
    AvatarAnimationCallback, ClientErrorEvent, ErrorCallback, EventSinks, ImageCallback,
    MessageCallback, NetworkReadyCallback, StateChangeCallback, SubtitleCallback,
    SubtitleHighlight, SubtitleWordCallback, TextCallback,
};
pub use machine::{ConversationClient, Platform};
pub use state::ConversationState;
