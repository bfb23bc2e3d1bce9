//! Host-facing event sinks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::errors::ErrorKind;

use super::state::ConversationState;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Callback type for state transitions: `(old, new)`.
pub type StateChangeCallback =
    Arc<dyn Fn(ConversationState, ConversationState) -> BoxFuture + Send + Sync>;

/// Callback type for assistant text.
pub type TextCallback = Arc<dyn Fn(String) -> BoxFuture + Send + Sync>;

/// Callback type for server data messages.
pub type MessageCallback = Arc<dyn Fn(String) -> BoxFuture + Send + Sync>;

/// Callback type for subtitle line changes.
pub type SubtitleCallback = Arc<dyn Fn(String) -> BoxFuture + Send + Sync>;

/// Callback type for subtitle word highlights.
pub type SubtitleWordCallback = Arc<dyn Fn(SubtitleHighlight) -> BoxFuture + Send + Sync>;

/// Callback type for image changes.
pub type ImageCallback = Arc<dyn Fn(String) -> BoxFuture + Send + Sync>;

/// Callback type for network readiness.
pub type NetworkReadyCallback = Arc<dyn Fn() -> BoxFuture + Send + Sync>;

/// Callback type for avatar animation changes.
pub type AvatarAnimationCallback = Arc<dyn Fn(String) -> BoxFuture + Send + Sync>;

/// Callback type for surfaced errors.
pub type ErrorCallback = Arc<dyn Fn(ClientErrorEvent) -> BoxFuture + Send + Sync>;

/// One highlighted word within the current subtitle line.
#[derive(Debug, Clone)]
pub struct SubtitleHighlight {
    pub word: String,
    pub index: usize,
}

/// Error surfaced to the host alongside the `error` state.
#[derive(Debug, Clone)]
pub struct ClientErrorEvent {
    pub kind: ErrorKind,
    pub message: String,
}

/// The host's subscriptions. All optional; unset sinks drop their events.
#[derive(Default, Clone)]
pub struct EventSinks {
    pub on_state_change: Option<StateChangeCallback>,
    pub on_text: Option<TextCallback>,
    pub on_message: Option<MessageCallback>,
    pub on_subtitle_change: Option<SubtitleCallback>,
    pub on_subtitle_word_highlight: Option<SubtitleWordCallback>,
    pub on_image_change: Option<ImageCallback>,
    pub on_network_ready: Option<NetworkReadyCallback>,
    pub on_avatar_animation: Option<AvatarAnimationCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl EventSinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state_change<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(ConversationState, ConversationState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_state_change = Some(Arc::new(move |old, new| Box::pin(callback(old, new))));
        self
    }

    pub fn with_text<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_text = Some(Arc::new(move |text| Box::pin(callback(text))));
        self
    }

    pub fn with_message<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_message = Some(Arc::new(move |message| Box::pin(callback(message))));
        self
    }

    pub fn with_subtitle_change<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_subtitle_change = Some(Arc::new(move |line| Box::pin(callback(line))));
        self
    }

    pub fn with_subtitle_word_highlight<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(SubtitleHighlight) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_subtitle_word_highlight =
            Some(Arc::new(move |highlight| Box::pin(callback(highlight))));
        self
    }

    pub fn with_image_change<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_image_change = Some(Arc::new(move |url| Box::pin(callback(url))));
        self
    }

    pub fn with_network_ready<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_network_ready = Some(Arc::new(move || Box::pin(callback())));
        self
    }

    pub fn with_avatar_animation<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_avatar_animation = Some(Arc::new(move |name| Box::pin(callback(name))));
        self
    }

    pub fn with_error<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(ClientErrorEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_error = Some(Arc::new(move |event| Box::pin(callback(event))));
        self
    }
}
