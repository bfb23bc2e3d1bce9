//! Bidirectional session transport.
//!
//! One WebSocket carries every exchange with the server. Outgoing requests
//! get a fresh v4 correlation uid; responses route back through a pending
//! map either as a single reply or as a stream of messages ended by
//! `kind: "close"`. Everything the state machine consumes arrives on the
//! transport event channel in receive order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::utils::iso_timestamp;

use super::envelope::{
    ClientEnvelope, ExchangeType, InteractRequest, RequestBody, ServerEnvelope, SessionConfig,
};
use super::pending::{PendingRequest, ResponseMode};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(50);

/// Time allowed for the channel to open during `connect`.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("channel did not open within {0:?}")]
    ConnectTimeout(Duration),
    #[error("{kind} request timed out after {timeout:?}")]
    RequestTimeout {
        kind: &'static str,
        timeout: Duration,
    },
    #[error("server error: {0}")]
    Server(String),
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("failed to encode envelope: {0}")]
    Encode(String),
    #[error("channel closed")]
    ChannelClosed,
}

/// Events delivered to the transport's consumer, in receive order.
#[derive(Debug)]
pub enum TransportEvent {
    /// Handshake finished; the session is live.
    Connected,
    /// A server message for the state machine: single-reply echoes, stream
    /// messages, and server-initiated `interact` events.
    Message(ServerEnvelope),
    /// A fatal channel-level error.
    Error(String),
    /// A stream ended with `kind: "error"` or timed out. The session
    /// itself is still usable.
    StreamError(String),
    /// The channel went away.
    Disconnected,
}

/// Handle for a stream-mode request.
pub struct StreamHandle {
    /// Correlation uid of the stream; `interrupt` targets this.
    pub uid: Uuid,
    /// Resolves when the server sends `kind: "close"` for this uid.
    pub closed: oneshot::Receiver<Result<ServerEnvelope, TransportError>>,
}

enum WsCommand {
    Send(String),
    Close,
}

/// Multiplexes request/response and streaming exchanges over one
/// bidirectional channel.
pub struct SessionTransport {
    inner: Arc<TransportInner>,
}

impl Clone for SessionTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct TransportInner {
    request_timeout: Duration,
    pending: Mutex<HashMap<Uuid, PendingRequest>>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<WsCommand>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    ws_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionTransport {
    /// Create a transport and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        request_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(TransportInner {
            request_timeout,
            pending: Mutex::new(HashMap::new()),
            outgoing: Mutex::new(None),
            events,
            ws_task: Mutex::new(None),
        });
        (Self { inner }, events_rx)
    }

    /// Open the channel, waiting up to [`CONNECT_TIMEOUT`].
    pub async fn connect(&self, url: &str) -> Result<(), TransportError> {
        let (ws_stream, _response) = timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| TransportError::ConnectTimeout(CONNECT_TIMEOUT))?
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        info!("session channel open: {url}");

        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<WsCommand>();
        *self.inner.outgoing.lock() = Some(cmd_tx);

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let (mut ws_sink, mut ws_stream) = ws_stream.split();

            loop {
                tokio::select! {
                    command = cmd_rx.recv() => match command {
                        Some(WsCommand::Send(text)) => {
                            if let Err(e) = ws_sink.send(Message::Text(text.into())).await {
                                let _ = inner.events.send(TransportEvent::Error(format!(
                                    "failed to send on session channel: {e}"
                                )));
                                break;
                            }
                        }
                        Some(WsCommand::Close) => {
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break;
                        }
                        None => break,
                    },

                    message = ws_stream.next() => match message {
                        Some(Ok(Message::Text(text))) => inner.handle_incoming(&text),
                        Some(Ok(Message::Close(frame))) => {
                            info!("session channel closed by server: {frame:?}");
                            break;
                        }
                        Some(Ok(_)) => debug!("ignoring non-text frame"),
                        Some(Err(e)) => {
                            let _ = inner.events.send(TransportEvent::Error(format!(
                                "session channel error: {e}"
                            )));
                            break;
                        }
                        None => {
                            info!("session channel stream ended");
                            break;
                        }
                    },
                }
            }

            inner.fail_all_pending();
            *inner.outgoing.lock() = None;
            let _ = inner.events.send(TransportEvent::Disconnected);
        });
        *self.inner.ws_task.lock() = Some(task);

        Ok(())
    }

    /// Authenticate, install the session configuration, announce
    /// readiness, then prime the server for its opening utterance.
    pub async fn handshake(
        &self,
        access_token: String,
        config: SessionConfig,
    ) -> Result<StreamHandle, TransportError> {
        self.request(RequestBody::Authenticate { access_token })
            .await?;
        self.request(RequestBody::SetConfiguration { config })
            .await?;

        let _ = self.inner.events.send(TransportEvent::Connected);
        info!("session handshake complete");

        self.stream_request(RequestBody::Interact(InteractRequest::priming()))
    }

    /// Send a single-mode request and await its reply.
    ///
    /// Resolves or rejects exactly once: the first matching response (a
    /// `kind: "error"` rejects), or the request timer.
    pub async fn request(&self, body: RequestBody) -> Result<ServerEnvelope, TransportError> {
        let (_uid, receiver) = self.submit(ResponseMode::Single, body)?;
        receiver.await.map_err(|_| TransportError::ChannelClosed)?
    }

    /// Send a single-mode request without awaiting the reply. Ordering on
    /// the wire follows call order; timeouts are logged instead of
    /// surfaced.
    pub fn submit_request(&self, body: RequestBody) -> Result<Uuid, TransportError> {
        let (uid, _receiver) = self.submit(ResponseMode::Single, body)?;
        Ok(uid)
    }

    /// Send a stream-mode request. Matching messages arrive as
    /// [`TransportEvent::Message`]; the handle resolves on `kind: "close"`.
    pub fn stream_request(&self, body: RequestBody) -> Result<StreamHandle, TransportError> {
        let (uid, closed) = self.submit(ResponseMode::Stream, body)?;
        Ok(StreamHandle { uid, closed })
    }

    /// Close the channel and fail everything in flight.
    pub fn disconnect(&self) {
        if let Some(outgoing) = self.inner.outgoing.lock().take() {
            let _ = outgoing.send(WsCommand::Close);
        }
        if let Some(task) = self.inner.ws_task.lock().take() {
            // The close command lets the task finish on its own; abort is
            // only a backstop for a task stuck on a dead socket.
            let abort = task.abort_handle();
            tokio::spawn(async move {
                if timeout(Duration::from_secs(5), task).await.is_err() {
                    warn!("session channel task did not exit after close");
                    abort.abort();
                }
            });
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.outgoing.lock().is_some()
    }

    /// Register a pending record and put the envelope on the wire.
    fn submit(
        &self,
        mode: ResponseMode,
        body: RequestBody,
    ) -> Result<
        (
            Uuid,
            oneshot::Receiver<Result<ServerEnvelope, TransportError>>,
        ),
        TransportError,
    > {
        let outgoing = self
            .inner
            .outgoing
            .lock()
            .clone()
            .ok_or(TransportError::NotConnected)?;

        let uid = Uuid::new_v4();
        let kind = body.kind();
        let envelope = ClientEnvelope {
            exchange: match mode {
                ResponseMode::Single => ExchangeType::Request,
                ResponseMode::Stream => ExchangeType::Stream,
            },
            uid,
            client_start_time: iso_timestamp(),
            body,
        };
        let text =
            serde_json::to_string(&envelope).map_err(|e| TransportError::Encode(e.to_string()))?;

        let (resolver, receiver) = oneshot::channel();
        let timeout_task = {
            let inner = Arc::clone(&self.inner);
            let request_timeout = self.inner.request_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(request_timeout).await;
                inner.expire(uid);
            })
        };

        self.inner.pending.lock().insert(
            uid,
            PendingRequest {
                kind,
                mode,
                resolver: Some(resolver),
                timeout: timeout_task,
            },
        );

        if outgoing.send(WsCommand::Send(text)).is_err() {
            if let Some(record) = self.inner.pending.lock().remove(&uid) {
                record.timeout.abort();
            }
            return Err(TransportError::ChannelClosed);
        }

        debug!(%uid, kind, ?mode, "request sent");
        Ok((uid, receiver))
    }

    #[cfg(test)]
    pub(crate) fn test_support(&self) -> test_support::TransportDriver {
        test_support::TransportDriver::new(Arc::clone(&self.inner))
    }
}

impl TransportInner {
    /// Route one incoming message per the correlation rules.
    fn handle_incoming(&self, text: &str) {
        let envelope: ServerEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("discarding unparseable server message: {e}");
                return;
            }
        };

        let record = envelope
            .uid
            .and_then(|uid| self.take_or_inspect(uid, &envelope));

        match record {
            Some((uid, record)) => match record.mode {
                ResponseMode::Single => {
                    let result = if envelope.kind == "error" {
                        Err(TransportError::Server(
                            envelope.error.clone().unwrap_or_default(),
                        ))
                    } else {
                        Ok(envelope.clone())
                    };
                    record.resolve(result);
                    let _ = self.events.send(TransportEvent::Message(envelope));
                }
                ResponseMode::Stream => {
                    if envelope.kind == "error" {
                        // Stream errors end the server side of the stream
                        // but do not reject the initiating request.
                        let message = envelope.error.clone().unwrap_or_default();
                        error!(%uid, "stream error: {message}");
                        record.resolve(Ok(envelope));
                        let _ = self.events.send(TransportEvent::StreamError(message));
                    } else {
                        // "close": resolve the stream and emit the marker.
                        record.resolve(Ok(envelope.clone()));
                        let _ = self.events.send(TransportEvent::Message(envelope));
                    }
                }
            },
            None => {
                if envelope.uid.is_some() && self.reemit_stream_message(&envelope) {
                    return;
                }
                // Server-initiated events for the active interaction have
                // no pending record.
                if envelope.kind == "interact" {
                    let _ = self.events.send(TransportEvent::Message(envelope));
                } else {
                    debug!(kind = %envelope.kind, "unmatched server message");
                }
            }
        }
    }

    /// Remove the record when this message consumes it; leave stream
    /// records in place for mid-stream messages.
    fn take_or_inspect(
        &self,
        uid: Uuid,
        envelope: &ServerEnvelope,
    ) -> Option<(Uuid, PendingRequest)> {
        let mut pending = self.pending.lock();
        let consumes = match pending.get(&uid)? {
            record if record.mode == ResponseMode::Single => true,
            _ => envelope.kind == "close" || envelope.kind == "error",
        };
        if consumes {
            pending.remove(&uid).map(|record| (uid, record))
        } else {
            None
        }
    }

    /// Mid-stream messages reach here with their record still registered;
    /// emit them without consuming it.
    fn reemit_stream_message(&self, envelope: &ServerEnvelope) -> bool {
        let uid = match envelope.uid {
            Some(uid) => uid,
            None => return false,
        };
        let is_stream = {
            let pending = self.pending.lock();
            matches!(pending.get(&uid), Some(record) if record.mode == ResponseMode::Stream)
        };
        if is_stream {
            let _ = self
                .events
                .send(TransportEvent::Message(envelope.clone()));
        }
        is_stream
    }

    /// Request timer fired: drop the record and reject its promise.
    fn expire(&self, uid: Uuid) {
        let record = self.pending.lock().remove(&uid);
        if let Some(record) = record {
            warn!(%uid, kind = record.kind, "request timed out");
            let kind = record.kind;
            let timeout = self.request_timeout;
            if record.mode == ResponseMode::Stream {
                let _ = self.events.send(TransportEvent::StreamError(format!(
                    "{kind} stream timed out after {timeout:?}"
                )));
            }
            record.resolve(Err(TransportError::RequestTimeout { kind, timeout }));
        }
    }

    /// Channel went away: every in-flight request fails.
    fn fail_all_pending(&self) {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, record)| record).collect()
        };
        for record in drained {
            record.resolve(Err(TransportError::ChannelClosed));
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transport() -> (
        SessionTransport,
        mpsc::UnboundedReceiver<TransportEvent>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (transport, events) = SessionTransport::with_timeout(Duration::from_millis(200));
        let pipe = transport.test_support().install_pipe();
        (transport, events, pipe)
    }

    fn sent_envelope(raw: &str) -> serde_json::Value {
        serde_json::from_str(raw).unwrap()
    }

    #[tokio::test]
    async fn test_single_request_resolves_on_matching_uid() {
        let (transport, mut events, mut pipe) = transport();

        let pending = tokio::spawn({
            let transport = transport.clone();
            async move { transport.request(RequestBody::Ping).await }
        });

        let sent = sent_envelope(&pipe.recv().await.unwrap());
        assert_eq!(sent["kind"], "ping");
        assert_eq!(sent["type"], "request");
        let uid = sent["uid"].as_str().unwrap();

        transport
            .test_support()
            .inject(&json!({ "kind": "ping", "uid": uid }));

        let reply = pending.await.unwrap().unwrap();
        assert_eq!(reply.kind, "ping");
        assert_eq!(transport.test_support().pending_len(), 0);

        // The reply is also emitted as a message event.
        match events.recv().await.unwrap() {
            TransportEvent::Message(envelope) => assert_eq!(envelope.kind, "ping"),
            other => panic!("expected message event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_single_request_rejects_on_error_kind() {
        let (transport, _events, mut pipe) = transport();

        let driver = transport.test_support();
        let request = tokio::spawn({
            let transport = transport.clone();
            async move { transport.request(RequestBody::CheckTurn).await }
        });

        let sent = sent_envelope(&pipe.recv().await.unwrap());
        let uid = sent["uid"].as_str().unwrap();
        driver.inject(&json!({ "kind": "error", "uid": uid, "error": "nope" }));

        match request.await.unwrap() {
            Err(TransportError::Server(message)) => assert_eq!(message, "nope"),
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_timeout_rejects_and_removes_record() {
        let (transport, _events, mut pipe) = transport();

        let request = tokio::spawn({
            let transport = transport.clone();
            async move { transport.request(RequestBody::Ping).await }
        });
        let _ = pipe.recv().await.unwrap();

        match request.await.unwrap() {
            Err(TransportError::RequestTimeout { kind, .. }) => assert_eq!(kind, "ping"),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(transport.test_support().pending_len(), 0);
    }

    #[tokio::test]
    async fn test_stream_messages_flow_until_close() {
        let (transport, mut events, mut pipe) = transport();
        let driver = transport.test_support();

        let handle = transport
            .stream_request(RequestBody::Interact(InteractRequest::text("hi")))
            .unwrap();
        let sent = sent_envelope(&pipe.recv().await.unwrap());
        assert_eq!(sent["type"], "stream");
        let uid = sent["uid"].as_str().unwrap();
        assert_eq!(uid, handle.uid.to_string());

        driver.inject(&json!({ "kind": "interact", "uid": uid, "event": "text", "text": "hello" }));
        driver.inject(&json!({ "kind": "interact", "uid": uid, "event": "audio_complete" }));
        assert_eq!(driver.pending_len(), 1);

        driver.inject(&json!({ "kind": "close", "uid": uid }));
        assert_eq!(driver.pending_len(), 0);

        let closed = handle.closed.await.unwrap().unwrap();
        assert_eq!(closed.kind, "close");

        let kinds: Vec<String> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|event| match event {
                TransportEvent::Message(envelope) => envelope.kind,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(kinds, vec!["interact", "interact", "close"]);
    }

    #[tokio::test]
    async fn test_stream_error_surfaces_without_rejecting() {
        let (transport, mut events, mut pipe) = transport();
        let driver = transport.test_support();

        let handle = transport
            .stream_request(RequestBody::Interact(InteractRequest::text("hi")))
            .unwrap();
        let sent = sent_envelope(&pipe.recv().await.unwrap());
        let uid = sent["uid"].as_str().unwrap();

        driver.inject(&json!({ "kind": "error", "uid": uid, "error": "model exploded" }));

        // The stream ends without the handle rejecting.
        let closed = handle.closed.await.unwrap().unwrap();
        assert_eq!(closed.kind, "error");

        match events.recv().await.unwrap() {
            TransportEvent::StreamError(message) => assert_eq!(message, "model exploded"),
            other => panic!("expected stream error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unmatched_interact_emitted_others_dropped() {
        let (transport, mut events, _pipe) = transport();
        let driver = transport.test_support();

        driver.inject(&json!({
            "kind": "interact",
            "uid": Uuid::new_v4(),
            "event": "subtitles",
            "subtitles": "hi there",
        }));
        driver.inject(&json!({ "kind": "ping", "uid": Uuid::new_v4() }));

        match events.try_recv().unwrap() {
            TransportEvent::Message(envelope) => assert_eq!(envelope.kind, "interact"),
            other => panic!("expected message, got {other:?}"),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_uids_are_unique() {
        let (transport, _events, mut pipe) = transport();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            transport.submit_request(RequestBody::Ping).unwrap();
            let sent = sent_envelope(&pipe.recv().await.unwrap());
            assert!(seen.insert(sent["uid"].as_str().unwrap().to_string()));
        }
    }

    #[tokio::test]
    async fn test_not_connected_rejected() {
        let (transport, _events) = SessionTransport::new();
        match transport.submit_request(RequestBody::Ping) {
            Err(TransportError::NotConnected) => {}
            other => panic!("expected NotConnected, got {other:?}"),
        }
    }
}
