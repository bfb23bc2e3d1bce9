//! Shared fixtures for integration tests: a scripted loopback server and
//! fake platform collaborators.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message, WebSocketStream};

use colloquy::core::capture::{CaptureConstraints, CaptureSource, MediaFrame, MediaStream};
use colloquy::core::playback::{AudioDecoder, DecodeError, PcmBuffer};
use colloquy::errors::{ClientError, ClientResult};

/// One accepted WebSocket connection on the scripted server.
pub struct ServerConn {
    ws: WebSocketStream<TcpStream>,
}

impl ServerConn {
    /// Next JSON message from the client.
    pub async fn recv_json(&mut self) -> Value {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text).expect("client sent invalid JSON");
                }
                Some(Ok(Message::Close(_))) | None => panic!("client closed the channel"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("server websocket error: {e}"),
            }
        }
    }

    /// Next JSON message, or `None` if nothing arrives within `ms`.
    pub async fn recv_json_timeout(&mut self, ms: u64) -> Option<Value> {
        tokio::time::timeout(std::time::Duration::from_millis(ms), self.recv_json())
            .await
            .ok()
    }

    pub async fn send_json(&mut self, value: &Value) {
        self.ws
            .send(Message::Text(value.to_string().into()))
            .await
            .expect("server failed to send");
    }

    /// Reply to a request by echoing its kind and uid.
    pub async fn echo(&mut self, request: &Value) {
        self.send_json(&json!({
            "kind": request["kind"],
            "uid": request["uid"],
        }))
        .await;
    }

    /// Serve the client handshake: echo `authenticate` and
    /// `set_configuration`, then return the priming `interact` envelope.
    pub async fn serve_handshake(&mut self) -> Value {
        let auth = self.recv_json().await;
        assert_eq!(auth["kind"], "authenticate");
        self.echo(&auth).await;

        let config = self.recv_json().await;
        assert_eq!(config["kind"], "set_configuration");
        self.echo(&config).await;

        let priming = self.recv_json().await;
        assert_eq!(priming["kind"], "interact");
        assert_eq!(priming["type"], "stream");
        priming
    }

    /// Send one `interact` stream event for `uid`.
    pub async fn send_interact_event(&mut self, uid: &Value, event: &str, extra: Value) {
        let mut message = json!({
            "kind": "interact",
            "uid": uid,
            "event": event,
        });
        if let (Some(object), Some(extra)) = (message.as_object_mut(), extra.as_object()) {
            for (key, value) in extra {
                object.insert(key.clone(), value.clone());
            }
        }
        self.send_json(&message).await;
    }
}

static TRACING: Once = Once::new();

/// Route crate logs through the test harness. Idempotent across tests in
/// one binary; `RUST_LOG` filters as usual.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .try_init();
    });
}

/// Bind a loopback server for exactly one connection; returns its ws URL
/// and a receiver yielding the accepted connection.
pub async fn spawn_server() -> (String, mpsc::Receiver<ServerConn>) {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind loopback listener");
    let addr = listener.local_addr().unwrap();
    let (conn_tx, conn_rx) = mpsc::channel(1);

    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            let ws = accept_async(stream).await.expect("ws accept failed");
            let _ = conn_tx.send(ServerConn { ws }).await;
        }
    });

    (format!("ws://{addr}"), conn_rx)
}

/// One valid MPEG1 Layer III frame (417 bytes), as raw bytes.
pub fn mp3_frame(fill: u8) -> Vec<u8> {
    let mut data = vec![0xFF, 0xFB, 0x90, 0x00];
    data.resize(417, fill);
    data
}

/// Decoder fake: one output sample per `scale` input bytes, mono 48 kHz,
/// so tests dial playback duration through frame count. A failing
/// instance refuses every batch.
pub struct FakeDecoder {
    pub samples_per_byte: f64,
    pub fail: bool,
}

impl FakeDecoder {
    pub fn with_duration_per_frame(seconds: f64) -> Self {
        // A fabricated frame is 417 bytes.
        Self {
            samples_per_byte: seconds * 48000.0 / 417.0,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            samples_per_byte: 0.0,
            fail: true,
        }
    }
}

impl AudioDecoder for FakeDecoder {
    fn decode(&self, frames: &[u8]) -> Result<PcmBuffer, DecodeError> {
        if self.fail {
            return Err(DecodeError::Undecodable("corrupt bitstream".to_string()));
        }
        if frames.is_empty() {
            return Err(DecodeError::Undecodable("empty batch".to_string()));
        }
        let samples = (frames.len() as f64 * self.samples_per_byte) as usize;
        Ok(PcmBuffer::new(vec![0.01; samples.max(1)], 48000, 1))
    }
}

/// Capture source fake: hands out one scripted frame channel, counting
/// acquisitions; can be told to refuse.
pub struct FakeCaptureSource {
    frames: Mutex<Option<mpsc::UnboundedReceiver<MediaFrame>>>,
    pub opens: AtomicUsize,
    pub deny: bool,
}

impl FakeCaptureSource {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<MediaFrame>) {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                frames: Mutex::new(Some(frames_rx)),
                opens: AtomicUsize::new(0),
                deny: false,
            }),
            frames_tx,
        )
    }
}

#[async_trait::async_trait]
impl CaptureSource for FakeCaptureSource {
    async fn open(&self, _constraints: &CaptureConstraints) -> ClientResult<MediaStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.deny {
            return Err(ClientError::MicDenied("permission refused".to_string()));
        }
        let frames = self
            .frames
            .lock()
            .take()
            .expect("fake capture source opened twice");
        Ok(MediaStream::new(frames))
    }
}
