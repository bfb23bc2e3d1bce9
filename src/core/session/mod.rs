//! Session channel to the conversation service.
//!
//! One WebSocket carries everything; the [`SessionTransport`] multiplexes
//! single-reply and streaming exchanges over it with correlation uids, and
//! the [`TokenStore`] capability holds the bearer token the handshake
//! presents.

mod envelope;
mod pending;
mod token;
mod transport;

pub use envelope::{
    AudioConfig, ClientEnvelope, ExchangeType, InteractEvent, InteractRequest, RequestBody,
    ServerEnvelope, SessionConfig,
};
pub use pending::ResponseMode;
pub use token::{MemoryTokenStore, TokenStore, DEFAULT_TOKEN_TTL};
pub use transport::{
    SessionTransport, StreamHandle, TransportError, TransportEvent, CONNECT_TIMEOUT,
    DEFAULT_REQUEST_TIMEOUT,
};
