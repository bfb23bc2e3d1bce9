//! In-flight request records.

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::envelope::ServerEnvelope;
use super::transport::TransportError;

/// How responses to a request are consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// First matching response resolves the request.
    Single,
    /// Matching responses flow through as events; `kind: "close"` ends the
    /// stream.
    Stream,
}

/// One in-flight request, keyed by its correlation uid.
pub(crate) struct PendingRequest {
    pub kind: &'static str,
    pub mode: ResponseMode,
    pub resolver: Option<oneshot::Sender<Result<ServerEnvelope, TransportError>>>,
    pub timeout: JoinHandle<()>,
}

impl PendingRequest {
    /// Consume the record, cancel its timer, and deliver `result` to
    /// whoever is awaiting it.
    pub(crate) fn resolve(mut self, result: Result<ServerEnvelope, TransportError>) {
        self.timeout.abort();
        if let Some(resolver) = self.resolver.take() {
            let _ = resolver.send(result);
        }
    }
}
