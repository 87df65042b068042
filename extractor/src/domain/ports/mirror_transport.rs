//! Driven port for posting one Overpass query to one mirror.
//!
//! The transport only moves bytes: it posts the query, checks the status,
//! and pushes raw body chunks into a [`ResponseSink`] as they arrive. Mirror
//! ordering and decoding belong to the fetcher.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::define_port_error;
use super::response_sink::{ResponseSink, SinkError};
use crate::domain::query::QueryClass;

/// One query aimed at one mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorRequest<'a> {
    /// Interpreter endpoint of the mirror.
    pub endpoint: &'a Url,
    /// Overpass QL text sent as the `data` form field.
    pub query: &'a str,
    /// Stage the query belongs to.
    pub class: QueryClass,
    /// Client-side bound for the whole attempt.
    pub timeout: Duration,
}

/// Wire-level facts about a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransferSummary {
    /// HTTP status code of the response.
    pub status: u16,
    /// Body bytes received on the wire, before any decoding.
    pub wire_bytes: u64,
    /// Declared `Content-Length`, when present.
    pub content_length: Option<u64>,
    /// Declared `Content-Encoding`, when present.
    pub content_encoding: Option<String>,
}

define_port_error! {
    /// Failure of one attempt against one mirror; the fetcher moves on.
    pub enum MirrorAttemptError {
        /// Connection, TLS, or mid-body network failure.
        Transport { message: String } =>
            "mirror transport failed: {message}",
        /// The attempt exceeded its timeout.
        Timeout { message: String } =>
            "mirror timed out: {message}",
        /// The mirror answered with a non-success status.
        Status { status: u16, preview: String } =>
            "mirror returned status {status}: {preview}",
        /// The body ended before the declared length.
        Truncated { expected: u64, received: u64 } =>
            "mirror response truncated: received {received} of {expected} bytes",
        /// The response sink rejected a chunk.
        Sink { message: String } =>
            "response sink failed: {message}",
    }
}

impl From<SinkError> for MirrorAttemptError {
    fn from(value: SinkError) -> Self {
        Self::sink(value.to_string())
    }
}

/// Port for posting Overpass queries.
#[async_trait]
pub trait MirrorTransport: Send + Sync {
    /// Post `request` and stream its body into `sink`.
    ///
    /// Returns only after the whole body was handed to the sink.
    async fn post_query(
        &self,
        request: &MirrorRequest<'_>,
        sink: &mut dyn ResponseSink,
    ) -> Result<TransferSummary, MirrorAttemptError>;
}
