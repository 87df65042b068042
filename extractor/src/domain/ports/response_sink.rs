//! Chunk consumer fed by a [`super::MirrorTransport`].

use super::define_port_error;

define_port_error! {
    /// Errors raised while consuming body chunks.
    pub enum SinkError {
        /// Writing decoded bytes to their destination failed.
        Write { message: String } =>
            "failed to write response body: {message}",
        /// The body claimed to be gzip but did not decode.
        Decode { message: String } =>
            "failed to decode response body: {message}",
    }
}

/// Receives raw response bytes in arrival order.
pub trait ResponseSink: Send {
    /// Consume one chunk. Chunks may be of any size, including empty.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when the chunk cannot be decoded or stored; the
    /// transport must abandon the attempt.
    fn accept(&mut self, chunk: &[u8]) -> Result<(), SinkError>;
}

impl ResponseSink for Vec<u8> {
    fn accept(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        self.extend_from_slice(chunk);
        Ok(())
    }
}
