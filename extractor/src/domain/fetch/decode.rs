//! Gzip-sniffing response sink.
//!
//! Mirrors do not reliably declare `Content-Encoding`, so the first two body
//! bytes decide: `1f 8b` selects gzip, anything else is passed through.
//! Decoded bytes go straight to the body target; nothing but the sniffed
//! header is buffered.

use std::io::{self, Write};
use std::time::Instant;

use flate2::write::GzDecoder;

use super::progress::ProgressMeter;
use crate::domain::ports::{ResponseSink, SinkError, StagedArtifact};

/// Leading bytes of every gzip member.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decoded bodies shorter than this are logged in full.
pub const SMALL_BODY_BYTES: usize = 2_048;

/// Where decoded bytes end up.
pub(crate) enum BodyTarget {
    Memory(Vec<u8>),
    Staged(Box<dyn StagedArtifact>),
}

/// A fully decoded body and what was learned while decoding it.
pub(crate) struct DecodedBody {
    pub(crate) target: BodyTarget,
    pub(crate) decoded_bytes: u64,
    pub(crate) gzip: bool,
    /// First [`SMALL_BODY_BYTES`] decoded bytes.
    pub(crate) preview: Vec<u8>,
}

struct TargetWriter {
    target: BodyTarget,
    written: u64,
    preview: Vec<u8>,
    progress: Option<ProgressMeter>,
}

impl TargetWriter {
    fn into_body(self, gzip: bool) -> DecodedBody {
        DecodedBody {
            target: self.target,
            decoded_bytes: self.written,
            gzip,
            preview: self.preview,
        }
    }
}

impl Write for TargetWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.target {
            BodyTarget::Memory(bytes) => bytes.extend_from_slice(buf),
            BodyTarget::Staged(artifact) => artifact.write(buf).map_err(io::Error::other)?,
        }
        let room = SMALL_BODY_BYTES.saturating_sub(self.preview.len());
        self.preview
            .extend(buf.iter().take(room).copied());
        self.written = self.written.saturating_add(buf.len() as u64);
        if let Some(progress) = self.progress.as_mut() {
            progress.observe(Instant::now(), self.written);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum DecodeState {
    Sniffing { head: Vec<u8>, writer: TargetWriter },
    Plain(TargetWriter),
    Gzip(GzDecoder<TargetWriter>),
}

impl DecodeState {
    fn write_body(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        match self {
            Self::Plain(writer) => writer
                .write_all(bytes)
                .map_err(|error| SinkError::write(error.to_string())),
            Self::Gzip(decoder) => decoder.write_all(bytes).map_err(classify_gzip_error),
            Self::Sniffing { head, .. } => {
                head.extend_from_slice(bytes);
                Ok(())
            }
        }
    }
}

/// [`ResponseSink`] that decodes gzip on the fly and writes to a target.
pub(crate) struct DecodingSink {
    state: Option<DecodeState>,
}

impl DecodingSink {
    pub(crate) fn new(target: BodyTarget, progress: Option<ProgressMeter>) -> Self {
        Self {
            state: Some(DecodeState::Sniffing {
                head: Vec::with_capacity(GZIP_MAGIC.len()),
                writer: TargetWriter {
                    target,
                    written: 0,
                    preview: Vec::new(),
                    progress,
                },
            }),
        }
    }

    /// Flush the decoder and hand back the target.
    pub(crate) fn finish(mut self) -> Result<DecodedBody, SinkError> {
        self.promote()?;
        match self.state.take() {
            Some(DecodeState::Plain(writer)) => Ok(writer.into_body(false)),
            Some(DecodeState::Gzip(decoder)) => decoder
                .finish()
                .map(|writer| writer.into_body(true))
                .map_err(classify_gzip_error),
            Some(DecodeState::Sniffing { .. }) | None => {
                Err(SinkError::write("response sink already finished"))
            }
        }
    }

    /// Leave the sniffing state once the header is known or the body ended.
    fn promote(&mut self) -> Result<(), SinkError> {
        if !matches!(self.state, Some(DecodeState::Sniffing { .. })) {
            return Ok(());
        }
        let Some(DecodeState::Sniffing { head, writer }) = self.state.take() else {
            return Ok(());
        };
        let mut next = if head.starts_with(&GZIP_MAGIC) {
            DecodeState::Gzip(GzDecoder::new(writer))
        } else {
            DecodeState::Plain(writer)
        };
        let result = next.write_body(&head);
        self.state = Some(next);
        result
    }
}

impl ResponseSink for DecodingSink {
    fn accept(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        let Some(state) = self.state.as_mut() else {
            return Err(SinkError::write("response sink already finished"));
        };
        state.write_body(chunk)?;
        match &self.state {
            Some(DecodeState::Sniffing { head, .. }) if head.len() >= GZIP_MAGIC.len() => {
                self.promote()
            }
            _ => Ok(()),
        }
    }
}

fn classify_gzip_error(error: io::Error) -> SinkError {
    match error.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof => {
            SinkError::decode(error.to_string())
        }
        _ => SinkError::write(error.to_string()),
    }
}
