//! Overpass outbound adapters.
//!
//! This module provides the HTTP implementation of the `MirrorTransport` port
//! and the JSON decoder that turns Overpass documents into domain elements.

mod dto;
mod http_transport;

use std::io::Read;

pub use http_transport::{OverpassHttpIdentity, OverpassHttpTransport};

use self::dto::{DocumentShapeError, OverpassDocumentDto};
use crate::domain::{ExtractError, RawDocument};

/// Decode an in-memory Overpass JSON body.
///
/// # Errors
///
/// Returns [`ExtractError::MalformedResponse`] for invalid JSON (with a body
/// preview) or a missing `elements` array (with the server remark).
pub fn parse_document(body: &[u8]) -> Result<RawDocument, ExtractError> {
    let decoded: OverpassDocumentDto = serde_json::from_slice(body).map_err(|error| {
        ExtractError::malformed_response(
            format!("invalid JSON: {error}"),
            non_empty(body_preview(body)),
        )
    })?;
    into_document(decoded)
}

/// Decode an Overpass JSON document from a reader, for bodies kept on disk.
///
/// # Errors
///
/// Same as [`parse_document`], without a body preview for invalid JSON; the
/// reader may already be consumed, so callers attach one.
pub fn read_document(reader: impl Read) -> Result<RawDocument, ExtractError> {
    let decoded: OverpassDocumentDto = serde_json::from_reader(reader)
        .map_err(|error| ExtractError::malformed_response(format!("invalid JSON: {error}"), None))?;
    into_document(decoded)
}

fn into_document(decoded: OverpassDocumentDto) -> Result<RawDocument, ExtractError> {
    decoded.into_domain().map_err(|error| match error {
        DocumentShapeError::MissingElements { remark } => {
            ExtractError::malformed_response("missing top-level elements array", remark)
        }
    })
}

fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

pub(crate) fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        format!("{preview}...")
    } else {
        preview
    }
}
