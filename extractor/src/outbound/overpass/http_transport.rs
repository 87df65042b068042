//! Reqwest-backed mirror transport.
//!
//! This adapter owns transport details only: request serialisation, status
//! and transport error mapping, and chunked body delivery. Compression is
//! requested explicitly and left encoded; the fetcher sniffs and decodes it.
//! Error pages are the exception and are gunzipped here for their preview.

use std::borrow::Cow;
use std::io::Read;
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::MultiGzDecoder;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, CONTENT_ENCODING, USER_AGENT};
use reqwest::{Client, StatusCode};

use super::body_preview;
use crate::domain::GZIP_MAGIC;
use crate::domain::ports::{
    MirrorAttemptError, MirrorRequest, MirrorTransport, ResponseSink, TransferSummary,
};

const DEFAULT_USER_AGENT: &str = "transit-extract/0.1 (+https://wiki.openstreetmap.org/wiki/Overpass_API)";
const DEFAULT_CONTACT: &str = "transit-extract@users.noreply.invalid";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_BODY_LIMIT: u64 = 8 * 1024;

/// Outbound identity sent with every Overpass request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverpassHttpIdentity {
    /// HTTP user-agent sent to Overpass.
    pub user_agent: String,
    /// Contact header value sent to Overpass.
    pub contact: String,
}

impl Default for OverpassHttpIdentity {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            contact: DEFAULT_CONTACT.to_owned(),
        }
    }
}

/// Mirror transport performing HTTP POST requests.
pub struct OverpassHttpTransport {
    client: Client,
    user_agent: String,
    contact: String,
}

impl OverpassHttpTransport {
    /// Build a transport with the given identity.
    ///
    /// Attempt timeouts come from each [`MirrorRequest`]; only connecting is
    /// bounded at client level.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(identity: OverpassHttpIdentity) -> Result<Self, reqwest::Error> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self {
            client,
            user_agent: identity.user_agent,
            contact: identity.contact,
        })
    }
}

#[async_trait]
impl MirrorTransport for OverpassHttpTransport {
    async fn post_query(
        &self,
        request: &MirrorRequest<'_>,
        sink: &mut dyn ResponseSink,
    ) -> Result<TransferSummary, MirrorAttemptError> {
        let mut response = self
            .client
            .post(request.endpoint.clone())
            .timeout(request.timeout)
            .header(USER_AGENT, self.user_agent.as_str())
            .header("Contact", self.contact.as_str())
            .header(ACCEPT, "application/json")
            .header(ACCEPT_ENCODING, "gzip")
            .form(&[("data", request.query)])
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(map_status_error(status, body.as_ref()));
        }

        let content_length = response.content_length();
        let content_encoding = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let mut wire_bytes = 0_u64;
        while let Some(chunk) = response.chunk().await.map_err(map_transport_error)? {
            wire_bytes = wire_bytes.saturating_add(chunk.len() as u64);
            sink.accept(&chunk)?;
        }

        check_complete(content_length, wire_bytes)?;
        Ok(TransferSummary {
            status: status.as_u16(),
            wire_bytes,
            content_length,
            content_encoding,
        })
    }
}

fn check_complete(content_length: Option<u64>, received: u64) -> Result<(), MirrorAttemptError> {
    match content_length {
        Some(expected) if received < expected => {
            Err(MirrorAttemptError::truncated(expected, received))
        }
        _ => Ok(()),
    }
}

fn map_transport_error(error: reqwest::Error) -> MirrorAttemptError {
    if error.is_timeout() {
        MirrorAttemptError::timeout(error.to_string())
    } else {
        MirrorAttemptError::transport(error.to_string())
    }
}

fn map_status_error(status: StatusCode, body: &[u8]) -> MirrorAttemptError {
    let preview = body_preview(&decoded_error_body(body));
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            MirrorAttemptError::timeout(format!("status {}: {preview}", status.as_u16()))
        }
        _ => MirrorAttemptError::status(status.as_u16(), preview),
    }
}

/// Gunzip an error page when it carries the gzip magic; undecodable bodies
/// are previewed as received.
fn decoded_error_body(body: &[u8]) -> Cow<'_, [u8]> {
    if !body.starts_with(&GZIP_MAGIC) {
        return Cow::Borrowed(body);
    }
    let mut decoded = Vec::new();
    let read = MultiGzDecoder::new(body)
        .take(ERROR_BODY_LIMIT)
        .read_to_end(&mut decoded);
    if read.is_err() && decoded.is_empty() {
        Cow::Borrowed(body)
    } else {
        Cow::Owned(decoded)
    }
}

#[cfg(test)]
mod tests {
    //! Regression coverage for non-network mapping helpers.

    use std::io::Write as _;

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use rstest::rstest;

    use super::*;

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).expect("compress");
        encoder.finish().expect("finish gzip")
    }

    #[rstest]
    #[case::request_timeout(StatusCode::REQUEST_TIMEOUT, "Timeout")]
    #[case::gateway_timeout(StatusCode::GATEWAY_TIMEOUT, "Timeout")]
    #[case::rate_limited(StatusCode::TOO_MANY_REQUESTS, "Status")]
    #[case::server_error(StatusCode::INTERNAL_SERVER_ERROR, "Status")]
    fn maps_http_statuses_to_attempt_errors(#[case] status: StatusCode, #[case] expected: &str) {
        let error = map_status_error(status, b"<html>\n  <p>runtime error: open64</p>\n</html>");
        match expected {
            "Timeout" => assert!(
                matches!(error, MirrorAttemptError::Timeout { .. }),
                "timeout statuses should map to Timeout"
            ),
            "Status" => assert!(
                matches!(
                    &error,
                    MirrorAttemptError::Status { status: code, preview }
                        if *code == status.as_u16() && preview.contains("runtime error: open64")
                ),
                "other statuses keep code and preview: {error}"
            ),
            _ => panic!("unsupported test expectation: {expected}"),
        }
    }

    #[rstest]
    #[case::rate_limited(StatusCode::TOO_MANY_REQUESTS)]
    #[case::gateway_timeout(StatusCode::GATEWAY_TIMEOUT)]
    fn gzip_error_pages_are_previewed_decoded(#[case] status: StatusCode) {
        let body = gzip(b"<p>rate_limited: please wait</p>");

        let error = map_status_error(status, &body);

        assert!(
            error.to_string().contains("rate_limited: please wait"),
            "{error}"
        );
    }

    #[rstest]
    fn undecodable_gzip_error_pages_fall_back_to_raw_bytes() {
        let body = [0x1f, 0x8b, b'n', b'o', b'p', b'e'];
        assert_eq!(decoded_error_body(&body).as_ref(), body.as_slice());
    }

    #[rstest]
    #[case::complete(Some(10), 10, true)]
    #[case::undeclared(None, 3, true)]
    #[case::short(Some(10), 4, false)]
    fn detects_truncated_bodies(
        #[case] content_length: Option<u64>,
        #[case] received: u64,
        #[case] complete: bool,
    ) {
        let result = check_complete(content_length, received);
        assert_eq!(result.is_ok(), complete);
        if let Err(error) = result {
            assert_eq!(error, MirrorAttemptError::truncated(10_u64, 4_u64));
        }
    }

    #[rstest]
    fn builds_with_default_identity() {
        assert!(OverpassHttpTransport::new(OverpassHttpIdentity::default()).is_ok());
    }
}
