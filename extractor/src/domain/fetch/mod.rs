//! Ordered fallback across Overpass mirrors.
//!
//! [`MirrorFetcher::fetch`] tries each mirror strictly in declared order,
//! never concurrently. Per-mirror failures are recorded and the next mirror
//! is tried; the first complete 2xx body wins. When all mirrors fail, the last
//! error is reported as primary and the earlier ones are kept for diagnosis.

mod decode;
mod progress;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};
use url::Url;

pub use decode::{GZIP_MAGIC, SMALL_BODY_BYTES};
pub use progress::{PROGRESS_INTERVAL, ProgressMeter};

use self::decode::{BodyTarget, DecodedBody, DecodingSink};
use super::error::ExtractError;
use super::ports::{MirrorAttemptError, MirrorRequest, MirrorTransport, StagingStore, TransferSummary};
use super::query::{QueryClass, QueryTimeouts};

/// How a successful body is materialised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchMode {
    /// Keep the decoded body in memory; for small id and station answers.
    InMemory,
    /// Write through to storage, publishing as `name` on success.
    Streamed {
        /// Final file name of the body.
        name: String,
    },
}

/// Materialised body of the winning mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchedBody {
    /// Decoded bytes.
    InMemory(Vec<u8>),
    /// Published file holding the decoded bytes.
    Stored {
        /// Final file name.
        name: String,
    },
}

/// One recorded per-mirror failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorFailure {
    /// Mirror that failed.
    pub mirror: Url,
    /// Why it failed.
    pub error: MirrorAttemptError,
}

impl fmt::Display for MirrorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.mirror, self.error)
    }
}

/// Every mirror failed for one stage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "all {attempts} Overpass mirrors failed for the {stage} query; last error from {last}",
    attempts = .prior.len() + 1,
    stage = .class.label()
)]
pub struct FetchFailure {
    /// Stage that failed.
    pub class: QueryClass,
    /// Failure of the last mirror tried.
    pub last: MirrorFailure,
    /// Failures of the earlier mirrors, in attempt order.
    pub prior: Vec<MirrorFailure>,
}

/// Successful fetch of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Mirror that delivered the body.
    pub mirror: Url,
    /// The body.
    pub body: FetchedBody,
    /// Wire-level facts of the winning transfer.
    pub transfer: TransferSummary,
    /// Body size after gzip decoding.
    pub decoded_bytes: u64,
    /// Whether the body arrived gzip encoded.
    pub gzip: bool,
    /// Wall time of the winning attempt.
    pub elapsed: Duration,
    /// Failures recorded before the winner, in attempt order.
    pub failures: Vec<MirrorFailure>,
}

/// Adapters the fetcher drives.
#[derive(Clone)]
pub struct MirrorFetcherPorts {
    /// Posts queries to one mirror.
    pub transport: Arc<dyn MirrorTransport>,
    /// Receives streamed bodies.
    pub staging: Arc<dyn StagingStore>,
}

/// Executes one query against an ordered mirror list.
#[derive(Clone)]
pub struct MirrorFetcher {
    transport: Arc<dyn MirrorTransport>,
    staging: Arc<dyn StagingStore>,
    timeouts: QueryTimeouts,
}

struct Attempt {
    body: FetchedBody,
    transfer: TransferSummary,
    decoded_bytes: u64,
    gzip: bool,
}

impl MirrorFetcher {
    /// Build a fetcher with per-class attempt timeouts.
    pub fn new(ports: MirrorFetcherPorts, timeouts: QueryTimeouts) -> Self {
        Self {
            transport: ports.transport,
            staging: ports.staging,
            timeouts,
        }
    }

    /// Run `query` against `mirrors` in order until one succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidRequest`] for an empty mirror list and
    /// [`ExtractError::AllMirrorsFailed`] when every mirror failed.
    pub async fn fetch(
        &self,
        query: &str,
        class: QueryClass,
        mirrors: &[Url],
        mode: &FetchMode,
    ) -> Result<FetchOutcome, ExtractError> {
        if mirrors.is_empty() {
            return Err(ExtractError::invalid_request(
                "at least one Overpass mirror is required",
            ));
        }

        let mut failures = Vec::new();
        for mirror in mirrors {
            let started = Instant::now();
            info!(stage = class.label(), %mirror, "querying Overpass mirror");
            match self.attempt(mirror, query, class, mode).await {
                Ok(attempt) => {
                    let elapsed = started.elapsed();
                    info!(
                        stage = class.label(),
                        %mirror,
                        bytes = attempt.decoded_bytes,
                        wire_bytes = attempt.transfer.wire_bytes,
                        gzip = attempt.gzip,
                        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                        "Overpass mirror answered"
                    );
                    return Ok(FetchOutcome {
                        mirror: mirror.clone(),
                        body: attempt.body,
                        transfer: attempt.transfer,
                        decoded_bytes: attempt.decoded_bytes,
                        gzip: attempt.gzip,
                        elapsed,
                        failures,
                    });
                }
                Err(error) => {
                    warn!(stage = class.label(), %mirror, %error, "Overpass mirror failed");
                    failures.push(MirrorFailure {
                        mirror: mirror.clone(),
                        error,
                    });
                }
            }
        }

        let Some(last) = failures.pop() else {
            return Err(ExtractError::invalid_request(
                "at least one Overpass mirror is required",
            ));
        };
        Err(FetchFailure {
            class,
            last,
            prior: failures,
        }
        .into())
    }

    async fn attempt(
        &self,
        mirror: &Url,
        query: &str,
        class: QueryClass,
        mode: &FetchMode,
    ) -> Result<Attempt, MirrorAttemptError> {
        let (target, progress) = match mode {
            FetchMode::InMemory => (BodyTarget::Memory(Vec::new()), None),
            FetchMode::Streamed { name } => {
                let artifact = self
                    .staging
                    .stage(name)
                    .map_err(|error| MirrorAttemptError::sink(error.to_string()))?;
                (
                    BodyTarget::Staged(artifact),
                    Some(ProgressMeter::new(name.as_str(), Instant::now())),
                )
            }
        };

        let mut sink = DecodingSink::new(target, progress);
        let request = MirrorRequest {
            endpoint: mirror,
            query,
            class,
            timeout: self.timeouts.for_class(class),
        };
        let transfer = self.transport.post_query(&request, &mut sink).await?;
        let decoded = sink.finish()?;
        warn_on_small_body(&decoded, mirror, class);

        let DecodedBody {
            target,
            decoded_bytes,
            gzip,
            ..
        } = decoded;
        let body = match target {
            BodyTarget::Memory(bytes) => FetchedBody::InMemory(bytes),
            BodyTarget::Staged(artifact) => FetchedBody::Stored {
                name: artifact
                    .commit()
                    .map_err(|error| MirrorAttemptError::sink(error.to_string()))?,
            },
        };
        Ok(Attempt {
            body,
            transfer,
            decoded_bytes,
            gzip,
        })
    }
}

fn warn_on_small_body(decoded: &DecodedBody, mirror: &Url, class: QueryClass) {
    if decoded.preview.len() < SMALL_BODY_BYTES {
        warn!(
            stage = class.label(),
            %mirror,
            bytes = decoded.decoded_bytes,
            body = %String::from_utf8_lossy(&decoded.preview),
            "Overpass returned a small body"
        );
    }
}
