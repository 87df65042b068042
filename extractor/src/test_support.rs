//! Test utilities for the extractor crate.
//!
//! This module provides shared doubles for both unit tests (in `src/`) and
//! integration tests (in `tests/`). It is only compiled for tests or with the
//! `test-support` feature.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use mockable::Clock;
use url::Url;

use crate::domain::QueryClass;
use crate::domain::ports::{
    MirrorAttemptError, MirrorRequest, MirrorTransport, ResponseSink, StagedArtifact,
    StagingError, StagingStore, TransferSummary,
};

/// Scripted reply of one mirror attempt.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Deliver these chunks with status 200.
    Body(Vec<Vec<u8>>),
    /// Fail before any body byte.
    Fail(MirrorAttemptError),
    /// Deliver these chunks, then fail.
    Partial(Vec<Vec<u8>>, MirrorAttemptError),
}

impl Reply {
    /// Single-chunk JSON body.
    pub fn json(body: &str) -> Self {
        Self::Body(vec![body.as_bytes().to_vec()])
    }
}

/// One observed transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Mirror that was called.
    pub endpoint: Url,
    /// Stage of the query.
    pub class: QueryClass,
    /// Query text.
    pub query: String,
    /// Client-side attempt timeout.
    pub timeout: Duration,
}

/// Transport double replaying per-mirror scripts in call order.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    /// Queue `reply` for the next call to `mirror`.
    #[must_use]
    pub fn with_reply(self, mirror: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(mirror.to_owned())
            .or_default()
            .push_back(reply);
        self
    }

    /// Calls observed so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl MirrorTransport for ScriptedTransport {
    async fn post_query(
        &self,
        request: &MirrorRequest<'_>,
        sink: &mut dyn ResponseSink,
    ) -> Result<TransferSummary, MirrorAttemptError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                endpoint: request.endpoint.clone(),
                class: request.class,
                query: request.query.to_owned(),
                timeout: request.timeout,
            });
        let reply = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(request.endpoint.as_str())
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Reply::Fail(MirrorAttemptError::transport(format!(
                    "no scripted reply for {}",
                    request.endpoint
                )))
            });

        let (chunks, failure) = match reply {
            Reply::Body(chunks) => (chunks, None),
            Reply::Fail(error) => (Vec::new(), Some(error)),
            Reply::Partial(chunks, error) => (chunks, Some(error)),
        };
        let mut wire_bytes = 0_u64;
        for chunk in &chunks {
            sink.accept(chunk)?;
            wire_bytes += chunk.len() as u64;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(TransferSummary {
                status: 200,
                wire_bytes,
                content_length: Some(wire_bytes),
                content_encoding: None,
            }),
        }
    }
}

/// In-memory [`StagingStore`] that records committed files and discards.
#[derive(Debug, Clone, Default)]
pub struct MemoryStaging {
    files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    discarded: Arc<Mutex<Vec<String>>>,
}

impl MemoryStaging {
    /// Contents of a committed file.
    pub fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Names of committed files.
    pub fn names(&self) -> Vec<String> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Final names of artefacts dropped without commit, in drop order.
    pub fn discarded(&self) -> Vec<String> {
        self.discarded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StagingStore for MemoryStaging {
    fn stage(&self, final_name: &str) -> Result<Box<dyn StagedArtifact>, StagingError> {
        if self
            .files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(final_name)
        {
            return Err(StagingError::already_exists(final_name));
        }
        Ok(Box::new(MemoryArtifact {
            name: final_name.to_owned(),
            buffer: Vec::new(),
            committed: false,
            store: self.clone(),
        }))
    }
}

struct MemoryArtifact {
    name: String,
    buffer: Vec<u8>,
    committed: bool,
    store: MemoryStaging,
}

impl StagedArtifact for MemoryArtifact {
    fn write(&mut self, bytes: &[u8]) -> Result<(), StagingError> {
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<String, StagingError> {
        let mut files = self
            .store
            .files
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if files.contains_key(&self.name) {
            return Err(StagingError::already_exists(self.name.as_str()));
        }
        files.insert(self.name.clone(), std::mem::take(&mut self.buffer));
        drop(files);
        self.committed = true;
        Ok(self.name.clone())
    }
}

impl Drop for MemoryArtifact {
    fn drop(&mut self) {
        if !self.committed {
            self.store
                .discarded
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(self.name.clone());
        }
    }
}

/// Clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn local(&self) -> DateTime<Local> {
        self.0.with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        self.0
    }
}
