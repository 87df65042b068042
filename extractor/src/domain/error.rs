//! Fatal extraction errors.
//!
//! Per-mirror failures (`MirrorAttemptError`) and per-element problems
//! (`PartialElementError`) are recovered locally and never surface here; this
//! enum only carries the failures that abort a stage or a whole run.

use thiserror::Error;

use super::fetch::FetchFailure;
use super::ports::StagingError;

/// Errors that abort an extraction run.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Input or configuration failed validation before any request was made.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Validation failure description.
        message: String,
    },
    /// Every mirror failed for one query stage.
    #[error(transparent)]
    AllMirrorsFailed(Box<FetchFailure>),
    /// A mirror answered but the body is not a usable Overpass document.
    #[error("malformed Overpass response: {message}{}", render_diagnostic(.diagnostic.as_deref()))]
    MalformedResponse {
        /// What was wrong with the body.
        message: String,
        /// Server remark or a body preview, when available.
        diagnostic: Option<String>,
    },
    /// A stage produced nothing for later stages to build on.
    #[error("empty result: {message}")]
    EmptyResult {
        /// Which intermediate set was empty.
        message: String,
    },
    /// Reading or writing run artefacts failed.
    #[error("storage failure: {message}")]
    Storage {
        /// Storage failure description.
        message: String,
    },
}

impl ExtractError {
    /// Convenience constructor for [`ExtractError::InvalidRequest`].
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Convenience constructor for [`ExtractError::MalformedResponse`].
    pub fn malformed_response(message: impl Into<String>, diagnostic: Option<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
            diagnostic,
        }
    }

    /// Convenience constructor for [`ExtractError::EmptyResult`].
    pub fn empty_result(message: impl Into<String>) -> Self {
        Self::EmptyResult {
            message: message.into(),
        }
    }

    /// Convenience constructor for [`ExtractError::Storage`].
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

impl From<FetchFailure> for ExtractError {
    fn from(value: FetchFailure) -> Self {
        Self::AllMirrorsFailed(Box::new(value))
    }
}

impl From<StagingError> for ExtractError {
    fn from(value: StagingError) -> Self {
        Self::storage(value.to_string())
    }
}

fn render_diagnostic(diagnostic: Option<&str>) -> String {
    diagnostic.map_or_else(String::new, |text| format!(" (server said: {text})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn malformed_response_includes_remark() {
        let error = ExtractError::malformed_response(
            "missing elements array",
            Some("runtime error: Query timed out".to_owned()),
        );
        assert_eq!(
            error.to_string(),
            "malformed Overpass response: missing elements array \
             (server said: runtime error: Query timed out)"
        );
    }

    #[rstest]
    fn malformed_response_without_diagnostic_is_terse() {
        let error = ExtractError::malformed_response("invalid JSON", None);
        assert_eq!(error.to_string(), "malformed Overpass response: invalid JSON");
    }

    #[rstest]
    fn empty_result_formats_message() {
        let error = ExtractError::empty_result("no route relations returned");
        assert_eq!(error.to_string(), "empty result: no route relations returned");
    }

    #[rstest]
    fn staging_failures_become_storage_errors() {
        let error = ExtractError::from(StagingError::already_exists("routes.geojson"));
        assert!(matches!(error, ExtractError::Storage { .. }));
        assert!(error.to_string().contains("refusing to overwrite"), "{error}");
    }
}
