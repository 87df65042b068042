//! Driven port for streamed downloads that land in storage.
//!
//! A streamed attempt writes into a fresh staged artefact. Only a committed
//! artefact becomes visible under its final name; dropping an uncommitted one
//! removes its staged data.

use super::define_port_error;

define_port_error! {
    /// Errors raised by staged storage.
    pub enum StagingError {
        /// The final name is already taken; outputs are never overwritten.
        AlreadyExists { name: String } =>
            "refusing to overwrite existing file {name}",
        /// The name is not a single plain file name.
        InvalidName { name: String } =>
            "invalid staged file name {name}",
        /// Underlying I/O failed.
        Io { name: String, message: String } =>
            "staging {name} failed: {message}",
    }
}

/// An in-progress write that is invisible until committed.
///
/// Implementations must remove the staged data when dropped uncommitted.
pub trait StagedArtifact: Send {
    /// Append bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::Io`] when the write fails.
    fn write(&mut self, bytes: &[u8]) -> Result<(), StagingError>;

    /// Sync and publish under the final name, returning that name.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::AlreadyExists`] when the final name appeared
    /// in the meantime, or [`StagingError::Io`] on sync or rename failure.
    /// The staged data is removed in both cases.
    fn commit(self: Box<Self>) -> Result<String, StagingError>;
}

/// Factory for staged artefacts.
pub trait StagingStore: Send + Sync {
    /// Start a staged write that will publish as `final_name`.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::AlreadyExists`] when `final_name` exists,
    /// [`StagingError::InvalidName`] for paths, or [`StagingError::Io`].
    fn stage(&self, final_name: &str) -> Result<Box<dyn StagedArtifact>, StagingError>;
}
