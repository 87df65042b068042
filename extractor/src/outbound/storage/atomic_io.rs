//! Atomic, never-overwriting file writes.
//!
//! Every write goes to a hidden temporary file in the target directory,
//! created with create-new semantics, synced, and then published under its
//! final name. Publishing uses a hard link so an existing target is never
//! replaced; the temporary file is removed afterwards.

use std::io::{self, Write};
use std::path::{Component, Path};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use cap_std::fs::{Dir, File, OpenOptions};

use crate::domain::ports::{StagedArtifact, StagingError, StagingStore};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// [`StagingStore`] writing into one output directory.
#[derive(Debug, Clone)]
pub struct DirStagingStore {
    dir: Arc<Dir>,
}

impl DirStagingStore {
    /// Stage files inside `dir`.
    pub const fn new(dir: Arc<Dir>) -> Self {
        Self { dir }
    }
}

impl StagingStore for DirStagingStore {
    fn stage(&self, final_name: &str) -> Result<Box<dyn StagedArtifact>, StagingError> {
        let artifact = StagedFile::create(Arc::clone(&self.dir), final_name)?;
        Ok(Box::new(artifact))
    }
}

/// A hidden temporary file awaiting publication.
#[derive(Debug)]
pub struct StagedFile {
    dir: Arc<Dir>,
    tmp_name: String,
    final_name: String,
    file: Option<File>,
}

impl StagedFile {
    /// Create the temporary file for `final_name`.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::InvalidName`] unless `final_name` is a plain
    /// file name, [`StagingError::AlreadyExists`] when it is taken, and
    /// [`StagingError::Io`] when the temporary file cannot be created.
    pub fn create(dir: Arc<Dir>, final_name: &str) -> Result<Self, StagingError> {
        validate_file_name(final_name)?;
        if dir.exists(final_name) {
            return Err(StagingError::already_exists(final_name));
        }

        let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_nanos());
        let tmp_name = format!(
            ".{}.tmp.{}.{}.{}",
            final_name,
            std::process::id(),
            suffix,
            counter
        );

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        let file = dir
            .open_with(&tmp_name, &options)
            .map_err(|error| io_error(final_name, &error))?;

        Ok(Self {
            dir,
            tmp_name,
            final_name: final_name.to_owned(),
            file: Some(file),
        })
    }

    fn publish(&self) -> Result<(), StagingError> {
        match self.dir.hard_link(&self.tmp_name, &self.dir, &self.final_name) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StagingError::already_exists(self.final_name.as_str()));
            }
            // Filesystems without hard links fall back to check-then-rename.
            Err(_) => {
                if self.dir.exists(&self.final_name) {
                    return Err(StagingError::already_exists(self.final_name.as_str()));
                }
                self.dir
                    .rename(&self.tmp_name, &self.dir, &self.final_name)
                    .map_err(|error| io_error(&self.final_name, &error))?;
            }
        }
        sync_parent_directory(&self.dir);
        Ok(())
    }
}

impl StagedArtifact for StagedFile {
    fn write(&mut self, bytes: &[u8]) -> Result<(), StagingError> {
        let Some(file) = self.file.as_mut() else {
            return Err(StagingError::io(
                self.final_name.as_str(),
                "staged file already closed",
            ));
        };
        file.write_all(bytes)
            .map_err(|error| io_error(&self.final_name, &error))
    }

    fn commit(mut self: Box<Self>) -> Result<String, StagingError> {
        if let Some(file) = self.file.take() {
            file.sync_all()
                .map_err(|error| io_error(&self.final_name, &error))?;
        }
        self.publish()?;
        Ok(self.final_name.clone())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        drop(self.file.take());
        // Best-effort cleanup; after a hard-link publish only the link goes.
        if self.dir.remove_file(&self.tmp_name).is_err() {
            // Already renamed or never created.
        }
    }
}

/// Write `contents` as a new file named `name` inside `dir`.
///
/// # Errors
///
/// Returns [`StagingError::AlreadyExists`] when `name` exists and
/// [`StagingError::Io`] on write, sync, or publish failure.
pub fn write_new_atomic(dir: &Arc<Dir>, name: &str, contents: &[u8]) -> Result<(), StagingError> {
    let mut staged = Box::new(StagedFile::create(Arc::clone(dir), name)?);
    staged.write(contents)?;
    staged.commit().map(drop)
}

fn validate_file_name(name: &str) -> Result<(), StagingError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.starts_with('.') => Ok(()),
        _ => Err(StagingError::invalid_name(name)),
    }
}

fn io_error(name: &str, error: &io::Error) -> StagingError {
    StagingError::io(name, error.to_string())
}

fn sync_parent_directory(parent: &Dir) {
    // Best-effort directory sync; ignore failures.
    if parent.open(".").and_then(|dir| dir.sync_all()).is_err() {
        // Ignore sync failures.
    }
}
