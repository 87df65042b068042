//! Filesystem adapters for run artefacts.
//!
//! All access goes through `cap_std` directory handles; outputs are written
//! atomically and never overwrite an existing file.

mod atomic_io;

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use cap_std::{ambient_authority, fs::Dir};
use chrono::{DateTime, Utc};
use flate2::read::MultiGzDecoder;
use sha2::{Digest, Sha256};

pub use atomic_io::{DirStagingStore, StagedFile, write_new_atomic};

use crate::domain::{ExtractError, GZIP_MAGIC, LayerKind, RawDocument};
use crate::outbound::overpass::{body_preview, read_document};

/// Decoded bytes read back for the diagnostic of an undecodable document.
const PREVIEW_BYTES: u64 = 4 * 1024;

/// Timestamp format shared by every file of one run.
pub const RUN_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// File names of one extraction run, `<prefix>_<label>_<stamp>.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunNames {
    prefix: String,
    stamp: String,
}

impl RunNames {
    /// Names for a run started at `started_at`.
    pub fn new(prefix: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            prefix: prefix.into(),
            stamp: started_at.format(RUN_STAMP_FORMAT).to_string(),
        }
    }

    /// The run timestamp.
    pub fn stamp(&self) -> &str {
        &self.stamp
    }

    /// Relation id answer.
    pub fn ids(&self) -> String {
        self.name("ids", "json")
    }

    /// Streamed relation bodies and members.
    pub fn raw(&self) -> String {
        self.name("raw", "json")
    }

    /// Station answer kept next to the raw document.
    pub fn stations_raw(&self) -> String {
        self.name("stations_raw", "json")
    }

    /// One output layer.
    pub fn layer(&self, kind: LayerKind) -> String {
        self.name(kind.label(), "geojson")
    }

    /// Run manifest.
    pub fn manifest(&self) -> String {
        self.name("manifest", "json")
    }

    fn name(&self, label: &str, extension: &str) -> String {
        format!("{}_{label}_{}.{extension}", self.prefix, self.stamp)
    }
}

/// Create (if needed) and open an output directory.
///
/// # Errors
///
/// Returns [`ExtractError::Storage`] when the directory cannot be created or
/// opened.
pub fn open_output_dir(path: &Path) -> Result<Arc<Dir>, ExtractError> {
    Dir::create_ambient_dir_all(path, ambient_authority()).map_err(|error| {
        ExtractError::storage(format!(
            "create output directory '{}': {error}",
            path.display()
        ))
    })?;
    let dir = Dir::open_ambient_dir(path, ambient_authority()).map_err(|error| {
        ExtractError::storage(format!("open output directory '{}': {error}", path.display()))
    })?;
    Ok(Arc::new(dir))
}

/// Decode an Overpass document stored as `name` in `dir`, gzip or plain.
///
/// Invalid JSON carries a preview of the decoded head of the file.
///
/// # Errors
///
/// Returns [`ExtractError::Storage`] when the file cannot be read and
/// [`ExtractError::MalformedResponse`] when it is not an Overpass document.
pub fn read_document_file(dir: &Dir, name: &str) -> Result<RawDocument, ExtractError> {
    match read_document(open_decoded(dir, name)?) {
        Err(ExtractError::MalformedResponse {
            message,
            diagnostic: None,
        }) => Err(ExtractError::malformed_response(
            message,
            document_preview(dir, name),
        )),
        other => other,
    }
}

fn open_decoded(dir: &Dir, name: &str) -> Result<Box<dyn Read>, ExtractError> {
    let file = dir
        .open(name)
        .map_err(|error| ExtractError::storage(format!("open '{name}': {error}")))?;
    let mut reader = BufReader::new(file);
    let gzip = reader
        .fill_buf()
        .map_err(|error| ExtractError::storage(format!("read '{name}': {error}")))?
        .starts_with(&GZIP_MAGIC);
    if gzip {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

fn document_preview(dir: &Dir, name: &str) -> Option<String> {
    let mut head = Vec::new();
    let read = open_decoded(dir, name)
        .ok()?
        .take(PREVIEW_BYTES)
        .read_to_end(&mut head);
    if read.is_err() && head.is_empty() {
        return None;
    }
    Some(body_preview(&head)).filter(|text| !text.is_empty())
}

/// Decode an Overpass document at an ambient path.
///
/// # Errors
///
/// As [`read_document_file`], plus [`ExtractError::Storage`] when the path
/// has no file name or its parent cannot be opened.
pub fn read_document_path(path: &Path) -> Result<RawDocument, ExtractError> {
    let (parent, name) = split_path(path)?;
    read_document_file(&parent, &name)
}

/// Hex SHA-256 of a file in `dir`.
///
/// # Errors
///
/// Returns [`ExtractError::Storage`] when the file cannot be read.
pub fn sha256_file(dir: &Dir, name: &str) -> Result<String, ExtractError> {
    let mut file = dir
        .open(name)
        .map_err(|error| ExtractError::storage(format!("open '{name}': {error}")))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 8 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|error| ExtractError::storage(format!("read '{name}': {error}")))?;
        let Some(chunk) = buffer.get(..read).filter(|chunk| !chunk.is_empty()) else {
            break;
        };
        hasher.update(chunk);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hex SHA-256 of in-memory bytes.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn split_path(path: &Path) -> Result<(Dir, String), ExtractError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            ExtractError::storage(format!(
                "input path '{}' must name a UTF-8 file",
                path.display()
            ))
        })?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|error| {
        ExtractError::storage(format!(
            "open input directory '{}': {error}",
            parent.display()
        ))
    })?;
    Ok((dir, name.to_owned()))
}

#[cfg(test)]
mod tests {
    //! Reading and naming coverage.

    use std::io::Write as _;

    use chrono::TimeZone;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    const BODY: &str = r#"{"elements":[{"type":"node","id":1,"lat":35.0,"lon":139.0}]}"#;

    #[fixture]
    fn temp() -> TempDir {
        TempDir::new().expect("create temp dir")
    }

    #[rstest]
    fn names_share_prefix_and_stamp() {
        let started = Utc
            .with_ymd_and_hms(2024, 3, 9, 7, 5, 1)
            .single()
            .expect("valid timestamp");
        let names = RunNames::new("london_tube", started);

        assert_eq!(names.raw(), "london_tube_raw_20240309_070501.json");
        assert_eq!(
            names.layer(LayerKind::Stations),
            "london_tube_stations_20240309_070501.geojson"
        );
        assert_eq!(names.manifest(), "london_tube_manifest_20240309_070501.json");
    }

    #[rstest]
    #[case::plain(false)]
    #[case::gzip(true)]
    fn reads_plain_and_gzip_documents(temp: TempDir, #[case] compressed: bool) {
        let dir = open_output_dir(temp.path()).expect("open dir");
        let contents = if compressed {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(BODY.as_bytes()).expect("compress");
            encoder.finish().expect("finish gzip")
        } else {
            BODY.as_bytes().to_vec()
        };
        write_new_atomic(&dir, "raw.json", &contents).expect("write fixture");

        let document = read_document_file(&dir, "raw.json").expect("document decodes");
        assert_eq!(document.elements().len(), 1);
    }

    #[rstest]
    fn reads_documents_by_path(temp: TempDir) {
        let dir = open_output_dir(temp.path()).expect("open dir");
        write_new_atomic(&dir, "raw.json", BODY.as_bytes()).expect("write fixture");

        let document = read_document_path(&temp.path().join("raw.json")).expect("decodes");
        assert_eq!(document.elements().len(), 1);
    }

    #[rstest]
    fn file_and_byte_digests_agree(temp: TempDir) {
        let dir = open_output_dir(temp.path()).expect("open dir");
        write_new_atomic(&dir, "raw.json", BODY.as_bytes()).expect("write fixture");

        let digest = sha256_file(&dir, "raw.json").expect("digest");
        assert_eq!(digest, sha256_bytes(BODY.as_bytes()));
        assert_eq!(digest.len(), 64);
    }

    #[rstest]
    #[case::plain(false)]
    #[case::gzip(true)]
    fn undecodable_documents_keep_a_preview(temp: TempDir, #[case] compressed: bool) {
        let dir = open_output_dir(temp.path()).expect("open dir");
        let page = format!(
            "<html><p>runtime error: Query ran out of memory</p>{}</html>",
            " ".repeat(8 * 1024)
        );
        let contents = if compressed {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(page.as_bytes()).expect("compress");
            encoder.finish().expect("finish gzip")
        } else {
            page.into_bytes()
        };
        write_new_atomic(&dir, "raw.json", &contents).expect("write fixture");

        let error = read_document_file(&dir, "raw.json").expect_err("not JSON");
        assert!(
            matches!(
                &error,
                ExtractError::MalformedResponse { diagnostic: Some(text), .. }
                    if text.contains("Query ran out of memory")
            ),
            "{error}"
        );
    }

    #[rstest]
    fn missing_files_are_storage_errors(temp: TempDir) {
        let dir = open_output_dir(temp.path()).expect("open dir");
        let error = read_document_file(&dir, "absent.json").expect_err("missing file");
        assert!(matches!(error, ExtractError::Storage { .. }));
    }
}
