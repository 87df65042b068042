//! Extraction settings loaded via OrthoConfig.
//!
//! Most fields are optional; accessors apply defaults and validate values so
//! callers see one [`ExtractError::InvalidRequest`] per bad setting.

use std::path::PathBuf;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Deserializer};
use url::Url;

use crate::domain::{DEFAULT_MEMBER_BATCH_SIZE, ExtractError, QueryTimeouts};
use crate::outbound::overpass::OverpassHttpIdentity;

/// Mirrors tried in order when none are configured.
pub const DEFAULT_MIRRORS: [&str; 2] = [
    "https://overpass.kumi.systems/api/interpreter",
    "https://overpass-api.de/api/interpreter",
];

const DEFAULT_OUTPUT_DIR: &str = "data";

/// Configuration shared by the extraction binaries.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "TRANSIT_EXTRACT")]
pub struct ExtractSettings {
    /// Overpass interpreter URLs in priority order; the environment form is
    /// comma-separated.
    #[serde(default, deserialize_with = "one_or_many")]
    pub mirrors: Option<Vec<String>>,
    /// Relation ids per `relation(id:...)` clause of the members query.
    #[ortho_config(default = DEFAULT_MEMBER_BATCH_SIZE)]
    pub member_batch_size: usize,
    /// Timeout of the relation id stage, in seconds.
    pub ids_timeout_secs: Option<u64>,
    /// Timeout of the members stage, in seconds.
    pub members_timeout_secs: Option<u64>,
    /// Timeout of the stations stage, in seconds.
    pub stations_timeout_secs: Option<u64>,
    /// Directory receiving raw documents and layers.
    pub output_dir: Option<PathBuf>,
    /// User agent sent to Overpass.
    pub user_agent: Option<String>,
    /// Contact header sent to Overpass.
    pub contact: Option<String>,
}

impl ExtractSettings {
    /// Configured mirrors, falling back to [`DEFAULT_MIRRORS`].
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidRequest`] when an entry is not an
    /// absolute URL or the list is empty after trimming.
    pub fn mirrors(&self) -> Result<Vec<Url>, ExtractError> {
        let raw: Vec<&str> = match self.mirrors.as_deref() {
            Some(list) => list
                .iter()
                .flat_map(|entry| entry.split(','))
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .collect(),
            None => DEFAULT_MIRRORS.to_vec(),
        };
        if raw.is_empty() {
            return Err(ExtractError::invalid_request(
                "at least one Overpass mirror must be configured",
            ));
        }
        raw.into_iter()
            .map(|entry| {
                Url::parse(entry).map_err(|error| {
                    ExtractError::invalid_request(format!("invalid mirror URL '{entry}': {error}"))
                })
            })
            .collect()
    }

    /// Member batch size, defaulting to [`DEFAULT_MEMBER_BATCH_SIZE`].
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidRequest`] for zero.
    pub fn member_batch_size(&self) -> Result<usize, ExtractError> {
        if self.member_batch_size == 0 {
            return Err(ExtractError::invalid_request(
                "member batch size must be positive",
            ));
        }
        Ok(self.member_batch_size)
    }

    /// Per-stage timeouts with configured overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidRequest`] when a timeout is zero.
    pub fn timeouts(&self) -> Result<QueryTimeouts, ExtractError> {
        let defaults = QueryTimeouts::default();
        Ok(QueryTimeouts {
            relation_ids: seconds("ids", self.ids_timeout_secs, defaults.relation_ids)?,
            members: seconds("members", self.members_timeout_secs, defaults.members)?,
            stations: seconds("stations", self.stations_timeout_secs, defaults.stations)?,
        })
    }

    /// Output directory, falling back to `data`.
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
    }

    /// Identity headers for the HTTP transport.
    pub fn identity(&self) -> OverpassHttpIdentity {
        let defaults = OverpassHttpIdentity::default();
        OverpassHttpIdentity {
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
            contact: self.contact.clone().unwrap_or(defaults.contact),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Accepts a single URL as well as a list; a lone environment value is not
/// split into a sequence.
fn one_or_many<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<OneOrMany>::deserialize(deserializer)?;
    Ok(value.map(|mirrors| match mirrors {
        OneOrMany::One(entry) => vec![entry],
        OneOrMany::Many(entries) => entries,
    }))
}

fn seconds(stage: &str, configured: Option<u64>, fallback: Duration) -> Result<Duration, ExtractError> {
    match configured {
        Some(0) => Err(ExtractError::invalid_request(format!(
            "{stage} timeout must be positive"
        ))),
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Ok(fallback),
    }
}
