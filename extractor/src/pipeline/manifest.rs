//! Run manifest written next to the layers of each extraction.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{FetchOutcome, FetchedBody, QueryClass, ResolutionReport, SpatialScope};

/// What one run fetched, resolved, and wrote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunManifest {
    /// City preset key.
    pub city: String,
    /// Run start, also encoded in every file name.
    pub started_at: DateTime<Utc>,
    /// Human-readable query scope.
    pub scope: String,
    /// Requested `route` values.
    pub route_types: Vec<String>,
    /// Requested `network`, if any.
    pub network: Option<String>,
    /// Route relations discovered by the ids stage.
    pub relation_ids: usize,
    /// OSM base timestamp reported with the members answer.
    pub osm_base: Option<String>,
    /// One entry per executed stage, in order.
    pub stages: Vec<StageRecord>,
    /// The streamed members document.
    pub raw_document: RawRecord,
    /// Written layers, in write order.
    pub layers: Vec<LayerRecord>,
    /// Resolution counts.
    pub report: ReportRecord,
}

/// One fetch stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    /// Stage label.
    pub stage: &'static str,
    /// Mirror that answered.
    pub mirror: String,
    /// File holding the body.
    pub file: String,
    /// Bytes received on the wire.
    pub wire_bytes: u64,
    /// Bytes after gzip decoding.
    pub decoded_bytes: u64,
    /// Whether the body was gzip encoded.
    pub gzip: bool,
    /// Duration of the winning attempt.
    pub elapsed_ms: u64,
    /// Mirrors that failed before the winner, with their errors.
    pub failed_mirrors: Vec<String>,
}

impl StageRecord {
    pub(crate) fn new(class: QueryClass, outcome: &FetchOutcome, file: &str) -> Self {
        Self {
            stage: class.label(),
            mirror: outcome.mirror.to_string(),
            file: match &outcome.body {
                FetchedBody::Stored { name } => name.clone(),
                FetchedBody::InMemory(_) => file.to_owned(),
            },
            wire_bytes: outcome.transfer.wire_bytes,
            decoded_bytes: outcome.decoded_bytes,
            gzip: outcome.gzip,
            elapsed_ms: u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
            failed_mirrors: outcome.failures.iter().map(ToString::to_string).collect(),
        }
    }
}

/// The raw members document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawRecord {
    /// File name.
    pub file: String,
    /// Hex SHA-256 of the file.
    pub sha256: String,
    /// Elements decoded from the file, before merging stations.
    pub elements: usize,
}

/// One written layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerRecord {
    /// Layer label.
    pub layer: &'static str,
    /// File name.
    pub file: String,
    /// Feature count.
    pub features: usize,
}

/// Serialisable copy of a [`ResolutionReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportRecord {
    /// Routes admitted through relation membership.
    pub routes_from_relations: usize,
    /// Routes admitted only by their own tags.
    pub routes_from_tags: usize,
    /// Ways dropped for having fewer than two distinct positions.
    pub dropped_ways: usize,
    /// Node references without a known coordinate.
    pub unresolved_node_refs: usize,
    /// Matching stations without a coordinate.
    pub stations_without_coordinate: usize,
    /// Coordinates rejected while decoding.
    pub malformed_coordinates: usize,
    /// Unknown element records skipped.
    pub skipped_elements: usize,
    /// Duplicate element occurrences superseded.
    pub duplicates_superseded: usize,
}

impl From<ResolutionReport> for ReportRecord {
    fn from(report: ResolutionReport) -> Self {
        Self {
            routes_from_relations: report.routes_from_relations,
            routes_from_tags: report.routes_from_tags,
            dropped_ways: report.dropped_ways,
            unresolved_node_refs: report.unresolved_node_refs,
            stations_without_coordinate: report.stations_without_coordinate,
            malformed_coordinates: report.malformed_coordinates,
            skipped_elements: report.skipped_elements,
            duplicates_superseded: report.duplicates_superseded,
        }
    }
}

pub(crate) fn describe_scope(scope: &SpatialScope) -> String {
    match scope {
        SpatialScope::BoundingBox(bbox) => format!("bbox {bbox}"),
        SpatialScope::AdminArea {
            name_en,
            admin_level,
        } => format!("area name:en={name_en} admin_level={admin_level}"),
    }
}
