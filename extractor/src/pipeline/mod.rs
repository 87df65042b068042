//! End-to-end extraction runs.
//!
//! [`ExtractionPipeline::run`] executes the stages strictly in sequence:
//! relation ids (in memory), relation bodies with members (streamed to
//! disk), optional stations (in memory, merged into the raw document), then
//! resolution and layer output. [`process_saved`] repeats only the last two
//! steps for documents fetched earlier.

mod manifest;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use cap_std::fs::Dir;
use mockable::Clock;
use tracing::{info, warn};
use url::Url;

pub use manifest::{LayerRecord, RawRecord, ReportRecord, RunManifest, StageRecord};

use self::manifest::describe_scope;
use crate::domain::{
    ElementIndex, ExtractError, FetchMode, FetchOutcome, FetchedBody, GeometryResolver,
    LayerAssembler, MirrorFetcher, MirrorFetcherPorts, OsmId, QueryBuilder, QueryClass,
    QueryTimeouts, RawDocument, Resolution, ResolutionReport, RoutePolicy,
};
use crate::outbound::overpass::parse_document;
use crate::outbound::storage::{
    RunNames, read_document_file, read_document_path, sha256_file, write_new_atomic,
};
use crate::presets::CityPreset;

/// Inputs of one extraction run.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    /// City, scope, filters, and policy.
    pub preset: CityPreset,
    /// Mirrors in priority order.
    pub mirrors: Vec<Url>,
    /// Relation ids per members clause.
    pub member_batch_size: usize,
}

/// Drives the staged fetch and writes every artefact into one directory.
pub struct ExtractionPipeline {
    fetcher: MirrorFetcher,
    queries: QueryBuilder,
    output: Arc<Dir>,
    clock: Arc<dyn Clock>,
}

impl ExtractionPipeline {
    /// Create a pipeline writing into `output`.
    ///
    /// The staging store inside `ports` must publish into the same
    /// directory, since the streamed raw document is read back from it.
    pub fn new(
        ports: MirrorFetcherPorts,
        timeouts: QueryTimeouts,
        output: Arc<Dir>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fetcher: MirrorFetcher::new(ports, timeouts),
            queries: QueryBuilder::new(timeouts),
            output,
            clock,
        }
    }

    /// Run every stage for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidRequest`] for unusable scope, filter,
    /// or batch settings, [`ExtractError::AllMirrorsFailed`] when a stage
    /// exhausts its mirrors, [`ExtractError::MalformedResponse`] for bodies
    /// that are not Overpass documents, [`ExtractError::EmptyResult`] when no
    /// route relation matches, and [`ExtractError::Storage`] when an artefact
    /// cannot be written.
    pub async fn run(&self, request: &ExtractionRequest) -> Result<RunManifest, ExtractError> {
        let preset = &request.preset;
        let started_at = self.clock.utc();
        let names = RunNames::new(preset.prefix.as_str(), started_at);
        let mut stages = Vec::new();

        let ids_query = self.queries.build_id_query(&preset.scope, &preset.filter)?;
        let ids_outcome = self
            .fetcher
            .fetch(&ids_query, QueryClass::RelationIds, &request.mirrors, &FetchMode::InMemory)
            .await?;
        let ids_document = self.keep_in_memory(&ids_outcome, &names.ids())?;
        stages.push(StageRecord::new(QueryClass::RelationIds, &ids_outcome, &names.ids()));
        let relation_ids = unique_in_order(ids_document.relation_ids());
        if relation_ids.is_empty() {
            return Err(ExtractError::empty_result(format!(
                "no route relations matched {} in {}",
                preset.filter.route_types.join("/"),
                describe_scope(&preset.scope)
            )));
        }
        info!(city = %preset.city, relations = relation_ids.len(), "route relations discovered");

        let members_query = self
            .queries
            .build_member_query(&relation_ids, request.member_batch_size)?;
        let members_outcome = self
            .fetcher
            .fetch(
                &members_query,
                QueryClass::Members,
                &request.mirrors,
                &FetchMode::Streamed { name: names.raw() },
            )
            .await?;
        let raw_name = match &members_outcome.body {
            FetchedBody::Stored { name } => name.clone(),
            FetchedBody::InMemory(bytes) => {
                write_new_atomic(&self.output, &names.raw(), bytes)?;
                names.raw()
            }
        };
        stages.push(StageRecord::new(QueryClass::Members, &members_outcome, &raw_name));
        let raw_document = read_document_file(&self.output, &raw_name)?;
        let raw_record = RawRecord {
            sha256: sha256_file(&self.output, &raw_name)?,
            elements: raw_document.elements().len(),
            file: raw_name,
        };
        let osm_base = raw_document.meta().osm_base.clone();

        let document = if preset.fetch_stations {
            let (stations, record) = self.fetch_stations(request, &names).await?;
            stages.push(record);
            info!(elements = stations.elements().len(), "merging station nodes");
            raw_document.merged_with(stations)
        } else {
            raw_document
        };

        let (resolution, layers) =
            resolve_and_write(&document, &preset.policy, &names, &self.output)?;
        let manifest = RunManifest {
            city: preset.city.clone(),
            started_at,
            scope: describe_scope(&preset.scope),
            route_types: preset.filter.route_types.clone(),
            network: preset.filter.network.clone(),
            relation_ids: relation_ids.len(),
            osm_base,
            stages,
            raw_document: raw_record,
            layers,
            report: resolution.report.into(),
        };
        write_manifest(&self.output, &names.manifest(), &manifest)?;
        info!(manifest = %names.manifest(), "extraction complete");
        Ok(manifest)
    }

    async fn fetch_stations(
        &self,
        request: &ExtractionRequest,
        names: &RunNames,
    ) -> Result<(RawDocument, StageRecord), ExtractError> {
        let query = self.queries.build_station_query(&request.preset.scope)?;
        let outcome = self
            .fetcher
            .fetch(&query, QueryClass::Stations, &request.mirrors, &FetchMode::InMemory)
            .await?;
        let file = names.stations_raw();
        let stations = self.keep_in_memory(&outcome, &file)?;
        Ok((stations, StageRecord::new(QueryClass::Stations, &outcome, &file)))
    }

    /// Persist an in-memory answer under `name` and decode it.
    fn keep_in_memory(
        &self,
        outcome: &FetchOutcome,
        name: &str,
    ) -> Result<RawDocument, ExtractError> {
        match &outcome.body {
            FetchedBody::InMemory(bytes) => {
                write_new_atomic(&self.output, name, bytes)?;
                parse_document(bytes)
            }
            FetchedBody::Stored { name: stored } => read_document_file(&self.output, stored),
        }
    }
}

/// Inputs of a resolution-only run over saved documents.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    /// Primary raw document, plain or gzip.
    pub input: PathBuf,
    /// Further documents appended after the primary one.
    pub merge: Vec<PathBuf>,
    /// Output file prefix.
    pub prefix: String,
    /// Which ways become route lines.
    pub policy: RoutePolicy,
}

/// Outcome of [`process_saved`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSummary {
    /// Elements across all inputs.
    pub elements: usize,
    /// Written layers.
    pub layers: Vec<LayerRecord>,
    /// Resolution counts.
    pub report: ResolutionReport,
}

/// Resolve saved Overpass documents into layers inside `output`.
///
/// # Errors
///
/// Returns [`ExtractError::Storage`] when an input cannot be read or a layer
/// cannot be written, and [`ExtractError::MalformedResponse`] when an input
/// is not an Overpass document.
pub fn process_saved(
    request: &ProcessRequest,
    output: &Arc<Dir>,
    clock: &dyn Clock,
) -> Result<ProcessSummary, ExtractError> {
    let mut document = read_document_path(&request.input)?;
    for extra in &request.merge {
        info!(input = %extra.display(), "merging saved document");
        document = document.merged_with(read_document_path(extra)?);
    }
    let names = RunNames::new(request.prefix.as_str(), clock.utc());
    let (resolution, layers) = resolve_and_write(&document, &request.policy, &names, output)?;
    Ok(ProcessSummary {
        elements: document.elements().len(),
        layers,
        report: resolution.report,
    })
}

fn resolve_and_write(
    document: &RawDocument,
    policy: &RoutePolicy,
    names: &RunNames,
    output: &Arc<Dir>,
) -> Result<(Resolution, Vec<LayerRecord>), ExtractError> {
    let index = ElementIndex::build(document, &policy.relation_route_types);
    let resolution = GeometryResolver::new(policy.clone()).resolve(&index);
    log_report(&resolution.report);

    let layers = LayerAssembler.assemble(&resolution);
    let mut records = Vec::new();
    for layer in layers.iter() {
        let file = names.layer(layer.kind());
        write_new_atomic(output, &file, &layer.to_bytes()?)?;
        info!(layer = %layer.kind(), features = layer.len(), %file, "layer written");
        records.push(LayerRecord {
            layer: layer.kind().label(),
            file,
            features: layer.len(),
        });
    }
    Ok((resolution, records))
}

fn log_report(report: &ResolutionReport) {
    info!(
        from_relations = report.routes_from_relations,
        from_tags = report.routes_from_tags,
        "routes resolved"
    );
    if report.has_warnings() {
        warn!(
            dropped_ways = report.dropped_ways,
            unresolved_node_refs = report.unresolved_node_refs,
            stations_without_coordinate = report.stations_without_coordinate,
            malformed_coordinates = report.malformed_coordinates,
            skipped_elements = report.skipped_elements,
            duplicates_superseded = report.duplicates_superseded,
            "resolution skipped some elements"
        );
    }
}

fn write_manifest(dir: &Arc<Dir>, name: &str, manifest: &RunManifest) -> Result<(), ExtractError> {
    let bytes = serde_json::to_vec_pretty(manifest)
        .map_err(|error| ExtractError::storage(format!("serialise manifest: {error}")))?;
    Ok(write_new_atomic(dir, name, &bytes)?)
}

fn unique_in_order(ids: Vec<OsmId>) -> Vec<OsmId> {
    let mut seen = BTreeSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
