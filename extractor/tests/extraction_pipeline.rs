//! End-to-end extraction runs against scripted mirrors and a temporary
//! output directory.

use std::sync::Arc;

use cap_std::{ambient_authority, fs::Dir};
use chrono::{DateTime, TimeZone, Utc};
use rstest::{fixture, rstest};
use serde_json::Value;
use tempfile::TempDir;
use url::Url;

use transit_extract::domain::ports::MirrorAttemptError;
use transit_extract::domain::{
    BoundingBox, ExtractError, MirrorFetcherPorts, QueryClass, QueryTimeouts, RouteFilter,
    RoutePolicy, SpatialScope,
};
use transit_extract::outbound::storage::DirStagingStore;
use transit_extract::pipeline::{ExtractionPipeline, ExtractionRequest};
use transit_extract::presets::CityPreset;
use transit_extract::test_support::{FixedClock, Reply, ScriptedTransport};

const MIRROR_A: &str = "https://overpass.kumi.systems/api/interpreter";
const MIRROR_B: &str = "https://overpass-api.de/api/interpreter";

const IDS: &str = include_str!("fixtures/ids.json");
const MEMBERS: &str = include_str!("fixtures/members.json");
const STATIONS: &str = include_str!("fixtures/stations.json");
const NO_RELATIONS: &str = include_str!("fixtures/no_relations.json");
const TIMEOUT_REMARK: &str = include_str!("fixtures/timeout_remark.json");

struct Workspace {
    temp: TempDir,
    dir: Arc<Dir>,
}

impl Workspace {
    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .dir
            .entries()
            .expect("list output dir")
            .map(|entry| {
                entry
                    .expect("dir entry")
                    .file_name()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        names.sort();
        names
    }

    fn json(&self, name: &str) -> Value {
        let text = self.dir.read_to_string(name).expect("read output file");
        serde_json::from_str(&text).expect("output is JSON")
    }
}

#[fixture]
fn workspace() -> Workspace {
    let temp = TempDir::new().expect("create temp dir");
    let dir = Dir::open_ambient_dir(temp.path(), ambient_authority()).expect("open temp dir");
    Workspace {
        temp,
        dir: Arc::new(dir),
    }
}

#[fixture]
fn started_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0)
        .single()
        .expect("valid timestamp")
}

fn london_request(mirrors: &[&str]) -> ExtractionRequest {
    let filter = RouteFilter::subway_network("London Underground");
    let preset = CityPreset {
        city: "london".to_owned(),
        prefix: "london_tube".to_owned(),
        scope: SpatialScope::BoundingBox(
            BoundingBox::new(51.2868, -0.5103, 51.6919, 0.3340).expect("valid bbox"),
        ),
        policy: RoutePolicy {
            relation_route_types: filter.route_types.clone(),
            ..RoutePolicy::default()
        },
        filter,
        fetch_stations: true,
    };
    ExtractionRequest {
        preset,
        mirrors: mirrors
            .iter()
            .map(|raw| Url::parse(raw).expect("mirror url"))
            .collect(),
        member_batch_size: 1,
    }
}

fn pipeline(
    workspace: &Workspace,
    transport: &Arc<ScriptedTransport>,
    started_at: DateTime<Utc>,
) -> ExtractionPipeline {
    ExtractionPipeline::new(
        MirrorFetcherPorts {
            transport: transport.clone(),
            staging: Arc::new(DirStagingStore::new(Arc::clone(&workspace.dir))),
        },
        QueryTimeouts::default(),
        Arc::clone(&workspace.dir),
        Arc::new(FixedClock(started_at)),
    )
}

#[rstest]
#[tokio::test(flavor = "current_thread")]
async fn full_run_writes_layers_and_manifest(workspace: Workspace, started_at: DateTime<Utc>) {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with_reply(MIRROR_A, Reply::json(IDS))
            .with_reply(MIRROR_A, Reply::json(MEMBERS))
            .with_reply(MIRROR_A, Reply::json(STATIONS)),
    );

    let manifest = pipeline(&workspace, &transport, started_at)
        .run(&london_request(&[MIRROR_A, MIRROR_B]))
        .await
        .expect("run succeeds");

    assert_eq!(
        workspace.names(),
        vec![
            "london_tube_all_20240501_103000.geojson",
            "london_tube_ids_20240501_103000.json",
            "london_tube_manifest_20240501_103000.json",
            "london_tube_raw_20240501_103000.json",
            "london_tube_routes_20240501_103000.geojson",
            "london_tube_stations_20240501_103000.geojson",
            "london_tube_stations_raw_20240501_103000.json",
        ]
    );
    assert_eq!(manifest.relation_ids, 2);
    assert_eq!(manifest.osm_base.as_deref(), Some("2024-05-01T10:00:00Z"));
    assert_eq!(manifest.raw_document.sha256.len(), 64);
    assert_eq!(manifest.report.routes_from_relations, 2);
    assert_eq!(manifest.report.unresolved_node_refs, 1);

    let counts: Vec<(&str, usize)> = manifest
        .layers
        .iter()
        .map(|layer| (layer.layer, layer.features))
        .collect();
    assert_eq!(counts, vec![("routes", 2), ("stations", 2), ("all", 4)]);

    let routes = workspace.json("london_tube_routes_20240501_103000.geojson");
    assert_eq!(routes["type"], "FeatureCollection");
    assert_eq!(routes["crs"]["properties"]["name"], "urn:ogc:def:crs:OGC:1.3:CRS84");
    assert_eq!(routes["features"][0]["properties"]["id"], 100);
    assert_eq!(routes["features"][0]["properties"]["in_relation"], true);

    let written = workspace.json("london_tube_manifest_20240501_103000.json");
    assert_eq!(written["city"], "london");
    assert_eq!(written["stages"].as_array().map(Vec::len), Some(3));
}

#[rstest]
#[tokio::test(flavor = "current_thread")]
async fn members_query_is_batched_and_streamed(workspace: Workspace, started_at: DateTime<Utc>) {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with_reply(MIRROR_A, Reply::json(IDS))
            .with_reply(
                MIRROR_A,
                Reply::Body(MEMBERS.as_bytes().chunks(64).map(<[u8]>::to_vec).collect()),
            )
            .with_reply(MIRROR_A, Reply::json(STATIONS)),
    );

    pipeline(&workspace, &transport, started_at)
        .run(&london_request(&[MIRROR_A]))
        .await
        .expect("run succeeds");

    let calls = transport.calls();
    let classes: Vec<QueryClass> = calls.iter().map(|call| call.class).collect();
    assert_eq!(
        classes,
        vec![QueryClass::RelationIds, QueryClass::Members, QueryClass::Stations]
    );
    let members = &calls[1].query;
    assert!(members.contains("relation(id:10);\n  relation(id:11);"), "{members}");
    assert_eq!(members.matches(">;").count(), 1);
    assert_eq!(
        workspace
            .dir
            .read_to_string("london_tube_raw_20240501_103000.json")
            .expect("raw file"),
        MEMBERS
    );
}

#[rstest]
#[tokio::test(flavor = "current_thread")]
async fn members_stage_falls_back_to_second_mirror(
    workspace: Workspace,
    started_at: DateTime<Utc>,
) {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with_reply(MIRROR_A, Reply::json(IDS))
            .with_reply(
                MIRROR_A,
                Reply::Partial(
                    vec![MEMBERS.as_bytes()[..128].to_vec()],
                    MirrorAttemptError::timeout("240s elapsed"),
                ),
            )
            .with_reply(MIRROR_B, Reply::json(MEMBERS))
            .with_reply(MIRROR_A, Reply::json(STATIONS)),
    );

    let manifest = pipeline(&workspace, &transport, started_at)
        .run(&london_request(&[MIRROR_A, MIRROR_B]))
        .await
        .expect("second mirror rescues the members stage");

    let members = &manifest.stages[1];
    assert_eq!(members.stage, "members");
    assert_eq!(members.mirror, MIRROR_B);
    assert_eq!(members.failed_mirrors.len(), 1);
    assert!(members.failed_mirrors[0].starts_with(MIRROR_A));
    assert!(
        workspace.names().iter().all(|name| !name.starts_with('.')),
        "no staging files remain"
    );
}

#[rstest]
#[tokio::test(flavor = "current_thread")]
async fn no_relations_is_an_empty_result(workspace: Workspace, started_at: DateTime<Utc>) {
    let transport = Arc::new(ScriptedTransport::default().with_reply(MIRROR_A, Reply::json(NO_RELATIONS)));

    let error = pipeline(&workspace, &transport, started_at)
        .run(&london_request(&[MIRROR_A]))
        .await
        .expect_err("no relations must fail");

    assert!(matches!(error, ExtractError::EmptyResult { .. }), "{error}");
    assert_eq!(transport.calls().len(), 1);
    assert_eq!(workspace.names(), vec!["london_tube_ids_20240501_103000.json"]);
}

#[rstest]
#[tokio::test(flavor = "current_thread")]
async fn server_remark_surfaces_as_malformed_response(
    workspace: Workspace,
    started_at: DateTime<Utc>,
) {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with_reply(MIRROR_A, Reply::json(IDS))
            .with_reply(MIRROR_A, Reply::json(TIMEOUT_REMARK)),
    );

    let error = pipeline(&workspace, &transport, started_at)
        .run(&london_request(&[MIRROR_A]))
        .await
        .expect_err("remark-only body must fail");

    assert!(
        error.to_string().contains("Query timed out"),
        "remark should be carried: {error}"
    );
}

#[rstest]
#[tokio::test(flavor = "current_thread")]
async fn rerun_with_same_stamp_never_overwrites(workspace: Workspace, started_at: DateTime<Utc>) {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with_reply(MIRROR_A, Reply::json(IDS))
            .with_reply(MIRROR_A, Reply::json(MEMBERS))
            .with_reply(MIRROR_A, Reply::json(STATIONS))
            .with_reply(MIRROR_A, Reply::json(NO_RELATIONS)),
    );
    let runner = pipeline(&workspace, &transport, started_at);
    let request = london_request(&[MIRROR_A]);
    runner.run(&request).await.expect("first run succeeds");
    let before = workspace
        .dir
        .read_to_string("london_tube_ids_20240501_103000.json")
        .expect("ids file");

    let error = runner.run(&request).await.expect_err("second run must refuse");

    assert!(matches!(error, ExtractError::Storage { .. }), "{error}");
    assert_eq!(
        workspace
            .dir
            .read_to_string("london_tube_ids_20240501_103000.json")
            .expect("ids file"),
        before
    );
    assert!(workspace.temp.path().exists());
}
