//! Fetch a city's subway network from Overpass and write GeoJSON layers.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Context, Result, eyre};
use mockable::DefaultClock;
use ortho_config::OrthoConfig;
use tokio::runtime::Builder;
use tracing::warn;

use transit_extract::config::ExtractSettings;
use transit_extract::domain::{BoundingBox, MirrorFetcherPorts, RouteFilter, SpatialScope};
use transit_extract::outbound::overpass::OverpassHttpTransport;
use transit_extract::outbound::storage::{DirStagingStore, open_output_dir};
use transit_extract::pipeline::{ExtractionPipeline, ExtractionRequest, RunManifest};
use transit_extract::presets::CityPreset;
use transit_extract::telemetry::{LogFormat, init_tracing};

/// `transit-extract` command arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "transit-extract",
    about = "Fetch subway routes and stations from Overpass into GeoJSON layers",
    version
)]
struct CliArgs {
    /// City preset: `london` or `tokyo`.
    #[arg(long, default_value = "london")]
    city: String,
    /// Replace the preset scope with a bounding box `south,west,north,east`.
    #[arg(long, value_name = "south,west,north,east", value_parser = parse_bbox)]
    bbox: Option<BoundingBox>,
    /// Exact `network` tag of the route relations.
    #[arg(long)]
    network: Option<String>,
    /// `route` value to collect; repeat for several.
    #[arg(long = "route-type", value_name = "type")]
    route_types: Vec<String>,
    /// Also include ways whose own tags look like metro track.
    #[arg(long)]
    union_tags: bool,
    /// With `--union-tags`, also include tram track tagged as metro.
    #[arg(long)]
    include_tram: bool,
    /// Skip the station discovery stage.
    #[arg(long)]
    no_stations: bool,
    /// Output directory; overrides `TRANSIT_EXTRACT_OUTPUT_DIR`.
    #[arg(long, value_name = "path")]
    output_dir: Option<PathBuf>,
    /// Output file prefix; defaults to the preset's.
    #[arg(long)]
    prefix: Option<String>,
    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = CliArgs::parse();
    if let Err(error) = init_tracing(LogFormat::from_flag(args.log_json)) {
        warn!(%error, "tracing init failed");
    }

    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .wrap_err("create Tokio runtime")?;
    let manifest = runtime.block_on(run(args))?;
    report(&manifest);
    Ok(())
}

async fn run(args: CliArgs) -> Result<RunManifest> {
    let settings = ExtractSettings::load_from_iter([OsString::from("transit-extract")])
        .map_err(|error| eyre!("load settings: {error}"))?;
    let preset = apply_overrides(CityPreset::named(&args.city)?, &args);
    let output_dir = args.output_dir.unwrap_or_else(|| settings.output_dir());
    let output = open_output_dir(&output_dir)?;

    let transport = OverpassHttpTransport::new(settings.identity())
        .wrap_err("build Overpass HTTP client")?;
    let pipeline = ExtractionPipeline::new(
        MirrorFetcherPorts {
            transport: Arc::new(transport),
            staging: Arc::new(DirStagingStore::new(Arc::clone(&output))),
        },
        settings.timeouts()?,
        output,
        Arc::new(DefaultClock),
    );
    let request = ExtractionRequest {
        preset,
        mirrors: settings.mirrors()?,
        member_batch_size: settings.member_batch_size()?,
    };
    pipeline
        .run(&request)
        .await
        .wrap_err_with(|| format!("extraction for '{}' failed", request.preset.city))
}

fn apply_overrides(mut preset: CityPreset, args: &CliArgs) -> CityPreset {
    if let Some(bbox) = args.bbox {
        preset.scope = SpatialScope::BoundingBox(bbox);
    }
    if !args.route_types.is_empty() || args.network.is_some() {
        let route_types = if args.route_types.is_empty() {
            preset.filter.route_types.clone()
        } else {
            args.route_types.clone()
        };
        let network = args.network.clone().or_else(|| preset.filter.network.clone());
        preset = preset.with_filter(RouteFilter {
            route_types,
            network,
        });
    }
    preset.policy.union_tagged_ways |= args.union_tags;
    preset.policy.include_tram |= args.include_tram;
    preset.fetch_stations &= !args.no_stations;
    if let Some(prefix) = &args.prefix {
        preset.prefix.clone_from(prefix);
    }
    preset
}

fn parse_bbox(raw: &str) -> Result<BoundingBox, String> {
    BoundingBox::parse(raw).map_err(|error| error.to_string())
}

#[expect(clippy::print_stdout, reason = "summary lines are the command output")]
fn report(manifest: &RunManifest) {
    println!("city={}", manifest.city);
    println!("relation_ids={}", manifest.relation_ids);
    println!("raw_document={}", manifest.raw_document.file);
    println!("raw_sha256={}", manifest.raw_document.sha256);
    for layer in &manifest.layers {
        println!("{}={} ({} features)", layer.layer, layer.file, layer.features);
    }
}
