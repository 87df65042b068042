//! Resolve saved Overpass documents into GeoJSON layers without fetching.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{Context, Result, eyre};
use mockable::DefaultClock;
use ortho_config::OrthoConfig;
use tracing::{info, warn};

use transit_extract::config::ExtractSettings;
use transit_extract::domain::{DEFAULT_RELATION_ROUTE_TYPES, RoutePolicy};
use transit_extract::outbound::storage::open_output_dir;
use transit_extract::pipeline::{ProcessRequest, ProcessSummary, process_saved};
use transit_extract::telemetry::{LogFormat, init_tracing};

/// `process-overpass` command arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "process-overpass",
    about = "Process saved Overpass JSON (plain or gzip) into GeoJSON layers",
    version
)]
struct CliArgs {
    /// Saved Overpass document, `.json` or gzip.
    input: PathBuf,
    /// Further saved documents to append, e.g. a station answer.
    #[arg(long, value_name = "path")]
    merge: Vec<PathBuf>,
    /// Output directory; overrides `TRANSIT_EXTRACT_OUTPUT_DIR`.
    #[arg(long, alias = "out", value_name = "path")]
    output_dir: Option<PathBuf>,
    /// Output file prefix.
    #[arg(long, default_value = "tokyo_subway")]
    prefix: String,
    /// Relation `route` value whose way members are routes; repeat for several.
    #[arg(long = "route-type", value_name = "type")]
    route_types: Vec<String>,
    /// Union relation members with tag-matched lines.
    #[arg(long)]
    union_tags: bool,
    /// Allow tram lines when tagged like subway or light rail.
    #[arg(long)]
    include_tram: bool,
    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

impl CliArgs {
    fn policy(&self) -> RoutePolicy {
        let relation_route_types = if self.route_types.is_empty() {
            DEFAULT_RELATION_ROUTE_TYPES.map(str::to_owned).to_vec()
        } else {
            self.route_types.clone()
        };
        RoutePolicy {
            relation_route_types,
            union_tagged_ways: self.union_tags,
            include_tram: self.include_tram,
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = CliArgs::parse();
    if let Err(error) = init_tracing(LogFormat::from_flag(args.log_json)) {
        warn!(%error, "tracing init failed");
    }

    let output_dir = match args.output_dir.clone() {
        Some(path) => path,
        None => ExtractSettings::load_from_iter([OsString::from("process-overpass")])
            .map_err(|error| eyre!("load settings: {error}"))?
            .output_dir(),
    };
    let output = open_output_dir(&output_dir)?;
    let request = ProcessRequest {
        policy: args.policy(),
        input: args.input,
        merge: args.merge,
        prefix: args.prefix,
    };
    info!(input = %request.input.display(), "processing saved document");
    let summary = process_saved(&request, &output, &DefaultClock)
        .wrap_err_with(|| format!("processing '{}' failed", request.input.display()))?;
    report(&summary);
    Ok(())
}

#[expect(clippy::print_stdout, reason = "summary lines are the command output")]
fn report(summary: &ProcessSummary) {
    println!("elements={}", summary.elements);
    println!(
        "routes_from_relations={} routes_from_tags={} dropped_ways={}",
        summary.report.routes_from_relations,
        summary.report.routes_from_tags,
        summary.report.dropped_ways
    );
    for layer in &summary.layers {
        println!("{}={} ({} features)", layer.layer, layer.file, layer.features);
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for argument handling.

    use clap::Parser;
    use rstest::rstest;

    use super::CliArgs;

    #[rstest]
    fn flags_shape_the_route_policy() {
        let args = CliArgs::try_parse_from([
            "process-overpass",
            "overpass_raw_tokyo.json.gz",
            "--union-tags",
            "--include-tram",
            "--merge",
            "stations.json",
        ])
        .expect("arguments parse");

        let policy = args.policy();
        assert!(policy.union_tagged_ways && policy.include_tram);
        assert_eq!(policy.relation_route_types, vec!["subway", "light_rail"]);
        assert_eq!(args.merge.len(), 1);
        assert_eq!(args.prefix, "tokyo_subway");
    }

    #[rstest]
    fn route_types_can_be_narrowed() {
        let args = CliArgs::try_parse_from(["process-overpass", "raw.json", "--route-type", "subway"])
            .expect("arguments parse");
        assert_eq!(args.policy().relation_route_types, vec!["subway"]);
    }
}
