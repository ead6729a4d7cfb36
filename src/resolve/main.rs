//! ZIP coverage resolver.
//!
//! Loads a state's ZCTA collection once, then resolves the ZIPs covering
//! each place boundary and writes a JSON report.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use walkdir::WalkDir;

use zipcover::config::Config;
use zipcover::coverage::{CoverageEngine, ResolveOptions, ResolveReport};
use zipcover::geojson::{read_features, FeatureCollection};
use zipcover::grouping::{CityZipTable, CsvCityZipTable, MetroRules};
use zipcover::models::PlaceBoundary;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "resolve")]
#[command(about = "Resolve the ZIP codes covering place boundaries")]
struct Args {
    /// ZCTA FeatureCollection for the place's state (.geojson or .geojson.gz)
    #[arg(short, long)]
    zctas: PathBuf,

    /// Place boundary file; may be given more than once
    #[arg(short, long)]
    place: Vec<PathBuf>,

    /// Directory scanned recursively for place boundary files
    #[arg(long)]
    places_dir: Option<PathBuf>,

    /// Place name, overriding the feature's properties
    #[arg(long)]
    name: Option<String>,

    /// State name or abbreviation, overriding the feature's properties
    #[arg(long)]
    state: Option<String>,

    /// City/ZIP CSV used to group metro results by city
    #[arg(long)]
    city_table: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overlap ratio at which a ZIP is kept (0-1)
    #[arg(long)]
    threshold: Option<f64>,

    /// Only keep ZIPs that reach the threshold
    #[arg(long)]
    no_centroid_bias: bool,

    /// Include simplified clip geometries in the report
    #[arg(long)]
    simplify_meters: Option<f64>,

    /// Output file (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlaceOutput {
    source: String,
    #[serde(flatten)]
    report: ResolveReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    features: Option<FeatureCollection>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunOutput {
    generated_at: DateTime<Utc>,
    zcta_file: String,
    zcta_count: usize,
    skipped_zctas: usize,
    results: Vec<PlaceOutput>,
    failures: Vec<String>,
}

fn is_geojson(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    [".geojson", ".json", ".geojson.gz", ".json.gz"]
        .iter()
        .any(|ext| name.ends_with(ext))
}

/// Explicit place files first, then the directory scan in path order.
fn collect_place_files(files: &[PathBuf], dir: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = files.to_vec();
    if let Some(dir) = dir {
        let mut found: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_geojson(e.path()))
            .map(|e| e.into_path())
            .collect();
        found.sort();
        paths.extend(found);
    }
    paths
}

fn load_place(path: &Path, name: Option<&str>, state: Option<&str>) -> Result<PlaceBoundary> {
    let features = read_features(path)?;
    let feature = features
        .first()
        .with_context(|| format!("No features in {}", path.display()))?;
    if features.len() > 1 {
        warn!(
            "{} has {} features, using the first",
            path.display(),
            features.len()
        );
    }
    let place = PlaceBoundary::from_feature(feature, name, state)
        .with_context(|| format!("Invalid place boundary in {}", path.display()))?;
    Ok(place)
}

fn resolve_one(
    engine: &CoverageEngine,
    table: Option<&dyn CityZipTable>,
    rules: &MetroRules,
    options: &ResolveOptions,
    simplify_meters: Option<f64>,
    path: &Path,
    name: Option<&str>,
    state: Option<&str>,
) -> Result<PlaceOutput> {
    let place = load_place(path, name, state)?;
    let resolution = engine.resolve(&place, options);

    if !resolution.stats.meets_minimum(zipcover::coverage::stats::DEFAULT_MIN_COVERAGE_PERCENT) {
        warn!(
            "Low coverage for {}: {}%",
            resolution.place_name, resolution.stats.coverage_percent
        );
    }

    let grouping = table.map(|t| resolution.group_by_city(t, rules));
    let features = simplify_meters.map(|m| resolution.display_features(Some(m)));

    Ok(PlaceOutput {
        source: path.display().to_string(),
        report: resolution.report(grouping),
        features,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };

    let mut options = config.resolve_options();
    if let Some(threshold) = args.threshold {
        options.scoring.threshold = threshold;
    }
    if args.no_centroid_bias {
        options.scoring.centroid_bias = false;
    }
    if !options.scoring.is_valid() {
        anyhow::bail!("Threshold {} is outside [0, 1]", options.scoring.threshold);
    }
    let simplify_meters = args.simplify_meters.or(config.display.simplify_meters);

    let place_files = collect_place_files(&args.place, args.places_dir.as_deref());
    if place_files.is_empty() {
        anyhow::bail!("No place boundaries given; use --place or --places-dir");
    }

    info!("ZIP coverage resolver");
    info!("ZCTAs: {}", args.zctas.display());
    info!(
        "Threshold: {}, centroid bias: {}, fallback: {:?}",
        options.scoring.threshold, options.scoring.centroid_bias, options.fallback
    );

    let zcta_features = read_features(&args.zctas)?;
    let engine = Arc::new(CoverageEngine::from_features(&zcta_features));
    drop(zcta_features);
    info!("Indexed {} ZCTAs ({} skipped)", engine.len(), engine.skipped());

    let table: Option<Arc<CsvCityZipTable>> = match &args.city_table {
        Some(path) => Some(Arc::new(CsvCityZipTable::load(path)?)),
        None => None,
    };
    let rules = Arc::new(config.grouping.clone());
    let timeout = Duration::from_secs(config.runtime.timeout_secs);

    let pb = ProgressBar::new(place_files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} places",
            )?
            .progress_chars("#>-"),
    );

    let outcomes: Vec<(PathBuf, Result<PlaceOutput>)> = stream::iter(place_files)
        .map(|path| {
            let engine = engine.clone();
            let table = table.clone();
            let rules = rules.clone();
            let name = args.name.clone();
            let state = args.state.clone();
            let pb = pb.clone();
            async move {
                let task_path = path.clone();
                let task = tokio::task::spawn_blocking(move || {
                    resolve_one(
                        &engine,
                        table.as_deref().map(|t| t as &dyn CityZipTable),
                        &rules,
                        &options,
                        simplify_meters,
                        &task_path,
                        name.as_deref(),
                        state.as_deref(),
                    )
                });
                let result = match tokio::time::timeout(timeout, task).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => Err(anyhow::anyhow!("Resolver task failed: {}", e)),
                    Err(_) => Err(anyhow::anyhow!("Timed out after {:?}", timeout)),
                };
                pb.inc(1);
                (path, result)
            }
        })
        .buffer_unordered(config.runtime.max_parallel)
        .collect()
        .await;

    pb.finish_with_message("done");

    let mut results = Vec::new();
    let mut failures = Vec::new();
    for (path, outcome) in outcomes {
        match outcome {
            Ok(output) => results.push(output),
            Err(e) => {
                warn!("Failed to resolve {}: {:#}", path.display(), e);
                failures.push(format!("{}: {:#}", path.display(), e));
            }
        }
    }
    results.sort_by(|a, b| a.source.cmp(&b.source));

    info!(
        "Resolved {} places, {} failures",
        results.len(),
        failures.len()
    );

    let output = RunOutput {
        generated_at: Utc::now(),
        zcta_file: args.zctas.display().to_string(),
        zcta_count: engine.len(),
        skipped_zctas: engine.skipped(),
        results,
        failures,
    };

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &output)?;
            writer.flush()?;
            info!("Wrote report to {}", path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            serde_json::to_writer_pretty(&mut writer, &output)?;
            writeln!(writer)?;
        }
    }

    Ok(())
}
