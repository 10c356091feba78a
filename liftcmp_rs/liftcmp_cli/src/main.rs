use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use liftcmp::{
    basename_key, compare_cycles, compare_slots, distinguishing_labels, load_slot, load_table,
    mean_cycle, normalize_slot, normalize_table, segment_cycles, shared_basenames, summarize,
    write_storage, BoundaryConvention, Comparison, ComparisonFigure, EventTable, ExplicitSide,
    MinLateralInferrer, NormalizeOptions, NormalizedCycle, SegmentOptions, Settings, Side,
    StartingSideInferrer, Table, TableSlot, TrialInput,
};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod backend;
mod cache;
mod render;

use cache::ParseCache;
use render::{render_figure_guard, ChartKind};

#[derive(Parser, Debug)]
#[command(author, version, about = "Cycle normalization and multi-trial comparison CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compare the same file across several trials
    Compare(CompareArgs),
    /// Compare every file found in at least two trial folders
    Folders(FoldersArgs),
    /// Resample one file onto a percentage cycle
    Normalize(NormalizeArgs),
    /// Split a recording into left/right cycles from contact events
    Segment(SegmentArgs),
    /// Point-wise mean and standard deviation across trials
    Summary(SummaryArgs),
}

#[derive(Args, Debug, Clone)]
struct CommonArgs {
    /// Settings JSON (groups, summary rules, skip list)
    #[arg(long, value_hint = ValueHint::FilePath)]
    settings: Option<PathBuf>,

    /// Samples per normalized cycle
    #[arg(long)]
    points: Option<usize>,

    /// Sample rate in Hz; inferred from the time column when omitted
    #[arg(long)]
    sample_rate: Option<f64>,

    /// Include the last sample in the resampling grid
    #[arg(long, action = ArgAction::SetTrue)]
    inclusive: bool,

    /// Image format for figures
    #[arg(long, value_enum, default_value_t = FormatOpt::Png)]
    format: FormatOpt,

    /// Cache parsed tables under .cache/parsed_tables
    #[arg(long, action = ArgAction::SetTrue)]
    cache: bool,

    /// Verbose logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct CompareArgs {
    /// The same kind of file from each trial
    #[arg(required = true, num_args = 2.., value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output directory for the figure
    #[arg(short = 'd', long, default_value = "comparisons", value_hint = ValueHint::DirPath)]
    output_dir: PathBuf,

    /// File name used for settings lookup and the figure name
    #[arg(long)]
    name: Option<String>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Parser, Debug)]
struct FoldersArgs {
    /// Trial folders
    #[arg(required = true, num_args = 2.., value_hint = ValueHint::DirPath)]
    dirs: Vec<PathBuf>,

    #[arg(short = 'd', long, default_value = "comparisons", value_hint = ValueHint::DirPath)]
    output_dir: PathBuf,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Parser, Debug)]
struct NormalizeArgs {
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Output file; `.sto`/`.mot` writes a storage file, anything else CSV
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: PathBuf,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Parser, Debug)]
struct SegmentArgs {
    /// Contact events CSV with t0, tf and optional p_l columns
    #[arg(long, value_hint = ValueHint::FilePath)]
    events: PathBuf,

    /// Kinematics recording used for timing and projection checks
    #[arg(long, value_hint = ValueHint::FilePath)]
    recording: PathBuf,

    /// Side of the first contact (l/r); inferred from contact points otherwise
    #[arg(long)]
    side: Option<Side>,

    /// One-line file naming the side of the first contact
    #[arg(long, conflicts_with = "side", value_hint = ValueHint::FilePath)]
    side_file: Option<PathBuf>,

    /// Recording column used to validate a projected heel strike
    #[arg(long, default_value = "pelvis_list")]
    validate_column: String,

    /// Series averaged per side over the detected cycles
    #[arg(long, value_hint = ValueHint::FilePath)]
    series: Option<PathBuf>,

    #[arg(short = 'd', long, default_value = ".", value_hint = ValueHint::DirPath)]
    output_dir: PathBuf,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Parser, Debug)]
struct SummaryArgs {
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output prefix; writes `<prefix>_mean.csv` and `<prefix>_sd.csv`
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: PathBuf,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FormatOpt {
    Png,
    Svg,
}

impl From<FormatOpt> for ChartKind {
    fn from(value: FormatOpt) -> Self {
        match value {
            FormatOpt::Png => ChartKind::Png,
            FormatOpt::Svg => ChartKind::Svg,
        }
    }
}

impl Command {
    fn common(&self) -> &CommonArgs {
        match self {
            Command::Compare(args) => &args.common,
            Command::Folders(args) => &args.common,
            Command::Normalize(args) => &args.common,
            Command::Segment(args) => &args.common,
            Command::Summary(args) => &args.common,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.command.common().verbose {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Compare(args) => handle_compare(args),
        Command::Folders(args) => handle_folders(args),
        Command::Normalize(args) => handle_normalize(args),
        Command::Segment(args) => handle_segment(args),
        Command::Summary(args) => handle_summary(args),
    }
}

/// Settings file (or defaults) with command-line overrides applied.
fn resolve_settings(common: &CommonArgs) -> Result<Settings> {
    let mut settings = match &common.settings {
        Some(path) => Settings::from_path(path)
            .with_context(|| format!("failed to read settings {}", path.display()))?,
        None => Settings::default(),
    };
    if let Some(points) = common.points {
        if points < 2 {
            return Err(anyhow!("--points must be at least 2"));
        }
        settings.cycle_points = points;
    }
    Ok(settings)
}

fn normalize_options(common: &CommonArgs, settings: &Settings) -> Result<NormalizeOptions> {
    if let Some(rate) = common.sample_rate {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(anyhow!("--sample-rate must be positive, got {}", rate));
        }
    }
    Ok(NormalizeOptions {
        points: settings.cycle_points,
        sample_rate: common.sample_rate,
        boundary: if common.inclusive {
            BoundaryConvention::Inclusive
        } else {
            BoundaryConvention::HalfOpen
        },
    })
}

fn handle_compare(args: CompareArgs) -> Result<()> {
    let settings = resolve_settings(&args.common)?;
    let options = normalize_options(&args.common, &settings)?;
    let file_name = match &args.name {
        Some(name) => name.clone(),
        None => args.inputs[0]
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("cannot derive a name from {}", args.inputs[0].display()))?,
    };
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("failed to create {}", args.output_dir.display()))?;

    let cache = args.common.cache.then(ParseCache::default);
    let labels = distinguishing_labels(&args.inputs);
    let trials = labels
        .into_iter()
        .zip(&args.inputs)
        .map(|(label, path)| load_trial(label, path, cache.as_ref()))
        .collect();
    let comparison = compare_slots(&file_name, trials, &settings, &options)
        .with_context(|| format!("failed to compare {}", file_name))?;

    match comparison {
        Comparison::Figure(figure) => {
            let kind = ChartKind::from(args.common.format);
            let path = write_figure(&figure, &args.output_dir, kind).map_err(|e| anyhow!(e))?;
            info!("Wrote comparison: {}", path.display());
        }
        Comparison::Skipped { basename, reason } => {
            info!("No figure for {}: {}", basename, reason);
        }
    }
    Ok(())
}

enum Outcome {
    Written(PathBuf),
    Skipped(String),
    Failed(String),
}

fn handle_folders(args: FoldersArgs) -> Result<()> {
    let started = Instant::now();
    let settings = resolve_settings(&args.common)?;
    let options = normalize_options(&args.common, &settings)?;
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("failed to create {}", args.output_dir.display()))?;

    let names = shared_basenames(&args.dirs, &settings);
    if names.is_empty() {
        warn!("No file found in at least two of the {} folders", args.dirs.len());
        return Ok(());
    }
    info!("Found {} files to compare", names.len());

    let cache = args.common.cache.then(ParseCache::default);
    let labels = distinguishing_labels(&args.dirs);
    let kind = ChartKind::from(args.common.format);
    let outcomes: Vec<(String, Outcome)> = names
        .par_iter()
        .map(|name| {
            let trials = labels
                .iter()
                .zip(&args.dirs)
                .map(|(label, dir)| load_trial(label.clone(), &dir.join(name), cache.as_ref()))
                .collect();
            let outcome = match compare_slots(name, trials, &settings, &options) {
                Ok(Comparison::Figure(figure)) => {
                    match write_figure(&figure, &args.output_dir, kind) {
                        Ok(path) => Outcome::Written(path),
                        Err(err) => Outcome::Failed(err),
                    }
                }
                Ok(Comparison::Skipped { reason, .. }) => Outcome::Skipped(reason.to_string()),
                Err(err) => Outcome::Failed(err.to_string()),
            };
            (name.clone(), outcome)
        })
        .collect();

    let mut written = 0;
    let mut skipped = Vec::new();
    for (name, outcome) in &outcomes {
        match outcome {
            Outcome::Written(path) => {
                written += 1;
                info!("Wrote comparison: {}", path.display());
            }
            Outcome::Skipped(reason) => {
                info!("Skipped {}: {}", name, reason);
                skipped.push(name.as_str());
            }
            Outcome::Failed(err) => {
                warn!("Failed {}: {}", name, err);
                skipped.push(name.as_str());
            }
        }
    }
    info!(
        "{} figure(s) written to {} in {:.2?}; skipped: [{}]",
        written,
        args.output_dir.display(),
        started.elapsed(),
        skipped.join(", ")
    );
    Ok(())
}

fn handle_normalize(args: NormalizeArgs) -> Result<()> {
    let settings = resolve_settings(&args.common)?;
    let options = normalize_options(&args.common, &settings)?;
    let cache = args.common.cache.then(ParseCache::default);
    let table = load_input(&args.input, cache.as_ref())?;
    let cycle = normalize_table(&table, &options)
        .with_context(|| format!("failed to normalize {}", args.input.display()))?;
    write_cycle(&cycle, &args.output)?;
    info!(
        "Wrote {} columns x {} points: {}",
        cycle.names().len(),
        cycle.points(),
        args.output.display()
    );
    Ok(())
}

fn handle_segment(args: SegmentArgs) -> Result<()> {
    let settings = resolve_settings(&args.common)?;
    let options = normalize_options(&args.common, &settings)?;
    let events = EventTable::from_csv(&args.events)
        .with_context(|| format!("failed to read events {}", args.events.display()))?;
    let cache = args.common.cache.then(ParseCache::default);
    let recording = load_input(&args.recording, cache.as_ref())?;

    let inferrer: Box<dyn StartingSideInferrer> = match (&args.side, &args.side_file) {
        (Some(side), _) => Box::new(ExplicitSide(*side)),
        (None, Some(path)) => Box::new(
            ExplicitSide::from_side_file(path)
                .with_context(|| format!("failed to read side file {}", path.display()))?,
        ),
        (None, None) => Box::new(MinLateralInferrer),
    };
    let segment_options = SegmentOptions {
        validate_column: args.validate_column.clone(),
        ..SegmentOptions::default()
    };
    let segmentation = segment_cycles(&events, &recording, inferrer.as_ref(), &segment_options);
    for note in &segmentation.notes {
        warn!("{}: {}", args.events.display(), note);
    }

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("failed to create {}", args.output_dir.display()))?;
    let stem = basename_key(&args.recording);
    let cycles_path = args.output_dir.join(format!("{}_cycles.csv", stem));
    let mut writer = csv::Writer::from_path(&cycles_path)
        .with_context(|| format!("failed to create {}", cycles_path.display()))?;
    writer.write_record(["side", "cycle", "start", "end"])?;
    for side in [Side::Left, Side::Right] {
        for (idx, range) in segmentation.cycles(side).iter().enumerate() {
            info!("{} cycle {}: {:.3}s - {:.3}s", side, idx + 1, range.start, range.end);
            writer.write_record([
                side.to_string(),
                (idx + 1).to_string(),
                format!("{:.6}", range.start),
                format!("{:.6}", range.end),
            ])?;
        }
    }
    writer.flush()?;
    info!("Wrote cycles: {}", cycles_path.display());

    let Some(series_path) = &args.series else {
        return Ok(());
    };
    let series = load_input(series_path, cache.as_ref())?;
    let series_stem = basename_key(series_path);
    let mut means: Vec<(String, NormalizedCycle)> = Vec::new();
    for side in [Side::Left, Side::Right] {
        let ranges = segmentation.cycles(side);
        if ranges.is_empty() {
            continue;
        }
        match mean_cycle(&series, ranges, &options) {
            Ok(cycle) => {
                let path = args
                    .output_dir
                    .join(format!("{}_{}_mean.csv", series_stem, side.short()));
                write_cycle(&cycle, &path)?;
                info!("Wrote {} mean cycle: {}", side, path.display());
                means.push((side.to_string(), cycle));
            }
            Err(err) => warn!("{}: no {} mean cycle: {}", series_path.display(), side, err),
        }
    }

    if let Comparison::Figure(figure) =
        compare_cycles(&series_stem, &means, &settings.variant_marker)
    {
        let kind = ChartKind::from(args.common.format);
        match write_figure(&figure, &args.output_dir, kind) {
            Ok(path) => info!("Wrote left/right comparison: {}", path.display()),
            Err(err) => warn!("Failed to render {}: {}", series_stem, err),
        }
    }
    Ok(())
}

fn handle_summary(args: SummaryArgs) -> Result<()> {
    let settings = resolve_settings(&args.common)?;
    let options = normalize_options(&args.common, &settings)?;
    let cache = args.common.cache.then(ParseCache::default);
    let mut cycles = Vec::new();
    for path in &args.inputs {
        let slot = load_trial(path.display().to_string(), path, cache.as_ref()).slot;
        match normalize_slot(&slot, &options) {
            Ok(Some(cycle)) if !cycle.is_empty() => cycles.push(cycle),
            Ok(_) => warn!("{}: no data, left out of summary", path.display()),
            Err(err) => warn!("{}: left out of summary: {}", path.display(), err),
        }
    }
    let summary = summarize(&cycles).context("failed to summarize cycles")?;

    let mean_path = with_suffix(&args.output, "_mean.csv");
    let sd_path = with_suffix(&args.output, "_sd.csv");
    write_cycle(&summary.mean, &mean_path)?;
    write_cycle(&summary.sd, &sd_path)?;
    info!(
        "Summarized {} trial(s): {}, {}",
        summary.count,
        mean_path.display(),
        sd_path.display()
    );
    Ok(())
}

fn load_trial(label: String, path: &Path, cache: Option<&ParseCache>) -> TrialInput {
    let slot = match cache.map(|c| c.load(path)) {
        Some(Ok(table)) => TableSlot::Present(table),
        // load_slot records why the trial is unavailable
        _ => load_slot(path),
    };
    TrialInput {
        label,
        slot,
        source: Some(path.to_path_buf()),
    }
}

fn load_input(path: &Path, cache: Option<&ParseCache>) -> Result<Table> {
    match cache {
        Some(cache) => cache.load(path),
        None => load_table(path).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn write_figure(
    figure: &ComparisonFigure,
    output_dir: &Path,
    kind: ChartKind,
) -> Result<PathBuf, String> {
    for note in &figure.unavailable {
        debug!("{}: unavailable {}", figure.basename, note);
    }
    let path = output_dir.join(figure.file_name(kind.extension()));
    render_figure_guard(figure, &path, kind)
        .map_err(|e| format!("{}: {}", path.display(), e))?;
    Ok(path)
}

/// Storage file for `.sto`/`.mot` outputs, CSV with a `percent` column
/// otherwise.
fn write_cycle(cycle: &NormalizedCycle, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if ext == "sto" || ext == "mot" {
        let table = cycle.to_table("time")?;
        let file =
            fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        write_storage(&table, &basename_key(path), io::BufWriter::new(file))?;
        return Ok(());
    }
    let table = cycle.to_table("percent")?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    write_table_rows(&table, &mut writer)?;
    Ok(())
}

fn write_table_rows<W: io::Write>(table: &Table, writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record(table.names())?;
    let columns: Vec<_> = table.iter().map(|(_, c)| c).collect();
    for row in 0..table.n_rows() {
        writer.write_record(columns.iter().map(|c| format!("{:.6}", c[row])))?;
    }
    writer.flush()?;
    Ok(())
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_with_suffix() {
        assert_eq!(
            with_suffix(Path::new("out/squat"), "_mean.csv"),
            PathBuf::from("out/squat_mean.csv")
        );
    }

    #[test]
    fn test_write_cycle_csv_and_storage() {
        let dir = TempDir::new().unwrap();
        let source = Table::from_columns(vec![
            ("time", (0..50).map(|i| i as f64 / 100.0).collect::<Vec<_>>()),
            ("knee", (0..50).map(|i| i as f64).collect()),
        ])
        .unwrap();
        let cycle = normalize_table(&source, &NormalizeOptions::default()).unwrap();

        let csv_path = dir.path().join("knee.csv");
        write_cycle(&cycle, &csv_path).unwrap();
        let text = fs::read_to_string(&csv_path).unwrap();
        assert!(text.starts_with("percent,knee\n"));
        assert_eq!(text.lines().count(), 102);

        let sto_path = dir.path().join("nested").join("knee.sto");
        write_cycle(&cycle, &sto_path).unwrap();
        let back = load_table(&sto_path).unwrap();
        assert_eq!(back.n_rows(), 101);
        assert!(back.contains("knee"));
    }

    #[test]
    fn test_cli_parses_segment_side() {
        let cli = Cli::try_parse_from([
            "liftcmp",
            "segment",
            "--events",
            "steps.csv",
            "--recording",
            "IK.mot",
            "--side",
            "r",
        ])
        .unwrap();
        match cli.command {
            Command::Segment(args) => assert_eq!(args.side, Some(Side::Right)),
            other => panic!("unexpected command {:?}", other),
        }
        assert!(Cli::try_parse_from(["liftcmp", "compare", "only_one.sto"]).is_err());
    }
}
