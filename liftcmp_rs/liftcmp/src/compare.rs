//! Multi-trial comparison of one kind of file.
//!
//! Every trial is loaded independently; missing or broken files become
//! placeholders so labels stay aligned with their data. The result is a
//! [`ComparisonFigure`], a plotting-backend independent description of the
//! subplot grid, lines and legend.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::grouping::apply_groups;
use crate::labels::{assign_styles, distinguishing_labels, LineStyle};
use crate::loader::load_slot;
use crate::normalize::{normalize_slot, NormalizeOptions, NormalizedCycle};
use crate::settings::Settings;
use crate::table::{Absence, TableSlot, TIME_COLUMN};
use crate::CycleError;

pub const X_LABEL: &str = "Time (%)";

/// One trial's input to a comparison.
#[derive(Clone, Debug)]
pub struct TrialInput {
    pub label: String,
    pub slot: TableSlot,
    /// File the slot was loaded from, for diagnostics.
    pub source: Option<PathBuf>,
}

impl TrialInput {
    pub fn new<S: Into<String>>(label: S, slot: TableSlot) -> Self {
        Self {
            label: label.into(),
            slot,
            source: None,
        }
    }

    pub fn load<S: Into<String>>(label: S, path: &Path) -> Self {
        Self {
            label: label.into(),
            slot: load_slot(path),
            source: Some(path.to_path_buf()),
        }
    }

    fn describe(&self) -> String {
        match &self.source {
            Some(path) => format!("{} ({})", self.label, path.display()),
            None => self.label.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SeriesLine {
    pub label: String,
    pub color_index: usize,
    pub line_style: LineStyle,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct LegendEntry {
    pub label: String,
    pub color_index: usize,
    pub line_style: LineStyle,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Subplot {
    pub column: String,
    /// Display title; long names are split over two lines.
    pub title: String,
    pub row: usize,
    pub col: usize,
    pub show_x_label: bool,
    pub lines: Vec<SeriesLine>,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct GridLayout {
    pub nrows: usize,
    pub ncols: usize,
    /// Cell reserved for the legend, always the last cell of the grid.
    pub legend_cell: (usize, usize),
}

impl GridLayout {
    pub fn cell(&self, index: usize) -> (usize, usize) {
        (index / self.ncols, index % self.ncols)
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ComparisonFigure {
    pub basename: String,
    pub title: String,
    pub layout: GridLayout,
    pub subplots: Vec<Subplot>,
    pub legend: Vec<LegendEntry>,
    /// Trials that contributed nothing, with the reason.
    pub unavailable: Vec<String>,
}

impl ComparisonFigure {
    pub fn file_name(&self, ext: &str) -> String {
        output_file_name(&self.basename, ext)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    Listed,
    InsufficientData { with_data: usize },
    NoCommonColumns,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Listed => write!(f, "listed in skip settings"),
            SkipReason::InsufficientData { with_data } => {
                write!(f, "only {} trial(s) with data", with_data)
            }
            SkipReason::NoCommonColumns => write!(f, "no common columns to plot"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Comparison {
    Figure(ComparisonFigure),
    Skipped { basename: String, reason: SkipReason },
}

impl Comparison {
    pub fn figure(&self) -> Option<&ComparisonFigure> {
        match self {
            Comparison::Figure(figure) => Some(figure),
            Comparison::Skipped { .. } => None,
        }
    }
}

/// File name without directories and extension.
pub fn basename_key(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn output_file_name(basename: &str, ext: &str) -> String {
    format!("{}_comparison.{}", basename, ext)
}

/// Columns shared by every table holding data, without `time`, sorted.
/// Absent and empty tables are ignored rather than intersected.
pub fn common_columns(slots: &[TableSlot]) -> Vec<String> {
    let mut tables = slots.iter().filter(|s| s.has_data()).filter_map(TableSlot::table);
    let Some(first) = tables.next() else {
        return Vec::new();
    };
    let mut common: BTreeSet<String> = first.names().iter().cloned().collect();
    for table in tables {
        common.retain(|name| table.contains(name));
    }
    common.remove(TIME_COLUMN);
    common.into_iter().collect()
}

/// `ceil(sqrt(n))` columns and enough rows for `n` subplots plus the legend.
pub fn grid_layout(n: usize) -> GridLayout {
    let mut ncols = 1;
    while ncols * ncols < n {
        ncols += 1;
    }
    let mut nrows = n.div_ceil(ncols).max(1);
    if nrows * ncols == n {
        nrows += 1;
    }
    GridLayout {
        nrows,
        ncols,
        legend_cell: (nrows - 1, ncols - 1),
    }
}

fn display_title(column: &str) -> String {
    let tokens: Vec<&str> = column.split('_').collect();
    if tokens.len() <= 3 {
        return column.to_string();
    }
    let mid = tokens.len() / 2;
    format!("{}\n{}", tokens[..mid].join("_"), tokens[mid..].join("_"))
}

/// Compare the same file across `paths`. Labels are the distinguishing
/// components of the paths; grouping is looked up by `file_name`.
pub fn compare_files(
    paths: &[PathBuf],
    file_name: &str,
    settings: &Settings,
    options: &NormalizeOptions,
) -> Result<Comparison, CycleError> {
    let labels = distinguishing_labels(paths);
    let trials = labels
        .into_iter()
        .zip(paths)
        .map(|(label, path)| TrialInput::load(label, path))
        .collect();
    compare_slots(file_name, trials, settings, options)
}

/// Compare loaded trials of `file_name`.
pub fn compare_slots(
    file_name: &str,
    trials: Vec<TrialInput>,
    settings: &Settings,
    options: &NormalizeOptions,
) -> Result<Comparison, CycleError> {
    let basename = basename_key(Path::new(file_name));
    if settings.is_skipped(file_name) || settings.is_skipped(&basename) {
        info!("{}: skipped by settings", file_name);
        return Ok(Comparison::Skipped {
            basename,
            reason: SkipReason::Listed,
        });
    }

    let mut unavailable = Vec::new();
    for trial in &trials {
        match &trial.slot {
            TableSlot::Absent(reason) => {
                warn!("{}: {} unavailable: {}", basename, trial.describe(), reason);
                unavailable.push(format!("{}: {}", trial.describe(), reason));
            }
            TableSlot::Present(table) if table.is_empty() => {
                warn!("{}: {} has no rows", basename, trial.describe());
                unavailable.push(format!("{}: no rows", trial.describe()));
            }
            TableSlot::Present(_) => {}
        }
    }

    let with_data = trials.iter().filter(|t| t.slot.has_data()).count();
    if with_data < 2 {
        warn!(
            "{}: {} trial(s) with data, need at least 2, skipping",
            basename, with_data
        );
        return Ok(Comparison::Skipped {
            basename,
            reason: SkipReason::InsufficientData { with_data },
        });
    }

    let mut slots: Vec<TableSlot> = trials.iter().map(|t| t.slot.clone()).collect();
    let mut common = common_columns(&slots);
    report_column_matching(&basename, &trials, &common);

    if let Some(spec) = settings.group_spec(&basename)? {
        info!("{}: applying {} grouping", basename, spec.rule);
        for (slot, trial) in slots.iter_mut().zip(&trials) {
            let grouped = match slot.table() {
                Some(table) if !table.is_empty() => apply_groups(table, &spec),
                _ => continue,
            };
            *slot = match grouped {
                Ok(table) => TableSlot::Present(table),
                Err(err) => {
                    warn!("{}: {} excluded from grouping: {}", basename, trial.describe(), err);
                    unavailable.push(format!("{}: {}", trial.describe(), err));
                    TableSlot::Absent(Absence::Unusable(err.to_string()))
                }
            };
        }
        common = spec.labels();
        common.sort();

        let with_data = slots.iter().filter(|s| s.has_data()).count();
        if with_data < 2 {
            warn!("{}: {} trial(s) left after grouping, skipping", basename, with_data);
            return Ok(Comparison::Skipped {
                basename,
                reason: SkipReason::InsufficientData { with_data },
            });
        }
    }

    let mut normalized = Vec::with_capacity(slots.len());
    for (slot, trial) in slots.iter().zip(&trials) {
        match normalize_slot(slot, options) {
            Ok(cycle) => normalized.push(cycle),
            Err(err) => {
                warn!("{}: {} not normalized: {}", basename, trial.describe(), err);
                unavailable.push(format!("{}: {}", trial.describe(), err));
                normalized.push(None);
            }
        }
    }

    let with_data = normalized
        .iter()
        .filter(|c| matches!(c, Some(c) if !c.is_empty()))
        .count();
    if with_data < 2 {
        warn!("{}: {} trial(s) normalized, skipping", basename, with_data);
        return Ok(Comparison::Skipped {
            basename,
            reason: SkipReason::InsufficientData { with_data },
        });
    }

    let labels: Vec<String> = trials.into_iter().map(|t| t.label).collect();
    let title = format!("Comparison: {}", file_name);
    Ok(build_figure(
        basename,
        title,
        &labels,
        &normalized,
        common,
        unavailable,
        &settings.variant_marker,
    ))
}

/// Figure from cycles that are already normalized, e.g. the left and right
/// mean cycles of one trial.
pub fn compare_cycles(
    basename: &str,
    cycles: &[(String, NormalizedCycle)],
    variant_marker: &str,
) -> Comparison {
    let labels: Vec<String> = cycles.iter().map(|(label, _)| label.clone()).collect();
    let normalized: Vec<Option<NormalizedCycle>> =
        cycles.iter().map(|(_, c)| Some(c.clone())).collect();
    let slots: Vec<TableSlot> = cycles
        .iter()
        .map(|(_, c)| TableSlot::Present(c.table().clone()))
        .collect();
    let with_data = slots.iter().filter(|s| s.has_data()).count();
    if with_data == 0 {
        return Comparison::Skipped {
            basename: basename.to_string(),
            reason: SkipReason::InsufficientData { with_data },
        };
    }
    build_figure(
        basename.to_string(),
        basename.to_string(),
        &labels,
        &normalized,
        common_columns(&slots),
        Vec::new(),
        variant_marker,
    )
}

fn report_column_matching(basename: &str, trials: &[TrialInput], common: &[String]) {
    for trial in trials {
        let Some(table) = trial.slot.table() else {
            continue;
        };
        let extra: Vec<&str> = table
            .names()
            .iter()
            .map(String::as_str)
            .filter(|n| *n != TIME_COLUMN && !common.iter().any(|c| c == n))
            .collect();
        if !extra.is_empty() {
            debug!(
                "{}: {} has {} unmatched column(s): {}",
                basename,
                trial.label,
                extra.len(),
                extra.join(", ")
            );
        }
    }
}

fn build_figure(
    basename: String,
    title: String,
    labels: &[String],
    normalized: &[Option<NormalizedCycle>],
    common: Vec<String>,
    unavailable: Vec<String>,
    variant_marker: &str,
) -> Comparison {
    let columns: Vec<String> = common.into_iter().filter(|c| c != TIME_COLUMN).collect();
    if columns.is_empty() {
        warn!("{}: no common columns to plot, skipping", basename);
        return Comparison::Skipped {
            basename,
            reason: SkipReason::NoCommonColumns,
        };
    }

    let styles = assign_styles(labels, variant_marker);
    let layout = grid_layout(columns.len());
    let n = columns.len();

    let mut subplots = Vec::with_capacity(n);
    for (idx, column) in columns.iter().enumerate() {
        let mut lines = Vec::new();
        for (cycle, style) in normalized.iter().zip(&styles) {
            let Some(cycle) = cycle.as_ref().filter(|c| !c.is_empty()) else {
                continue;
            };
            if let Some(values) = cycle.column(column) {
                lines.push(SeriesLine {
                    label: style.label.clone(),
                    color_index: style.color_index,
                    line_style: style.line_style,
                    x: cycle.percent_axis().to_vec(),
                    y: values.to_vec(),
                });
            }
        }
        let (row, col) = layout.cell(idx);
        subplots.push(Subplot {
            column: column.clone(),
            title: display_title(column),
            row,
            col,
            show_x_label: idx + layout.ncols >= n,
            lines,
        });
    }

    let legend: Vec<LegendEntry> = normalized
        .iter()
        .zip(&styles)
        .filter(|(cycle, _)| matches!(cycle, Some(c) if !c.is_empty()))
        .map(|(_, style)| LegendEntry {
            label: style.label.clone(),
            color_index: style.color_index,
            line_style: style.line_style,
        })
        .collect();

    info!(
        "{}: {} subplot(s), {} trial(s) plotted, {} unavailable",
        basename,
        subplots.len(),
        legend.len(),
        unavailable.len()
    );
    Comparison::Figure(ComparisonFigure {
        basename,
        title,
        layout,
        subplots,
        legend,
        unavailable,
    })
}

/// File names present in at least two of `folders`, restricted to the
/// configured extensions, sorted.
pub fn shared_basenames(folders: &[PathBuf], settings: &Settings) -> Vec<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for folder in folders {
        let entries = match fs::read_dir(folder) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("cannot read folder {}: {}", folder.display(), err);
                continue;
            }
        };
        let mut names = BTreeSet::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let accepted = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| settings.accepts_extension(e))
                .unwrap_or(false);
            if let (true, Some(name)) = (accepted, path.file_name().and_then(|n| n.to_str())) {
                names.insert(name.to_string());
            }
        }
        for name in names {
            *counts.entry(name).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count >= 2)
        .map(|(name, _)| name)
        .collect()
}
