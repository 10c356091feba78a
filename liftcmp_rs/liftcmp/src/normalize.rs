use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::table::{Table, TableSlot, TimeRange, TIME_COLUMN};
use crate::{CycleError, DEFAULT_CYCLE_POINTS};

/// Where the target grid ends relative to the last source sample.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum BoundaryConvention {
    /// `K` points on `[0, last)`. The final source sample is never hit.
    #[default]
    HalfOpen,
    /// `K` points on `[0, last]`.
    Inclusive,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NormalizeOptions {
    pub points: usize,
    /// Overrides the rate inferred from the first two time stamps.
    pub sample_rate: Option<f64>,
    pub boundary: BoundaryConvention,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            points: DEFAULT_CYCLE_POINTS,
            sample_rate: None,
            boundary: BoundaryConvention::HalfOpen,
        }
    }
}

/// Columns resampled onto a percentage cycle. Holds no time column; the
/// independent axis is [`NormalizedCycle::percent_axis`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedCycle {
    table: Table,
}

impl NormalizedCycle {
    pub(crate) fn from_table(table: Table) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn into_table(self) -> Table {
        self.table
    }

    pub fn points(&self) -> usize {
        self.table.n_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn names(&self) -> &[String] {
        self.table.names()
    }

    pub fn column(&self, name: &str) -> Option<&Array1<f64>> {
        self.table.column(name)
    }

    pub fn percent_axis(&self) -> Array1<f64> {
        percent_axis(self.points())
    }

    /// The cycle as a table with the percent axis prepended as `axis_name`.
    pub fn to_table(&self, axis_name: &str) -> Result<Table, CycleError> {
        let mut out = Table::new();
        out.push_column(axis_name, self.percent_axis().to_vec())?;
        for (name, values) in self.table.iter() {
            out.push_column(name, values.to_vec())?;
        }
        Ok(out)
    }
}

pub(crate) fn percent_axis(points: usize) -> Array1<f64> {
    Array1::linspace(0.0, 100.0, points)
}

/// Resample one column recorded at `sample_rate` onto `options.points`
/// samples. Trailing NaN are dropped first; an all-NaN or empty column
/// becomes zeros.
pub fn normalize_series(
    values: &[f64],
    sample_rate: f64,
    options: &NormalizeOptions,
) -> Result<Array1<f64>, CycleError> {
    let k = options.points;
    if k == 0 {
        return Err(CycleError::InvalidParameter(
            "number of cycle points must be positive".into(),
        ));
    }
    if !(sample_rate.is_finite() && sample_rate > 0.0) {
        return Err(CycleError::InvalidParameter(format!(
            "sample rate {} must be positive",
            sample_rate
        )));
    }

    let len = values
        .iter()
        .rposition(|v| !v.is_nan())
        .map(|idx| idx + 1)
        .unwrap_or(0);
    match len {
        0 => return Ok(Array1::zeros(k)),
        1 => return Ok(Array1::from_elem(k, values[0])),
        _ => {}
    }
    let values = &values[..len];

    let source_t: Vec<f64> = (0..len).map(|i| i as f64 / sample_rate).collect();
    let last = source_t[len - 1];
    let grid: Vec<f64> = match options.boundary {
        BoundaryConvention::HalfOpen => {
            let step = last / k as f64;
            (0..k).map(|i| i as f64 * step).collect()
        }
        BoundaryConvention::Inclusive if k == 1 => vec![0.0],
        BoundaryConvention::Inclusive => {
            let step = last / (k - 1) as f64;
            (0..k).map(|i| (i as f64 * step).min(last)).collect()
        }
    };
    Ok(Array1::from_vec(interp_sorted(&grid, &source_t, values)))
}

/// Linear interpolation of ascending `targets` over ascending `xp`,
/// holding the end values outside the observed range.
fn interp_sorted(targets: &[f64], xp: &[f64], fp: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(targets.len());
    let mut idx = 0;
    for &x in targets {
        while idx + 2 < xp.len() && xp[idx + 1] < x {
            idx += 1;
        }
        let (x0, y0) = (xp[idx], fp[idx]);
        let (x1, y1) = (xp[idx + 1], fp[idx + 1]);
        let frac = if (x1 - x0).abs() > f64::EPSILON {
            ((x - x0) / (x1 - x0)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        out.push(y0 + (y1 - y0) * frac);
    }
    out
}

fn infer_sample_rate(table: &Table) -> Result<f64, CycleError> {
    let time = table.time().ok_or(CycleError::MissingTimeColumn)?;
    if time.len() < 2 {
        // a single sample resamples to a constant whatever the rate
        return Ok(1.0);
    }
    let delta = time[1] - time[0];
    if !(delta.is_finite() && delta > 0.0) {
        return Err(CycleError::InvalidParameter(format!(
            "cannot infer sample rate from time step {}",
            delta
        )));
    }
    Ok(1.0 / delta)
}

/// Resample every non-time column of `table`. An empty table yields an
/// empty cycle.
pub fn normalize_table(
    table: &Table,
    options: &NormalizeOptions,
) -> Result<NormalizedCycle, CycleError> {
    if table.is_empty() {
        return Ok(NormalizedCycle::default());
    }
    let rate = match options.sample_rate {
        Some(rate) => rate,
        None => infer_sample_rate(table)?,
    };
    let mut out = Table::new();
    for (name, column) in table.iter() {
        if name == TIME_COLUMN {
            continue;
        }
        let values = column.to_vec();
        let resampled = normalize_series(&values, rate, options)?;
        out.push_column(name, resampled.to_vec())?;
    }
    Ok(NormalizedCycle::from_table(out))
}

/// `Ok(None)` for an absent trial, which stays absent.
pub fn normalize_slot(
    slot: &TableSlot,
    options: &NormalizeOptions,
) -> Result<Option<NormalizedCycle>, CycleError> {
    match slot {
        TableSlot::Present(table) => normalize_table(table, options).map(Some),
        TableSlot::Absent(_) => Ok(None),
    }
}

/// Rows with `range.start <= time <= range.end`. The range must lie inside
/// the recording.
pub fn trim_to_range(table: &Table, range: &TimeRange) -> Result<Table, CycleError> {
    range.validate_within(table)?;
    let time = table.time().ok_or(CycleError::MissingTimeColumn)?;
    let rows: Vec<usize> = time
        .iter()
        .enumerate()
        .filter(|&(_, &t)| t >= range.start && t <= range.end)
        .map(|(idx, _)| idx)
        .collect();
    Ok(table.select_rows(&rows))
}

/// Normalize each cycle of `table` and average them point-wise.
pub fn mean_cycle(
    table: &Table,
    ranges: &[TimeRange],
    options: &NormalizeOptions,
) -> Result<NormalizedCycle, CycleError> {
    if ranges.is_empty() {
        return Err(CycleError::InsufficientData("no cycles to average".into()));
    }
    let cycles = ranges
        .iter()
        .map(|range| trim_to_range(table, range).and_then(|t| normalize_table(&t, options)))
        .collect::<Result<Vec<_>, _>>()?;

    let count = cycles.len() as f64;
    let mut out = Table::new();
    for name in cycles[0].names() {
        let mut acc = Array1::<f64>::zeros(options.points);
        for cycle in &cycles {
            match cycle.column(name) {
                Some(column) if column.len() == acc.len() => acc += column,
                _ => {
                    return Err(CycleError::InvalidTable(format!(
                        "cycle is missing column '{}'",
                        name
                    )))
                }
            }
        }
        out.push_column(name.clone(), (acc / count).to_vec())?;
    }
    Ok(NormalizedCycle::from_table(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_table(n: usize, fs: f64) -> Table {
        Table::from_columns(vec![
            ("time", (0..n).map(|i| i as f64 / fs).collect::<Vec<_>>()),
            ("ramp", (0..n).map(|i| i as f64).collect()),
            ("wave", (0..n).map(|i| (i as f64 * 0.05).sin()).collect()),
        ])
        .unwrap()
    }

    #[test]
    fn test_output_length_is_fixed() {
        let options = NormalizeOptions::default();
        for n in [50, 137, 1000] {
            let cycle = normalize_table(&ramp_table(n, 100.0), &options).unwrap();
            assert_eq!(cycle.points(), 101);
            assert_eq!(cycle.names(), &["ramp", "wave"]);
            assert!(cycle.column("wave").unwrap().iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_half_open_grid_excludes_last_sample() {
        let cycle = normalize_table(&ramp_table(201, 100.0), &NormalizeOptions::default()).unwrap();
        let ramp = cycle.column("ramp").unwrap();
        assert!(ramp[0].abs() < 1e-12);
        assert!((ramp[100] - 100.0 * 200.0 / 101.0).abs() < 1e-9);
        assert!(ramp[100] < 200.0);
    }

    #[test]
    fn test_inclusive_grid_reaches_last_sample() {
        let options = NormalizeOptions {
            boundary: BoundaryConvention::Inclusive,
            ..Default::default()
        };
        let cycle = normalize_table(&ramp_table(201, 100.0), &options).unwrap();
        let ramp = cycle.column("ramp").unwrap();
        assert!((ramp[50] - 100.0).abs() < 1e-9);
        assert!((ramp[100] - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_inclusive_renormalization_is_identity() {
        let options = NormalizeOptions {
            boundary: BoundaryConvention::Inclusive,
            ..Default::default()
        };
        let first = normalize_table(&ramp_table(137, 120.0), &options).unwrap();
        let again = normalize_table(&first.to_table(TIME_COLUMN).unwrap(), &options).unwrap();
        for name in ["ramp", "wave"] {
            let a = first.column(name).unwrap();
            let b = again.column(name).unwrap();
            for (x, y) in a.iter().zip(b.iter()) {
                assert!((x - y).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_half_open_renormalization_drifts_less_than_one_sample() {
        let options = NormalizeOptions::default();
        let first = normalize_table(&ramp_table(137, 120.0), &options).unwrap();
        let again = normalize_table(&first.to_table(TIME_COLUMN).unwrap(), &options).unwrap();
        let a = first.column("ramp").unwrap();
        let b = again.column("ramp").unwrap();
        let step = a[1] - a[0];
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() <= step + 1e-9);
        }
    }

    #[test]
    fn test_trailing_nan_and_all_nan() {
        let options = NormalizeOptions {
            points: 5,
            boundary: BoundaryConvention::Inclusive,
            ..Default::default()
        };
        let out = normalize_series(&[0.0, 1.0, 2.0, f64::NAN, f64::NAN], 1.0, &options).unwrap();
        assert!((out[4] - 2.0).abs() < 1e-12);
        assert!((out[2] - 1.0).abs() < 1e-12);

        let zeros = normalize_series(&[f64::NAN; 4], 1.0, &options).unwrap();
        assert_eq!(zeros.to_vec(), vec![0.0; 5]);
        let empty = normalize_series(&[], 1.0, &options).unwrap();
        assert_eq!(empty.len(), 5);
        let constant = normalize_series(&[3.5], 1.0, &options).unwrap();
        assert_eq!(constant.to_vec(), vec![3.5; 5]);
    }

    #[test]
    fn test_missing_time_column_needs_rate() {
        let table = Table::from_columns(vec![("a", vec![1.0, 2.0, 3.0])]).unwrap();
        let err = normalize_table(&table, &NormalizeOptions::default());
        assert!(matches!(err, Err(CycleError::MissingTimeColumn)));

        let options = NormalizeOptions {
            sample_rate: Some(50.0),
            ..Default::default()
        };
        let cycle = normalize_table(&table, &options).unwrap();
        assert_eq!(cycle.points(), 101);
    }

    #[test]
    fn test_non_increasing_time_is_rejected() {
        let table = Table::from_columns(vec![("time", vec![0.0, 0.0, 0.1]), ("a", vec![1.0; 3])])
            .unwrap();
        let err = normalize_table(&table, &NormalizeOptions::default());
        assert!(matches!(err, Err(CycleError::InvalidParameter(_))));
    }

    #[test]
    fn test_empty_table_and_absent_slot() {
        let options = NormalizeOptions::default();
        let empty = normalize_table(&Table::new(), &options).unwrap();
        assert!(empty.is_empty());
        let absent = TableSlot::Absent(crate::table::Absence::MissingFile);
        assert!(normalize_slot(&absent, &options).unwrap().is_none());
    }

    #[test]
    fn test_trim_to_range() {
        let table = ramp_table(101, 100.0);
        let trimmed = trim_to_range(&table, &TimeRange::new(0.2, 0.5).unwrap()).unwrap();
        assert_eq!(trimmed.n_rows(), 31);
        assert!((trimmed.time().unwrap()[0] - 0.2).abs() < 1e-9);
        let outside = TimeRange::new(0.5, 1.5).unwrap();
        assert!(trim_to_range(&table, &outside).is_err());
    }

    #[test]
    fn test_mean_cycle_of_repeated_cycles() {
        let n = 400;
        let table = Table::from_columns(vec![
            ("time", (0..n).map(|i| i as f64 / 100.0).collect::<Vec<_>>()),
            (
                "hip",
                (0..n)
                    .map(|i| (i as f64 / 100.0 * std::f64::consts::TAU).sin())
                    .collect(),
            ),
        ])
        .unwrap();
        let ranges = vec![
            TimeRange::new(0.5, 1.5).unwrap(),
            TimeRange::new(1.5, 2.5).unwrap(),
        ];
        let options = NormalizeOptions::default();
        let mean = mean_cycle(&table, &ranges, &options).unwrap();
        let single = normalize_table(&trim_to_range(&table, &ranges[0]).unwrap(), &options).unwrap();
        for (a, b) in mean.column("hip").unwrap().iter().zip(single.column("hip").unwrap()) {
            assert!((a - b).abs() < 1e-6);
        }
        assert!(mean_cycle(&table, &[], &options).is_err());
    }
}
