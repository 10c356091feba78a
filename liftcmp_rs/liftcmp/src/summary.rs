use ndarray::{Array1, Array2, Axis};
use tracing::debug;

use crate::normalize::NormalizedCycle;
use crate::table::Table;
use crate::CycleError;

/// Point-wise statistics over several normalized cycles.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleSummary {
    pub count: usize,
    pub mean: NormalizedCycle,
    /// Sample standard deviation; zero when `count == 1`.
    pub sd: NormalizedCycle,
}

/// Mean and standard deviation of the columns shared by every non-empty
/// cycle. All cycles must have the same number of points.
pub fn summarize(cycles: &[NormalizedCycle]) -> Result<CycleSummary, CycleError> {
    let present: Vec<&NormalizedCycle> = cycles.iter().filter(|c| !c.is_empty()).collect();
    let Some(first) = present.first() else {
        return Err(CycleError::InsufficientData("no cycles to summarize".into()));
    };
    let points = first.points();
    if let Some(odd) = present.iter().find(|c| c.points() != points) {
        return Err(CycleError::InvalidTable(format!(
            "cycles have {} and {} points",
            points,
            odd.points()
        )));
    }

    let columns: Vec<&String> = first
        .names()
        .iter()
        .filter(|name| present.iter().all(|c| c.column(name).is_some()))
        .collect();
    debug!("summarizing {} cycles over {} columns", present.len(), columns.len());

    let n = present.len();
    let mut mean = Table::new();
    let mut sd = Table::new();
    for name in columns {
        let mut stacked = Array2::<f64>::zeros((n, points));
        for (row, cycle) in present.iter().enumerate() {
            if let Some(values) = cycle.column(name) {
                stacked.row_mut(row).assign(values);
            }
        }
        let column_mean = stacked
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(points));
        let column_sd = if n > 1 {
            stacked.std_axis(Axis(0), 1.0)
        } else {
            Array1::zeros(points)
        };
        mean.push_column(name.clone(), column_mean.to_vec())?;
        sd.push_column(name.clone(), column_sd.to_vec())?;
    }

    Ok(CycleSummary {
        count: n,
        mean: NormalizedCycle::from_table(mean),
        sd: NormalizedCycle::from_table(sd),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle(columns: &[(&str, Vec<f64>)]) -> NormalizedCycle {
        NormalizedCycle::from_table(
            Table::from_columns(columns.iter().map(|(n, v)| (*n, v.clone()))).unwrap(),
        )
    }

    #[test]
    fn test_mean_and_sd() {
        let cycles = vec![
            cycle(&[("a", vec![1.0, 2.0, 3.0]), ("b", vec![0.0; 3])]),
            cycle(&[("a", vec![3.0, 2.0, 1.0])]),
            NormalizedCycle::default(),
        ];
        let summary = summarize(&cycles).unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.mean.names(), &["a"]);
        assert_eq!(summary.mean.column("a").unwrap().to_vec(), vec![2.0, 2.0, 2.0]);
        let sd = summary.sd.column("a").unwrap();
        assert!((sd[0] - 2f64.sqrt()).abs() < 1e-12);
        assert!(sd[1].abs() < 1e-12);
    }

    #[test]
    fn test_single_cycle_has_zero_sd() {
        let summary = summarize(&[cycle(&[("a", vec![1.0, 5.0])])]).unwrap();
        assert_eq!(summary.sd.column("a").unwrap().to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_mismatched_lengths_and_empty_input() {
        let cycles = vec![cycle(&[("a", vec![1.0, 2.0])]), cycle(&[("a", vec![1.0])])];
        assert!(matches!(summarize(&cycles), Err(CycleError::InvalidTable(_))));
        assert!(matches!(summarize(&[]), Err(CycleError::InsufficientData(_))));
    }
}
