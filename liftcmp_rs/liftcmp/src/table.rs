use std::collections::HashSet;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::CycleError;

pub const TIME_COLUMN: &str = "time";

/// Column-major table of named numeric columns of equal length.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Array1<f64>>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `(name, values)` pairs. Names must be unique and
    /// every column must have the same length.
    pub fn from_columns<I, S>(columns: I) -> Result<Self, CycleError>
    where
        I: IntoIterator<Item = (S, Vec<f64>)>,
        S: Into<String>,
    {
        let mut table = Table::new();
        for (name, values) in columns {
            table.push_column(name, values)?;
        }
        Ok(table)
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn n_columns(&self) -> usize {
        self.names.len()
    }

    /// A table with zero rows. This is a present-but-empty file, not a
    /// missing one; see [`TableSlot`].
    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn column(&self, name: &str) -> Option<&Array1<f64>> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| &self.columns[idx])
    }

    pub fn time(&self) -> Option<&Array1<f64>> {
        self.column(TIME_COLUMN)
    }

    pub fn last_time(&self) -> Option<f64> {
        self.time().and_then(|t| t.last().copied())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array1<f64>)> {
        self.names
            .iter()
            .map(|n| n.as_str())
            .zip(self.columns.iter())
    }

    /// Append a column, or replace the values of an existing column with the
    /// same name.
    pub fn push_column<S: Into<String>>(
        &mut self,
        name: S,
        values: Vec<f64>,
    ) -> Result<(), CycleError> {
        let name = name.into();
        if !self.names.is_empty() && values.len() != self.n_rows() {
            return Err(CycleError::InvalidTable(format!(
                "column '{}' has {} rows, expected {}",
                name,
                values.len(),
                self.n_rows()
            )));
        }
        let values = Array1::from_vec(values);
        match self.names.iter().position(|n| *n == name) {
            Some(idx) => self.columns[idx] = values,
            None => {
                self.names.push(name);
                self.columns.push(values);
            }
        }
        Ok(())
    }

    /// Copy of the table holding only `rows` (indices in ascending order).
    pub fn select_rows(&self, rows: &[usize]) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|col| rows.iter().map(|&r| col[r]).collect::<Vec<f64>>())
            .map(Array1::from_vec)
            .collect();
        Table {
            names: self.names.clone(),
            columns,
        }
    }

    /// Copy of the table restricted to the named columns, in the given order.
    /// Unknown names are ignored.
    pub fn select_columns<S: AsRef<str>>(&self, names: &[S]) -> Table {
        let mut out = Table::new();
        for name in names {
            if let Some(col) = self.column(name.as_ref()) {
                out.names.push(name.as_ref().to_string());
                out.columns.push(col.clone());
            }
        }
        out
    }

    /// Row index whose time is closest to `t`.
    pub fn nearest_row(&self, t: f64) -> Option<usize> {
        let time = self.time()?;
        let mut best: Option<(usize, f64)> = None;
        for (idx, &value) in time.iter().enumerate() {
            if value.is_nan() {
                continue;
            }
            let dist = (value - t).abs();
            match best {
                Some((_, d)) if d <= dist => {}
                _ => best = Some((idx, dist)),
            }
        }
        best.map(|(idx, _)| idx)
    }

    pub(crate) fn check_unique_names(names: &[String]) -> Result<(), CycleError> {
        let mut seen = HashSet::new();
        for name in names {
            if !seen.insert(name.as_str()) {
                return Err(CycleError::InvalidTable(format!(
                    "duplicate column name '{}'",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Why a trial has no table.
#[derive(Clone, Debug, PartialEq)]
pub enum Absence {
    MissingFile,
    Unreadable(String),
    Unusable(String),
}

impl std::fmt::Display for Absence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Absence::MissingFile => write!(f, "file missing"),
            Absence::Unreadable(reason) => write!(f, "unreadable: {}", reason),
            Absence::Unusable(reason) => write!(f, "unusable: {}", reason),
        }
    }
}

/// One trial's data, keeping positional alignment with the trial labels.
#[derive(Clone, Debug, PartialEq)]
pub enum TableSlot {
    Present(Table),
    Absent(Absence),
}

impl TableSlot {
    pub fn table(&self) -> Option<&Table> {
        match self {
            TableSlot::Present(table) => Some(table),
            TableSlot::Absent(_) => None,
        }
    }

    /// Present and holding at least one row.
    pub fn has_data(&self) -> bool {
        self.table().map(|t| !t.is_empty()).unwrap_or(false)
    }
}

/// Closed interval of time in seconds with `start < end`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Result<Self, CycleError> {
        if !start.is_finite() || !end.is_finite() || start >= end {
            return Err(CycleError::InvalidParameter(format!(
                "time range ({}, {}) must satisfy start < end",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Check the range lies inside the recording of `table`.
    pub fn validate_within(&self, table: &Table) -> Result<(), CycleError> {
        let last = table.last_time().ok_or(CycleError::MissingTimeColumn)?;
        if self.start < 0.0 || self.end > last {
            return Err(CycleError::InvalidParameter(format!(
                "time range ({:.3}, {:.3}) outside recording [0, {:.3}]",
                self.start, self.end, last
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::from_columns(vec![
            ("time", vec![0.0, 0.1, 0.2, 0.3]),
            ("a", vec![1.0, 2.0, 3.0, 4.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_rejects_ragged_columns() {
        let err = Table::from_columns(vec![("a", vec![1.0, 2.0]), ("b", vec![1.0])]);
        assert!(matches!(err, Err(CycleError::InvalidTable(_))));
    }

    #[test]
    fn test_push_column_replaces_existing() {
        let mut table = sample();
        table.push_column("a", vec![0.0; 4]).unwrap();
        assert_eq!(table.n_columns(), 2);
        assert_eq!(table.column("a").unwrap().sum(), 0.0);
    }

    #[test]
    fn test_nearest_row() {
        let table = sample();
        assert_eq!(table.nearest_row(0.14), Some(1));
        assert_eq!(table.nearest_row(9.0), Some(3));
        assert_eq!(Table::new().nearest_row(0.0), None);
    }

    #[test]
    fn test_empty_vs_absent() {
        let empty = TableSlot::Present(Table::new());
        assert!(!empty.has_data());
        assert!(empty.table().is_some());
        let absent = TableSlot::Absent(Absence::MissingFile);
        assert!(absent.table().is_none());
    }

    #[test]
    fn test_time_range_validation() {
        assert!(TimeRange::new(1.0, 1.0).is_err());
        let table = sample();
        assert!(TimeRange::new(0.0, 0.3).unwrap().validate_within(&table).is_ok());
        assert!(TimeRange::new(0.1, 0.4).unwrap().validate_within(&table).is_err());
        assert!(TimeRange::new(-0.1, 0.2).unwrap().validate_within(&table).is_err());
    }
}
