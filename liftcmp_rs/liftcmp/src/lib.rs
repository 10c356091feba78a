//! Core cycle normalization and multi-trial comparison library.
//!
//! Tables are loaded from lab motion files, optionally collapsed into named
//! column groups, resampled onto a fixed percentage cycle and aligned across
//! trials into a backend-independent figure model.

use std::path::PathBuf;

use thiserror::Error;

pub mod compare;
pub mod grouping;
pub mod labels;
pub mod loader;
pub mod normalize;
pub mod segment;
pub mod settings;
pub mod summary;
pub mod table;

pub use compare::{
    basename_key, common_columns, compare_cycles, compare_files, compare_slots, grid_layout,
    output_file_name, shared_basenames, Comparison, ComparisonFigure, GridLayout, LegendEntry,
    SeriesLine, SkipReason, Subplot, TrialInput,
};
pub use grouping::{aggregate, apply_groups, Aggregation, Group, GroupSpec};
pub use labels::{assign_styles, distinguishing_labels, LineStyle, TrialStyle};
pub use loader::{load_slot, load_table, parse_table, write_storage, FileKind};
pub use normalize::{
    mean_cycle, normalize_series, normalize_slot, normalize_table, trim_to_range,
    BoundaryConvention, NormalizeOptions, NormalizedCycle,
};
pub use segment::{
    segment_cycles, ContactEvent, EventTable, ExplicitSide, MinLateralInferrer, SegmentNote,
    SegmentOptions, Segmentation, Side, StartingSideInferrer,
};
pub use settings::Settings;
pub use summary::{summarize, CycleSummary};
pub use table::{Absence, Table, TableSlot, TimeRange, TIME_COLUMN};

/// Number of samples in a normalized cycle (0..=100 %).
pub const DEFAULT_CYCLE_POINTS: usize = 101;

#[derive(Error, Debug)]
pub enum CycleError {
    #[error("file not found: {0}")]
    MissingFile(PathBuf),
    #[error("failed to load {path}: {reason}")]
    Load { path: PathBuf, reason: String },
    #[error("table has no time column and no sample rate was supplied")]
    MissingTimeColumn,
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("group '{group}' references missing column '{column}'")]
    MissingGroupColumn { group: String, column: String },
    #[error("unknown aggregation rule: {0}")]
    UnknownAggregation(String),
    #[error("invalid table: {0}")]
    InvalidTable(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid settings: {0}")]
    Settings(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CycleError {
    /// True for the errors a batch recovers from by substituting a placeholder.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CycleError::MissingFile(_)
                | CycleError::Load { .. }
                | CycleError::MissingGroupColumn { .. }
                | CycleError::InsufficientData(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(CycleError::MissingFile(PathBuf::from("a.sto")).is_recoverable());
        assert!(CycleError::Load {
            path: PathBuf::from("a.sto"),
            reason: "bad".into()
        }
        .is_recoverable());
        assert!(!CycleError::MissingTimeColumn.is_recoverable());
    }
}
