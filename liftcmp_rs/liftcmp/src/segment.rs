//! Heel-strike detection from foot-contact event tables and per-side cycle
//! windows.
//!
//! Events alternate between feet. Once the side of the first event is known,
//! that side owns the even-indexed events and the other side the odd ones.
//! Consecutive contact starts of one side bound a cycle.

use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::table::{Table, TimeRange};
use crate::CycleError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    pub fn short(self) -> &'static str {
        match self {
            Side::Left => "l",
            Side::Right => "r",
        }
    }
}

impl FromStr for Side {
    type Err = CycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l" | "left" => Ok(Side::Left),
            "r" | "right" => Ok(Side::Right),
            other => Err(CycleError::InvalidParameter(format!(
                "unknown side '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Left => "left",
            Side::Right => "right",
        })
    }
}

/// One ground contact: start `t0`, end `tf`, and the lateral coordinate of
/// the contact point when the lab system recorded one.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ContactEvent {
    pub t0: f64,
    pub tf: f64,
    pub lateral: Option<f64>,
}

impl ContactEvent {
    pub fn new(t0: f64, tf: f64) -> Self {
        Self {
            t0,
            tf,
            lateral: None,
        }
    }

    pub fn with_lateral(mut self, lateral: f64) -> Self {
        self.lateral = Some(lateral);
        self
    }

    fn is_complete(&self) -> bool {
        self.t0.is_finite() && self.tf.is_finite()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EventTable {
    events: Vec<ContactEvent>,
}

impl EventTable {
    pub fn new(events: Vec<ContactEvent>) -> Self {
        Self { events }
    }

    pub fn from_csv(path: &Path) -> Result<Self, CycleError> {
        if !path.exists() {
            return Err(CycleError::MissingFile(path.to_path_buf()));
        }
        let file = fs::File::open(path)?;
        Self::from_csv_reader(file).map_err(|e| CycleError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Reads `t0` and `tf` columns plus an optional `p_l` column of
    /// bracketed contact points (`[x y z]`, lateral coordinate last).
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, CycleError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = reader
            .headers()
            .map_err(|e| CycleError::InvalidTable(e.to_string()))?
            .clone();
        let find = |name: &str| headers.iter().position(|h| h == name);
        let t0_idx = find("t0").ok_or_else(|| CycleError::InvalidTable("no 't0' column".into()))?;
        let tf_idx = find("tf").ok_or_else(|| CycleError::InvalidTable("no 'tf' column".into()))?;
        let pl_idx = find("p_l");

        let mut events = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| CycleError::InvalidTable(e.to_string()))?;
            let number = |idx: usize| {
                record
                    .get(idx)
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(f64::NAN)
            };
            events.push(ContactEvent {
                t0: number(t0_idx),
                tf: number(tf_idx),
                lateral: pl_idx.and_then(|idx| record.get(idx)).and_then(lateral_component),
            });
        }
        Ok(Self { events })
    }

    pub fn events(&self) -> &[ContactEvent] {
        &self.events
    }

    /// Events with both `t0` and `tf` defined, in table order.
    pub fn cleaned(&self) -> Vec<ContactEvent> {
        self.events.iter().copied().filter(ContactEvent::is_complete).collect()
    }

    /// Window from the first contact start to the last contact end, widened
    /// by `margin` seconds on both ends.
    pub fn analysis_window(&self, margin: f64) -> Result<TimeRange, CycleError> {
        let cleaned = self.cleaned();
        match (cleaned.first(), cleaned.last()) {
            (Some(first), Some(last)) => TimeRange::new(first.t0 - margin, last.tf + margin),
            _ => Err(CycleError::InsufficientData("event table has no complete events".into())),
        }
    }
}

fn lateral_component(cell: &str) -> Option<f64> {
    let inner = cell.trim().trim_start_matches('[').trim_end_matches(']');
    let values: Vec<f64> = inner
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    values.get(2).copied()
}

/// Decides which side produced the first event of a cleaned event table.
pub trait StartingSideInferrer {
    fn infer(&self, events: &[ContactEvent]) -> Option<Side>;
}

/// The contact with the smallest lateral coordinate belongs to the left
/// foot; its index parity gives the starting side.
#[derive(Clone, Copy, Debug, Default)]
pub struct MinLateralInferrer;

impl StartingSideInferrer for MinLateralInferrer {
    fn infer(&self, events: &[ContactEvent]) -> Option<Side> {
        let (idx, _) = events
            .iter()
            .enumerate()
            .filter_map(|(idx, e)| e.lateral.filter(|v| v.is_finite()).map(|v| (idx, v)))
            .min_by(|a, b| a.1.total_cmp(&b.1))?;
        Some(if idx % 2 == 0 { Side::Left } else { Side::Right })
    }
}

/// Side given by the operator, e.g. from a one-line side file.
#[derive(Clone, Copy, Debug)]
pub struct ExplicitSide(pub Side);

impl ExplicitSide {
    pub fn from_side_file(path: &Path) -> Result<Self, CycleError> {
        let text = fs::read_to_string(path).map_err(|e| CycleError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let token = text
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().next())
            .ok_or_else(|| CycleError::Load {
                path: path.to_path_buf(),
                reason: "side file is empty".into(),
            })?;
        Ok(ExplicitSide(token.parse()?))
    }
}

impl StartingSideInferrer for ExplicitSide {
    fn infer(&self, _events: &[ContactEvent]) -> Option<Side> {
        Some(self.0)
    }
}

/// Why a side produced fewer cycles than it could have.
#[derive(Clone, Debug, PartialEq)]
pub enum SegmentNote {
    UnknownStartingSide,
    NoRecordingTime,
    TooFewStrikes { side: Side, found: usize },
    ProjectionAccepted { side: Side, at: f64 },
    ProjectionRejected { side: Side, at: f64, reason: String },
    StartsAtZero { side: Side },
    EndsPastRecording { side: Side, end: f64, last: f64 },
    UnorderedStrikes { side: Side },
}

impl fmt::Display for SegmentNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentNote::UnknownStartingSide => write!(f, "starting side could not be inferred"),
            SegmentNote::NoRecordingTime => write!(f, "recording has no time column"),
            SegmentNote::TooFewStrikes { side, found } => {
                write!(f, "{}: only {} heel strike(s)", side, found)
            }
            SegmentNote::ProjectionAccepted { side, at } => {
                write!(f, "{}: projected heel strike at {:.3}s", side, at)
            }
            SegmentNote::ProjectionRejected { side, at, reason } => {
                write!(f, "{}: projected heel strike at {:.3}s rejected ({})", side, at, reason)
            }
            SegmentNote::StartsAtZero { side } => {
                write!(f, "{}: first heel strike at or before time zero", side)
            }
            SegmentNote::EndsPastRecording { side, end, last } => write!(
                f,
                "{}: cycle ends at {:.3}s after recording end {:.3}s",
                side, end, last
            ),
            SegmentNote::UnorderedStrikes { side } => {
                write!(f, "{}: heel strikes are not increasing", side)
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegmentOptions {
    /// Recording column checked when a missing trailing strike is projected.
    pub validate_column: String,
    pub max_cycles: usize,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            validate_column: "pelvis_list".to_string(),
            max_cycles: 2,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Segmentation {
    pub starting_side: Option<Side>,
    pub one_step: Option<f64>,
    pub left_strikes: Vec<f64>,
    pub right_strikes: Vec<f64>,
    pub left: Vec<TimeRange>,
    pub right: Vec<TimeRange>,
    pub notes: Vec<SegmentNote>,
}

impl Segmentation {
    pub fn cycles(&self, side: Side) -> &[TimeRange] {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn strikes(&self, side: Side) -> &[f64] {
        match side {
            Side::Left => &self.left_strikes,
            Side::Right => &self.right_strikes,
        }
    }
}

/// Split `recording` into per-side cycles. Never fails: every problem is
/// recorded as a note and costs that side its cycles.
pub fn segment_cycles(
    events: &EventTable,
    recording: &Table,
    inferrer: &dyn StartingSideInferrer,
    options: &SegmentOptions,
) -> Segmentation {
    let mut out = Segmentation::default();
    let cleaned = events.cleaned();
    let Some(last_time) = recording.last_time() else {
        out.notes.push(SegmentNote::NoRecordingTime);
        return out;
    };
    let Some(first) = inferrer.infer(&cleaned) else {
        out.notes.push(SegmentNote::UnknownStartingSide);
        return out;
    };
    out.starting_side = Some(first);
    out.one_step = if cleaned.len() >= 2 {
        Some(cleaned[1].tf - cleaned[0].tf)
    } else {
        None
    };
    debug!(
        "{} clean events, {} foot first, one step {:?}",
        cleaned.len(),
        first,
        out.one_step
    );

    for side in [Side::Left, Side::Right] {
        let parity = if side == first { 0 } else { 1 };
        let mut strikes: Vec<f64> = cleaned
            .iter()
            .enumerate()
            .filter(|(idx, _)| idx % 2 == parity)
            .map(|(_, e)| e.t0)
            .collect();

        if strikes.len() * 2 < cleaned.len() {
            if let (Some(&prior), Some(step)) = (strikes.last(), out.one_step) {
                let at = prior + 2.0 * step;
                match validate_projection(recording, &options.validate_column, prior, at) {
                    Ok(()) => {
                        strikes.push(at);
                        out.notes.push(SegmentNote::ProjectionAccepted { side, at });
                    }
                    Err(reason) => {
                        out.notes.push(SegmentNote::ProjectionRejected { side, at, reason })
                    }
                }
            }
        }

        let cycles = build_cycles(side, &strikes, last_time, options.max_cycles, &mut out.notes);
        match side {
            Side::Left => {
                out.left_strikes = strikes;
                out.left = cycles;
            }
            Side::Right => {
                out.right_strikes = strikes;
                out.right = cycles;
            }
        }
    }
    out
}

/// The projected strike stands only if the validation signal returns to
/// within a quarter of its observed range of its value at the prior strike.
fn validate_projection(
    recording: &Table,
    column: &str,
    prior: f64,
    at: f64,
) -> Result<(), String> {
    let last = recording.last_time().unwrap_or(f64::NEG_INFINITY);
    if at > last {
        return Err(format!("past recording end {:.3}s", last));
    }
    let signal = recording
        .column(column)
        .ok_or_else(|| format!("recording has no '{}' column", column))?;
    let (i0, i1) = match (recording.nearest_row(prior), recording.nearest_row(at)) {
        (Some(i0), Some(i1)) => (i0, i1),
        _ => return Err("no rows near strike".to_string()),
    };
    let (lo, hi) = signal
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let tolerance = (hi - lo).abs() / 4.0;
    let drift = (signal[i0] - signal[i1]).abs();
    if drift < tolerance {
        Ok(())
    } else {
        Err(format!("'{}' drifts {:.3}, limit {:.3}", column, drift, tolerance))
    }
}

fn build_cycles(
    side: Side,
    strikes: &[f64],
    last_time: f64,
    max_cycles: usize,
    notes: &mut Vec<SegmentNote>,
) -> Vec<TimeRange> {
    if strikes.len() < 2 {
        notes.push(SegmentNote::TooFewStrikes {
            side,
            found: strikes.len(),
        });
        return Vec::new();
    }
    if strikes[0] <= 0.0 {
        notes.push(SegmentNote::StartsAtZero { side });
        return Vec::new();
    }
    let mut cycles = Vec::new();
    for pair in strikes.windows(2).take(max_cycles) {
        if pair[1] > last_time {
            notes.push(SegmentNote::EndsPastRecording {
                side,
                end: pair[1],
                last: last_time,
            });
            return Vec::new();
        }
        match TimeRange::new(pair[0], pair[1]) {
            Ok(range) => cycles.push(range),
            Err(_) => {
                notes.push(SegmentNote::UnorderedStrikes { side });
                return Vec::new();
            }
        }
    }
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 4 s at 100 Hz with a 1 s periodic pelvis signal.
    fn recording(periodic: bool) -> Table {
        let n = 400;
        let time: Vec<f64> = (0..n).map(|i| i as f64 / 100.0).collect();
        let pelvis: Vec<f64> = time
            .iter()
            .map(|t| {
                if periodic {
                    (t * std::f64::consts::TAU).sin()
                } else {
                    t * 100.0
                }
            })
            .collect();
        Table::from_columns(vec![("time", time), ("pelvis_list", pelvis)]).unwrap()
    }

    fn five_events() -> EventTable {
        let lateral = [0.1, 0.3, 0.1, 0.3, 0.1];
        EventTable::new(
            (0..5)
                .map(|i| {
                    let t0 = 0.5 + 0.5 * i as f64;
                    ContactEvent::new(t0, t0 + 0.4).with_lateral(lateral[i])
                })
                .collect(),
        )
    }

    fn assert_ranges(got: &[TimeRange], want: &[(f64, f64)]) {
        assert_eq!(got.len(), want.len());
        for (range, (start, end)) in got.iter().zip(want) {
            assert!((range.start - start).abs() < 1e-9);
            assert!((range.end - end).abs() < 1e-9);
        }
    }

    #[test]
    fn test_min_lateral_parity() {
        let events = five_events().cleaned();
        assert_eq!(MinLateralInferrer.infer(&events), Some(Side::Left));
        let shifted: Vec<_> = events
            .iter()
            .enumerate()
            .map(|(i, e)| e.with_lateral(if i == 3 { -1.0 } else { 0.5 }))
            .collect();
        assert_eq!(MinLateralInferrer.infer(&shifted), Some(Side::Right));
        assert_eq!(MinLateralInferrer.infer(&[ContactEvent::new(0.1, 0.2)]), None);
    }

    #[test]
    fn test_projection_accepted_on_periodic_signal() {
        let seg = segment_cycles(
            &five_events(),
            &recording(true),
            &MinLateralInferrer,
            &SegmentOptions::default(),
        );
        assert_eq!(seg.starting_side, Some(Side::Left));
        assert_ranges(&seg.left, &[(0.5, 1.5), (1.5, 2.5)]);
        assert_ranges(&seg.right, &[(1.0, 2.0), (2.0, 3.0)]);
        assert!(seg
            .notes
            .iter()
            .any(|n| matches!(n, SegmentNote::ProjectionAccepted { side: Side::Right, .. })));
    }

    #[test]
    fn test_projection_rejected_on_drifting_signal() {
        let seg = segment_cycles(
            &five_events(),
            &recording(false),
            &MinLateralInferrer,
            &SegmentOptions::default(),
        );
        assert_ranges(&seg.right, &[(1.0, 2.0)]);
        assert!(seg
            .notes
            .iter()
            .any(|n| matches!(n, SegmentNote::ProjectionRejected { side: Side::Right, .. })));
    }

    #[test]
    fn test_first_strike_at_zero_rejects_side() {
        let events = EventTable::new(
            [0.0, 0.5, 1.0, 1.5]
                .iter()
                .map(|&t0| ContactEvent::new(t0, t0 + 0.4))
                .collect(),
        );
        let seg = segment_cycles(
            &events,
            &recording(true),
            &ExplicitSide(Side::Left),
            &SegmentOptions::default(),
        );
        assert!(seg.left.is_empty());
        assert!(seg.notes.contains(&SegmentNote::StartsAtZero { side: Side::Left }));
        assert_ranges(&seg.right, &[(0.5, 1.5)]);
    }

    #[test]
    fn test_first_strike_before_zero_rejects_side() {
        let events = EventTable::new(
            [-0.02, 0.5, 1.0, 1.5]
                .iter()
                .map(|&t0| ContactEvent::new(t0, t0 + 0.4))
                .collect(),
        );
        let seg = segment_cycles(
            &events,
            &recording(true),
            &ExplicitSide(Side::Left),
            &SegmentOptions::default(),
        );
        assert!(seg.left.is_empty());
        assert!(seg.notes.contains(&SegmentNote::StartsAtZero { side: Side::Left }));
        assert!(seg.right.iter().all(|r| r.start >= 0.0));
        assert_ranges(&seg.right, &[(0.5, 1.5)]);
    }

    #[test]
    fn test_at_most_two_cycles_per_side() {
        let events = EventTable::new(
            (0..9)
                .map(|i| {
                    let t0 = 0.2 + 0.3 * i as f64;
                    ContactEvent::new(t0, t0 + 0.25)
                })
                .collect(),
        );
        let seg = segment_cycles(
            &events,
            &recording(true),
            &ExplicitSide(Side::Left),
            &SegmentOptions::default(),
        );
        assert_eq!(seg.left_strikes.len(), 5);
        assert_eq!(seg.left.len(), 2);
        assert_ranges(&seg.left, &[(0.2, 0.8), (0.8, 1.4)]);
        assert!(seg.right_strikes.len() >= 4);
        assert_ranges(&seg.right, &[(0.5, 1.1), (1.1, 1.7)]);
    }

    #[test]
    fn test_cycle_past_recording_end_rejects_side() {
        let events = EventTable::new(
            [1.0, 1.5, 2.5, 3.0, 4.5]
                .iter()
                .map(|&t0| ContactEvent::new(t0, t0 + 0.4))
                .collect(),
        );
        let seg = segment_cycles(
            &events,
            &recording(true),
            &ExplicitSide(Side::Left),
            &SegmentOptions::default(),
        );
        assert!(seg.left.is_empty());
        assert_ranges(&seg.right, &[(1.5, 3.0)]);
    }

    #[test]
    fn test_unknown_side_yields_nothing() {
        let events = EventTable::new(vec![ContactEvent::new(0.5, 0.9), ContactEvent::new(1.0, 1.4)]);
        let seg = segment_cycles(
            &events,
            &recording(true),
            &MinLateralInferrer,
            &SegmentOptions::default(),
        );
        assert!(seg.left.is_empty() && seg.right.is_empty());
        assert_eq!(seg.notes, vec![SegmentNote::UnknownStartingSide]);
    }

    #[test]
    fn test_event_csv_with_contact_points() {
        let text = ",t0,tf,p_l\n0,0.5,0.9,[0.0 0.0 0.31]\n1,1.0,1.4,[0.0 0.0 0.12]\n2,,,\n";
        let table = EventTable::from_csv_reader(text.as_bytes()).unwrap();
        assert_eq!(table.events().len(), 3);
        let cleaned = table.cleaned();
        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned[1].lateral, Some(0.12));
        assert_eq!(MinLateralInferrer.infer(&cleaned), Some(Side::Right));
        let window = table.analysis_window(0.05).unwrap();
        assert!((window.start - 0.45).abs() < 1e-9);
        assert!((window.end - 1.45).abs() < 1e-9);
    }

    #[test]
    fn test_side_parsing() {
        assert_eq!("L".parse::<Side>().unwrap(), Side::Left);
        assert_eq!("right".parse::<Side>().unwrap(), Side::Right);
        assert!("x".parse::<Side>().is_err());
        assert_eq!(Side::Left.opposite(), Side::Right);
    }
}
