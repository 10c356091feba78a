use std::fmt;
use std::str::FromStr;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::table::Table;
use crate::CycleError;

/// Row-wise reduction across a group's member columns.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Mean,
    /// Euclidean norm of the members per row. Direction and sign of the
    /// underlying vector are lost.
    VectorNorm,
}

impl FromStr for Aggregation {
    type Err = CycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(Aggregation::Sum),
            "mean" | "avg" | "average" => Ok(Aggregation::Mean),
            "3dsum" | "vector_norm" | "norm" => Ok(Aggregation::VectorNorm),
            _ => Err(CycleError::UnknownAggregation(s.to_string())),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Aggregation::Sum => "sum",
            Aggregation::Mean => "mean",
            Aggregation::VectorNorm => "vector_norm",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub label: String,
    pub members: Vec<String>,
}

/// Named groups sharing one aggregation rule.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GroupSpec {
    pub groups: Vec<Group>,
    pub rule: Aggregation,
}

impl GroupSpec {
    pub fn new(rule: Aggregation) -> Self {
        Self {
            groups: Vec::new(),
            rule,
        }
    }

    pub fn with_group<S: Into<String>>(mut self, label: S, members: &[&str]) -> Self {
        self.groups.push(Group {
            label: label.into(),
            members: members.iter().map(|m| m.to_string()).collect(),
        });
        self
    }

    pub fn labels(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.label.clone()).collect()
    }
}

pub fn aggregate(columns: &[&Array1<f64>], rule: Aggregation) -> Array1<f64> {
    let len = columns.first().map(|c| c.len()).unwrap_or(0);
    let mut out = Array1::<f64>::zeros(len);
    match rule {
        Aggregation::Sum | Aggregation::Mean => {
            for column in columns {
                out += *column;
            }
            if rule == Aggregation::Mean && !columns.is_empty() {
                out /= columns.len() as f64;
            }
        }
        Aggregation::VectorNorm => {
            for column in columns {
                out += &column.mapv(|v| v * v);
            }
            out.mapv_inplace(f64::sqrt);
        }
    }
    out
}

/// Copy of `table` with one derived column per group. Member columns are
/// kept. Any member absent from the table fails the whole table.
pub fn apply_groups(table: &Table, spec: &GroupSpec) -> Result<Table, CycleError> {
    let mut out = table.clone();
    for group in &spec.groups {
        if group.members.is_empty() {
            return Err(CycleError::InvalidParameter(format!(
                "group '{}' has no members",
                group.label
            )));
        }
        let members = group
            .members
            .iter()
            .map(|name| {
                table
                    .column(name)
                    .ok_or_else(|| CycleError::MissingGroupColumn {
                        group: group.label.clone(),
                        column: name.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            "group {} = {} of {} columns",
            group.label,
            spec.rule,
            members.len()
        );
        out.push_column(group.label.clone(), aggregate(&members, spec.rule).to_vec())?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ab_table() -> Table {
        Table::from_columns(vec![
            ("time", vec![0.0, 0.1, 0.2]),
            ("a", vec![1.0, 2.0, 3.0]),
            ("b", vec![3.0, 2.0, 1.0]),
        ])
        .unwrap()
    }

    fn grouped(rule: Aggregation) -> Vec<f64> {
        let spec = GroupSpec::new(rule).with_group("g", &["a", "b"]);
        apply_groups(&ab_table(), &spec)
            .unwrap()
            .column("g")
            .unwrap()
            .to_vec()
    }

    #[test]
    fn test_sum_mean_and_norm() {
        assert_eq!(grouped(Aggregation::Sum), vec![4.0, 4.0, 4.0]);
        assert_eq!(grouped(Aggregation::Mean), vec![2.0, 2.0, 2.0]);
        let norm = grouped(Aggregation::VectorNorm);
        let expected = [10f64.sqrt(), 8f64.sqrt(), 10f64.sqrt()];
        for (got, want) in norm.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-12);
        }
    }

    #[test]
    fn test_members_are_retained() {
        let spec = GroupSpec::new(Aggregation::Sum).with_group("g", &["a", "b"]);
        let out = apply_groups(&ab_table(), &spec).unwrap();
        assert_eq!(out.names(), &["time", "a", "b", "g"]);
    }

    #[test]
    fn test_missing_member_fails_table() {
        let spec = GroupSpec::new(Aggregation::Sum).with_group("hamstrings", &["a", "semiten_r"]);
        match apply_groups(&ab_table(), &spec) {
            Err(CycleError::MissingGroupColumn { group, column }) => {
                assert_eq!(group, "hamstrings");
                assert_eq!(column, "semiten_r");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_rule_literals() {
        assert_eq!("Sum".parse::<Aggregation>().unwrap(), Aggregation::Sum);
        assert_eq!("MEAN".parse::<Aggregation>().unwrap(), Aggregation::Mean);
        assert_eq!("3dsum".parse::<Aggregation>().unwrap(), Aggregation::VectorNorm);
        assert_eq!("3DSum".parse::<Aggregation>().unwrap(), Aggregation::VectorNorm);
        assert!(matches!(
            "median".parse::<Aggregation>(),
            Err(CycleError::UnknownAggregation(_))
        ));
    }
}
