use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::grouping::{Aggregation, Group, GroupSpec};
use crate::{CycleError, DEFAULT_CYCLE_POINTS};

/// Per-batch configuration. Built once and passed by reference.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// basename -> group label -> member columns
    pub groups: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    /// basename -> aggregation literal (`sum`, `mean`, `3dsum`)
    pub summary: BTreeMap<String, String>,
    /// File names never compared.
    pub skip: Vec<String>,
    pub extensions: Vec<String>,
    pub cycle_points: usize,
    /// Label token that switches a trial to the dashed line style.
    pub variant_marker: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            groups: BTreeMap::new(),
            summary: BTreeMap::new(),
            skip: Vec::new(),
            extensions: vec!["sto".to_string(), "mot".to_string()],
            cycle_points: DEFAULT_CYCLE_POINTS,
            variant_marker: "mri".to_string(),
        }
    }
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, CycleError> {
        let text = fs::read_to_string(path).map_err(|e| CycleError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, CycleError> {
        let settings: Settings =
            serde_json::from_str(text).map_err(|e| CycleError::Settings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), CycleError> {
        if self.cycle_points < 2 {
            return Err(CycleError::Settings(format!(
                "cycle_points must be at least 2, got {}",
                self.cycle_points
            )));
        }
        for (basename, rule) in &self.summary {
            rule.parse::<Aggregation>().map_err(|_| {
                CycleError::Settings(format!("basename '{}': unknown rule '{}'", basename, rule))
            })?;
        }
        Ok(())
    }

    /// Grouping for `basename`, present only when both a group table and an
    /// aggregation rule are configured for it.
    pub fn group_spec(&self, basename: &str) -> Result<Option<GroupSpec>, CycleError> {
        let (Some(groups), Some(rule)) = (self.groups.get(basename), self.summary.get(basename))
        else {
            return Ok(None);
        };
        let rule: Aggregation = rule.parse()?;
        Ok(Some(GroupSpec {
            groups: groups
                .iter()
                .map(|(label, members)| Group {
                    label: label.clone(),
                    members: members.clone(),
                })
                .collect(),
            rule,
        }))
    }

    pub fn is_skipped(&self, file_name: &str) -> bool {
        self.skip.iter().any(|s| s == file_name)
    }

    pub fn accepts_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext.trim_start_matches('.')))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "groups": {
            "SO_StaticOptimization_force": {
                "Hamstrings": ["bflh_r", "semimem_r", "semiten_r"],
                "Quadriceps": ["recfem_r", "vasint_r"]
            },
            "JR_ReactionLoads": { "knee": ["knee_fx", "knee_fy", "knee_fz"] }
        },
        "summary": {
            "SO_StaticOptimization_force": "Sum",
            "JR_ReactionLoads": "3dsum"
        },
        "skip": ["IK_setup_local.xml"]
    }"#;

    #[test]
    fn test_group_lookup() {
        let settings = Settings::from_json(JSON).unwrap();
        let spec = settings.group_spec("SO_StaticOptimization_force").unwrap().unwrap();
        assert_eq!(spec.rule, Aggregation::Sum);
        assert_eq!(spec.labels(), vec!["Hamstrings", "Quadriceps"]);
        let jr = settings.group_spec("JR_ReactionLoads").unwrap().unwrap();
        assert_eq!(jr.rule, Aggregation::VectorNorm);
        assert!(settings.group_spec("IK_results").unwrap().is_none());
    }

    #[test]
    fn test_defaults_fill_missing_keys() {
        let settings = Settings::from_json("{}").unwrap();
        assert_eq!(settings.cycle_points, 101);
        assert!(settings.accepts_extension(".STO"));
        assert!(!settings.accepts_extension("xml"));
        assert!(!settings.is_skipped("a.sto"));
    }

    #[test]
    fn test_bad_rule_is_rejected() {
        let err = Settings::from_json(r#"{"summary": {"x": "median"}}"#);
        assert!(matches!(err, Err(CycleError::Settings(_))));
        let err = Settings::from_json(r#"{"cycle_points": 1}"#);
        assert!(matches!(err, Err(CycleError::Settings(_))));
    }
}
