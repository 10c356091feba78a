use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Short trial labels: the path components that differ across `paths`,
/// joined with `_`. Paths of different depth keep everything between their
/// shared leading and trailing components.
pub fn distinguishing_labels<P: AsRef<Path>>(paths: &[P]) -> Vec<String> {
    let split: Vec<Vec<String>> = paths
        .iter()
        .map(|p| {
            p.as_ref()
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect()
        })
        .collect();
    let kept = differing_components(&split);

    let mut seen: HashMap<String, usize> = HashMap::new();
    split
        .iter()
        .zip(kept)
        .enumerate()
        .map(|(idx, (parts, kept))| {
            let mut label = kept.join("_");
            if label.is_empty() {
                label = parts.last().cloned().unwrap_or_else(|| format!("trial{}", idx));
            }
            let count = seen.entry(label.clone()).or_insert(0);
            *count += 1;
            if *count > 1 {
                label = format!("{}_{}", label, idx);
            }
            label
        })
        .collect()
}

fn differing_components(split: &[Vec<String>]) -> Vec<Vec<&str>> {
    let Some(first) = split.first() else {
        return Vec::new();
    };
    let shortest = split.iter().map(Vec::len).min().unwrap_or(0);

    if split.iter().all(|parts| parts.len() == first.len()) {
        let differing: Vec<usize> = (0..shortest)
            .filter(|&i| split.iter().any(|parts| parts[i] != first[i]))
            .collect();
        return split
            .iter()
            .map(|parts| differing.iter().map(|&i| parts[i].as_str()).collect())
            .collect();
    }

    let prefix = (0..shortest)
        .take_while(|&i| split.iter().all(|parts| parts[i] == first[i]))
        .count();
    let suffix = (0..shortest - prefix)
        .take_while(|&i| {
            let want = &first[first.len() - 1 - i];
            split.iter().all(|parts| &parts[parts.len() - 1 - i] == want)
        })
        .count();
    split
        .iter()
        .map(|parts| {
            parts[prefix..parts.len() - suffix]
                .iter()
                .map(String::as_str)
                .collect()
        })
        .collect()
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum LineStyle {
    Solid,
    Dashed,
}

/// Colour slot and line style for one trial. `color_index` is a rank into
/// whatever palette the renderer uses.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrialStyle {
    pub label: String,
    pub color_index: usize,
    pub line_style: LineStyle,
}

/// Numbers order before text, numbers by value.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum ColorKey {
    Number(OrderedFloat<f64>),
    Text(String),
}

fn color_key(label: &str, marker: &str) -> ColorKey {
    let tokens: Vec<&str> = label.split('_').collect();
    let number = tokens
        .iter()
        .rev()
        .filter_map(|t| t.parse::<f64>().ok())
        .find(|v| v.is_finite());
    match number {
        Some(value) => ColorKey::Number(OrderedFloat(value)),
        None => ColorKey::Text(
            tokens
                .into_iter()
                .filter(|t| marker.is_empty() || !t.eq_ignore_ascii_case(marker))
                .collect::<Vec<_>>()
                .join("_"),
        ),
    }
}

/// Trials sharing a numeric condition token (e.g. `70` in `sq_70` and
/// `sq_70_MRI`) share a colour; labels containing `variant_marker` are
/// dashed.
pub fn assign_styles(labels: &[String], variant_marker: &str) -> Vec<TrialStyle> {
    let keys: Vec<ColorKey> = labels.iter().map(|l| color_key(l, variant_marker)).collect();
    let ranks: HashMap<&ColorKey, usize> = keys
        .iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .enumerate()
        .map(|(rank, key)| (key, rank))
        .collect();
    let marker = variant_marker.to_lowercase();

    labels
        .iter()
        .zip(keys.iter())
        .map(|(label, key)| TrialStyle {
            label: label.clone(),
            color_index: ranks.get(key).copied().unwrap_or(0),
            line_style: if !marker.is_empty() && label.to_lowercase().contains(&marker) {
                LineStyle::Dashed
            } else {
                LineStyle::Solid
            },
        })
        .collect()
}
