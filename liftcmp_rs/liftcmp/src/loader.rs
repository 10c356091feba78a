//! Readers for the lab's motion, storage, marker, CSV and XML table files.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::debug;
use xml::reader::{EventReader, XmlEvent};

use crate::table::{Absence, Table, TableSlot, TIME_COLUMN};
use crate::CycleError;

const STORAGE_SENTINEL: &str = "endheader";
const TRC_SENTINEL: &str = "Frame#";

/// Header line positions tried after the `endheader` sentinel. Some files
/// carry a blank or label line between the sentinel and the column names.
const HEADER_OFFSET_CANDIDATES: [usize; 3] = [1, 2, 3];

/// Data line positions tried after the `Frame#` line of a marker file.
const TRC_DATA_OFFSET_CANDIDATES: [usize; 3] = [2, 3, 4];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Trc,
    Mot,
    Sto,
    Csv,
    Xml,
    Generic,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(FileKind::from_extension)
            .unwrap_or(FileKind::Generic)
    }

    pub fn from_extension(ext: &str) -> Self {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "trc" => FileKind::Trc,
            "mot" => FileKind::Mot,
            "sto" => FileKind::Sto,
            "csv" => FileKind::Csv,
            "xml" => FileKind::Xml,
            _ => FileKind::Generic,
        }
    }

    /// Motion and storage files always carry a time column.
    pub fn requires_time(self) -> bool {
        matches!(self, FileKind::Mot | FileKind::Sto)
    }
}

/// Load a table from `path`, dispatching on its extension.
pub fn load_table(path: &Path) -> Result<Table, CycleError> {
    if !path.exists() {
        return Err(CycleError::MissingFile(path.to_path_buf()));
    }
    let text = fs::read_to_string(path).map_err(|e| CycleError::Load {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_table(&text, FileKind::from_path(path)).map_err(|e| CycleError::Load {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Load a table, substituting an absent placeholder when the file is missing
/// or cannot be parsed.
pub fn load_slot(path: &Path) -> TableSlot {
    match load_table(path) {
        Ok(table) => TableSlot::Present(table),
        Err(CycleError::MissingFile(_)) => {
            debug!("{} unavailable: file missing", path.display());
            TableSlot::Absent(Absence::MissingFile)
        }
        Err(err) => {
            debug!("{} unavailable: {}", path.display(), err);
            TableSlot::Absent(Absence::Unreadable(err.to_string()))
        }
    }
}

/// Parse file contents with the strategy for `kind`, falling back to the
/// generic whitespace-delimited reader.
pub fn parse_table(text: &str, kind: FileKind) -> Result<Table, CycleError> {
    let primary = match kind {
        FileKind::Mot | FileKind::Sto => parse_storage(text),
        FileKind::Trc => parse_trc(text),
        FileKind::Csv => parse_csv(text),
        FileKind::Xml => parse_xml(text),
        FileKind::Generic => return parse_delimited(text),
    };
    match primary {
        Ok(table) => Ok(table),
        Err(err) => {
            debug!("{:?} reader failed ({}), trying generic reader", kind, err);
            match parse_delimited(text) {
                // motion and storage tables are only usable with a time axis
                Ok(table) if kind.requires_time() && !table.contains(TIME_COLUMN) => Err(err),
                Ok(table) => Ok(table),
                Err(_) => Err(err),
            }
        }
    }
}

fn parse_storage(text: &str) -> Result<Table, CycleError> {
    let lines: Vec<&str> = text.lines().collect();
    let sentinel = lines
        .iter()
        .position(|line| line.to_ascii_lowercase().contains(STORAGE_SENTINEL))
        .ok_or_else(|| CycleError::InvalidTable("no 'endheader' line".into()))?;

    for offset in HEADER_OFFSET_CANDIDATES {
        let header_idx = sentinel + offset;
        if header_idx >= lines.len() {
            break;
        }
        let names = canonical_names(lines[header_idx].split_whitespace());
        match parse_rows(names, &lines[header_idx + 1..]) {
            Ok(table) if table.contains(TIME_COLUMN) => return Ok(table),
            Ok(_) => debug!("header offset {} has no time column", offset),
            Err(err) => debug!("header offset {} rejected: {}", offset, err),
        }
    }
    Err(CycleError::InvalidTable(format!(
        "no column line with a time column within {} lines of endheader",
        HEADER_OFFSET_CANDIDATES.len()
    )))
}

fn parse_trc(text: &str) -> Result<Table, CycleError> {
    let lines: Vec<&str> = text.lines().collect();
    let header_idx = lines
        .iter()
        .position(|line| line.contains(TRC_SENTINEL))
        .ok_or_else(|| CycleError::InvalidTable("no 'Frame#' line".into()))?;

    let markers: Vec<&str> = lines[header_idx]
        .split('\t')
        .skip(2)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let axes: Vec<String> = lines
        .get(header_idx + 1)
        .map(|line| {
            line.split_whitespace()
                .map(|s| s.trim_end_matches(|c: char| c.is_ascii_digit()).to_string())
                .collect()
        })
        .unwrap_or_default();

    let mut raw = vec!["frame".to_string(), "Time".to_string()];
    for (m, marker) in markers.iter().enumerate() {
        for (j, default_axis) in ["X", "Y", "Z"].iter().enumerate() {
            let axis = axes
                .get(m * 3 + j)
                .filter(|a| !a.is_empty())
                .map(String::as_str)
                .unwrap_or(default_axis);
            raw.push(format!("{}_{}", marker, axis));
        }
    }
    let names = canonical_names(raw.iter().map(String::as_str));

    for offset in TRC_DATA_OFFSET_CANDIDATES {
        let start = header_idx + offset;
        if start > lines.len() {
            break;
        }
        match parse_rows(names.clone(), &lines[start..]) {
            Ok(table) if !table.is_empty() => return Ok(table),
            Ok(_) => {}
            Err(err) => debug!("marker data offset {} rejected: {}", offset, err),
        }
    }
    Err(CycleError::InvalidTable("no marker data rows found".into()))
}

fn parse_csv(text: &str) -> Result<Table, CycleError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| CycleError::InvalidTable(e.to_string()))?
        .clone();
    let names = canonical_names(headers.iter());
    if names.is_empty() {
        return Err(CycleError::InvalidTable("csv has no header".into()));
    }
    let mut columns = vec![Vec::new(); names.len()];
    for record in reader.records() {
        let record = record.map_err(|e| CycleError::InvalidTable(e.to_string()))?;
        for (idx, column) in columns.iter_mut().enumerate() {
            column.push(record.get(idx).map(parse_cell).unwrap_or(f64::NAN));
        }
    }
    Table::from_columns(names.into_iter().zip(columns))
}

/// Reads `<root><row a="1" b="2"/>...</root>`. Each child of the root is a
/// row; numeric attributes and numeric leaf elements become cells.
fn parse_xml(text: &str) -> Result<Table, CycleError> {
    let parser = EventReader::new(text.as_bytes());
    let mut order: Vec<String> = Vec::new();
    let mut rows: Vec<HashMap<String, f64>> = Vec::new();
    let mut depth = 0usize;
    let mut leaf: Option<String> = None;
    let mut leaf_text = String::new();

    for event in parser {
        match event.map_err(|e| CycleError::InvalidTable(e.to_string()))? {
            XmlEvent::StartElement {
                name, attributes, ..
            } => {
                depth += 1;
                if depth == 2 {
                    let mut row = HashMap::new();
                    for attr in attributes {
                        if let Ok(value) = attr.value.trim().parse::<f64>() {
                            record_key(&mut order, &attr.name.local_name);
                            row.insert(attr.name.local_name, value);
                        }
                    }
                    rows.push(row);
                } else if depth == 3 {
                    leaf = Some(name.local_name);
                    leaf_text.clear();
                }
            }
            XmlEvent::Characters(chars) => {
                if leaf.is_some() {
                    leaf_text.push_str(&chars);
                }
            }
            XmlEvent::EndElement { .. } => {
                if depth == 3 {
                    if let (Some(key), Some(row)) = (leaf.take(), rows.last_mut()) {
                        if let Ok(value) = leaf_text.trim().parse::<f64>() {
                            record_key(&mut order, &key);
                            row.insert(key, value);
                        }
                    }
                }
                depth = depth.saturating_sub(1);
            }
            _ => {}
        }
    }

    if order.is_empty() {
        return Err(CycleError::InvalidTable("xml has no numeric cells".into()));
    }
    let names = canonical_names(order.iter().map(String::as_str));
    let columns = order
        .iter()
        .map(|key| {
            rows.iter()
                .map(|row| row.get(key).copied().unwrap_or(f64::NAN))
                .collect::<Vec<f64>>()
        })
        .collect::<Vec<_>>();
    Table::from_columns(names.into_iter().zip(columns))
}

fn record_key(order: &mut Vec<String>, key: &str) {
    if !order.iter().any(|k| k == key) {
        order.push(key.to_string());
    }
}

/// Whitespace/tab-delimited text: the first all-numeric line starts the
/// data, the preceding non-blank line names the columns when it fits.
fn parse_delimited(text: &str) -> Result<Table, CycleError> {
    let lines: Vec<&str> = text.lines().collect();
    let data_start = lines
        .iter()
        .position(|line| {
            let fields = split_row(line);
            !fields.is_empty() && fields.iter().all(|f| f.parse::<f64>().is_ok())
        })
        .ok_or_else(|| CycleError::InvalidTable("no numeric rows".into()))?;
    let width = split_row(lines[data_start]).len();

    let header = lines[..data_start]
        .iter()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .filter(|fields| fields.len() == width);
    let names = match header {
        Some(fields) => canonical_names(fields.into_iter()),
        None => (0..width).map(|i| format!("col{}", i)).collect(),
    };
    parse_rows(names, &lines[data_start..])
}

fn parse_rows(names: Vec<String>, lines: &[&str]) -> Result<Table, CycleError> {
    if names.is_empty() {
        return Err(CycleError::InvalidTable("empty column line".into()));
    }
    Table::check_unique_names(&names)?;
    let mut columns = vec![Vec::new(); names.len()];
    for (line_no, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_row(line);
        if fields.len() > names.len() {
            return Err(CycleError::InvalidTable(format!(
                "row {} has {} fields, expected {}",
                line_no + 1,
                fields.len(),
                names.len()
            )));
        }
        for (idx, column) in columns.iter_mut().enumerate() {
            let value = match fields.get(idx) {
                Some(field) if field.is_empty() => f64::NAN,
                Some(field) => field.parse::<f64>().map_err(|_| {
                    CycleError::InvalidTable(format!(
                        "row {}: '{}' is not a number",
                        line_no + 1,
                        field
                    ))
                })?,
                None => f64::NAN,
            };
            column.push(value);
        }
    }
    Table::from_columns(names.into_iter().zip(columns))
}

/// Tab-separated rows keep empty cells; otherwise split on whitespace.
fn split_row(line: &str) -> Vec<&str> {
    let line = line.trim_end();
    if line.contains('\t') {
        line.split('\t').map(str::trim).collect()
    } else {
        line.split_whitespace().collect()
    }
}

fn parse_cell(value: &str) -> f64 {
    value.parse::<f64>().unwrap_or(f64::NAN)
}

/// Canonicalise `Time`/`TIME` to `time` and suffix repeated names `.1`, `.2`.
fn canonical_names<'a, I>(raw: I) -> Vec<String>
where
    I: Iterator<Item = &'a str>,
{
    let mut seen: HashMap<String, usize> = HashMap::new();
    raw.map(|name| {
        let name = name.trim();
        let base = if name.eq_ignore_ascii_case(TIME_COLUMN) {
            TIME_COLUMN.to_string()
        } else {
            name.to_string()
        };
        let count = seen.entry(base.clone()).or_insert(0);
        let out = if *count == 0 {
            base
        } else {
            format!("{}.{}", base, count)
        };
        *count += 1;
        out
    })
    .collect()
}

/// Write `table` as a storage file that [`load_table`] and the simulation
/// toolkit can read back.
pub fn write_storage<W: Write>(table: &Table, name: &str, mut out: W) -> Result<(), CycleError> {
    writeln!(out, "{}", name)?;
    writeln!(out, "version=1")?;
    writeln!(out, "nRows={}", table.n_rows())?;
    writeln!(out, "nColumns={}", table.n_columns())?;
    writeln!(out, "inDegrees=no")?;
    writeln!(out, "{}", STORAGE_SENTINEL)?;
    writeln!(out, "{}", table.names().join("\t"))?;
    let columns: Vec<_> = table.iter().map(|(_, c)| c).collect();
    for row in 0..table.n_rows() {
        let cells: Vec<String> = columns.iter().map(|c| format!("{:.6}", c[row])).collect();
        writeln!(out, "{}", cells.join("\t"))?;
    }
    out.flush()?;
    Ok(())
}
