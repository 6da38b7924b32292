//! HRV feature allow-list and the global/segment feature filter.
//!
//! Report exports pad their row labels to a fixed width (`"  Mean HR (beats/min):        "`).
//! Labels are normalized before any comparison, so the allow-list is kept as
//! structured `(name, unit, section)` entries rather than padded strings.
//!
//! With segments enabled, a row whose second and third cells read `Time` and
//! `Beats total` opens the embedded per-segment table. The following row holds
//! the units, and every row after it whose third cell is a plain number is one
//! segment.

use crate::paths::StateStyle;
use crate::report::{load_reports, ExtractOptions, META_COLUMNS};
use crate::table::{is_missing, Table, MISSING};
use anyhow::{Context, Result};
use chrono::NaiveTime;
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    TimeDomain,
    Geometric,
    PeakFrequency,
    AbsolutePower,
    RelativePower,
    NormalizedPower,
    Ratio,
    Respiration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    #[serde(default)]
    pub unit: Option<String>,
    pub section: Section,
}

impl FeatureSpec {
    fn new(name: &str, unit: Option<&str>, section: Section) -> Self {
        FeatureSpec {
            name: name.to_string(),
            unit: unit.map(str::to_string),
            section,
        }
    }

    /// Canonical label, e.g. `Mean HR (beats/min):`.
    pub fn label(&self) -> String {
        match &self.unit {
            Some(unit) => normalize_label(&format!("{} ({}):", self.name, unit)),
            None => normalize_label(&format!("{}:", self.name)),
        }
    }
}

/// Trims and collapses internal whitespace.
pub fn normalize_label(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    Feature(String),
    /// Target label; the value is a `hh:mm:ss` range converted to seconds.
    Renamed(String),
    Section(String),
}

#[derive(Debug, Clone)]
pub struct AllowList {
    pub features: Vec<FeatureSpec>,
    /// (source label, target label); the value is converted to elapsed seconds.
    pub renamed: Vec<(String, String)>,
    pub section_headers: Vec<String>,
}

pub const TIME_LENGTH_LABEL: &str = "Time length (sec):";
pub const SAMPLE_LIMITS_LABEL: &str = "Sample limits (hh:mm:ss):";

impl AllowList {
    /// Features of the Kubios HRV report exports.
    pub fn kubios() -> Self {
        use Section::*;
        let features = [
            ("Beats corrected", Some("%"), TimeDomain),
            ("Time length", Some("sec"), TimeDomain),
            ("Mean RR", Some("ms"), TimeDomain),
            ("SDNN", Some("ms"), TimeDomain),
            ("Mean HR", Some("beats/min"), TimeDomain),
            ("SD HR", Some("beats/min"), TimeDomain),
            ("Min HR", Some("beats/min"), TimeDomain),
            ("Max HR", Some("beats/min"), TimeDomain),
            ("RMSSD", Some("ms"), TimeDomain),
            ("NNxx", Some("beats"), TimeDomain),
            ("pNNxx", Some("%"), TimeDomain),
            ("SDANN", Some("ms"), TimeDomain),
            ("SDNN index", Some("ms"), TimeDomain),
            ("RR tri index", None, Geometric),
            ("TINN", Some("ms"), Geometric),
            ("DC", Some("ms"), TimeDomain),
            ("DCmod", Some("ms"), TimeDomain),
            ("AC", Some("ms"), TimeDomain),
            ("ACmod", Some("ms"), TimeDomain),
            ("VLF", Some("Hz"), PeakFrequency),
            ("LF", Some("Hz"), PeakFrequency),
            ("HF", Some("Hz"), PeakFrequency),
            ("VLF", Some("ms^2"), AbsolutePower),
            ("LF", Some("ms^2"), AbsolutePower),
            ("HF", Some("ms^2"), AbsolutePower),
            ("VLF", Some("log"), AbsolutePower),
            ("LF", Some("log"), AbsolutePower),
            ("HF", Some("log"), AbsolutePower),
            ("VLF", Some("%"), RelativePower),
            ("LF", Some("%"), RelativePower),
            ("HF", Some("%"), RelativePower),
            ("LF", Some("n.u."), NormalizedPower),
            ("HF", Some("n.u."), NormalizedPower),
            ("Total power", Some("ms^2"), AbsolutePower),
            ("LF/HF ratio", None, Ratio),
            ("RESP", Some("Hz"), Respiration),
        ]
        .into_iter()
        .map(|(name, unit, section)| FeatureSpec::new(name, unit, section))
        .collect();

        AllowList {
            features,
            renamed: vec![(SAMPLE_LIMITS_LABEL.to_string(), TIME_LENGTH_LABEL.to_string())],
            section_headers: [
                "Geometric parameters",
                "Frequency-Domain Results",
                "Peak frequencies",
                "Absolute powers",
                "Relative powers",
                "Normalized powers",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }

    /// Replaces the feature entries with those of a JSON array of `FeatureSpec`.
    pub fn with_features_from_json(mut self, path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read feature list {}", path.display()))?;
        self.features = serde_json::from_str(&text)
            .with_context(|| format!("Invalid feature list {}", path.display()))?;
        Ok(self)
    }

    pub fn classify(&self, label: &str) -> Option<Match> {
        let label = normalize_label(label);
        if label.is_empty() {
            return None;
        }
        if let Some((_, target)) = self.renamed.iter().find(|(source, _)| *source == label) {
            return Some(Match::Renamed(target.clone()));
        }
        if self.features.iter().any(|f| f.label() == label) {
            return Some(Match::Feature(label));
        }
        if self.section_headers.iter().any(|h| *h == label) {
            return Some(Match::Section(label));
        }
        None
    }
}

/// Columns of the embedded segment table kept by the filter.
pub const SEGMENT_FEATURES: [&str; 10] = [
    "Beats corrected",
    "Mean RR",
    "SDNN",
    "Mean HR",
    "RMSSD",
    "VLF power",
    "LF power",
    "HF power",
    "LF/HF ratio",
    "RESP",
];

/// Parameters the meeting plots accept.
pub const PLOT_PARAMETERS: [&str; 37] = [
    "PNS index",
    "SNS index",
    "Stress index",
    "EE activity",
    "Intensity",
    "Load",
    "VO2",
    "Mean RR",
    "SDNN",
    "Mean HR",
    "SD HR",
    "Min HR",
    "Max HR",
    "RMSSD",
    "NNxx",
    "pNNxx",
    "HRVti",
    "TINN",
    "DC",
    "DCmod",
    "AC",
    "ACmod",
    "VLF peak",
    "LF peak",
    "HF peak",
    "VLF power",
    "LF power",
    "HF power",
    "LF/HF ratio",
    "RESP",
    "SD1",
    "SD2",
    "SD2/SD1",
    "ApEn",
    "SampEn",
    "DFA a1",
    "DFA a2",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Global,
    Segment(usize),
}

impl fmt::Display for RowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKind::Global => f.write_str("global"),
            RowKind::Segment(n) => write!(f, "segment{}", n),
        }
    }
}

impl Serialize for RowKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Tags {
    pub subject: String,
    pub meet: String,
    pub state: String,
    pub therapy: String,
}

impl Tags {
    pub fn from_meta_row(row: &[String]) -> Tags {
        let get = |i: usize| row.get(i).cloned().unwrap_or_default();
        Tags {
            subject: get(0),
            meet: get(1),
            state: get(2),
            therapy: get(3),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    pub subject: String,
    pub meet: String,
    pub state: String,
    pub therapy: String,
    #[serde(rename = "type")]
    pub kind: RowKind,
    pub col1: String,
    pub col2: String,
}

impl FeatureRow {
    fn new(tags: &Tags, kind: RowKind, label: String, value: String) -> Self {
        FeatureRow {
            subject: tags.subject.clone(),
            meet: tags.meet.clone(),
            state: tags.state.clone(),
            therapy: tags.therapy.clone(),
            kind,
            col1: label,
            col2: value,
        }
    }

    fn key(&self) -> (String, String, String, String, String, String, String) {
        (
            self.subject.clone(),
            self.meet.clone(),
            self.state.clone(),
            self.therapy.clone(),
            self.kind.to_string(),
            self.col1.clone(),
            self.col2.clone(),
        )
    }
}

/// `"HH:MM:SS - HH:MM:SS"` to elapsed seconds (end minus start).
pub fn elapsed_seconds(range: &str) -> Option<f64> {
    let (start, end) = range.split_once('-')?;
    let start = NaiveTime::parse_from_str(start.trim(), "%H:%M:%S").ok()?;
    let end = NaiveTime::parse_from_str(end.trim(), "%H:%M:%S").ok()?;
    let seconds = (end - start).num_milliseconds() as f64 / 1000.0;
    Some((seconds * 100.0).round() / 100.0)
}

static PLAIN_DECIMAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+(\.\d*)?|\.\d+)$").unwrap());

/// Digits with at most one decimal point.
fn is_plain_decimal(s: &str) -> bool {
    PLAIN_DECIMAL.is_match(s.trim())
}

fn is_segment_header(cells: &[String]) -> bool {
    let at = |i: usize| cells.get(i).map(|c| c.trim()).unwrap_or("");
    at(1) == "Time" && at(2) == "Beats total"
}

fn value_cell(cells: &[String], idx: usize) -> String {
    match cells.get(idx) {
        Some(v) if !is_missing(v) => v.clone(),
        _ => MISSING.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FilterOptions {
    /// Also unpack the embedded per-segment table.
    pub segments: bool,
    /// Emit section header rows (with an empty value).
    pub section_headers: bool,
}

enum Mode {
    Global,
    Units(Vec<String>),
    Segments {
        columns: Vec<(String, usize)>,
        index: usize,
    },
}

pub struct FeatureFilter {
    pub allow: AllowList,
    pub options: FilterOptions,
}

impl FeatureFilter {
    pub fn new(allow: AllowList, options: FilterOptions) -> Self {
        FeatureFilter { allow, options }
    }

    fn segment_columns(header: &[String], units: &[String]) -> Vec<(String, usize)> {
        let mut columns: Vec<(String, usize)> = Vec::new();
        for (idx, name) in header.iter().enumerate() {
            let name = name.trim();
            if !SEGMENT_FEATURES.contains(&name) {
                continue;
            }
            let unit = units
                .get(idx)
                .map(|u| u.trim())
                .filter(|u| !is_missing(u))
                .unwrap_or("");
            if unit.contains("(n.u.)") || unit.to_ascii_lowercase().contains("(count)") {
                continue;
            }
            // a repeated key keeps its first position with the last column
            let key = if unit.is_empty() {
                name.to_string()
            } else {
                format!("{} {}", name, unit)
            };
            match columns.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => entry.1 = idx,
                None => columns.push((key, idx)),
            }
        }
        columns
    }

    fn global_row(&self, tags: &Tags, cells: &[String]) -> Option<FeatureRow> {
        let label = cells.first()?;
        match self.allow.classify(label)? {
            Match::Feature(label) => Some(FeatureRow::new(
                tags,
                RowKind::Global,
                label,
                value_cell(cells, 1),
            )),
            Match::Renamed(target) => {
                let value = cells
                    .get(1)
                    .and_then(|v| elapsed_seconds(v))
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| MISSING.to_string());
                Some(FeatureRow::new(tags, RowKind::Global, target, value))
            }
            Match::Section(label) if self.options.section_headers => Some(FeatureRow::new(
                tags,
                RowKind::Global,
                label,
                String::new(),
            )),
            Match::Section(_) => None,
        }
    }

    /// Single pass over tagged rows; see the module docs for the segment layout.
    pub fn filter_rows<'a, I>(&self, rows: I) -> Vec<FeatureRow>
    where
        I: IntoIterator<Item = (Tags, &'a [String])>,
    {
        let mut out = Vec::new();
        let mut mode = Mode::Global;

        for (tags, cells) in rows {
            // a row ending the segment table is re-read in global mode
            loop {
                match &mut mode {
                    Mode::Global => {
                        // header row of the segment table, or a plain label/value row
                        if self.options.segments && is_segment_header(cells) {
                            mode = Mode::Units(cells.to_vec());
                        } else if let Some(row) = self.global_row(&tags, cells) {
                            out.push(row);
                        }
                        break;
                    }
                    Mode::Units(header) => {
                        // units row: fix the feature columns for every segment row
                        let columns = Self::segment_columns(header, cells);
                        mode = Mode::Segments { columns, index: 1 };
                        break;
                    }
                    Mode::Segments { columns, index } => {
                        let marker = cells.get(2).map(String::as_str).unwrap_or("");
                        if !is_plain_decimal(marker) {
                            // the segment table ended; treat this row as a regular one
                            mode = Mode::Global;
                            continue;
                        }
                        // one row per mapped feature
                        for (feature, col) in columns.iter() {
                            out.push(FeatureRow::new(
                                &tags,
                                RowKind::Segment(*index),
                                feature.clone(),
                                value_cell(cells, *col),
                            ));
                        }
                        *index += 1;
                        break;
                    }
                }
            }
        }
        out
    }
}

/// Filters a metadata table produced by [`crate::report::extract_metadata`].
pub fn filter_metadata(table: &Table, filter: &FeatureFilter) -> Vec<FeatureRow> {
    let rows = table.rows.iter().map(|row| {
        let cells = row.get(META_COLUMNS..).unwrap_or(&[]);
        (Tags::from_meta_row(row), cells)
    });
    let out = filter.filter_rows(rows);
    info!("Kept {} of {} metadata rows", out.len(), table.len());
    out
}

/// Reads reports directly and keeps the allow-listed rows, de-duplicated and
/// sorted by subject, meet and state.
pub fn global_table(
    root: &Path,
    options: &ExtractOptions,
    filter: &FeatureFilter,
) -> Result<Vec<FeatureRow>> {
    if !root.is_dir() {
        anyhow::bail!("{} is not a directory", root.display());
    }
    let options = ExtractOptions {
        state_style: StateStyle::Merged,
        ..options.clone()
    };

    let mut all = Vec::new();
    for report in load_reports(root, &options) {
        let tags = Tags {
            subject: report.session.subject.clone(),
            meet: report.session.meeting.clone(),
            state: report.session.state_label(options.state_style),
            therapy: String::new(),
        };
        let rows = report
            .rows
            .iter()
            .map(|r| (tags.clone(), r.as_slice()));
        all.extend(filter.filter_rows(rows));
    }

    // identical rows from duplicated exports are kept once
    let mut seen = HashSet::new();
    all.retain(|row| seen.insert(row.key()));
    all.sort_by(|a, b| {
        (&a.subject, &a.meet, &a.state).cmp(&(&b.subject, &b.meet, &b.state))
    });
    info!(
        "Collected {} feature rows for {} subjects",
        all.len(),
        all.iter().map(|r| &r.subject).collect::<HashSet<_>>().len()
    );
    Ok(all)
}
