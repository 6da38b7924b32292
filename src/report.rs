use crate::paths::{SessionPath, StateStyle};
use crate::table::{Table, MISSING};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::fs::File;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Number of metadata columns (`subject, meet, state, therapy`) leading every metadata row.
pub const META_COLUMNS: usize = 4;

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Replacement for blank cells and padding.
    pub sentinel: String,
    /// Files whose name contains any of these terms are skipped.
    pub exclude_terms: Vec<String>,
    /// Skip files whose name mentions `therapy`.
    pub skip_therapy_files: bool,
    /// Derive the therapy stage letter from `ECG_<letter>` in the file name.
    pub therapy_stage: bool,
    pub state_style: StateStyle,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            sentinel: MISSING.to_string(),
            exclude_terms: vec!["meta_data".to_string()],
            skip_therapy_files: false,
            therapy_stage: true,
            state_style: StateStyle::Split,
        }
    }
}

/// Reads a headerless report export, padding every row to the widest one.
pub fn read_report(path: &Path, sentinel: &str) -> Result<Vec<Vec<String>>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut rows = Vec::new();
    let mut max_cols = 0;
    for (i, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("Malformed row in {}", path.display()))?;
        let row: Vec<String> = record
            .iter()
            .enumerate()
            .map(|(j, cell)| {
                let cell = if i == 0 && j == 0 {
                    cell.strip_prefix('\u{feff}').unwrap_or(cell)
                } else {
                    cell
                };
                if cell.trim().is_empty() {
                    sentinel.to_string()
                } else {
                    cell.to_string()
                }
            })
            .collect();
        max_cols = max_cols.max(row.len());
        rows.push(row);
    }

    for row in &mut rows {
        row.resize(max_cols, sentinel.to_string());
    }
    Ok(rows)
}

pub fn is_report_file(path: &Path, options: &ExtractOptions) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let lower = name.to_ascii_lowercase();
    if !lower.ends_with(".csv") {
        return false;
    }
    if options
        .exclude_terms
        .iter()
        .any(|term| lower.contains(&term.to_ascii_lowercase()))
    {
        return false;
    }
    !(options.skip_therapy_files && lower.contains("therapy"))
}

pub fn discover_reports(root: &Path, options: &ExtractOptions) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_report_file(e.path(), options))
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// A parsed report tagged with the session it belongs to.
pub struct Report {
    pub session: SessionPath,
    pub rows: Vec<Vec<String>>,
}

/// Loads every report under `root`; files with a malformed path or unreadable
/// contents are logged and skipped.
pub fn load_reports(root: &Path, options: &ExtractOptions) -> Vec<Report> {
    let mut reports = Vec::new();
    for path in discover_reports(root, options) {
        let relative = path.strip_prefix(root).unwrap_or(&path);
        let mut session = match SessionPath::parse(relative).or_else(|_| SessionPath::parse(&path)) {
            Ok(session) => session,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        if !options.therapy_stage {
            session.therapy_stage = None;
        }

        match read_report(&path, &options.sentinel) {
            Ok(rows) => {
                debug!("Read {} rows from {}", rows.len(), path.display());
                reports.push(Report { session, rows });
            }
            Err(e) => warn!("Failed to process {}: {:#}", path.display(), e),
        }
    }
    reports
}

/// Builds the flat metadata table: `subject, meet, state, therapy, col1..colN`.
pub fn extract_metadata(root: &Path, options: &ExtractOptions) -> Result<Table> {
    if !root.is_dir() {
        anyhow::bail!("{} is not a directory", root.display());
    }
    let reports = load_reports(root, options);
    if reports.is_empty() {
        warn!("No CSV files found under {}", root.display());
    }

    let width = reports
        .iter()
        .flat_map(|r| r.rows.iter().map(Vec::len))
        .max()
        .unwrap_or(0);

    let mut headers = vec![
        "subject".to_string(),
        "meet".to_string(),
        "state".to_string(),
        "therapy".to_string(),
    ];
    headers.extend((1..=width).map(|i| format!("col{}", i)));
    let mut table = Table::new(headers);

    for report in &reports {
        let state = report.session.state_label(options.state_style);
        let stage = report.session.stage_label();
        for row in &report.rows {
            let mut out = Vec::with_capacity(META_COLUMNS + width);
            out.push(report.session.subject.clone());
            out.push(report.session.meeting.clone());
            out.push(state.clone());
            out.push(stage.clone());
            out.extend(row.iter().cloned());
            out.resize(META_COLUMNS + width, options.sentinel.clone());
            table.rows.push(out);
        }
    }

    info!(
        "Extracted {} rows from {} report files",
        table.len(),
        reports.len()
    );
    Ok(table)
}

pub fn metadata_path(root: &Path) -> PathBuf {
    root.join("meta_data.csv")
}

pub fn write_metadata(root: &Path, table: &Table) -> Result<PathBuf> {
    let path = metadata_path(root);
    println!("Writing results to {}", path.display());
    table.write_csv(&path)?;
    Ok(path)
}
