use crate::features::normalize_label;
use crate::output::{write_workbook, Sheet};
use crate::report::read_report;
use crate::table::{format_value, parse_number};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

static SDI_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)_SDI\.csv$").unwrap());
static UNSAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9a-zA-Z_]").unwrap());

pub const SDI_FEATURES: [&str; 7] = [
    "Mean RR (ms):",
    "SDNN (ms):",
    "Mean HR (beats/min):",
    "SD HR (beats/min):",
    "Min HR (beats/min):",
    "Max HR (beats/min):",
    "RMSSD (ms):",
];

/// Subject number of a `<digits>_SDI.csv` file name.
pub fn sdi_subject(file_name: &str) -> Option<&str> {
    SDI_FILE
        .captures(file_name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Replaces every character Excel is unhappy with by `_`.
pub fn safe_sheet_name(feature: &str) -> String {
    UNSAFE.replace_all(feature, "_").into_owned()
}

fn first_cell(row: &[String]) -> String {
    row.first()
        .map(|c| c.trim().to_lowercase())
        .unwrap_or_default()
}

/// Rows from the first `mean rr ... ms` label through the last `rmssd ... ms` label.
pub fn feature_row_range(rows: &[Vec<String>]) -> Option<(usize, usize)> {
    let start = rows.iter().position(|r| {
        let label = first_cell(r);
        label.contains("mean rr") && label.contains("ms")
    })?;
    let end = rows.iter().rposition(|r| {
        let label = first_cell(r);
        label.contains("rmssd") && label.contains("ms")
    })?;
    (start <= end).then_some((start, end))
}

/// Values after the label, up to the second consecutive blank cell.
pub fn feature_values(row: &[String]) -> Vec<Option<f64>> {
    let mut values = Vec::new();
    let mut blanks = 0;
    for cell in row.iter().skip(1) {
        let cell = cell.trim();
        if cell.is_empty() {
            blanks += 1;
            if blanks >= 2 {
                break;
            }
        } else {
            blanks = 0;
            values.push(parse_number(cell));
        }
    }
    values
}

#[derive(Debug, Clone, Default)]
pub struct SdiWorkbook {
    /// Feature label → (subject row name, values), in file order.
    pub features: Vec<(String, Vec<(String, Vec<Option<f64>>)>)>,
}

impl SdiWorkbook {
    pub fn sheets(&self) -> Vec<Sheet> {
        self.features
            .iter()
            .filter(|(label, rows)| {
                if rows.is_empty() {
                    warn!("No data collected for feature '{}', skipping sheet", label);
                }
                !rows.is_empty()
            })
            .map(|(label, rows)| {
                let width = rows.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
                let mut sheet = Sheet::new(safe_sheet_name(label));
                let mut header = vec![String::new()];
                header.extend((1..=width).map(|i| format!("SAMPLE {}", i)));
                sheet.push(header);
                for (subject, values) in rows {
                    let mut row = vec![subject.clone()];
                    row.extend(values.iter().map(|v| format_value(*v)));
                    sheet.push(row);
                }
                sheet
            })
            .collect()
    }
}

pub fn subject_features(path: &Path) -> Result<HashMap<String, Vec<Option<f64>>>> {
    // Blank cells are kept empty so the two-blank stop rule sees them.
    let rows = read_report(path, "")?;
    let (start, end) = feature_row_range(&rows)
        .with_context(|| format!("Could not find feature rows in {}", path.display()))?;
    Ok(rows[start..=end]
        .iter()
        .filter_map(|r| {
            let label = normalize_label(r.first()?);
            Some((label, feature_values(r)))
        })
        .collect())
}

pub fn sdi_workbook(dir: &Path) -> Result<SdiWorkbook> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    let mut workbook = SdiWorkbook {
        features: SDI_FEATURES
            .iter()
            .map(|f| (f.to_string(), Vec::new()))
            .collect(),
    };

    for path in entries {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with("_SDI.csv") {
            continue;
        }
        let Some(number) = sdi_subject(name) else {
            warn!("Skipping file (name does not match '<number>_SDI.csv'): {}", name);
            continue;
        };
        let subject = format!("subject{}", number);

        let features = match subject_features(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!("{:#}", e);
                continue;
            }
        };
        debug!("{}: {} feature rows", subject, features.len());

        for (label, rows) in &mut workbook.features {
            match features.get(label.as_str()) {
                Some(values) => rows.push((subject.clone(), values.clone())),
                None => warn!("Feature '{}' not found for {} in {}", label, subject, name),
            }
        }
    }
    Ok(workbook)
}

pub fn write_sdi_workbook(dir: &Path, output: &Path) -> Result<()> {
    let workbook = sdi_workbook(dir)?;
    let sheets = workbook.sheets();
    info!("Collected {} feature sheets from {}", sheets.len(), dir.display());
    write_workbook(output, &sheets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn subject_from_file_name() {
        assert_eq!(sdi_subject("18_SDI.csv"), Some("18"));
        assert_eq!(sdi_subject("x18_SDI.csv"), None);
        assert_eq!(sdi_subject("18_SDI.csv.bak"), None);
    }

    #[test]
    fn values_stop_after_two_blanks() {
        let row = cells(&["Mean HR (beats/min):", "70", "", "72", "x", "", "", "99"]);
        assert_eq!(feature_values(&row), vec![Some(70.0), Some(72.0), None]);
    }

    #[test]
    fn row_range_is_inclusive() {
        let rows = vec![
            cells(&["header"]),
            cells(&[" Mean RR  (ms): ", "1"]),
            cells(&["SDNN (ms):", "2"]),
            cells(&["RMSSD (ms):", "3"]),
            cells(&["tail"]),
        ];
        assert_eq!(feature_row_range(&rows), Some((1, 3)));
        assert_eq!(feature_row_range(&rows[2..]), None);
    }

    #[test]
    fn sheet_names_replace_symbols() {
        assert_eq!(safe_sheet_name("Mean HR (beats/min):"), "Mean_HR__beats_min__");
    }

    #[test]
    fn workbook_collects_subjects_per_feature() {
        let dir = tempfile::tempdir().unwrap();
        let body = "Report\nMean RR  (ms):,800,810\nSDNN (ms):,40,41\nMean HR (beats/min):,75,74\n\
SD HR (beats/min):,3,4\nMin HR (beats/min):,60,61\nMax HR (beats/min):,90,91\nRMSSD (ms):,30,31\n";
        std::fs::write(dir.path().join("18_SDI.csv"), body).unwrap();
        std::fs::write(dir.path().join("notes_SDI.csv"), body).unwrap();

        let book = sdi_workbook(dir.path()).unwrap();
        let sheets = book.sheets();
        assert_eq!(sheets.len(), 7);
        assert_eq!(sheets[0].name, "Mean_RR__ms__");
        assert_eq!(sheets[0].rows[0], cells(&["", "SAMPLE 1", "SAMPLE 2"]));
        assert_eq!(sheets[0].rows[1], cells(&["subject18", "800", "810"]));
    }
}
