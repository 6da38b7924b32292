use crate::table::{parse_number, Table};
use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::path::Path;

const WORKBOOK_EXTENSIONS: [&str; 4] = ["xlsx", "xlsm", "xls", "ods"];

/// Spreadsheet formats calamine opens.
pub fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| WORKBOOK_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn render_cell(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

pub fn sheet_names(path: &Path) -> Result<Vec<String>> {
    let workbook = open_workbook_auto(path)
        .with_context(|| format!("Failed to open workbook {}", path.display()))?;
    Ok(workbook.sheet_names())
}

/// Reads one sheet as a table whose first row is the header.
///
/// Workbooks are read with calamine. A directory stands in for a workbook
/// holding one `<sheet>.csv` per sheet; any other path is read as plain CSV.
pub fn read_sheet(path: &Path, sheet: &str) -> Result<Table> {
    if path.is_dir() {
        return Table::read_csv(&path.join(format!("{}.csv", sheet)));
    }
    if !is_workbook(path) {
        return Table::read_csv(path);
    }

    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("Failed to open workbook {}", path.display()))?;
    let range = workbook
        .worksheet_range(sheet)
        .with_context(|| format!("Failed to read sheet '{}' of {}", sheet, path.display()))?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(r) => r.iter().map(render_cell).collect(),
        None => Vec::new(),
    };
    let mut table = Table::new(headers);
    for row in rows {
        table.push_row(row.iter().map(render_cell).collect());
    }
    debug!(
        "Read {} rows from sheet '{}' of {}",
        table.len(),
        sheet,
        path.display()
    );
    Ok(table)
}

/// Event × subject matrix of event times in seconds.
#[derive(Debug, Clone, Default)]
pub struct TimingTable {
    pub events: Vec<String>,
    pub subjects: Vec<String>,
    pub values: Vec<Vec<Option<f64>>>,
}

impl TimingTable {
    pub fn from_table(table: &Table) -> TimingTable {
        let subjects: Vec<String> = table
            .headers
            .iter()
            .skip(1)
            .map(|h| h.trim().to_string())
            .collect();
        let mut events = Vec::with_capacity(table.len());
        let mut values = Vec::with_capacity(table.len());
        for row in &table.rows {
            events.push(row.first().map(|e| e.trim().to_string()).unwrap_or_default());
            values.push(row.iter().skip(1).map(|c| parse_number(c)).collect());
        }
        TimingTable {
            events,
            subjects,
            values,
        }
    }

    pub fn has_event(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == event)
    }

    pub fn get(&self, event: &str, subject: &str) -> Option<f64> {
        let row = self.events.iter().position(|e| e == event)?;
        let col = self.subjects.iter().position(|s| s == subject)?;
        self.values[row].get(col).copied().flatten()
    }
}

/// Per-subject sample streams, one column per subject.
#[derive(Debug, Clone, Default)]
pub struct SignalTable {
    pub subjects: Vec<String>,
    pub columns: HashMap<String, Vec<Option<f64>>>,
    rows: usize,
}

impl SignalTable {
    pub fn from_table(table: &Table) -> SignalTable {
        let mut subjects = Vec::with_capacity(table.headers.len());
        let mut columns = HashMap::new();
        for (i, header) in table.headers.iter().enumerate() {
            let subject = header.trim().to_string();
            let values: Vec<Option<f64>> =
                table.rows.iter().map(|r| parse_number(&r[i])).collect();
            if columns.insert(subject.clone(), values).is_none() {
                subjects.push(subject);
            }
        }
        SignalTable {
            subjects,
            columns,
            rows: table.len(),
        }
    }

    pub fn column(&self, subject: &str) -> Option<&[Option<f64>]> {
        self.columns.get(subject).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// Subjects present in both tables, in timing column order.
pub fn common_subjects(timing: &TimingTable, signal: &SignalTable) -> Vec<String> {
    let in_timing: HashSet<&String> = timing.subjects.iter().collect();
    let in_signal: HashSet<&String> = signal.subjects.iter().collect();

    let mut no_data: Vec<&String> = in_timing.difference(&in_signal).copied().collect();
    let mut no_timing: Vec<&String> = in_signal.difference(&in_timing).copied().collect();
    no_data.sort();
    no_timing.sort();
    if !no_data.is_empty() {
        warn!("Subjects with a timing column but no data: {:?}", no_data);
    }
    if !no_timing.is_empty() {
        warn!("Subjects with data but no timing column: {:?}", no_timing);
    }

    let subjects: Vec<String> = timing
        .subjects
        .iter()
        .filter(|s| in_signal.contains(s))
        .cloned()
        .collect();
    if subjects.is_empty() {
        warn!("No common subject ids between timing and data");
    }
    subjects
}

/// Timing sheet belonging to a data sheet: `T1` → `timing_1`.
pub fn timing_sheet_for(data_sheet: &str) -> String {
    let suffix: String = data_sheet
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("timing_{}", suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing() -> TimingTable {
        let mut t = Table::new(["", "18", "19"]);
        t.push_row(vec!["neut1".into(), "66".into(), "NA".into()]);
        t.push_row(vec!["stress".into(), "300.5".into(), "abc".into()]);
        TimingTable::from_table(&t)
    }

    #[test]
    fn timing_lookup_handles_missing_values() {
        let t = timing();
        assert_eq!(t.get("neut1", "18"), Some(66.0));
        assert_eq!(t.get("stress", "18"), Some(300.5));
        assert_eq!(t.get("neut1", "19"), None);
        assert_eq!(t.get("stress", "19"), None);
        assert_eq!(t.get("trauma", "18"), None);
        assert_eq!(t.get("neut1", "20"), None);
    }

    #[test]
    fn common_subjects_keep_timing_order() {
        let mut s = Table::new(["19", "17", "18"]);
        s.push_row(vec!["1".into(), "2".into(), "3".into()]);
        let signal = SignalTable::from_table(&s);
        assert_eq!(common_subjects(&timing(), &signal), vec!["18", "19"]);
        assert_eq!(signal.len(), 1);
        assert_eq!(signal.column("17"), Some(&[Some(2.0)][..]));
    }

    #[test]
    fn sheet_names_map_to_timing() {
        assert_eq!(timing_sheet_for("T1"), "timing_1");
        assert_eq!(timing_sheet_for("T12"), "timing_12");
    }

    #[test]
    fn directory_sheets_are_csv_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("T1.csv"), "18,19\n1,2\n").unwrap();
        let t = read_sheet(dir.path(), "T1").unwrap();
        assert_eq!(t.headers, vec!["18", "19"]);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn integral_floats_render_without_fraction() {
        assert_eq!(render_cell(&Data::Float(18.0)), "18");
        assert_eq!(render_cell(&Data::Float(1.25)), "1.25");
        assert_eq!(render_cell(&Data::Empty), "");
    }
}
