use anyhow::{Context, Result};
use log::warn;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

/// Marker written for missing cells and missing results.
pub const MISSING: &str = "NA";

/// A loosely typed table: every cell is kept as the text it was read as.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<S: Into<String>>(headers: impl IntoIterator<Item = S>) -> Self {
        Table {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Appends a row, padding or truncating it to the header width.
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    /// Adds `Unnamed: <i>` columns up to `width`, padding existing rows.
    pub fn widen(&mut self, width: usize) {
        for i in self.headers.len()..width {
            self.headers.push(format!("Unnamed: {}", i));
        }
        for row in &mut self.rows {
            row.resize(self.headers.len(), String::new());
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn cell(&self, row: usize, name: &str) -> Option<&str> {
        let idx = self.column_index(name)?;
        self.rows.get(row).map(|r| r[idx].as_str())
    }

    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[idx].as_str()).collect())
    }

    pub fn read_csv(path: &Path) -> Result<Table> {
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(file);

        let headers: Vec<String> = rdr
            .headers()
            .with_context(|| format!("Failed to read header of {}", path.display()))?
            .iter()
            .enumerate()
            .map(|(i, h)| (if i == 0 { strip_bom(h) } else { h }).to_string())
            .collect();

        let mut table = Table::new(headers);
        for record in rdr.records() {
            let record = record.with_context(|| format!("Malformed row in {}", path.display()))?;
            if record.len() > table.headers.len() {
                let line = record.position().map(|p| p.line()).unwrap_or_default();
                warn!(
                    "{} line {} has {} cells for {} headers, adding unnamed columns",
                    path.display(),
                    line,
                    record.len(),
                    table.headers.len()
                );
                table.widen(record.len());
            }
            table.push_row(record.iter().map(str::to_string).collect());
        }
        Ok(table)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Stacks tables, taking the union of their columns in first-seen order.
    pub fn concat(tables: impl IntoIterator<Item = Table>) -> Table {
        let tables: Vec<Table> = tables.into_iter().collect();
        let mut headers: Vec<String> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for table in &tables {
            for h in &table.headers {
                if !positions.contains_key(h) {
                    positions.insert(h.clone(), headers.len());
                    headers.push(h.clone());
                }
            }
        }

        let width = headers.len();
        let mut out = Table::new(headers);
        for table in tables {
            let targets: Vec<usize> = table.headers.iter().map(|h| positions[h]).collect();
            for row in table.rows {
                let mut aligned = vec![String::new(); width];
                for (value, &target) in row.into_iter().zip(&targets) {
                    aligned[target] = value;
                }
                out.rows.push(aligned);
            }
        }
        out
    }
}

fn strip_bom(s: &str) -> &str {
    s.strip_prefix('\u{feff}').unwrap_or(s)
}

pub fn is_missing(cell: &str) -> bool {
    let cell = cell.trim();
    cell.is_empty() || cell == MISSING || cell.eq_ignore_ascii_case("nan")
}

pub fn parse_number(cell: &str) -> Option<f64> {
    if is_missing(cell) {
        return None;
    }
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => MISSING.to_string(),
    }
}

/// Orders numerically when both cells are numbers, otherwise as text.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    match (parse_number(a), parse_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}
