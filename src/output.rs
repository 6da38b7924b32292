use crate::table::{Table, MISSING};
use anyhow::{Context, Result};
use rust_xlsxwriter::Workbook;
use serde::{Serialize, Serializer};
use std::path::Path;

/// Excel's limit on sheet name length.
const SHEET_NAME_LIMIT: usize = 31;

/// One named worksheet of string cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Sheet {
            name: name.into(),
            rows: Vec::new(),
        }
    }

    /// Header row followed by the table rows.
    pub fn from_table(name: impl Into<String>, table: &Table) -> Self {
        let mut rows = Vec::with_capacity(table.len() + 1);
        rows.push(table.headers.clone());
        rows.extend(table.rows.iter().cloned());
        Sheet {
            name: name.into(),
            rows,
        }
    }

    pub fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }
}

/// Replaces the characters Excel forbids in sheet names and truncates to the limit.
pub fn sheet_name(text: &str) -> String {
    text.trim()
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            c => c,
        })
        .take(SHEET_NAME_LIMIT)
        .collect()
}

/// Serializes a missing value as the missing marker.
pub fn serialize_missing<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.serialize_f64(*v),
        None => serializer.serialize_str(MISSING),
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    Ok(())
}

pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    create_parent(path)?;
    println!("Writing results to {}", path.display());
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_table(path: &Path, table: &Table) -> Result<()> {
    println!("Writing results to {}", path.display());
    table.write_csv(path)
}

fn as_number(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Writes the sheets into one workbook; numeric-looking cells become numbers.
pub fn write_workbook(path: &Path, sheets: &[Sheet]) -> Result<()> {
    create_parent(path)?;
    let mut workbook = Workbook::new();
    for sheet in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet
            .set_name(sheet_name(&sheet.name))
            .with_context(|| format!("Invalid sheet name '{}'", sheet.name))?;
        for (r, row) in sheet.rows.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                let (r, c) = (r as u32, c as u16);
                match as_number(cell) {
                    Some(v) => worksheet.write_number(r, c, v)?,
                    None if cell.is_empty() => continue,
                    None => worksheet.write_string(r, c, cell)?,
                };
            }
        }
    }

    println!("Writing results to {}", path.display());
    workbook
        .save(path)
        .with_context(|| format!("Failed to save workbook {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Row {
        name: &'static str,
        #[serde(serialize_with = "serialize_missing")]
        value: Option<f64>,
    }

    #[test]
    fn sheet_names_are_excel_safe() {
        assert_eq!(sheet_name("neut1 T1"), "neut1 T1");
        assert_eq!(sheet_name(" a/b:c[1]? "), "a_b_c_1__");
        assert_eq!(sheet_name(&"x".repeat(40)).len(), 31);
    }

    #[test]
    fn missing_values_written_as_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/rows.csv");
        write_rows(
            &path,
            &[
                Row { name: "a", value: Some(1.5) },
                Row { name: "b", value: None },
            ],
        )
        .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "name,value\na,1.5\nb,NA\n");
    }

    #[test]
    fn workbook_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");
        let mut sheet = Sheet::new("meet 1");
        sheet.push(vec!["Feature".into(), "Value".into()]);
        sheet.push(vec!["Mean HR (beats/min):".into(), "72.5".into()]);
        write_workbook(&path, &[sheet]).unwrap();
        assert!(path.exists());
    }
}
