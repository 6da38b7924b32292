use crate::features::{elapsed_seconds, normalize_label, AllowList, Match};
use crate::output::{serialize_missing, sheet_name, write_rows, write_workbook, Sheet};
use crate::paths::meeting_number;
use crate::table::{is_missing, parse_number, Table, MISSING};
use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub const HR_FEATURE: &str = "Mean HR (beats/min):";
pub const THERAPY_VALUES: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    #[serde(rename = "Meeting")]
    pub meeting: u32,
    #[serde(rename = "Baseline HR", serialize_with = "serialize_missing")]
    pub baseline: Option<f64>,
    #[serde(rename = "Recovery HR", serialize_with = "serialize_missing")]
    pub recovery: Option<f64>,
    #[serde(rename = "Therapy1 HR", serialize_with = "serialize_missing")]
    pub therapy1: Option<f64>,
    #[serde(rename = "Therapy2 HR", serialize_with = "serialize_missing")]
    pub therapy2: Option<f64>,
    #[serde(rename = "Therapy3 HR", serialize_with = "serialize_missing")]
    pub therapy3: Option<f64>,
    #[serde(rename = "Therapy4 HR", serialize_with = "serialize_missing")]
    pub therapy4: Option<f64>,
    #[serde(rename = "Therapy Avg", serialize_with = "serialize_missing")]
    pub therapy_avg: Option<f64>,
}

struct MetaColumns {
    subject: usize,
    meet: usize,
    state: usize,
    label: usize,
    value: usize,
}

impl MetaColumns {
    fn of(table: &Table) -> Result<MetaColumns> {
        let col = |name: &str| {
            table
                .column_index(name)
                .with_context(|| format!("metadata table has no '{}' column", name))
        };
        Ok(MetaColumns {
            subject: col("subject")?,
            meet: col("meet")?,
            state: col("state")?,
            label: col("col1")?,
            value: col("col2")?,
        })
    }
}

pub fn subjects(table: &Table) -> Result<Vec<String>> {
    let idx = MetaColumns::of(table)?.subject;
    let set: BTreeSet<String> = table
        .rows
        .iter()
        .map(|r| r[idx].trim().to_string())
        .filter(|s| !is_missing(s))
        .collect();
    Ok(set.into_iter().collect())
}

/// One row per meeting for one feature: baseline, recovery and the first
/// four therapy values of the subject. An empty `meetings` list means every
/// meeting the subject has.
pub fn hr_summary(
    table: &Table,
    subject: &str,
    meetings: &[u32],
    feature: &str,
) -> Result<Vec<SummaryRow>> {
    let cols = MetaColumns::of(table)?;
    let feature = normalize_label(feature);
    let rows: Vec<&Vec<String>> = table
        .rows
        .iter()
        .filter(|r| r[cols.subject].trim() == subject && normalize_label(&r[cols.label]) == feature)
        .collect();

    let meetings: Vec<u32> = if meetings.is_empty() {
        let set: BTreeSet<u32> = rows.iter().filter_map(|r| meeting_number(&r[cols.meet])).collect();
        set.into_iter().collect()
    } else {
        meetings.to_vec()
    };

    let values = |meeting: u32, state: &str| -> Vec<Option<f64>> {
        rows.iter()
            .filter(|r| meeting_number(&r[cols.meet]) == Some(meeting))
            .filter(|r| r[cols.state].trim().to_lowercase().starts_with(state))
            .map(|r| parse_number(&r[cols.value]))
            .collect()
    };

    Ok(meetings
        .into_iter()
        .map(|meeting| {
            let mut therapy = values(meeting, "therapy");
            therapy.truncate(THERAPY_VALUES);
            therapy.resize(THERAPY_VALUES, None);
            let present: Vec<f64> = therapy.iter().flatten().copied().collect();
            let therapy_avg = if present.is_empty() {
                None
            } else {
                Some(present.iter().sum::<f64>() / present.len() as f64)
            };
            SummaryRow {
                meeting,
                baseline: values(meeting, "baseline").first().copied().flatten(),
                recovery: values(meeting, "recovery").first().copied().flatten(),
                therapy1: therapy[0],
                therapy2: therapy[1],
                therapy3: therapy[2],
                therapy4: therapy[3],
                therapy_avg,
            }
        })
        .collect())
}

/// Writes `<subject>_HR_summary.csv` for every subject of the table.
pub fn write_hr_summaries(
    table: &Table,
    feature: &str,
    meetings: &[u32],
    out_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for subject in subjects(table)? {
        let rows = hr_summary(table, &subject, meetings, feature)?;
        if rows.is_empty() {
            warn!("No {} values for {}", feature, subject);
            continue;
        }
        let path = out_dir.join(format!("{}_HR_summary.csv", subject));
        write_rows(&path, &rows)?;
        written.push(path);
    }
    Ok(written)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// The metadata rows of each meeting, unchanged.
    #[default]
    Raw,
    /// BASELINE and RECOVERY sections of the allow-listed features.
    States,
}

fn state_sheet(name: &str, rows: &[&Vec<String>], cols: &MetaColumns, allow: &AllowList) -> Sheet {
    let mut sheet = Sheet::new(name);
    for state in ["baseline", "recovery"] {
        sheet.push(vec![state.to_uppercase()]);
        sheet.push(vec!["Feature".to_string(), "Value".to_string()]);

        for row in rows.iter().filter(|r| r[cols.state].trim().eq_ignore_ascii_case(state)) {
            let value = &row[cols.value];
            match allow.classify(&row[cols.label]) {
                Some(Match::Section(label)) => sheet.push(vec![label]),
                Some(Match::Renamed(target)) => {
                    let seconds = if is_missing(value) {
                        MISSING.to_string()
                    } else {
                        elapsed_seconds(value)
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "Invalid".to_string())
                    };
                    sheet.push(vec![target, seconds]);
                }
                Some(Match::Feature(label)) => {
                    let combined = match row.get(cols.value + 1) {
                        Some(second) if !is_missing(second) => format!("{}, {}", value, second),
                        _ => value.clone(),
                    };
                    sheet.push(vec![label, combined]);
                }
                None => {}
            }
        }
        sheet.push(Vec::new());
    }
    sheet
}

/// One `patient_<subject>.xlsx` per subject with a sheet per meeting.
pub fn write_subject_workbooks(
    table: &Table,
    out_dir: &Path,
    layout: Layout,
    allow: &AllowList,
) -> Result<Vec<PathBuf>> {
    let cols = MetaColumns::of(table)?;
    let mut written = Vec::new();

    for subject in subjects(table)? {
        let rows: Vec<&Vec<String>> = table
            .rows
            .iter()
            .filter(|r| r[cols.subject].trim() == subject)
            .collect();

        let mut meets: Vec<String> = Vec::new();
        for r in &rows {
            let meet = r[cols.meet].trim().to_string();
            if !meets.contains(&meet) {
                meets.push(meet);
            }
        }

        let sheets: Vec<Sheet> = meets
            .iter()
            .map(|meet| {
                let in_meet: Vec<&Vec<String>> = rows
                    .iter()
                    .filter(|r| r[cols.meet].trim() == meet)
                    .copied()
                    .collect();
                let name = sheet_name(&meet.replace(' ', "_"));
                match layout {
                    Layout::Raw => {
                        let mut sheet = Sheet::new(name);
                        sheet.push(table.headers.clone());
                        sheet.rows.extend(in_meet.into_iter().cloned());
                        sheet
                    }
                    Layout::States => state_sheet(&name, &in_meet, &cols, allow),
                }
            })
            .collect();

        let path = out_dir.join(format!("patient_{}.xlsx", subject.replace(' ', "_")));
        write_workbook(&path, &sheets)?;
        written.push(path);
    }
    info!("Wrote {} subject workbooks", written.len());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> Table {
        let mut t = Table::new(["subject", "meet", "state", "therapy", "col1", "col2", "col3"]);
        let rows = [
            ["subject 12", "meet 1", "baseline", "", "  Mean HR (beats/min):   ", "70", "NA"],
            ["subject 12", "meet 1", "therapy", "A", "  Mean HR (beats/min):   ", "80", "NA"],
            ["subject 12", "meet 1", "therapy", "B", "  Mean HR (beats/min):   ", "90", "NA"],
            ["subject 12", "meet 1", "recovery", "", "  Sample limits (hh:mm:ss):", "00:00:00 - 00:05:00", "NA"],
            ["subject 12", "meet 1", "recovery", "", "  LF (Hz):", "0.1", "0.2"],
            ["subject 12", "meet 1", "recovery", "", " Absolute powers ", "NA", "NA"],
            ["subject 12", "meet 2", "baseline", "", "  SDNN (ms):", "40", "NA"],
        ];
        for r in rows {
            t.push_row(r.iter().map(|s| s.to_string()).collect());
        }
        t
    }

    #[test]
    fn summary_pads_therapy_and_averages_present() {
        let rows = hr_summary(&meta(), "subject 12", &[1, 2], HR_FEATURE).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].baseline, Some(70.0));
        assert_eq!(rows[0].recovery, None);
        assert_eq!(rows[0].therapy2, Some(90.0));
        assert_eq!(rows[0].therapy3, None);
        assert_eq!(rows[0].therapy_avg, Some(85.0));
        assert_eq!(rows[1].baseline, None);
        assert_eq!(rows[1].therapy_avg, None);
    }

    #[test]
    fn empty_meeting_list_uses_subject_meetings() {
        let rows = hr_summary(&meta(), "subject 12", &[], HR_FEATURE).unwrap();
        assert_eq!(rows.iter().map(|r| r.meeting).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn state_layout_sections() {
        let table = meta();
        let cols = MetaColumns::of(&table).unwrap();
        let rows: Vec<&Vec<String>> = table.rows.iter().take(6).collect();
        let sheet = state_sheet("meet_1", &rows, &cols, &AllowList::kubios());
        let text: Vec<Vec<&str>> = sheet
            .rows
            .iter()
            .map(|r| r.iter().map(String::as_str).collect())
            .collect();
        assert_eq!(text[0], vec!["BASELINE"]);
        assert_eq!(text[2], vec!["Mean HR (beats/min):", "70"]);
        assert_eq!(text[4], vec!["RECOVERY"]);
        assert_eq!(text[6], vec!["Time length (sec):", "300"]);
        assert_eq!(text[7], vec!["LF (Hz):", "0.1, 0.2"]);
        assert_eq!(text[8], vec!["Absolute powers"]);
    }

    #[test]
    fn workbooks_per_subject() {
        let dir = tempfile::tempdir().unwrap();
        let written =
            write_subject_workbooks(&meta(), dir.path(), Layout::Raw, &AllowList::kubios()).unwrap();
        assert_eq!(written, vec![dir.path().join("patient_subject_12.xlsx")]);
        assert!(written[0].exists());
    }

    #[test]
    fn state_workbook_has_a_sheet_per_meeting() {
        use crate::timing::{read_sheet, sheet_names};

        let dir = tempfile::tempdir().unwrap();
        let written =
            write_subject_workbooks(&meta(), dir.path(), Layout::States, &AllowList::kubios())
                .unwrap();
        let path = &written[0];
        assert_eq!(sheet_names(path).unwrap(), vec!["meet_1", "meet_2"]);

        let meet1 = read_sheet(path, "meet_1").unwrap();
        assert_eq!(meet1.headers[0], "BASELINE");
        assert_eq!(meet1.rows[0], vec!["Feature", "Value"]);
        assert_eq!(meet1.rows[1], vec!["Mean HR (beats/min):", "70"]);
        assert_eq!(meet1.rows[3][0], "RECOVERY");
        assert_eq!(meet1.rows[5], vec!["Time length (sec):", "300"]);
        assert_eq!(meet1.rows[6], vec!["LF (Hz):", "0.1, 0.2"]);
        assert_eq!(meet1.rows[7][0], "Absolute powers");

        let meet2 = read_sheet(path, "meet_2").unwrap();
        assert_eq!(meet2.rows[1], vec!["SDNN (ms):", "40"]);
        // therapy rows never reach the state layout
        assert!(meet1.rows.iter().all(|r| r[1] != "80" && r[1] != "90"));
    }
}
