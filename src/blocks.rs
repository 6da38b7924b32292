use crate::paths::meeting_number;
use crate::report::META_COLUMNS;
use crate::table::{is_missing, Table, MISSING};
use anyhow::Result;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

static CLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2}:\d{2}:\d{2}$").unwrap());
static UNNAMED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\.\d+)?$").unwrap());

/// Decides whether a row still belongs to the block being collected.
pub trait RowAcceptor {
    fn accept(&self, row: &[String], time_idx: usize) -> bool;
}

/// Accepts rows whose time cell is a strict `HH:MM:SS` clock value.
pub struct StrictClock;

impl RowAcceptor for StrictClock {
    fn accept(&self, row: &[String], time_idx: usize) -> bool {
        row.get(time_idx)
            .map(|cell| CLOCK.is_match(cell.trim()))
            .unwrap_or(false)
    }
}

/// Accepts rows until the first row with no value at all.
pub struct UntilBlank;

impl RowAcceptor for UntilBlank {
    fn accept(&self, row: &[String], _time_idx: usize) -> bool {
        !row.iter().all(|cell| is_missing(cell))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub subject: String,
    pub meeting: String,
    pub state: String,
    pub therapy: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Index of the first header row within the scanned rows.
    pub start_row: usize,
}

impl Block {
    pub fn into_table(self) -> Table {
        let mut headers = vec![
            "sub".to_string(),
            "meeting".to_string(),
            "state".to_string(),
            "therapy".to_string(),
        ];
        headers.extend(self.header);
        let mut table = Table::new(headers);
        for row in self.rows {
            let mut out = vec![
                self.subject.clone(),
                self.meeting.clone(),
                self.state.clone(),
                self.therapy.clone(),
            ];
            out.extend(row);
            table.push_row(out);
        }
        table
    }
}

/// Joins the two header rows column by column, suffixing repeated names with `.1`, `.2`, ...
pub fn build_header(row1: &[String], row2: &[String]) -> Vec<String> {
    let clean = |cell: Option<&String>| match cell {
        Some(c) if !is_missing(c) => c.trim().to_string(),
        _ => String::new(),
    };

    let width = row1.len().max(row2.len());
    let mut seen: HashMap<String, usize> = HashMap::new();
    (0..width)
        .map(|i| {
            let joined = format!("{} {}", clean(row1.get(i)), clean(row2.get(i)));
            let name = joined.split_whitespace().collect::<Vec<_>>().join(" ");
            match seen.get_mut(&name) {
                Some(count) => {
                    *count += 1;
                    format!("{}.{}", name, count)
                }
                None => {
                    seen.insert(name.clone(), 0);
                    name
                }
            }
        })
        .collect()
}

fn is_header_pair(row1: &[String], row2: &[String]) -> bool {
    row1.iter().any(|c| c.trim().contains("Time"))
        && row2.iter().any(|c| c.trim().contains("(hh:mm:ss)"))
}

#[derive(Debug)]
pub enum ScanState {
    Scanning,
    HeaderFound {
        start: usize,
        header: Vec<String>,
        time_idx: usize,
    },
    CollectingRows {
        start: usize,
        header: Vec<String>,
        time_idx: usize,
        rows: Vec<Vec<String>>,
    },
    Done {
        start: usize,
        header: Vec<String>,
        rows: Vec<Vec<String>>,
    },
}

pub struct BlockScanner<A: RowAcceptor> {
    acceptor: A,
    /// Leading metadata columns skipped when looking at cells.
    offset: usize,
}

impl<A: RowAcceptor> BlockScanner<A> {
    pub fn new(acceptor: A, offset: usize) -> Self {
        BlockScanner { acceptor, offset }
    }

    fn cells<'r>(&self, row: &'r [String]) -> &'r [String] {
        row.get(self.offset..).unwrap_or(&[])
    }

    pub fn scan(&self, rows: &[Vec<String>]) -> Vec<Block> {
        let mut blocks = Vec::new();
        let mut state = ScanState::Scanning;
        let mut i = 0;

        loop {
            state = match state {
                ScanState::Scanning => {
                    if i + 1 >= rows.len() {
                        break;
                    }
                    let (row1, row2) = (self.cells(&rows[i]), self.cells(&rows[i + 1]));
                    if !is_header_pair(row1, row2) {
                        i += 1;
                        ScanState::Scanning
                    } else {
                        let header = build_header(row1, row2);
                        match header.iter().position(|h| h.starts_with("Time")) {
                            Some(time_idx) => ScanState::HeaderFound {
                                start: i,
                                header,
                                time_idx,
                            },
                            None => {
                                i += 1;
                                ScanState::Scanning
                            }
                        }
                    }
                }
                ScanState::HeaderFound {
                    start,
                    header,
                    time_idx,
                } => {
                    i = start + 2;
                    ScanState::CollectingRows {
                        start,
                        header,
                        time_idx,
                        rows: Vec::new(),
                    }
                }
                ScanState::CollectingRows {
                    start,
                    header,
                    time_idx,
                    rows: mut collected,
                } => {
                    let accepted = rows
                        .get(i)
                        .map(|r| self.acceptor.accept(self.cells(r), time_idx))
                        .unwrap_or(false);
                    if accepted {
                        let mut row: Vec<String> = self
                            .cells(&rows[i])
                            .iter()
                            .map(|c| if is_missing(c) { MISSING.to_string() } else { c.clone() })
                            .collect();
                        row.resize(header.len(), MISSING.to_string());
                        collected.push(row);
                        i += 1;
                        ScanState::CollectingRows {
                            start,
                            header,
                            time_idx,
                            rows: collected,
                        }
                    } else {
                        ScanState::Done {
                            start,
                            header,
                            rows: collected,
                        }
                    }
                }
                ScanState::Done {
                    start,
                    header,
                    rows: collected,
                } => {
                    if collected.is_empty() {
                        i = start + 1;
                    } else {
                        debug!("Block at row {} with {} rows", start, collected.len());
                        let tag = |j: usize| rows[start].get(j).cloned().unwrap_or_default();
                        blocks.push(Block {
                            subject: tag(0),
                            meeting: tag(1),
                            state: tag(2),
                            therapy: tag(3),
                            header,
                            rows: collected,
                            start_row: start,
                        });
                    }
                    ScanState::Scanning
                }
            };
        }
        blocks
    }
}

/// Scans every subject/meeting of a metadata table and stacks the detected blocks.
pub fn extract_blocks<A: RowAcceptor>(table: &Table, acceptor: A) -> Result<Table> {
    let subject_idx = table
        .column_index("subject")
        .ok_or_else(|| anyhow::anyhow!("metadata table has no 'subject' column"))?;
    let meet_idx = table
        .column_index("meet")
        .ok_or_else(|| anyhow::anyhow!("metadata table has no 'meet' column"))?;

    let mut groups: HashMap<(String, u32), Vec<Vec<String>>> = HashMap::new();
    let mut subjects: BTreeSet<String> = BTreeSet::new();
    let mut malformed: BTreeSet<String> = BTreeSet::new();
    for row in &table.rows {
        let subject = row[subject_idx].trim().to_string();
        if is_missing(&subject) {
            continue;
        }
        subjects.insert(subject.clone());
        match meeting_number(&row[meet_idx]) {
            Some(meeting) => groups.entry((subject, meeting)).or_default().push(row.clone()),
            None => {
                malformed.insert(row[meet_idx].clone());
            }
        }
    }
    for label in &malformed {
        warn!("Skipping rows with malformed meeting name {:?}", label);
    }

    let subject_list: Vec<&str> = subjects.iter().map(String::as_str).collect();
    info!("Meta data contains subjects - {}", subject_list.join(", "));

    let scanner = BlockScanner::new(acceptor, META_COLUMNS);
    let mut tables = Vec::new();
    for subject in &subjects {
        let mut meetings: Vec<u32> = groups
            .keys()
            .filter(|(s, _)| s == subject)
            .map(|(_, m)| *m)
            .collect();
        meetings.sort_unstable();
        info!("{} has {} meetings", subject, meetings.len());

        for meeting in meetings {
            let rows = &groups[&(subject.clone(), meeting)];
            let blocks = scanner.scan(rows);
            debug!("{} meet {}: {} blocks", subject, meeting, blocks.len());
            tables.extend(blocks.into_iter().map(Block::into_table));
        }
    }

    Ok(Table::concat(tables))
}

/// Drops unnamed columns (`""`, `.1`, ...) that hold no value in any row.
pub fn drop_blank_unnamed_columns(table: &Table) -> Table {
    let keep: Vec<usize> = (0..table.headers.len())
        .filter(|&i| {
            !UNNAMED.is_match(&table.headers[i])
                || table.rows.iter().any(|r| !is_missing(&r[i]))
        })
        .collect();

    let mut out = Table::new(keep.iter().map(|&i| table.headers[i].clone()));
    for row in &table.rows {
        out.rows.push(keep.iter().map(|&i| row[i].clone()).collect());
    }
    out
}

pub fn block_output_path(meta_path: &Path) -> PathBuf {
    let stem = meta_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("meta_data");
    meta_path.with_file_name(format!("{}_real_time_meta_data.csv", stem))
}
