use crate::paths::meeting_number;
use crate::table::{format_value, is_missing, natural_cmp, parse_number, Table, MISSING};
use anyhow::{Context, Result};
use chrono::{NaiveTime, Timelike};
use log::{debug, info};
use polars::prelude::*;
use std::cmp::Ordering;
use std::collections::BTreeMap;

const SAMPLE_IDX: &str = "__sample_idx";
const TIME_COLUMNS: [&str; 3] = ["Time (hh:mm:ss)", "time", "Time"];

#[derive(Debug, Clone)]
pub struct CombineOptions {
    pub meetings: Vec<u32>,
    /// Meeting label given to the combined rows.
    pub label: String,
    /// Keep the rows of meetings outside `meetings` ahead of the combined rows.
    pub keep_others: bool,
}

impl Default for CombineOptions {
    fn default() -> Self {
        CombineOptions {
            meetings: vec![1, 2, 3],
            label: "meet 1-3 median".to_string(),
            keep_others: true,
        }
    }
}

fn clock_seconds(cell: &str) -> Option<f64> {
    NaiveTime::parse_from_str(cell.trim(), "%H:%M:%S")
        .ok()
        .map(|t| t.num_seconds_from_midnight() as f64)
}

fn required(table: &Table, name: &str) -> Result<usize> {
    table
        .column_index(name)
        .with_context(|| format!("table has no '{}' column", name))
}

fn cmp_keys(a: &Option<f64>, b: &Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn is_numeric_column(rows: &[&Vec<String>], idx: usize) -> bool {
    rows.iter()
        .map(|r| r[idx].as_str())
        .filter(|c| !is_missing(c))
        .all(|c| parse_number(c).is_some())
}

/// Collapses the selected meetings into one median meeting per
/// (sub, state, sample index).
pub fn combine_meetings(table: &Table, options: &CombineOptions) -> Result<Table> {
    let meeting_idx = required(table, "meeting")?;
    let sub_idx = required(table, "sub")?;
    let state_idx = table.column_index("state");
    let time_idx = TIME_COLUMNS.iter().find_map(|c| table.column_index(c));

    // split into the meetings being combined and everything else
    let (selected, kept): (Vec<(usize, &Vec<String>)>, Vec<(usize, &Vec<String>)>) = table
        .rows
        .iter()
        .enumerate()
        .partition(|(_, r)| {
            meeting_number(&r[meeting_idx])
                .map(|m| options.meetings.contains(&m))
                .unwrap_or(false)
        });
    info!(
        "Combining {} rows of meetings {:?}, keeping {} others",
        selected.len(),
        options.meetings,
        kept.len()
    );

    let state_of = |r: &Vec<String>| state_idx.map(|i| r[i].clone()).unwrap_or_default();
    let sort_key = |(pos, r): &(usize, &Vec<String>)| match time_idx {
        Some(i) => clock_seconds(&r[i]),
        None => Some(*pos as f64),
    };

    // subject, state, meeting, then time of day (input order without a time column)
    let mut ordered = selected;
    ordered.sort_by(|a, b| {
        natural_cmp(&a.1[sub_idx], &b.1[sub_idx])
            .then_with(|| natural_cmp(&state_of(a.1), &state_of(b.1)))
            .then_with(|| meeting_number(&a.1[meeting_idx]).cmp(&meeting_number(&b.1[meeting_idx])))
            .then_with(|| cmp_keys(&sort_key(a), &sort_key(b)))
    });

    // 1-based position within (sub, state, meeting)
    let mut counters: BTreeMap<(String, String, Option<u32>), u32> = BTreeMap::new();
    let sample_idx: Vec<u32> = ordered
        .iter()
        .map(|(_, r)| {
            let key = (r[sub_idx].clone(), state_of(*r), meeting_number(&r[meeting_idx]));
            let n = counters.entry(key).or_insert(0);
            *n += 1;
            *n
        })
        .collect();

    let rows: Vec<&Vec<String>> = ordered.iter().map(|(_, r)| *r).collect();
    // grouping columns are excluded; the rest are medians or first present text
    let value_columns: Vec<(usize, bool)> = (0..table.headers.len())
        .filter(|&i| i != sub_idx && i != meeting_idx && Some(i) != state_idx)
        .map(|i| (i, is_numeric_column(&rows, i)))
        .collect();

    let combined = if rows.is_empty() {
        Vec::new()
    } else {
        median_rows(table, &rows, &sample_idx, sub_idx, state_idx, meeting_idx, &value_columns, &options.label)?
    };
    debug!("Combined into {} rows", combined.len());

    // other meetings first, combined rows after them
    let mut out = Table::new(table.headers.clone());
    if options.keep_others {
        out.rows.extend(kept.into_iter().map(|(_, r)| r.clone()));
    }
    out.rows.extend(combined);
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn median_rows(
    table: &Table,
    rows: &[&Vec<String>],
    sample_idx: &[u32],
    sub_idx: usize,
    state_idx: Option<usize>,
    meeting_idx: usize,
    value_columns: &[(usize, bool)],
    label: &str,
) -> Result<Vec<Vec<String>>> {
    let internal = |i: usize| format!("__c{}", i);
    let text = |i: usize| -> Vec<String> { rows.iter().map(|r| r[i].clone()).collect() };

    // group keys
    let mut columns: Vec<Column> = vec![
        Series::new("sub".into(), text(sub_idx)).into(),
        Series::new(
            "state".into(),
            state_idx.map(|i| text(i)).unwrap_or_else(|| vec![String::new(); rows.len()]),
        )
        .into(),
        Series::new(SAMPLE_IDX.into(), sample_idx.to_vec()).into(),
    ];
    // one internal column per value column, named by position
    let mut aggs: Vec<Expr> = Vec::with_capacity(value_columns.len());
    for &(i, numeric) in value_columns {
        let name = internal(i);
        if numeric {
            let values: Vec<Option<f64>> = rows.iter().map(|r| parse_number(&r[i])).collect();
            columns.push(Series::new(name.as_str().into(), values).into());
            aggs.push(col(name.as_str()).median().cast(DataType::Float64).alias(name.as_str()));
        } else {
            let values: Vec<Option<String>> = rows
                .iter()
                .map(|r| Some(r[i].clone()).filter(|c| !is_missing(c)))
                .collect();
            columns.push(Series::new(name.as_str().into(), values).into());
            aggs.push(col(name.as_str()).drop_nulls().first().alias(name.as_str()));
        }
    }

    // stable grouping keeps first-seen order of (sub, state, sample)
    let grouped = DataFrame::new(columns)?
        .lazy()
        .group_by_stable([col("sub"), col("state"), col(SAMPLE_IDX)])
        .agg(aggs)
        .collect()
        .context("median aggregation failed")?;

    let subs = grouped.column("sub")?.as_materialized_series().str()?.clone();
    let states = grouped.column("state")?.as_materialized_series().str()?.clone();

    // back to string rows in the input's column layout
    let mut out = Vec::with_capacity(grouped.height());
    for g in 0..grouped.height() {
        let mut row = vec![String::new(); table.headers.len()];
        row[sub_idx] = subs.get(g).unwrap_or_default().to_string();
        if let Some(i) = state_idx {
            row[i] = states.get(g).unwrap_or_default().to_string();
        }
        row[meeting_idx] = label.to_string();
        for &(i, numeric) in value_columns {
            let series = grouped.column(&internal(i))?.as_materialized_series();
            row[i] = if numeric {
                format_value(series.f64()?.get(g))
            } else {
                series
                    .str()?
                    .get(g)
                    .map(str::to_string)
                    .unwrap_or_else(|| MISSING.to_string())
            };
        }
        out.push(row);
    }
    Ok(out)
}

/// Keeps the listed meetings only, sorted by sub, state, meeting number, meeting and therapy.
pub fn select_meetings(table: &Table, meetings: &[u32]) -> Result<Table> {
    let meeting_idx = required(table, "meeting")?;
    let sub_idx = required(table, "sub")?;
    let state_idx = table.column_index("state");
    let therapy_idx = table.column_index("therapy");

    let mut rows: Vec<&Vec<String>> = table
        .rows
        .iter()
        .filter(|r| {
            meeting_number(&r[meeting_idx])
                .map(|m| meetings.contains(&m))
                .unwrap_or(false)
        })
        .collect();

    let mut counts: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    for r in &rows {
        *counts
            .entry(r[sub_idx].clone())
            .or_default()
            .entry(r[meeting_idx].clone())
            .or_default() += 1;
    }
    for (subject, per_meeting) in &counts {
        info!("Subject {}: rows per meeting {:?}", subject, per_meeting);
    }

    let cell = |r: &Vec<String>, idx: Option<usize>| idx.map(|i| r[i].clone()).unwrap_or_default();
    rows.sort_by(|a, b| {
        natural_cmp(&a[sub_idx], &b[sub_idx])
            .then_with(|| natural_cmp(&cell(a, state_idx), &cell(b, state_idx)))
            .then_with(|| meeting_number(&a[meeting_idx]).cmp(&meeting_number(&b[meeting_idx])))
            .then_with(|| a[meeting_idx].cmp(&b[meeting_idx]))
            .then_with(|| natural_cmp(&cell(a, therapy_idx), &cell(b, therapy_idx)))
    });

    let mut out = Table::new(table.headers.clone());
    out.rows.extend(rows.into_iter().cloned());
    Ok(out)
}
