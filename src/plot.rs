use crate::paths::{meeting_number, subject_number};
use crate::table::{parse_number, Table};
use crate::timing::{common_subjects, SignalTable, TimingTable};
use crate::windows::{normalized_segment, Condition, NormalizedSegment, SegmentPlan, WindowSettings};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::series::DashedLineSeries;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const GRID_COLUMNS: usize = 3;
const PANEL_WIDTH: u32 = 600;
const PANEL_HEIGHT: u32 = 400;
const LEGEND_HEIGHT: u32 = 40;
const THERAPY_STAGES: [&str; 4] = ["A", "B", "C", "D"];

const PINK: RGBColor = RGBColor(255, 192, 203);
const DARK_GREEN: RGBColor = RGBColor(0, 128, 0);
const LIGHT_GRAY: RGBColor = RGBColor(211, 211, 211);
const GRAY: RGBColor = RGBColor(128, 128, 128);
const LIGHT_BLUE: RGBColor = RGBColor(173, 216, 230);
const PURPLE: RGBColor = RGBColor(128, 0, 128);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarCategory {
    Baseline,
    Therapy,
    Recovery,
}

impl BarCategory {
    pub fn color(&self) -> RGBColor {
        match self {
            BarCategory::Baseline => BLUE,
            BarCategory::Therapy => PINK,
            BarCategory::Recovery => DARK_GREEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub category: BarCategory,
    /// `None` is drawn as a missing-data bar.
    pub value: Option<f64>,
    pub tick: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeetingPanel {
    pub meeting: String,
    pub bars: Vec<Bar>,
}

pub fn condition_color(condition: Condition) -> RGBColor {
    match condition {
        Condition::Neut1 => LIGHT_BLUE,
        Condition::Stress => PURPLE,
        Condition::Neut2 => BLUE,
        Condition::Trauma => RED,
    }
}

/// Tick thinning: every label up to 20 bars, every fifth above.
pub fn tick_step(count: usize) -> usize {
    if count > 20 {
        5
    } else {
        1
    }
}

fn tick_label(time: &str) -> String {
    let time = time.trim();
    let chars: Vec<char> = time.chars().collect();
    chars[chars.len().saturating_sub(5)..].iter().collect()
}

fn file_safe(parameter: &str) -> String {
    parameter
        .trim()
        .replace([' ', '/'], "_")
        .to_lowercase()
}

pub fn meeting_plot_file_name(subject: u32, parameter: &str) -> String {
    format!("subject_{}_{}_analysis.png", subject, file_safe(parameter))
}

pub fn diagnostic_file_name(subject: &str, sheet: &str) -> String {
    format!("Diagnostic_Figure_Subj_{}_{}.png", subject, sheet)
}

fn find_columns(table: &Table, parameter: &str) -> Result<(usize, usize)> {
    let value_idx = table
        .headers
        .iter()
        .position(|h| h.trim().contains(parameter))
        .with_context(|| format!("no column matches parameter '{}'", parameter))?;
    let time_idx = table
        .headers
        .iter()
        .position(|h| h.contains("Time") && h.contains("hh"))
        .context("no time column (Time ... hh) in block table")?;
    debug!(
        "Using parameter column '{}' and time column '{}'",
        table.headers[value_idx], table.headers[time_idx]
    );
    Ok((value_idx, time_idx))
}

/// One panel per meeting of `subject`, bars ordered baseline, therapy A-D, recovery.
pub fn meeting_panels(table: &Table, subject: u32, parameter: &str) -> Result<Vec<MeetingPanel>> {
    let (value_idx, time_idx) = find_columns(table, parameter)?;
    let col = |name: &str| {
        table
            .column_index(name)
            .with_context(|| format!("block table has no '{}' column", name))
    };
    let (sub_idx, meeting_idx, state_idx, therapy_idx) =
        (col("sub")?, col("meeting")?, col("state")?, col("therapy")?);

    let rows: Vec<&Vec<String>> = table
        .rows
        .iter()
        .filter(|r| subject_number(&r[sub_idx]) == Some(subject))
        .collect();

    let mut meetings: Vec<&str> = rows
        .iter()
        .map(|r| r[meeting_idx].as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    meetings.sort_by_key(|m| (meeting_number(m), m.to_string()));

    let mut panels = Vec::with_capacity(meetings.len());
    for meeting in meetings {
        let in_meeting: Vec<&&Vec<String>> =
            rows.iter().filter(|r| r[meeting_idx] == meeting).collect();
        let state = |r: &Vec<String>| r[state_idx].trim().to_lowercase();
        let therapy = |r: &Vec<String>| r[therapy_idx].trim().to_uppercase();

        let mut groups: Vec<(BarCategory, Vec<&Vec<String>>)> = Vec::new();
        groups.push((
            BarCategory::Baseline,
            in_meeting.iter().filter(|r| state(r) == "baseline").map(|r| **r).collect(),
        ));
        for stage in THERAPY_STAGES {
            groups.push((
                BarCategory::Therapy,
                in_meeting
                    .iter()
                    .filter(|r| state(r) == "therapy" && therapy(r) == stage)
                    .map(|r| **r)
                    .collect(),
            ));
        }
        groups.push((
            BarCategory::Recovery,
            in_meeting.iter().filter(|r| state(r) == "recovery").map(|r| **r).collect(),
        ));

        let mut bars = Vec::new();
        for (category, group) in groups {
            if group.is_empty() {
                bars.push(Bar {
                    category,
                    value: None,
                    tick: String::new(),
                });
                continue;
            }
            for r in group {
                let value = parse_number(&r[value_idx]);
                bars.push(Bar {
                    category,
                    value,
                    tick: if value.is_some() { tick_label(&r[time_idx]) } else { String::new() },
                });
            }
        }
        panels.push(MeetingPanel {
            meeting: meeting.to_string(),
            bars,
        });
    }
    Ok(panels)
}

fn panel_title(meeting: &str) -> String {
    match meeting.trim().parse::<u32>() {
        Ok(n) => format!("Meet {}", n),
        Err(_) => meeting.to_string(),
    }
}

fn draw_panel(area: &DrawingArea<BitMapBackend, Shift>, panel: &MeetingPanel, parameter: &str) -> Result<()> {
    let n = panel.bars.len().max(1);
    let present = || panel.bars.iter().filter_map(|b| b.value);
    let top = present().fold(0.0_f64, f64::max);
    let bottom = present().fold(0.0_f64, f64::min);
    let top = if top > 0.0 { top * 1.1 } else { 1.0 };
    let missing_height = (top - bottom) * 0.02;

    let mut chart = ChartBuilder::on(area)
        .caption(panel_title(&panel.meeting), ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..n as f64, bottom..top)?;

    let step = tick_step(panel.bars.len());
    let bars = &panel.bars;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(n.div_ceil(step))
        .x_label_formatter(&|x| {
            bars.get(x.floor().max(0.0) as usize)
                .map(|b| b.tick.clone())
                .unwrap_or_default()
        })
        .x_label_style(("sans-serif", 10))
        .x_desc("Time (HH:MM)")
        .y_desc(parameter)
        .draw()?;

    chart.draw_series(panel.bars.iter().enumerate().map(|(i, bar)| {
        let x = i as f64;
        let (height, color) = match bar.value {
            Some(v) => (v, bar.category.color()),
            None => (missing_height, LIGHT_GRAY),
        };
        Rectangle::new([(x + 0.1, 0.0), (x + 0.9, height)], color.filled())
    }))?;
    Ok(())
}

fn draw_legend(area: &DrawingArea<BitMapBackend, Shift>) -> Result<()> {
    let (width, _) = area.dim_in_pixel();
    let mut x = width as i32 - 560;
    for (label, color) in [
        ("Baseline", BarCategory::Baseline.color()),
        ("Therapy", BarCategory::Therapy.color()),
        ("Recovery", BarCategory::Recovery.color()),
        ("Missing Data", LIGHT_GRAY),
    ] {
        area.draw(&Rectangle::new([(x, 12), (x + 16, 28)], color.filled()))?;
        area.draw(&Text::new(label, (x + 22, 12), ("sans-serif", 16)))?;
        x += 135;
    }
    Ok(())
}

/// Renders the meeting grid of one subject.
pub fn render_meeting_panels(
    panels: &[MeetingPanel],
    subject: u32,
    parameter: &str,
    out_dir: &Path,
) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let path = out_dir.join(meeting_plot_file_name(subject, parameter));

    let rows = panels.len().div_ceil(GRID_COLUMNS).max(1);
    let grid_height = rows as u32 * PANEL_HEIGHT;
    let size = (GRID_COLUMNS as u32 * PANEL_WIDTH, grid_height + LEGEND_HEIGHT);

    {
        let root = BitMapBackend::new(&path, size).into_drawing_area();
        root.fill(&WHITE)?;
        let (grid, legend) = root.split_vertically(grid_height as i32);
        let areas = grid.split_evenly((rows, GRID_COLUMNS));
        for (panel, area) in panels.iter().zip(areas.iter()) {
            draw_panel(area, panel, parameter)?;
        }
        draw_legend(&legend)?;
        root.present()?;
    }

    println!("Writing results to {}", path.display());
    Ok(path)
}

/// Renders one meeting grid per numeric subject; failures are logged per subject.
pub fn plot_all_subjects(table: &Table, parameter: &str, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let sub_idx = table
        .column_index("sub")
        .context("block table has no 'sub' column")?;
    let subjects: BTreeSet<u32> = table
        .rows
        .iter()
        .filter_map(|r| subject_number(&r[sub_idx]))
        .collect();
    info!("Found {} subjects: {:?}", subjects.len(), subjects);

    let mut written = Vec::new();
    for subject in subjects {
        info!("Generating graph for subject {}", subject);
        let result = meeting_panels(table, subject, parameter)
            .and_then(|panels| render_meeting_panels(&panels, subject, parameter, out_dir));
        match result {
            Ok(path) => written.push(path),
            Err(e) => warn!("Failed to plot subject {}: {:#}", subject, e),
        }
    }
    Ok(written)
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventMarker {
    pub condition: Condition,
    /// Seconds relative to the start of the raw series.
    pub onset_sec: f64,
    pub audio_end_sec: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct DiagnosticData {
    pub subject: String,
    pub plot_start_sec: Option<f64>,
    /// `(seconds since plot start, value)` of the present samples.
    pub raw: Vec<(f64, f64)>,
    pub markers: Vec<EventMarker>,
    pub segments: Vec<NormalizedSegment>,
    /// Time axis of the normalized segments, relative to the audio onset.
    pub segment_axis: (f64, f64),
}

pub fn diagnostic_data(
    timing: &TimingTable,
    signal: &SignalTable,
    subject: &str,
    plan: &SegmentPlan,
    settings: &WindowSettings,
) -> Result<DiagnosticData> {
    let column = signal
        .column(subject)
        .with_context(|| format!("no signal column for subject {}", subject))?;
    let rate = settings.sampling_rate;

    let plot_start_sec = timing
        .get(Condition::Neut1.label(), subject)
        .map(|onset| onset - settings.starting_offset_sec);
    let plot_end_sec = timing.get(&settings.recording_end_label, subject);

    let raw = match (plot_start_sec, plot_end_sec) {
        (Some(start), Some(end)) => {
            let from = ((start * rate).round().max(0.0) as usize).min(column.len());
            let to = ((end * rate).round().max(0.0) as usize).min(column.len());
            column[from..to.max(from)]
                .iter()
                .enumerate()
                .filter_map(|(i, v)| v.map(|v| (i as f64 / rate, v)))
                .collect()
        }
        _ => {
            warn!("Missing timing for raw series of subject {}", subject);
            Vec::new()
        }
    };

    let audio_duration = plan.get("Audio").map(|a| a.duration_sec);
    let markers = match plot_start_sec {
        Some(start) => Condition::ALL
            .iter()
            .filter_map(|&condition| {
                let onset = timing.get(condition.label(), subject)?;
                let audio_end = match condition {
                    Condition::Trauma => timing.get(&settings.audio_end_label, subject),
                    _ => audio_duration.map(|d| onset + d),
                };
                Some(EventMarker {
                    condition,
                    onset_sec: onset - start,
                    audio_end_sec: audio_end.map(|e| e - start),
                })
            })
            .collect(),
        None => Vec::new(),
    };

    let segments = Condition::ALL
        .iter()
        .filter_map(|&c| normalized_segment(timing, signal, subject, c, plan, settings))
        .collect();

    Ok(DiagnosticData {
        subject: subject.to_string(),
        plot_start_sec,
        raw,
        markers,
        segments,
        segment_axis: (
            -settings.starting_offset_sec,
            settings.plot_segment_sec - settings.starting_offset_sec,
        ),
    })
}

fn value_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    let pad = ((hi - lo) * 0.1).max(1e-3);
    (lo - pad, hi + pad)
}

fn draw_raw(area: &DrawingArea<BitMapBackend, Shift>, data: &DiagnosticData) -> Result<()> {
    if data.raw.is_empty() {
        let _empty = ChartBuilder::on(area)
            .caption(
                format!("Raw Data Missing for Subject {}", data.subject),
                ("sans-serif", 22),
            )
            .margin(10)
            .build_cartesian_2d(0f64..1f64, 0f64..1f64)?;
        return Ok(());
    }

    let x_end = data.raw.last().map(|(t, _)| *t).unwrap_or(1.0).max(1.0);
    let (y_min, y_max) = value_range(data.raw.iter().map(|(_, v)| *v));
    let mut chart = ChartBuilder::on(area)
        .caption(
            format!("Raw GSR Signal and Events (Subject {})", data.subject),
            ("sans-serif", 22),
        )
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..x_end, y_min..y_max)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc(format!(
            "Time Relative to Start of Plot ({:.2}s) [Seconds]",
            data.plot_start_sec.unwrap_or(0.0)
        ))
        .y_desc("Raw GSR Amplitude")
        .draw()?;

    chart.draw_series(LineSeries::new(data.raw.iter().copied(), &GRAY))?;

    for marker in &data.markers {
        let color = condition_color(marker.condition);
        let x = marker.onset_sec;
        chart
            .draw_series(LineSeries::new(
                vec![(x, y_min), (x, y_max)],
                color.stroke_width(2),
            ))?
            .label(format!("{} Audio Onset", marker.condition))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        if let Some(end) = marker.audio_end_sec {
            chart.draw_series(DashedLineSeries::new(
                vec![(end, y_min), (end, y_max)],
                6,
                4,
                color.stroke_width(2),
            ))?;
        }
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .position(SeriesLabelPosition::UpperRight)
        .draw()?;
    Ok(())
}

fn draw_normalized(area: &DrawingArea<BitMapBackend, Shift>, data: &DiagnosticData) -> Result<()> {
    let (x_start, x_end) = data.segment_axis;
    let (y_min, y_max) = value_range(
        data.segments
            .iter()
            .flat_map(|s| s.values.iter().flatten().copied())
            .chain(std::iter::once(1.0)),
    );

    let mut chart = ChartBuilder::on(area)
        .caption("Baseline-Normalised Segments (Aligned to Audio Onset)", ("sans-serif", 22))
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(60)
        .build_cartesian_2d(x_start..x_end, y_min..y_max)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc("Time Relative to Audio Onset (Seconds)")
        .y_desc("GSR Amplitude (Normalised: 1.0 = Baseline)")
        .draw()?;

    for segment in &data.segments {
        let color = condition_color(segment.condition);
        let span = (x_end - x_start) / (segment.values.len().max(2) - 1) as f64;
        chart
            .draw_series(LineSeries::new(
                segment
                    .values
                    .iter()
                    .enumerate()
                    .filter_map(|(i, v)| v.map(|v| (x_start + i as f64 * span, v))),
                &color,
            ))?
            .label(segment.condition.label())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        if let Some(audio) = segment.audio_duration_sec {
            chart.draw_series(DashedLineSeries::new(
                vec![(audio, y_min), (audio, y_max)],
                6,
                4,
                color.mix(0.7).stroke_width(1),
            ))?;
        }
    }

    chart.draw_series(LineSeries::new(vec![(0.0, y_min), (0.0, y_max)], &BLACK))?;
    chart.draw_series(DashedLineSeries::new(
        vec![(x_start, 1.0), (x_end, 1.0)],
        2,
        4,
        GRAY.mix(0.5).stroke_width(1),
    ))?;

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .position(SeriesLabelPosition::UpperRight)
        .draw()?;
    Ok(())
}

pub fn render_diagnostic(data: &DiagnosticData, sheet: &str, out_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let path = out_dir.join(diagnostic_file_name(&data.subject, sheet));

    {
        let root = BitMapBackend::new(&path, (1500, 800)).into_drawing_area();
        root.fill(&WHITE)?;
        let areas = root.split_evenly((2, 1));
        draw_raw(&areas[0], data)?;
        draw_normalized(&areas[1], data)?;
        root.present()?;
    }

    println!("Writing results to {}", path.display());
    Ok(path)
}

/// Renders the diagnostic figure of every subject present in both tables.
pub fn plot_all_diagnostics(
    timing: &TimingTable,
    signal: &SignalTable,
    sheet: &str,
    plan: &SegmentPlan,
    settings: &WindowSettings,
    out_dir: &Path,
) -> Vec<PathBuf> {
    let mut written = Vec::new();
    for subject in common_subjects(timing, signal) {
        info!("Plotting diagnostics for subject {}", subject);
        let result = diagnostic_data(timing, signal, &subject, plan, settings)
            .and_then(|data| render_diagnostic(&data, sheet, out_dir));
        match result {
            Ok(path) => written.push(path),
            Err(e) => warn!("Failed diagnostic figure for subject {}: {:#}", subject, e),
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::format_value;

    fn block_table() -> Table {
        let mut t = Table::new(["sub", "meeting", "state", "therapy", "Time (hh:mm:ss)", "Mean HR (beats/min)"]);
        let rows = [
            ["subject 15", "meet 2", "baseline", "", "00:00:30", "70"],
            ["subject 15", "meet 2", "baseline", "", "00:01:00", "NA"],
            ["subject 15", "meet 2", "therapy", "b", "01:02:30", "80"],
            ["subject 15", "meet 2", "recovery", "", "02:00:00", "75"],
            ["subject 15", "meet 1", "baseline", "", "00:00:30", "65"],
            ["subject 16", "meet 1", "baseline", "", "00:00:30", "90"],
        ];
        for r in rows {
            t.push_row(r.iter().map(|s| s.to_string()).collect());
        }
        t
    }

    #[test]
    fn panels_follow_category_order() {
        let panels = meeting_panels(&block_table(), 15, "Mean HR").unwrap();
        assert_eq!(panels.len(), 2);
        assert_eq!(panels[0].meeting, "meet 1");

        let bars = &panels[1].bars;
        // baseline x2, therapy A (missing), B, C (missing), D (missing), recovery
        assert_eq!(bars.len(), 7);
        assert_eq!(bars[0].value, Some(70.0));
        assert_eq!(bars[0].tick, "00:30");
        assert_eq!(bars[1].value, None);
        assert_eq!(bars[2].category, BarCategory::Therapy);
        assert_eq!(bars[2].value, None);
        assert_eq!(bars[3].value, Some(80.0));
        assert_eq!(bars[3].tick, "02:30");
        assert_eq!(bars[6].category, BarCategory::Recovery);
        assert_eq!(bars[6].tick, "00:00");
    }

    #[test]
    fn unknown_parameter_is_an_error() {
        assert!(meeting_panels(&block_table(), 15, "RMSSD").is_err());
    }

    #[test]
    fn ticks_thin_above_twenty_bars() {
        assert_eq!(tick_step(20), 1);
        assert_eq!(tick_step(21), 5);
        assert_eq!(tick_label("7:05"), "7:05");
    }

    #[test]
    fn file_names() {
        assert_eq!(meeting_plot_file_name(15, "Mean HR"), "subject_15_mean_hr_analysis.png");
        assert_eq!(
            meeting_plot_file_name(3, "LF/HF ratio"),
            "subject_3_lf_hf_ratio_analysis.png"
        );
        assert_eq!(diagnostic_file_name("18", "T1"), "Diagnostic_Figure_Subj_18_T1.png");
    }

    #[test]
    fn diagnostic_markers_relative_to_plot_start() {
        let mut t = Table::new(["", "18"]);
        for (e, v) in [("neut1", "20"), ("trauma", "100"), ("trauma_end", "150"), ("end of recording", "290")] {
            t.push_row(vec![e.to_string(), v.to_string()]);
        }
        let timing = TimingTable::from_table(&t);
        let mut s = Table::new(["18"]);
        for i in 0..3000 {
            s.push_row(vec![format_value(Some(1.0 + (i % 7) as f64))]);
        }
        let signal = SignalTable::from_table(&s);

        let data = diagnostic_data(
            &timing,
            &signal,
            "18",
            &SegmentPlan::standard(),
            &WindowSettings::default(),
        )
        .unwrap();
        assert_eq!(data.plot_start_sec, Some(10.0));
        assert_eq!(data.raw.len(), 2800);
        assert_eq!(data.markers.len(), 2);
        assert_eq!(data.markers[0].onset_sec, 10.0);
        assert_eq!(data.markers[0].audio_end_sec, Some(70.0));
        assert_eq!(data.markers[1].audio_end_sec, Some(140.0));
        assert_eq!(data.segments.len(), 2);
        assert_eq!(data.segment_axis, (-10.0, 200.0));
    }

    #[test]
    fn meeting_grid_is_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let panels = meeting_panels(&block_table(), 15, "Mean HR").unwrap();
        let path = render_meeting_panels(&panels, 15, "Mean HR", dir.path()).unwrap();
        assert_eq!(path, dir.path().join("subject_15_mean_hr_analysis.png"));
        assert!(path.metadata().unwrap().len() > 0);
    }

    #[test]
    fn diagnostic_figure_is_written_to_disk() {
        let mut t = Table::new(["", "18"]);
        for (e, v) in [("neut1", "20"), ("trauma_end", "80"), ("end of recording", "290")] {
            t.push_row(vec![e.to_string(), v.to_string()]);
        }
        let timing = TimingTable::from_table(&t);
        let mut s = Table::new(["18"]);
        for i in 0..3000 {
            s.push_row(vec![format_value(Some((i % 11) as f64))]);
        }
        let signal = SignalTable::from_table(&s);
        let data = diagnostic_data(
            &timing,
            &signal,
            "18",
            &SegmentPlan::standard(),
            &WindowSettings::default(),
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = render_diagnostic(&data, "T1", dir.path()).unwrap();
        assert_eq!(path, dir.path().join("Diagnostic_Figure_Subj_18_T1.png"));
        assert!(path.exists());
    }

    #[test]
    fn diagnostic_requires_signal_column() {
        let timing = TimingTable::default();
        let signal = SignalTable::default();
        assert!(diagnostic_data(
            &timing,
            &signal,
            "18",
            &SegmentPlan::standard(),
            &WindowSettings::default()
        )
        .is_err());
    }
}
