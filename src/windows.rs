//! Windowed statistics over per-subject signal streams.
//!
//! A timing table gives one event time (seconds) per subject. Windows are
//! expressed relative to an event onset and converted to sample indices with
//! the sampling rate. Any window that cannot be computed is reported as `None`
//! and written as the missing marker.

use crate::table::{format_value, Table, MISSING};
use crate::timing::{common_subjects, SignalTable, TimingTable};
use log::{debug, info, warn};
use std::fmt;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSpec {
    /// Start relative to the event onset, in seconds.
    pub offset_sec: f64,
    pub duration_sec: f64,
}

impl WindowSpec {
    pub fn new(offset_sec: f64, duration_sec: f64) -> Self {
        WindowSpec {
            offset_sec,
            duration_sec,
        }
    }

    /// Window covering `[start, end)` seconds relative to the onset.
    pub fn between(start: f64, end: f64) -> Self {
        WindowSpec::new(start, end - start)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPlan {
    pub segments: Vec<(String, WindowSpec)>,
}

impl SegmentPlan {
    pub fn standard() -> Self {
        SegmentPlan::from_specs([
            ("Baseline", WindowSpec::new(-10.0, 10.0)),
            ("Audio", WindowSpec::new(0.0, 60.0)),
            ("Imagery", WindowSpec::new(60.0, 30.0)),
            ("Recovery_1", WindowSpec::new(90.0, 30.0)),
            ("Recovery_2", WindowSpec::new(120.0, 30.0)),
        ])
    }

    pub fn intervals() -> Self {
        SegmentPlan::from_specs([
            ("Baseline", WindowSpec::between(-15.0, 0.0)),
            ("Audio", WindowSpec::between(0.0, 60.0)),
            ("Imagery", WindowSpec::between(60.0, 90.0)),
            ("Recovery_1", WindowSpec::between(90.0, 120.0)),
            ("Recovery_2", WindowSpec::between(120.0, 150.0)),
        ])
    }

    fn from_specs<const N: usize>(specs: [(&str, WindowSpec); N]) -> Self {
        SegmentPlan {
            segments: specs
                .into_iter()
                .map(|(name, spec)| (name.to_string(), spec))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<WindowSpec> {
        self.segments
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, spec)| *spec)
    }

    /// The `Baseline` segment, or the first one if the plan names none.
    pub fn baseline(&self) -> Option<WindowSpec> {
        self.get("Baseline")
            .or_else(|| self.segments.first().map(|(_, spec)| *spec))
    }
}

#[derive(Debug, Clone)]
pub struct WindowSettings {
    pub sampling_rate: f64,
    pub starting_offset_sec: f64,
    pub plot_segment_sec: f64,
    pub recovery_block_sec: f64,
    pub imagery_sec: f64,
    pub audio_end_label: String,
    pub recording_end_label: String,
}

impl Default for WindowSettings {
    fn default() -> Self {
        WindowSettings {
            sampling_rate: 10.0,
            starting_offset_sec: 10.0,
            plot_segment_sec: 210.0,
            recovery_block_sec: 30.0,
            imagery_sec: 30.0,
            audio_end_label: "trauma_end".to_string(),
            recording_end_label: "end of recording".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Neut1,
    Stress,
    Neut2,
    Trauma,
}

impl Condition {
    pub const ALL: [Condition; 4] = [
        Condition::Neut1,
        Condition::Stress,
        Condition::Neut2,
        Condition::Trauma,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Condition::Neut1 => "neut1",
            Condition::Stress => "stress",
            Condition::Neut2 => "neut2",
            Condition::Trauma => "trauma",
        }
    }

    /// Condition whose end time is this condition's start in the timing table.
    pub fn previous(&self) -> Option<Condition> {
        match self {
            Condition::Neut1 => None,
            Condition::Stress => Some(Condition::Neut1),
            Condition::Neut2 => Some(Condition::Stress),
            Condition::Trauma => Some(Condition::Neut2),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn to_sample(seconds: f64, rate: f64) -> i64 {
    (seconds * rate).round() as i64
}

/// Whole samples in `seconds`; a fractional sample is dropped.
fn sample_count(seconds: f64, rate: f64) -> i64 {
    (seconds * rate).trunc() as i64
}

/// Sample range of a window, or `None` when the onset is unusable or the
/// window leaves `[0, len)`. The start is rounded to the nearest sample and
/// the length truncated to whole samples.
pub fn sample_window(
    onset: Option<f64>,
    spec: WindowSpec,
    rate: f64,
    len: usize,
) -> Option<Range<usize>> {
    let onset = onset.filter(|o| o.is_finite())?;
    if !spec.offset_sec.is_finite() || !spec.duration_sec.is_finite() {
        return None;
    }
    let start = to_sample(onset + spec.offset_sec, rate);
    let end = start + sample_count(spec.duration_sec, rate);
    if start < 0 || end > len as i64 || end < start {
        return None;
    }
    Some(start as usize..end as usize)
}

/// Mean of the present samples in the window.
pub fn window_mean(
    signal: &[Option<f64>],
    onset: Option<f64>,
    spec: WindowSpec,
    rate: f64,
) -> Option<f64> {
    let range = sample_window(onset, spec, rate, signal.len())?;
    let (sum, count) = signal[range]
        .iter()
        .flatten()
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Trauma windows relative to the trauma onset, built from the audio-end and
/// recording-end landmarks. Recovery blocks fill whatever recording remains
/// after imagery.
pub fn trauma_windows(
    timing: &TimingTable,
    subject: &str,
    plan: &SegmentPlan,
    settings: &WindowSettings,
) -> Vec<(String, Option<WindowSpec>)> {
    let onset = timing.get(Condition::Trauma.label(), subject);
    let audio_end = timing.get(&settings.audio_end_label, subject);
    let recording_end = timing.get(&settings.recording_end_label, subject);

    let mut windows = vec![(
        "Baseline".to_string(),
        onset.and_then(|_| plan.baseline()),
    )];

    // audio runs from onset to the audio-end landmark; imagery follows it
    let audio = match (onset, audio_end) {
        (Some(on), Some(end)) if end > on => Some(end - on),
        _ => None,
    };
    windows.push((
        "Audio".to_string(),
        audio.map(|d| WindowSpec::new(0.0, d)),
    ));
    windows.push((
        "Imagery".to_string(),
        audio.map(|d| WindowSpec::new(d, settings.imagery_sec)),
    ));

    if let (Some(on), Some(audio_sec), Some(rec_end)) = (onset, audio, recording_end) {
        // whole recovery blocks between the end of imagery and the recording end
        let recovery_start = audio_sec + settings.imagery_sec;
        let remaining = rec_end - on - recovery_start;
        let blocks = if remaining > 0.0 && settings.recovery_block_sec > 0.0 {
            (remaining / settings.recovery_block_sec).floor() as usize
        } else {
            0
        };
        debug!("Subject {}: {} trauma recovery blocks", subject, blocks);
        for k in 0..blocks {
            windows.push((
                format!("Recovery_{}", k + 1),
                Some(WindowSpec::new(
                    recovery_start + k as f64 * settings.recovery_block_sec,
                    settings.recovery_block_sec,
                )),
            ));
        }
    }
    windows
}

/// `Subject_ID` plus one `<condition>_<segment>_Mean` column per window.
pub fn statistics_table(
    timing: &TimingTable,
    signal: &SignalTable,
    plan: &SegmentPlan,
    settings: &WindowSettings,
) -> Table {
    let subjects = common_subjects(timing, signal);
    let rate = settings.sampling_rate;
    if !timing.has_event(&settings.audio_end_label) {
        warn!(
            "Timing has no '{}' row, trauma audio windows will be missing",
            settings.audio_end_label
        );
    }

    let trauma: Vec<Vec<(String, Option<WindowSpec>)>> = subjects
        .iter()
        .map(|s| trauma_windows(timing, s, plan, settings))
        .collect();
    // trauma columns follow the subject with the most recovery blocks
    let trauma_names: Vec<String> = trauma
        .iter()
        .max_by_key(|w| w.len())
        .map(|w| w.iter().map(|(n, _)| n.clone()).collect())
        .unwrap_or_default();

    let mut headers = vec!["Subject_ID".to_string()];
    for condition in &Condition::ALL[..3] {
        for (segment, _) in &plan.segments {
            headers.push(format!("{}_{}_Mean", condition, segment));
        }
    }
    for segment in &trauma_names {
        headers.push(format!("{}_{}_Mean", Condition::Trauma, segment));
    }

    let mut table = Table::new(headers);
    for (subject, trauma) in subjects.iter().zip(&trauma) {
        let Some(column) = signal.column(subject) else {
            continue;
        };
        let mut row = vec![subject.clone()];
        for condition in &Condition::ALL[..3] {
            let onset = timing.get(condition.label(), subject);
            for (_, spec) in &plan.segments {
                row.push(format_value(window_mean(column, onset, *spec, rate)));
            }
        }

        // subjects with fewer recovery blocks get the missing marker
        let onset = timing.get(Condition::Trauma.label(), subject);
        for name in &trauma_names {
            let value = trauma
                .iter()
                .find(|(n, _)| n == name)
                .and_then(|(_, spec)| *spec)
                .and_then(|spec| window_mean(column, onset, spec, rate));
            row.push(format_value(value));
        }
        table.push_row(row);
    }
    info!("Computed window statistics for {} subjects", table.len());
    table
}

pub fn baseline_mean(
    timing: &TimingTable,
    signal: &SignalTable,
    subject: &str,
    condition: Condition,
    plan: &SegmentPlan,
    settings: &WindowSettings,
) -> Option<f64> {
    let column = signal.column(subject)?;
    let onset = timing.get(condition.label(), subject);
    window_mean(column, onset, plan.baseline()?, settings.sampling_rate)
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSegment {
    pub condition: Condition,
    /// Samples divided by the baseline mean; 1.0 is baseline level.
    pub values: Vec<Option<f64>>,
    pub audio_duration_sec: Option<f64>,
}

/// Segment starting `starting_offset_sec` before the onset, scaled by the
/// condition's baseline mean.
pub fn normalized_segment(
    timing: &TimingTable,
    signal: &SignalTable,
    subject: &str,
    condition: Condition,
    plan: &SegmentPlan,
    settings: &WindowSettings,
) -> Option<NormalizedSegment> {
    let baseline = match baseline_mean(timing, signal, subject, condition, plan, settings) {
        Some(b) if b > 0.0 => b,
        _ => {
            warn!("Negative or missing baseline for {} of subject {}", condition, subject);
            return None;
        }
    };

    let column = signal.column(subject)?;
    let onset = timing.get(condition.label(), subject)?;
    let spec = WindowSpec::new(-settings.starting_offset_sec, settings.plot_segment_sec);
    let range = sample_window(Some(onset), spec, settings.sampling_rate, column.len())?;

    let audio_duration_sec = match condition {
        Condition::Trauma => timing
            .get(&settings.audio_end_label, subject)
            .map(|end| end - onset),
        _ => plan.get("Audio").map(|a| a.duration_sec),
    };

    Some(NormalizedSegment {
        condition,
        values: column[range].iter().map(|v| v.map(|x| x / baseline)).collect(),
        audio_duration_sec,
    })
}

/// Start and end seconds of a condition, reading timing values as end times.
pub fn event_span(
    timing: &TimingTable,
    subject: &str,
    condition: Condition,
    settings: &WindowSettings,
) -> Option<(f64, f64)> {
    let mut end = timing.get(condition.label(), subject)?;
    if condition == Condition::Trauma {
        if let Some(last) = [&settings.recording_end_label, &settings.audio_end_label]
            .into_iter()
            .find_map(|label| timing.get(label, subject))
        {
            end = last;
        }
    }
    let start = match condition.previous() {
        None => 0.0,
        Some(prev) => timing.get(prev.label(), subject)?,
    };
    Some((start, end))
}

pub fn event_spans(
    timing: &TimingTable,
    subject: &str,
    settings: &WindowSettings,
) -> Vec<(Condition, Option<(f64, f64)>)> {
    Condition::ALL
        .iter()
        .map(|&c| (c, event_span(timing, subject, c, settings)))
        .collect()
}

/// Every `step`-th sample of one condition for all subjects, one column per subject.
pub fn event_matrix(
    timing: &TimingTable,
    signal: &SignalTable,
    condition: Condition,
    step: usize,
    settings: &WindowSettings,
) -> Table {
    let step = step.max(1);
    let rate = settings.sampling_rate;
    let mut columns: Vec<(String, Vec<Option<f64>>)> = Vec::new();

    for subject in common_subjects(timing, signal) {
        let Some(column) = signal.column(&subject) else {
            continue;
        };
        let Some((start_sec, end_sec)) = event_span(timing, &subject, condition, settings) else {
            warn!("Missing timing for {} of subject {}", condition, subject);
            continue;
        };
        let (start, end) = (to_sample(start_sec, rate), to_sample(end_sec, rate));
        if end <= start || start < 0 {
            warn!(
                "Invalid sample range {}..{} for {} of subject {}",
                start, end, condition, subject
            );
            continue;
        }
        let start = start as usize;
        if start >= column.len() {
            warn!(
                "Start sample {} beyond available data ({}) for {} of subject {}",
                start,
                column.len(),
                condition,
                subject
            );
            continue;
        }
        let end = (end as usize).min(column.len());
        let samples: Vec<Option<f64>> = column[start..end].iter().step_by(step).copied().collect();
        debug!(
            "Subject {}: {:.1}-{:.1} sec -> {} samples",
            subject,
            start_sec,
            end_sec,
            samples.len()
        );
        columns.push((format!("Subject_{}", subject), samples));
    }

    let rows = columns.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
    let mut table = Table::new(
        std::iter::once("Sample".to_string()).chain(columns.iter().map(|(n, _)| n.clone())),
    );
    for i in 0..rows {
        let mut row = vec![((i + 1) * step).to_string()];
        row.extend(columns.iter().map(|(_, v)| match v.get(i) {
            Some(value) => format_value(*value),
            None => MISSING.to_string(),
        }));
        table.push_row(row);
    }
    table
}

/// One `"<condition> <timepoint>"` sheet per condition that produced data.
pub fn event_matrices(
    timing: &TimingTable,
    signal: &SignalTable,
    timepoint: &str,
    step: usize,
    settings: &WindowSettings,
) -> Vec<(String, Table)> {
    Condition::ALL
        .iter()
        .filter_map(|&condition| {
            let table = event_matrix(timing, signal, condition, step, settings);
            if table.headers.len() <= 1 {
                warn!("No data found for {} - {}", timepoint, condition);
                return None;
            }
            Some((format!("{} {}", condition, timepoint), table))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(values: Vec<Option<f64>>) -> SignalTable {
        let mut t = Table::new(["18"]);
        for v in values {
            t.push_row(vec![format_value(v)]);
        }
        SignalTable::from_table(&t)
    }

    fn timing(rows: &[(&str, &str)]) -> TimingTable {
        let mut t = Table::new(["", "18"]);
        for (event, value) in rows {
            t.push_row(vec![event.to_string(), value.to_string()]);
        }
        TimingTable::from_table(&t)
    }

    #[test]
    fn window_indices_follow_onset_and_rate() {
        let spec = WindowSpec::new(-15.0, 15.0);
        assert_eq!(sample_window(Some(66.0), spec, 10.0, 700), Some(510..660));
        assert_eq!(sample_window(Some(66.0), spec, 10.0, 600), None);
        assert_eq!(sample_window(Some(1.0), spec, 10.0, 600), None);
        assert_eq!(sample_window(None, spec, 10.0, 600), None);
        assert_eq!(sample_window(Some(f64::NAN), spec, 10.0, 600), None);
    }

    #[test]
    fn fractional_window_length_is_truncated() {
        let spec = WindowSpec::new(0.0, 2.56);
        assert_eq!(sample_window(Some(1.04), spec, 10.0, 100), Some(10..35));
        assert_eq!(sample_window(Some(1.0), WindowSpec::new(0.0, 0.05), 10.0, 100), Some(10..10));
    }

    #[test]
    fn window_mean_skips_missing_samples() {
        let s = vec![Some(1.0), None, Some(3.0), Some(100.0)];
        assert_eq!(window_mean(&s, Some(0.0), WindowSpec::new(0.0, 0.3), 10.0), Some(2.0));
        let blank = vec![None, None];
        assert_eq!(window_mean(&blank, Some(0.0), WindowSpec::new(0.0, 0.2), 10.0), None);
    }

    #[test]
    fn trauma_recovery_blocks_fill_remaining_time() {
        let t = timing(&[("trauma", "100"), ("trauma_end", "170"), ("end of recording", "295")]);
        let w = trauma_windows(&t, "18", &SegmentPlan::standard(), &WindowSettings::default());
        let names: Vec<&str> = w.iter().map(|(n, _)| n.as_str()).collect();
        // 295 - (170 + 30) = 95 seconds left: three 30 s blocks
        assert_eq!(
            names,
            vec!["Baseline", "Audio", "Imagery", "Recovery_1", "Recovery_2", "Recovery_3"]
        );
        assert_eq!(w[1].1, Some(WindowSpec::new(0.0, 70.0)));
        assert_eq!(w[2].1, Some(WindowSpec::new(70.0, 30.0)));
        assert_eq!(w[5].1, Some(WindowSpec::new(160.0, 30.0)));
    }

    #[test]
    fn missing_landmarks_give_missing_windows() {
        let t = timing(&[("trauma", "100"), ("trauma_end", "NA")]);
        let w = trauma_windows(&t, "18", &SegmentPlan::standard(), &WindowSettings::default());
        assert_eq!(w.len(), 3);
        assert!(w[0].1.is_some());
        assert_eq!(w[1].1, None);
        assert_eq!(w[2].1, None);
    }

    #[test]
    fn statistics_table_marks_out_of_range_windows() {
        let t = timing(&[("neut1", "20"), ("stress", "NA"), ("neut2", "5000"), ("trauma", "NA")]);
        let s = signal(vec![Some(2.0); 2000]);
        let table = statistics_table(&t, &s, &SegmentPlan::standard(), &WindowSettings::default());
        assert_eq!(table.cell(0, "Subject_ID"), Some("18"));
        assert_eq!(table.cell(0, "neut1_Baseline_Mean"), Some("2"));
        assert_eq!(table.cell(0, "neut1_Recovery_2_Mean"), Some("2"));
        assert_eq!(table.cell(0, "stress_Audio_Mean"), Some(MISSING));
        assert_eq!(table.cell(0, "neut2_Audio_Mean"), Some(MISSING));
        assert_eq!(table.cell(0, "trauma_Audio_Mean"), Some(MISSING));
    }

    #[test]
    fn normalized_segment_divides_by_baseline() {
        let mut values = vec![Some(2.0); 100];
        values.extend(vec![Some(4.0); 2100]);
        let s = signal(values);
        let t = timing(&[("neut1", "10")]);
        let seg = normalized_segment(
            &t,
            &s,
            "18",
            Condition::Neut1,
            &SegmentPlan::standard(),
            &WindowSettings::default(),
        )
        .unwrap();
        assert_eq!(seg.values.len(), 2100);
        assert_eq!(seg.values[0], Some(1.0));
        assert_eq!(seg.values[150], Some(2.0));
        assert_eq!(seg.audio_duration_sec, Some(60.0));
    }

    #[test]
    fn non_positive_baseline_skips_segment() {
        let s = signal(vec![Some(0.0); 3000]);
        let t = timing(&[("neut1", "20")]);
        let seg = normalized_segment(
            &t,
            &s,
            "18",
            Condition::Neut1,
            &SegmentPlan::standard(),
            &WindowSettings::default(),
        );
        assert!(seg.is_none());
    }

    #[test]
    fn event_matrix_reads_end_times() {
        let t = timing(&[("neut1", "3"), ("stress", "5"), ("neut2", "NA")]);
        let s = signal((0..80).map(|i| Some(i as f64)).collect());
        let settings = WindowSettings::default();

        let neut1 = event_matrix(&t, &s, Condition::Neut1, 10, &settings);
        assert_eq!(neut1.headers, vec!["Sample", "Subject_18"]);
        assert_eq!(neut1.column("Sample").unwrap(), vec!["10", "20", "30"]);
        assert_eq!(neut1.column("Subject_18").unwrap(), vec!["0", "10", "20"]);

        let stress = event_matrix(&t, &s, Condition::Stress, 10, &settings);
        assert_eq!(stress.column("Subject_18").unwrap(), vec!["30", "40"]);

        let neut2 = event_matrix(&t, &s, Condition::Neut2, 10, &settings);
        assert_eq!(neut2.headers, vec!["Sample"]);
    }

    #[test]
    fn trauma_span_ends_at_recording_end() {
        let t = timing(&[("neut2", "50"), ("trauma", "60"), ("trauma_end", "70"), ("end of recording", "90")]);
        let settings = WindowSettings::default();
        assert_eq!(
            event_span(&t, "18", Condition::Trauma, &settings),
            Some((50.0, 90.0))
        );
    }
}
