use crate::features::AllowList;
use crate::paths::StateStyle;
use crate::summary::Layout;
use crate::windows::{SegmentPlan, WindowSettings};
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlanChoice {
    /// Baseline -10s/10s, Audio 0/60, Imagery 60/30, Recovery 90/30 and 120/30
    Standard,
    /// Baseline [-15,0], Audio [0,60], Imagery [60,90], Recovery [90,120] and [120,150]
    Intervals,
}

impl PlanChoice {
    pub fn plan(&self) -> SegmentPlan {
        match self {
            PlanChoice::Standard => SegmentPlan::standard(),
            PlanChoice::Intervals => SegmentPlan::intervals(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BlockRows {
    /// Rows whose time cell is HH:MM:SS
    Clock,
    /// Rows until the first empty row
    UntilBlank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WorkbookLayout {
    Raw,
    States,
}

impl From<WorkbookLayout> for Layout {
    fn from(layout: WorkbookLayout) -> Self {
        match layout {
            WorkbookLayout::Raw => Layout::Raw,
            WorkbookLayout::States => Layout::States,
        }
    }
}

/// Tidy HRV and GSR exports into analysis tables and figures
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Samples per second of the signal tables
    #[arg(long, global = true, env = "PHYSIO_SAMPLING_RATE", default_value = "10")]
    pub sampling_rate: f64,

    /// JSON list of {name, unit, section} features replacing the built-in allow-list
    #[arg(long, global = true)]
    pub features: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ExtractArgs {
    /// Root directory laid out as subject/meet/state/file.csv
    pub root: PathBuf,

    /// Replacement for blank cells
    #[arg(long, default_value = "NA")]
    pub sentinel: String,

    /// Skip files whose name contains this text (repeatable)
    #[arg(long = "exclude", default_value = "meta_data")]
    pub exclude: Vec<String>,

    /// Skip files whose name mentions therapy
    #[arg(long)]
    pub skip_therapy_files: bool,

    /// Do not derive the therapy stage letter from ECG_<letter>
    #[arg(long)]
    pub no_therapy_stage: bool,

    /// Report the therapy stage inside the state column (therapy_a, ...)
    #[arg(long)]
    pub merged_states: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct TimingArgs {
    /// Workbook (.xlsx/.ods), or a directory holding one <sheet>.csv per sheet
    pub workbook: PathBuf,

    /// Data sheets; each uses the timing sheet timing_<N> of its number
    #[arg(long = "sheet", default_values_t = [String::from("T1"), String::from("T2")])]
    pub sheets: Vec<String>,

    /// Onset of the baseline plot segment, seconds before the audio onset
    #[arg(long, default_value = "10")]
    pub starting_offset: f64,

    /// Length of the normalized plot segment in seconds
    #[arg(long, default_value = "210")]
    pub plot_segment: f64,

    /// Length of each trauma recovery block in seconds
    #[arg(long, default_value = "30")]
    pub recovery_block: f64,

    /// Imagery duration after the trauma audio end, in seconds
    #[arg(long, default_value = "30")]
    pub imagery: f64,

    /// Timing row marking the end of the trauma audio
    #[arg(long, default_value = "trauma_end")]
    pub audio_end_label: String,

    /// Timing row marking the end of the recording
    #[arg(long, default_value = "end of recording")]
    pub recording_end_label: String,
}

impl TimingArgs {
    pub fn settings(&self, sampling_rate: f64) -> WindowSettings {
        WindowSettings {
            sampling_rate,
            starting_offset_sec: self.starting_offset,
            plot_segment_sec: self.plot_segment,
            recovery_block_sec: self.recovery_block,
            imagery_sec: self.imagery,
            audio_end_label: self.audio_end_label.clone(),
            recording_end_label: self.recording_end_label.clone(),
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Flatten every report under a root into meta_data.csv
    Extract(ExtractArgs),

    /// Allow-listed global features read straight from the reports
    Global {
        #[command(flatten)]
        extract: ExtractArgs,

        /// Output CSV
        #[arg(long, default_value = "global_table.csv")]
        output: PathBuf,
    },

    /// Filter a metadata table down to allow-listed features
    Filter {
        /// Metadata CSV produced by `extract`
        input: PathBuf,

        /// Output CSV
        #[arg(long)]
        output: PathBuf,

        /// Unpack the embedded per-segment tables
        #[arg(long)]
        segments: bool,

        /// Keep section header rows
        #[arg(long)]
        section_headers: bool,
    },

    /// Detect the embedded time-series blocks of a metadata table
    Blocks {
        /// Metadata CSV produced by `extract`
        input: PathBuf,

        /// Output CSV, defaults to <input stem>_real_time_meta_data.csv
        #[arg(long)]
        output: Option<PathBuf>,

        /// Row acceptance rule for block data rows
        #[arg(long, value_enum, default_value = "clock")]
        rows: BlockRows,
    },

    /// Median of selected meetings per subject, state and sample
    Combine {
        /// Block CSV produced by `blocks`
        input: PathBuf,

        #[arg(long)]
        output: PathBuf,

        /// Meeting numbers to combine
        #[arg(long, value_delimiter = ',', default_value = "1,2,3")]
        meetings: Vec<u32>,

        /// Meeting label of the combined rows
        #[arg(long, default_value = "meet 1-3 median")]
        label: String,

        /// Drop the rows of the other meetings
        #[arg(long)]
        only_combined: bool,
    },

    /// Keep only the listed meetings of a block table
    SelectMeetings {
        input: PathBuf,

        #[arg(long)]
        output: PathBuf,

        #[arg(long, value_delimiter = ',', default_value = "1,2,3")]
        meetings: Vec<u32>,
    },

    /// Windowed means per subject, condition and segment
    Windows {
        #[command(flatten)]
        timing: TimingArgs,

        #[arg(long, value_enum, default_value = "standard")]
        plan: PlanChoice,

        /// Output directory for <sheet>_statistics.csv
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Every N-th sample of each condition, one workbook sheet per condition
    Matrix {
        #[command(flatten)]
        timing: TimingArgs,

        /// Keep every N-th sample
        #[arg(long, default_value = "10")]
        step: usize,

        #[arg(long, default_value = "GSR_matrix_per_event.xlsx")]
        output: PathBuf,
    },

    /// Per-subject summary of one feature across meetings
    Summary {
        /// Metadata CSV produced by `extract`
        input: PathBuf,

        #[arg(long, default_value = "Mean HR (beats/min):")]
        feature: String,

        /// Meetings to summarize
        #[arg(long, value_delimiter = ',', default_value = "1,2,3,5,6,7,9,10,11,18")]
        meetings: Vec<u32>,

        /// Summarize every meeting each subject has
        #[arg(long, conflicts_with = "meetings")]
        all_meetings: bool,

        /// Output directory, defaults to the input's directory
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// One workbook per subject with a sheet per meeting
    Workbooks {
        input: PathBuf,

        #[arg(long, default_value = "patients_excel")]
        out_dir: PathBuf,

        #[arg(long, value_enum, default_value = "raw")]
        layout: WorkbookLayout,
    },

    /// Collect <N>_SDI.csv exports into one workbook of HRV sample sheets
    Sdi {
        dir: PathBuf,

        /// Output workbook, defaults to <dir>/HR_SDI_all_subjects_HRV_features.xlsx
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Bar chart grid of one block parameter per subject
    PlotMeetings {
        /// Block CSV produced by `blocks`
        input: PathBuf,

        #[arg(long, default_value = "Mean HR")]
        parameter: String,

        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Raw series and normalized segments per subject
    PlotDiagnostics {
        #[command(flatten)]
        timing: TimingArgs,

        #[arg(long, value_enum, default_value = "standard")]
        plan: PlanChoice,

        #[arg(long, default_value = "Diagnostic_Figures_Output")]
        out_dir: PathBuf,
    },

    /// extract, then blocks, then meeting plots for one parameter
    Pipeline {
        #[command(flatten)]
        extract: ExtractArgs,

        #[arg(long, default_value = "Mean HR")]
        parameter: String,

        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

impl Args {
    pub fn allow_list(&self) -> Result<AllowList> {
        let allow = AllowList::kubios();
        match &self.features {
            Some(path) => allow.with_features_from_json(path),
            None => Ok(allow),
        }
    }
}

impl ExtractArgs {
    pub fn options(&self) -> crate::report::ExtractOptions {
        crate::report::ExtractOptions {
            sentinel: self.sentinel.clone(),
            exclude_terms: self.exclude.clone(),
            skip_therapy_files: self.skip_therapy_files,
            therapy_stage: !self.no_therapy_stage,
            state_style: if self.merged_states {
                StateStyle::Merged
            } else {
                StateStyle::Split
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "physio-tables",
            "combine",
            "blocks.csv",
            "--output",
            "out.csv",
            "--meetings",
            "1,2",
            "--sampling-rate",
            "20",
        ])
        .unwrap();
        assert_eq!(args.sampling_rate, 20.0);
        match args.command {
            Command::Combine { meetings, label, only_combined, .. } => {
                assert_eq!(meetings, vec![1, 2]);
                assert_eq!(label, "meet 1-3 median");
                assert!(!only_combined);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn extract_defaults() {
        let args = Args::try_parse_from(["physio-tables", "extract", "data"]).unwrap();
        let Command::Extract(extract) = args.command else {
            panic!("expected extract");
        };
        let options = extract.options();
        assert_eq!(options.sentinel, "NA");
        assert_eq!(options.exclude_terms, vec!["meta_data"]);
        assert!(options.therapy_stage);
        assert_eq!(options.state_style, StateStyle::Split);
    }

    #[test]
    fn summary_meetings_or_all() {
        let args = Args::try_parse_from(["physio-tables", "summary", "meta.csv"]).unwrap();
        let Command::Summary {
            meetings,
            all_meetings,
            ..
        } = args.command
        else {
            panic!("expected summary");
        };
        assert_eq!(meetings, vec![1, 2, 3, 5, 6, 7, 9, 10, 11, 18]);
        assert!(!all_meetings);

        let args =
            Args::try_parse_from(["physio-tables", "summary", "meta.csv", "--all-meetings"]).unwrap();
        let Command::Summary { all_meetings, .. } = args.command else {
            panic!("expected summary");
        };
        assert!(all_meetings);

        assert!(Args::try_parse_from([
            "physio-tables",
            "summary",
            "meta.csv",
            "--meetings",
            "1",
            "--all-meetings"
        ])
        .is_err());
    }

    #[test]
    fn timing_defaults() {
        let args = Args::try_parse_from(["physio-tables", "windows", "gsr.xlsx"]).unwrap();
        let Command::Windows { timing, plan, .. } = args.command else {
            panic!("expected windows");
        };
        assert_eq!(timing.sheets, vec!["T1", "T2"]);
        assert_eq!(plan, PlanChoice::Standard);
        let settings = timing.settings(10.0);
        assert_eq!(settings.audio_end_label, "trauma_end");
        assert_eq!(settings.plot_segment_sec, 210.0);
    }
}
