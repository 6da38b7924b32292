use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use physio_tables::aggregate::{combine_meetings, select_meetings, CombineOptions};
use physio_tables::blocks::{
    block_output_path, drop_blank_unnamed_columns, extract_blocks, StrictClock, UntilBlank,
};
use physio_tables::config::{Args, BlockRows, Command, TimingArgs};
use physio_tables::features::{filter_metadata, global_table, FeatureFilter, FilterOptions};
use physio_tables::output::{write_rows, write_table, write_workbook, Sheet};
use physio_tables::pipeline::run_pipeline;
use physio_tables::plot::{plot_all_diagnostics, plot_all_subjects};
use physio_tables::report::{extract_metadata, write_metadata};
use physio_tables::sdi::write_sdi_workbook;
use physio_tables::summary::{write_hr_summaries, write_subject_workbooks};
use physio_tables::table::Table;
use physio_tables::timing::{read_sheet, timing_sheet_for, SignalTable, TimingTable};
use physio_tables::windows::{event_matrices, statistics_table};
use std::path::Path;

/// Data and timing tables of one data sheet.
fn load_sheet(workbook: &Path, sheet: &str) -> Result<(SignalTable, TimingTable)> {
    let timing_sheet = timing_sheet_for(sheet);
    info!("Processing sheet {} with timing sheet {}", sheet, timing_sheet);
    let signal = SignalTable::from_table(&read_sheet(workbook, sheet)?);
    let timing = TimingTable::from_table(&read_sheet(workbook, &timing_sheet)?);
    Ok((signal, timing))
}

/// Runs `f` per data sheet; a sheet that cannot be read is skipped.
fn for_each_sheet<F>(timing: &TimingArgs, mut f: F) -> Result<()>
where
    F: FnMut(&str, &SignalTable, &TimingTable) -> Result<()>,
{
    for sheet in &timing.sheets {
        match load_sheet(&timing.workbook, sheet) {
            Ok((signal, table)) => f(sheet, &signal, &table)?,
            Err(e) => warn!("Skipping sheet {}: {:#}", sheet, e),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let allow = args.allow_list()?;
    let rate = args.sampling_rate;

    match args.command {
        Command::Extract(extract) => {
            let table = extract_metadata(&extract.root, &extract.options())?;
            write_metadata(&extract.root, &table)?;
        }
        Command::Global { extract, output } => {
            let filter = FeatureFilter::new(allow, FilterOptions::default());
            let rows = global_table(&extract.root, &extract.options(), &filter)?;
            write_rows(&output, &rows)?;
        }
        Command::Filter {
            input,
            output,
            segments,
            section_headers,
        } => {
            let table = Table::read_csv(&input)?;
            let filter = FeatureFilter::new(
                allow,
                FilterOptions {
                    segments,
                    section_headers,
                },
            );
            write_rows(&output, &filter_metadata(&table, &filter))?;
        }
        Command::Blocks {
            input,
            output,
            rows,
        } => {
            let table = Table::read_csv(&input)?;
            let blocks = match rows {
                BlockRows::Clock => extract_blocks(&table, StrictClock)?,
                BlockRows::UntilBlank => extract_blocks(&table, UntilBlank)?,
            };
            let blocks = drop_blank_unnamed_columns(&blocks);
            info!("Detected {} block rows", blocks.len());
            let output = output.unwrap_or_else(|| block_output_path(&input));
            write_table(&output, &blocks)?;
        }
        Command::Combine {
            input,
            output,
            meetings,
            label,
            only_combined,
        } => {
            let table = Table::read_csv(&input)?;
            let options = CombineOptions {
                meetings,
                label,
                keep_others: !only_combined,
            };
            write_table(&output, &combine_meetings(&table, &options)?)?;
        }
        Command::SelectMeetings {
            input,
            output,
            meetings,
        } => {
            let table = Table::read_csv(&input)?;
            write_table(&output, &select_meetings(&table, &meetings)?)?;
        }
        Command::Windows {
            timing,
            plan,
            out_dir,
        } => {
            let settings = timing.settings(rate);
            let plan = plan.plan();
            for_each_sheet(&timing, |sheet, signal, table| {
                let stats = statistics_table(table, signal, &plan, &settings);
                write_table(&out_dir.join(format!("{}_statistics.csv", sheet)), &stats)
            })?;
        }
        Command::Matrix {
            timing,
            step,
            output,
        } => {
            let settings = timing.settings(rate);
            let mut sheets = Vec::new();
            for_each_sheet(&timing, |sheet, signal, table| {
                for (name, matrix) in event_matrices(table, signal, sheet, step, &settings) {
                    sheets.push(Sheet::from_table(name, &matrix));
                }
                Ok(())
            })?;
            if sheets.is_empty() {
                warn!("No event matrices produced, {} not written", output.display());
            } else {
                write_workbook(&output, &sheets)?;
            }
        }
        Command::Summary {
            input,
            feature,
            meetings,
            all_meetings,
            out_dir,
        } => {
            let table = Table::read_csv(&input)?;
            // an empty list summarizes every meeting
            let meetings = if all_meetings { Vec::new() } else { meetings };
            let out_dir = match out_dir {
                Some(dir) => dir,
                None => input
                    .parent()
                    .map(Path::to_path_buf)
                    .context("input has no parent directory")?,
            };
            let written = write_hr_summaries(&table, &feature, &meetings, &out_dir)?;
            info!("Wrote {} summaries", written.len());
        }
        Command::Workbooks {
            input,
            out_dir,
            layout,
        } => {
            let table = Table::read_csv(&input)?;
            write_subject_workbooks(&table, &out_dir, layout.into(), &allow)?;
        }
        Command::Sdi { dir, output } => {
            let output =
                output.unwrap_or_else(|| dir.join("HR_SDI_all_subjects_HRV_features.xlsx"));
            write_sdi_workbook(&dir, &output)?;
        }
        Command::PlotMeetings {
            input,
            parameter,
            out_dir,
        } => {
            let table = Table::read_csv(&input)?;
            let written = plot_all_subjects(&table, &parameter, &out_dir)?;
            info!("Wrote {} figures", written.len());
        }
        Command::PlotDiagnostics {
            timing,
            plan,
            out_dir,
        } => {
            let settings = timing.settings(rate);
            let plan = plan.plan();
            for_each_sheet(&timing, |sheet, signal, table| {
                let written = plot_all_diagnostics(table, signal, sheet, &plan, &settings, &out_dir);
                info!("Wrote {} diagnostic figures for {}", written.len(), sheet);
                Ok(())
            })?;
        }
        Command::Pipeline {
            extract,
            parameter,
            out_dir,
        } => {
            let output = run_pipeline(&extract.root, &extract.options(), &parameter, &out_dir)?;
            println!("Metadata: {}", output.metadata.display());
            println!("Blocks: {}", output.blocks.display());
            println!("Figures: {}", output.figures.len());
        }
    }

    Ok(())
}
