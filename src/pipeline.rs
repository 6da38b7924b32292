use crate::blocks::{block_output_path, drop_blank_unnamed_columns, extract_blocks, StrictClock};
use crate::features::PLOT_PARAMETERS;
use crate::plot::plot_all_subjects;
use crate::report::{extract_metadata, write_metadata, ExtractOptions};
use crate::table::Table;
use anyhow::{bail, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub metadata: PathBuf,
    pub blocks: PathBuf,
    pub figures: Vec<PathBuf>,
}

/// Block headers containing `parameter`.
pub fn matching_columns<'a>(table: &'a Table, parameter: &str) -> Vec<&'a str> {
    table
        .headers
        .iter()
        .map(|h| h.trim())
        .filter(|h| h.contains(parameter))
        .collect()
}

/// Fails unless `parameter` is a known plot parameter carried by some block column.
pub fn validate_parameter(table: &Table, parameter: &str) -> Result<()> {
    if !PLOT_PARAMETERS.contains(&parameter) {
        bail!(
            "Invalid parameter '{}'; expected one of: {}",
            parameter,
            PLOT_PARAMETERS.join(", ")
        );
    }
    let columns = matching_columns(table, parameter);
    if columns.is_empty() {
        bail!(
            "Parameter '{}' matches no block column; available: {}",
            parameter,
            table.headers.join(", ")
        );
    }
    if columns.len() > 1 {
        warn!("'{}' matches several columns, using '{}'", parameter, columns[0]);
    }
    Ok(())
}

/// Metadata extraction, block detection and meeting plots for one parameter.
pub fn run_pipeline(
    root: &Path,
    options: &ExtractOptions,
    parameter: &str,
    out_dir: &Path,
) -> Result<PipelineOutput> {
    let metadata = extract_metadata(root, options)?;
    let metadata_path = write_metadata(root, &metadata)?;

    let blocks = drop_blank_unnamed_columns(&extract_blocks(&metadata, StrictClock)?);
    if blocks.is_empty() {
        bail!("No time-series blocks found under {}", root.display());
    }
    let blocks_path = block_output_path(&metadata_path);
    println!("Writing results to {}", blocks_path.display());
    blocks.write_csv(&blocks_path)?;

    validate_parameter(&blocks, parameter)?;
    let figures = plot_all_subjects(&blocks, parameter, out_dir)?;
    info!("Pipeline produced {} figures", figures.len());

    Ok(PipelineOutput {
        metadata: metadata_path,
        blocks: blocks_path,
        figures,
    })
}
