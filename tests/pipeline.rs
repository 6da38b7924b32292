use physio_tables::aggregate::{combine_meetings, select_meetings, CombineOptions};
use physio_tables::blocks::{drop_blank_unnamed_columns, extract_blocks, StrictClock};
use physio_tables::features::{filter_metadata, AllowList, FeatureFilter, FilterOptions, RowKind};
use physio_tables::pipeline::run_pipeline;
use physio_tables::report::{extract_metadata, metadata_path, write_metadata, ExtractOptions};
use physio_tables::table::Table;
use std::fs;
use std::path::Path;

fn report(hr: &str, samples: &[(&str, &str)]) -> String {
    let mut body = format!(
        "Kubios HRV report,,\n  Mean HR (beats/min):,{},\n  SDNN (ms):,41,\n,,\nTime,Mean HR,\n(hh:mm:ss),(beats/min),\n",
        hr
    );
    for (time, value) in samples {
        body.push_str(&format!("{},{},\n", time, value));
    }
    body.push_str("Results end,,\n");
    body
}

fn write(root: &Path, relative: &str, body: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn session_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "subject 12/meet 1/baseline/s12_m1_baseline.csv",
        &report("70", &[("00:00:30", "70"), ("00:01:00", "72")]),
    );
    write(
        root,
        "subject 12/meet 2/baseline/s12_m2_baseline.csv",
        &report("80", &[("00:00:30", "80"), ("00:01:00", "90")]),
    );
    write(
        root,
        "subject 12/meet 3/therapy/s12_m3_ECG_B.csv",
        &report("85", &[("00:10:00", "85")]),
    );
    write(root, "subject 12/meet 1/meta_data_old.csv", "ignored,,\n");
    dir
}

#[test]
fn metadata_tags_every_report_row() {
    let dir = session_tree();
    let table = extract_metadata(dir.path(), &ExtractOptions::default()).unwrap();

    assert_eq!(&table.headers[..4], ["subject", "meet", "state", "therapy"]);
    // seven fixed rows per report plus its samples
    assert_eq!(table.len(), 3 * 7 + 2 + 2 + 1);
    let therapy: Vec<&str> = table
        .rows
        .iter()
        .filter(|r| r[2] == "therapy")
        .map(|r| r[3].as_str())
        .collect();
    assert!(!therapy.is_empty());
    assert!(therapy.iter().all(|s| *s == "B"));

    let path = write_metadata(dir.path(), &table).unwrap();
    assert_eq!(path, metadata_path(dir.path()));
    let back = Table::read_csv(&path).unwrap();
    assert_eq!(back.headers, table.headers);
    assert_eq!(back.len(), table.len());
}

#[test]
fn filter_keeps_allow_listed_features() {
    let dir = session_tree();
    let table = extract_metadata(dir.path(), &ExtractOptions::default()).unwrap();
    let filter = FeatureFilter::new(AllowList::kubios(), FilterOptions::default());
    let rows = filter_metadata(&table, &filter);

    let hr: Vec<_> = rows
        .iter()
        .filter(|r| r.kind == RowKind::Global && r.col1 == "Mean HR (beats/min):")
        .collect();
    assert_eq!(hr.len(), 3);
}

#[test]
fn blocks_then_median_of_meetings() {
    let dir = session_tree();
    let table = extract_metadata(dir.path(), &ExtractOptions::default()).unwrap();
    let blocks = drop_blank_unnamed_columns(&extract_blocks(&table, StrictClock).unwrap());

    assert_eq!(
        &blocks.headers[..6],
        ["sub", "meeting", "state", "therapy", "Time (hh:mm:ss)", "Mean HR (beats/min)"]
    );
    assert_eq!(blocks.len(), 5);

    let options = CombineOptions {
        meetings: vec![1, 2],
        label: "meet 1-2 median".to_string(),
        keep_others: true,
    };
    let combined = combine_meetings(&blocks, &options).unwrap();
    assert_eq!(combined.len(), 3);

    let hr = combined.column_index("Mean HR (beats/min)").unwrap();
    let medians: Vec<&str> = combined
        .rows
        .iter()
        .filter(|r| r[1] == "meet 1-2 median")
        .map(|r| r[hr].as_str())
        .collect();
    assert_eq!(medians, vec!["75", "81"]);
    assert_eq!(combined.rows[0][1], "meet 3");

    let selected = select_meetings(&blocks, &[3]).unwrap();
    assert_eq!(selected.len(), 1);
    assert_eq!(selected.rows[0][3], "B");
}

#[test]
fn pipeline_rejects_parameter_missing_from_blocks() {
    let dir = session_tree();
    let out = dir.path().join("figures");
    let err = run_pipeline(dir.path(), &ExtractOptions::default(), "LF power", &out).unwrap_err();
    assert!(err.to_string().contains("LF power"));

    // metadata and blocks are written before the parameter is checked
    assert!(metadata_path(dir.path()).exists());
    assert!(dir.path().join("meta_data_real_time_meta_data.csv").exists());
}

#[test]
fn pipeline_rejects_unknown_parameter() {
    let dir = session_tree();
    let out = dir.path().join("figures");
    let err = run_pipeline(dir.path(), &ExtractOptions::default(), "R", &out).unwrap_err();
    assert!(err.to_string().contains("Invalid parameter 'R'"));
    assert!(!out.exists());
}

#[test]
fn pipeline_plots_known_parameter() {
    let dir = session_tree();
    let out = dir.path().join("figures");
    let output = run_pipeline(dir.path(), &ExtractOptions::default(), "Mean HR", &out).unwrap();

    assert_eq!(output.figures, vec![out.join("subject_12_mean_hr_analysis.png")]);
    assert!(output.figures[0].exists());
    assert_eq!(output.blocks, dir.path().join("meta_data_real_time_meta_data.csv"));
}
