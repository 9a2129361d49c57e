//! Integration tests for the `polycap prepare` command.

use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use assert_cmd::Command;
use parquet::arrow::ArrowWriter;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn write_afrimmd(path: &Path) {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("image_id", DataType::Utf8, false),
        Field::new("eng", DataType::Utf8, true),
        Field::new("swh", DataType::Utf8, true),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(vec![0, 1, 2, 3])),
            Arc::new(StringArray::from(vec!["100_0", "101_1", "102_0", "103_2"])),
            Arc::new(StringArray::from(vec!["two dogs", "a red car", "a child", "a market"])),
            Arc::new(StringArray::from(vec![Some("mbwa wawili"), None, Some("mtoto"), Some("soko")])),
        ],
    )
    .unwrap();
    let file = fs::File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

/// Workspace with local sources and a config that skips the network steps.
fn workspace(sample_size: usize) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let afrimmd = temp_dir.path().join("afrimmd.parquet");
    let avila = temp_dir.path().join("avila.csv");
    write_afrimmd(&afrimmd);
    fs::write(&avila, "Unnamed: 0,image,caption_number,id,language,caption\n0,9.jpg,0,0,hau,karnuka biyu\n").unwrap();

    let config = format!(
        "[prepare]\nafrimmd = '{}'\navila = '{}'\nsample_size = {}\nseed = 7\n\n\
         [prepare.images]\nenabled = false\n\n[prepare.publish]\nenabled = false\n",
        afrimmd.display(),
        avila.display(),
        sample_size
    );
    fs::write(temp_dir.path().join("polycap.toml"), config).unwrap();
    temp_dir
}

#[test]
fn test_prepare_writes_metadata() {
    let temp_dir = workspace(4);
    let mut cmd = Command::cargo_bin("polycap").unwrap();
    cmd.arg("-w")
        .arg(temp_dir.path())
        .arg("prepare")
        .arg("--output-dir")
        .arg("captions")
        .assert()
        .success()
        .stdout(predicate::str::contains("Dataset prepared"));

    let metadata = fs::read_to_string(temp_dir.path().join("captions").join("metadata.csv")).unwrap();
    let mut lines = metadata.lines();
    assert_eq!(lines.next(), Some("id,file_name,language,caption,question,weight"));
    let rows: Vec<&str> = lines.collect();
    // Four sampled rows plus the exempt Hausa row.
    assert_eq!(rows.len(), 5);
    assert!(rows[4].starts_with("4,9.jpg,ha,karnuka biyu,"));
    assert!(rows[4].ends_with(",0.0") || rows[4].ends_with(",0"));
}

#[test]
fn test_prepare_json_summary() {
    let temp_dir = workspace(2);
    let mut cmd = Command::cargo_bin("polycap").unwrap();
    let output = cmd
        .arg("-w")
        .arg(temp_dir.path())
        .arg("prepare")
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["rows_written"], 3);
    assert_eq!(summary["report"]["afrimmd_rows"], 7);
    assert_eq!(summary["report"]["avila_rows"], 1);
    assert!(summary["images"].is_null());
}

#[test]
fn test_prepare_sample_size_flag_overrides_config() {
    let temp_dir = workspace(2);
    let mut cmd = Command::cargo_bin("polycap").unwrap();
    cmd.arg("-w")
        .arg(temp_dir.path())
        .arg("prepare")
        .arg("--sample-size")
        .arg("50")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Data preparation failed"));
}
