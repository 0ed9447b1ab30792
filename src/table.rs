//! Tabular artifact I/O
//!
//! Every tabular artifact the pipeline reads or writes is a headed CSV file.
//! Typed records go through serde; raw input tables and label tables are read
//! as text cells so that values can be carried verbatim.

use crate::error::{PrepError, Result};
use crate::types::{LabelTable, SampleId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::path::Path;

/// A headed table of raw text cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Position of a column by exact name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

/// Read a CSV file into raw text cells
pub fn read_raw(path: &Path) -> Result<RawTable> {
    let file = open(path)?;
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);

    let headers = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(RawTable { headers, rows })
}

/// Deserialize every row of a CSV file
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = open(path)?;
    let mut reader = csv::Reader::from_reader(file);

    let mut records = Vec::new();
    for result in reader.deserialize() {
        records.push(result?);
    }
    Ok(records)
}

/// Serialize rows to a CSV file.
///
/// `header` is written explicitly when `records` is empty so that an empty
/// table still carries its schema.
pub fn write_records<T: Serialize>(path: &Path, header: &[&str], records: &[T]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = csv::Writer::from_writer(file);

    if records.is_empty() {
        writer.write_record(header)?;
    }
    for record in records {
        writer.serialize(record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Read a label table (`sample_id` followed by label columns)
pub fn read_labels(path: &Path) -> Result<LabelTable> {
    let raw = read_raw(path)?;

    match raw.headers.first() {
        Some(first) if first == "sample_id" => {}
        _ => {
            return Err(PrepError::Schema(format!(
                "label table {} must start with a sample_id column",
                path.display()
            )))
        }
    }

    let mut table = LabelTable::new(raw.headers[1..].to_vec());
    for mut row in raw.rows {
        let values = row.split_off(1);
        let sample_id: SampleId = row[0].parse()?;
        table.push(sample_id, values);
    }
    Ok(table)
}

/// Write a label table
pub fn write_labels(path: &Path, table: &LabelTable) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = csv::Writer::from_writer(file);

    let mut header = Vec::with_capacity(table.columns.len() + 1);
    header.push("sample_id");
    header.extend(table.columns.iter().map(String::as_str));
    writer.write_record(&header)?;

    for row in &table.rows {
        let sample_id = row.sample_id.to_string();
        let mut record = Vec::with_capacity(row.values.len() + 1);
        record.push(sample_id.as_str());
        record.extend(row.values.iter().map(String::as_str));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Open a stage artifact, reporting a missing file as [`PrepError::NotFound`]
pub(crate) fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| missing_or_io(path, e))
}

/// Read a whole text artifact, with the same error mapping as [`open`]
pub(crate) fn read_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| missing_or_io(path, e))
}

/// Empty a stage's per-split output directory, creating it if needed.
///
/// Artifacts of an earlier run never survive into the next one. Fails with
/// [`PrepError::Config`] when `input` is `out_dir` or lies inside it.
pub(crate) fn reset_dir(out_dir: &Path, input: &Path) -> Result<()> {
    let out_abs = fs::canonicalize(out_dir).unwrap_or_else(|_| out_dir.to_path_buf());
    let in_abs = fs::canonicalize(input).unwrap_or_else(|_| input.to_path_buf());
    if in_abs.starts_with(&out_abs) {
        return Err(PrepError::Config(format!(
            "output directory {} would overwrite input {}",
            out_dir.display(),
            input.display()
        )));
    }

    match fs::remove_dir_all(out_dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(PrepError::Io(e)),
    }
    fs::create_dir_all(out_dir)?;
    Ok(())
}

fn missing_or_io(path: &Path, e: std::io::Error) -> PrepError {
    match e.kind() {
        std::io::ErrorKind::NotFound => PrepError::NotFound(path.display().to_string()),
        _ => PrepError::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NamedEvent;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn test_label_table_survives_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("labels.csv");

        let mut table = LabelTable::new(vec!["mortality".to_string(), "los".to_string()]);
        table.push(SampleId::new("train", 0), vec!["1".into(), "3.25".into()]);
        table.push(SampleId::new("train", 1), vec!["0".into(), "".into()]);

        write_labels(&path, &table).unwrap();
        let loaded = read_labels(&path).unwrap();

        assert_eq!(loaded, table);
    }

    #[test]
    fn test_label_table_requires_sample_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        std::fs::write(&path, "mortality\n1\n").unwrap();

        assert!(matches!(read_labels(&path), Err(PrepError::Schema(_))));
    }

    #[test]
    fn test_empty_records_keep_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("train_0.csv");

        let empty: Vec<NamedEvent> = Vec::new();
        write_records(&path, &["sample_id", "hours", "variable", "value"], &empty).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim(), "sample_id,hours,variable,value");

        let loaded: Vec<NamedEvent> = read_records(&path).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_reset_dir_clears_previous_artifacts() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("clean").join("train");
        let out = dir.path().join("encoded").join("train");
        fs::create_dir_all(&input).unwrap();
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("stale.csv"), "sample_id\n").unwrap();

        reset_dir(&out, &input).unwrap();

        assert!(out.is_dir());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn test_reset_dir_refuses_own_input() {
        let dir = tempdir().unwrap();
        let split = dir.path().join("train");
        fs::create_dir_all(&split).unwrap();
        fs::write(split.join("listfile.csv"), "stay,filename\n").unwrap();

        assert!(matches!(
            reset_dir(&split, &split),
            Err(PrepError::Config(_))
        ));
        assert!(matches!(
            reset_dir(dir.path(), &split),
            Err(PrepError::Config(_))
        ));
        assert!(split.join("listfile.csv").exists());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let result = read_raw(&dir.path().join("absent.csv"));
        assert!(matches!(result, Err(PrepError::NotFound(_))));
    }
}
