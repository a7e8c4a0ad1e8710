//! Append-only JSONL persistence for [`crate::pipeline::EvaluationRecord`]s.
//!
//! One record per line, written and flushed immediately rather than
//! buffered: a crash mid-run loses at most the record in flight, never
//! corrupts one already on disk. Simplicity and durability are chosen over
//! write throughput here deliberately.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use std::collections::BTreeSet;
use std::fs::OpenOptions;

use crate::error::{Error, Result};
use crate::pipeline::EvaluationRecord;

/// Writes [`EvaluationRecord`]s to a JSONL file, one compact JSON object
/// per line.
pub struct EvaluationRecorder {
    output_path: PathBuf,
}

impl EvaluationRecorder {
    /// Creates a recorder targeting `output_path`. The parent directory is
    /// created eagerly; the file itself is not created until the first
    /// write.
    pub fn new(output_path: impl Into<PathBuf>) -> Result<Self> {
        let output_path = output_path.into();
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::storage(format!("failed to create {}: {e}", parent.display())))?;
            }
        }
        Ok(Self { output_path })
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Appends one record as a single line.
    pub fn record(&self, record: &EvaluationRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .map_err(|e| Error::storage(format!("failed to open {}: {e}", self.output_path.display())))?;
        write_line(&mut file, record)
    }

    /// Appends each record as its own line, opening the file once.
    pub fn record_batch(&self, records: &[EvaluationRecord]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .map_err(|e| Error::storage(format!("failed to open {}: {e}", self.output_path.display())))?;
        for record in records {
            write_line(&mut file, record)?;
        }
        Ok(())
    }

    /// Loads every record from `input_path`, in file order. Blank lines
    /// are skipped; a malformed line fails with the 1-indexed line number.
    pub fn load(input_path: impl AsRef<Path>) -> Result<Vec<EvaluationRecord>> {
        let input_path = input_path.as_ref();
        let file = std::fs::File::open(input_path)
            .map_err(|e| Error::storage(format!("failed to open {}: {e}", input_path.display())))?;
        let reader = std::io::BufReader::new(file);

        let mut records = Vec::new();
        for (line_number, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| Error::storage(format!("I/O error reading line {}: {e}", line_number + 1)))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: EvaluationRecord = serde_json::from_str(&line).map_err(|e| {
                Error::storage(format!(
                    "malformed record at line {}: {e}",
                    line_number + 1
                ))
            })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Summarizes `input_path` without failing on the first bad line:
    /// every malformed line is collected into `errors` instead.
    pub fn validate_file(input_path: impl AsRef<Path>) -> Result<ValidationSummary> {
        let input_path = input_path.as_ref();
        let file = std::fs::File::open(input_path)
            .map_err(|e| Error::storage(format!("failed to open {}: {e}", input_path.display())))?;
        let reader = std::io::BufReader::new(file);

        let mut summary = ValidationSummary::default();
        for (line_number, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    summary.errors.push(format!("I/O error at line {}: {e}", line_number + 1));
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<EvaluationRecord>(&line) {
                Ok(record) => {
                    summary.total_records += 1;
                    summary.schema_versions.insert(record.run_metadata.schema_version.clone());
                    summary.run_ids.insert(record.run_metadata.run_id.clone());
                    summary.pipeline_modes.insert(record.run_metadata.pipeline_mode.clone());
                }
                Err(e) => summary
                    .errors
                    .push(format!("malformed record at line {}: {e}", line_number + 1)),
            }
        }
        summary.valid = summary.errors.is_empty();
        Ok(summary)
    }
}

fn write_line(file: &mut std::fs::File, record: &EvaluationRecord) -> Result<()> {
    let json = serde_json::to_string(record)?;
    writeln!(file, "{json}").map_err(|e| Error::storage(format!("write failed: {e}")))
}

/// Aggregate result of [`EvaluationRecorder::validate_file`].
#[derive(Debug, Default, Clone)]
pub struct ValidationSummary {
    pub valid: bool,
    pub total_records: usize,
    pub schema_versions: BTreeSet<String>,
    pub run_ids: BTreeSet<String>,
    pub pipeline_modes: BTreeSet<String>,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{DetectionCategory, EvaluationOutcome, GroundTruthLabel, PromptData, RunMetadata};
    use crate::config::PipelineMode;
    use tempfile::tempdir;

    fn sample_record() -> EvaluationRecord {
        EvaluationRecord {
            run_metadata: RunMetadata::new(PipelineMode::Baseline, "model-a", None, "unit-test"),
            prompt: PromptData::new("p1", GroundTruthLabel::Reciprocal),
            pre_evaluation: None,
            response: None,
            post_evaluation: None,
            deltas: None,
            outcome: EvaluationOutcome {
                actual_manipulation_success: None,
                detection_category: DetectionCategory::Tn,
            },
        }
    }

    #[test]
    fn test_record_then_load_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let recorder = EvaluationRecorder::new(&path).unwrap();

        recorder.record(&sample_record()).unwrap();
        recorder.record(&sample_record()).unwrap();

        let loaded = EvaluationRecorder::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_record_batch_writes_one_line_each() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("batch.jsonl");
        let recorder = EvaluationRecorder::new(&path).unwrap();

        recorder.record_batch(&[sample_record(), sample_record(), sample_record()]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn test_load_skips_blank_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sparse.jsonl");
        std::fs::write(&path, format!("{}\n\n{}\n", serde_json::to_string(&sample_record()).unwrap(), serde_json::to_string(&sample_record()).unwrap())).unwrap();

        let loaded = EvaluationRecorder::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_load_fails_with_line_number_on_malformed_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, format!("{}\nnot json\n", serde_json::to_string(&sample_record()).unwrap())).unwrap();

        let err = EvaluationRecorder::load(&path).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_validate_file_collects_all_errors_without_failing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mixed.jsonl");
        std::fs::write(&path, "not json\nalso not json\n").unwrap();

        let summary = EvaluationRecorder::validate_file(&path).unwrap();
        assert!(!summary.valid);
        assert_eq!(summary.errors.len(), 2);
        assert_eq!(summary.total_records, 0);
    }

    #[test]
    fn test_new_does_not_create_file_until_first_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lazy.jsonl");
        let _recorder = EvaluationRecorder::new(&path).unwrap();
        assert!(!path.exists());
    }
}
