use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use gadget_protocol::{EpochRecord, MetricsSink, Result, SimError, BASELINE_HEADER};
use parking_lot::Mutex;

/// CSV metrics writer.
///
/// A file is truncated and given a header the first time this sink touches
/// it, so a rerun of the same run number starts clean. Later rows append.
#[derive(Debug, Default)]
pub struct CsvMetricsSink {
    started: Mutex<HashSet<PathBuf>>,
}

impl CsvMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Header row; per-node files carry a leading `node` column.
pub fn header(per_node: bool) -> Vec<&'static str> {
    let mut cols = Vec::with_capacity(BASELINE_HEADER.len() + 1);
    if per_node {
        cols.push("node");
    }
    cols.extend_from_slice(&BASELINE_HEADER);
    cols
}

fn fields(record: &EpochRecord) -> Vec<String> {
    let mut row = Vec::with_capacity(BASELINE_HEADER.len() + 1);
    if let Some(node) = record.node {
        row.push(node.to_string());
    }
    row.extend([
        record.iteration.to_string(),
        record.objective.to_string(),
        record.loss.to_string(),
        record.weight_norm.to_string(),
        record.objective_delta.to_string(),
        u8::from(record.converged).to_string(),
        record.converged_streak.to_string(),
        record.accuracy.to_string(),
        record.zero_one_error.to_string(),
        record.train_time.to_string(),
        record.read_time.to_string(),
        record.step_counter.to_string(),
    ]);
    row
}

fn sink_err(path: &Path, e: impl std::fmt::Display) -> SimError {
    SimError::Metrics(format!("{}: {e}", path.display()))
}

impl MetricsSink for CsvMetricsSink {
    fn append_row(&self, path: &Path, record: &EpochRecord) -> Result<()> {
        let fresh = self.started.lock().insert(path.to_path_buf());
        let file = if fresh {
            File::create(path)
        } else {
            OpenOptions::new().create(true).append(true).open(path)
        }
        .map_err(|e| sink_err(path, e))?;

        let mut w = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if fresh {
            w.write_record(header(record.node.is_some()))
                .map_err(|e| sink_err(path, e))?;
        }
        w.write_record(fields(record)).map_err(|e| sink_err(path, e))?;
        w.flush().map_err(|e| sink_err(path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn record(node: Option<i64>, iteration: u64, converged: bool) -> EpochRecord {
        EpochRecord {
            node,
            iteration,
            objective: 0.5,
            loss: 0.25,
            weight_norm: 1.0,
            objective_delta: 0.125,
            converged,
            converged_streak: 3,
            accuracy: 0.75,
            zero_one_error: 0.25,
            train_time: 0.0,
            read_time: 0.0,
            step_counter: iteration + 2,
        }
    }

    #[test]
    fn test_header_then_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cent_pegasos_results.csv");
        let sink = CsvMetricsSink::new();
        sink.append_row(&path, &record(None, 0, false)).unwrap();
        sink.append_row(&path, &record(None, 1, true)).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], BASELINE_HEADER.join(","));
        assert!(lines[1].starts_with("0,0.5,0.25,1,0.125,0,3,"));
        assert!(lines[2].starts_with("1,"));
        assert!(lines[2].ends_with(",3"));
        assert_eq!(lines[2].split(',').nth(5), Some("1"));
    }

    #[test]
    fn test_per_node_rows_carry_node_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_7.csv");
        let sink = CsvMetricsSink::new();
        sink.append_row(&path, &record(Some(7), 0, false)).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("node,iter,"));
        assert!(lines.next().unwrap().starts_with("7,0,"));
    }

    #[test]
    fn test_new_sink_truncates_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_1.csv");
        fs::write(&path, "stale\n").unwrap();

        let sink = CsvMetricsSink::new();
        sink.append_row(&path, &record(Some(1), 0, false)).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.contains("stale"));
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn test_unwritable_path_is_a_metrics_error() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvMetricsSink::new();
        let err = sink
            .append_row(&dir.path().join("missing").join("x.csv"), &record(None, 0, false))
            .unwrap_err();
        assert!(matches!(err, SimError::Metrics(_)));
    }
}
