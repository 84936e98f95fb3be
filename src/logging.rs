use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;

use crate::learner::RetrainReport;
use crate::session::InsightRecord;

fn log_dir() -> io::Result<()> {
    fs::create_dir_all("logs")
}

fn append_json_line<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    serde_json::to_writer(&mut file, value)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    file.write_all(b"\n")
}

/// Append one processed event to `logs/insights.jsonl`.
pub fn log_insight(record: &InsightRecord) -> io::Result<()> {
    log_dir()?;
    append_json_line("logs/insights.jsonl", record)
}

/// Append one retrain outcome to `logs/retrain.jsonl`.
pub fn log_retrain(report: &RetrainReport) -> io::Result<()> {
    log_dir()?;
    append_json_line("logs/retrain.jsonl", report)
}
