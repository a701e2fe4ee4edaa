//! JSONL run records for completed research runs.
//!
//! Persistence is best-effort: I/O problems are logged and swallowed so a
//! report is never lost to a bookkeeping failure.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{OpenOptions, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::report::Report;

const RUNLOG_DIR_ENV: &str = "ROUNDTABLE_RUNLOG_DIR";
const DEFAULT_RUNLOG_DIR: &str = "data/runs";

#[derive(Serialize)]
struct RunRecord {
    run_id: String,
    timestamp: DateTime<Utc>,
    topic: String,
    section_count: usize,
    failed_sessions: usize,
    citation_count: usize,
}

fn runlog_dir() -> PathBuf {
    std::env::var(RUNLOG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_RUNLOG_DIR))
}

fn todays_file(dir: &Path) -> PathBuf {
    let filename = format!("{}.jsonl", Utc::now().format("%Y-%m-%d"));
    dir.join(filename)
}

/// Append one record for a completed run to today's log file.
pub fn persist_run_record(run_id: &str, report: &Report, failed_sessions: usize) {
    let dir = runlog_dir();
    if let Err(err) = create_dir_all(&dir) {
        warn!(error = %err, path = %dir.display(), "unable to create run log directory");
        return;
    }

    let record = RunRecord {
        run_id: run_id.to_string(),
        timestamp: Utc::now(),
        topic: report.topic.clone(),
        section_count: report.sections.len(),
        failed_sessions,
        citation_count: report.citations.len(),
    };

    let file_path = todays_file(&dir);
    let mut file = match OpenOptions::new()
        .create(true)
        .append(true)
        .open(&file_path)
    {
        Ok(file) => file,
        Err(err) => {
            warn!(error = %err, path = %file_path.display(), "unable to open run log");
            return;
        }
    };

    if let Err(err) = serde_json::to_writer(&mut file, &record) {
        warn!(error = %err, "failed to serialise run record");
        return;
    }
    if let Err(err) = writeln!(file) {
        warn!(error = %err, "failed to append newline to run log");
    }
}
