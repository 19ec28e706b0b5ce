//! Result records: the sole hand-off artifact from the engine to the
//! reporting and sequencing collaborators.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Outcome of one assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssertionStatus {
    Passed,
    Failed,
}

/// One assertion's result within a file run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionRecord {
    pub title: String,
    pub status: AssertionStatus,
    pub failure_message: Option<String>,
}

impl AssertionRecord {
    pub fn passed(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            status: AssertionStatus::Passed,
            failure_message: None,
        }
    }

    pub fn failed(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            status: AssertionStatus::Failed,
            failure_message: Some(message.into()),
        }
    }
}

/// Wall-clock window bracketing the `Executing` phase.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PerfStats {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl PerfStats {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// A fatal execution error captured for one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecError {
    pub message: String,
    pub code: String,
}

/// Everything one file run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResultRecord {
    pub test_file_path: PathBuf,
    pub assertions: Vec<AssertionRecord>,
    pub num_passing: usize,
    pub num_failing: usize,
    pub perf_stats: PerfStats,
    pub console_output: Vec<String>,
    pub memory_usage: Option<u64>,
    pub coverage: Option<serde_json::Value>,
    pub exec_error: Option<ExecError>,
}

impl TestResultRecord {
    /// A file counts as failed on any failing assertion or a fatal
    /// execution error; the two are distinguishable via `exec_error`.
    pub fn failed(&self) -> bool {
        self.num_failing > 0 || self.exec_error.is_some()
    }
}

/// Run-wide totals handed to the reporter after the last file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateSummary {
    pub num_total_files: usize,
    pub num_passed_files: usize,
    pub num_failed_files: usize,
    pub num_exec_error_files: usize,
    pub num_passed_asserts: usize,
    pub num_failed_asserts: usize,
    pub start_time_ms: u64,
    pub success: bool,
}

impl AggregateSummary {
    pub fn collect(records: &[TestResultRecord], start_time_ms: u64) -> Self {
        let num_failed_files = records.iter().filter(|r| r.failed()).count();
        Self {
            num_total_files: records.len(),
            num_passed_files: records.len() - num_failed_files,
            num_failed_files,
            num_exec_error_files: records.iter().filter(|r| r.exec_error.is_some()).count(),
            num_passed_asserts: records.iter().map(|r| r.num_passing).sum(),
            num_failed_asserts: records.iter().map(|r| r.num_failing).sum(),
            start_time_ms,
            success: num_failed_files == 0,
        }
    }
}
