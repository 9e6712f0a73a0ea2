/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Final run status reporting
//!
//! Every run ends with exactly one line of the form
//!
//! ```text
//! FINAL_STATUS | SUCCESS | host | 20240615120000 | web-1-20240615120000 | 5 snapshots exist
//! ```
//!
//! Field order is fixed; monitoring scrapes it from the log or status file.

use crate::{
    config::ReportConfig,
    error::Result,
    metrics::RunStats,
    orchestrator::{DeletionReport, SNAPSHOT_TIMESTAMP_FORMAT},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{fmt, path::PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

/// Written in place of the snapshot name when none was created
pub const NO_SNAPSHOT: &str = "none";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failure,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStatus::Success => "SUCCESS",
            RunStatus::Failure => "FAILURE",
        })
    }
}

/// Outcome of one run
#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: RunStatus,
    pub host: String,
    pub new_snapshot_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub total_snapshots_before_deletion: usize,
    pub deletions: Vec<DeletionReport>,
    pub stats: RunStats,
}

impl RunResult {
    /// Result for a run that stopped before touching the provider
    pub fn aborted(timestamp: DateTime<Utc>) -> Self {
        Self {
            status: RunStatus::Failure,
            host: hostname(),
            new_snapshot_name: None,
            timestamp,
            total_snapshots_before_deletion: 0,
            deletions: Vec::new(),
            stats: RunStats::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// The `FINAL_STATUS` line for this run
    pub fn status_line(&self) -> String {
        format!(
            "FINAL_STATUS | {} | {} | {} | {} | {} snapshots exist",
            self.status,
            self.host,
            self.timestamp.format(SNAPSHOT_TIMESTAMP_FORMAT),
            self.new_snapshot_name.as_deref().unwrap_or(NO_SNAPSHOT),
            self.total_snapshots_before_deletion
        )
    }
}

/// Destination for the final status line
#[async_trait]
pub trait ReportSink: Send + Sync + fmt::Debug {
    async fn persist(&self, line: &str) -> Result<()>;
}

/// Writes the status line to the log
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl ReportSink for LogSink {
    async fn persist(&self, line: &str) -> Result<()> {
        info!("{}", line);
        Ok(())
    }
}

/// Appends the status line to a file
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ReportSink for FileSink {
    async fn persist(&self, line: &str) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Hands the final status to every configured sink
#[derive(Debug)]
pub struct RunReporter {
    sinks: Vec<Box<dyn ReportSink>>,
}

impl RunReporter {
    /// Log sink, plus the status file when one is configured
    pub fn new(config: &ReportConfig) -> Self {
        let mut sinks: Vec<Box<dyn ReportSink>> = vec![Box::new(LogSink)];
        if let Some(path) = &config.status_file {
            sinks.push(Box::new(FileSink::new(path.clone())));
        }
        Self { sinks }
    }

    pub fn with_sink(mut self, sink: Box<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Persist the status line to every sink.
    ///
    /// A failing sink does not stop the others; the first error is returned.
    pub async fn emit(&self, result: &RunResult) -> Result<()> {
        let line = result.status_line();
        let mut first_error = None;

        for sink in &self.sinks {
            if let Err(err) = sink.persist(&line).await {
                error!("Failed to persist final status to {:?}: {}", sink, err);
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Name of this machine for the status line
pub fn hostname() -> String {
    gethostname::gethostname().to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Debug, Default, Clone)]
    struct CaptureSink(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl ReportSink for CaptureSink {
        async fn persist(&self, line: &str) -> Result<()> {
            self.0.lock().unwrap().push(line.to_string());
            Ok(())
        }
    }

    fn result(status: RunStatus, name: Option<&str>) -> RunResult {
        RunResult {
            status,
            host: "backup-host".to_string(),
            new_snapshot_name: name.map(str::to_string),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap(),
            total_snapshots_before_deletion: 5,
            deletions: Vec::new(),
            stats: RunStats::default(),
        }
    }

    #[test]
    fn test_success_line() {
        let line = result(RunStatus::Success, Some("web-1-20240615120000")).status_line();
        assert_eq!(
            line,
            "FINAL_STATUS | SUCCESS | backup-host | 20240615120000 | web-1-20240615120000 | 5 snapshots exist"
        );
    }

    #[test]
    fn test_failure_line_uses_none() {
        let line = result(RunStatus::Failure, None).status_line();
        let fields: Vec<&str> = line.split(" | ").collect();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[0], "FINAL_STATUS");
        assert_eq!(fields[1], "FAILURE");
        assert_eq!(fields[4], "none");
    }

    #[tokio::test]
    async fn test_emit_to_sinks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.log");
        let capture = CaptureSink::default();
        let reporter = RunReporter::new(&ReportConfig {
            status_file: Some(path.clone()),
        })
        .with_sink(Box::new(capture.clone()));

        reporter.emit(&result(RunStatus::Success, Some("a"))).await.unwrap();
        reporter.emit(&result(RunStatus::Failure, None)).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written.lines().count(), 2);
        assert!(written.lines().nth(1).unwrap().contains("| FAILURE |"));
        assert_eq!(capture.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_others() {
        let capture = CaptureSink::default();
        let reporter = RunReporter::new(&ReportConfig {
            status_file: Some(PathBuf::from("/nonexistent/dir/status.log")),
        })
        .with_sink(Box::new(capture.clone()));

        assert!(reporter.emit(&result(RunStatus::Success, Some("a"))).await.is_err());
        assert_eq!(capture.0.lock().unwrap().len(), 1);
    }
}
