/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! # Droplet Snapshot Manager
//!
//! Creates a snapshot of one DigitalOcean droplet and prunes the older ones:
//!
//! - Simple "keep the last N" or tiered daily/weekly/monthly retention
//! - Idempotent deletion with a bounded, fixed-backoff retry
//! - Credential masking in every logged command and output
//! - A single `FINAL_STATUS` line per run for monitoring
//!
//! Runs are stateless: each one re-lists snapshots from the provider.

pub mod config;
pub mod credential;
pub mod error;
pub mod gateway;
pub mod inventory;
pub mod lock;
pub mod metrics;
pub mod orchestrator;
pub mod report;
pub mod retention;

pub use config::{DeletionFailurePolicy, SnapshotConfig};
pub use credential::Credential;
pub use error::{ConfigError, GatewayError, Result, SnapshotError};
pub use gateway::{DoctlGateway, SnapshotGateway};
pub use inventory::SnapshotRecord;
pub use orchestrator::{DeletionOutcome, LifecycleOrchestrator, RunPhase};
pub use report::{RunReporter, RunResult, RunStatus};
pub use retention::{classify, RetentionPlan, RetentionPolicy};

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs the snapshot lifecycle for the configured droplet
#[derive(Debug)]
pub struct SnapshotService {
    config: SnapshotConfig,
    gateway: Arc<dyn SnapshotGateway>,
    reporter: RunReporter,
}

impl SnapshotService {
    /// Create a service talking to doctl
    pub fn new(config: SnapshotConfig) -> Result<Self> {
        config.validate()?;
        let doctl = gateway::locate_doctl(config.provider.doctl_path.as_deref())?;
        info!("Using doctl at {}", doctl.display());
        let gateway = Arc::new(DoctlGateway::new(doctl, config.credential.clone()));
        Ok(Self::with_gateway(config, gateway))
    }

    /// Create a service on top of any provider
    pub fn with_gateway(config: SnapshotConfig, gateway: Arc<dyn SnapshotGateway>) -> Self {
        let reporter = RunReporter::new(&config.report);
        Self {
            config,
            gateway,
            reporter,
        }
    }

    pub fn with_reporter(mut self, reporter: RunReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Perform one run: lock, create, prune, report.
    ///
    /// When another run holds the lock a `FAILURE` line with no snapshot
    /// and a count of 0 is still reported before the error is returned.
    pub async fn run(&self, dry_run: bool) -> Result<RunResult> {
        let _lock = match &self.config.lock_file {
            Some(path) => match lock::RunLock::acquire(path).await {
                Ok(lock) => Some(lock),
                Err(err) => {
                    if let Err(report_err) =
                        self.reporter.emit(&RunResult::aborted(Utc::now())).await
                    {
                        warn!("Failed to report aborted run: {}", report_err);
                    }
                    return Err(err);
                }
            },
            None => None,
        };

        let result = LifecycleOrchestrator::new(self.gateway.clone(), &self.config)
            .with_dry_run(dry_run)
            .run()
            .await;

        self.reporter.emit(&result).await?;
        info!("Snapshot management process completed");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_rejects_invalid_config() {
        let err = SnapshotService::new(SnapshotConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::Config(ConfigError::Missing("DROPLET_ID"))
        ));
    }
}
