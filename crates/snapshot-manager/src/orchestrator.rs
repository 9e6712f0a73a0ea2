/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Snapshot lifecycle orchestration
//!
//! One run creates a snapshot, lists what the provider holds for the
//! droplet, classifies it against the retention policy and deletes what the
//! policy rejects. Every step is awaited before the next one starts.

use crate::{
    config::{DeletionFailurePolicy, DropletConfig, RetryConfig, SnapshotConfig},
    error::{GatewayError, SnapshotError},
    gateway::SnapshotGateway,
    inventory::{self, SnapshotRecord},
    metrics::{self, RunStats},
    report::{self, RunResult, RunStatus},
    retention::{classify, RetentionPlan, RetentionPolicy},
};
use chrono::{DateTime, Utc};
use std::{fmt, sync::Arc};
use tracing::{debug, error, info, warn};

/// Timestamp suffix of snapshot names
pub const SNAPSHOT_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Source of the current time
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Where a run currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    Created,
    CreateFailed,
    Listed,
    ListFailed,
    Classified,
    Deleting,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Init => "init",
            RunPhase::Created => "created",
            RunPhase::CreateFailed => "create-failed",
            RunPhase::Listed => "listed",
            RunPhase::ListFailed => "list-failed",
            RunPhase::Classified => "classified",
            RunPhase::Deleting => "deleting",
            RunPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Result of trying to delete one snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionOutcome {
    Deleted,
    /// The provider no longer has it; counts as a success
    AlreadyGone,
    /// Every attempt failed
    Failed { attempts: u32, last_error: String },
}

impl DeletionOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, DeletionOutcome::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeletionOutcome::Deleted => "deleted",
            DeletionOutcome::AlreadyGone => "already_gone",
            DeletionOutcome::Failed { .. } => "failed",
        }
    }
}

/// A deletion together with the snapshot it targeted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionReport {
    pub snapshot_id: String,
    pub snapshot_name: String,
    pub outcome: DeletionOutcome,
    pub attempts: u32,
}

/// Drives a single snapshot run against a provider
pub struct LifecycleOrchestrator {
    gateway: Arc<dyn SnapshotGateway>,
    droplet: DropletConfig,
    policy: RetentionPolicy,
    retry: RetryConfig,
    failure_policy: DeletionFailurePolicy,
    dry_run: bool,
    clock: Clock,
    phase: RunPhase,
}

impl fmt::Debug for LifecycleOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleOrchestrator")
            .field("gateway", &self.gateway)
            .field("droplet", &self.droplet)
            .field("policy", &self.policy)
            .field("retry", &self.retry)
            .field("failure_policy", &self.failure_policy)
            .field("dry_run", &self.dry_run)
            .field("phase", &self.phase)
            .finish()
    }
}

impl LifecycleOrchestrator {
    /// Create a new orchestrator
    pub fn new(gateway: Arc<dyn SnapshotGateway>, config: &SnapshotConfig) -> Self {
        Self {
            gateway,
            droplet: config.droplet.clone(),
            policy: config.retention,
            retry: config.retry.clone(),
            failure_policy: config.deletion_failure_policy,
            dry_run: false,
            clock: Arc::new(Utc::now),
            phase: RunPhase::Init,
        }
    }

    /// Only list and classify; nothing is created or deleted
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Execute one run and return its result
    pub async fn run(&mut self) -> RunResult {
        info!(
            "Starting snapshot management for droplet {} ({}) with policy {}",
            self.droplet.name, self.droplet.id, self.policy
        );
        self.phase = RunPhase::Init;
        let mut stats = RunStats::new();

        let created = if self.dry_run {
            info!("Dry run: skipping snapshot creation");
            None
        } else {
            let created = self.create().await;
            stats.record_create(created.is_some());
            created
        };

        let records = match inventory::list(self.gateway.as_ref(), &self.droplet).await {
            Ok(records) => {
                self.advance(RunPhase::Listed);
                records
            }
            Err(err) => {
                if let SnapshotError::Provider { operation, source } = &err {
                    metrics::record_provider_error(*operation, source);
                }
                error!("Listing snapshots failed: {}", err);
                warn!("Skipping classification and deletion for this run");
                self.advance(RunPhase::ListFailed);
                self.advance(RunPhase::Done);
                return self.finish(created, 0, Vec::new(), stats, false);
            }
        };
        let total = records.len();

        let plan = self.plan(records, created.as_ref().map(|(name, _)| name.as_str()));
        self.advance(RunPhase::Classified);

        let mut deletions = Vec::with_capacity(plan.delete.len());
        if self.dry_run {
            for record in &plan.delete {
                info!("Dry run: would delete {} (ID: {})", record.name, record.id);
            }
        } else if !plan.delete.is_empty() {
            self.advance(RunPhase::Deleting);
            for record in &plan.delete {
                let report = self.delete_with_retry(record).await;
                stats.record_deletion(&report.outcome, report.attempts);
                deletions.push(report);
            }
        }
        self.advance(RunPhase::Done);

        info!(
            "Cleanup finished: {} deleted, {} already gone, {} failed",
            stats.deleted, stats.already_gone, stats.failed
        );
        self.finish(created, total, deletions, stats, true)
    }

    /// Ask the provider for a new snapshot named `<droplet-name>-<timestamp>`.
    ///
    /// Returns the name and creation time, or `None` when the provider failed.
    pub async fn create(&mut self) -> Option<(String, DateTime<Utc>)> {
        let started = (self.clock)();
        let name = snapshot_name(&self.droplet.name, started);

        match self
            .gateway
            .create_snapshot(&self.droplet.id, &name)
            .await
        {
            Ok(()) => {
                info!("New snapshot created: {}", name);
                self.advance(RunPhase::Created);
                Some((name, started))
            }
            Err(err) => {
                metrics::record_provider_error("create", &err);
                error!(
                    "Failed to create a new snapshot for droplet {} ({}): {}",
                    self.droplet.id,
                    err.category(),
                    err
                );
                self.advance(RunPhase::CreateFailed);
                None
            }
        }
    }

    /// Classify `records`, keeping the snapshot named `pinned` out of reach
    pub fn plan(&self, records: Vec<SnapshotRecord>, pinned: Option<&str>) -> RetentionPlan {
        let (pinned, candidates): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|record| Some(record.name.as_str()) == pinned);

        let mut plan = classify(candidates, &self.policy, (self.clock)());
        let mut keep = pinned;
        keep.append(&mut plan.keep);
        plan.keep = keep;

        debug!(
            "Snapshots kept: {:?}",
            plan.keep.iter().map(|r| r.name.as_str()).collect::<Vec<_>>()
        );
        info!(
            "Snapshots identified for deletion: {:?}",
            plan.delete.iter().map(|r| r.name.as_str()).collect::<Vec<_>>()
        );
        plan
    }

    /// Delete one snapshot, retrying with a fixed backoff.
    ///
    /// Not-found ends the loop immediately as [`DeletionOutcome::AlreadyGone`].
    pub async fn delete_with_retry(&self, record: &SnapshotRecord) -> DeletionReport {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.gateway.delete_snapshot(&record.id).await {
                Ok(()) => {
                    info!("Snapshot deleted: {}", record.name);
                    return deletion(record, DeletionOutcome::Deleted, attempt);
                }
                Err(GatewayError::NotFound(_)) => {
                    warn!(
                        "Snapshot not found (likely already deleted): {}. Treating as successful deletion.",
                        record.name
                    );
                    return deletion(record, DeletionOutcome::AlreadyGone, attempt);
                }
                Err(err) => {
                    metrics::record_provider_error("delete", &err);
                    error!(
                        "Attempt {} of {} failed to delete snapshot {} ({}): {}",
                        attempt,
                        max_attempts,
                        record.name,
                        err.category(),
                        err
                    );
                    last_error = err.to_string();
                    if attempt < max_attempts {
                        tokio::time::sleep(self.retry.backoff()).await;
                    }
                }
            }
        }

        error!(
            "Failed to delete snapshot after {} attempts: {}",
            max_attempts, record.name
        );
        deletion(
            record,
            DeletionOutcome::Failed {
                attempts: max_attempts,
                last_error,
            },
            max_attempts,
        )
    }

    fn advance(&mut self, next: RunPhase) {
        debug!("Run phase {} -> {}", self.phase, next);
        self.phase = next;
    }

    fn finish(
        &self,
        created: Option<(String, DateTime<Utc>)>,
        total: usize,
        deletions: Vec<DeletionReport>,
        stats: RunStats,
        listed: bool,
    ) -> RunResult {
        // A dry run creates nothing, so its status rests on the listing
        let deletion_failed = deletions.iter().any(|d| !d.outcome.is_success());
        let primary_step_ok = if self.dry_run {
            listed
        } else {
            created.is_some()
        };
        let succeeded = primary_step_ok
            && !(deletion_failed && self.failure_policy == DeletionFailurePolicy::FailRun);

        let (new_snapshot_name, timestamp) = match created {
            Some((name, at)) => (Some(name), at),
            None => (None, (self.clock)()),
        };

        RunResult {
            status: if succeeded {
                RunStatus::Success
            } else {
                RunStatus::Failure
            },
            host: report::hostname(),
            new_snapshot_name,
            timestamp,
            total_snapshots_before_deletion: total,
            deletions,
            stats,
        }
    }
}

/// `<prefix>-<YYYYMMDDHHMMSS>`
pub fn snapshot_name(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}", prefix, at.format(SNAPSHOT_TIMESTAMP_FORMAT))
}

fn deletion(record: &SnapshotRecord, outcome: DeletionOutcome, attempts: u32) -> DeletionReport {
    DeletionReport {
        snapshot_id: record.id.clone(),
        snapshot_name: record.name.clone(),
        outcome,
        attempts,
    }
}
