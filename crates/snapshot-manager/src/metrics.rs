/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Metrics collection for snapshot runs
//!
//! Counters go to whatever `metrics` recorder the process installed; the
//! per-run tallies in [`RunStats`] feed the log summary.

use crate::{error::GatewayError, orchestrator::DeletionOutcome};
use ::metrics::counter;

/// Tallies for a single run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub created: bool,
    pub deleted: usize,
    pub already_gone: usize,
    pub failed: usize,
    pub delete_attempts: u64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of the create step
    pub fn record_create(&mut self, success: bool) {
        self.created = success;
        let outcome = if success { "success" } else { "failure" };
        counter!("snapshot_create_total", "outcome" => outcome).increment(1);
    }

    /// Record a finished deletion and how many provider calls it took
    pub fn record_deletion(&mut self, outcome: &DeletionOutcome, attempts: u32) {
        match outcome {
            DeletionOutcome::Deleted => self.deleted += 1,
            DeletionOutcome::AlreadyGone => self.already_gone += 1,
            DeletionOutcome::Failed { .. } => self.failed += 1,
        }
        self.delete_attempts += u64::from(attempts);

        counter!("snapshot_delete_total", "outcome" => outcome.label()).increment(1);
        counter!("snapshot_delete_attempts_total").increment(u64::from(attempts));
    }
}

/// Count a failed provider call by operation and error category
pub fn record_provider_error(operation: &'static str, err: &GatewayError) {
    counter!(
        "snapshot_provider_errors_total",
        "operation" => operation,
        "category" => err.category()
    )
    .increment(1);
}
