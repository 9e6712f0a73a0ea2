/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Configuration for the snapshot manager
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! the process environment (including a `.env` file in the working
//! directory). Command line flags are applied by the binary on top.

use crate::{credential::Credential, error::ConfigError, retention::RetentionPolicy};
use serde::Deserialize;
use std::{
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use tracing::{debug, info};

/// Main configuration, built once at startup and passed down
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub droplet: DropletConfig,
    pub credential: Credential,
    pub retention: RetentionPolicy,
    pub provider: ProviderConfig,
    pub retry: RetryConfig,
    pub deletion_failure_policy: DeletionFailurePolicy,
    pub lock_file: Option<PathBuf>,
    pub report: ReportConfig,
}

/// The droplet whose snapshots are managed
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DropletConfig {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Explicit doctl location; resolved from PATH when unset
    pub doctl_path: Option<PathBuf>,
}

/// Delete retry settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total delete attempts per snapshot, including the first
    pub max_attempts: u32,
    /// Fixed wait between attempts
    pub backoff_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// File the FINAL_STATUS line is appended to, besides the log
    pub status_file: Option<PathBuf>,
}

/// Whether a snapshot that could not be deleted fails the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeletionFailurePolicy {
    /// Deletion failures are logged but the run still reports success
    #[default]
    BestEffort,
    /// Any deletion that exhausts its retries reports the run as failed
    FailRun,
}

impl FromStr for DeletionFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best-effort" | "best_effort" => Ok(Self::BestEffort),
            "fail-run" | "fail_run" => Ok(Self::FailRun),
            other => Err(format!("expected best-effort or fail-run, got {other:?}")),
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_secs: 5,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            droplet: DropletConfig::default(),
            credential: Credential::default(),
            retention: RetentionPolicy::default(),
            provider: ProviderConfig::default(),
            retry: RetryConfig::default(),
            deletion_failure_policy: DeletionFailurePolicy::default(),
            lock_file: None,
            report: ReportConfig::default(),
        }
    }
}

impl SnapshotConfig {
    /// Load defaults, the optional TOML file, `.env` and the environment
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path).await?,
            None => Self::default(),
        };

        if let Ok(dotenv_path) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", dotenv_path.display());
        }
        config.apply_env(|key| std::env::var(key).ok())?;

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub async fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from file: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(format!("TOML parse error: {}", e)))
    }

    /// Overlay settings found through `lookup` (normally the process environment)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("DROPLET_ID") {
            self.droplet.id = id.trim().to_string();
        }
        if let Some(name) = lookup("DROPLET_NAME") {
            self.droplet.name = name.trim().to_string();
        }
        if let Some(token) = lookup("DO_API_TOKEN") {
            self.credential = Credential::new(token);
        }
        if let Some(path) = lookup("DOCTL_PATH") {
            self.provider.doctl_path = Some(PathBuf::from(path.trim()));
        }
        if let Some(attempts) = parse_var(&lookup, "DELETE_RETRIES")? {
            self.retry.max_attempts = attempts;
        }
        if let Some(secs) = parse_var(&lookup, "DELETE_RETRY_DELAY_SECS")? {
            self.retry.backoff_secs = secs;
        }
        if let Some(policy) = parse_var(&lookup, "DELETION_FAILURE_POLICY")? {
            self.deletion_failure_policy = policy;
        }
        if let Some(path) = lookup("SNAPSHOT_LOCK_FILE") {
            self.lock_file = Some(PathBuf::from(path.trim()));
        }
        if let Some(path) = lookup("SNAPSHOT_STATUS_FILE") {
            self.report.status_file = Some(PathBuf::from(path.trim()));
        }

        self.apply_retention_env(&lookup)
    }

    fn apply_retention_env<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let retain_last: Option<usize> = parse_var(lookup, "RETAIN_LAST_SNAPSHOTS")?;
        let daily: Option<i64> = parse_var(lookup, "KEEP_DAILY_DAYS")?;
        let weekly: Option<i64> = parse_var(lookup, "KEEP_WEEKLY_WEEKS")?;
        let monthly: Option<i64> = parse_var(lookup, "KEEP_MONTHLY_MONTHS")?;
        let any_tier = daily.is_some() || weekly.is_some() || monthly.is_some();

        let use_tiered = match lookup("RETENTION_POLICY") {
            Some(name) => match name.trim().to_ascii_lowercase().as_str() {
                "simple-count" | "simple" | "count" => false,
                "tiered" | "gfs" => true,
                other => {
                    return Err(ConfigError::Invalid {
                        key: "RETENTION_POLICY",
                        reason: format!("expected simple-count or tiered, got {other:?}"),
                    })
                }
            },
            None if any_tier => true,
            None if retain_last.is_some() => false,
            None => return Ok(()),
        };

        self.retention = if use_tiered {
            let (mut d, mut w, mut m) = match self.retention {
                RetentionPolicy::Tiered {
                    keep_daily_days,
                    keep_weekly_weeks,
                    keep_monthly_months,
                } => (keep_daily_days, keep_weekly_weeks, keep_monthly_months),
                RetentionPolicy::SimpleCount { .. } => (0, 0, 0),
            };
            d = daily.unwrap_or(d);
            w = weekly.unwrap_or(w);
            m = monthly.unwrap_or(m);
            RetentionPolicy::Tiered {
                keep_daily_days: d,
                keep_weekly_weeks: w,
                keep_monthly_months: m,
            }
        } else {
            let current = match self.retention {
                RetentionPolicy::SimpleCount { retain_last } => retain_last,
                RetentionPolicy::Tiered { .. } => 0,
            };
            RetentionPolicy::SimpleCount {
                retain_last: retain_last.unwrap_or(current),
            }
        };

        Ok(())
    }

    /// Check that everything a run needs is present
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.droplet.id.is_empty() {
            return Err(ConfigError::Missing("DROPLET_ID"));
        }
        if self.droplet.name.is_empty() {
            return Err(ConfigError::Missing("DROPLET_NAME"));
        }
        if self.credential.is_empty() {
            return Err(ConfigError::Missing("DO_API_TOKEN"));
        }
        if self.droplet.name.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid {
                key: "DROPLET_NAME",
                reason: "must not contain whitespace".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "DELETE_RETRIES",
                reason: "at least one attempt is required".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }),
        _ => Ok(None),
    }
}
