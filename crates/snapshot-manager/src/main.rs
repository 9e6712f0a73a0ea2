/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use std::{path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::Parser;
use snapshot_manager::{RetentionPolicy, RunResult, SnapshotConfig, SnapshotService};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Create a snapshot of a DigitalOcean droplet and prune old ones
#[derive(Parser)]
#[command(name = "dosnapshots")]
#[command(version)]
struct Cli {
    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// List and classify snapshots without creating or deleting any
    #[arg(long)]
    dry_run: bool,

    /// Keep only the N newest snapshots besides the new one
    #[arg(long, value_name = "N")]
    retain_last: Option<usize>,

    /// Append the FINAL_STATUS line to this file
    #[arg(long, value_name = "FILE")]
    status_file: Option<PathBuf>,

    /// Refuse to start while this lockfile exists
    #[arg(long, value_name = "FILE")]
    lock_file: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(result) if result.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<RunResult> {
    let mut config = SnapshotConfig::load(cli.config.as_deref())
        .await
        .context("failed to load configuration")?;

    if let Some(retain_last) = cli.retain_last {
        config.retention = RetentionPolicy::SimpleCount { retain_last };
    }
    if cli.status_file.is_some() {
        config.report.status_file = cli.status_file;
    }
    if cli.lock_file.is_some() {
        config.lock_file = cli.lock_file;
    }

    let service = SnapshotService::new(config).context("invalid configuration")?;
    service
        .run(cli.dry_run)
        .await
        .context("snapshot run aborted")
}
