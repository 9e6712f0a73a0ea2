/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Snapshot provider abstraction and the doctl-backed implementation

use crate::{
    credential::Credential,
    error::{ConfigError, GatewayError},
};
use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Result type for provider calls
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Location used when doctl is not on PATH
pub const DEFAULT_DOCTL_PATH: &str = "/usr/local/bin/doctl";

/// Environment variable doctl reads its access token from
const TOKEN_ENV: &str = "DIGITALOCEAN_ACCESS_TOKEN";

/// Columns requested from `doctl compute snapshot list`
const LIST_FORMAT: &str = "ID,Name,CreatedAt,ResourceId";

/// Operations the lifecycle needs from a snapshot provider
#[async_trait]
pub trait SnapshotGateway: Send + Sync + std::fmt::Debug {
    /// Create a snapshot and wait until the provider confirms it
    async fn create_snapshot(&self, resource_id: &str, snapshot_name: &str) -> GatewayResult<()>;

    /// Raw listing of every droplet snapshot, one `ID NAME CREATED_AT RESOURCE_ID` per line
    async fn list_snapshots(&self) -> GatewayResult<String>;

    /// Delete a snapshot; [`GatewayError::NotFound`] when it is already gone
    async fn delete_snapshot(&self, snapshot_id: &str) -> GatewayResult<()>;
}

/// Provider backed by the `doctl` command line tool
#[derive(Debug)]
pub struct DoctlGateway {
    doctl: PathBuf,
    credential: Credential,
}

impl DoctlGateway {
    pub fn new(doctl: PathBuf, credential: Credential) -> Self {
        Self { doctl, credential }
    }

    /// Run doctl with `args`, returning trimmed stdout on success.
    ///
    /// The token travels through the environment, and everything logged or
    /// returned is passed through [`Credential::redact`] first.
    async fn run(&self, args: &[&str]) -> GatewayResult<String> {
        let command_line = self
            .credential
            .redact(&format!("{} {}", self.doctl.display(), args.join(" ")));
        info!("Running command: {}", command_line);

        let output = Command::new(&self.doctl)
            .args(args)
            .env(TOKEN_ENV, self.credential.expose())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                error!("Failed to start {}: {}", command_line, e);
                GatewayError::Spawn(e.to_string())
            })?;

        let stdout = self
            .credential
            .redact(String::from_utf8_lossy(&output.stdout).trim());
        let stderr = self
            .credential
            .redact(String::from_utf8_lossy(&output.stderr).trim());

        if output.status.success() {
            debug!("Command executed successfully with output: {}", stdout);
            if !stderr.is_empty() {
                warn!("Command executed with errors: {}", stderr);
            }
            Ok(stdout)
        } else {
            error!("Command failed with error: {}", stderr);
            debug!("Command failed with output: {}", stdout);
            debug!("Full command that failed: {}", command_line);
            Err(GatewayError::CommandFailed {
                code: output.status.code(),
                stderr: if stderr.is_empty() { stdout } else { stderr },
            })
        }
    }
}

#[async_trait]
impl SnapshotGateway for DoctlGateway {
    async fn create_snapshot(&self, resource_id: &str, snapshot_name: &str) -> GatewayResult<()> {
        self.run(&[
            "compute",
            "droplet-action",
            "snapshot",
            resource_id,
            "--snapshot-name",
            snapshot_name,
            "--wait",
        ])
        .await
        .map(|_| ())
    }

    async fn list_snapshots(&self) -> GatewayResult<String> {
        self.run(&[
            "compute",
            "snapshot",
            "list",
            "--resource",
            "droplet",
            "--format",
            LIST_FORMAT,
            "--no-header",
        ])
        .await
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> GatewayResult<()> {
        match self
            .run(&["compute", "snapshot", "delete", snapshot_id, "--force"])
            .await
        {
            Ok(stdout) if looks_not_found(&stdout) => {
                Err(GatewayError::NotFound(snapshot_id.to_string()))
            }
            Ok(_) => Ok(()),
            Err(GatewayError::CommandFailed { stderr, .. }) if looks_not_found(&stderr) => {
                Err(GatewayError::NotFound(snapshot_id.to_string()))
            }
            Err(err) => Err(err),
        }
    }
}

/// Whether provider output describes a missing resource
pub fn looks_not_found(output: &str) -> bool {
    let output = output.to_ascii_lowercase();
    output.contains("not found")
        || output.contains("could not be found")
        || output
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|word| word == "404")
}

/// Resolve the doctl executable.
///
/// An explicit path must exist. Otherwise every `doctl` on PATH is
/// considered and the most recently modified one wins, with
/// [`DEFAULT_DOCTL_PATH`] as the last resort.
pub fn locate_doctl(configured: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = configured {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(ConfigError::DoctlNotFound(path.display().to_string()))
        };
    }

    let newest = which::which_all("doctl")
        .map(|paths| {
            paths
                .filter_map(|path| {
                    let modified = path.metadata().and_then(|m| m.modified()).ok()?;
                    Some((modified, path))
                })
                .max_by_key(|(modified, _)| *modified)
                .map(|(_, path)| path)
        })
        .ok()
        .flatten();

    if let Some(path) = newest {
        debug!("Using doctl at {}", path.display());
        return Ok(path);
    }

    let fallback = PathBuf::from(DEFAULT_DOCTL_PATH);
    if fallback.is_file() {
        Ok(fallback)
    } else {
        Err(ConfigError::DoctlNotFound(format!("doctl on PATH, {}", DEFAULT_DOCTL_PATH)))
    }
}
