/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Lockfile guarding against concurrent runs for the same droplet

use crate::error::{Result, SnapshotError};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Held for the duration of a run; the file is removed on drop
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Create the lockfile, failing if another run already holds it.
    ///
    /// A run that crashed leaves its lockfile behind; it must be removed by
    /// hand once no run is active.
    pub async fn acquire(path: &Path) -> Result<Self> {
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(SnapshotError::Locked(path.display().to_string()));
            }
            Err(e) => return Err(SnapshotError::Io(e)),
        };

        let lock = Self {
            path: path.to_path_buf(),
        };
        file.write_all(format!("{}\n", std::process::id()).as_bytes())
            .await?;
        debug!("Acquired run lock {}", path.display());
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove run lock {}: {}", self.path.display(), e);
        }
    }
}
