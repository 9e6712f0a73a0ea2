/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Error types for snapshot lifecycle operations

use thiserror::Error;

/// Result type for snapshot operations
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Top-level snapshot errors
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provider error during {operation}: {source}")]
    Provider {
        operation: &'static str,
        #[source]
        source: GatewayError,
    },

    #[error("Another run holds the lock at {0}")]
    Locked(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors, always fatal before any provider call
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Config parse error: {0}")]
    Parse(String),

    #[error("doctl executable not found (looked for {0})")]
    DoctlNotFound(String),
}

/// Errors reported by a snapshot provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The provider reports the snapshot does not exist
    #[error("Snapshot not found: {0}")]
    NotFound(String),

    /// The provider process could not be started
    #[error("Failed to spawn provider: {0}")]
    Spawn(String),

    /// The provider ran and reported failure
    #[error("Provider exited with {code:?}: {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },
}

impl GatewayError {
    /// Get error category for metrics and logs
    pub fn category(&self) -> &'static str {
        match self {
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Spawn(_) => "spawn",
            GatewayError::CommandFailed { .. } => "command_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        assert_eq!(GatewayError::NotFound("1".into()).category(), "not_found");
        assert_eq!(GatewayError::Spawn("x".into()).category(), "spawn");
        assert_eq!(
            GatewayError::CommandFailed {
                code: Some(1),
                stderr: "timeout".into()
            }
            .category(),
            "command_failed"
        );
    }

    #[test]
    fn test_config_error_converts() {
        let err: SnapshotError = ConfigError::Missing("DROPLET_ID").into();
        assert_eq!(
            err.to_string(),
            "Configuration error: Missing required setting: DROPLET_ID"
        );
    }
}
