/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Snapshot inventory: typed records for one droplet

use crate::{
    config::DropletConfig,
    error::{Result, SnapshotError},
    gateway::SnapshotGateway,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Fields per listing line: ID, Name, CreatedAt, ResourceId
const LISTING_FIELDS: usize = 4;

/// Digits in the `YYYYMMDDHHMMSS` suffix of generated snapshot names
const NAME_TIMESTAMP_DIGITS: usize = 14;

/// A snapshot as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub resource_id: String,
}

impl SnapshotRecord {
    /// Whether the snapshot was taken from `droplet`.
    ///
    /// A reported resource id decides alone. Only when the provider left it
    /// blank does the name count, and then it must be exactly
    /// `<droplet-name>-<YYYYMMDDHHMMSS>`.
    pub fn belongs_to(&self, droplet: &DropletConfig) -> bool {
        if !self.resource_id.is_empty() {
            return !droplet.id.is_empty() && self.resource_id == droplet.id;
        }
        !droplet.name.is_empty()
            && self
                .name
                .strip_prefix(droplet.name.as_str())
                .and_then(|rest| rest.strip_prefix('-'))
                .is_some_and(|stamp| {
                    stamp.len() == NAME_TIMESTAMP_DIGITS
                        && stamp.bytes().all(|b| b.is_ascii_digit())
                })
    }
}

/// Fetch the provider listing and keep the snapshots of `droplet`
pub async fn list(
    gateway: &dyn SnapshotGateway,
    droplet: &DropletConfig,
) -> Result<Vec<SnapshotRecord>> {
    let raw = gateway
        .list_snapshots()
        .await
        .map_err(|source| SnapshotError::Provider {
            operation: "list",
            source,
        })?;

    let records = parse_listing(&raw, droplet);
    info!(
        "Found {} snapshots for droplet {} ({})",
        records.len(),
        droplet.name,
        droplet.id
    );
    Ok(records)
}

/// Parse a raw listing, skipping lines that cannot be read
pub fn parse_listing(raw: &str, droplet: &DropletConfig) -> Vec<SnapshotRecord> {
    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for (index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record = match parse_line(line) {
            Ok(record) => record,
            Err(reason) => {
                warn!("Skipping listing line {}: {} ({:?})", index + 1, reason, line);
                continue;
            }
        };

        if !record.belongs_to(droplet) {
            continue;
        }
        if !seen.insert(record.id.clone()) {
            warn!("Duplicate snapshot id {} in listing, keeping first", record.id);
            continue;
        }

        debug!(
            "Snapshot found: {} (ID: {}) created at {}",
            record.name, record.id, record.created_at
        );
        records.push(record);
    }

    records
}

/// An empty ResourceId column collapses under whitespace splitting, so a
/// three-field line is a record without a resource id.
fn parse_line(line: &str) -> std::result::Result<SnapshotRecord, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != LISTING_FIELDS && fields.len() != LISTING_FIELDS - 1 {
        return Err(format!(
            "expected {} fields, found {}",
            LISTING_FIELDS,
            fields.len()
        ));
    }

    let created_at = DateTime::parse_from_rfc3339(fields[2])
        .map_err(|e| format!("bad timestamp {:?}: {}", fields[2], e))?
        .with_timezone(&Utc);

    Ok(SnapshotRecord {
        id: fields[0].to_string(),
        name: fields[1].to_string(),
        created_at,
        resource_id: fields.get(3).copied().unwrap_or_default().to_string(),
    })
}
