/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Retention policy engine
//!
//! [`classify`] splits an inventory into snapshots to keep and snapshots to
//! delete. It never talks to the provider, so every policy decision can be
//! exercised against a fixed clock.

use crate::inventory::SnapshotRecord;
use chrono::{DateTime, Months, TimeDelta, Utc};
use serde::Deserialize;
use std::fmt;

/// Which snapshots survive a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum RetentionPolicy {
    /// Keep the `retain_last` newest snapshots
    SimpleCount {
        #[serde(default)]
        retain_last: usize,
    },
    /// Keep anything inside at least one of the daily, weekly or monthly
    /// windows. A value of zero or less disables that window.
    Tiered {
        #[serde(default)]
        keep_daily_days: i64,
        #[serde(default)]
        keep_weekly_weeks: i64,
        #[serde(default)]
        keep_monthly_months: i64,
    },
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy::SimpleCount { retain_last: 0 }
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionPolicy::SimpleCount { retain_last } => {
                write!(f, "simple-count(retain_last={retain_last})")
            }
            RetentionPolicy::Tiered {
                keep_daily_days,
                keep_weekly_weeks,
                keep_monthly_months,
            } => write!(
                f,
                "tiered(daily={keep_daily_days}d, weekly={keep_weekly_weeks}w, monthly={keep_monthly_months}m)"
            ),
        }
    }
}

/// Outcome of classification; both lists are newest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    pub keep: Vec<SnapshotRecord>,
    pub delete: Vec<SnapshotRecord>,
}

impl RetentionPlan {
    pub fn is_empty(&self) -> bool {
        self.keep.is_empty() && self.delete.is_empty()
    }
}

/// Partition `records` into keep and delete sets under `policy` at `now`
pub fn classify(
    mut records: Vec<SnapshotRecord>,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> RetentionPlan {
    sort_newest_first(&mut records);

    match *policy {
        RetentionPolicy::SimpleCount { retain_last } => {
            let delete = records.split_off(retain_last.min(records.len()));
            RetentionPlan {
                keep: records,
                delete,
            }
        }
        RetentionPolicy::Tiered {
            keep_daily_days,
            keep_weekly_weeks,
            keep_monthly_months,
        } => {
            let (keep, delete) = records.into_iter().partition(|record| {
                within_days(record.created_at, now, keep_daily_days)
                    || within_weeks(record.created_at, now, keep_weekly_weeks)
                    || within_months(record.created_at, now, keep_monthly_months)
            });
            RetentionPlan { keep, delete }
        }
    }
}

/// Newest first; equal timestamps fall back to the id, highest first
pub fn sort_newest_first(records: &mut [SnapshotRecord]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

pub(crate) fn within_days(created_at: DateTime<Utc>, now: DateTime<Utc>, days: i64) -> bool {
    if days <= 0 {
        return false;
    }
    match TimeDelta::try_days(days) {
        Some(window) => now.signed_duration_since(created_at) <= window,
        None => true,
    }
}

pub(crate) fn within_weeks(created_at: DateTime<Utc>, now: DateTime<Utc>, weeks: i64) -> bool {
    if weeks <= 0 {
        return false;
    }
    match weeks.checked_mul(7) {
        Some(days) => within_days(created_at, now, days),
        None => true,
    }
}

/// Calendar months: adding one month to Jan 31 lands on the last day of February
pub(crate) fn within_months(created_at: DateTime<Utc>, now: DateTime<Utc>, months: i64) -> bool {
    if months <= 0 {
        return false;
    }
    let Ok(months) = u32::try_from(months) else {
        return true;
    };
    match created_at.checked_add_months(Months::new(months)) {
        Some(expires) => now <= expires,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn record(id: &str, created_at: DateTime<Utc>) -> SnapshotRecord {
        SnapshotRecord {
            id: id.to_string(),
            name: format!("web-1-{}", created_at.format("%Y%m%d%H%M%S")),
            created_at,
            resource_id: "123456".to_string(),
        }
    }

    fn days_ago(id: &str, days: i64) -> SnapshotRecord {
        record(id, now() - TimeDelta::days(days))
    }

    fn ids(records: &[SnapshotRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_simple_count_keeps_newest() {
        let records = vec![
            days_ago("c", 3),
            days_ago("a", 1),
            days_ago("e", 5),
            days_ago("b", 2),
            days_ago("d", 4),
        ];
        let plan = classify(records, &RetentionPolicy::SimpleCount { retain_last: 2 }, now());
        assert_eq!(ids(&plan.keep), vec!["a", "b"]);
        assert_eq!(ids(&plan.delete), vec!["c", "d", "e"]);
    }

    #[test]
    fn test_simple_count_zero_deletes_everything() {
        let records = vec![days_ago("a", 1), days_ago("b", 2)];
        let plan = classify(records, &RetentionPolicy::SimpleCount { retain_last: 0 }, now());
        assert!(plan.keep.is_empty());
        assert_eq!(ids(&plan.delete), vec!["a", "b"]);
    }

    #[test]
    fn test_simple_count_larger_than_inventory() {
        let records = vec![days_ago("a", 1), days_ago("b", 2)];
        let plan = classify(records, &RetentionPolicy::SimpleCount { retain_last: 10 }, now());
        assert_eq!(plan.keep.len(), 2);
        assert!(plan.delete.is_empty());
    }

    #[test]
    fn test_empty_inventory() {
        let plan = classify(Vec::new(), &RetentionPolicy::SimpleCount { retain_last: 0 }, now());
        assert!(plan.is_empty());

        let tiered = RetentionPolicy::Tiered {
            keep_daily_days: 3,
            keep_weekly_weeks: 2,
            keep_monthly_months: 6,
        };
        assert!(classify(Vec::new(), &tiered, now()).is_empty());
    }

    #[test]
    fn test_ties_broken_by_id() {
        let at = now() - TimeDelta::days(1);
        let records = vec![record("snap-1", at), record("snap-3", at), record("snap-2", at)];
        let plan = classify(records, &RetentionPolicy::SimpleCount { retain_last: 1 }, now());
        assert_eq!(ids(&plan.keep), vec!["snap-3"]);
        assert_eq!(ids(&plan.delete), vec!["snap-2", "snap-1"]);
    }

    #[test]
    fn test_tiered_union_of_windows() {
        let records = vec![
            days_ago("t1", 1),
            days_ago("t2", 2),
            days_ago("t10", 10),
            days_ago("t40", 40),
            days_ago("t400", 400),
        ];
        let policy = RetentionPolicy::Tiered {
            keep_daily_days: 3,
            keep_weekly_weeks: 2,
            keep_monthly_months: 1,
        };
        let plan = classify(records, &policy, now());
        assert_eq!(ids(&plan.keep), vec!["t1", "t2", "t10"]);
        assert_eq!(ids(&plan.delete), vec!["t40", "t400"]);
    }

    #[test]
    fn test_tiered_monthly_window_reaches_further_back() {
        let records = vec![days_ago("t10", 10), days_ago("t40", 40), days_ago("t400", 400)];
        let policy = RetentionPolicy::Tiered {
            keep_daily_days: 3,
            keep_weekly_weeks: 2,
            keep_monthly_months: 6,
        };
        let plan = classify(records, &policy, now());
        assert_eq!(ids(&plan.keep), vec!["t10", "t40"]);
        assert_eq!(ids(&plan.delete), vec!["t400"]);
    }

    #[test]
    fn test_disabled_tiers_never_match() {
        let records = vec![days_ago("fresh", 0), days_ago("old", 30)];
        let policy = RetentionPolicy::Tiered {
            keep_daily_days: 0,
            keep_weekly_weeks: -1,
            keep_monthly_months: 0,
        };
        let plan = classify(records, &policy, now());
        assert!(plan.keep.is_empty());
        assert_eq!(plan.delete.len(), 2);
    }

    #[test]
    fn test_daily_window_is_inclusive() {
        let created = now() - TimeDelta::days(3);
        assert!(within_days(created, now(), 3));
        assert!(!within_days(created - TimeDelta::seconds(1), now(), 3));
    }

    #[test]
    fn test_monthly_window_uses_calendar_months() {
        let created = Utc.with_ymd_and_hms(2024, 1, 31, 10, 0, 0).unwrap();
        let end_of_feb = Utc.with_ymd_and_hms(2024, 2, 29, 10, 0, 0).unwrap();
        let first_of_march = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        assert!(within_months(created, end_of_feb, 1));
        assert!(!within_months(created, end_of_feb + TimeDelta::seconds(1), 1));
        // A fixed 30-day window would still keep it here.
        assert!(!within_months(created, first_of_march, 1));
    }

    #[test]
    fn test_future_snapshot_kept_by_enabled_tier() {
        let records = vec![record("skewed", now() + TimeDelta::minutes(5))];
        let policy = RetentionPolicy::Tiered {
            keep_daily_days: 1,
            keep_weekly_weeks: 0,
            keep_monthly_months: 0,
        };
        assert_eq!(classify(records, &policy, now()).keep.len(), 1);
    }

    #[test]
    fn test_policy_display() {
        assert_eq!(
            RetentionPolicy::SimpleCount { retain_last: 2 }.to_string(),
            "simple-count(retain_last=2)"
        );
    }

    fn inventory_strategy() -> impl Strategy<Value = Vec<SnapshotRecord>> {
        prop::collection::vec(0i64..2_000, 0..40).prop_map(|offsets| {
            offsets
                .into_iter()
                .enumerate()
                .map(|(i, half_days)| {
                    record(&format!("{:04}", i), now() - TimeDelta::hours(half_days * 12))
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn simple_count_keeps_exactly_the_newest(records in inventory_strategy(), k in 0usize..50) {
            let mut expected = records.clone();
            sort_newest_first(&mut expected);
            let total = records.len();

            let plan = classify(records, &RetentionPolicy::SimpleCount { retain_last: k }, now());

            prop_assert_eq!(plan.keep.len(), k.min(total));
            prop_assert_eq!(plan.keep.len() + plan.delete.len(), total);
            prop_assert_eq!(&plan.keep[..], &expected[..k.min(total)]);
        }

        #[test]
        fn tiered_keep_is_union_of_windows(
            records in inventory_strategy(),
            daily in -2i64..30,
            weekly in -2i64..10,
            monthly in -2i64..24,
        ) {
            let total = records.len();
            let policy = RetentionPolicy::Tiered {
                keep_daily_days: daily,
                keep_weekly_weeks: weekly,
                keep_monthly_months: monthly,
            };
            let plan = classify(records, &policy, now());

            let kept: HashSet<&str> = plan.keep.iter().map(|r| r.id.as_str()).collect();
            let deleted: HashSet<&str> = plan.delete.iter().map(|r| r.id.as_str()).collect();
            prop_assert!(kept.is_disjoint(&deleted));
            prop_assert_eq!(kept.len() + deleted.len(), total);

            for record in plan.keep.iter().chain(plan.delete.iter()) {
                let in_window = within_days(record.created_at, now(), daily)
                    || within_weeks(record.created_at, now(), weekly)
                    || within_months(record.created_at, now(), monthly);
                prop_assert_eq!(kept.contains(record.id.as_str()), in_window);
            }
        }
    }
}
