//! Retention bucketing and pruning.
//!
//! Classification uses the UTC calendar date of the creation timestamp:
//! `monthly` on the first of the month, `weekly` on Sundays, `daily`
//! otherwise. Full backups additionally compete in the `full` bucket and
//! survive if either membership keeps them.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Datelike, Utc, Weekday};
use log::info;

use crate::common::{ArtifactInfo, BackupKind, RetentionBucket};
use crate::store::ArtifactStore;
use crate::Result;

#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub daily: usize,
    pub weekly: usize,
    pub monthly: usize,
    pub full: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            daily: 7,
            weekly: 4,
            monthly: 12,
            full: 3,
        }
    }
}

impl RetentionPolicy {
    pub fn limit(&self, bucket: RetentionBucket) -> usize {
        match bucket {
            RetentionBucket::Daily => self.daily,
            RetentionBucket::Weekly => self.weekly,
            RetentionBucket::Monthly => self.monthly,
            RetentionBucket::Full => self.full,
        }
    }
}

/// Date bucket for an artifact created at the given instant.
pub fn classify(created_at: DateTime<Utc>) -> RetentionBucket {
    let date = created_at.date_naive();
    if date.day() == 1 {
        RetentionBucket::Monthly
    } else if date.weekday() == Weekday::Sun {
        RetentionBucket::Weekly
    } else {
        RetentionBucket::Daily
    }
}

/// What a pruning pass would remove, and why.
#[derive(Debug, Default)]
pub struct RetentionPlan {
    pub delete: Vec<String>,
    pub deleted_per_bucket: BTreeMap<RetentionBucket, usize>,
    pub kept: usize,
    pub skipped_legacy: usize,
}

impl RetentionPlan {
    pub fn is_empty(&self) -> bool {
        self.delete.is_empty()
    }
}

pub struct RetentionEngine {
    policy: RetentionPolicy,
}

impl RetentionEngine {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Computes the deletion plan without side effects. Only artifacts with a
    /// sidecar participate; legacy payloads are never pruned.
    pub fn plan(&self, artifacts: &[ArtifactInfo]) -> RetentionPlan {
        let mut plan = RetentionPlan::default();

        let mut entries: Vec<(&ArtifactInfo, RetentionBucket, BackupKind, DateTime<Utc>)> =
            Vec::new();
        for artifact in artifacts {
            match &artifact.sidecar {
                Some(sc) => entries.push((artifact, sc.retention_bucket, sc.kind, sc.created_at)),
                None => plan.skipped_legacy += 1,
            }
        }

        // Survivors per date bucket, newest first up to the bucket limit.
        let mut by_bucket: BTreeMap<RetentionBucket, Vec<(&str, DateTime<Utc>)>> = BTreeMap::new();
        for (artifact, bucket, _, created) in &entries {
            by_bucket
                .entry(*bucket)
                .or_default()
                .push((artifact.name.as_str(), *created));
        }
        let mut survivors: HashSet<&str> = HashSet::new();
        for (bucket, mut members) in by_bucket {
            members.sort_by(|a, b| b.1.cmp(&a.1));
            for (name, _) in members.into_iter().take(self.policy.limit(bucket)) {
                survivors.insert(name);
            }
        }

        // Survivors of the parallel full bucket.
        let mut fulls: Vec<(&str, DateTime<Utc>)> = entries
            .iter()
            .filter(|(_, _, kind, _)| *kind == BackupKind::Full)
            .map(|(artifact, _, _, created)| (artifact.name.as_str(), *created))
            .collect();
        fulls.sort_by(|a, b| b.1.cmp(&a.1));
        let full_survivors: HashSet<&str> = fulls
            .into_iter()
            .take(self.policy.limit(RetentionBucket::Full))
            .map(|(name, _)| name)
            .collect();

        for (artifact, bucket, kind, _) in &entries {
            let name = artifact.name.as_str();
            let keep = survivors.contains(name)
                || (*kind == BackupKind::Full && full_survivors.contains(name));
            if keep {
                plan.kept += 1;
            } else {
                plan.delete.push(name.to_string());
                *plan.deleted_per_bucket.entry(*bucket).or_default() += 1;
            }
        }
        plan
    }

    /// Applies (or simulates) the plan against the store.
    pub fn apply(
        &self,
        store: &ArtifactStore,
        artifacts: &[ArtifactInfo],
        dry_run: bool,
    ) -> Result<RetentionPlan> {
        let plan = self.plan(artifacts);
        if dry_run {
            return Ok(plan);
        }
        for name in &plan.delete {
            store.delete(name)?;
        }
        if !plan.delete.is_empty() {
            info!("retention pruned {} backups", plan.delete.len());
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn classifies_by_utc_date() {
        // 2025-06-01 is a Sunday and the first of the month: monthly wins.
        let first = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        assert_eq!(classify(first), RetentionBucket::Monthly);

        // 2025-06-08 is a Sunday.
        let sunday = Utc.with_ymd_and_hms(2025, 6, 8, 10, 0, 0).unwrap();
        assert_eq!(classify(sunday), RetentionBucket::Weekly);

        // 2025-06-10 is a Tuesday.
        let tuesday = Utc.with_ymd_and_hms(2025, 6, 10, 10, 0, 0).unwrap();
        assert_eq!(classify(tuesday), RetentionBucket::Daily);
    }

    #[test]
    fn classification_uses_utc_not_local_shift() {
        // 23:30 UTC on the last day of May stays daily even where local
        // calendars already read June 1st.
        let late = Utc.with_ymd_and_hms(2025, 5, 31, 23, 30, 0).unwrap();
        assert_eq!(classify(late), RetentionBucket::Daily);
    }
}
