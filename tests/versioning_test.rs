//! Version ledger flows: assignment, tags, branches, rollback, cleanup.

use chrono::{DateTime, Duration, TimeZone, Utc};
use pgkeeper::store::ArtifactStore;
use pgkeeper::versioning::{BackupVersion, IncrementLevel, VersionManager};

fn setup() -> (tempfile::TempDir, ArtifactStore, VersionManager) {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::open(dir.path()).unwrap();
    let versions = VersionManager::open(&store);
    (dir, store, versions)
}

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 12, minute, 0).unwrap()
}

fn record_next(
    versions: &VersionManager,
    artifact: &str,
    branch: &str,
    level: IncrementLevel,
    now: DateTime<Utc>,
) -> BackupVersion {
    let version = versions.next_version(branch, level, now);
    let parent = versions.latest_on_branch(branch).map(|e| e.version);
    versions
        .record_version(artifact, &version, &[], None, parent, now)
        .unwrap();
    version
}

#[test]
fn fresh_branch_starts_at_one_zero_zero() {
    let (_dir, _store, versions) = setup();
    let version = versions.next_version("main", IncrementLevel::Patch, at(0));
    assert_eq!(
        version.to_string(),
        "1.0.0-main.20250310_120000".to_string()
    );
}

#[test]
fn versions_on_a_branch_are_strictly_increasing() {
    let (_dir, _store, versions) = setup();

    let mut assigned = Vec::new();
    assigned.push(record_next(&versions, "b0", "main", IncrementLevel::Patch, at(0)));
    assigned.push(record_next(&versions, "b1", "main", IncrementLevel::Patch, at(1)));
    assigned.push(record_next(&versions, "b2", "main", IncrementLevel::Minor, at(2)));
    assigned.push(record_next(&versions, "b3", "main", IncrementLevel::Major, at(3)));

    for pair in assigned.windows(2) {
        assert!(
            pair[1].is_newer_than(&pair[0]),
            "{} should be newer than {}",
            pair[1],
            pair[0]
        );
    }
    assert_eq!(assigned[1].to_string(), "1.0.1-main.20250310_120100");
    assert_eq!(assigned[2].to_string(), "1.1.0-main.20250310_120200");
    assert_eq!(assigned[3].to_string(), "2.0.0-main.20250310_120300");
}

#[test]
fn parent_links_follow_branch_history() {
    let (_dir, _store, versions) = setup();

    let first = record_next(&versions, "b0", "main", IncrementLevel::Patch, at(0));
    record_next(&versions, "b1", "main", IncrementLevel::Patch, at(1));

    let entries = versions.list(Some("main"), None, None);
    assert_eq!(entries.len(), 2);
    // Newest first.
    assert_eq!(entries[0].artifact, "b1");
    assert_eq!(entries[0].parent.as_deref(), Some(first.to_string().as_str()));
    assert!(entries[1].parent.is_none());
}

#[test]
fn branches_are_independent() {
    let (_dir, _store, versions) = setup();

    record_next(&versions, "m0", "main", IncrementLevel::Patch, at(0));
    let dev = record_next(&versions, "d0", "develop", IncrementLevel::Patch, at(1));
    assert_eq!(dev.to_string(), "1.0.0-develop.20250310_120100");

    let branches = versions.load_branches();
    assert_eq!(branches.len(), 2);
    assert_eq!(branches["main"].backup_count, 1);
    assert_eq!(branches["develop"].backup_count, 1);
}

#[test]
fn list_filters_by_branch_tag_and_limit() {
    let (_dir, _store, versions) = setup();

    let tagged = record_next(&versions, "m0", "main", IncrementLevel::Patch, at(0));
    record_next(&versions, "m1", "main", IncrementLevel::Patch, at(1));
    record_next(&versions, "d0", "develop", IncrementLevel::Patch, at(2));
    versions
        .create_tag(&tagged.to_string(), "stable", None)
        .unwrap();

    assert_eq!(versions.list(Some("main"), None, None).len(), 2);
    assert_eq!(versions.list(Some("develop"), None, None).len(), 1);
    assert_eq!(versions.list(None, Some("stable"), None).len(), 1);
    assert_eq!(versions.list(None, None, Some(2)).len(), 2);
}

#[test]
fn tag_index_stays_sorted_and_deduplicated() {
    let (_dir, _store, versions) = setup();

    let v0 = record_next(&versions, "m0", "main", IncrementLevel::Patch, at(0));
    let v1 = record_next(&versions, "m1", "main", IncrementLevel::Patch, at(1));

    versions.create_tag(&v1.to_string(), "stable", None).unwrap();
    versions.create_tag(&v0.to_string(), "stable", None).unwrap();
    versions.create_tag(&v0.to_string(), "stable", None).unwrap();

    let tags = versions.load_tags();
    let stable = &tags["stable"];
    assert_eq!(stable.len(), 2);
    let mut sorted = stable.clone();
    sorted.sort();
    assert_eq!(*stable, sorted);
}

#[test]
fn tagging_unknown_version_fails() {
    let (_dir, _store, versions) = setup();
    assert!(versions
        .create_tag("9.9.9-main.20250101_000000", "ghost", None)
        .is_err());
}

#[test]
fn rollback_ledger_appends() {
    let (_dir, _store, versions) = setup();

    versions
        .record_rollback("1.0.0-main.20250310_120000", "pre_rollback_a", at(5))
        .unwrap();
    versions
        .record_rollback("1.0.1-main.20250310_120100", "pre_rollback_b", at(6))
        .unwrap();

    let history = versions.rollback_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].safety_backup, "pre_rollback_a");
    assert_eq!(history[1].target_version, "1.0.1-main.20250310_120100");
}

#[test]
fn cleanup_keeps_branch_head_and_tagged_versions() {
    let (_dir, _store, versions) = setup();

    let oldest = record_next(&versions, "m0", "main", IncrementLevel::Patch, at(0));
    record_next(&versions, "m1", "main", IncrementLevel::Patch, at(1));
    record_next(&versions, "m2", "main", IncrementLevel::Patch, at(2));
    record_next(&versions, "m3", "main", IncrementLevel::Patch, at(3));
    versions
        .create_tag(&oldest.to_string(), "keepme", None)
        .unwrap();

    let doomed = versions.cleanup(1, false).unwrap();
    let doomed_artifacts: Vec<&str> = doomed.iter().map(|e| e.artifact.as_str()).collect();
    assert_eq!(doomed_artifacts, vec!["m2", "m1"]);

    let remaining = versions.list(Some("main"), None, None);
    let names: Vec<&str> = remaining.iter().map(|e| e.artifact.as_str()).collect();
    assert_eq!(names, vec!["m3", "m0"]);
}

#[test]
fn cleanup_dry_run_changes_nothing() {
    let (_dir, _store, versions) = setup();

    record_next(&versions, "m0", "main", IncrementLevel::Patch, at(0));
    record_next(&versions, "m1", "main", IncrementLevel::Patch, at(1));
    record_next(&versions, "m2", "main", IncrementLevel::Patch, at(2));

    let doomed = versions.cleanup(1, true).unwrap();
    assert_eq!(doomed.len(), 2);
    assert_eq!(versions.list(None, None, None).len(), 3);
}
