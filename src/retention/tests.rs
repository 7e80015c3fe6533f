use super::*;
use crate::cancel::CancelToken;
use std::fs;
use tempfile::tempdir;

fn ops() -> FileOps {
    FileOps::new(CancelToken::new())
}

fn hourly(capacity: usize) -> RetentionTier {
    RetentionTier {
        name: "hourly".to_string(),
        schedule: Some(Schedule::parse("0 * * * *").unwrap()),
        capacity,
    }
}

fn archive(latest: &Path, name: &str) -> PathBuf {
    let dir = latest.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("dump.rdb"), name.as_bytes()).unwrap();
    fs::write(dir.join("nodes.conf"), b"nodes").unwrap();
    dir
}

fn names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

#[test]
fn keep_last_n_removes_oldest() {
    let dir = tempdir().unwrap();
    let latest = dir.path().join("last");
    for hour in 0..7 {
        archive(&latest, &format!("2024-01-01T0{hour}-00-00"));
    }
    let outcome = prune_to_capacity(&ops(), &latest, 3).unwrap();
    assert_eq!(outcome.removed, 4);
    assert_eq!(outcome.kept, 3);
    assert_eq!(
        names(&latest),
        vec![
            "2024-01-01T04-00-00",
            "2024-01-01T05-00-00",
            "2024-01-01T06-00-00"
        ]
    );
}

#[test]
fn keep_last_n_is_noop_within_capacity() {
    let dir = tempdir().unwrap();
    let latest = dir.path().join("last");
    archive(&latest, "2024-01-01T00-00-00");
    archive(&latest, "2024-01-01T01-00-00");
    let outcome = prune_to_capacity(&ops(), &latest, 2).unwrap();
    assert_eq!(outcome.removed, 0);
    assert_eq!(names(&latest).len(), 2);
}

#[test]
fn pruning_ignores_foreign_and_staging_entries() {
    let dir = tempdir().unwrap();
    let latest = dir.path().join("last");
    archive(&latest, "2024-01-01T00-00-00");
    archive(&latest, "2024-01-01T01-00-00");
    archive(&latest, ".tmp-2023-01-01T00-00-00");
    fs::write(latest.join("README"), b"keep me").unwrap();

    prune_to_capacity(&ops(), &latest, 1).unwrap();
    assert_eq!(
        names(&latest),
        vec![".tmp-2023-01-01T00-00-00", "2024-01-01T01-00-00", "README"]
    );
}

#[test]
fn zero_capacity_keeps_nothing() {
    let dir = tempdir().unwrap();
    let latest = dir.path().join("last");
    archive(&latest, "2024-01-01T00-00-00");
    prune_to_capacity(&ops(), &latest, 0).unwrap();
    assert!(names(&latest).is_empty());
}

#[test]
fn missing_tier_folder_prunes_nothing() {
    let dir = tempdir().unwrap();
    let outcome = prune_to_capacity(&ops(), &dir.path().join("absent"), 3).unwrap();
    assert_eq!(outcome, PruneOutcome::default());
}

#[test]
fn first_snapshot_after_boundary_is_promoted() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let latest = root.join("last");
    let finalized = archive(&latest, "2024-01-01T00-00-00");
    let engine = RetentionEngine::new(ops(), tiers_for_test(vec![hourly(24)], 5));

    let report = engine.apply(root, &finalized).unwrap();
    assert_eq!(report.promoted, vec!["hourly".to_string()]);
    let promoted = root.join("hourly").join("2024-01-01T00-00-00");
    assert_eq!(
        fs::read(promoted.join("dump.rdb")).unwrap(),
        b"2024-01-01T00-00-00"
    );
    assert!(promoted.join("nodes.conf").is_file());
}

#[test]
fn promotion_is_idempotent_within_a_boundary() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let latest = root.join("last");
    let engine = RetentionEngine::new(ops(), tiers_for_test(vec![hourly(24)], 5));

    let first = archive(&latest, "2024-01-01T00-00-00");
    engine.apply(root, &first).unwrap();
    engine.apply(root, &first).unwrap();
    let second = archive(&latest, "2024-01-01T00-10-00");
    let report = engine.apply(root, &second).unwrap();
    assert!(report.promoted.is_empty());
    assert_eq!(names(&root.join("hourly")), vec!["2024-01-01T00-00-00"]);

    let next_hour = archive(&latest, "2024-01-01T01-00-05");
    let report = engine.apply(root, &next_hour).unwrap();
    assert_eq!(report.promoted, vec!["hourly".to_string()]);
    assert_eq!(
        names(&root.join("hourly")),
        vec!["2024-01-01T00-00-00", "2024-01-01T01-00-05"]
    );
}

#[test]
fn closer_unpromoted_snapshot_blocks_promotion() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let latest = root.join("last");
    archive(&latest, "2024-01-01T00-05-00");
    let later = archive(&latest, "2024-01-01T00-20-00");
    let engine = RetentionEngine::new(ops(), tiers_for_test(vec![hourly(24)], 5));

    let report = engine.apply(root, &later).unwrap();
    assert!(report.promoted.is_empty());
    assert!(names(&root.join("hourly")).is_empty());
}

#[test]
fn tiers_prune_to_their_own_capacity() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let latest = root.join("last");
    let engine = RetentionEngine::new(ops(), tiers_for_test(vec![hourly(2)], 3));

    for hour in 0..5 {
        let finalized = archive(&latest, &format!("2024-01-01T0{hour}-00-00"));
        engine.apply(root, &finalized).unwrap();
    }
    assert_eq!(
        names(&root.join("hourly")),
        vec!["2024-01-01T03-00-00", "2024-01-01T04-00-00"]
    );
    assert_eq!(
        names(&latest),
        vec![
            "2024-01-01T02-00-00",
            "2024-01-01T03-00-00",
            "2024-01-01T04-00-00"
        ]
    );
}

#[test]
fn disabled_tier_is_never_promoted() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let latest = root.join("last");
    let finalized = archive(&latest, "2024-01-01T00-00-00");
    let engine = RetentionEngine::new(ops(), tiers_for_test(vec![hourly(0)], 5));

    let report = engine.apply(root, &finalized).unwrap();
    assert!(report.promoted.is_empty());
    assert!(!root.join("hourly").exists());
}

#[test]
fn failing_tier_does_not_block_others() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let latest = root.join("last");
    let finalized = archive(&latest, "2024-01-01T00-00-00");
    fs::write(root.join("broken"), b"not a directory").unwrap();
    let broken = RetentionTier {
        name: "broken".to_string(),
        ..hourly(24)
    };
    let engine = RetentionEngine::new(ops(), tiers_for_test(vec![broken, hourly(24)], 5));

    let err = engine.apply(root, &finalized).unwrap_err();
    assert!(matches!(err, RetentionError::Incomplete { failed: 1, total: 3 }));
    assert!(root.join("hourly").join("2024-01-01T00-00-00").is_dir());
}

#[test]
fn apply_rejects_non_snapshot_paths() {
    let dir = tempdir().unwrap();
    let engine = RetentionEngine::new(ops(), Vec::new());
    let err = engine
        .apply(dir.path(), &dir.path().join("last").join("junk"))
        .unwrap_err();
    assert!(matches!(err, RetentionError::NotASnapshot { .. }));
}

#[test]
fn update_config_swaps_tiers() {
    let engine = RetentionEngine::new(ops(), tiers_for_test(Vec::new(), 5));
    assert_eq!(engine.tiers().len(), 1);
    engine.update_config(tiers_for_test(vec![hourly(24)], 2));
    let tiers = engine.tiers();
    assert_eq!(tiers.len(), 2);
    assert_eq!(tiers[1], RetentionTier::capacity_only("last", 2));
}

#[test]
fn tiers_for_rejects_bad_cron() {
    let rules = vec![RetentionRule {
        name: "weird".to_string(),
        cron: "61 * * * *".to_string(),
        count: 1,
    }];
    let err = tiers_for(&rules, "last", 5).unwrap_err();
    assert!(matches!(err, RetentionError::Schedule { ref tier, .. } if tier == "weird"));
}

fn tiers_for_test(mut tiers: Vec<RetentionTier>, last_count: usize) -> Vec<RetentionTier> {
    tiers.push(RetentionTier::capacity_only("last", last_count));
    tiers
}
