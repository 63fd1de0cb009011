//! Integration tests for cryptkeeper-scan.

use std::fs;
use std::sync::Arc;

use cryptkeeper_scan::{JwalkScanner, PathGuard, ScanConfig, ScanCoordinator, ScanPhase};
use tempfile::TempDir;

fn populate(root: &std::path::Path, dirs: usize, files_per_dir: usize) {
    for d in 0..dirs {
        let dir = root.join(format!("d{d:03}"));
        fs::create_dir(&dir).unwrap();
        for f in 0..files_per_dir {
            fs::write(dir.join(format!("f{f:03}.bin")), [d as u8, f as u8]).unwrap();
        }
    }
}

fn scanner() -> JwalkScanner {
    JwalkScanner::with_guard(Arc::new(PathGuard::permissive()))
}

#[test]
fn test_large_tree_stops_at_cap() {
    let temp = TempDir::new().unwrap();
    populate(temp.path(), 15, 100);

    let outcome = scanner()
        .scan(&ScanConfig::new(temp.path()).with_cap(1000))
        .unwrap();

    assert_eq!(outcome.records.len(), 1000);
    assert!(outcome.limit_reached);
    assert!(!outcome.cancelled);
    assert_eq!(outcome.stats.total_files, 1000);
}

#[test]
fn test_records_are_unique_and_regular() {
    let temp = TempDir::new().unwrap();
    populate(temp.path(), 3, 10);

    let outcome = scanner().scan(&ScanConfig::new(temp.path())).unwrap();

    let mut paths: Vec<_> = outcome.records.iter().map(|r| r.path.clone()).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 30);
    assert!(paths.iter().all(|p| p.is_file()));
    assert_eq!(outcome.stats.total_dirs, 4);
}

#[test]
fn test_max_depth_limits_descent() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("top.txt"), "top").unwrap();
    populate(temp.path(), 2, 3);

    let config = ScanConfig::builder()
        .root(temp.path())
        .max_depth(Some(1))
        .build()
        .unwrap();
    let outcome = scanner().scan(&config).unwrap();

    assert_eq!(outcome.records.len(), 1);
}

#[test]
fn test_hidden_files_can_be_skipped() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join(".hidden"), "h").unwrap();
    fs::write(temp.path().join("shown"), "s").unwrap();

    let config = ScanConfig::builder()
        .root(temp.path())
        .include_hidden(false)
        .build()
        .unwrap();
    let outcome = scanner().scan(&config).unwrap();

    assert_eq!(outcome.records.len(), 1);
    assert!(outcome.records[0].path.ends_with("shown"));
}

#[test]
fn test_progress_is_monotonic() {
    let temp = TempDir::new().unwrap();
    populate(temp.path(), 4, 200);

    let scanner = scanner();
    let mut rx = scanner.subscribe();
    let outcome = scanner.scan(&ScanConfig::new(temp.path())).unwrap();
    assert_eq!(outcome.records.len(), 800);

    let mut last = 0;
    let mut final_phase = None;
    while let Ok(progress) = rx.try_recv() {
        assert!(progress.files_scanned >= last);
        last = progress.files_scanned;
        final_phase = Some(progress.phase);
    }
    assert_eq!(last, 800);
    assert_eq!(final_phase, Some(ScanPhase::Complete));
}

#[tokio::test]
async fn test_cancelled_background_scan_keeps_partial_results() {
    let temp = TempDir::new().unwrap();
    populate(temp.path(), 5, 20);

    let coordinator = ScanCoordinator::new(Arc::new(PathGuard::permissive()));
    let handle = coordinator.start(ScanConfig::new(temp.path())).unwrap();
    handle.cancel();
    let outcome = handle.join().await.unwrap();

    // The walk may finish before the cancel lands; either way nothing is lost.
    if outcome.cancelled {
        assert!(outcome.records.len() <= 100);
    } else {
        assert_eq!(outcome.records.len(), 100);
    }
    assert!(!coordinator.is_scanning(temp.path()));
}
