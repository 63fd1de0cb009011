use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use cryptkeeper_analyze::{
    AnalyzeError, Classification, ClassificationSummary, Classifier, ClassifyConfig,
    DuplicateConfig, DuplicateDetector, FileRecord, NoExclusions,
};
use filetime::FileTime;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const DAY: u64 = 24 * 60 * 60;

fn write_aged(path: &Path, content: &[u8], days_ago: u64) -> FileRecord {
    fs::write(path, content).unwrap();
    let modified = SystemTime::now() - Duration::from_secs(days_ago * DAY);
    filetime::set_file_mtime(path, FileTime::from_system_time(modified)).unwrap();
    let metadata = fs::metadata(path).unwrap();
    FileRecord::new(path, metadata.len(), metadata.modified().unwrap())
}

fn record(path: &Path) -> FileRecord {
    let metadata = fs::metadata(path).unwrap();
    FileRecord::new(path, metadata.len(), metadata.modified().unwrap())
}

#[test]
fn test_duplicate_config_builder() {
    let config = DuplicateConfig::builder()
        .min_size(2048u64)
        .max_size(10 * 1024 * 1024u64)
        .quick_compare(false)
        .partial_hash_head(8192usize)
        .partial_hash_tail(8192usize)
        .build()
        .unwrap();

    assert_eq!(config.min_size, 2048);
    assert_eq!(config.max_size, 10 * 1024 * 1024);
    assert!(!config.quick_compare);
    assert_eq!(config.partial_hash_head, 8192);

    let default_config = DuplicateConfig::default();
    assert_eq!(default_config.min_size, 1);
    assert!(default_config.quick_compare);
}

#[test]
fn test_no_records() {
    assert!(DuplicateDetector::new().detect(&[]).is_empty());
}

#[test]
fn test_no_actual_duplicates() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::write(root.join("file1.txt"), "content one").unwrap();
    fs::write(root.join("file2.txt"), "content two").unwrap();
    fs::write(root.join("file3.txt"), "content three").unwrap();

    let records: Vec<_> = ["file1.txt", "file2.txt", "file3.txt"]
        .iter()
        .map(|n| record(&root.join(n)))
        .collect();

    assert!(DuplicateDetector::new().detect(&records).is_empty());
}

#[test]
fn test_exact_duplicates() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let content = "This is duplicate content";
    let a = write_aged(&root.join("a.txt"), content.as_bytes(), 3);
    let b = write_aged(&root.join("b.txt"), content.as_bytes(), 2);
    let c = write_aged(&root.join("c.txt"), content.as_bytes(), 1);

    let groups = DuplicateDetector::new().detect(&[c, a, b]);

    assert_eq!(groups.len(), 1);
    let group = &groups[0];
    assert_eq!(group.count(), 3);
    assert!(group.original().path.ends_with("a.txt"));
    assert_eq!(group.duplicates().len(), 2);
    assert_eq!(group.wasted_bytes, content.len() as u64 * 2);
}

#[test]
fn test_mixed_content_with_full_compare_only() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::write(root.join("file1.txt"), "duplicate").unwrap();
    fs::write(root.join("file2.txt"), "unique on").unwrap();
    fs::write(root.join("file3.txt"), "duplicate").unwrap();
    fs::write(root.join("file4.txt"), "unique two").unwrap();

    let records: Vec<_> = ["file1.txt", "file2.txt", "file3.txt", "file4.txt"]
        .iter()
        .map(|n| record(&root.join(n)))
        .collect();

    let detector = DuplicateDetector::with_config(
        DuplicateConfig::builder().quick_compare(false).build().unwrap(),
    );
    let groups = detector.detect(&records);

    assert_eq!(groups.len(), 1);
    let mut names: Vec<PathBuf> = groups[0].members.iter().map(|r| r.path.clone()).collect();
    names.sort();
    assert_eq!(names, vec![root.join("file1.txt"), root.join("file3.txt")]);
}

#[test]
fn test_empty_files_are_never_duplicates() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("e1"), "").unwrap();
    fs::write(temp.path().join("e2"), "").unwrap();

    let records = vec![record(&temp.path().join("e1")), record(&temp.path().join("e2"))];
    assert!(DuplicateDetector::new().detect(&records).is_empty());
}

#[test]
fn test_unreadable_member_is_dropped() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("real1"), "xyz").unwrap();
    fs::write(temp.path().join("real2"), "xyz").unwrap();

    let mut records = vec![record(&temp.path().join("real1")), record(&temp.path().join("real2"))];
    records.push(FileRecord::new(temp.path().join("gone"), 3, SystemTime::now()));

    let groups = DuplicateDetector::new().detect(&records);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].count(), 2);
}

#[test]
fn test_unique_size_never_zombie() {
    // The path does not exist: a unique size must be decided without I/O.
    let now = SystemTime::now();
    let records = vec![FileRecord::new("/nowhere/unique", 12345, now)];

    let groups = DuplicateDetector::new().detect(&records);
    assert!(groups.is_empty());

    let classified = Classifier::new().classify(&records, &NoExclusions, &groups);
    assert!(!classified[0].classifications.contains(Classification::Zombie));
}

#[test]
fn test_detect_with_cancel() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a"), "same").unwrap();
    fs::write(temp.path().join("b"), "same").unwrap();
    let records = vec![record(&temp.path().join("a")), record(&temp.path().join("b"))];

    let detector = DuplicateDetector::new();
    let live = CancellationToken::new();
    assert_eq!(detector.detect_with_cancel(&records, &live).unwrap().len(), 1);

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    assert!(matches!(
        detector.detect_with_cancel(&records, &cancelled),
        Err(AnalyzeError::Cancelled)
    ));
}

#[test]
fn test_dup_dup_big_scenario() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    let older = write_aged(&root.join("photo.jpg"), b"same bytes", 400);
    let newer = write_aged(&root.join("photo copy.jpg"), b"same bytes", 300);
    let big = write_aged(&root.join("disk.img"), &vec![0u8; 4096], 1);
    let records = vec![older, newer, big];

    let groups = DuplicateDetector::new().detect(&records);
    let classifier = Classifier::with_config(
        ClassifyConfig::builder()
            .demon_threshold(4096u64)
            .build()
            .unwrap(),
    );
    let classified = classifier.classify(&records, &NoExclusions, &groups);

    let tags = |i: usize| classified[i].classifications;
    assert_eq!(tags(0), [Classification::Ghost].into_iter().collect());
    assert_eq!(tags(1), [Classification::Zombie].into_iter().collect());
    assert_eq!(tags(2), [Classification::Demon].into_iter().collect());

    let summary = ClassificationSummary::from_classified(&classified);
    assert_eq!(summary.tagged, 3);
    assert_eq!(summary.reclaimable_bytes, 10 + 10 + 4096);
}

#[test]
fn test_whitelisted_paths_stay_untagged() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let a = write_aged(&root.join("a"), b"dup", 500);
    let b = write_aged(&root.join("b"), b"dup", 400);
    let records = vec![a, b];

    let groups = DuplicateDetector::new().detect(&records);
    let whitelist: std::collections::HashSet<PathBuf> =
        records.iter().map(|r| r.path.clone()).collect();

    let classified = Classifier::new().classify(&records, &whitelist, &groups);
    assert!(classified.iter().all(|f| !f.is_tagged()));
}
