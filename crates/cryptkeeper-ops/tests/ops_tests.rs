//! Integration tests for graveyard custody.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cryptkeeper_core::{Classification, ClassificationSet, PathGuard};
use cryptkeeper_ops::{
    BanishRequest, CustodyError, FailureKind, GraveyardLog, LogAction, LogFilter, Orphan,
    QuarantineStore, UndoCoordinator, UndoError, WhitelistStore, reconcile,
};
use proptest::prelude::*;
use tempfile::TempDir;

struct Fixture {
    _temp: TempDir,
    files: PathBuf,
    data: PathBuf,
    coordinator: UndoCoordinator,
}

impl Fixture {
    fn new() -> Self {
        Self::with_window(Duration::from_secs(600))
    }

    fn with_window(window: Duration) -> Self {
        let temp = TempDir::new().unwrap();
        let files = temp.path().join("files");
        fs::create_dir(&files).unwrap();
        let files = files.canonicalize().unwrap();
        let data = temp.path().join("data");

        let log = Arc::new(GraveyardLog::open(data.join("graveyard.jsonl")).unwrap());
        let store = QuarantineStore::open(
            data.join("graveyard"),
            Arc::new(PathGuard::permissive()),
            log,
        )
        .unwrap();

        Self {
            _temp: temp,
            files,
            data,
            coordinator: UndoCoordinator::with_window(Arc::new(store), window),
        }
    }

    fn file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.files.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn store(&self) -> &QuarantineStore {
        self.coordinator.store()
    }

    fn log(&self) -> &GraveyardLog {
        self.store().log()
    }
}

#[test]
fn test_banish_then_undo_restores_contents() {
    let fx = Fixture::new();
    let path = fx.file("report.txt", "quarterly numbers");

    let tags: ClassificationSet = [Classification::Ghost].into_iter().collect();
    let receipt = fx
        .coordinator
        .banish(&BanishRequest::new(&path).with_classifications(tags))
        .unwrap();

    assert!(!path.exists());
    assert!(receipt.graveyard_path.exists());
    assert!(fx.store().contains(&receipt.graveyard_path));

    let restored = fx.coordinator.undo(receipt.undo_id).unwrap();
    assert_eq!(restored.original_path, path);
    assert_eq!(fs::read_to_string(&path).unwrap(), "quarterly numbers");
    assert!(!receipt.graveyard_path.exists());

    let err = fx.coordinator.undo(receipt.undo_id).unwrap_err();
    assert!(matches!(err, UndoError::AlreadyConsumed(_)));

    let actions: Vec<_> = fx.log().entries().iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![LogAction::Banish, LogAction::Restore]);
    assert_eq!(fx.log().entries()[0].classifications, Some(tags));
}

#[test]
fn test_restore_refuses_occupied_original() {
    let fx = Fixture::new();
    let path = fx.file("notes.md", "old");
    let receipt = fx.coordinator.banish(&BanishRequest::new(&path)).unwrap();

    fs::write(&path, "new").unwrap();
    let err = fx.coordinator.undo(receipt.undo_id).unwrap_err();
    assert!(matches!(err, UndoError::Restore(CustodyError::Conflict { .. })));
    assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    assert!(receipt.graveyard_path.exists());

    // The token survives a failed restore.
    fs::remove_file(&path).unwrap();
    fx.coordinator.undo(receipt.undo_id).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "old");
}

#[test]
fn test_same_name_banished_twice_keeps_both() {
    let fx = Fixture::new();
    let path = fx.file("a.txt", "first");
    let first = fx.coordinator.banish(&BanishRequest::new(&path)).unwrap();
    fs::write(&path, "second").unwrap();
    let second = fx.coordinator.banish(&BanishRequest::new(&path)).unwrap();

    assert_ne!(first.graveyard_path, second.graveyard_path);
    assert_eq!(fs::read_to_string(&first.graveyard_path).unwrap(), "first");
    assert_eq!(fs::read_to_string(&second.graveyard_path).unwrap(), "second");
    assert_eq!(fx.log().current_graveyard().len(), 2);
}

#[test]
fn test_log_only_grows() {
    let fx = Fixture::new();
    let mut previous = fx.log().entries();

    for name in ["a", "b", "c"] {
        let path = fx.file(name, name);
        let receipt = fx.coordinator.banish(&BanishRequest::new(&path)).unwrap();
        let now = fx.log().entries();
        assert_eq!(&now[..previous.len()], &previous[..]);
        previous = now;

        fx.coordinator.undo(receipt.undo_id).unwrap();
        let now = fx.log().entries();
        assert_eq!(&now[..previous.len()], &previous[..]);
        previous = now;
    }

    let reopened = GraveyardLog::open(fx.log().path()).unwrap();
    assert_eq!(reopened.entries(), previous);
    assert_eq!(reopened.query(&LogFilter::new().action(LogAction::Restore)).len(), 3);
}

#[cfg(unix)]
#[test]
fn test_purge_continues_past_failure() {
    use std::os::unix::fs::PermissionsExt;

    let fx = Fixture::new();
    let locked = fx.files.join("locked");
    fs::create_dir(&locked).unwrap();
    let requests: Vec<BanishRequest> = (1..=5)
        .map(|n| {
            let dir = if n == 3 { &locked } else { &fx.files };
            let path = dir.join(format!("f{n}.bin"));
            fs::write(&path, "x".repeat(n * 10)).unwrap();
            BanishRequest::new(path).with_size(n as u64 * 10)
        })
        .collect();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

    // Privileged users ignore directory permissions.
    if fs::write(locked.join("canary"), "").is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let report = fx.coordinator.purge(&requests);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    assert_eq!(report.banished.len(), 4);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].path, requests[2].path);
    assert_eq!(report.errors[0].kind, FailureKind::PermissionDenied);
    assert_eq!(report.bytes_banished(), 10 + 20 + 40 + 50);
    assert!(!report.is_success());
    for (i, request) in requests.iter().enumerate() {
        assert_eq!(request.path.exists(), i == 2);
    }

    let sessions: Vec<_> = fx.log().entries().iter().map(|e| e.session).collect();
    assert_eq!(sessions, vec![Some(report.session_id); 4]);

    let undone = fx.coordinator.undo_session(report.session_id).unwrap();
    assert_eq!(undone.restored_count, 4);
    assert!(undone.errors.is_empty());
    assert!(requests.iter().all(|r| r.path.exists()));

    let err = fx.coordinator.undo_session(report.session_id).unwrap_err();
    assert!(matches!(err, UndoError::SessionConsumed(_)));
}

#[test]
fn test_purge_reports_vanished_files() {
    let fx = Fixture::new();
    let kept = fx.file("kept.txt", "k");
    let gone = fx.files.join("gone.txt");

    let report = fx
        .coordinator
        .purge(&[BanishRequest::new(&gone), BanishRequest::new(&kept)]);

    assert_eq!(report.banished.len(), 1);
    assert_eq!(report.errors[0].path, gone);
    assert_eq!(report.errors[0].kind, FailureKind::NotFound);
    assert!(!kept.exists());
}

#[test]
fn test_session_undo_after_window_is_rejected() {
    let fx = Fixture::with_window(Duration::ZERO);
    let path = fx.file("old.log", "x");
    let report = fx.coordinator.purge(&[BanishRequest::new(&path)]);
    std::thread::sleep(Duration::from_millis(20));

    let err = fx.coordinator.undo_session(report.session_id).unwrap_err();
    assert!(matches!(err, UndoError::Expired(_)));

    // Individual tokens still work.
    fx.coordinator.undo(report.banished[0].undo_id).unwrap();
    assert!(path.exists());
}

#[test]
fn test_banish_refuses_relative_and_graveyard_paths() {
    let fx = Fixture::new();
    let err = fx
        .coordinator
        .banish(&BanishRequest::new("relative/file"))
        .unwrap_err();
    assert!(matches!(err, CustodyError::NotAbsolute { .. }));

    let path = fx.file("x", "x");
    let receipt = fx.coordinator.banish(&BanishRequest::new(&path)).unwrap();
    let err = fx
        .coordinator
        .banish(&BanishRequest::new(&receipt.graveyard_path))
        .unwrap_err();
    assert!(matches!(err, CustodyError::Forbidden { .. }));
}

#[test]
fn test_reconcile_finds_both_orphan_kinds() {
    let fx = Fixture::new();
    let kept = fx.file("kept", "k");
    let lost = fx.file("lost", "l");
    fx.coordinator.banish(&BanishRequest::new(&kept)).unwrap();
    let lost = fx.coordinator.banish(&BanishRequest::new(&lost)).unwrap();

    fs::remove_file(&lost.graveyard_path).unwrap();
    let stray = fx.store().root().join("stray.bin");
    fs::write(&stray, "?").unwrap();

    let report = reconcile(fx.store().root(), fx.log());

    assert_eq!(report.physical_files, 2);
    assert_eq!(report.logged_entries, 2);
    assert_eq!(report.orphans.len(), 2);
    assert!(report.orphans.contains(&Orphan::Unlogged { path: stray.clone() }));
    assert!(report.orphans.iter().any(|o| matches!(
        o,
        Orphan::Missing { entry } if entry.graveyard_path.as_deref() == Some(lost.graveyard_path.as_path())
    )));
    assert!(stray.exists());
}

#[test]
fn test_corrupt_log_lines_are_dropped_and_preserved() {
    let fx = Fixture::new();
    let path = fx.file("a", "a");
    fx.coordinator.banish(&BanishRequest::new(&path)).unwrap();
    let log_path = fx.log().path().to_path_buf();

    let mut raw = fs::read_to_string(&log_path).unwrap();
    raw.push_str("{\"timestamp\": not json\n");
    fs::write(&log_path, &raw).unwrap();

    let reopened = GraveyardLog::open(&log_path).unwrap();
    assert_eq!(reopened.len(), 1);
    assert_eq!(fs::read_to_string(corrupt_copy(&log_path)).unwrap(), raw);
    assert!(!fs::read_to_string(&log_path).unwrap().contains("not json"));
    assert!(fx.data.join("graveyard.jsonl").exists());
}

fn corrupt_copy(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap().to_os_string();
    name.push(".corrupt");
    path.with_file_name(name)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn whitelist_matches_a_set_model(ops in prop::collection::vec((any::<bool>(), 0u8..6), 0..24)) {
        let temp = TempDir::new().unwrap();
        let record = temp.path().join("whitelist.json");
        let store = WhitelistStore::open(&record).unwrap();
        let mut model = std::collections::BTreeSet::new();

        for (add, n) in ops {
            let path = PathBuf::from(format!("/home/u/file{n}"));
            if add {
                prop_assert_eq!(store.add(&path).unwrap(), model.insert(path.clone()));
            } else {
                prop_assert_eq!(store.remove(&path).unwrap(), model.remove(&path));
            }
            prop_assert!(store.has(&path) == model.contains(&path));
        }

        let reopened = WhitelistStore::open(&record).unwrap();
        prop_assert_eq!(reopened.snapshot(), model.clone());
        prop_assert_eq!(store.all(), model.into_iter().collect::<Vec<_>>());
    }
}
