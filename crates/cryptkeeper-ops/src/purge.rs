//! Background purge with progress reporting.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::OPERATION_CHANNEL_SIZE;
use crate::progress::PurgeEvent;
use crate::quarantine::BanishRequest;
use crate::undo::UndoCoordinator;

/// Start a swift purge on the blocking pool.
///
/// Files are moved one at a time. The receiver gets a
/// [`PurgeEvent::Progress`] before each file, a [`PurgeEvent::Failed`] for
/// every file that could not be moved, and a final [`PurgeEvent::Complete`].
/// Must be called from within a Tokio runtime.
pub fn start_purge(
    coordinator: Arc<UndoCoordinator>,
    requests: Vec<BanishRequest>,
) -> mpsc::Receiver<PurgeEvent> {
    let (tx, rx) = mpsc::channel(OPERATION_CHANNEL_SIZE);

    tokio::task::spawn_blocking(move || {
        let report = coordinator.purge_observed(&requests, |event| {
            // A dropped receiver does not stop the purge.
            let _ = tx.blocking_send(event);
        });
        let _ = tx.blocking_send(PurgeEvent::Complete(report));
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::GraveyardLog;
    use crate::quarantine::QuarantineStore;
    use cryptkeeper_core::PathGuard;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_start_purge_streams_events() {
        let temp = TempDir::new().unwrap();
        let files = temp.path().join("files");
        fs::create_dir(&files).unwrap();
        let files = files.canonicalize().unwrap();
        let log = Arc::new(GraveyardLog::open(temp.path().join("g.jsonl")).unwrap());
        let store = QuarantineStore::open(
            temp.path().join("graveyard"),
            Arc::new(PathGuard::permissive()),
            log,
        )
        .unwrap();
        let coordinator = Arc::new(UndoCoordinator::new(Arc::new(store)));

        fs::write(files.join("a"), "a").unwrap();
        let requests = vec![
            BanishRequest::new(files.join("a")),
            BanishRequest::new(files.join("missing")),
        ];

        let mut rx = start_purge(coordinator, requests);
        let mut failures = 0;
        let mut report = None;
        while let Some(event) = rx.recv().await {
            match event {
                PurgeEvent::Progress(_) => {}
                PurgeEvent::Failed(_) => failures += 1,
                PurgeEvent::Complete(r) => report = Some(r),
            }
        }

        let report = report.unwrap();
        assert_eq!(failures, 1);
        assert_eq!(report.banished.len(), 1);
        assert_eq!(report.errors.len(), 1);
    }
}
