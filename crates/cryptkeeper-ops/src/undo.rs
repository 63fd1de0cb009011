//! Undo tokens for single banishments and sessions for bulk purges.
//!
//! Tokens live only as long as the process. The graveyard log is the durable
//! record; a file whose token is gone can still be restored by path.
//!
//! Redeemed tokens are dropped at once and sessions are dropped once their
//! window has passed. Ids are handed out in increasing order, so an id below
//! the counter that is no longer held was redeemed or has lapsed.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use cryptkeeper_core::DEFAULT_PURGE_UNDO_WINDOW_SECS;

use crate::error::{CustodyError, OperationError, UndoError};
use crate::progress::{PurgeEvent, PurgeProgress};
use crate::quarantine::{BanishRequest, QuarantineStore, Restored};

/// Handle for undoing one banishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UndoId(pub u64);

impl fmt::Display for UndoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle for undoing a whole purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// What a successful banish hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanishReceipt {
    pub undo_id: UndoId,
    pub original_path: PathBuf,
    pub graveyard_path: PathBuf,
    pub size: u64,
}

/// Result of a swift purge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeReport {
    pub session_id: SessionId,
    pub banished: Vec<BanishReceipt>,
    pub errors: Vec<OperationError>,
    /// After this instant the session can no longer be undone as a whole.
    pub expires_at: DateTime<Utc>,
}

impl PurgeReport {
    pub fn bytes_banished(&self) -> u64 {
        self.banished.iter().map(|r| r.size).sum()
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Result of undoing a purge session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUndoReport {
    pub session_id: SessionId,
    pub restored_count: usize,
    pub restored: Vec<Restored>,
    pub errors: Vec<OperationError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenState {
    Pending,
    InFlight,
    Consumed,
}

#[derive(Debug)]
struct Token {
    original_path: PathBuf,
    graveyard_path: PathBuf,
    state: TokenState,
}

#[derive(Debug)]
struct Session {
    tokens: Vec<UndoId>,
    expires_at: DateTime<Utc>,
    state: TokenState,
}

/// Issues and redeems undo tokens on top of a [`QuarantineStore`].
pub struct UndoCoordinator {
    store: Arc<QuarantineStore>,
    window: Duration,
    next_token: AtomicU64,
    next_session: AtomicU64,
    tokens: Mutex<HashMap<UndoId, Token>>,
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl UndoCoordinator {
    pub fn new(store: Arc<QuarantineStore>) -> Self {
        Self::with_window(store, Duration::from_secs(DEFAULT_PURGE_UNDO_WINDOW_SECS))
    }

    /// Use `window` as the time a purge session stays undoable.
    pub fn with_window(store: Arc<QuarantineStore>, window: Duration) -> Self {
        Self {
            store,
            window,
            next_token: AtomicU64::new(1),
            next_session: AtomicU64::new(1),
            tokens: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<QuarantineStore> {
        &self.store
    }

    fn issued_token(&self, undo_id: UndoId) -> bool {
        undo_id.0 >= 1 && undo_id.0 < self.next_token.load(Ordering::Relaxed)
    }

    fn issued_session(&self, session_id: SessionId) -> bool {
        session_id.0 >= 1 && session_id.0 < self.next_session.load(Ordering::Relaxed)
    }

    /// Banish one file and issue a token that can move it back.
    pub fn banish(&self, request: &BanishRequest) -> Result<BanishReceipt, CustodyError> {
        let banished = self.store.banish(request)?;
        Ok(self.issue(banished.original_path, banished.graveyard_path, banished.size))
    }

    fn issue(&self, original_path: PathBuf, graveyard_path: PathBuf, size: u64) -> BanishReceipt {
        let undo_id = UndoId(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.tokens.lock().insert(
            undo_id,
            Token {
                original_path: original_path.clone(),
                graveyard_path: graveyard_path.clone(),
                state: TokenState::Pending,
            },
        );
        BanishReceipt {
            undo_id,
            original_path,
            graveyard_path,
            size,
        }
    }

    /// Restore the file behind `undo_id`.
    ///
    /// A failed restore leaves the token usable, so the caller can clear a
    /// conflict and try again.
    pub fn undo(&self, undo_id: UndoId) -> Result<Restored, UndoError> {
        let (graveyard_path, original_path) = {
            let mut tokens = self.tokens.lock();
            let Some(token) = tokens.get_mut(&undo_id) else {
                return Err(if self.issued_token(undo_id) {
                    UndoError::AlreadyConsumed(undo_id)
                } else {
                    UndoError::NotFound(undo_id)
                });
            };
            match token.state {
                TokenState::Consumed => return Err(UndoError::AlreadyConsumed(undo_id)),
                TokenState::InFlight => return Err(UndoError::InProgress(undo_id)),
                TokenState::Pending => token.state = TokenState::InFlight,
            }
            (token.graveyard_path.clone(), token.original_path.clone())
        };

        let result = self.store.restore(&graveyard_path, &original_path);

        let mut tokens = self.tokens.lock();
        match result {
            Ok(_) => {
                tokens.remove(&undo_id);
            }
            Err(_) => {
                if let Some(token) = tokens.get_mut(&undo_id) {
                    token.state = TokenState::Pending;
                }
            }
        }
        drop(tokens);

        Ok(result?)
    }

    /// Banish every request in order, collecting failures instead of
    /// stopping, and open an undo session for the ones that moved.
    pub fn purge(&self, requests: &[BanishRequest]) -> PurgeReport {
        self.purge_observed(requests, |_| {})
    }

    /// [`purge`](Self::purge), reporting each step to `observer`.
    pub fn purge_observed<F>(&self, requests: &[BanishRequest], mut observer: F) -> PurgeReport
    where
        F: FnMut(PurgeEvent),
    {
        let session_id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let bytes_total = requests.iter().filter_map(|r| r.size).sum();
        let mut progress = PurgeProgress::new(session_id, requests.len(), bytes_total);
        let mut banished = Vec::new();
        let mut errors = Vec::new();

        for request in requests {
            progress.set_current_file(Some(request.path.clone()));
            observer(PurgeEvent::Progress(progress.clone()));

            match self.store.banish_in_session(request, Some(session_id)) {
                Ok(done) => {
                    progress.complete_file(done.size);
                    banished.push(self.issue(done.original_path, done.graveyard_path, done.size));
                }
                Err(err) => {
                    tracing::warn!(path = %request.path.display(), %err, "purge skipped file");
                    let failure = OperationError::from_custody(&request.path, &err);
                    progress.add_error();
                    observer(PurgeEvent::Failed(failure.clone()));
                    errors.push(failure);
                }
            }
        }

        progress.set_current_file(None);
        observer(PurgeEvent::Progress(progress));

        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(self.window)
            .ok()
            .and_then(|window| now.checked_add_signed(window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut sessions = self.sessions.lock();
        prune_sessions(&mut sessions, now);
        sessions.insert(
            session_id,
            Session {
                tokens: banished.iter().map(|r| r.undo_id).collect(),
                expires_at,
                state: TokenState::Pending,
            },
        );
        drop(sessions);

        tracing::info!(
            session = %session_id,
            banished = banished.len(),
            failed = errors.len(),
            "purge finished"
        );

        PurgeReport {
            session_id,
            banished,
            errors,
            expires_at,
        }
    }

    /// Restore everything a purge session moved, continuing past failures.
    pub fn undo_session(&self, session_id: SessionId) -> Result<SessionUndoReport, UndoError> {
        self.undo_session_at(session_id, Utc::now())
    }

    fn undo_session_at(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<SessionUndoReport, UndoError> {
        let tokens = {
            let mut sessions = self.sessions.lock();
            prune_sessions(&mut sessions, now);
            let Some(session) = sessions.get_mut(&session_id) else {
                return Err(if self.issued_session(session_id) {
                    UndoError::Expired(session_id)
                } else {
                    UndoError::SessionNotFound(session_id)
                });
            };
            match session.state {
                TokenState::Consumed => return Err(UndoError::SessionConsumed(session_id)),
                TokenState::InFlight => return Err(UndoError::SessionInProgress(session_id)),
                TokenState::Pending => {}
            }
            if now > session.expires_at {
                return Err(UndoError::Expired(session_id));
            }
            session.state = TokenState::InFlight;
            session.tokens.clone()
        };

        let mut restored = Vec::new();
        let mut errors = Vec::new();
        for undo_id in tokens {
            match self.undo(undo_id) {
                Ok(done) => restored.push(done),
                Err(UndoError::AlreadyConsumed(_)) => {}
                Err(err) => {
                    let path = self.token_original(undo_id).unwrap_or_default();
                    errors.push(OperationError::new(path, err.kind(), err.to_string()));
                }
            }
        }

        if let Some(session) = self.sessions.lock().get_mut(&session_id) {
            session.state = TokenState::Consumed;
            session.tokens = Vec::new();
        }

        tracing::info!(
            session = %session_id,
            restored = restored.len(),
            failed = errors.len(),
            "purge session undone"
        );

        Ok(SessionUndoReport {
            session_id,
            restored_count: restored.len(),
            restored,
            errors,
        })
    }

    fn token_original(&self, undo_id: UndoId) -> Option<PathBuf> {
        self.tokens
            .lock()
            .get(&undo_id)
            .map(|t| t.original_path.clone())
    }
}

/// Forget sessions whose window has closed. One being undone right now is
/// kept until it finishes.
fn prune_sessions(sessions: &mut HashMap<SessionId, Session>, now: DateTime<Utc>) {
    sessions.retain(|_, s| s.state == TokenState::InFlight || now <= s.expires_at);
}
