//! Custody operations for cryptkeeper.
//!
//! This crate owns everything that changes the filesystem: moving files into
//! and out of the graveyard, the append-only graveyard log, the whitelist of
//! resurrected paths, and undo tokens for single banishments and whole
//! purges. Every move is recorded before the operation reports success.

mod conflict;
mod durable;
mod error;
mod log;
mod progress;
mod purge;
mod quarantine;
mod reconcile;
mod transfer;
mod undo;
mod whitelist;

pub use conflict::{occupied, unique_destination};
pub use error::{CustodyError, FailureKind, OperationError, StoreError, UndoError};
pub use log::{EncodedEntry, GraveyardLog, LogAction, LogEntry, LogFilter, current_graveyard};
pub use progress::{PurgeEvent, PurgeProgress};
pub use purge::start_purge;
pub use quarantine::{BanishRequest, Banished, QuarantineStore, Restored};
pub use reconcile::{Orphan, ReconcileReport, reconcile};
pub use undo::{BanishReceipt, PurgeReport, SessionId, SessionUndoReport, UndoCoordinator, UndoId};
pub use whitelist::WhitelistStore;

/// Default channel buffer size for purge progress updates.
pub const OPERATION_CHANNEL_SIZE: usize = 100;
