// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded reading-progress store backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `reading_progress`: book_id → serialized ReadingProgress (JSON bytes)
//!
//! Durability is per-device and local-only by design: nothing here syncs
//! across devices. Saves are last-write-wins with no versioning; the
//! store tolerates concurrent writers without corruption because each
//! save is one ACID transaction.
//!
//! Every committed save is published on an in-process broadcast channel
//! so other live views of the same book observe position changes
//! promptly. Subscribers that lag merely miss intermediate positions;
//! the store itself always holds the latest.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tokio::sync::broadcast;

use crate::config::{DATA_DIR_DEFAULT, DATA_DIR_ENV, PROGRESS_DB_FILE};
use crate::models::{BookId, ReadingProgress};

/// Primary table: book_id → serialized ReadingProgress (JSON bytes).
const READING_PROGRESS: TableDefinition<u64, &[u8]> = TableDefinition::new("reading_progress");

/// Broadcast channel capacity. Laggy subscribers drop old positions,
/// which is harmless: only the latest matters.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Errors from the progress database.
#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A position change, as observed by other live views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub book_id: BookId,
    pub position_token: String,
    pub percent_complete: u8,
}

/// Saved position returned by [`ProgressStore::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedPosition {
    pub position_token: String,
    pub percent_complete: u8,
}

/// Per-device resumable reading position store.
pub struct ProgressStore {
    db: Database,
    events: broadcast::Sender<ProgressEvent>,
}

impl ProgressStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self, ProgressError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create the table so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(READING_PROGRESS)?;
        }
        write_txn.commit()?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self { db, events })
    }

    /// Open the database at its configured location: `DATA_DIR`
    /// (default `/data`) joined with the standard filename.
    pub fn open_default() -> Result<Self, ProgressError> {
        let data_dir =
            std::env::var(DATA_DIR_ENV).unwrap_or_else(|_| DATA_DIR_DEFAULT.to_string());
        Self::open(&PathBuf::from(data_dir).join(PROGRESS_DB_FILE))
    }

    /// Persist the position for a book. Overwrite semantics,
    /// last-write-wins, safe to call at high frequency (the renderer
    /// throttles, see [`ProgressThrottle`]).
    pub fn save(
        &self,
        book_id: BookId,
        position_token: &str,
        percent_complete: u8,
    ) -> Result<(), ProgressError> {
        let record = ReadingProgress {
            book_id,
            position_token: position_token.to_string(),
            percent_complete: percent_complete.min(100),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_vec(&record)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(READING_PROGRESS)?;
            table.insert(book_id.0, json.as_slice())?;
        }
        write_txn.commit()?;

        // Publish after commit; no receivers is fine.
        let _ = self.events.send(ProgressEvent {
            book_id,
            position_token: record.position_token,
            percent_complete: record.percent_complete,
        });

        Ok(())
    }

    /// Load the saved position for a book.
    ///
    /// Never errors to the caller: a missing record and an unreadable
    /// store both yield `None` (the latter with a warning).
    pub fn load(&self, book_id: BookId) -> Option<SavedPosition> {
        match self.load_inner(book_id) {
            Ok(position) => position,
            Err(e) => {
                tracing::warn!(%book_id, error = %e, "progress load failed, starting from beginning");
                None
            }
        }
    }

    fn load_inner(&self, book_id: BookId) -> Result<Option<SavedPosition>, ProgressError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(READING_PROGRESS)?;
        let Some(value) = table.get(book_id.0)? else {
            return Ok(None);
        };

        match serde_json::from_slice::<ReadingProgress>(value.value()) {
            Ok(record) => Ok(Some(SavedPosition {
                position_token: record.position_token,
                percent_complete: record.percent_complete,
            })),
            Err(e) => {
                // Corrupt record: resume is lost, reading is not.
                tracing::warn!(%book_id, error = %e, "corrupt progress record ignored");
                Ok(None)
            }
        }
    }

    /// Subscribe to committed position changes.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }
}

/// Derive a completion percentage from a position in total units.
///
/// This is the only place percentage is computed: callers never pass an
/// independently-derived percentage, preventing drift between token and
/// percentage. Deterministic half-up integer rounding.
pub fn percent_from_units(position: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let position = position.min(total);
    (((position * 100) + total / 2) / total) as u8
}

/// Save-policy helper: immediate persistence on discrete page turns,
/// periodic on continuous engagement (scroll/playback ticks).
pub struct ProgressThrottle {
    interval: Duration,
    last_flush: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_flush: None,
        }
    }

    /// Whether this update should hit the store now. `discrete` marks
    /// page/location changes, which always persist; continuous ticks
    /// persist at most once per interval.
    pub fn should_persist(&mut self, discrete: bool) -> bool {
        let now = Instant::now();
        let due = match self.last_flush {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        };
        if discrete || due {
            self.last_flush = Some(now);
            true
        } else {
            false
        }
    }
}
