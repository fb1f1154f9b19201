// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Reading-session orchestration.
//!
//! One explicit state machine drives the whole pipeline:
//!
//! ```text
//! Idle → CheckingAccess → Denied
//!                       → Fetching → UnavailableFile
//!                                  → Loading → UnreadableFile
//!                                            → Ready
//! ```
//!
//! Each transition triggers exactly one side effect, in order: resolve
//! access, fetch the asset, mount and index the renderer, composite the
//! watermark. The grant is obtained strictly before any fetch; a denial
//! means the asset is never requested.
//!
//! Opening a book supersedes any in-flight open: the previous session's
//! token is cancelled and its generation retired, so a slow, stale
//! access check can never grant access after the viewer has moved to a
//! different book. Every await is raced against the session token and
//! every state write re-checks the generation first.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::catalog::{BookCatalog, MetadataCache};
use crate::error::SessionError;
use crate::fetcher::AssetFetcher;
use crate::identity::IdentityProvider;
use crate::models::{AccessGrant, BookId, BookMetadata, WatermarkIdentity};
use crate::oracle::AccessOracle;
use crate::progress::{ProgressStore, ProgressThrottle};
use crate::render::{engine_for_asset, PositionChange, RendererHandle};
use crate::watermark::{build_overlay, OverlaySpec};

/// User-facing session states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    CheckingAccess,
    /// No entitlement; the viewer is redirected to purchase/borrow.
    Denied { reason: String },
    Fetching,
    /// Download failed after authorization; retryable by the viewer.
    UnavailableFile { detail: String },
    Loading,
    /// The file, not the network, is the problem. Not retryable.
    UnreadableFile { detail: String },
    Ready,
}

/// Everything a view needs for one granted, mounted reading session.
pub struct ActiveReading {
    pub session_id: Uuid,
    pub book_id: BookId,
    pub metadata: BookMetadata,
    pub grant: AccessGrant,
    pub overlay: OverlaySpec,
    pub renderer: RendererHandle,
    pub position_events: mpsc::UnboundedReceiver<PositionChange>,
}

impl std::fmt::Debug for ActiveReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveReading")
            .field("session_id", &self.session_id)
            .field("book_id", &self.book_id)
            .field("metadata", &self.metadata)
            .field("grant", &self.grant)
            .field("overlay", &self.overlay)
            .finish_non_exhaustive()
    }
}

struct SessionGuard {
    generation: u64,
    cancel: CancellationToken,
}

/// The session orchestrator. All collaborators are injected; nothing is
/// reached through ambient state.
pub struct ReaderSession {
    identity: Arc<dyn IdentityProvider>,
    oracle: Arc<AccessOracle>,
    catalog: Arc<dyn BookCatalog>,
    metadata_cache: MetadataCache,
    fetcher: Arc<AssetFetcher>,
    progress: Arc<ProgressStore>,
    state_tx: watch::Sender<SessionState>,
    guard: Mutex<SessionGuard>,
}

impl ReaderSession {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        oracle: Arc<AccessOracle>,
        catalog: Arc<dyn BookCatalog>,
        metadata_cache: MetadataCache,
        fetcher: Arc<AssetFetcher>,
        progress: Arc<ProgressStore>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            identity,
            oracle,
            catalog,
            metadata_cache,
            fetcher,
            progress,
            state_tx,
            guard: Mutex::new(SessionGuard {
                generation: 0,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Observe user-facing state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Current user-facing state.
    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    /// Abandon the current session, cancelling any in-flight work.
    pub fn close(&self) {
        let mut guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        guard.generation += 1;
        guard.cancel.cancel();
        guard.cancel = CancellationToken::new();
        self.state_tx.send_replace(SessionState::Idle);
    }

    /// Open a reading session for a book.
    ///
    /// Supersedes any in-flight open. Access is re-verified on every
    /// call; grants are never cached across sessions.
    pub async fn open(&self, book_id: BookId) -> Result<ActiveReading, SessionError> {
        let (generation, cancel) = self.begin_generation();
        let session_id = Uuid::new_v4();
        tracing::info!(%session_id, %book_id, "reading session starting");

        // Identity first: an unauthenticated subject is denied without
        // touching either oracle, and an unattributed render would defeat
        // the watermark anyway.
        let viewer = match self.guarded(&cancel, self.identity.current_identity()).await? {
            Some(viewer) => viewer,
            None => {
                self.transition(
                    generation,
                    SessionState::Denied {
                        reason: "not signed in".into(),
                    },
                )?;
                return Err(SessionError::IdentityUnavailable);
            }
        };
        let subject = viewer.canonical_subject().clone();

        self.transition(generation, SessionState::CheckingAccess)?;

        let metadata = match self.metadata_cache.get(book_id) {
            Some(metadata) => metadata,
            None => {
                let looked_up = self
                    .guarded(&cancel, self.catalog.metadata(book_id))
                    .await?
                    .map_err(|e| SessionError::MetadataUnavailable(e.to_string()))?
                    .ok_or_else(|| {
                        SessionError::MetadataUnavailable(format!("book {book_id} not in catalog"))
                    })?;
                self.metadata_cache.put(looked_up.clone());
                looked_up
            }
        };

        let grant = self
            .guarded(&cancel, self.oracle.resolve_access(&subject, book_id))
            .await?;
        if !grant.permits_reading() {
            self.transition(
                generation,
                SessionState::Denied {
                    reason: format!("no ownership or active loan for book {book_id}"),
                },
            )?;
            return Err(SessionError::AuthorizationDenied { book_id: book_id.0 });
        }
        tracing::info!(%session_id, %book_id, method = ?grant.method, "access granted");

        // Grant in hand — only now may the asset be fetched.
        self.transition(generation, SessionState::Fetching)?;
        let asset = match self
            .guarded(&cancel, self.fetcher.fetch_asset(book_id, &metadata.content_path))
            .await?
        {
            Ok(asset) => asset,
            Err(e) if e.is_configuration() => {
                // A bad reference or unrecognized format is fatal like a
                // broken file: no retry affordance, no fallback fetch.
                let detail = e.to_string();
                self.transition(generation, SessionState::UnreadableFile { detail: detail.clone() })?;
                return Err(SessionError::Configuration(detail));
            }
            Err(e) => {
                self.transition(
                    generation,
                    SessionState::UnavailableFile { detail: e.to_string() },
                )?;
                return Err(SessionError::Fetch(e));
            }
        };

        self.transition(generation, SessionState::Loading)?;

        let engine = match engine_for_asset(&asset) {
            Ok(engine) => engine,
            Err(e) => {
                self.transition(
                    generation,
                    SessionState::UnreadableFile { detail: e.to_string() },
                )?;
                return Err(SessionError::Render(e));
            }
        };

        // Restore the device-local position saved for this book, if any.
        let saved = self.progress.load(book_id);
        let (mut renderer, position_events) =
            RendererHandle::mount(engine, saved.map(|s| s.position_token));

        if let Err(e) = self.guarded(&cancel, renderer.finish_indexing()).await? {
            self.transition(
                generation,
                SessionState::UnreadableFile { detail: e.to_string() },
            )?;
            return Err(SessionError::Render(e));
        }

        let overlay = build_overlay(Some(&WatermarkIdentity {
            display_name: viewer.display_name.clone(),
            contact_handle: viewer.contact_handle.clone(),
            wallet_address: viewer.wallet_address.clone(),
            book_id,
            session_timestamp: chrono::Utc::now(),
        }));

        self.transition(generation, SessionState::Ready)?;
        tracing::info!(%session_id, %book_id, "reading session ready");

        Ok(ActiveReading {
            session_id,
            book_id,
            metadata,
            grant,
            overlay,
            renderer,
            position_events,
        })
    }

    /// Persist a renderer position change under the save policy:
    /// immediate for discrete page turns, periodic for continuous ticks.
    /// Store failures are logged, never fatal for reading.
    pub fn persist_position(
        &self,
        book_id: BookId,
        change: &PositionChange,
        throttle: &mut ProgressThrottle,
        discrete: bool,
    ) {
        if !throttle.should_persist(discrete) {
            return;
        }
        if let Err(e) = self.progress.save(book_id, &change.token, change.percent) {
            tracing::warn!(%book_id, error = %e, "progress save failed");
        }
    }

    /// Retire the previous session and start a new generation.
    fn begin_generation(&self) -> (u64, CancellationToken) {
        let mut guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        guard.cancel.cancel();
        guard.generation += 1;
        guard.cancel = CancellationToken::new();
        (guard.generation, guard.cancel.clone())
    }

    /// Race a pipeline step against session cancellation.
    async fn guarded<F: std::future::Future>(
        &self,
        cancel: &CancellationToken,
        fut: F,
    ) -> Result<F::Output, SessionError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            output = fut => Ok(output),
        }
    }

    /// Apply a state transition iff this generation is still current.
    /// Stale completions arriving after a newer open are discarded here.
    fn transition(&self, generation: u64, state: SessionState) -> Result<(), SessionError> {
        let guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        if guard.generation != generation {
            return Err(SessionError::Cancelled);
        }
        self.state_tx.send_replace(state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::catalog::CatalogError;
    use crate::fetcher::{AssetStore, FetchError};
    use crate::identity::{StaticIdentity, ViewerIdentity};
    use crate::models::{AccessMethod, WalletAddress};
    use crate::oracle::{LoanOracle, OracleError, OwnershipOracle};
    use crate::render::epub::tests::fixture_epub;
    use crate::render::pdf::tests::fixture_pdf;

    // =========================================================================
    // Test doubles
    // =========================================================================

    /// Ownership oracle scripted per book, with optional latency.
    struct ScriptedOwnership {
        owned: Vec<u64>,
        delay: Option<Duration>,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl OwnershipOracle for ScriptedOwnership {
        async fn balance_of(
            &self,
            _subject: &WalletAddress,
            book_id: BookId,
        ) -> Result<u64, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(OracleError::Contract("rpc timeout".into()));
            }
            Ok(u64::from(self.owned.contains(&book_id.0)))
        }
    }

    struct ScriptedLoans {
        usable: Vec<u64>,
        expiry_fails: bool,
    }

    #[async_trait]
    impl LoanOracle for ScriptedLoans {
        async fn usable_balance_of(
            &self,
            _subject: &WalletAddress,
            book_id: BookId,
        ) -> Result<u64, OracleError> {
            Ok(u64::from(self.usable.contains(&book_id.0)))
        }

        async fn loan_expiry(
            &self,
            _subject: &WalletAddress,
            _book_id: BookId,
        ) -> Result<Option<u64>, OracleError> {
            if self.expiry_fails {
                Err(OracleError::Contract("record lookup failed".into()))
            } else {
                Ok(Some((Utc::now().timestamp() as u64) + 3600))
            }
        }

        async fn active_loans(
            &self,
            _subject: &WalletAddress,
        ) -> Result<Vec<(BookId, u64)>, OracleError> {
            Ok(Vec::new())
        }
    }

    struct FixedCatalog;

    #[async_trait]
    impl BookCatalog for FixedCatalog {
        async fn metadata(&self, book_id: BookId) -> Result<Option<BookMetadata>, CatalogError> {
            let ext = if book_id.0 % 2 == 0 { "epub" } else { "pdf" };
            Ok(Some(BookMetadata {
                book_id,
                title: format!("Book {book_id}"),
                author: "Fixture".into(),
                content_path: format!("{book_id}/book.{ext}"),
            }))
        }
    }

    /// Store serving fixture documents, counting downloads.
    struct FixtureStore {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl AssetStore for FixtureStore {
        async fn download(&self, path: &str) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(FetchError::NotFound(path.to_string()));
            }
            if path.ends_with(".epub") {
                Ok(fixture_epub())
            } else {
                Ok(fixture_pdf())
            }
        }
    }

    struct Harness {
        session: Arc<ReaderSession>,
        store_calls: Arc<AtomicUsize>,
        progress: Arc<ProgressStore>,
        _dir: tempfile::TempDir,
    }

    /// Capture session transition logs in test output. `RUST_LOG`
    /// controls verbosity as usual.
    fn init_test_logging() {
        use std::sync::Once;
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }

    fn viewer() -> ViewerIdentity {
        ViewerIdentity {
            wallet_address: WalletAddress::from("0x742d35Cc6634C0532925a3b844Bc9e7595f4aB12"),
            custodial_address: Some(WalletAddress::from(
                "0xc0de000000000000000000000000000000000002",
            )),
            display_name: Some("Ada".into()),
            contact_handle: Some("ada@example.com".into()),
        }
    }

    fn harness_with(
        identity: Option<ViewerIdentity>,
        ownership: ScriptedOwnership,
        loans: ScriptedLoans,
        store_fails: bool,
    ) -> Harness {
        harness_full(identity, ownership, loans, store_fails, Arc::new(FixedCatalog))
    }

    fn harness_full(
        identity: Option<ViewerIdentity>,
        ownership: ScriptedOwnership,
        loans: ScriptedLoans,
        store_fails: bool,
        catalog: Arc<dyn BookCatalog>,
    ) -> Harness {
        init_test_logging();
        let dir = tempfile::tempdir().unwrap();
        let progress =
            Arc::new(ProgressStore::open(&dir.path().join("progress.redb")).unwrap());
        let store_calls = Arc::new(AtomicUsize::new(0));
        let session = Arc::new(ReaderSession::new(
            Arc::new(StaticIdentity(identity)),
            Arc::new(AccessOracle::new(Box::new(ownership), Box::new(loans))),
            catalog,
            MetadataCache::new(8, Duration::from_secs(300)),
            Arc::new(AssetFetcher::new(Box::new(FixtureStore {
                calls: store_calls.clone(),
                fail: store_fails,
            }))),
            progress.clone(),
        ));
        Harness {
            session,
            store_calls,
            progress,
            _dir: dir,
        }
    }

    fn owned_books(books: &[u64]) -> ScriptedOwnership {
        ScriptedOwnership {
            owned: books.to_vec(),
            delay: None,
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn no_loans() -> ScriptedLoans {
        ScriptedLoans {
            usable: Vec::new(),
            expiry_fails: false,
        }
    }

    // =========================================================================
    // End-to-end scenarios
    // =========================================================================

    #[tokio::test]
    async fn owned_book_renders_from_saved_position() {
        let h = harness_with(Some(viewer()), owned_books(&[42]), no_loans(), false);
        h.progress.save(BookId(42), "epubcfi(/6/4)", 67).unwrap();

        let mut reading = h.session.open(BookId(42)).await.unwrap();

        assert_eq!(reading.grant.method, AccessMethod::Owned);
        assert!(reading.grant.expires_at.is_none());
        assert_eq!(h.session.state(), SessionState::Ready);
        assert_eq!(reading.renderer.current_token().unwrap(), "epubcfi(/6/4)");
        assert!(!reading.overlay.is_empty());

        // Navigating forward reports the next spine position; the caller
        // persists it through the throttle policy.
        reading.renderer.next();
        let change = reading.position_events.recv().await.unwrap(); // restore event
        assert_eq!(change.token, "epubcfi(/6/4)");
        let change = reading.position_events.recv().await.unwrap();
        assert_eq!(change.token, "epubcfi(/6/6)");

        let mut throttle = ProgressThrottle::new(Duration::from_secs(5));
        h.session
            .persist_position(BookId(42), &change, &mut throttle, true);
        let saved = h.progress.load(BookId(42)).unwrap();
        assert_eq!(saved.position_token, "epubcfi(/6/6)");
        assert_eq!(saved.percent_complete, 100); // last of 3 spine items
    }

    #[tokio::test]
    async fn borrowed_with_unknown_expiry_still_renders() {
        let h = harness_with(
            Some(viewer()),
            owned_books(&[]),
            ScriptedLoans {
                usable: vec![7],
                expiry_fails: true,
            },
            false,
        );

        let reading = h.session.open(BookId(7)).await.unwrap();

        assert_eq!(reading.grant.method, AccessMethod::Borrowed);
        assert!(reading.grant.expires_at.is_none(), "expiry unknown, not denied");
        assert_eq!(h.session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn no_entitlement_denies_without_fetching() {
        let h = harness_with(Some(viewer()), owned_books(&[]), no_loans(), false);

        let err = h.session.open(BookId(99)).await.unwrap_err();

        assert!(matches!(err, SessionError::AuthorizationDenied { book_id: 99 }));
        assert!(matches!(h.session.state(), SessionState::Denied { .. }));
        assert_eq!(
            h.store_calls.load(Ordering::SeqCst),
            0,
            "asset store must never be touched on denial"
        );
    }

    #[tokio::test]
    async fn unauthenticated_viewer_is_denied_without_oracle_or_fetch() {
        let oracle_calls = Arc::new(AtomicUsize::new(0));
        let ownership = ScriptedOwnership {
            owned: vec![42],
            delay: None,
            fail: false,
            calls: oracle_calls.clone(),
        };
        let h = harness_with(None, ownership, no_loans(), false);

        let err = h.session.open(BookId(42)).await.unwrap_err();

        assert!(matches!(err, SessionError::IdentityUnavailable));
        assert_eq!(oracle_calls.load(Ordering::SeqCst), 0, "no oracle query without identity");
        assert_eq!(h.store_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oracle_failure_fails_closed_at_the_session() {
        let h = harness_with(
            Some(viewer()),
            ScriptedOwnership {
                owned: vec![42],
                delay: None,
                fail: true,
                calls: Arc::new(AtomicUsize::new(0)),
            },
            no_loans(),
            false,
        );

        let err = h.session.open(BookId(42)).await.unwrap_err();
        assert!(matches!(err, SessionError::AuthorizationDenied { .. }));
        assert_eq!(h.store_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn download_failure_is_unavailable_not_unreadable() {
        let h = harness_with(Some(viewer()), owned_books(&[42]), no_loans(), true);

        let err = h.session.open(BookId(42)).await.unwrap_err();

        assert!(matches!(err, SessionError::Fetch(_)));
        assert!(matches!(h.session.state(), SessionState::UnavailableFile { .. }));
    }

    #[tokio::test]
    async fn off_convention_reference_is_fatal_not_retryable() {
        // Catalog still carrying a legacy public-mirror path.
        struct LegacyPathCatalog;

        #[async_trait]
        impl BookCatalog for LegacyPathCatalog {
            async fn metadata(
                &self,
                book_id: BookId,
            ) -> Result<Option<BookMetadata>, CatalogError> {
                Ok(Some(BookMetadata {
                    book_id,
                    title: "Legacy".into(),
                    author: "Fixture".into(),
                    content_path: format!("ipfs://QmLegacy/{book_id}/book.epub"),
                }))
            }
        }

        let h = harness_full(
            Some(viewer()),
            owned_books(&[42]),
            no_loans(),
            false,
            Arc::new(LegacyPathCatalog),
        );

        let err = h.session.open(BookId(42)).await.unwrap_err();

        // Fatal like a broken file, not a retryable download failure.
        assert!(matches!(err, SessionError::Configuration(_)));
        assert!(matches!(h.session.state(), SessionState::UnreadableFile { .. }));
        assert_eq!(h.store_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pdf_books_mount_with_page_tokens() {
        let h = harness_with(Some(viewer()), owned_books(&[7]), no_loans(), false);

        let reading = h.session.open(BookId(7)).await.unwrap();
        assert_eq!(reading.renderer.current_token().unwrap(), "1");
        assert_eq!(reading.renderer.total_units(), Some(2));
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    #[tokio::test]
    async fn switching_books_discards_the_stale_grant() {
        // Ownership checks are slow, so session A is still waiting on its
        // oracle when the viewer opens book B.
        let h = harness_with(
            Some(viewer()),
            ScriptedOwnership {
                owned: vec![42, 7],
                delay: Some(Duration::from_millis(150)),
                fail: false,
                calls: Arc::new(AtomicUsize::new(0)),
            },
            no_loans(),
            false,
        );

        let session_a = h.session.clone();
        let slow_open = tokio::spawn(async move { session_a.open(BookId(42)).await });

        // Let session A reach its oracle await, then supersede it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let reading_b = h.session.open(BookId(7)).await.unwrap();
        assert_eq!(reading_b.book_id, BookId(7));
        assert_eq!(h.session.state(), SessionState::Ready);

        // Book A's eventually-arriving grant must never surface.
        let result_a = slow_open.await.unwrap();
        assert!(matches!(result_a, Err(SessionError::Cancelled)));
        assert_eq!(h.session.state(), SessionState::Ready);

        // Only book B was ever fetched.
        assert_eq!(h.store_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_cancels_in_flight_open() {
        let h = harness_with(
            Some(viewer()),
            ScriptedOwnership {
                owned: vec![42],
                delay: Some(Duration::from_millis(150)),
                fail: false,
                calls: Arc::new(AtomicUsize::new(0)),
            },
            no_loans(),
            false,
        );

        let session = h.session.clone();
        let open = tokio::spawn(async move { session.open(BookId(42)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        h.session.close();

        let result = open.await.unwrap();
        assert!(matches!(result, Err(SessionError::Cancelled)));
        assert_eq!(h.session.state(), SessionState::Idle);
        assert_eq!(h.store_calls.load(Ordering::SeqCst), 0);
    }

    // =========================================================================
    // State observation
    // =========================================================================

    #[tokio::test]
    async fn states_progress_in_pipeline_order() {
        let h = harness_with(Some(viewer()), owned_books(&[42]), no_loans(), false);
        let mut rx = h.session.subscribe_state();

        h.session.open(BookId(42)).await.unwrap();

        let mut seen = vec![rx.borrow_and_update().clone()];
        while rx.has_changed().unwrap_or(false) {
            rx.mark_unchanged();
            seen.push(rx.borrow().clone());
        }
        // watch coalesces intermediate states; the terminal one is Ready.
        assert_eq!(h.session.state(), SessionState::Ready);
        assert!(!seen.is_empty());
    }
}
