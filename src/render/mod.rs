// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Document rendering behind one engine contract.
//!
//! Two interchangeable adapters ([`epub::EpubEngine`], [`pdf::PdfEngine`])
//! implement [`DocumentEngine`]; [`RendererHandle`] layers the shared
//! navigation rules on top of whichever engine matches the asset format:
//!
//! - `next()`/`previous()` clamp at the document bounds (no-op, not error)
//! - percentage seeks before the index is ready are buffered, most recent
//!   wins, and flushed once indexing completes (never silently dropped)
//! - zoom clamps to a fixed range instead of erroring
//! - every discrete navigation emits a position change with enough data
//!   for the caller to derive a completion percentage
//! - print intent is refused with a user-visible explanation

pub mod epub;
pub mod pdf;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::{DocumentAsset, DocumentFormat};
use crate::progress::percent_from_units;

/// Zoom bounds, percent.
pub const ZOOM_MIN_PCT: u16 = 50;
pub const ZOOM_MAX_PCT: u16 = 300;
const ZOOM_DEFAULT_PCT: u16 = 100;

/// Minimum horizontal swipe distance (pixels) before a gesture counts as
/// a page turn. Below this, accidental touches are ignored.
pub const SWIPE_MIN_DISTANCE_PX: i32 = 48;

/// Errors from document parsing and rendering.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// Bytes do not parse as the claimed format. Fatal for the session:
    /// no partial or garbled render is attempted.
    #[error("malformed document: {0}")]
    Malformed(String),

    /// Engine-internal failure after a successful parse. Converted to a
    /// typed error rather than propagating as an unhandled failure.
    #[error("render engine failure: {0}")]
    Engine(String),
}

/// A discrete position change reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionChange {
    /// Zero-based unit index (spine item or page).
    pub unit_index: usize,
    /// Total addressable units once indexed.
    pub total_units: usize,
    /// Opaque resumable token for this position.
    pub token: String,
    /// Derived completion percentage, 0-100.
    pub percent: u8,
}

/// Format-specific document adapter.
///
/// Indexing (computing the addressable-unit space) is asynchronous and
/// potentially slow; navigation is undefined until it completes, which
/// [`RendererHandle`] enforces.
#[async_trait]
pub trait DocumentEngine: Send {
    fn format(&self) -> DocumentFormat;

    /// Parse the document and build the unit index. Returns the total
    /// number of addressable units (at least 1 on success).
    async fn build_index(&mut self) -> Result<usize, RenderError>;

    /// Resumable token for a unit index.
    fn token_for_unit(&self, unit: usize) -> String;

    /// Resolve a token back to a unit index. `None` for tokens that do
    /// not address this document (treated as "start at the beginning").
    fn unit_for_token(&self, token: &str) -> Option<usize>;
}

/// Select and construct the engine matching an asset's format.
pub fn engine_for_asset(asset: &DocumentAsset) -> Result<Box<dyn DocumentEngine>, RenderError> {
    match asset.format {
        DocumentFormat::Epub => Ok(Box::new(epub::EpubEngine::new(asset.raw_bytes.clone()))),
        DocumentFormat::Pdf => Ok(Box::new(pdf::PdfEngine::new(asset.raw_bytes.clone()))),
        DocumentFormat::Unknown => Err(RenderError::Malformed(
            "unknown format reached the renderer".into(),
        )),
    }
}

/// Outcome of a print intent on a protected surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintDecision {
    /// Print was cancelled; the message is shown to the viewer.
    Suppressed { message: String },
}

/// Swipe direction after threshold arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwipeDirection {
    /// Forward page turn (finger moved left).
    Forward,
    /// Backward page turn (finger moved right).
    Backward,
}

/// Classify a horizontal swipe delta. Gestures shorter than the minimum
/// distance are ignored so accidental touches never turn pages. Pure, so
/// gesture handling cannot corrupt position state used by programmatic
/// navigation.
pub fn classify_swipe(delta_x: i32) -> Option<SwipeDirection> {
    if delta_x <= -SWIPE_MIN_DISTANCE_PX {
        Some(SwipeDirection::Forward)
    } else if delta_x >= SWIPE_MIN_DISTANCE_PX {
        Some(SwipeDirection::Backward)
    } else {
        None
    }
}

/// Live renderer for one mounted document.
pub struct RendererHandle {
    engine: Box<dyn DocumentEngine>,
    /// `Some` once indexing has completed.
    total_units: Option<usize>,
    current_unit: usize,
    /// Initial token to restore once the index exists.
    initial_token: Option<String>,
    /// Most recent percentage seek requested before readiness.
    pending_percent: Option<u8>,
    zoom_percent: u16,
    events: mpsc::UnboundedSender<PositionChange>,
}

impl RendererHandle {
    /// Mount an engine. Indexing has not run yet: the caller drives it
    /// via [`finish_indexing`](Self::finish_indexing), which is the
    /// cancellation point for slow documents.
    pub fn mount(
        engine: Box<dyn DocumentEngine>,
        initial_token: Option<String>,
    ) -> (Self, mpsc::UnboundedReceiver<PositionChange>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                engine,
                total_units: None,
                current_unit: 0,
                initial_token,
                pending_percent: None,
                zoom_percent: ZOOM_DEFAULT_PCT,
                events,
            },
            rx,
        )
    }

    /// Build the document index, restore the initial position, and flush
    /// any buffered percentage seek. Emits the resulting position.
    pub async fn finish_indexing(&mut self) -> Result<(), RenderError> {
        let total = self.engine.build_index().await?;
        if total == 0 {
            return Err(RenderError::Malformed("document has no content units".into()));
        }
        self.total_units = Some(total);

        // Restore saved position when it still addresses this document,
        // else start at the beginning.
        self.current_unit = self
            .initial_token
            .take()
            .and_then(|token| self.engine.unit_for_token(&token))
            .filter(|unit| *unit < total)
            .unwrap_or(0);

        // A seek requested while indexing was in flight wins over the
        // restored position: it is the viewer's most recent intent.
        if let Some(pct) = self.pending_percent.take() {
            self.current_unit = unit_for_percent(pct, total);
        }

        self.emit();
        Ok(())
    }

    /// Whether percentage-accurate navigation is available yet.
    pub fn is_index_ready(&self) -> bool {
        self.total_units.is_some()
    }

    /// Total addressable units, once indexed.
    pub fn total_units(&self) -> Option<usize> {
        self.total_units
    }

    /// Current resumable token, once indexed.
    pub fn current_token(&self) -> Option<String> {
        self.total_units?;
        Some(self.engine.token_for_unit(self.current_unit))
    }

    /// Current completion percentage, once indexed.
    pub fn current_percent(&self) -> Option<u8> {
        let total = self.total_units?;
        Some(percent_from_units(self.current_unit + 1, total))
    }

    /// Advance one unit. No-op at the last unit or before readiness.
    pub fn next(&mut self) {
        let Some(total) = self.total_units else { return };
        if self.current_unit + 1 < total {
            self.current_unit += 1;
            self.emit();
        }
    }

    /// Retreat one unit. No-op at the first unit or before readiness.
    pub fn previous(&mut self) {
        if self.total_units.is_none() {
            return;
        }
        if self.current_unit > 0 {
            self.current_unit -= 1;
            self.emit();
        }
    }

    /// Jump to a completion percentage. Before the index is ready the
    /// request is buffered (most recent wins) and flushed on readiness.
    pub fn go_to_percent(&mut self, percent: u8) {
        let percent = percent.min(100);
        match self.total_units {
            Some(total) => {
                let target = unit_for_percent(percent, total);
                if target != self.current_unit {
                    self.current_unit = target;
                    self.emit();
                }
            }
            None => self.pending_percent = Some(percent),
        }
    }

    /// Apply a swipe gesture using the shared threshold arbitration.
    pub fn apply_swipe(&mut self, delta_x: i32) {
        match classify_swipe(delta_x) {
            Some(SwipeDirection::Forward) => self.next(),
            Some(SwipeDirection::Backward) => self.previous(),
            None => {}
        }
    }

    /// Set the zoom level, clamped to the supported range. Returns the
    /// applied value.
    pub fn set_zoom(&mut self, percent: u16) -> u16 {
        self.zoom_percent = percent.clamp(ZOOM_MIN_PCT, ZOOM_MAX_PCT);
        self.zoom_percent
    }

    pub fn zoom(&self) -> u16 {
        self.zoom_percent
    }

    /// Intercept a platform print intent. Protected surfaces refuse to
    /// print; best-effort deterrence, not a security guarantee.
    pub fn request_print(&self) -> PrintDecision {
        PrintDecision::Suppressed {
            message: "Printing is disabled for protected books.".into(),
        }
    }

    fn emit(&self) {
        let Some(total) = self.total_units else { return };
        // Receiver gone means the view unmounted; nothing to notify.
        let _ = self.events.send(PositionChange {
            unit_index: self.current_unit,
            total_units: total,
            token: self.engine.token_for_unit(self.current_unit),
            percent: percent_from_units(self.current_unit + 1, total),
        });
    }
}

/// Map a percentage onto a unit index, clamped to the document.
fn unit_for_percent(percent: u8, total: usize) -> usize {
    if total == 0 {
        return 0;
    }
    let scaled = (percent as usize * total + 50) / 100;
    scaled.clamp(1, total) - 1
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Scripted engine with a fixed unit count and numeric tokens.
    pub struct FixedEngine {
        pub units: usize,
        pub fail: bool,
    }

    #[async_trait]
    impl DocumentEngine for FixedEngine {
        fn format(&self) -> DocumentFormat {
            DocumentFormat::Pdf
        }

        async fn build_index(&mut self) -> Result<usize, RenderError> {
            if self.fail {
                Err(RenderError::Malformed("scripted failure".into()))
            } else {
                Ok(self.units)
            }
        }

        fn token_for_unit(&self, unit: usize) -> String {
            (unit + 1).to_string()
        }

        fn unit_for_token(&self, token: &str) -> Option<usize> {
            let page: usize = token.parse().ok()?;
            (page >= 1 && page <= self.units).then(|| page - 1)
        }
    }

    fn mounted(units: usize, initial: Option<&str>) -> (RendererHandle, mpsc::UnboundedReceiver<PositionChange>) {
        RendererHandle::mount(
            Box::new(FixedEngine { units, fail: false }),
            initial.map(String::from),
        )
    }

    #[tokio::test]
    async fn next_clamps_at_last_unit() {
        let (mut handle, _rx) = mounted(3, None);
        handle.finish_indexing().await.unwrap();

        for _ in 0..10 {
            handle.next();
        }
        assert_eq!(handle.current_token().unwrap(), "3");

        // Still at the last unit, no error, no wraparound.
        handle.next();
        assert_eq!(handle.current_token().unwrap(), "3");
    }

    #[tokio::test]
    async fn previous_clamps_at_first_unit() {
        let (mut handle, _rx) = mounted(3, None);
        handle.finish_indexing().await.unwrap();

        handle.previous();
        handle.previous();
        assert_eq!(handle.current_token().unwrap(), "1");
    }

    #[tokio::test]
    async fn restores_valid_initial_position() {
        let (mut handle, mut rx) = mounted(10, Some("4"));
        handle.finish_indexing().await.unwrap();

        assert_eq!(handle.current_token().unwrap(), "4");
        let event = rx.recv().await.unwrap();
        assert_eq!(event.unit_index, 3);
        assert_eq!(event.percent, 40);
    }

    #[tokio::test]
    async fn invalid_initial_position_starts_at_beginning() {
        let (mut handle, _rx) = mounted(10, Some("page-nine-thousand"));
        handle.finish_indexing().await.unwrap();
        assert_eq!(handle.current_token().unwrap(), "1");

        let (mut handle, _rx) = mounted(10, Some("99"));
        handle.finish_indexing().await.unwrap();
        assert_eq!(handle.current_token().unwrap(), "1");
    }

    #[tokio::test]
    async fn percent_seek_before_readiness_is_buffered_not_dropped() {
        let (mut handle, mut rx) = mounted(10, None);

        assert!(!handle.is_index_ready());
        handle.go_to_percent(20);
        handle.go_to_percent(80); // most recent pending seek wins
        assert!(rx.try_recv().is_err(), "nothing may fire before readiness");

        handle.finish_indexing().await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.unit_index, 7);
        assert_eq!(event.percent, 80);
    }

    #[tokio::test]
    async fn navigation_before_readiness_is_suppressed() {
        let (mut handle, mut rx) = mounted(5, None);
        handle.next();
        handle.previous();
        assert!(rx.try_recv().is_err());
        assert!(handle.current_token().is_none());
    }

    #[tokio::test]
    async fn go_to_percent_bounds() {
        let (mut handle, _rx) = mounted(10, None);
        handle.finish_indexing().await.unwrap();

        handle.go_to_percent(0);
        assert_eq!(handle.current_token().unwrap(), "1");

        handle.go_to_percent(100);
        assert_eq!(handle.current_token().unwrap(), "10");

        // Out-of-range input clamps.
        handle.go_to_percent(200);
        assert_eq!(handle.current_token().unwrap(), "10");
    }

    #[tokio::test]
    async fn zoom_clamps_to_range() {
        let (mut handle, _rx) = mounted(3, None);
        assert_eq!(handle.set_zoom(10), ZOOM_MIN_PCT);
        assert_eq!(handle.set_zoom(5000), ZOOM_MAX_PCT);
        assert_eq!(handle.set_zoom(150), 150);
        assert_eq!(handle.zoom(), 150);
    }

    #[tokio::test]
    async fn print_intent_is_suppressed_with_explanation() {
        let (handle, _rx) = mounted(3, None);
        let PrintDecision::Suppressed { message } = handle.request_print();
        assert!(message.contains("disabled"));
    }

    #[tokio::test]
    async fn indexing_failure_is_typed() {
        let (mut handle, _rx) = RendererHandle::mount(
            Box::new(FixedEngine { units: 0, fail: true }),
            None,
        );
        let err = handle.finish_indexing().await.unwrap_err();
        assert!(matches!(err, RenderError::Malformed(_)));
    }

    #[tokio::test]
    async fn swipe_threshold_arbitration() {
        assert_eq!(classify_swipe(-100), Some(SwipeDirection::Forward));
        assert_eq!(classify_swipe(100), Some(SwipeDirection::Backward));
        assert_eq!(classify_swipe(-20), None);
        assert_eq!(classify_swipe(20), None);

        let (mut handle, _rx) = mounted(3, None);
        handle.finish_indexing().await.unwrap();
        handle.apply_swipe(-SWIPE_MIN_DISTANCE_PX);
        assert_eq!(handle.current_token().unwrap(), "2");
        handle.apply_swipe(10); // below threshold, ignored
        assert_eq!(handle.current_token().unwrap(), "2");
    }

    #[test]
    fn unit_for_percent_mapping() {
        assert_eq!(unit_for_percent(0, 10), 0);
        assert_eq!(unit_for_percent(50, 10), 4);
        assert_eq!(unit_for_percent(100, 10), 9);
        assert_eq!(unit_for_percent(100, 1), 0);
        assert_eq!(unit_for_percent(0, 0), 0);
    }
}
