// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session-level error taxonomy.
//!
//! Component errors (`OracleError`, `FetchError`, `RenderError`,
//! `ProgressError`) live with their components; this module unifies them
//! at the orchestration boundary. Every async operation in the pipeline
//! is wrapped so failure transitions session state instead of bubbling
//! as an unhandled error.

use crate::fetcher::FetchError;
use crate::progress::ProgressError;
use crate::render::RenderError;

/// Unified error surfaced by the session orchestrator.
///
/// Each variant maps to exactly one user-facing state, so callers can
/// distinguish "the network failed" from "the file is broken."
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No ownership and no active loan. The viewer should be redirected
    /// to the purchase/borrow flow; there is no retry affordance.
    #[error("access denied for book {book_id}: no ownership or active loan")]
    AuthorizationDenied { book_id: u64 },

    /// The viewer has no authenticated identity. Treated as a denial
    /// upstream: unattributed rendering defeats the watermark.
    #[error("no authenticated identity for reading session")]
    IdentityUnavailable,

    /// Storage reference or format outside the trusted convention.
    /// Fatal for the session; no fallback fetch is ever attempted.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Book metadata lookup failed; nothing to fetch.
    #[error("book metadata unavailable: {0}")]
    MetadataUnavailable(String),

    /// Object store download failed after authorization succeeded.
    /// Recoverable by explicit user retry, never auto-retried.
    #[error("asset fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Bytes fetched but failed to parse or render. Fatal for the
    /// session and surfaced distinctly from fetch failures.
    #[error("document render failed: {0}")]
    Render(#[from] RenderError),

    /// Progress store failure. Non-fatal for reading; logged and the
    /// session continues without resume.
    #[error("progress store error: {0}")]
    Progress(#[from] ProgressError),

    /// The session was cancelled before completing (navigation away,
    /// identity change, or a newer session superseding this one).
    #[error("reading session cancelled")]
    Cancelled,
}
