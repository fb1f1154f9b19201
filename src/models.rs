// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Core Data Model
//!
//! Types shared across the reading pipeline: the access grant produced by
//! the oracle, the fetched document asset, the resumable reading cursor,
//! and the watermark identity.
//!
//! ## Wallet Address Type
//!
//! The [`WalletAddress`] newtype wraps Ethereum-style addresses (0x-prefixed,
//! 40 hex characters). It provides type safety and clear semantics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Wallet Address Type
// =============================================================================

/// Ethereum-compatible wallet address wrapper.
///
/// Provides type safety for wallet addresses throughout the pipeline.
/// Format: `0x` followed by 40 hexadecimal characters (20 bytes).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WalletAddress(pub String);

impl std::fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WalletAddress {
    fn from(value: String) -> Self {
        WalletAddress(value)
    }
}

impl From<&str> for WalletAddress {
    fn from(value: &str) -> Self {
        WalletAddress(value.to_string())
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.0
    }
}

// =============================================================================
// Book Identity
// =============================================================================

/// Book identifier, equal to the on-chain ERC-1155 token id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BookId(pub u64);

impl std::fmt::Display for BookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BookId {
    fn from(value: u64) -> Self {
        BookId(value)
    }
}

// =============================================================================
// Access Grant
// =============================================================================

/// How access to a book was obtained.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccessMethod {
    /// Direct NFT ownership. Never expires.
    Owned,
    /// Active, time-boxed library loan.
    Borrowed,
    /// No entitlement.
    None,
}

/// Result of resolving access for a `(subject, book)` pair.
///
/// Created fresh on every read-session start and never persisted: the
/// grant must reflect current chain state, so decisions are recomputed
/// rather than cached across sessions.
///
/// Invariants:
/// - `method == Owned` implies `expires_at == None` (ownership never expires).
/// - `method == Borrowed` with a known expiry implies the expiry was in the
///   future at grant time; a past expiry is downgraded to `None` by the
///   oracle before the grant is emitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessGrant {
    /// Canonical subject the oracles were queried for.
    pub subject: WalletAddress,
    /// Book the grant covers.
    pub book_id: BookId,
    /// How access was obtained.
    pub method: AccessMethod,
    /// Loan expiry, when known. `None` for ownership and for loans whose
    /// expiry lookup failed (expiry unknown, access still granted).
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessGrant {
    /// A denial for the given subject and book.
    pub fn denied(subject: WalletAddress, book_id: BookId) -> Self {
        Self {
            subject,
            book_id,
            method: AccessMethod::None,
            expires_at: None,
        }
    }

    /// Whether this grant permits reading.
    pub fn permits_reading(&self) -> bool {
        self.method != AccessMethod::None
    }
}

// =============================================================================
// Document Asset
// =============================================================================

/// Recognized document container formats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    /// Reflowable e-book container (.epub).
    Epub,
    /// Paginated document (.pdf).
    Pdf,
    /// Anything else. Must hard-fail before rendering is attempted.
    Unknown,
}

impl DocumentFormat {
    /// Classify a storage path by its suffix. Exactly two suffixes are
    /// recognized; anything else is `Unknown`.
    pub fn from_path(path: &str) -> Self {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".epub") {
            DocumentFormat::Epub
        } else if lower.ends_with(".pdf") {
            DocumentFormat::Pdf
        } else {
            DocumentFormat::Unknown
        }
    }
}

/// Raw bytes of one book's content plus derived metadata.
///
/// Owned exclusively by the active reading session and dropped when the
/// session ends. Format classification happens before any bytes are
/// trusted as renderable.
#[derive(Debug, Clone)]
pub struct DocumentAsset {
    pub book_id: BookId,
    pub format: DocumentFormat,
    pub raw_bytes: Vec<u8>,
}

impl DocumentAsset {
    pub fn byte_length(&self) -> usize {
        self.raw_bytes.len()
    }
}

// =============================================================================
// Reading Progress
// =============================================================================

/// Per-(device, book) resumable cursor.
///
/// `position_token` is opaque to the store: a CFI for EPUB, a page number
/// for PDF, a seconds-offset for audio. `percent_complete` is always
/// derived from the token relative to total document extent, never trusted
/// as an independent input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadingProgress {
    pub book_id: BookId,
    pub position_token: String,
    /// Integer 0-100.
    pub percent_complete: u8,
    /// Last save time, for diagnostics only.
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Watermark Identity
// =============================================================================

/// Identity facts composited into the watermark overlay.
///
/// Derived once per render session from the authenticated identity and
/// immutable for the session lifetime. Used purely for overlay
/// compositing: never transmitted, never persisted beyond the render
/// surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkIdentity {
    pub display_name: Option<String>,
    pub contact_handle: Option<String>,
    pub wallet_address: WalletAddress,
    pub book_id: BookId,
    pub session_timestamp: DateTime<Utc>,
}

// =============================================================================
// Library Loan Record
// =============================================================================

/// A loan-registry record. Owned and mutated exclusively by the loan
/// oracle; the core only reads it to enrich the UI with a countdown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LibraryLoanRecord {
    pub token_id: BookId,
    pub borrower: WalletAddress,
    pub expires_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Book Metadata
// =============================================================================

/// Catalog entry consumed once per session start to know what to fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookMetadata {
    pub book_id: BookId,
    pub title: String,
    pub author: String,
    /// Storage reference, expected to follow `{book_id}/book.{ext}`.
    pub content_path: String,
}
