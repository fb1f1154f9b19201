// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Dual-source access resolution.
//!
//! Decides, for a `(subject, book)` pair, whether reading is permitted
//! right now, by which method, and until when. Two external registries
//! back the decision:
//!
//! - **Ownership registry**: non-zero ERC-1155 balance means purchased.
//! - **Loan pool**: non-zero usable balance means an active, non-expired
//!   library loan.
//!
//! Ownership takes precedence over borrowing. Any primary query failure
//! fails closed: the grant becomes a denial, never an entitlement on an
//! ambiguous error. Decisions are recomputed per session and never
//! cached, so they reflect current chain state.

pub mod chain;
pub mod contracts;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::models::{AccessGrant, AccessMethod, BookId, LibraryLoanRecord, WalletAddress};

pub use chain::{ChainLoanOracle, ChainOwnershipOracle, RegistryConfig};

/// Errors from registry queries.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Contract error: {0}")]
    Contract(String),
}

/// Read-only view of the ownership registry.
#[async_trait]
pub trait OwnershipOracle: Send + Sync {
    /// ERC-1155 balance of `subject` for token `book_id`.
    async fn balance_of(&self, subject: &WalletAddress, book_id: BookId) -> Result<u64, OracleError>;
}

/// Read-only view of the library loan pool.
#[async_trait]
pub trait LoanOracle: Send + Sync {
    /// Currently non-expired borrowed quantity.
    async fn usable_balance_of(
        &self,
        subject: &WalletAddress,
        book_id: BookId,
    ) -> Result<u64, OracleError>;

    /// Unix expiry of the subject's loan, `None` when the pool has no
    /// record. Best-effort enrichment only.
    async fn loan_expiry(
        &self,
        subject: &WalletAddress,
        book_id: BookId,
    ) -> Result<Option<u64>, OracleError>;

    /// All active loans as `(book_id, unix_expiry)` pairs. Used only to
    /// enrich the UI with countdowns; failure never affects grants.
    async fn active_loans(&self, subject: &WalletAddress)
        -> Result<Vec<(BookId, u64)>, OracleError>;
}

/// The access decision point.
///
/// Pure read: no side effects, no caching. The session orchestrator
/// re-invokes `resolve_access` on every session start.
pub struct AccessOracle {
    ownership: Box<dyn OwnershipOracle>,
    loans: Box<dyn LoanOracle>,
}

impl AccessOracle {
    pub fn new(ownership: Box<dyn OwnershipOracle>, loans: Box<dyn LoanOracle>) -> Self {
        Self { ownership, loans }
    }

    /// Resolve access for a subject and book.
    ///
    /// Never errors: every failure path degrades to a denial (fail
    /// closed) and is logged, not retried. The caller may re-invoke on
    /// its next navigation.
    pub async fn resolve_access(&self, subject: &WalletAddress, book_id: BookId) -> AccessGrant {
        let (owned, usable) = tokio::join!(
            self.ownership.balance_of(subject, book_id),
            self.loans.usable_balance_of(subject, book_id),
        );

        // Fail closed: an error on either primary query denies, even if
        // the other query succeeded with a positive balance.
        let owned = match owned {
            Ok(balance) => balance,
            Err(e) => {
                tracing::warn!(%subject, %book_id, error = %e, "ownership query failed, denying");
                return AccessGrant::denied(subject.clone(), book_id);
            }
        };

        if owned > 0 {
            // Ownership wins over any concurrent loan; no expiry surfaced.
            return AccessGrant {
                subject: subject.clone(),
                book_id,
                method: AccessMethod::Owned,
                expires_at: None,
            };
        }

        let usable = match usable {
            Ok(balance) => balance,
            Err(e) => {
                tracing::warn!(%subject, %book_id, error = %e, "loan query failed, denying");
                return AccessGrant::denied(subject.clone(), book_id);
            }
        };

        if usable == 0 {
            return AccessGrant::denied(subject.clone(), book_id);
        }

        // Borrowed. The expiry lookup is best-effort: failure degrades to
        // "expiry unknown" rather than denying a loan the pool already
        // reported as usable.
        match self.loans.loan_expiry(subject, book_id).await {
            Ok(Some(unix)) => match unix_to_datetime(unix) {
                Some(expires_at) if expires_at > Utc::now() => AccessGrant {
                    subject: subject.clone(),
                    book_id,
                    method: AccessMethod::Borrowed,
                    expires_at: Some(expires_at),
                },
                // A loan whose reported expiry is already past is no
                // entitlement at all.
                _ => AccessGrant::denied(subject.clone(), book_id),
            },
            Ok(None) => AccessGrant {
                subject: subject.clone(),
                book_id,
                method: AccessMethod::Borrowed,
                expires_at: None,
            },
            Err(e) => {
                tracing::warn!(
                    %subject, %book_id, error = %e,
                    "loan expiry lookup failed, granting borrowed access with unknown expiry"
                );
                AccessGrant {
                    subject: subject.clone(),
                    book_id,
                    method: AccessMethod::Borrowed,
                    expires_at: None,
                }
            }
        }
    }

    /// Active loans for UI countdown display. Best-effort: failure
    /// returns an empty list and never affects any grant.
    pub async fn loan_countdowns(&self, subject: &WalletAddress) -> Vec<LibraryLoanRecord> {
        match self.loans.active_loans(subject).await {
            Ok(loans) => loans
                .into_iter()
                .map(|(token_id, unix)| LibraryLoanRecord {
                    token_id,
                    borrower: subject.clone(),
                    expires_at: unix_to_datetime(unix),
                })
                .collect(),
            Err(e) => {
                tracing::debug!(%subject, error = %e, "active loans enrichment failed");
                Vec::new()
            }
        }
    }
}

fn unix_to_datetime(unix: u64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(unix as i64, 0).single()
}
