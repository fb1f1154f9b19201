// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Private asset retrieval.
//!
//! Retrieves document bytes from the private object store, but only for
//! storage references that follow the trusted `{book_id}/book.{ext}`
//! convention. Legacy public/IPFS references are rejected before any
//! network call: protected content is never fetched from an untrusted
//! mirror. Entitlement is the caller's responsibility; the session
//! orchestrator guarantees a grant exists before invoking this module.

use async_trait::async_trait;

use crate::config::ASSET_STORE_URL_ENV;
use crate::models::{BookId, DocumentAsset, DocumentFormat};

/// Errors from asset retrieval.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Storage reference outside the trusted private-storage convention.
    /// Raised before any network call.
    #[error("untrusted storage reference: {0}")]
    UntrustedReference(String),

    /// Reference matches the convention but the suffix is unrecognized.
    /// Raised before any network call.
    #[error("unrecognized document format: {0}")]
    UnknownFormat(String),

    /// Store client could not be constructed (missing endpoint config).
    #[error("store misconfigured: {0}")]
    Misconfigured(String),

    /// Object missing from the store.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The store refused the authenticated download.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Transport-level download failure.
    #[error("download failed: {0}")]
    Network(String),
}

impl FetchError {
    /// Whether this is a configuration-class failure (fatal for the
    /// session, no retry affordance) rather than a download failure.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FetchError::UntrustedReference(_)
                | FetchError::UnknownFormat(_)
                | FetchError::Misconfigured(_)
        )
    }
}

/// Authenticated blob store keyed by storage path.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Download an object. The store's own access policy applies; the
    /// caller must already be authenticated as the entitled subject.
    async fn download(&self, path: &str) -> Result<Vec<u8>, FetchError>;
}

/// Object store client over HTTPS.
#[derive(Debug)]
pub struct HttpAssetStore {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
}

impl HttpAssetStore {
    /// Create a client for the given store endpoint and access token.
    pub fn new(base_url: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            bearer_token: bearer_token.into(),
        }
    }

    /// Create a client for the endpoint configured in the environment.
    /// The token comes from the identity layer, not the environment.
    pub fn from_env(bearer_token: impl Into<String>) -> Result<Self, FetchError> {
        let base_url = std::env::var(ASSET_STORE_URL_ENV)
            .map_err(|_| FetchError::Misconfigured(ASSET_STORE_URL_ENV.to_string()))?;
        Ok(Self::new(base_url, bearer_token))
    }
}

#[async_trait]
impl AssetStore for HttpAssetStore {
    async fn download(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| FetchError::Network(e.to_string())),
            reqwest::StatusCode::NOT_FOUND => Err(FetchError::NotFound(path.to_string())),
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Err(FetchError::PermissionDenied(path.to_string()))
            }
            status => Err(FetchError::Network(format!("{url}: {status}"))),
        }
    }
}

/// Retrieves and classifies document bytes for verified sessions.
pub struct AssetFetcher {
    store: Box<dyn AssetStore>,
}

impl AssetFetcher {
    pub fn new(store: Box<dyn AssetStore>) -> Self {
        Self { store }
    }

    /// Fetch the asset behind a storage reference.
    ///
    /// The reference must be exactly `{book_id}/book.{ext}` with a
    /// recognized suffix; anything else is rejected before the network
    /// is touched. Bytes are fully buffered; the returned asset carries
    /// the classified format.
    pub async fn fetch_asset(
        &self,
        book_id: BookId,
        storage_ref: &str,
    ) -> Result<DocumentAsset, FetchError> {
        let format = classify_reference(book_id, storage_ref)?;

        let raw_bytes = self.store.download(storage_ref).await?;
        tracing::debug!(%book_id, bytes = raw_bytes.len(), ?format, "asset fetched");

        Ok(DocumentAsset {
            book_id,
            format,
            raw_bytes,
        })
    }
}

/// Validate a storage reference against the private-storage convention
/// and classify its format. Exactly two suffixes are recognized.
fn classify_reference(book_id: BookId, storage_ref: &str) -> Result<DocumentFormat, FetchError> {
    let expected_prefix = format!("{book_id}/book.");
    let Some(suffix) = storage_ref.strip_prefix(&expected_prefix) else {
        return Err(FetchError::UntrustedReference(storage_ref.to_string()));
    };
    // The suffix must be the bare extension: no nested paths, no query
    // strings, no legacy gateway URLs smuggled past the prefix check.
    if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(FetchError::UntrustedReference(storage_ref.to_string()));
    }

    match DocumentFormat::from_path(storage_ref) {
        DocumentFormat::Unknown => Err(FetchError::UnknownFormat(storage_ref.to_string())),
        format => Ok(format),
    }
}
