// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! PDF engine adapter.
//!
//! Paginated format: the addressable unit is the page, and position
//! tokens are 1-based page numbers. Indexing counts page objects from
//! the document structure; no text extraction or layout happens here.

use async_trait::async_trait;

use super::{DocumentEngine, RenderError};
use crate::models::DocumentFormat;

/// Paginated document engine.
pub struct PdfEngine {
    raw_bytes: Vec<u8>,
    page_count: usize,
}

impl PdfEngine {
    pub fn new(raw_bytes: Vec<u8>) -> Self {
        Self {
            raw_bytes,
            page_count: 0,
        }
    }

    /// Total pages, available once indexed.
    pub fn page_count(&self) -> usize {
        self.page_count
    }
}

#[async_trait]
impl DocumentEngine for PdfEngine {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Pdf
    }

    async fn build_index(&mut self) -> Result<usize, RenderError> {
        if !self.raw_bytes.starts_with(b"%PDF-") {
            return Err(RenderError::Malformed("missing %PDF header".into()));
        }

        self.page_count = count_page_objects(&self.raw_bytes);
        if self.page_count == 0 {
            return Err(RenderError::Malformed("document has no pages".into()));
        }
        Ok(self.page_count)
    }

    fn token_for_unit(&self, unit: usize) -> String {
        // 1-based page number, matching what readers display.
        (unit + 1).to_string()
    }

    fn unit_for_token(&self, token: &str) -> Option<usize> {
        let page: usize = token.parse().ok()?;
        (page >= 1 && page <= self.page_count).then(|| page - 1)
    }
}

/// Count `/Type /Page` dictionary entries, excluding the `/Pages` tree
/// nodes that share the prefix.
fn count_page_objects(bytes: &[u8]) -> usize {
    const TYPE_KEY: &[u8] = b"/Type";
    const PAGE_NAME: &[u8] = b"/Page";

    let mut count = 0;
    let mut i = 0;
    while let Some(offset) = find(&bytes[i..], TYPE_KEY) {
        let mut j = i + offset + TYPE_KEY.len();
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        if bytes[j..].starts_with(PAGE_NAME) {
            let after = j + PAGE_NAME.len();
            // "/Pages" and other longer names share the prefix; a page
            // dictionary ends the name here.
            let terminated = bytes
                .get(after)
                .map(|b| !b.is_ascii_alphanumeric())
                .unwrap_or(true);
            if terminated {
                count += 1;
            }
        }
        i += offset + TYPE_KEY.len();
    }
    count
}

/// First occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
