// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Readgate - Protected Reading Pipeline for Tokenized Ebooks
//!
//! This crate implements the content-access verification and protected
//! reading core of the storefront: deciding whether a wallet may read a
//! given book (direct NFT ownership or an active library loan), fetching
//! the private asset only after a grant exists, rendering it through the
//! matching engine, tracking resumable position, and compositing a
//! per-viewer forensic watermark over the output.
//!
//! ## Modules
//!
//! - `oracle` - dual-source access resolution (ownership + loan registries)
//! - `fetcher` - private object store retrieval + format gate
//! - `progress` - redb-backed resumable reading position
//! - `watermark` - deterministic per-viewer overlay derivation
//! - `render` - EPUB/PDF engine adapters behind one contract
//! - `session` - reading-session state machine and cancellation

pub mod catalog;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod identity;
pub mod models;
pub mod oracle;
pub mod progress;
pub mod render;
pub mod session;
pub mod watermark;
