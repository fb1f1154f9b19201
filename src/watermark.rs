// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-viewer identity watermarking.
//!
//! Produces the overlay composited above rendered content: a prominent
//! low-opacity deterrent layer (display name), always-visible corner
//! marks (contact + truncated wallet), and a set of near-invisible
//! forensic marks whose positions are a deterministic function of the
//! wallet address and book id. A leaked screenshot can be correlated
//! back to a specific viewer by inspecting mark positions.
//!
//! The position derivation is an intentionally simple, repeatable,
//! non-cryptographic hash (FNV-1a). It is a deterrent, not a security
//! control, and is isolated here so it can be swapped for a stronger
//! derivation without touching rendering code.
//!
//! The overlay is declared non-interactive; print suppression is the
//! renderer's duty.

use crate::models::WatermarkIdentity;

/// Number of forensic marks per overlay.
const FORENSIC_MARK_COUNT: usize = 12;

/// Deterrent layer opacity, percent.
const DETERRENT_OPACITY_PCT: u8 = 8;

/// Corner mark opacity, percent.
const CORNER_OPACITY_PCT: u8 = 35;

/// Forensic mark opacity, per-mille (near-invisible).
const FORENSIC_OPACITY_PERMILLE: u16 = 15;

/// Screen corner for an always-visible mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// Prominent low-opacity text across the page center.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterrentLayer {
    pub text: String,
    pub opacity_percent: u8,
}

/// Screenshot-visible mark pinned to one corner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CornerMark {
    pub corner: Corner,
    pub text: String,
    pub opacity_percent: u8,
}

/// Near-invisible mark at a deterministic position.
///
/// Coordinates are per-mille of the render surface so the layout is
/// resolution-independent and identical across sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForensicMark {
    pub x_permille: u16,
    pub y_permille: u16,
    pub glyph: char,
    pub opacity_permille: u16,
}

/// Complete overlay description for one render session.
///
/// Pure data: compositing is the renderer's job. The overlay never
/// intercepts input events meant for the underlying document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlaySpec {
    pub deterrent: Option<DeterrentLayer>,
    pub corners: Vec<CornerMark>,
    pub forensic_marks: Vec<ForensicMark>,
}

impl OverlaySpec {
    /// The empty overlay, used when identity is unavailable. Rendering
    /// is never blocked here; the session orchestrator denies upstream
    /// when there is no identity to attribute.
    pub fn none() -> Self {
        Self {
            deterrent: None,
            corners: Vec::new(),
            forensic_marks: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deterrent.is_none() && self.corners.is_empty() && self.forensic_marks.is_empty()
    }
}

/// Build the overlay for a render session. Pure function of its input:
/// identical identities yield byte-identical overlays.
pub fn build_overlay(identity: Option<&WatermarkIdentity>) -> OverlaySpec {
    let Some(identity) = identity else {
        return OverlaySpec::none();
    };

    let wallet = identity.wallet_address.0.as_str();

    let deterrent_text = identity
        .display_name
        .clone()
        .or_else(|| identity.contact_handle.clone())
        .unwrap_or_else(|| truncate_wallet(wallet));

    let mut corners = vec![
        CornerMark {
            corner: Corner::TopLeft,
            text: truncate_wallet(wallet),
            opacity_percent: CORNER_OPACITY_PCT,
        },
        CornerMark {
            corner: Corner::BottomRight,
            text: truncate_wallet(wallet),
            opacity_percent: CORNER_OPACITY_PCT,
        },
    ];
    if let Some(contact) = &identity.contact_handle {
        corners.push(CornerMark {
            corner: Corner::BottomLeft,
            text: contact.clone(),
            opacity_percent: CORNER_OPACITY_PCT,
        });
    }

    OverlaySpec {
        deterrent: Some(DeterrentLayer {
            text: deterrent_text,
            opacity_percent: DETERRENT_OPACITY_PCT,
        }),
        corners,
        forensic_marks: forensic_marks(wallet, identity.book_id.0),
    }
}

/// Derive the forensic mark layout for `(wallet, book)`.
fn forensic_marks(wallet: &str, book_id: u64) -> Vec<ForensicMark> {
    let mut marks = Vec::with_capacity(FORENSIC_MARK_COUNT);
    let mut state = fnv1a(wallet.as_bytes());
    state = fnv1a_extend(state, &book_id.to_be_bytes());

    for index in 0..FORENSIC_MARK_COUNT {
        state = fnv1a_extend(state, &[index as u8]);
        let x = (state % 1000) as u16;
        let y = ((state >> 16) % 1000) as u16;
        // Mark glyphs cycle through a small set of visually quiet dots.
        let glyph = match (state >> 32) % 3 {
            0 => '\u{00B7}', // middle dot
            1 => '\u{2219}', // bullet operator
            _ => '\u{02D9}', // dot above
        };
        marks.push(ForensicMark {
            x_permille: x,
            y_permille: y,
            glyph,
            opacity_permille: FORENSIC_OPACITY_PERMILLE,
        });
    }
    marks
}

/// Shorten a wallet address for display: `0x1234…aB12`.
fn truncate_wallet(wallet: &str) -> String {
    if wallet.len() > 10 {
        format!("{}\u{2026}{}", &wallet[..6], &wallet[wallet.len() - 4..])
    } else {
        wallet.to_string()
    }
}

/// FNV-1a over a byte slice.
fn fnv1a(bytes: &[u8]) -> u64 {
    fnv1a_extend(0xcbf2_9ce4_8422_2325, bytes)
}

/// Continue an FNV-1a hash over more bytes.
fn fnv1a_extend(mut state: u64, bytes: &[u8]) -> u64 {
    for &byte in bytes {
        state ^= byte as u64;
        state = state.wrapping_mul(0x0000_0100_0000_01b3);
    }
    state
}
