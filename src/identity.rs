// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Viewer identity as an injected dependency.
//!
//! The identity provider (wallet/email/social login) is external; the
//! pipeline only needs a stable wallet address plus optional display
//! fields. The session orchestrator receives an [`IdentityProvider`] as a
//! constructor argument, never via ambient/global lookup.

use async_trait::async_trait;

use crate::models::WalletAddress;

/// The authenticated viewer as supplied by the external identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerIdentity {
    /// Externally-owned wallet address.
    pub wallet_address: WalletAddress,
    /// Custodial/smart-wallet address, when one exists for this identity.
    pub custodial_address: Option<WalletAddress>,
    /// Display name for the deterrent watermark layer.
    pub display_name: Option<String>,
    /// Contact handle (email or similar) for the corner watermark layers.
    pub contact_handle: Option<String>,
}

impl ViewerIdentity {
    /// Canonical subject for all oracle queries.
    ///
    /// The loan registry is keyed on the custodial address in this
    /// deployment, so the custodial address takes precedence over the raw
    /// EOA when both exist.
    pub fn canonical_subject(&self) -> &WalletAddress {
        self.custodial_address
            .as_ref()
            .unwrap_or(&self.wallet_address)
    }
}

/// Source of the current authenticated viewer.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The currently authenticated viewer, or `None` when logged out.
    async fn current_identity(&self) -> Option<ViewerIdentity>;
}

/// Fixed identity provider for embedding contexts that resolve identity
/// once at startup, and for tests.
pub struct StaticIdentity(pub Option<ViewerIdentity>);

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_identity(&self) -> Option<ViewerIdentity> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(custodial: Option<&str>) -> ViewerIdentity {
        ViewerIdentity {
            wallet_address: WalletAddress::from("0xeoa0000000000000000000000000000000000001"),
            custodial_address: custodial.map(WalletAddress::from),
            display_name: Some("Ada".into()),
            contact_handle: Some("ada@example.com".into()),
        }
    }

    #[test]
    fn custodial_address_is_preferred() {
        let id = identity(Some("0xc0de000000000000000000000000000000000002"));
        assert_eq!(
            id.canonical_subject(),
            &WalletAddress::from("0xc0de000000000000000000000000000000000002")
        );
    }

    #[test]
    fn falls_back_to_eoa_without_custodial() {
        let id = identity(None);
        assert_eq!(id.canonical_subject(), &id.wallet_address);
    }

    #[tokio::test]
    async fn static_provider_returns_configured_identity() {
        let provider = StaticIdentity(Some(identity(None)));
        assert!(provider.current_identity().await.is_some());

        let logged_out = StaticIdentity(None);
        assert!(logged_out.current_identity().await.is_none());
    }
}
