// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Alloy-backed registry clients.
//!
//! Thin adapters from the on-chain contracts to the oracle traits the
//! access decision is written against. Both registries are read-only
//! from this crate's perspective.

use alloy::{
    network::Ethereum,
    providers::{
        fillers::{BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller},
        Identity, ProviderBuilder, RootProvider,
    },
};
use async_trait::async_trait;

use super::contracts::{BookRegistryContract, LoanPoolContract};
use super::{LoanOracle, OracleError, OwnershipOracle};
use crate::config::{CHAIN_RPC_URL_ENV, LOAN_POOL_CONTRACT_ENV, OWNERSHIP_CONTRACT_ENV};
use crate::models::{BookId, WalletAddress};

/// Configuration for the registry endpoints.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// EVM RPC endpoint.
    pub rpc_url: String,
    /// ERC-1155 sale contract address.
    pub ownership_contract: String,
    /// Library loan pool contract address.
    pub loan_pool_contract: String,
}

impl RegistryConfig {
    /// Load the registry endpoints from the environment. All three
    /// variables are required; there are no usable defaults for chain
    /// endpoints.
    pub fn from_env() -> Result<Self, OracleError> {
        Ok(Self {
            rpc_url: require_env(CHAIN_RPC_URL_ENV)?,
            ownership_contract: require_env(OWNERSHIP_CONTRACT_ENV)?,
            loan_pool_contract: require_env(LOAN_POOL_CONTRACT_ENV)?,
        })
    }
}

fn require_env(name: &str) -> Result<String, OracleError> {
    std::env::var(name).map_err(|_| OracleError::MissingConfig(name.to_string()))
}

/// HTTP provider type for registry queries (with all fillers).
type HttpProvider = FillProvider<
    JoinFill<
        Identity,
        JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
    >,
    RootProvider<Ethereum>,
>;

fn build_provider(rpc_url: &str) -> Result<HttpProvider, OracleError> {
    let url: url::Url = rpc_url
        .parse()
        .map_err(|e: url::ParseError| OracleError::InvalidRpcUrl(e.to_string()))?;
    Ok(ProviderBuilder::new().connect_http(url))
}

/// Ownership oracle backed by the ERC-1155 sale contract.
pub struct ChainOwnershipOracle {
    contract: BookRegistryContract<HttpProvider>,
}

impl ChainOwnershipOracle {
    /// Create a client for the configured registry.
    pub fn new(config: &RegistryConfig) -> Result<Self, OracleError> {
        let provider = build_provider(&config.rpc_url)?;
        let contract = BookRegistryContract::new(&provider, &config.ownership_contract)?;
        Ok(Self { contract })
    }
}

#[async_trait]
impl OwnershipOracle for ChainOwnershipOracle {
    async fn balance_of(&self, subject: &WalletAddress, book_id: BookId) -> Result<u64, OracleError> {
        self.contract.balance_of(&subject.0, book_id.0).await
    }
}

/// Loan oracle backed by the library loan pool contract.
pub struct ChainLoanOracle {
    contract: LoanPoolContract<HttpProvider>,
}

impl ChainLoanOracle {
    /// Create a client for the configured loan pool.
    pub fn new(config: &RegistryConfig) -> Result<Self, OracleError> {
        let provider = build_provider(&config.rpc_url)?;
        let contract = LoanPoolContract::new(&provider, &config.loan_pool_contract)?;
        Ok(Self { contract })
    }
}

#[async_trait]
impl LoanOracle for ChainLoanOracle {
    async fn usable_balance_of(
        &self,
        subject: &WalletAddress,
        book_id: BookId,
    ) -> Result<u64, OracleError> {
        self.contract.usable_balance_of(&subject.0, book_id.0).await
    }

    async fn loan_expiry(
        &self,
        subject: &WalletAddress,
        book_id: BookId,
    ) -> Result<Option<u64>, OracleError> {
        let expiry = self.contract.loan_expiry(&subject.0, book_id.0).await?;
        // The pool reports zero for "no record".
        Ok((expiry != 0).then_some(expiry))
    }

    async fn active_loans(
        &self,
        subject: &WalletAddress,
    ) -> Result<Vec<(BookId, u64)>, OracleError> {
        let loans = self.contract.active_loans(&subject.0).await?;
        Ok(loans
            .into_iter()
            .map(|(id, exp)| (BookId(id), exp))
            .collect())
    }
}
