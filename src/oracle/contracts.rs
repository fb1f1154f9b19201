// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! On-chain registry contract bindings.
//!
//! Two read-only registries back the access decision: the ERC-1155 sale
//! contract (purchase = ownership) and the library loan pool (time-boxed
//! rentals, ERC-5006 style usable balances).

use std::str::FromStr;

use alloy::{
    primitives::{Address, U256},
    providers::Provider,
    sol,
};

use super::OracleError;

// Ownership registry: the ERC-1155 sale contract. Token id == book id.
sol! {
    #[sol(rpc)]
    interface IBookRegistry {
        function balanceOf(address account, uint256 id) external view returns (uint256);
    }
}

// Loan pool: usable balance is non-zero iff an active, non-expired loan
// exists. `loanExpiry` and `activeLoans` are best-effort enrichment only.
sol! {
    #[sol(rpc)]
    interface ILoanPool {
        function usableBalanceOf(address account, uint256 tokenId) external view returns (uint256);
        function loanExpiry(address account, uint256 tokenId) external view returns (uint64);
        function activeLoans(address account) external view returns (uint256[] memory tokenIds, uint64[] memory expiries);
    }
}

/// ERC-1155 ownership registry wrapper.
pub struct BookRegistryContract<P> {
    contract: IBookRegistry::IBookRegistryInstance<P>,
}

impl<P: Provider + Clone> BookRegistryContract<P> {
    /// Create a new registry instance.
    pub fn new(provider: &P, contract_address: &str) -> Result<Self, OracleError> {
        let address = Address::from_str(contract_address)
            .map_err(|e| OracleError::InvalidAddress(e.to_string()))?;
        let contract = IBookRegistry::new(address, provider.clone());
        Ok(Self { contract })
    }

    /// Token balance of an account. Non-zero means the book is owned.
    pub async fn balance_of(&self, account: &str, token_id: u64) -> Result<u64, OracleError> {
        let addr = Address::from_str(account)
            .map_err(|e| OracleError::InvalidAddress(e.to_string()))?;

        let balance: U256 = self
            .contract
            .balanceOf(addr, U256::from(token_id))
            .call()
            .await
            .map_err(|e| OracleError::Contract(e.to_string()))?;

        Ok(balance.saturating_to::<u64>())
    }
}

/// Library loan pool wrapper.
pub struct LoanPoolContract<P> {
    contract: ILoanPool::ILoanPoolInstance<P>,
}

impl<P: Provider + Clone> LoanPoolContract<P> {
    /// Create a new loan pool instance.
    pub fn new(provider: &P, contract_address: &str) -> Result<Self, OracleError> {
        let address = Address::from_str(contract_address)
            .map_err(|e| OracleError::InvalidAddress(e.to_string()))?;
        let contract = ILoanPool::new(address, provider.clone());
        Ok(Self { contract })
    }

    /// Currently non-expired borrowed quantity for an account.
    pub async fn usable_balance_of(&self, account: &str, token_id: u64) -> Result<u64, OracleError> {
        let addr = Address::from_str(account)
            .map_err(|e| OracleError::InvalidAddress(e.to_string()))?;

        let balance: U256 = self
            .contract
            .usableBalanceOf(addr, U256::from(token_id))
            .call()
            .await
            .map_err(|e| OracleError::Contract(e.to_string()))?;

        Ok(balance.saturating_to::<u64>())
    }

    /// Unix expiry of the account's loan for a token, zero when no loan.
    pub async fn loan_expiry(&self, account: &str, token_id: u64) -> Result<u64, OracleError> {
        let addr = Address::from_str(account)
            .map_err(|e| OracleError::InvalidAddress(e.to_string()))?;

        self.contract
            .loanExpiry(addr, U256::from(token_id))
            .call()
            .await
            .map_err(|e| OracleError::Contract(e.to_string()))
    }

    /// All active loans for an account as `(token_id, unix_expiry)` pairs.
    pub async fn active_loans(&self, account: &str) -> Result<Vec<(u64, u64)>, OracleError> {
        let addr = Address::from_str(account)
            .map_err(|e| OracleError::InvalidAddress(e.to_string()))?;

        let result = self
            .contract
            .activeLoans(addr)
            .call()
            .await
            .map_err(|e| OracleError::Contract(e.to_string()))?;

        Ok(result
            .tokenIds
            .iter()
            .zip(result.expiries.iter())
            .map(|(id, exp)| (id.saturating_to::<u64>(), *exp))
            .collect())
    }
}
