// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration Constants
//!
//! This module defines environment variable names and default values used
//! throughout the pipeline. Configuration is loaded from the environment
//! at startup by the embedding application.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Root directory for the progress database | `/data` |
//! | `CHAIN_RPC_URL` | EVM RPC endpoint for registry queries | Required |
//! | `OWNERSHIP_CONTRACT` | ERC-1155 sale contract address | Required |
//! | `LOAN_POOL_CONTRACT` | Library loan pool contract address | Required |
//! | `ASSET_STORE_URL` | Private object store base URL | Required |
//! | `RUST_LOG` | Log level filter | `info` |

/// Environment variable name for the local data directory path.
///
/// The reading-progress database (`progress.redb`) lives here. Progress
/// is per-device by design; nothing under this directory syncs anywhere.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// Default data directory when `DATA_DIR` is unset.
pub const DATA_DIR_DEFAULT: &str = "/data";

/// Environment variable name for the EVM RPC endpoint.
pub const CHAIN_RPC_URL_ENV: &str = "CHAIN_RPC_URL";

/// Environment variable name for the ERC-1155 ownership registry address.
pub const OWNERSHIP_CONTRACT_ENV: &str = "OWNERSHIP_CONTRACT";

/// Environment variable name for the library loan pool address.
pub const LOAN_POOL_CONTRACT_ENV: &str = "LOAN_POOL_CONTRACT";

/// Environment variable name for the private object store base URL.
pub const ASSET_STORE_URL_ENV: &str = "ASSET_STORE_URL";

/// Filename of the progress database under `DATA_DIR`.
pub const PROGRESS_DB_FILE: &str = "progress.redb";
