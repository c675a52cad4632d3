// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blockchain types and constants.

use std::str::FromStr;

use alloy::primitives::Address;

/// Gas limit of a plain value transfer with no calldata.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Decimals of the chain's native currency.
pub const NATIVE_DECIMALS: u8 = 18;

/// Network configuration for the single chain this deployment serves.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// EIP-155 chain ID
    pub chain_id: u64,
    /// JSON-RPC endpoint URL
    pub rpc_url: String,
    /// Block explorer URL
    pub explorer_url: Option<String>,
}

impl NetworkConfig {
    pub fn new(chain_id: u64, rpc_url: impl Into<String>) -> Self {
        Self {
            chain_id,
            rpc_url: rpc_url.into(),
            explorer_url: None,
        }
    }

    pub fn with_explorer(mut self, explorer_url: Option<String>) -> Self {
        self.explorer_url = explorer_url;
        self
    }

    /// Explorer link for a transaction hash, if an explorer is configured.
    pub fn explorer_tx_url(&self, tx_hash: &str) -> Option<String> {
        self.explorer_url
            .as_deref()
            .map(|base| format!("{}/tx/{}", base.trim_end_matches('/'), tx_hash))
    }
}

/// Validate and parse an EVM address (`0x` + 40 hex characters).
pub fn parse_address(address: &str) -> Result<Address, String> {
    if !address.starts_with("0x") {
        return Err("Address must start with 0x".to_string());
    }
    if address.len() != 42 {
        return Err("Address must be 42 characters (0x + 40 hex)".to_string());
    }
    if !address[2..].chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("Address must contain only hex characters".to_string());
    }
    Address::from_str(address).map_err(|e| e.to_string())
}
