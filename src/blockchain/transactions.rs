// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction building for native-currency withdrawals.
//!
//! Withdrawals are legacy (EIP-155) value transfers with a fixed gas limit
//! and a gas price sampled from the chain peer at submission time.

use alloy::{
    consensus::TxLegacy,
    primitives::{Address, Bytes, TxKind, U256},
};
use rust_decimal::Decimal;

use super::types::TRANSFER_GAS_LIMIT;

/// Gas parameters of a single submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasParams {
    pub gas_limit: u64,
    pub gas_price: u128,
}

impl GasParams {
    /// Fixed transfer gas limit at the sampled price.
    pub fn transfer(gas_price: u128) -> Self {
        Self {
            gas_limit: TRANSFER_GAS_LIMIT,
            gas_price,
        }
    }
}

/// A value transfer ready to be signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransfer {
    pub chain_id: u64,
    pub nonce: u64,
    pub to: Address,
    pub value_wei: U256,
    pub gas: GasParams,
}

impl UnsignedTransfer {
    pub fn into_legacy(self) -> TxLegacy {
        TxLegacy {
            chain_id: Some(self.chain_id),
            nonce: self.nonce,
            gas_price: self.gas.gas_price,
            gas_limit: self.gas.gas_limit,
            to: TxKind::Call(self.to),
            value: self.value_wei,
            input: Bytes::new(),
        }
    }
}

/// Convert a human-readable amount to the smallest unit.
///
/// # Arguments
/// * `amount` - Non-negative decimal amount (e.g. `1.5`)
/// * `decimals` - Number of decimals (18 for ETH-like chains)
pub fn parse_amount(amount: Decimal, decimals: u8) -> Result<U256, AmountError> {
    if amount.is_sign_negative() {
        return Err(AmountError::Negative);
    }

    let normalized = amount.normalize();
    if normalized.scale() > u32::from(decimals) {
        return Err(AmountError::TooPrecise(decimals));
    }

    let text = normalized.to_string();
    let (whole, fraction) = text.split_once('.').unwrap_or((text.as_str(), ""));

    let whole = whole
        .parse::<u128>()
        .map_err(|_| AmountError::Overflow)?;
    let padded = format!("{:0<width$}", fraction, width = decimals as usize);
    let fraction = if padded.is_empty() {
        0
    } else {
        padded.parse::<u128>().map_err(|_| AmountError::Overflow)?
    };

    let multiplier = 10u128.pow(u32::from(decimals));
    let total = whole
        .checked_mul(multiplier)
        .and_then(|w| w.checked_add(fraction))
        .ok_or(AmountError::Overflow)?;

    Ok(U256::from(total))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount must not be negative")]
    Negative,

    #[error("too many decimal places (max {0})")]
    TooPrecise(u8),

    #[error("amount overflow")]
    Overflow,
}
