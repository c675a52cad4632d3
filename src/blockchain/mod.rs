// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blockchain integration for the custodial address.
//!
//! This module provides functionality for:
//! - Talking JSON-RPC to the chain peer
//! - Serialized nonce allocation
//! - Transaction building, signing and encoding

pub mod client;
pub mod nonce;
pub mod signing;
pub mod transactions;
pub mod types;

pub use client::{ChainError, ChainPeer, RpcChainPeer};
pub use nonce::{NonceLease, NonceSequencer};
pub use signing::{CustodialSigner, SignedTransfer, SigningError, TransferSigner};
pub use transactions::{parse_amount, AmountError, GasParams, UnsignedTransfer};
pub use types::*;
