// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Custody Core - Custodial Exchange Ledger & Withdrawal Service
//!
//! Reconciles off-chain virtual-ledger balances with on-chain withdrawals
//! from a single custodial EVM address, ingests ledger webhooks and streams
//! live events to connected clients.
//!
//! ## Modules
//!
//! - `ledger` - Ledger gateway and local account mirror
//! - `blockchain` - Chain peer RPC, nonce sequencing, signing
//! - `withdrawal` - Withdrawal engine
//! - `ingestor` - Idempotent webhook ingestion and retry loop
//! - `hub` - Live notification fan-out
//! - `api` - HTTP and WebSocket handlers (Axum)

pub mod api;
pub mod blockchain;
pub mod config;
pub mod error;
pub mod hub;
pub mod ingestor;
pub mod ledger;
pub mod models;
pub mod shutdown;
pub mod state;
pub mod withdrawal;
