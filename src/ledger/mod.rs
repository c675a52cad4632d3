// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger gateway: read-only access to the external virtual ledger, plus a
//! local mirror of what it last reported.

pub mod cache;
pub mod client;

pub use cache::AccountCache;
pub use client::{LedgerClient, LedgerError, LedgerGateway};
