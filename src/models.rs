// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Domain Data Models
//!
//! Types shared by the ledger gateway, withdrawal engine, event ingestor and
//! notification hub. API-facing types derive `Serialize`, `Deserialize`
//! and `ToSchema` for JSON handling and OpenAPI documentation.
//!
//! ## Model Categories
//!
//! - **Accounts**: read-only mirror of virtual-ledger balances
//! - **Withdrawals**: on-chain withdrawal requests and their lifecycle
//! - **Webhook Events**: inbound ledger events and their processing state
//! - **Notifications**: messages pushed to live subscribers

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// =============================================================================
// Account
// =============================================================================

/// A virtual-ledger account as last reported by the ledger service.
///
/// Never mutated locally; a newer read replaces it wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct Account {
    /// Opaque ledger identifier.
    pub id: String,
    /// Current balance (non-negative).
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    #[schema(value_type = f64, example = 12.5)]
    pub balance: Decimal,
    /// Currency code (e.g. "ETH").
    pub currency: String,
}

// =============================================================================
// Withdrawals
// =============================================================================

/// Lifecycle of a withdrawal request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Signed,
    Submitted,
    Confirmed,
    Failed,
}

impl WithdrawalStatus {
    /// Confirmed and Failed requests are immutable.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }

    fn can_transition_to(self, next: Self) -> bool {
        use WithdrawalStatus::*;
        match (self, next) {
            (Pending, Signed) | (Signed, Submitted) | (Submitted, Confirmed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// A withdrawal from the custodial address.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    pub id: Uuid,
    /// Recipient address (0x + 40 hex chars).
    pub destination_address: String,
    /// Amount in whole native units.
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    #[schema(value_type = f64, example = 1.0)]
    pub amount: Decimal,
    /// Nonce allocated for the custodial address.
    pub nonce: u64,
    pub status: WithdrawalStatus,
    /// Set once the chain peer accepted the transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    /// Set when the request failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WithdrawalRequest {
    /// Create a pending request for an allocated nonce.
    pub fn new_pending(destination_address: impl Into<String>, amount: Decimal, nonce: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            destination_address: destination_address.into(),
            amount,
            nonce,
            status: WithdrawalStatus::Pending,
            transaction_hash: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, refusing anything the lifecycle does not allow.
    pub fn transition(&mut self, next: WithdrawalStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_submitted(&mut self, tx_hash: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(WithdrawalStatus::Submitted)?;
        self.transaction_hash = Some(tx_hash.into());
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(WithdrawalStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid withdrawal transition from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: WithdrawalStatus,
    pub to: WithdrawalStatus,
}

// =============================================================================
// Webhook Events
// =============================================================================

/// Classification of an inbound ledger event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub enum WebhookEventType {
    #[serde(rename = "INCOMING_PAYMENT", alias = "IncomingPayment", alias = "incoming_payment")]
    IncomingPayment,
    #[serde(rename = "ACCOUNT_UPDATE", alias = "AccountUpdate", alias = "account_update")]
    AccountUpdate,
    #[serde(other)]
    Other,
}

/// An inbound webhook event and its processing state.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    /// External idempotency key.
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: WebhookEventType,
    /// Type-specific body.
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub processed: bool,
}

// =============================================================================
// Notifications
// =============================================================================

/// Body of a notification pushed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum NotificationKind {
    WithdrawalSubmitted(WithdrawalRequest),
    WithdrawalFailed(WithdrawalRequest),
    BalanceUpdated(Account),
    AccountUpdated(serde_json::Value),
}

impl NotificationKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::WithdrawalSubmitted(_) => "withdrawal_submitted",
            Self::WithdrawalFailed(_) => "withdrawal_failed",
            Self::BalanceUpdated(_) => "balance_updated",
            Self::AccountUpdated(_) => "account_updated",
        }
    }
}

/// A message delivered to every connected subscriber.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    /// Unique per logical event; repeated broadcasts of one id are dropped.
    pub id: Uuid,
    #[serde(flatten)]
    pub kind: NotificationKind,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind) -> Self {
        Self::with_id(Uuid::new_v4(), kind)
    }

    pub fn with_id(id: Uuid, kind: NotificationKind) -> Self {
        Self {
            id,
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Deterministic id for a notification derived from a webhook event.
    pub fn id_for_event(event_id: &str) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, event_id.as_bytes())
    }
}
