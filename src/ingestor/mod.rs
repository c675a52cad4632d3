// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Event Ingestor
//!
//! Applies ledger webhook events exactly once per `eventId`.
//!
//! ## Processing
//!
//! | Type | Effect |
//! |------|--------|
//! | `INCOMING_PAYMENT` | Re-fetch the account, refresh the cache, forward `balance_updated` |
//! | `ACCOUNT_UPDATE` | Forward `account_updated` with the event payload |
//! | anything else | Recorded and marked processed, nothing forwarded |
//!
//! An event is marked processed only after its forward succeeded. Events
//! that failed part-way stay recorded and are picked up again by
//! [`EventIngestor::retry_unprocessed`]; forwarded notifications carry an
//! id derived from the `eventId`, so a repeated forward is dropped by the
//! hub.
//!
//! An event is parked, and skipped by later sweeps, once it fails with a
//! non-retryable error or has failed [`MAX_RETRY_ATTEMPTS`] times. A
//! redelivery from the ledger still gets a fresh attempt.
//!
//! ## Concurrency
//!
//! Each recorded event sits behind its own async mutex. Concurrent
//! deliveries of one `eventId` run one after another; different events do
//! not wait on each other.

mod retry;

pub use retry::RetryWorker;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use utoipa::ToSchema;

use crate::hub::{HubError, NotificationHub};
use crate::ledger::{AccountCache, LedgerError, LedgerGateway};
use crate::models::{Notification, NotificationKind, WebhookEvent, WebhookEventType};

/// Failed attempts after which an event is parked.
pub const MAX_RETRY_ATTEMPTS: u32 = 5;

/// Result of a successful ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Side effects applied and forwarded.
    Processed(WebhookEventType),
    /// Unknown type: recorded, nothing forwarded.
    Ignored,
    /// This `eventId` was already processed.
    Duplicate,
}

/// Counts from one [`EventIngestor::retry_unprocessed`] sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub attempted: usize,
    pub processed: usize,
    pub failed: usize,
    /// Events parked by this sweep.
    pub parked: usize,
}

struct EventEntry {
    event: WebhookEvent,
    failures: u32,
    parked: bool,
}

impl EventEntry {
    /// Count a failed attempt. Returns `true` if this failure parked the
    /// event.
    fn record_failure(&mut self, error: &IngestError) -> bool {
        self.failures += 1;
        if self.parked {
            return false;
        }
        if !error.is_retryable() || self.failures >= MAX_RETRY_ATTEMPTS {
            self.parked = true;
            tracing::error!(
                event_id = %self.event.event_id,
                failures = self.failures,
                error = %error,
                payload = %self.event.payload,
                "Webhook event parked, needs manual inspection"
            );
            return true;
        }
        false
    }
}

pub struct EventIngestor {
    ledger: Arc<dyn LedgerGateway>,
    accounts: Arc<AccountCache>,
    hub: NotificationHub,
    events: RwLock<HashMap<String, Arc<Mutex<EventEntry>>>>,
}

impl EventIngestor {
    pub fn new(
        ledger: Arc<dyn LedgerGateway>,
        accounts: Arc<AccountCache>,
        hub: NotificationHub,
    ) -> Self {
        Self {
            ledger,
            accounts,
            hub,
            events: RwLock::new(HashMap::new()),
        }
    }

    /// Ingest one raw webhook body.
    pub async fn ingest(&self, raw: Value) -> Result<IngestOutcome, IngestError> {
        let event = match parse_event(&raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, payload = %raw, "Rejecting malformed webhook event");
                return Err(e);
            }
        };

        let entry = self.record(event);
        let mut entry = entry.lock().await;
        if entry.event.processed {
            tracing::debug!(event_id = %entry.event.event_id, "Duplicate webhook event ignored");
            return Ok(IngestOutcome::Duplicate);
        }

        let result = self.apply(&mut entry.event).await;
        if let Err(e) = &result {
            entry.record_failure(e);
        }
        result
    }

    /// Re-run every recorded event that has not been processed yet.
    pub async fn retry_unprocessed(&self) -> RetryReport {
        let entries: Vec<Arc<Mutex<EventEntry>>> = self
            .events
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();

        let mut report = RetryReport::default();
        for entry in entries {
            let mut entry = entry.lock().await;
            if entry.event.processed || entry.parked {
                continue;
            }
            report.attempted += 1;
            match self.apply(&mut entry.event).await {
                Ok(_) => report.processed += 1,
                Err(e) => {
                    report.failed += 1;
                    if entry.record_failure(&e) {
                        report.parked += 1;
                    } else {
                        tracing::warn!(
                            event_id = %entry.event.event_id,
                            failures = entry.failures,
                            error = %e,
                            "Webhook retry failed"
                        );
                    }
                }
            }
        }
        report
    }

    /// Snapshot of a recorded event.
    pub async fn get(&self, event_id: &str) -> Option<WebhookEvent> {
        let entry = self
            .events
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(event_id)
            .cloned()?;
        let entry = entry.lock().await;
        Some(entry.event.clone())
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get or create the entry for `event`'s id. A redelivery keeps the
    /// first recorded body.
    fn record(&self, event: WebhookEvent) -> Arc<Mutex<EventEntry>> {
        if let Some(entry) = self
            .events
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&event.event_id)
        {
            return entry.clone();
        }

        self.events
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .entry(event.event_id.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(EventEntry {
                    event,
                    failures: 0,
                    parked: false,
                }))
            })
            .clone()
    }

    async fn apply(&self, event: &mut WebhookEvent) -> Result<IngestOutcome, IngestError> {
        let notification_id = Notification::id_for_event(&event.event_id);

        let outcome = match event.event_type {
            WebhookEventType::IncomingPayment => {
                let account_id = account_id(&event.payload)?;
                let account = self.ledger.fetch_account(account_id).await?;
                self.accounts.put(account_id, account.clone());
                self.hub.broadcast(Notification::with_id(
                    notification_id,
                    NotificationKind::BalanceUpdated(account),
                ))?;
                IngestOutcome::Processed(event.event_type)
            }
            WebhookEventType::AccountUpdate => {
                self.hub.broadcast(Notification::with_id(
                    notification_id,
                    NotificationKind::AccountUpdated(event.payload.clone()),
                ))?;
                IngestOutcome::Processed(event.event_type)
            }
            WebhookEventType::Other => IngestOutcome::Ignored,
        };

        event.processed = true;
        tracing::info!(
            event_id = %event.event_id,
            event_type = ?event.event_type,
            "Webhook event processed"
        );
        Ok(outcome)
    }
}

/// Wire shape of a ledger webhook body.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEventBody {
    /// Idempotency key.
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: WebhookEventType,
    /// Type-specific body. When absent, the remaining top-level fields are
    /// used instead.
    #[schema(value_type = Object)]
    pub payload: Option<Value>,
}

/// Validate a raw webhook body into an unprocessed event.
fn parse_event(raw: &Value) -> Result<WebhookEvent, IngestError> {
    let object = raw
        .as_object()
        .ok_or_else(|| IngestError::Malformed("event must be a JSON object".to_string()))?;

    let body = LedgerEventBody::deserialize(raw)
        .map_err(|e| IngestError::Malformed(e.to_string()))?;
    if body.event_id.trim().is_empty() {
        return Err(IngestError::Malformed("empty eventId".to_string()));
    }

    let payload = body.payload.unwrap_or_else(|| {
        Value::Object(
            object
                .iter()
                .filter(|(key, _)| !matches!(key.as_str(), "eventId" | "type"))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect::<Map<String, Value>>(),
        )
    });

    if body.event_type == WebhookEventType::IncomingPayment {
        account_id(&payload)?;
    }

    Ok(WebhookEvent {
        event_id: body.event_id,
        event_type: body.event_type,
        payload,
        received_at: Utc::now(),
        processed: false,
    })
}

fn account_id(payload: &Value) -> Result<&str, IngestError> {
    payload
        .get("accountId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| IngestError::Malformed("incoming payment without accountId".to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The body is not a usable event. Acknowledged, never retried.
    #[error("Malformed webhook event: {0}")]
    Malformed(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Forwarding failed: {0}")]
    Forward(#[from] HubError),
}

impl IngestError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Malformed(_) | Self::Forward(_) => false,
            Self::Ledger(e) => e.is_retryable(),
        }
    }
}
