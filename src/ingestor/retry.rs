// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Background task that re-runs webhook events whose forwarding failed.
//!
//! Every `interval` the worker calls
//! [`EventIngestor::retry_unprocessed`]. Shutdown goes through a
//! `tokio_util::sync::CancellationToken`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::EventIngestor;

pub struct RetryWorker {
    ingestor: Arc<EventIngestor>,
    interval: Duration,
}

impl RetryWorker {
    pub fn new(ingestor: Arc<EventIngestor>, interval: Duration) -> Self {
        Self { ingestor, interval }
    }

    /// Run until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(worker.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Webhook retry worker starting"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Webhook retry worker shutting down");
                    return;
                }
            }

            let report = self.ingestor.retry_unprocessed().await;
            if report.attempted > 0 {
                info!(
                    attempted = report.attempted,
                    processed = report.processed,
                    failed = report.failed,
                    parked = report.parked,
                    "Webhook retry sweep finished"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::NotificationHub;
    use crate::ingestor::tests::{ingestor_with, StubLedger};
    use serde_json::json;

    #[tokio::test]
    async fn worker_retries_until_processed_and_stops_on_cancel() {
        let ledger = Arc::new(StubLedger::failing(2));
        let ingestor = Arc::new(ingestor_with(ledger, NotificationHub::default()));

        let event = json!({
            "eventId": "evt-retry",
            "type": "INCOMING_PAYMENT",
            "payload": {"accountId": "acc-1"}
        });
        assert!(ingestor.ingest(event).await.is_err());

        let shutdown = CancellationToken::new();
        let worker = RetryWorker::new(ingestor.clone(), Duration::from_millis(10));
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if ingestor.get("evt-retry").await.is_some_and(|e| e.processed) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("event was never processed");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}
