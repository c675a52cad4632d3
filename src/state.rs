// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::blockchain::{ChainPeer, CustodialSigner, NetworkConfig};
use crate::config::AppConfig;
use crate::hub::{NotificationHub, DEFAULT_QUEUE_CAPACITY};
use crate::ingestor::EventIngestor;
use crate::ledger::{AccountCache, LedgerGateway};
use crate::withdrawal::WithdrawalEngine;

/// Tunables the service components are built with.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub max_withdrawal_amount: Decimal,
    pub subscriber_queue_capacity: usize,
    pub account_cache_capacity: usize,
    pub webhook_hmac_secret: Option<String>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            max_withdrawal_amount: Decimal::from(10),
            subscriber_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            account_cache_capacity: 1024,
            webhook_hmac_secret: None,
        }
    }
}

impl From<&AppConfig> for ServiceSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_withdrawal_amount: config.max_withdrawal_amount,
            subscriber_queue_capacity: config.subscriber_queue_capacity,
            account_cache_capacity: config.account_cache_capacity,
            webhook_hmac_secret: config.webhook_hmac_secret.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn LedgerGateway>,
    pub accounts: Arc<AccountCache>,
    pub withdrawals: Arc<WithdrawalEngine>,
    pub ingestor: Arc<EventIngestor>,
    pub hub: NotificationHub,
    /// Shared secret for `x-payload-hash`; verification is off when unset.
    pub webhook_hmac_secret: Option<Arc<str>>,
}

impl AppState {
    /// Wire the service components together.
    pub fn new(
        ledger: Arc<dyn LedgerGateway>,
        chain: Arc<dyn ChainPeer>,
        signer: CustodialSigner,
        network: NetworkConfig,
        settings: ServiceSettings,
    ) -> Self {
        let hub = NotificationHub::new(settings.subscriber_queue_capacity);
        let accounts = Arc::new(AccountCache::new(settings.account_cache_capacity));
        let withdrawals = Arc::new(WithdrawalEngine::new(
            chain,
            Arc::new(signer),
            hub.clone(),
            network,
            settings.max_withdrawal_amount,
        ));
        let ingestor = Arc::new(EventIngestor::new(
            ledger.clone(),
            accounts.clone(),
            hub.clone(),
        ));

        Self {
            ledger,
            accounts,
            withdrawals,
            ingestor,
            hub,
            webhook_hmac_secret: settings.webhook_hmac_secret.map(Arc::from),
        }
    }
}
