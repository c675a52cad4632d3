// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Withdrawal Engine
//!
//! Validates, builds, signs and submits withdrawals from the custodial
//! address.
//!
//! ## Pipeline
//!
//! 1. Validate destination and amount (no side effects on failure)
//! 2. Allocate a nonce from the [`NonceSequencer`]
//! 3. Sample the gas price and build a legacy EIP-155 transfer
//! 4. Sign with the custodial key
//! 5. Submit the raw transaction to the chain peer
//!
//! ## Outcomes
//!
//! | Outcome | Request | Returned | Sequencer |
//! |---------|---------|----------|-----------|
//! | Accepted | `Submitted` | `Ok` | nonce spent |
//! | Rejected by node | `Failed` (node reason) | `Ok` | nonce released, resynchronized |
//! | Timeout / connection | `Failed` | `Err(ChainUnavailable)` | nonce released |
//! | Signing failure | `Failed` | `Err(Signing)` | nonce released |
//!
//! A released nonce is handed out again only once the chain peer reports
//! it unused; nonces held by other in-flight withdrawals are never touched.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use alloy::primitives::U256;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::blockchain::{
    parse_address, parse_amount, ChainError, ChainPeer, GasParams, NetworkConfig,
    NonceSequencer, SigningError, TransferSigner, UnsignedTransfer, NATIVE_DECIMALS,
};
use crate::hub::NotificationHub;
use crate::models::{
    InvalidTransition, Notification, NotificationKind, WithdrawalRequest, WithdrawalStatus,
};

pub struct WithdrawalEngine {
    chain: Arc<dyn ChainPeer>,
    nonces: NonceSequencer,
    signer: Arc<dyn TransferSigner>,
    hub: NotificationHub,
    network: NetworkConfig,
    max_amount: Decimal,
    requests: RwLock<HashMap<Uuid, WithdrawalRequest>>,
}

impl WithdrawalEngine {
    pub fn new(
        chain: Arc<dyn ChainPeer>,
        signer: Arc<dyn TransferSigner>,
        hub: NotificationHub,
        network: NetworkConfig,
        max_amount: Decimal,
    ) -> Self {
        let nonces = NonceSequencer::new(chain.clone(), signer.address());
        Self {
            chain,
            nonces,
            signer,
            hub,
            network,
            max_amount,
            requests: RwLock::new(HashMap::new()),
        }
    }

    pub fn nonces(&self) -> &NonceSequencer {
        &self.nonces
    }

    /// Look up a request this engine created.
    pub fn get(&self, id: Uuid) -> Option<WithdrawalRequest> {
        self.requests
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&id)
            .cloned()
    }

    /// Submit a withdrawal of `amount` native units to `address`.
    ///
    /// A node rejection is not an error: the request comes back `Failed`
    /// with the node's reason.
    pub async fn submit_withdrawal(
        &self,
        address: &str,
        amount: Decimal,
    ) -> Result<WithdrawalRequest, WithdrawalError> {
        let to = parse_address(address).map_err(WithdrawalError::InvalidAddress)?;
        let value_wei = self.validate_amount(amount)?;

        let lease = self.nonces.allocate().await.map_err(|e| {
            tracing::warn!(error = %e, "Nonce allocation failed");
            WithdrawalError::ChainUnavailable(e.to_string())
        })?;
        let nonce = lease.nonce();

        let mut request = WithdrawalRequest::new_pending(address, amount, nonce);
        self.record(&request);
        tracing::info!(
            withdrawal_id = %request.id,
            destination = %to,
            %amount,
            nonce,
            "Withdrawal accepted"
        );

        let gas_price = match self.chain.gas_price().await {
            Ok(price) => price,
            Err(e) => {
                lease.release();
                return Err(self.fail_transient(&mut request, e));
            }
        };

        let transfer = UnsignedTransfer {
            chain_id: self.network.chain_id,
            nonce,
            to,
            value_wei,
            gas: GasParams::transfer(gas_price),
        };

        let signed = match self.signer.sign_transfer(transfer) {
            Ok(signed) => signed,
            Err(e) => {
                tracing::error!(withdrawal_id = %request.id, error = %e, "Signing failed");
                lease.release();
                self.finish_failed(&mut request, e.to_string())?;
                return Err(WithdrawalError::Signing(e));
            }
        };
        request.transition(WithdrawalStatus::Signed)?;
        self.record(&request);

        match self.chain.send_raw_transaction(&signed.raw).await {
            Ok(hash) => {
                lease.submitted();
                if hash != signed.hash {
                    tracing::warn!(
                        withdrawal_id = %request.id,
                        local = %signed.hash,
                        reported = %hash,
                        "Chain peer reported a different transaction hash"
                    );
                }
                let tx_hash = hash.to_string();
                let explorer = self.network.explorer_tx_url(&tx_hash);
                request.mark_submitted(tx_hash)?;
                self.record(&request);
                tracing::info!(
                    withdrawal_id = %request.id,
                    tx_hash = %hash,
                    explorer = explorer.as_deref().unwrap_or("-"),
                    "Withdrawal submitted"
                );
                self.emit(NotificationKind::WithdrawalSubmitted(request.clone()));
                Ok(request)
            }
            Err(error) if !error.is_retryable() => {
                let nonce_conflict = error.is_nonce_conflict();
                let reason = match error {
                    ChainError::Rejected(reason) => reason,
                    other => other.to_string(),
                };
                tracing::warn!(
                    withdrawal_id = %request.id,
                    nonce,
                    nonce_conflict,
                    %reason,
                    "Withdrawal rejected by chain peer"
                );
                lease.release();
                // On failure the sequencer stays stale and reseeds lazily.
                if let Err(e) = self.nonces.resync().await {
                    tracing::warn!(error = %e, "Nonce resync after rejection failed");
                }
                self.finish_failed(&mut request, reason)?;
                Ok(request)
            }
            Err(e) => {
                lease.release();
                Err(self.fail_transient(&mut request, e))
            }
        }
    }

    fn validate_amount(&self, amount: Decimal) -> Result<U256, WithdrawalError> {
        if amount <= Decimal::ZERO {
            return Err(WithdrawalError::InvalidAmount(
                "amount must be positive".to_string(),
            ));
        }
        if amount > self.max_amount {
            return Err(WithdrawalError::InvalidAmount(format!(
                "amount exceeds the per-transaction limit of {}",
                self.max_amount
            )));
        }
        parse_amount(amount, NATIVE_DECIMALS)
            .map_err(|e| WithdrawalError::InvalidAmount(e.to_string()))
    }

    fn fail_transient(&self, request: &mut WithdrawalRequest, error: ChainError) -> WithdrawalError {
        tracing::warn!(withdrawal_id = %request.id, error = %error, "Chain peer unavailable");
        let reason = error.to_string();
        if let Err(e) = self.finish_failed(request, reason.clone()) {
            return e;
        }
        WithdrawalError::ChainUnavailable(reason)
    }

    fn finish_failed(
        &self,
        request: &mut WithdrawalRequest,
        reason: String,
    ) -> Result<(), WithdrawalError> {
        request.mark_failed(reason)?;
        self.record(request);
        self.emit(NotificationKind::WithdrawalFailed(request.clone()));
        Ok(())
    }

    fn record(&self, request: &WithdrawalRequest) {
        self.requests
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(request.id, request.clone());
    }

    fn emit(&self, kind: NotificationKind) {
        if let Err(e) = self.hub.broadcast(Notification::new(kind)) {
            tracing::debug!(error = %e, "Withdrawal notification not delivered");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WithdrawalError {
    #[error("Invalid destination address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Chain peer unavailable: {0}")]
    ChainUnavailable(String),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    State(#[from] InvalidTransition),
}

impl WithdrawalError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ChainUnavailable(_))
    }
}
