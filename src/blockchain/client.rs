// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JSON-RPC client for the chain peer.

use std::future::IntoFuture;
use std::time::Duration;

use alloy::{
    network::Ethereum,
    primitives::{Address, B256},
    providers::{
        fillers::{BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller},
        Identity, Provider, ProviderBuilder, RootProvider,
    },
    transports::TransportError,
};
use async_trait::async_trait;

use super::types::NetworkConfig;

/// Upper bound on a single RPC round trip.
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Node error fragments that mean our nonce view is out of sync.
const NONCE_CONFLICT_MARKERS: &[&str] = &[
    "nonce too low",
    "nonce too high",
    "already known",
    "known transaction",
    "replacement transaction underpriced",
];

/// HTTP provider type for the chain peer (with all fillers).
type HttpProvider = FillProvider<
    JoinFill<
        Identity,
        JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
    >,
    RootProvider<Ethereum>,
>;

/// The subset of chain-peer RPC the withdrawal path needs.
#[async_trait]
pub trait ChainPeer: Send + Sync {
    /// Pending transaction count of `address` (the next usable nonce).
    async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError>;

    /// Current gas price in wei.
    async fn gas_price(&self) -> Result<u128, ChainError>;

    /// Submit an EIP-2718 encoded signed transaction.
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, ChainError>;
}

/// Chain peer reached over HTTP JSON-RPC.
pub struct RpcChainPeer {
    /// Network configuration
    network: NetworkConfig,
    /// Alloy HTTP provider
    provider: HttpProvider,
}

impl RpcChainPeer {
    /// Create a new client for the specified network.
    pub fn new(network: NetworkConfig) -> Result<Self, ChainError> {
        let url: url::Url = network
            .rpc_url
            .parse()
            .map_err(|e: url::ParseError| ChainError::InvalidRpcUrl(e.to_string()))?;

        let provider = ProviderBuilder::new().connect_http(url);

        Ok(Self { network, provider })
    }

    async fn call<T, F>(&self, method: &'static str, request: F) -> Result<T, ChainError>
    where
        F: IntoFuture<Output = Result<T, TransportError>>,
    {
        match tokio::time::timeout(RPC_TIMEOUT, request.into_future()).await {
            Ok(result) => result.map_err(classify),
            Err(_) => {
                tracing::warn!(method, chain_id = self.network.chain_id, "RPC call timed out");
                Err(ChainError::Unavailable(format!("{method} timed out")))
            }
        }
    }
}

#[async_trait]
impl ChainPeer for RpcChainPeer {
    async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError> {
        self.call(
            "eth_getTransactionCount",
            self.provider.get_transaction_count(address).pending(),
        )
        .await
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        self.call("eth_gasPrice", self.provider.get_gas_price()).await
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, ChainError> {
        let pending = self
            .call(
                "eth_sendRawTransaction",
                self.provider.send_raw_transaction(raw),
            )
            .await?;
        Ok(*pending.tx_hash())
    }
}

/// Split transport failures from node-side rejections.
fn classify(err: TransportError) -> ChainError {
    match err.as_error_resp() {
        Some(payload) => ChainError::Rejected(payload.message.to_string()),
        None => ChainError::Unavailable(err.to_string()),
    }
}

/// Errors that can occur while talking to the chain peer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    /// Timeout, connection failure or unreadable response.
    #[error("Chain peer unavailable: {0}")]
    Unavailable(String),

    /// The node answered with a JSON-RPC error.
    #[error("Rejected by chain peer: {0}")]
    Rejected(String),
}

impl ChainError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Whether the node rejected the transaction over its nonce.
    pub fn is_nonce_conflict(&self) -> bool {
        match self {
            Self::Rejected(reason) => {
                let reason = reason.to_ascii_lowercase();
                NONCE_CONFLICT_MARKERS.iter().any(|m| reason.contains(m))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_conflicts_are_recognised() {
        assert!(ChainError::Rejected("nonce too low: next nonce 5, tx nonce 4".into())
            .is_nonce_conflict());
        assert!(ChainError::Rejected("Already Known".into()).is_nonce_conflict());
        assert!(!ChainError::Rejected("insufficient funds for gas * price + value".into())
            .is_nonce_conflict());
        assert!(!ChainError::Unavailable("nonce too low".into()).is_nonce_conflict());
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(ChainError::Unavailable("timeout".into()).is_retryable());
        assert!(!ChainError::Rejected("insufficient funds".into()).is_retryable());
        assert!(!ChainError::InvalidRpcUrl("x".into()).is_retryable());
    }

    #[test]
    fn invalid_rpc_url_is_rejected() {
        let err = RpcChainPeer::new(NetworkConfig::new(1, "not a url")).err();
        assert!(matches!(err, Some(ChainError::InvalidRpcUrl(_))));
    }

    #[tokio::test]
    async fn unreachable_peer_is_unavailable() {
        // Port 9 (discard) on localhost is closed in test environments.
        let peer = RpcChainPeer::new(NetworkConfig::new(1, "http://127.0.0.1:9")).unwrap();
        let err = peer.gas_price().await.unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err:?}");
    }
}
