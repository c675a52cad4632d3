// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP client for the virtual-ledger service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use url::Url;

use crate::models::Account;

/// Upper bound on a ledger round trip, including the body.
const LEDGER_TIMEOUT: Duration = Duration::from_secs(10);

const API_KEY_HEADER: &str = "x-api-key";

/// Read access to authoritative account state.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Fetch the current account for `user_id`. No retries.
    async fn fetch_account(&self, user_id: &str) -> Result<Account, LedgerError>;
}

/// Ledger gateway backed by the ledger service's REST API.
#[derive(Debug, Clone)]
pub struct LedgerClient {
    base_url: Url,
    api_key: String,
    http: Client,
}

/// Balance as reported by the ledger: either a flat amount or the
/// `{accountBalance, availableBalance}` object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBalance {
    Flat(Decimal),
    #[serde(rename_all = "camelCase")]
    Detailed {
        account_balance: Decimal,
        #[allow(dead_code)]
        available_balance: Option<Decimal>,
    },
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    id: String,
    balance: RawBalance,
    currency: String,
}

impl TryFrom<RawAccount> for Account {
    type Error = LedgerError;

    fn try_from(raw: RawAccount) -> Result<Self, Self::Error> {
        let balance = match raw.balance {
            RawBalance::Flat(amount) => amount,
            RawBalance::Detailed {
                account_balance, ..
            } => account_balance,
        };
        if balance < Decimal::ZERO {
            return Err(LedgerError::Protocol(format!(
                "negative balance {balance} for account {}",
                raw.id
            )));
        }
        if raw.id.is_empty() || raw.currency.is_empty() {
            return Err(LedgerError::Protocol(
                "account id and currency must not be empty".to_string(),
            ));
        }
        Ok(Account {
            id: raw.id,
            balance,
            currency: raw.currency,
        })
    }
}

impl LedgerClient {
    /// Create a client for the ledger API rooted at `base_url`.
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, LedgerError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| LedgerError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(LedgerError::InvalidBaseUrl(base_url.to_string()));
        }

        let http = Client::builder()
            .timeout(LEDGER_TIMEOUT)
            .build()
            .map_err(|e| LedgerError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            api_key: api_key.into(),
            http,
        })
    }

    fn account_url(&self, user_id: &str) -> Result<Url, LedgerError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| LedgerError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["ledger", "account", user_id]);
        Ok(url)
    }
}

#[async_trait]
impl LedgerGateway for LedgerClient {
    async fn fetch_account(&self, user_id: &str) -> Result<Account, LedgerError> {
        let url = self.account_url(user_id)?;

        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(user_id, status = status.as_u16(), "Ledger returned an error status");
            return Err(LedgerError::Unavailable(format!("ledger returned HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| LedgerError::Unavailable(format!("failed to read body: {e}")))?;

        let raw: RawAccount = serde_json::from_slice(&body)
            .map_err(|e| LedgerError::Protocol(format!("malformed account body: {e}")))?;

        let account = Account::try_from(raw)?;
        tracing::debug!(user_id, account_id = %account.id, "Fetched ledger account");
        Ok(account)
    }
}

/// Errors returned by the ledger gateway.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Invalid ledger API URL: {0}")]
    InvalidBaseUrl(String),

    /// Network failure, timeout or non-success status.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// The ledger answered with a body we cannot accept.
    #[error("Ledger protocol error: {0}")]
    Protocol(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{
        extract::Path,
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::get,
        Json, Router,
    };
    use serde_json::json;
    use std::str::FromStr;

    const API_KEY: &str = "test-key";

    /// Serve `router` on an ephemeral local port and return its base URL.
    pub(crate) async fn spawn_stub(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn stub_account(Path(user_id): Path<String>, headers: HeaderMap) -> impl IntoResponse {
        if headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) != Some(API_KEY) {
            return (StatusCode::UNAUTHORIZED, Json(json!({"message": "bad key"})));
        }
        let body = match user_id.as_str() {
            "flat" => json!({"id": "flat", "balance": 12.5, "currency": "ETH"}),
            "string" => json!({"id": "string", "balance": "0.000000000000000001", "currency": "ETH"}),
            "tatum" => json!({
                "id": "tatum",
                "balance": {"accountBalance": "7.25", "availableBalance": "5"},
                "currency": "ETH",
                "frozen": false
            }),
            "negative" => json!({"id": "negative", "balance": -1, "currency": "ETH"}),
            "malformed" => json!({"unexpected": true}),
            "down" => {
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({"message": "maintenance"})),
                )
            }
            _ => return (StatusCode::NOT_FOUND, Json(json!({"message": "not found"}))),
        };
        (StatusCode::OK, Json(body))
    }

    async fn stub_client(key: &str) -> LedgerClient {
        let router = Router::new().route("/v3/ledger/account/{user_id}", get(stub_account));
        let base = spawn_stub(router).await;
        LedgerClient::new(&format!("{base}/v3/"), key).unwrap()
    }

    #[tokio::test]
    async fn returns_account_for_flat_balance() {
        let client = stub_client(API_KEY).await;
        let account = client.fetch_account("flat").await.unwrap();
        assert_eq!(
            account,
            Account {
                id: "flat".to_string(),
                balance: Decimal::from_str("12.5").unwrap(),
                currency: "ETH".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn accepts_string_and_detailed_balances() {
        let client = stub_client(API_KEY).await;

        let account = client.fetch_account("string").await.unwrap();
        assert_eq!(account.balance, Decimal::from_str("0.000000000000000001").unwrap());

        let account = client.fetch_account("tatum").await.unwrap();
        assert_eq!(account.balance, Decimal::from_str("7.25").unwrap());
    }

    #[tokio::test]
    async fn error_statuses_are_unavailable() {
        let client = stub_client(API_KEY).await;
        assert!(matches!(
            client.fetch_account("down").await,
            Err(LedgerError::Unavailable(_))
        ));
        assert!(matches!(
            client.fetch_account("nobody").await,
            Err(LedgerError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn wrong_api_key_is_unavailable() {
        let client = stub_client("wrong").await;
        let err = client.fetch_account("flat").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn malformed_and_negative_bodies_are_protocol_errors() {
        let client = stub_client(API_KEY).await;
        let err = client.fetch_account("malformed").await.unwrap_err();
        assert!(matches!(err, LedgerError::Protocol(_)));
        assert!(!err.is_retryable());

        assert!(matches!(
            client.fetch_account("negative").await,
            Err(LedgerError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_ledger_is_unavailable() {
        let client = LedgerClient::new("http://127.0.0.1:9", API_KEY).unwrap();
        assert!(matches!(
            client.fetch_account("flat").await,
            Err(LedgerError::Unavailable(_))
        ));
    }

    #[test]
    fn account_url_escapes_user_id() {
        let client = LedgerClient::new("https://api.tatum.io/v3", API_KEY).unwrap();
        let url = client.account_url("a/b c").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.tatum.io/v3/ledger/account/a%2Fb%20c"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(matches!(
            LedgerClient::new("not a url", API_KEY),
            Err(LedgerError::InvalidBaseUrl(_))
        ));
    }
}
