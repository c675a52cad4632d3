// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! throughout the application. Configuration is loaded from the environment
//! once at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LEDGER_API_URL` | Base URL of the virtual-ledger service | `https://api.tatum.io/v3` |
//! | `LEDGER_API_KEY` | API key sent as `x-api-key` | Required |
//! | `CHAIN_RPC_URL` | JSON-RPC endpoint of the chain peer | Required |
//! | `CHAIN_ID` | EIP-155 chain id | Required |
//! | `CHAIN_EXPLORER_URL` | Block explorer base URL | Optional |
//! | `CUSTODIAL_PRIVATE_KEY` | Hex-encoded custodial key | One of key vars required |
//! | `CUSTODIAL_PRIVATE_KEY_PEM_PATH` | Path to a PEM custodial key | One of key vars required |
//! | `MAX_WITHDRAWAL_AMOUNT` | Per-transaction ceiling | `10` |
//! | `SUBSCRIBER_QUEUE_CAPACITY` | Outbound queue size per subscriber | `64` |
//! | `ACCOUNT_CACHE_CAPACITY` | Accounts kept in the local mirror | `1024` |
//! | `INGEST_RETRY_INTERVAL_SECS` | Unprocessed webhook retry period | `30` |
//! | `WEBHOOK_HMAC_SECRET` | Enables `x-payload-hash` verification | Optional |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const LEDGER_API_URL_ENV: &str = "LEDGER_API_URL";
pub const LEDGER_API_KEY_ENV: &str = "LEDGER_API_KEY";
pub const CHAIN_RPC_URL_ENV: &str = "CHAIN_RPC_URL";
pub const CHAIN_ID_ENV: &str = "CHAIN_ID";
pub const CHAIN_EXPLORER_URL_ENV: &str = "CHAIN_EXPLORER_URL";
pub const CUSTODIAL_PRIVATE_KEY_ENV: &str = "CUSTODIAL_PRIVATE_KEY";
pub const CUSTODIAL_PRIVATE_KEY_PEM_PATH_ENV: &str = "CUSTODIAL_PRIVATE_KEY_PEM_PATH";
pub const MAX_WITHDRAWAL_AMOUNT_ENV: &str = "MAX_WITHDRAWAL_AMOUNT";
pub const SUBSCRIBER_QUEUE_CAPACITY_ENV: &str = "SUBSCRIBER_QUEUE_CAPACITY";
pub const ACCOUNT_CACHE_CAPACITY_ENV: &str = "ACCOUNT_CACHE_CAPACITY";
pub const INGEST_RETRY_INTERVAL_ENV: &str = "INGEST_RETRY_INTERVAL_SECS";
pub const WEBHOOK_HMAC_SECRET_ENV: &str = "WEBHOOK_HMAC_SECRET";

/// Environment variable selecting `json` or `pretty` log output.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_LEDGER_API_URL: &str = "https://api.tatum.io/v3";
const DEFAULT_MAX_WITHDRAWAL_AMOUNT: &str = "10";
const DEFAULT_SUBSCRIBER_QUEUE_CAPACITY: usize = 64;
const DEFAULT_ACCOUNT_CACHE_CAPACITY: usize = 1024;
const DEFAULT_INGEST_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Where the custodial signing key comes from.
#[derive(Clone)]
pub enum CustodialKeySource {
    /// Raw hex, with or without `0x` prefix.
    Hex(String),
    /// PEM file on disk (SEC1 or PKCS#8).
    PemFile(String),
}

impl std::fmt::Debug for CustodialKeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hex(_) => f.write_str("Hex(<redacted>)"),
            Self::PemFile(path) => f.debug_tuple("PemFile").field(path).finish(),
        }
    }
}

/// Fully resolved process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub ledger_api_url: String,
    pub ledger_api_key: String,
    pub chain_rpc_url: String,
    pub chain_id: u64,
    pub chain_explorer_url: Option<String>,
    pub custodial_key: CustodialKeySource,
    pub max_withdrawal_amount: Decimal,
    pub subscriber_queue_capacity: usize,
    pub account_cache_capacity: usize,
    pub ingest_retry_interval: Duration,
    pub webhook_hmac_secret: Option<String>,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let custodial_key = match (
            get(CUSTODIAL_PRIVATE_KEY_ENV),
            get(CUSTODIAL_PRIVATE_KEY_PEM_PATH_ENV),
        ) {
            (Some(hex), _) => CustodialKeySource::Hex(hex),
            (None, Some(path)) => CustodialKeySource::PemFile(path),
            (None, None) => return Err(ConfigError::Missing(CUSTODIAL_PRIVATE_KEY_ENV)),
        };

        let max_withdrawal_amount = parse_or(
            MAX_WITHDRAWAL_AMOUNT_ENV,
            get(MAX_WITHDRAWAL_AMOUNT_ENV),
            Decimal::from_str(DEFAULT_MAX_WITHDRAWAL_AMOUNT).map_err(|e| ConfigError::Invalid {
                name: MAX_WITHDRAWAL_AMOUNT_ENV,
                reason: e.to_string(),
            })?,
        )?;
        if max_withdrawal_amount <= Decimal::ZERO {
            return Err(ConfigError::Invalid {
                name: MAX_WITHDRAWAL_AMOUNT_ENV,
                reason: "must be positive".to_string(),
            });
        }

        let retry_secs: u64 = parse_or(
            INGEST_RETRY_INTERVAL_ENV,
            get(INGEST_RETRY_INTERVAL_ENV),
            DEFAULT_INGEST_RETRY_INTERVAL.as_secs(),
        )?;

        Ok(Self {
            host: get(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or(PORT_ENV, get(PORT_ENV), DEFAULT_PORT)?,
            ledger_api_url: get(LEDGER_API_URL_ENV)
                .unwrap_or_else(|| DEFAULT_LEDGER_API_URL.to_string()),
            ledger_api_key: required(LEDGER_API_KEY_ENV)?,
            chain_rpc_url: required(CHAIN_RPC_URL_ENV)?,
            chain_id: parse_or(CHAIN_ID_ENV, Some(required(CHAIN_ID_ENV)?), 0)?,
            chain_explorer_url: get(CHAIN_EXPLORER_URL_ENV),
            custodial_key,
            max_withdrawal_amount,
            subscriber_queue_capacity: parse_or(
                SUBSCRIBER_QUEUE_CAPACITY_ENV,
                get(SUBSCRIBER_QUEUE_CAPACITY_ENV),
                DEFAULT_SUBSCRIBER_QUEUE_CAPACITY,
            )?,
            account_cache_capacity: parse_or(
                ACCOUNT_CACHE_CAPACITY_ENV,
                get(ACCOUNT_CACHE_CAPACITY_ENV),
                DEFAULT_ACCOUNT_CACHE_CAPACITY,
            )?,
            ingest_retry_interval: Duration::from_secs(retry_secs.max(1)),
            webhook_hmac_secret: get(WEBHOOK_HMAC_SECRET_ENV),
        })
    }
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
