// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Virtual-ledger balance endpoint.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    error::ApiError,
    models::{Account, Notification, NotificationKind},
    state::AppState,
};

/// Get a user's virtual-ledger account.
///
/// Always reads through to the ledger service. When the balance differs
/// from the last value seen for this user, subscribers get a
/// `balance_updated` notification.
#[utoipa::path(
    get,
    path = "/balance/{user_id}",
    tag = "Ledger",
    params(
        ("user_id" = String, Path, description = "Ledger account / user identifier")
    ),
    responses(
        (status = 200, description = "Account retrieved", body = Account),
        (status = 502, description = "Ledger returned an unusable response"),
        (status = 503, description = "Ledger service unavailable")
    )
)]
pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Account>, ApiError> {
    let account = state.ledger.fetch_account(&user_id).await.map_err(|e| {
        tracing::warn!(%user_id, error = %e, "Balance lookup failed");
        ApiError::from(e)
    })?;

    let previous = state.accounts.put(&user_id, account.clone());
    if previous.is_some_and(|previous| previous != account) {
        let notification = Notification::new(NotificationKind::BalanceUpdated(account.clone()));
        if let Err(e) = state.hub.broadcast(notification) {
            tracing::debug!(error = %e, "Balance change not broadcast");
        }
    }

    Ok(Json(account))
}
