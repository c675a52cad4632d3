// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! On-chain withdrawal endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{error::ApiError, models::WithdrawalRequest, state::AppState};

/// Request body for `POST /withdraw`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct WithdrawBody {
    /// Destination EVM address.
    #[schema(example = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8")]
    pub address: String,
    /// Amount in native units (number or decimal string).
    #[schema(value_type = f64, example = 0.5)]
    pub amount: Decimal,
}

/// Withdraw from the custodial address.
///
/// A transaction the node rejects comes back with status `failed` and the
/// node's reason; it is not an HTTP error.
#[utoipa::path(
    post,
    path = "/withdraw",
    tag = "Withdrawals",
    request_body = WithdrawBody,
    responses(
        (status = 200, description = "Withdrawal submitted or rejected by the node", body = WithdrawalRequest),
        (status = 400, description = "Invalid address or amount"),
        (status = 500, description = "Signing failed"),
        (status = 503, description = "Chain peer unavailable")
    )
)]
pub async fn withdraw(
    State(state): State<AppState>,
    Json(body): Json<WithdrawBody>,
) -> Result<Json<WithdrawalRequest>, ApiError> {
    // Run on its own task: a client that disconnects must not cancel a
    // submission half-way.
    let engine = state.withdrawals.clone();
    let request = tokio::spawn(async move {
        engine
            .submit_withdrawal(&body.address, body.amount)
            .await
    })
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "Withdrawal task panicked");
        ApiError::internal("withdrawal task failed")
    })??;

    Ok(Json(request))
}

/// Look up a withdrawal by id.
#[utoipa::path(
    get,
    path = "/withdrawals/{withdrawal_id}",
    tag = "Withdrawals",
    params(
        ("withdrawal_id" = Uuid, Path, description = "Withdrawal ID")
    ),
    responses(
        (status = 200, description = "Withdrawal found", body = WithdrawalRequest),
        (status = 404, description = "Unknown withdrawal")
    )
)]
pub async fn get_withdrawal(
    State(state): State<AppState>,
    Path(withdrawal_id): Path<Uuid>,
) -> Result<Json<WithdrawalRequest>, ApiError> {
    state
        .withdrawals
        .get(withdrawal_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Withdrawal not found"))
}
