// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    models::{Account, WithdrawalRequest, WithdrawalStatus},
    state::AppState,
};

pub mod balance;
pub mod health;
pub mod webhooks;
pub mod withdraw;
pub mod ws;

pub fn router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/balance/{user_id}", get(balance::get_balance))
        .route("/withdraw", post(withdraw::withdraw))
        .route("/withdrawals/{withdrawal_id}", get(withdraw::get_withdrawal))
        .route("/webhooks/ledger", post(webhooks::ledger_webhook))
        .route("/ws/live", get(ws::live))
        .with_state(state);

    Router::new()
        .merge(routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        balance::get_balance,
        withdraw::withdraw,
        withdraw::get_withdrawal,
        webhooks::ledger_webhook
    ),
    components(
        schemas(
            Account,
            WithdrawalRequest,
            WithdrawalStatus,
            withdraw::WithdrawBody,
            webhooks::WebhookAck,
            crate::ingestor::LedgerEventBody,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Ledger", description = "Virtual-ledger balances"),
        (name = "Withdrawals", description = "On-chain withdrawals from the custodial address"),
        (name = "Webhooks", description = "Inbound ledger events")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::webhooks::{payload_hash, PAYLOAD_HASH_HEADER};
    use crate::models::NotificationKind;
    use crate::state::{tests::test_state, ServiceSettings};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let app = router(test_state(ServiceSettings::default()));
        let _ = app.into_make_service();
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = router(test_state(ServiceSettings::default()));
        let response = app
            .oneshot(Request::get("/health/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["checks"]["inFlightNonces"], 0);
        assert!(body["checks"].get("nextNonce").is_none());
    }

    #[tokio::test]
    async fn balance_returns_account_and_announces_changes() {
        let state = test_state(ServiceSettings::default());
        let subscriber = state.hub.subscribe().unwrap();
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(Request::get("/balance/u1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"id": "u1", "balance": 42.0, "currency": "ETH"})
        );
        // First sighting: nothing to compare against.
        assert_eq!(subscriber.pending(), 0);
        assert!(state.accounts.get("u1").is_some());
    }

    #[tokio::test]
    async fn invalid_withdrawals_are_bad_requests() {
        let app = router(test_state(ServiceSettings::default()));

        for body in [
            r#"{"address":"0x123","amount":1}"#,
            r#"{"address":"0x70997970C51812dc3A010C7d01b50e0d17dc79C8","amount":0}"#,
            r#"{"address":"0x70997970C51812dc3A010C7d01b50e0d17dc79C8","amount":-2}"#,
        ] {
            let response = app.clone().oneshot(post_json("/withdraw", body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
            assert!(body_json(response).await["error"].is_string());
        }
    }

    #[tokio::test]
    async fn withdrawal_is_submitted_and_retrievable() {
        let state = test_state(ServiceSettings::default());
        let app = router(state);

        let response = app
            .clone()
            .oneshot(post_json(
                "/withdraw",
                r#"{"address":"0x70997970C51812dc3A010C7d01b50e0d17dc79C8","amount":"0.25"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let created = body_json(response).await;
        assert_eq!(created["status"], "submitted");
        assert_eq!(created["nonce"], 0);

        let id = created["id"].as_str().unwrap();
        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/withdrawals/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["id"], created["id"]);

        let response = app
            .oneshot(
                Request::get(format!("/withdrawals/{}", uuid::Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn webhook_acknowledges_valid_json_even_when_malformed_event() {
        let state = test_state(ServiceSettings::default());
        let subscriber = state.hub.subscribe().unwrap();
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(post_json(
                "/webhooks/ledger",
                r#"{"eventId":"evt-1","type":"INCOMING_PAYMENT","accountId":"acc-1"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "received"}));
        let notification = subscriber.try_recv().unwrap();
        assert!(matches!(notification.kind, NotificationKind::BalanceUpdated(_)));

        let response = app
            .clone()
            .oneshot(post_json("/webhooks/ledger", r#"{"no":"event id"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "received"}));

        let response = app
            .oneshot(post_json("/webhooks/ledger", "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_hash_is_enforced_when_configured() {
        let settings = ServiceSettings {
            webhook_hmac_secret: Some("s3cret".to_string()),
            ..Default::default()
        };
        let state = test_state(settings);
        let app = router(state.clone());
        let body = r#"{"eventId":"evt-h","type":"ACCOUNT_UPDATE"}"#;

        let response = app
            .clone()
            .oneshot(post_json("/webhooks/ledger", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(state.ingestor.is_empty());

        let mut request = post_json("/webhooks/ledger", body);
        request.headers_mut().insert(
            PAYLOAD_HASH_HEADER,
            payload_hash("s3cret", body.as_bytes()).unwrap().parse().unwrap(),
        );
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.ingestor.get("evt-h").await.unwrap().processed);
    }

    #[test]
    fn openapi_lists_public_routes() {
        let doc = ApiDoc::openapi();
        for path in [
            "/balance/{user_id}",
            "/withdraw",
            "/withdrawals/{withdrawal_id}",
            "/webhooks/ledger",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
