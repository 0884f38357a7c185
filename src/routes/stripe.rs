use axum::Json;
use axum::{extract::State, http::HeaderMap, response::IntoResponse};
use axum::{http::StatusCode, response::Response};
use tracing::{error, info, warn};

use crate::responses::JsonResponse;
use crate::services::entitlement::EventOutcome;
use crate::state::AppState;

// POST /api/billing/webhook
//
// The provider retries on any non-2xx, so only a genuine reconciliation
// failure is allowed to produce one; events we cannot act on are acknowledged.
pub async fn webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let sig = match headers
        .get("Stripe-Signature")
        .and_then(|h| h.to_str().ok())
    {
        Some(s) => s,
        None => return JsonResponse::bad_request("Missing Stripe-Signature").into_response(),
    };

    let evt = match app_state.stripe.verify_webhook(&body, sig) {
        Ok(e) => e,
        Err(err) => {
            warn!(?err, "stripe webhook verification failed");
            return (StatusCode::BAD_REQUEST, "invalid webhook").into_response();
        }
    };

    let evt_type = evt.r#type.as_str();
    match app_state.entitlements.process(&evt).await {
        Ok(EventOutcome::Applied { user_id, premium }) => {
            info!(%user_id, premium, evt_type, "processed billing event");
        }
        Ok(EventOutcome::Unresolved) => {
            warn!(evt_type, "billing event received but user not identified");
        }
        Ok(EventOutcome::Ignored) => {}
        Err(err) => {
            error!(
                ?err,
                evt_type,
                event_id = evt.id.as_str(),
                "billing event reconciliation failed"
            );
            return JsonResponse::server_error("Failed to process event").into_response();
        }
    }

    Json(serde_json::json!({ "received": true })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, StripeSettings};
    use crate::db::mock_db::MockDb;
    use crate::models::user::User;
    use crate::services::entitlement::EntitlementReconciler;
    use crate::services::stripe::MockStripeService;
    use crate::utils::jwt::JwtKeys;
    use axum::extract::State as AxumState;
    use axum::http::{HeaderMap, HeaderValue};
    use std::sync::Arc;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            database_url: String::new(),
            frontend_origin: "https://app.example.com".into(),
            stripe: StripeSettings {
                secret_key: "stub".into(),
                webhook_secret: "0123456789abcdef0123456789ABCDEF".into(),
                premium_price_id: "price_premium".into(),
            },
            jwt_issuer: "test-issuer".into(),
            jwt_audience: "test-audience".into(),
        })
    }

    fn test_state(db: Arc<MockDb>, stripe: Arc<MockStripeService>) -> AppState {
        AppState {
            entitlements: EntitlementReconciler::new(db.clone(), stripe.clone()),
            db,
            stripe,
            config: test_config(),
            jwt_keys: Arc::new(
                JwtKeys::from_secret("0123456789abcdef0123456789abcdef")
                    .expect("test JWT secret should be valid"),
            ),
        }
    }

    fn test_user(email: &str, premium: bool) -> User {
        User {
            id: Uuid::new_v4(),
            email: email.into(),
            display_name: "Listener".into(),
            is_premium: premium,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn signed_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Stripe-Signature", HeaderValue::from_static("t=1,v1=stub"));
        headers
    }

    #[tokio::test]
    async fn webhook_missing_signature_header_is_rejected() {
        let db = Arc::new(MockDb::default());
        let stripe = Arc::new(MockStripeService::new());
        let state = test_state(db.clone(), stripe);

        let body = serde_json::json!({ "id": "evt_1", "type": "invoice.paid", "data": { "object": {} } });
        let resp = webhook(
            AxumState(state),
            HeaderMap::new(),
            axum::body::Bytes::from(serde_json::to_vec(&body).unwrap()),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(db.applied_updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn webhook_failed_verification_never_touches_the_store() {
        let user = test_user("u1@example.com", false);
        let user_id = user.id;
        let db = Arc::new(MockDb::with_user(user));
        let stripe = Arc::new(MockStripeService::new());
        *stripe.reject_webhooks.lock().unwrap() = true;
        let state = test_state(db.clone(), stripe);

        // Well-formed payload that would grant premium if it were processed
        let body = serde_json::json!({
            "id": "evt_2",
            "type": "customer.subscription.updated",
            "data": { "object": {
                "id": "sub_1",
                "status": "active",
                "customer": "cus_1",
                "metadata": { "user_id": user_id.to_string() }
            } }
        });
        let resp = webhook(
            AxumState(state),
            signed_headers(),
            axum::body::Bytes::from(serde_json::to_vec(&body).unwrap()),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(db.applied_updates.lock().unwrap().is_empty());
        assert!(!db.user(user_id).unwrap().is_premium);
    }

    #[tokio::test]
    async fn webhook_applies_subscription_update() {
        let user = test_user("u1@example.com", false);
        let user_id = user.id;
        let db = Arc::new(MockDb::with_user(user));
        let stripe = Arc::new(MockStripeService::new());
        let state = test_state(db.clone(), stripe);

        let body = serde_json::json!({
            "id": "evt_3",
            "type": "customer.subscription.updated",
            "data": { "object": {
                "id": "sub_1",
                "status": "active",
                "customer": "cus_1",
                "metadata": { "user_id": user_id.to_string() }
            } }
        });
        let resp = webhook(
            AxumState(state),
            signed_headers(),
            axum::body::Bytes::from(serde_json::to_vec(&body).unwrap()),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::OK);
        let stored = db.user(user_id).unwrap();
        assert!(stored.is_premium);
        assert_eq!(stored.stripe_subscription_id.as_deref(), Some("sub_1"));
    }

    #[tokio::test]
    async fn webhook_acknowledges_unknown_kind() {
        let db = Arc::new(MockDb::default());
        let stripe = Arc::new(MockStripeService::new());
        let state = test_state(db.clone(), stripe);

        let body = serde_json::json!({
            "id": "evt_4",
            "type": "charge.refunded",
            "data": { "object": { "id": "ch_1" } }
        });
        let resp = webhook(
            AxumState(state),
            signed_headers(),
            axum::body::Bytes::from(serde_json::to_vec(&body).unwrap()),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(db.applied_updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn webhook_acknowledges_unresolved_user() {
        let db = Arc::new(MockDb::default());
        let stripe = Arc::new(MockStripeService::new());
        let state = test_state(db.clone(), stripe);

        let body = serde_json::json!({
            "id": "evt_5",
            "type": "customer.subscription.deleted",
            "data": { "object": { "id": "sub_9", "customer": "cus_unknown" } }
        });
        let resp = webhook(
            AxumState(state),
            signed_headers(),
            axum::body::Bytes::from(serde_json::to_vec(&body).unwrap()),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn webhook_reconciliation_failure_returns_500_for_redelivery() {
        let user = test_user("pay@example.com", false);
        let user_id = user.id;
        let db = Arc::new(MockDb::with_user(user));
        db.fail_writes_for.lock().unwrap().push(user_id);
        let stripe = Arc::new(MockStripeService::new());
        let state = test_state(db.clone(), stripe);

        let body = serde_json::json!({
            "id": "evt_6",
            "type": "invoice.paid",
            "data": { "object": { "id": "in_1", "customer": "cus_1", "customer_email": "pay@example.com" } }
        });
        let resp = webhook(
            AxumState(state),
            signed_headers(),
            axum::body::Bytes::from(serde_json::to_vec(&body).unwrap()),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
