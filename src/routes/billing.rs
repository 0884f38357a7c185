use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::models::entitlement::EntitlementUpdate;
use crate::models::user::User;
use crate::responses::JsonResponse;
use crate::routes::auth::session::AuthSession;
use crate::services::entitlement::premium_for_status;
use crate::services::stripe::{CheckoutLineItem, CheckoutMode, CreateCheckoutSessionRequest};
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct SubscriptionStatusResponse {
    premium: bool,
    status: Option<String>,
    current_period_end: Option<i64>,
    cancel_at_period_end: Option<bool>,
}

async fn load_session_user(app_state: &AppState, claims_id: &str) -> Result<User, Response> {
    let user_id = match Uuid::parse_str(claims_id) {
        Ok(id) => id,
        Err(_) => return Err(JsonResponse::unauthorized("Invalid user ID").into_response()),
    };

    match app_state.db.find_user_by_id(user_id).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(JsonResponse::not_found("Account not found").into_response()),
        Err(err) => {
            error!(?err, %user_id, "failed to load user account");
            Err(JsonResponse::server_error("Failed to load account").into_response())
        }
    }
}

// GET /api/billing/subscription
//
// Answers from the provider rather than the local row, and writes back any
// drift it finds, so a user who beat a webhook here still sees (and keeps)
// the right entitlement.
pub async fn subscription_status(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
) -> Response {
    let user = match load_session_user(&app_state, &claims.id).await {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    let Some(customer_id) = user.stripe_customer_id.clone() else {
        return Json(SubscriptionStatusResponse {
            premium: false,
            status: None,
            current_period_end: None,
            cancel_at_period_end: None,
        })
        .into_response();
    };

    let subs = match app_state
        .stripe
        .list_subscriptions_for_customer(&customer_id)
        .await
    {
        Ok(subs) => subs,
        Err(err) => {
            error!(?err, user_id = %user.id, customer_id, "failed to fetch subscriptions for status check");
            return JsonResponse::server_error("Failed to reach billing provider").into_response();
        }
    };

    let current = subs.into_iter().find(|s| premium_for_status(&s.status));
    let premium = current.is_some();
    let subscription_id = current.as_ref().map(|s| s.id.clone());

    if premium != user.is_premium || subscription_id != user.stripe_subscription_id {
        let update = EntitlementUpdate {
            user_id: user.id,
            premium,
            stripe_customer_id: Some(customer_id),
            stripe_subscription_id: subscription_id,
        };
        if let Err(err) = app_state.db.apply_entitlement_update(&update).await {
            // The response still reflects provider truth; the row catches up
            // on the next webhook or status check.
            warn!(?err, user_id = %user.id, "failed to persist reconciled entitlement");
        }
    }

    Json(SubscriptionStatusResponse {
        premium,
        status: current.as_ref().map(|s| s.status.clone()),
        current_period_end: current.as_ref().map(|s| s.current_period_end),
        cancel_at_period_end: current.as_ref().map(|s| s.cancel_at_period_end),
    })
    .into_response()
}

// POST /api/billing/checkout
pub async fn create_checkout(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
) -> Response {
    let user = match load_session_user(&app_state, &claims.id).await {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    let customer_id = match user.stripe_customer_id.clone() {
        Some(id) => id,
        None => {
            let id = match app_state
                .stripe
                .create_customer(&user.email, Some(&user.display_name))
                .await
            {
                Ok(id) => id,
                Err(err) => {
                    error!(?err, user_id = %user.id, "failed to create billing customer");
                    return JsonResponse::server_error("Failed to create billing customer")
                        .into_response();
                }
            };
            if let Err(err) = app_state.db.set_stripe_customer_id(user.id, &id).await {
                error!(?err, user_id = %user.id, "failed to persist stripe customer id");
                return JsonResponse::server_error("Failed to save billing customer")
                    .into_response();
            }
            id
        }
    };

    let origin = &app_state.config.frontend_origin;
    let req = CreateCheckoutSessionRequest {
        success_url: format!("{}/premium/success", origin),
        cancel_url: format!("{}/premium", origin),
        mode: CheckoutMode::Subscription,
        line_items: vec![CheckoutLineItem {
            price: app_state.config.stripe.premium_price_id.clone(),
            quantity: 1,
        }],
        client_reference_id: Some(user.id.to_string()),
        customer: Some(customer_id),
        metadata: Some(
            [("user_id".to_string(), user.id.to_string())]
                .into_iter()
                .collect(),
        ),
    };

    match app_state.stripe.create_checkout_session(req).await {
        Ok(session) => {
            Json(serde_json::json!({ "id": session.id, "url": session.url })).into_response()
        }
        Err(err) => {
            error!(?err, user_id = %user.id, "failed to create checkout session");
            JsonResponse::server_error("Failed to start checkout").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, StripeSettings};
    use crate::db::mock_db::MockDb;
    use crate::routes::auth::claims::Claims;
    use crate::services::entitlement::EntitlementReconciler;
    use crate::services::stripe::{CheckoutMode, MockStripeService};
    use crate::utils::jwt::JwtKeys;
    use axum::extract::State as AxumState;
    use axum::http::StatusCode;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};
    use time::OffsetDateTime;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            database_url: String::new(),
            frontend_origin: "https://app.example.com".into(),
            stripe: StripeSettings {
                secret_key: "stub".into(),
                webhook_secret: "whsec_stub".into(),
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
            id: uuid::Uuid::new_v4(),
            email: email.into(),
            display_name: "Listener".into(),
            is_premium: premium,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn session_for(user: &User) -> AuthSession {
        AuthSession(Claims {
            id: user.id.to_string(),
            email: user.email.clone(),
            exp: (SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs()
                + 3600) as usize,
            iss: "test-issuer".into(),
            aud: "test-audience".into(),
        })
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 16 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn status_without_customer_reports_free_tier() {
        let user = test_user("u1@example.com", false);
        let session = session_for(&user);
        let db = Arc::new(MockDb::with_user(user));
        let stripe = Arc::new(MockStripeService::new());
        let state = test_state(db, stripe);

        let resp = subscription_status(AxumState(state), session).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["premium"], false);
        assert!(json["status"].is_null());
    }

    #[tokio::test]
    async fn status_heals_missed_upgrade() {
        let mut user = test_user("u1@example.com", false);
        user.stripe_customer_id = Some("cus_1".into());
        let user_id = user.id;
        let session = session_for(&user);
        let db = Arc::new(MockDb::with_user(user));
        let stripe = Arc::new(
            MockStripeService::new().with_customer_subscription("cus_1", "sub_1", "active"),
        );
        let state = test_state(db.clone(), stripe);

        let resp = subscription_status(AxumState(state), session).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["premium"], true);
        assert_eq!(json["status"], "active");

        // The drift was written back through the same update path the
        // webhook handlers use.
        let stored = db.user(user_id).unwrap();
        assert!(stored.is_premium);
        assert_eq!(stored.stripe_subscription_id.as_deref(), Some("sub_1"));
    }

    #[tokio::test]
    async fn status_downgrades_when_provider_has_no_active_subscription() {
        let mut user = test_user("u1@example.com", true);
        user.stripe_customer_id = Some("cus_1".into());
        user.stripe_subscription_id = Some("sub_stale".into());
        let user_id = user.id;
        let session = session_for(&user);
        let db = Arc::new(MockDb::with_user(user));
        let stripe = Arc::new(MockStripeService::new());
        let state = test_state(db.clone(), stripe);

        let resp = subscription_status(AxumState(state), session).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["premium"], false);

        let stored = db.user(user_id).unwrap();
        assert!(!stored.is_premium);
        assert_eq!(stored.stripe_subscription_id, None);
    }

    #[tokio::test]
    async fn checkout_creates_and_persists_customer_when_missing() {
        let user = test_user("u1@example.com", false);
        let user_id = user.id;
        let session = session_for(&user);
        let db = Arc::new(MockDb::with_user(user));
        let stripe = Arc::new(MockStripeService::new());
        let state = test_state(db.clone(), stripe.clone());

        let resp = create_checkout(AxumState(state), session).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let created = stripe.created_customers.lock().unwrap().clone();
        assert_eq!(created, vec!["u1@example.com".to_string()]);

        let writes = db.customer_id_writes.lock().unwrap().clone();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, user_id);

        let requests = stripe.last_create_requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert_eq!(req.mode, CheckoutMode::Subscription);
        assert_eq!(req.client_reference_id, Some(user_id.to_string()));
        assert_eq!(req.line_items[0].price, "price_premium");
        assert_eq!(
            req.metadata.as_ref().unwrap().get("user_id"),
            Some(&user_id.to_string())
        );

        let json = body_json(resp).await;
        assert_eq!(json["url"], "https://example.test/checkout");
    }

    #[tokio::test]
    async fn checkout_reuses_existing_customer() {
        let mut user = test_user("u1@example.com", false);
        user.stripe_customer_id = Some("cus_existing".into());
        let session = session_for(&user);
        let db = Arc::new(MockDb::with_user(user));
        let stripe = Arc::new(MockStripeService::new());
        let state = test_state(db.clone(), stripe.clone());

        let resp = create_checkout(AxumState(state), session).await;
        assert_eq!(resp.status(), StatusCode::OK);

        assert!(stripe.created_customers.lock().unwrap().is_empty());
        assert!(db.customer_id_writes.lock().unwrap().is_empty());

        let requests = stripe.last_create_requests.lock().unwrap().clone();
        assert_eq!(requests[0].customer.as_deref(), Some("cus_existing"));
    }

    #[tokio::test]
    async fn status_for_unknown_account_is_not_found() {
        let user = test_user("ghost@example.com", false);
        let session = session_for(&user);
        let db = Arc::new(MockDb::default());
        let stripe = Arc::new(MockStripeService::new());
        let state = test_state(db, stripe);

        let resp = subscription_status(AxumState(state), session).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
