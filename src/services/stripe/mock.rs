#![allow(dead_code)]
use super::{
    CheckoutSession, CreateCheckoutSessionRequest, CustomerInfo, StripeEvent, StripeService,
    StripeServiceError, SubscriptionInfo,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Scriptable stand-in for tests. Customers and subscriptions are seeded via
/// the builder helpers; the failure toggles turn individual calls into
/// transient API errors.
#[derive(Clone, Default)]
pub struct MockStripeService {
    pub created_sessions: Arc<Mutex<Vec<CheckoutSession>>>,
    pub last_create_requests: Arc<Mutex<Vec<CreateCheckoutSessionRequest>>>,
    pub created_customers: Arc<Mutex<Vec<String>>>,
    pub customers: Arc<Mutex<HashMap<String, CustomerInfo>>>,
    pub subscriptions: Arc<Mutex<HashMap<String, SubscriptionInfo>>>,
    pub customer_subscriptions: Arc<Mutex<HashMap<String, Vec<SubscriptionInfo>>>>,
    pub reject_webhooks: Arc<Mutex<bool>>,
    pub fail_customer_lookups: Arc<Mutex<bool>>,
    pub fail_subscription_lookups: Arc<Mutex<bool>>,
}

impl MockStripeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_customer(self, customer_id: &str, email: Option<&str>) -> Self {
        self.customers.lock().unwrap().insert(
            customer_id.to_string(),
            CustomerInfo {
                id: customer_id.to_string(),
                email: email.map(|e| e.to_string()),
            },
        );
        self
    }

    pub fn with_subscription(self, subscription_id: &str, status: &str) -> Self {
        let sub = subscription(subscription_id, status);
        self.subscriptions
            .lock()
            .unwrap()
            .insert(sub.id.clone(), sub);
        self
    }

    pub fn with_customer_subscription(
        self,
        customer_id: &str,
        subscription_id: &str,
        status: &str,
    ) -> Self {
        self.customer_subscriptions
            .lock()
            .unwrap()
            .entry(customer_id.to_string())
            .or_default()
            .push(subscription(subscription_id, status));
        self
    }
}

fn subscription(id: &str, status: &str) -> SubscriptionInfo {
    SubscriptionInfo {
        id: id.to_string(),
        status: status.to_string(),
        current_period_end: 4_102_444_800, // far-future period end
        cancel_at: None,
        cancel_at_period_end: false,
    }
}

fn make_id(prefix: &str) -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("{}_{}", prefix, ts)
}

fn transient(call: &str) -> StripeServiceError {
    StripeServiceError::Api(format!("mock transient failure in {}", call))
}

#[async_trait]
impl StripeService for MockStripeService {
    fn verify_webhook(
        &self,
        payload: &[u8],
        _signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError> {
        if *self.reject_webhooks.lock().unwrap() {
            return Err(StripeServiceError::Webhook(
                "mock signature rejection".into(),
            ));
        }
        let val: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| StripeServiceError::Serde(e.to_string()))?;
        let id = match val.get("id").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => make_id("evt"),
        };
        let ty = val
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        Ok(StripeEvent {
            id,
            r#type: ty,
            payload: val,
        })
    }

    async fn get_customer(&self, customer_id: &str) -> Result<CustomerInfo, StripeServiceError> {
        if *self.fail_customer_lookups.lock().unwrap() {
            return Err(transient("get_customer"));
        }
        self.customers
            .lock()
            .unwrap()
            .get(customer_id)
            .cloned()
            .ok_or_else(|| {
                StripeServiceError::NotFound(format!("customer {} not found", customer_id))
            })
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionInfo, StripeServiceError> {
        if *self.fail_subscription_lookups.lock().unwrap() {
            return Err(transient("get_subscription"));
        }
        self.subscriptions
            .lock()
            .unwrap()
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| {
                StripeServiceError::NotFound(format!("subscription {} not found", subscription_id))
            })
    }

    async fn list_subscriptions_for_customer(
        &self,
        customer_id: &str,
    ) -> Result<Vec<SubscriptionInfo>, StripeServiceError> {
        if *self.fail_subscription_lookups.lock().unwrap() {
            return Err(transient("list_subscriptions_for_customer"));
        }
        Ok(self
            .customer_subscriptions
            .lock()
            .unwrap()
            .get(customer_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_customer(
        &self,
        email: &str,
        _name: Option<&str>,
    ) -> Result<String, StripeServiceError> {
        let id = make_id("cus_test");
        self.created_customers.lock().unwrap().push(email.to_string());
        self.customers.lock().unwrap().insert(
            id.clone(),
            CustomerInfo {
                id: id.clone(),
                email: Some(email.to_string()),
            },
        );
        Ok(id)
    }

    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, StripeServiceError> {
        // capture the request
        self.last_create_requests.lock().unwrap().push(req.clone());

        // synthesize a session
        let session = CheckoutSession {
            id: make_id("cs_test"),
            url: Some("https://example.test/checkout".into()),
        };
        self.created_sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }
}
