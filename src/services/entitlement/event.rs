use serde_json::Value;
use uuid::Uuid;

use crate::services::stripe::StripeEvent;

// Small helper: nested json lookup
fn jget<'a>(val: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cur = val;
    for key in path {
        cur = cur.get(*key)?;
    }
    Some(cur)
}

fn extract_str<'a>(val: &'a Value, path: &[&str]) -> Option<&'a str> {
    jget(val, path)?.as_str()
}

// Stripe references are a bare id string, or the expanded object when the
// integration asked for expansion.
fn extract_ref(obj: &Value, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("id").and_then(|v| v.as_str()).map(|s| s.to_string()),
        _ => None,
    }
}

fn extract_user_id(obj: &Value) -> Option<Uuid> {
    // Prefer explicit metadata.user_id
    if let Some(uid) = obj
        .get("metadata")
        .and_then(|m| m.get("user_id"))
        .and_then(|v| v.as_str())
    {
        if let Ok(id) = Uuid::parse_str(uid) {
            return Some(id);
        }
    }
    // Checkout sessions carry the signed-in user as client_reference_id
    if let Some(id_str) = obj.get("client_reference_id").and_then(|v| v.as_str()) {
        if let Ok(id) = Uuid::parse_str(id_str) {
            return Some(id);
        }
    }
    None
}

fn extract_email(obj: &Value) -> Option<String> {
    extract_str(obj, &["customer_details", "email"])
        .or_else(|| extract_str(obj, &["customer_email"]))
        .map(|s| s.to_string())
}

/// The two identification paths an event offers: an internal user id carried
/// in provider metadata, and the provider customer (id and, when the payload
/// embeds it, email).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolutionKey {
    pub user_id: Option<Uuid>,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
}

impl ResolutionKey {
    fn from_object(obj: &Value) -> Self {
        ResolutionKey {
            user_id: extract_user_id(obj),
            customer_id: extract_ref(obj, "customer"),
            customer_email: extract_email(obj),
        }
    }
}

/// The subscription lifecycle events this backend reconciles on, parsed out
/// of the raw webhook envelope. Anything else maps to `Unknown` and is
/// acknowledged without side effects.
#[derive(Debug, Clone, PartialEq)]
pub enum BillingEvent {
    CheckoutCompleted {
        mode: Option<String>,
        subscription_id: Option<String>,
        key: ResolutionKey,
    },
    SubscriptionChanged {
        status: String,
        subscription_id: Option<String>,
        key: ResolutionKey,
    },
    SubscriptionDeleted {
        subscription_id: Option<String>,
        key: ResolutionKey,
    },
    InvoicePaid {
        subscription_id: Option<String>,
        key: ResolutionKey,
    },
    InvoicePaymentFailed {
        subscription_id: Option<String>,
        key: ResolutionKey,
    },
    Unknown {
        kind: String,
    },
}

impl BillingEvent {
    pub fn from_stripe(evt: &StripeEvent) -> Self {
        let empty = Value::Null;
        let obj = jget(&evt.payload, &["data", "object"]).unwrap_or(&empty);
        let key = ResolutionKey::from_object(obj);

        match evt.r#type.as_str() {
            "checkout.session.completed" => BillingEvent::CheckoutCompleted {
                mode: obj.get("mode").and_then(|v| v.as_str()).map(String::from),
                subscription_id: extract_ref(obj, "subscription"),
                key,
            },
            "customer.subscription.created" | "customer.subscription.updated" => {
                BillingEvent::SubscriptionChanged {
                    status: obj
                        .get("status")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown")
                        .to_string(),
                    subscription_id: obj.get("id").and_then(|v| v.as_str()).map(String::from),
                    key,
                }
            }
            "customer.subscription.deleted" => BillingEvent::SubscriptionDeleted {
                subscription_id: obj.get("id").and_then(|v| v.as_str()).map(String::from),
                key,
            },
            "invoice.paid" => BillingEvent::InvoicePaid {
                subscription_id: extract_ref(obj, "subscription"),
                key,
            },
            "invoice.payment_failed" => BillingEvent::InvoicePaymentFailed {
                subscription_id: extract_ref(obj, "subscription"),
                key,
            },
            other => BillingEvent::Unknown {
                kind: other.to_string(),
            },
        }
    }

    pub fn key(&self) -> Option<&ResolutionKey> {
        match self {
            BillingEvent::CheckoutCompleted { key, .. }
            | BillingEvent::SubscriptionChanged { key, .. }
            | BillingEvent::SubscriptionDeleted { key, .. }
            | BillingEvent::InvoicePaid { key, .. }
            | BillingEvent::InvoicePaymentFailed { key, .. } => Some(key),
            BillingEvent::Unknown { .. } => None,
        }
    }
}
