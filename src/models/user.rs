use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An application account. Premium entitlement and the two Stripe
/// identifiers are only ever written through
/// `UserRepository::apply_entitlement_update`; signup lives in a separate
/// service and creates rows with `is_premium = false` and no Stripe ids.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: uuid::Uuid,
    pub email: String,
    pub display_name: String,
    pub is_premium: bool,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub created_at: time::OffsetDateTime,
}
