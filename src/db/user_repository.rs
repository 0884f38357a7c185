use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{entitlement::EntitlementUpdate, user::User};

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, sqlx::Error>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error>;

    /// Overwrite the entitlement columns for one user. Returns `None` when no
    /// row matches the id, which callers treat as a resolution miss rather
    /// than an error. See `EntitlementUpdate` for the field semantics.
    async fn apply_entitlement_update(
        &self,
        update: &EntitlementUpdate,
    ) -> Result<Option<User>, sqlx::Error>;

    /// Persist the Stripe customer id minted for a user ahead of checkout.
    /// Entitlement state is untouched.
    async fn set_stripe_customer_id(
        &self,
        user_id: Uuid,
        stripe_customer_id: &str,
    ) -> Result<(), sqlx::Error>;
}
