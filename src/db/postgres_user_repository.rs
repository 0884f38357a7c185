use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::user_repository::UserRepository;
use crate::models::{entitlement::EntitlementUpdate, user::User};

pub struct PostgresUserRepository {
    pub pool: PgPool,
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id,
                   email,
                   display_name,
                   is_premium,
                   stripe_customer_id,
                   stripe_subscription_id,
                   created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id,
                   email,
                   display_name,
                   is_premium,
                   stripe_customer_id,
                   stripe_subscription_id,
                   created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
    }

    async fn apply_entitlement_update(
        &self,
        update: &EntitlementUpdate,
    ) -> Result<Option<User>, sqlx::Error> {
        // Single-statement overwrite so a redelivered event lands on the same
        // final state. The CASE keeps a stored subscription id unless the
        // update is a downgrade with no replacement id.
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET is_premium = $2,
                stripe_customer_id = COALESCE($3, stripe_customer_id),
                stripe_subscription_id = CASE
                    WHEN $4 IS NULL AND NOT $2 THEN NULL
                    ELSE COALESCE($4, stripe_subscription_id)
                END,
                updated_at = now()
            WHERE id = $1
            RETURNING id,
                      email,
                      display_name,
                      is_premium,
                      stripe_customer_id,
                      stripe_subscription_id,
                      created_at
            "#,
        )
        .bind(update.user_id)
        .bind(update.premium)
        .bind(update.stripe_customer_id.as_deref())
        .bind(update.stripe_subscription_id.as_deref())
        .fetch_optional(&self.pool)
        .await
    }

    async fn set_stripe_customer_id(
        &self,
        user_id: Uuid,
        stripe_customer_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET stripe_customer_id = $2, updated_at = now() WHERE id = $1")
            .bind(user_id)
            .bind(stripe_customer_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
