#![allow(dead_code)]
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::db::user_repository::UserRepository;
use crate::models::{entitlement::EntitlementUpdate, user::User};

/// In-memory `UserRepository` for handler and reconciler tests. Captures
/// every applied update so assertions can inspect write order and shape.
#[derive(Default)]
pub struct MockDb {
    pub users: Mutex<Vec<User>>,
    pub applied_updates: Mutex<Vec<EntitlementUpdate>>,
    pub customer_id_writes: Mutex<Vec<(Uuid, String)>>,
    /// When true every lookup fails with a protocol error.
    pub fail_lookups: bool,
    /// Entitlement writes against these user ids fail with a protocol error.
    pub fail_writes_for: Mutex<Vec<Uuid>>,
}

impl MockDb {
    pub fn with_user(user: User) -> Self {
        let db = Self::default();
        db.users.lock().unwrap().push(user);
        db
    }

    pub fn user(&self, user_id: Uuid) -> Option<User> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
    }
}

fn mock_failure() -> sqlx::Error {
    sqlx::Error::Protocol("mock db failure".into())
}

#[async_trait]
impl UserRepository for MockDb {
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, sqlx::Error> {
        if self.fail_lookups {
            return Err(mock_failure());
        }
        Ok(self.user(user_id))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        if self.fail_lookups {
            return Err(mock_failure());
        }
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn apply_entitlement_update(
        &self,
        update: &EntitlementUpdate,
    ) -> Result<Option<User>, sqlx::Error> {
        if self.fail_writes_for.lock().unwrap().contains(&update.user_id) {
            return Err(mock_failure());
        }

        let mut users = self.users.lock().unwrap();
        let Some(user) = users.iter_mut().find(|u| u.id == update.user_id) else {
            return Ok(None);
        };

        user.is_premium = update.premium;
        if let Some(customer_id) = &update.stripe_customer_id {
            user.stripe_customer_id = Some(customer_id.clone());
        }
        match (&update.stripe_subscription_id, update.premium) {
            (Some(subscription_id), _) => {
                user.stripe_subscription_id = Some(subscription_id.clone());
            }
            (None, false) => user.stripe_subscription_id = None,
            (None, true) => {}
        }

        let updated = user.clone();
        drop(users);
        self.applied_updates.lock().unwrap().push(update.clone());
        Ok(Some(updated))
    }

    async fn set_stripe_customer_id(
        &self,
        user_id: Uuid,
        stripe_customer_id: &str,
    ) -> Result<(), sqlx::Error> {
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.iter_mut().find(|u| u.id == user_id) {
            user.stripe_customer_id = Some(stripe_customer_id.to_string());
        }
        drop(users);
        self.customer_id_writes
            .lock()
            .unwrap()
            .push((user_id, stripe_customer_id.to_string()));
        Ok(())
    }
}
