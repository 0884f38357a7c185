use std::sync::Arc;

use crate::config::Config;
use crate::db::user_repository::UserRepository;
use crate::services::entitlement::EntitlementReconciler;
use crate::services::stripe::StripeService;
use crate::utils::jwt::JwtKeys;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn UserRepository>,
    pub stripe: Arc<dyn StripeService>,
    pub entitlements: EntitlementReconciler,
    pub config: Arc<Config>,
    pub jwt_keys: Arc<JwtKeys>,
}
