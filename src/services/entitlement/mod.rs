use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::db::user_repository::UserRepository;
use crate::models::entitlement::EntitlementUpdate;
use crate::services::stripe::{StripeEvent, StripeService, StripeServiceError, SubscriptionInfo};

mod event;

pub use event::{BillingEvent, ResolutionKey};

/// The one predicate deciding premium access from a provider-reported
/// subscription status. Shared by the webhook reconciler and the synchronous
/// status endpoint.
pub fn premium_for_status(status: &str) -> bool {
    matches!(status, "active" | "trialing")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The event resolved to a user and the entitlement overwrite landed.
    Applied { user_id: Uuid, premium: bool },
    /// Neither the internal id nor the customer email matched an account;
    /// there is nothing to reconcile against, so the event is acknowledged.
    Unresolved,
    /// Unrecognized kind or unmet precondition; acknowledged without writes.
    Ignored,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("user store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("billing provider error: {0}")]
    Provider(#[from] StripeServiceError),
}

/// What an event wants the user row to look like. Computed before resolution
/// so a redelivered event recomputes the same overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TargetState {
    premium: bool,
    stripe_customer_id: Option<String>,
    stripe_subscription_id: Option<String>,
}

impl TargetState {
    fn update_for(&self, user_id: Uuid) -> EntitlementUpdate {
        EntitlementUpdate {
            user_id,
            premium: self.premium,
            stripe_customer_id: self.stripe_customer_id.clone(),
            stripe_subscription_id: self.stripe_subscription_id.clone(),
        }
    }
}

/// Applies subscription lifecycle events to user entitlement state.
///
/// Collaborators are injected once at startup; the reconciler itself is
/// stateless and every event is handled from its own payload plus at most one
/// fresh subscription lookup, so concurrent deliveries may race and the last
/// write wins.
#[derive(Clone)]
pub struct EntitlementReconciler {
    db: Arc<dyn UserRepository>,
    stripe: Arc<dyn StripeService>,
}

impl EntitlementReconciler {
    pub fn new(db: Arc<dyn UserRepository>, stripe: Arc<dyn StripeService>) -> Self {
        Self { db, stripe }
    }

    pub async fn process(&self, evt: &StripeEvent) -> Result<EventOutcome, ReconcileError> {
        let event = BillingEvent::from_stripe(evt);
        let (key, target) = match self.target_state(&event).await? {
            Some(pair) => pair,
            None => return Ok(EventOutcome::Ignored),
        };
        self.resolve_and_apply(&key, &target).await
    }

    async fn target_state(
        &self,
        event: &BillingEvent,
    ) -> Result<Option<(ResolutionKey, TargetState)>, ReconcileError> {
        let pair = match event {
            BillingEvent::CheckoutCompleted {
                mode,
                subscription_id,
                key,
            } => {
                if mode.as_deref() != Some("subscription") {
                    info!("ignoring checkout completion outside subscription mode");
                    return Ok(None);
                }
                let sub = self
                    .fresh_subscription(subscription_id.as_deref(), key.customer_id.as_deref())
                    .await?;
                match sub {
                    Some(sub) if premium_for_status(&sub.status) => (
                        key.clone(),
                        TargetState {
                            premium: true,
                            stripe_customer_id: key.customer_id.clone(),
                            stripe_subscription_id: Some(sub.id),
                        },
                    ),
                    _ => {
                        info!("checkout completion without an active subscription; ignoring");
                        return Ok(None);
                    }
                }
            }
            BillingEvent::SubscriptionChanged {
                status,
                subscription_id,
                key,
            } => (
                key.clone(),
                TargetState {
                    premium: premium_for_status(status),
                    stripe_customer_id: key.customer_id.clone(),
                    stripe_subscription_id: subscription_id.clone(),
                },
            ),
            BillingEvent::SubscriptionDeleted { key, .. } => (
                key.clone(),
                TargetState {
                    premium: false,
                    stripe_customer_id: key.customer_id.clone(),
                    // explicit removal: the stored subscription id is cleared
                    stripe_subscription_id: None,
                },
            ),
            BillingEvent::InvoicePaid {
                subscription_id,
                key,
            } => (
                key.clone(),
                TargetState {
                    premium: true,
                    stripe_customer_id: key.customer_id.clone(),
                    stripe_subscription_id: subscription_id.clone(),
                },
            ),
            BillingEvent::InvoicePaymentFailed {
                subscription_id,
                key,
            } => {
                // A failed invoice does not by itself end the subscription;
                // re-derive entitlement from the live subscription state.
                let sub = self
                    .fresh_subscription(subscription_id.as_deref(), key.customer_id.as_deref())
                    .await?;
                match sub {
                    Some(sub) => (
                        key.clone(),
                        TargetState {
                            premium: premium_for_status(&sub.status),
                            stripe_customer_id: key.customer_id.clone(),
                            stripe_subscription_id: Some(sub.id),
                        },
                    ),
                    None => (
                        key.clone(),
                        TargetState {
                            premium: false,
                            stripe_customer_id: key.customer_id.clone(),
                            stripe_subscription_id: None,
                        },
                    ),
                }
            }
            BillingEvent::Unknown { kind } => {
                info!(kind = kind.as_str(), "unhandled billing event acknowledged");
                return Ok(None);
            }
        };

        Ok(Some(pair))
    }

    /// Fetch the subscription named by the event, falling back to scanning
    /// the customer's subscriptions for an active-like one. `None` means the
    /// provider no longer knows the subscription.
    async fn fresh_subscription(
        &self,
        subscription_id: Option<&str>,
        customer_id: Option<&str>,
    ) -> Result<Option<SubscriptionInfo>, ReconcileError> {
        if let Some(id) = subscription_id {
            return match self.stripe.get_subscription(id).await {
                Ok(sub) => Ok(Some(sub)),
                Err(StripeServiceError::NotFound(_)) => Ok(None),
                Err(err) => Err(err.into()),
            };
        }

        let Some(customer_id) = customer_id else {
            return Ok(None);
        };
        match self.stripe.list_subscriptions_for_customer(customer_id).await {
            Ok(subs) => Ok(subs.into_iter().find(|s| premium_for_status(&s.status))),
            Err(StripeServiceError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Resolution policy: the internal id carried in event metadata first;
    /// on a miss or a failed write, the provider customer's email. A write
    /// failure after the fallback has run surfaces to the caller so the
    /// provider redelivers the event.
    async fn resolve_and_apply(
        &self,
        key: &ResolutionKey,
        target: &TargetState,
    ) -> Result<EventOutcome, ReconcileError> {
        if let Some(user_id) = key.user_id {
            match self.db.apply_entitlement_update(&target.update_for(user_id)).await {
                Ok(Some(user)) => {
                    info!(%user_id, premium = user.is_premium, "entitlement applied");
                    return Ok(EventOutcome::Applied {
                        user_id,
                        premium: user.is_premium,
                    });
                }
                Ok(None) => {
                    warn!(%user_id, "no account matches event metadata id; trying email resolution")
                }
                Err(err) => {
                    warn!(?err, %user_id, "entitlement write failed; trying email resolution")
                }
            }
        }

        let Some(email) = self.customer_email(key).await? else {
            warn!("billing event carries no resolvable user reference; acknowledging");
            return Ok(EventOutcome::Unresolved);
        };

        let user = match self.db.find_user_by_email(&email).await? {
            Some(user) => user,
            None => {
                warn!("no account for billing customer email; acknowledging");
                return Ok(EventOutcome::Unresolved);
            }
        };

        match self
            .db
            .apply_entitlement_update(&target.update_for(user.id))
            .await?
        {
            Some(updated) => {
                info!(user_id = %updated.id, premium = updated.is_premium, "entitlement applied via email resolution");
                Ok(EventOutcome::Applied {
                    user_id: updated.id,
                    premium: updated.is_premium,
                })
            }
            None => {
                warn!(user_id = %user.id, "email-resolved account vanished before update; acknowledging");
                Ok(EventOutcome::Unresolved)
            }
        }
    }

    /// Email for the provider customer: embedded in the payload when the
    /// provider sent it, otherwise one customer fetch.
    async fn customer_email(&self, key: &ResolutionKey) -> Result<Option<String>, ReconcileError> {
        if let Some(email) = &key.customer_email {
            return Ok(Some(email.clone()));
        }
        let Some(customer_id) = &key.customer_id else {
            return Ok(None);
        };
        match self.stripe.get_customer(customer_id).await {
            Ok(customer) => Ok(customer.email),
            Err(StripeServiceError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
