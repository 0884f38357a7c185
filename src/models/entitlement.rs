use uuid::Uuid;

/// The atomic write unit for premium entitlement.
///
/// Applying one is a pure overwrite of the premium flag. A `None` customer
/// id never clears a stored customer id. A `None` subscription id clears the
/// stored subscription id only when `premium` is false (the event signalled
/// subscription removal); with `premium` true it leaves the stored id alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementUpdate {
    pub user_id: Uuid,
    pub premium: bool,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
}
