pub mod auth;
pub mod billing;
pub mod stripe;
