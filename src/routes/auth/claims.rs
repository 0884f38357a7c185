use serde::{Deserialize, Serialize};

/// Access-token claims minted by the account service. This backend only
/// validates them; it never issues tokens.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Claims {
    pub id: String, // user ID or UUID
    pub email: String,
    pub exp: usize, // expiration (as UNIX timestamp)
    pub iss: String,
    pub aud: String,
}
