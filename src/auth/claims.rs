use serde::{Deserialize, Serialize};

use super::User;

/// JWT claims carried by a session token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionClaims {
    pub sub: String, // User ID (Subject)
    pub email: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub iat: usize,
    pub exp: usize, // Expiration time (UNIX timestamp)
    pub jti: String, // Token ID
    /// The user's sign-out epoch when the token was issued.
    #[serde(default)]
    pub epoch: u64,
}

impl SessionClaims {
    pub fn user(&self) -> User {
        User {
            id: self.sub.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            avatar_url: self.avatar.clone(),
        }
    }
}
