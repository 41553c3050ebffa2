use serde::{Deserialize, Serialize};

/// JWT payload of an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,        // user ID
    pub roles: Vec<String>, // ROLE_-prefixed authorities
    pub iat: usize,         // issued at (unix timestamp)
    pub exp: usize,         // expires at (unix timestamp)
    pub iss: String,        // issuer
    pub aud: String,        // audience
}

/// Validated identity taken from an access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIdentity {
    pub subject: i64,
    pub roles: Vec<String>,
}

/// Uppercases and adds the `ROLE_` prefix when missing.
pub fn normalize_role(raw: &str) -> String {
    let upper = raw.trim().to_ascii_uppercase();
    if upper.starts_with("ROLE_") {
        upper
    } else {
        format!("ROLE_{upper}")
    }
}
