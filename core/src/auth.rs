//! Credential hashing and dashboard subscriber tokens.
//!
//! This platform has no third-party identity provider to federate with, so
//! `jsonwebtoken` issues a simple, locally-signed HS256 token rather than
//! verifying third-party RS256 tokens against a remote JWKS: the dashboard
//! logs a user in with a password (hashed with `argon2`) and is handed
//! back a short-lived token it presents when opening the broadcast hub's
//! WebSocket connection.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("password hashing failure: {0}")]
    Hash(String),
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else { return false };
    Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberClaims {
    pub sub: String, // user id
    pub exp: usize,
}

pub fn sign_subscriber_token(user_id: Uuid, signing_secret: &str, ttl_secs: i64) -> Result<String, AuthError> {
    let exp = (chrono::Utc::now() + chrono::Duration::seconds(ttl_secs)).timestamp() as usize;
    let claims = SubscriberClaims { sub: user_id.to_string(), exp };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(signing_secret.as_bytes()))
        .map_err(|_| AuthError::InvalidToken)
}

pub fn verify_subscriber_token(token: &str, signing_secret: &str) -> Result<Uuid, AuthError> {
    let data = decode::<SubscriberClaims>(
        token,
        &DecodingKey::from_secret(signing_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AuthError::InvalidToken)?;
    Uuid::parse_str(&data.claims.sub).map_err(|_| AuthError::InvalidToken)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trips_through_hash_and_verify() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong password", &hash));
    }

    #[test]
    fn subscriber_token_round_trips() {
        let id = Uuid::new_v4();
        let token = sign_subscriber_token(id, "test-secret", 3600).unwrap();
        let decoded = verify_subscriber_token(&token, "test-secret").unwrap();
        assert_eq!(decoded, id);
    }

    #[test]
    fn subscriber_token_rejects_wrong_secret() {
        let id = Uuid::new_v4();
        let token = sign_subscriber_token(id, "test-secret", 3600).unwrap();
        assert!(verify_subscriber_token(&token, "other-secret").is_err());
    }
}
