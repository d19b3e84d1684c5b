//! Identity-token verification.
//!
//! Credential checks and token minting belong to the login flow; the
//! delivery core only needs to turn a presented token into a [`UserId`].
//! [`IdentityVerifier`] is that seam, [`JwtVerifier`] the HS256 implementation.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use pinchat_shared::UserId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    Expired,

    #[error("Token encoding failed: {0}")]
    Encoding(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::InvalidToken,
        }
    }
}

/// Turns a presented identity token into the user it was issued for.
pub trait IdentityVerifier: Send + Sync {
    fn verify_identity_token(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Claims carried by an identity token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID).
    pub sub: String,
    /// Issued at timestamp.
    pub iat: i64,
    /// Expiration timestamp.
    pub exp: i64,
}

/// HS256 identity tokens.
#[derive(Clone)]
pub struct JwtVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_hours: u64,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("ttl_hours", &self.ttl_hours)
            .finish_non_exhaustive()
    }
}

impl JwtVerifier {
    pub fn new(secret: &str, ttl_hours: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl_hours,
        }
    }

    /// Mint a token for `user`, valid for the configured lifetime.
    pub fn issue_token(&self, user: UserId) -> Result<String, AuthError> {
        let now = Utc::now();
        let expires = i64::try_from(self.ttl_hours)
            .ok()
            .and_then(Duration::try_hours)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                AuthError::Encoding(format!("token lifetime out of range: {}h", self.ttl_hours))
            })?;
        let claims = Claims {
            sub: user.to_string(),
            iat: now.timestamp(),
            exp: expires.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Encoding(e.to_string()))
    }
}

impl IdentityVerifier for JwtVerifier {
    fn verify_identity_token(&self, token: &str) -> Result<UserId, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())?;
        UserId::parse(&data.claims.sub).map_err(|_| AuthError::InvalidToken)
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
