//! Administrator identity from HS256 bearer tokens.
//!
//! Tokens carry the admin username in `sub`. Anything that fails to
//! verify (bad signature, wrong issuer, expired, malformed) is treated as
//! an anonymous caller; the coordinator decides whether that is enough.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use rollcall_core::{AdminIdentity, Caller, IdentityProvider};

use crate::server::AppState;

/// Token signing failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The username was empty.
    #[error("username must not be empty")]
    EmptyUsername,
    /// `jsonwebtoken` refused to sign.
    #[error("failed to sign token: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),
}

// Caps configured lifetimes so `now + ttl` cannot overflow.
const MAX_TTL_HOURS: u64 = 24 * 366;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iss: String,
    iat: i64,
    exp: i64,
}

/// Issues and verifies administrator tokens with a shared secret.
pub struct JwtIdentity {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    ttl: Duration,
}

impl JwtIdentity {
    /// Identity provider for `issuer`, signing with `secret`.
    pub fn new(secret: &[u8], issuer: impl Into<String>, ttl_hours: u64) -> Self {
        let issuer = issuer.into();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            issuer,
            ttl: Duration::hours(ttl_hours.min(MAX_TTL_HOURS) as i64),
        }
    }

    /// Mint a token for `username`.
    pub fn issue_token(&self, username: &str) -> Result<String, AuthError> {
        if username.is_empty() {
            return Err(AuthError::EmptyUsername);
        }
        let now = Utc::now();
        let claims = Claims {
            sub: username.to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )?)
    }
}

impl IdentityProvider for JwtIdentity {
    fn authenticate(&self, bearer: Option<&str>) -> Option<AdminIdentity> {
        let token = bearer?;
        match jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) if !data.claims.sub.is_empty() => Some(AdminIdentity {
                username: data.claims.sub,
            }),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "bearer token rejected");
                None
            }
        }
    }
}

/// The token after `Bearer `, if the header is present and well formed.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Extracts the [`Caller`] for a request. Never rejects.
pub struct AuthCaller(pub Caller);

impl FromRequestParts<AppState> for AuthCaller {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let identity = state.identity.authenticate(bearer_token(&parts.headers));
        Ok(Self(Caller::from_identity(identity)))
    }
}

/// Shared handle to whatever identity provider the server was built with.
pub type SharedIdentity = Arc<dyn IdentityProvider>;
