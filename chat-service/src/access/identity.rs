//! Caller identity, as established by the upstream authentication service.
//!
//! The gate treats authentication as a black box: a verified bearer token
//! yields an email, anything else yields an anonymous identity or a 401.

use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

/// The identity attached to a request after authentication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthenticatedIdentity {
    /// Verified email, absent for anonymous callers.
    pub email: Option<String>,
}

impl AuthenticatedIdentity {
    pub fn anonymous() -> Self {
        Self { email: None }
    }

    pub fn of(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.email.is_some()
    }
}

/// Claims issued by the upstream authentication service.
#[derive(Debug, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    pub email: String,
    pub exp: usize,
}

/// Verifies bearer tokens minted by the upstream authentication service.
#[derive(Clone)]
pub struct IdentityVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl IdentityVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Resolve the caller identity from request headers.
    ///
    /// A missing Authorization header is an anonymous caller; a present but
    /// invalid credential is rejected rather than downgraded to anonymous.
    pub fn identify(&self, headers: &HeaderMap) -> Result<AuthenticatedIdentity, AppError> {
        let auth_header = match headers.get("Authorization").and_then(|v| v.to_str().ok()) {
            Some(value) => value,
            None => return Ok(AuthenticatedIdentity::anonymous()),
        };

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Invalid authorization header"))
        })?;

        let claims = decode::<IdentityClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AppError::Unauthorized(anyhow::anyhow!("Invalid token: {}", e)))?
            .claims;

        Ok(AuthenticatedIdentity::of(claims.email))
    }
}
