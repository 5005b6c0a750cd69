//! Signed tokens for sessions and for the links sent by email.
//!
//! Tokens are HS256 JWTs. Signature checking happens inside `jsonwebtoken`,
//! which compares MACs in constant time.

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Purpose {
    Session,
    EmailVerify,
    PasswordReset,
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Purpose::Session => "session",
            Purpose::EmailVerify => "email-verify",
            Purpose::PasswordReset => "password-reset",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub purpose: Purpose,
    pub iat: i64,
    pub exp: i64,
    /// Fingerprint of mutable user state; the token dies when it changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stamp: Option<String>,
}

impl Claims {
    pub fn subject(&self) -> Result<i32, TokenError> {
        self.sub.parse::<i32>().map_err(|_| TokenError::Malformed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,
    #[error("Token signature is invalid")]
    InvalidSignature,
    #[error("Token could not be decoded")]
    Malformed,
    #[error("Token was issued for {actual}, not {expected}")]
    WrongPurpose { expected: Purpose, actual: Purpose },
    #[error("Token has already been used")]
    Consumed,
    #[error("failed to sign token: {0}")]
    Signing(jsonwebtoken::errors::Error),
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenService {
    pub fn new(secret: &str) -> TokenService {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        TokenService {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn issue(&self, subject: i32, purpose: Purpose, ttl: Duration) -> Result<String, TokenError> {
        self.issue_stamped(subject, purpose, ttl, None)
    }

    pub fn issue_stamped(
        &self,
        subject: i32,
        purpose: Purpose,
        ttl: Duration,
        stamp: Option<String>,
    ) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            purpose,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            stamp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(TokenError::Signing)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                _ => TokenError::Malformed,
            })
    }

    /// Verifies `token` and checks it was issued for `purpose`; returns the
    /// subject id.
    pub fn verify_for(&self, token: &str, purpose: Purpose) -> Result<i32, TokenError> {
        let claims = self.verify_claims_for(token, purpose)?;
        claims.subject()
    }

    pub fn verify_claims_for(&self, token: &str, purpose: Purpose) -> Result<Claims, TokenError> {
        let claims = self.verify(token)?;
        if claims.purpose != purpose {
            return Err(TokenError::WrongPurpose {
                expected: purpose,
                actual: claims.purpose,
            });
        }
        Ok(claims)
    }
}

/// Short fingerprint of a secret value, suitable for a token stamp.
pub fn stamp_of(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(&digest[..8])
}
