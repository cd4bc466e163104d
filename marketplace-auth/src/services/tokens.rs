use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::JwtConfig;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Invalid token: {0}")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),

    #[error("Wrong token type: expected {expected:?}, got {actual:?}")]
    WrongKind { expected: TokenKind, actual: TokenKind },

    #[error("Failed to encode token: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),
}

impl TokenError {
    /// True when the token was well-formed and correctly signed but expired.
    pub fn is_expired(&self) -> bool {
        matches!(self, TokenError::InvalidToken(e) if matches!(e.kind(), ErrorKind::ExpiredSignature))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims carried by every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (canonical identity id)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Reference field; the session id for session-bound tokens
    pub jti: String,
    /// Token type
    pub typ: TokenKind,
}

/// Access/refresh pair handed to callers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Signs and verifies tokens with the process-wide shared secret.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(config: &JwtConfig) -> Self {
        let secret = config.secret.expose_secret().as_bytes();

        tracing::info!(algorithm = ?config.algorithm, "Token service initialized");

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            algorithm: config.algorithm,
            access_ttl: Duration::minutes(config.access_token_expiry_minutes),
            refresh_ttl: Duration::days(config.refresh_token_expiry_days),
        }
    }

    /// Issue a token for `subject` valid for `ttl`.
    pub fn issue(&self, subject: &str, kind: TokenKind, ttl: Duration) -> Result<String, TokenError> {
        self.issue_with_reference(subject, kind, ttl, &Uuid::new_v4().to_string())
    }

    /// Issue a token whose `jti` is a caller-chosen reference.
    pub fn issue_with_reference(
        &self,
        subject: &str,
        kind: TokenKind,
        ttl: Duration,
        reference: &str,
    ) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = TokenClaims {
            sub: subject.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            jti: reference.to_string(),
            typ: kind,
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key).map_err(TokenError::Encode)
    }

    pub fn issue_access(&self, subject: &str) -> Result<String, TokenError> {
        self.issue(subject, TokenKind::Access, self.access_ttl)
    }

    pub fn issue_refresh(&self, subject: &str) -> Result<String, TokenError> {
        self.issue(subject, TokenKind::Refresh, self.refresh_ttl)
    }

    /// Validate signature, structure and expiry.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let token_data =
            decode::<TokenClaims>(token, &self.decoding_key, &validation).map_err(TokenError::InvalidToken)?;

        Ok(token_data.claims)
    }

    /// Validate and additionally require a token type.
    pub fn verify_kind(&self, token: &str, expected: TokenKind) -> Result<TokenClaims, TokenError> {
        let claims = self.verify(token)?;
        if claims.typ != expected {
            return Err(TokenError::WrongKind {
                expected,
                actual: claims.typ,
            });
        }
        Ok(claims)
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Access token lifetime in seconds (for client info)
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_ttl.num_seconds()
    }
}
