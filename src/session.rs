use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::crypto::constant_time_eq;

const SESSION_AUDIENCE: &str = "guestlist-share-session";

/// Stateless bearer sessions for verified share recipients.
///
/// A session carries the share id and share token it was minted for, and is
/// only accepted when presented against that same share token. There is no
/// server-side record, so a session lives until `exp`.
#[derive(Clone)]
pub struct SessionIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    ttl: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    pub sid: Uuid,
    pub share_token: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct MintedSession {
    pub token: String,
    pub expires_in: i64,
    pub expires_at: DateTime<Utc>,
}

impl SessionIssuer {
    pub fn new(secret: &str, issuer: impl Into<String>, ttl_seconds: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            &config.session_secret,
            config.jwt_issuer.clone(),
            config.session_ttl_seconds,
        )
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl.num_seconds()
    }

    pub fn mint(
        &self,
        share_id: Uuid,
        share_token: &str,
        now: DateTime<Utc>,
    ) -> Result<MintedSession> {
        let expires_at = now + self.ttl;
        let claims = SessionClaims {
            sid: share_id,
            share_token: share_token.to_owned(),
            iss: self.issuer.clone(),
            aud: SESSION_AUDIENCE.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        Ok(MintedSession {
            token: encode(&Header::default(), &claims, &self.encoding)?,
            expires_in: self.ttl.num_seconds(),
            expires_at,
        })
    }

    /// Checks signature, expiry against `now`, and that the session belongs to
    /// `expected_share_token`.
    pub fn validate(
        &self,
        token: &str,
        expected_share_token: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionClaims> {
        let mut validation = Validation::default();
        validation.set_audience(&[SESSION_AUDIENCE]);
        validation.set_issuer(&[self.issuer.clone()]);
        validation.validate_exp = false;
        validation.leeway = 0;

        let claims = decode::<SessionClaims>(token, &self.decoding, &validation)?.claims;

        if now.timestamp() >= claims.exp {
            bail!("session expired");
        }
        if !constant_time_eq(&claims.share_token, expected_share_token) {
            bail!("session does not belong to this share");
        }

        Ok(claims)
    }
}
