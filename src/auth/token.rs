// ARCHITECTURE: Token Service - JWT Issuance, Verification, and Revocation
//
// Access and refresh tokens are distinct types signed with distinct secrets
// and lifetimes. Every issued token carries a fresh jti, which doubles as the
// revocation key: a revoked jti is rejected regardless of signature validity
// until its natural expiry, after which the record is purged to bound memory.
//
// Refresh rotation is single-use. The consume step is an atomic per-key
// insert into the revocation map, so concurrent replays of the same refresh
// token race for one slot: exactly one caller receives a new pair, the rest
// fail with Revoked.

use anyhow::Context;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::error::{Error, Result, TokenError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }

    fn other(&self) -> TokenKind {
        match self {
            TokenKind::Access => TokenKind::Refresh,
            TokenKind::Refresh => TokenKind::Access,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject id.
    pub sub: String,
    /// Expiry (unix seconds) — also the revocation record's natural expiry.
    pub exp: i64,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Unique token id, globally unique per issuance.
    pub jti: String,
    pub iss: String,
    pub aud: String,
    pub role: String,
    pub email: String,
    #[serde(rename = "type")]
    pub kind: TokenKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

pub struct TokenService {
    config: JwtConfig,
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    /// jti -> natural expiry (unix seconds) of explicitly revoked tokens.
    revoked: DashMap<String, i64>,
}

impl TokenService {
    /// Expects a configuration that already passed startup validation.
    pub fn new(config: JwtConfig) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            revoked: DashMap::new(),
            config,
        }
    }

    /// Issue a fresh access/refresh pair for a subject. Each token gets its
    /// own jti and is signed with its kind's secret.
    pub fn issue_pair(&self, subject: &str, role: &str, email: &str) -> Result<TokenPair> {
        let access = self.sign(TokenKind::Access, subject, role, email)?;
        let refresh = self.sign(TokenKind::Refresh, subject, role, email)?;

        debug!(subject = %subject, role = %role, "issued token pair");

        Ok(TokenPair {
            access_token: access,
            refresh_token: refresh,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_ttl_secs,
        })
    }

    /// Validate signature, issuer, audience, expiry, type discriminator, and
    /// revocation state, in that order of failure reporting — except that a
    /// token signed for the other kind always surfaces as WrongType, even
    /// when it is also expired.
    pub fn verify(&self, token: &str, expected: TokenKind) -> std::result::Result<Claims, TokenError> {
        let claims = match decode::<Claims>(token, self.decoding_key(expected), &self.validation(true)) {
            Ok(data) => data.claims,
            Err(err) => {
                return Err(match err.kind() {
                    ErrorKind::ExpiredSignature => TokenError::Expired,
                    // Signed with the other kind's secret means the caller
                    // confused access and refresh tokens.
                    _ if self.decodes_as(token, expected.other()) => TokenError::WrongType,
                    _ => TokenError::InvalidSignature,
                });
            }
        };

        if claims.kind != expected {
            return Err(TokenError::WrongType);
        }
        if self.is_revoked(&claims.jti) {
            return Err(TokenError::Revoked);
        }
        Ok(claims)
    }

    /// Single-use refresh rotation: verify, atomically consume the presented
    /// token's jti, then issue a new pair. Replaying a consumed token fails
    /// with Revoked.
    pub fn rotate(&self, refresh_token: &str) -> Result<TokenPair> {
        let claims = self.verify(refresh_token, TokenKind::Refresh)?;

        // Atomic check-and-mark: the first insert for this jti wins; any
        // concurrent duplicate sees the existing record and loses.
        if self.revoked.insert(claims.jti.clone(), claims.exp).is_some() {
            warn!(subject = %claims.sub, "refresh token replayed after rotation");
            return Err(TokenError::Revoked.into());
        }

        info!(subject = %claims.sub, "rotated refresh token");
        self.issue_pair(&claims.sub, &claims.role, &claims.email)
    }

    /// Insert a revocation record keyed by the token's jti, retained until
    /// the token's natural expiry. Accepts either kind and ignores expiry,
    /// so a logout with an already-expired token still succeeds.
    pub fn revoke(&self, token: &str) -> Result<()> {
        let claims = self.decode_any(token)?;
        self.revoked.insert(claims.jti.clone(), claims.exp);
        info!(subject = %claims.sub, kind = claims.kind.as_str(), "token revoked");
        Ok(())
    }

    pub fn is_revoked(&self, jti: &str) -> bool {
        self.revoked.contains_key(jti)
    }

    /// Drop revocation records past their natural expiry. Called by a
    /// background task so the set stays bounded by the refresh lifetime.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now().timestamp();
        let before = self.revoked.len();
        self.revoked.retain(|_, expiry| *expiry > now);
        let purged = before - self.revoked.len();
        if purged > 0 {
            debug!(purged, remaining = self.revoked.len(), "purged expired revocation records");
        }
        purged
    }

    pub fn revoked_len(&self) -> usize {
        self.revoked.len()
    }

    fn sign(&self, kind: TokenKind, subject: &str, role: &str, email: &str) -> Result<String> {
        let now = Utc::now();
        let ttl = match kind {
            TokenKind::Access => self.config.access_ttl_secs,
            TokenKind::Refresh => self.config.refresh_ttl_secs,
        };
        let claims = Claims {
            sub: subject.to_string(),
            exp: (now + Duration::seconds(ttl)).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            role: role.to_string(),
            email: email.to_string(),
            kind,
        };

        encode(&Header::new(Algorithm::HS256), &claims, self.encoding_key(kind))
            .context("failed to encode token")
            .map_err(Error::Internal)
    }

    fn decoding_key(&self, kind: TokenKind) -> &DecodingKey {
        match kind {
            TokenKind::Access => &self.access_decoding,
            TokenKind::Refresh => &self.refresh_decoding,
        }
    }

    fn encoding_key(&self, kind: TokenKind) -> &EncodingKey {
        match kind {
            TokenKind::Access => &self.access_encoding,
            TokenKind::Refresh => &self.refresh_encoding,
        }
    }

    fn validation(&self, validate_exp: bool) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[&self.config.audience]);
        validation.validate_exp = validate_exp;
        validation.leeway = 0;
        validation
    }

    /// True when the token carries a valid signature for `kind`, expiry aside.
    fn decodes_as(&self, token: &str, kind: TokenKind) -> bool {
        decode::<Claims>(token, self.decoding_key(kind), &self.validation(false))
            .map(|data| data.claims.kind == kind)
            .unwrap_or(false)
    }

    /// Lenient decode for revocation: try both kinds, ignore expiry.
    fn decode_any(&self, token: &str) -> std::result::Result<Claims, TokenError> {
        for kind in [TokenKind::Access, TokenKind::Refresh] {
            if let Ok(data) =
                decode::<Claims>(token, self.decoding_key(kind), &self.validation(false))
            {
                return Ok(data.claims);
            }
        }
        Err(TokenError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use std::sync::Arc;

    fn service() -> TokenService {
        TokenService::new(test_config().jwt)
    }

    #[test]
    fn issued_access_token_verifies_round_trip() {
        let tokens = service();
        let pair = tokens.issue_pair("u1", "admin", "u1@library.test").unwrap();

        let claims = tokens.verify(&pair.access_token, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.role, "admin");
        assert_eq!(claims.email, "u1@library.test");
        assert_eq!(claims.kind, TokenKind::Access);
    }

    #[test]
    fn pair_carries_distinct_jtis() {
        let tokens = service();
        let pair = tokens.issue_pair("u1", "borrower", "u1@library.test").unwrap();

        let access = tokens.verify(&pair.access_token, TokenKind::Access).unwrap();
        let refresh = tokens.verify(&pair.refresh_token, TokenKind::Refresh).unwrap();
        assert_ne!(access.jti, refresh.jti);
    }

    #[test]
    fn wrong_type_is_rejected_in_both_directions() {
        let tokens = service();
        let pair = tokens.issue_pair("u1", "borrower", "u1@library.test").unwrap();

        assert_eq!(
            tokens.verify(&pair.refresh_token, TokenKind::Access).unwrap_err(),
            TokenError::WrongType
        );
        assert_eq!(
            tokens.verify(&pair.access_token, TokenKind::Refresh).unwrap_err(),
            TokenError::WrongType
        );
    }

    #[test]
    fn garbage_token_is_invalid_signature() {
        let tokens = service();
        assert_eq!(
            tokens.verify("not.a.token", TokenKind::Access).unwrap_err(),
            TokenError::InvalidSignature
        );
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let tokens = service();
        let mut other_config = test_config().jwt;
        other_config.access_secret = "a-completely-different-secret-0123456789".to_string();
        let other = TokenService::new(other_config);

        let pair = other.issue_pair("u1", "borrower", "u1@library.test").unwrap();
        assert_eq!(
            tokens.verify(&pair.access_token, TokenKind::Access).unwrap_err(),
            TokenError::InvalidSignature
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        let mut config = test_config().jwt;
        config.access_ttl_secs = -10;
        let tokens = TokenService::new(config);

        let pair = tokens.issue_pair("u1", "borrower", "u1@library.test").unwrap();
        assert_eq!(
            tokens.verify(&pair.access_token, TokenKind::Access).unwrap_err(),
            TokenError::Expired
        );
    }

    #[test]
    fn revoked_token_is_rejected_until_purged() {
        let tokens = service();
        let pair = tokens.issue_pair("u1", "borrower", "u1@library.test").unwrap();
        let jti = tokens
            .verify(&pair.access_token, TokenKind::Access)
            .unwrap()
            .jti;

        tokens.revoke(&pair.access_token).unwrap();
        assert!(tokens.is_revoked(&jti));
        assert_eq!(
            tokens.verify(&pair.access_token, TokenKind::Access).unwrap_err(),
            TokenError::Revoked
        );
    }

    #[test]
    fn revoking_an_expired_token_still_succeeds() {
        let mut config = test_config().jwt;
        config.access_ttl_secs = -10;
        let tokens = TokenService::new(config);

        let pair = tokens.issue_pair("u1", "borrower", "u1@library.test").unwrap();
        tokens.revoke(&pair.access_token).unwrap();
        assert_eq!(tokens.revoked_len(), 1);
    }

    #[test]
    fn purge_drops_only_naturally_expired_records() {
        let mut config = test_config().jwt;
        config.access_ttl_secs = -10;
        let tokens = TokenService::new(config);

        let expired = tokens.issue_pair("u1", "borrower", "u1@library.test").unwrap();
        let live = tokens.issue_pair("u2", "borrower", "u2@library.test").unwrap();
        tokens.revoke(&expired.access_token).unwrap();
        tokens.revoke(&live.refresh_token).unwrap();

        assert_eq!(tokens.purge_expired(), 1);
        assert_eq!(tokens.revoked_len(), 1);
    }

    #[test]
    fn rotation_is_single_use_and_issues_fresh_jtis() {
        let tokens = service();
        let pair = tokens.issue_pair("u1", "librarian", "u1@library.test").unwrap();
        let old_jti = tokens
            .verify(&pair.refresh_token, TokenKind::Refresh)
            .unwrap()
            .jti;

        let rotated = tokens.rotate(&pair.refresh_token).unwrap();
        let new_access = tokens.verify(&rotated.access_token, TokenKind::Access).unwrap();
        let new_refresh = tokens.verify(&rotated.refresh_token, TokenKind::Refresh).unwrap();
        assert_eq!(new_access.sub, "u1");
        assert_eq!(new_access.role, "librarian");
        assert_ne!(new_access.jti, old_jti);
        assert_ne!(new_refresh.jti, old_jti);

        // Replay of the consumed token.
        match tokens.rotate(&pair.refresh_token) {
            Err(Error::Token(TokenError::Revoked)) => {}
            other => panic!("expected Revoked, got {other:?}"),
        }
    }

    #[test]
    fn rotate_rejects_an_explicitly_revoked_token() {
        let tokens = service();
        let pair = tokens.issue_pair("u1", "borrower", "u1@library.test").unwrap();
        tokens.revoke(&pair.refresh_token).unwrap();

        match tokens.rotate(&pair.refresh_token) {
            Err(Error::Token(TokenError::Revoked)) => {}
            other => panic!("expected Revoked, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_duplicate_rotation_has_exactly_one_winner() {
        let tokens = Arc::new(service());
        let pair = tokens.issue_pair("u1", "borrower", "u1@library.test").unwrap();
        let refresh = pair.refresh_token;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let tokens = Arc::clone(&tokens);
            let refresh = refresh.clone();
            handles.push(tokio::spawn(async move { tokens.rotate(&refresh) }));
        }

        let mut winners = 0;
        let mut revoked = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(Error::Token(TokenError::Revoked)) => revoked += 1,
                other => panic!("unexpected rotation outcome: {other:?}"),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(revoked, 15);
    }
}
