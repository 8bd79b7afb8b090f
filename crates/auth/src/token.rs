//! Token issuance and stateless validation.
//!
//! Tokens are compact JWS (HS256) carrying [`Claims`]. The header `kid` names
//! the signing key so validation can pick the current or, inside the grace
//! window, the previous key.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header, encode};
use serde::Serialize;
use tracing::debug;

use keyward_core::{AuthConfig, AuthError, TokenId, TokenType};

use crate::claims::{Claims, validate_claims};
use crate::keys::SigningKeyProvider;
use crate::principal::Principal;

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Lifetimes used by the token service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenConfig {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// How long the previous key keeps validating after a rotation.
    pub key_grace: Duration,
}

impl From<&AuthConfig> for TokenConfig {
    fn from(config: &AuthConfig) -> Self {
        Self {
            access_ttl: config.access_ttl(),
            refresh_ttl: config.refresh_ttl(),
            key_grace: config.key_grace(),
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self::from(&AuthConfig::default())
    }
}

/// A freshly minted token together with the claims it encodes.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

/// Access + refresh token handed to the caller after login or refresh.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    #[serde(skip)]
    pub access_id: TokenId,
    #[serde(skip)]
    pub refresh_id: TokenId,
}

impl TokenPair {
    pub fn new(access: IssuedToken, refresh: IssuedToken) -> Self {
        Self {
            access_expires_at: access.claims.expires_at(),
            refresh_expires_at: refresh.claims.expires_at(),
            access_id: access.claims.jti,
            refresh_id: refresh.claims.jti,
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer",
        }
    }
}

/// Mints and verifies signed tokens.
///
/// Issuance always signs with the current key. Validation is pure: it never
/// touches the session store, so refresh-token liveness is checked by the
/// caller on top of this.
#[derive(Clone)]
pub struct TokenService {
    keys: Arc<dyn SigningKeyProvider>,
    config: TokenConfig,
}

impl TokenService {
    pub fn new(keys: Arc<dyn SigningKeyProvider>, config: TokenConfig) -> Self {
        Self { keys, config }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn issue_access(&self, principal: &Principal, now: DateTime<Utc>) -> Result<IssuedToken, AuthError> {
        self.issue(principal, TokenType::Access, self.config.access_ttl, now)
    }

    pub fn issue_refresh(&self, principal: &Principal, now: DateTime<Utc>) -> Result<IssuedToken, AuthError> {
        self.issue(principal, TokenType::Refresh, self.config.refresh_ttl, now)
    }

    /// Mint a token of `typ` for the subject and roles of already-validated claims.
    pub(crate) fn reissue(
        &self,
        claims: &Claims,
        typ: TokenType,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthError> {
        let ttl = match typ {
            TokenType::Access => self.config.access_ttl,
            TokenType::Refresh => self.config.refresh_ttl,
        };
        self.sign(claims.sub.clone(), claims.roles.clone(), typ, ttl, now)
    }

    fn issue(
        &self,
        principal: &Principal,
        typ: TokenType,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthError> {
        self.sign(principal.username.clone(), principal.roles.clone(), typ, ttl, now)
    }

    fn sign(
        &self,
        sub: keyward_core::Username,
        roles: Vec<crate::Role>,
        typ: TokenType,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthError> {
        let keys = self.keys.keys();
        let key = keys.current();

        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| AuthError::internal(format!("{typ} token lifetime {ttl} is out of range")))?;
        let claims = Claims {
            sub,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            typ,
            jti: TokenId::new(),
            roles,
        };

        let mut header = Header::new(ALGORITHM);
        header.kid = Some(key.kid().to_string());

        let token = encode(&header, &claims, key.encoding())
            .map_err(|e| AuthError::internal(format!("token signing failed: {e}")))?;

        Ok(IssuedToken { token, claims })
    }

    /// Verify signature, expiry and type.
    ///
    /// Check order: structure, signing key, signature, expiry, type.
    pub fn validate(&self, token: &str, expected: TokenType, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let header = decode_header(token).map_err(classify)?;
        if header.alg != ALGORITHM {
            debug!(alg = ?header.alg, "rejecting token with unexpected algorithm");
            return Err(AuthError::SignatureInvalid);
        }

        let keys = self.keys.keys();
        let key = keys
            .resolve(header.kid.as_deref(), now, self.config.key_grace)
            .ok_or(AuthError::SignatureInvalid)?;

        let mut validation = Validation::new(ALGORITHM);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let data = decode::<Claims>(token, key.decoding(), &validation).map_err(classify)?;
        validate_claims(&data.claims, expected, now)?;

        Ok(data.claims)
    }
}

impl core::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn classify(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => AuthError::SignatureInvalid,
        ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::malformed(err.to_string()),
    }
}
