//! Request-path orchestration: login, refresh rotation, validation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tracing::{info, instrument, warn};

use keyward_core::{AuthError, Clock, TokenType, Username};

use crate::audit::{AuditSink, NoopAuditSink, SecurityEvent};
use crate::claims::Claims;
use crate::session::{RevokeOutcome, RotateOutcome, SessionEntry, SessionStore};
use crate::store::with_deadline;
use crate::token::{TokenPair, TokenService};
use crate::verifier::CredentialVerifier;

/// The authentication front door.
///
/// `authenticate` and `refresh` only ever hand out a refresh token after its
/// session entry has been written; `validate` is pure and never touches the
/// store.
pub struct AuthService {
    verifier: CredentialVerifier,
    tokens: TokenService,
    sessions: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl core::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthService")
            .field("verifier", &self.verifier)
            .field("tokens", &self.tokens)
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    pub fn new(
        verifier: CredentialVerifier,
        tokens: TokenService,
        sessions: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store_timeout = verifier.policy().store_timeout;
        Self {
            verifier,
            tokens,
            sessions,
            audit: Arc::new(NoopAuditSink),
            clock,
            store_timeout,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn verifier(&self) -> &CredentialVerifier {
        &self.verifier
    }

    /// Verify credentials and mint a registered token pair.
    ///
    /// Verification failures are returned unchanged and never retried.
    #[instrument(skip(self, secret), fields(username = %username))]
    pub async fn authenticate(&self, username: &Username, secret: &SecretString) -> Result<TokenPair, AuthError> {
        let now = self.clock.now();

        let principal = match self.verifier.verify(username, secret).await {
            Ok(principal) => principal,
            Err(err) => {
                self.audit.record(SecurityEvent::AuthenticationFailed {
                    username: username.clone(),
                    reason: err.kind(),
                    at: now,
                });
                return Err(err);
            }
        };

        let access = self.tokens.issue_access(&principal, now)?;
        let refresh = self.tokens.issue_refresh(&principal, now)?;

        let entry = SessionEntry::for_refresh_token(&refresh.claims);
        with_deadline("session register", self.store_timeout, self.sessions.register(entry)).await?;

        info!(jti = %refresh.claims.jti, backend = %principal.source, "session opened");
        self.audit.record(SecurityEvent::AuthenticationSucceeded {
            username: principal.username.clone(),
            backend: principal.source,
            at: now,
        });

        Ok(TokenPair::new(access, refresh))
    }

    /// Exchange a live refresh token for a new pair, revoking the old one.
    ///
    /// A refresh token that was already rotated out (or is unknown to the
    /// store) is a reuse event: every session of the subject is revoked and
    /// the call fails with `Revoked`.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let now = self.clock.now();
        let claims = self.tokens.validate(refresh_token, TokenType::Refresh, now)?;

        let access = self.tokens.reissue(&claims, TokenType::Access, now)?;
        let refresh = self.tokens.reissue(&claims, TokenType::Refresh, now)?;
        let next = SessionEntry::for_refresh_token(&refresh.claims);

        let outcome = with_deadline(
            "session rotate",
            self.store_timeout,
            self.sessions.rotate(&claims.jti, next, now),
        )
        .await?;

        match outcome {
            RotateOutcome::Rotated => {
                info!(username = %claims.sub, old_jti = %claims.jti, jti = %refresh.claims.jti, "refresh token rotated");
                Ok(TokenPair::new(access, refresh))
            }
            RotateOutcome::Expired(_) => Err(AuthError::Expired),
            RotateOutcome::AlreadyRevoked(_) | RotateOutcome::Missing => {
                self.reuse_detected(&claims, now).await;
                Err(AuthError::Revoked)
            }
        }
    }

    /// Validate an access token. No store access.
    pub fn validate(&self, access_token: &str) -> Result<Claims, AuthError> {
        self.tokens.validate(access_token, TokenType::Access, self.clock.now())
    }

    /// Validate a refresh token, including its session liveness.
    pub async fn validate_refresh(&self, refresh_token: &str) -> Result<Claims, AuthError> {
        let now = self.clock.now();
        let claims = self.tokens.validate(refresh_token, TokenType::Refresh, now)?;

        let live = with_deadline(
            "session lookup",
            self.store_timeout,
            self.sessions.is_live(&claims.jti, now),
        )
        .await?;

        if live { Ok(claims) } else { Err(AuthError::Revoked) }
    }

    /// Revoke the session behind a refresh token. Repeating it is harmless.
    #[instrument(skip_all)]
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let claims = self
            .tokens
            .validate(refresh_token, TokenType::Refresh, self.clock.now())?;

        let outcome = with_deadline("session revoke", self.store_timeout, self.sessions.revoke(&claims.jti)).await?;
        if outcome == RevokeOutcome::Revoked {
            info!(username = %claims.sub, jti = %claims.jti, "session closed");
        }
        Ok(())
    }

    /// Revoke every live session of `username`.
    #[instrument(skip(self), fields(username = %username))]
    pub async fn revoke_all(&self, username: &Username) -> Result<u64, AuthError> {
        let count = with_deadline(
            "session revoke_all",
            self.store_timeout,
            self.sessions.revoke_all_for(username),
        )
        .await?;

        info!(count, "sessions revoked");
        self.audit.record(SecurityEvent::SessionsRevoked {
            username: username.clone(),
            count,
            at: self.clock.now(),
        });
        Ok(count)
    }

    pub async fn live_sessions(&self, username: &Username) -> Result<Vec<SessionEntry>, AuthError> {
        let now = self.clock.now();
        with_deadline(
            "session list",
            self.store_timeout,
            self.sessions.live_sessions(username, now),
        )
        .await
    }

    async fn reuse_detected(&self, claims: &Claims, now: DateTime<Utc>) {
        let revoked = match with_deadline(
            "session revoke_all",
            self.store_timeout,
            self.sessions.revoke_all_for(&claims.sub),
        )
        .await
        {
            Ok(count) => Some(count),
            Err(err) => {
                warn!(username = %claims.sub, error = %err, "could not revoke sessions after refresh reuse");
                None
            }
        };

        warn!(username = %claims.sub, jti = %claims.jti, sessions_revoked = ?revoked, "refresh token reuse detected");
        self.audit.record(SecurityEvent::RefreshReuseDetected {
            username: claims.sub.clone(),
            token_id: claims.jti,
            sessions_revoked: revoked,
            at: now,
        });
    }
}
