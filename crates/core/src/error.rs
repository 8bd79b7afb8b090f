//! Authentication error model.

use thiserror::Error;

use crate::TokenType;

/// Result type used across the authentication layer.
pub type AuthResult<T> = Result<T, AuthError>;

/// Classified authentication failure.
///
/// Every request-path operation reports exactly one of these. The variants are
/// deliberately coarse: callers map them to "denied", "try again later", or
/// "internal error" without inspecting messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The backend rejected the username/secret pair.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// A backend (directory or store) could not be reached in time.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The token could not be parsed as a signed three-segment token.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// No accepted key produced a matching signature.
    #[error("token signature invalid")]
    SignatureInvalid,

    /// `now` is at or past the token's `exp`.
    #[error("token has expired")]
    Expired,

    /// The token is valid but of the other kind.
    #[error("wrong token type: expected {expected}, found {found}")]
    WrongType { expected: TokenType, found: TokenType },

    /// The refresh token's session is revoked or unknown.
    #[error("token has been revoked")]
    Revoked,

    /// The session or credential store failed.
    #[error("store error: {0}")]
    Store(String),

    /// Token minting or another local step failed unexpectedly.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable label for logs and audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::BackendUnavailable(_) => "backend_unavailable",
            AuthError::Malformed(_) => "malformed",
            AuthError::SignatureInvalid => "signature_invalid",
            AuthError::Expired => "expired",
            AuthError::WrongType { .. } => "wrong_type",
            AuthError::Revoked => "revoked",
            AuthError::Store(_) => "store_error",
            AuthError::Internal(_) => "internal",
        }
    }

    /// Whether the failure is a final verdict on the presented credential.
    ///
    /// Non-terminal failures (`BackendUnavailable`, `Store`, `Internal`) say
    /// nothing about the credential itself; the caller may try again later.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials
                | AuthError::Malformed(_)
                | AuthError::SignatureInvalid
                | AuthError::Expired
                | AuthError::WrongType { .. }
                | AuthError::Revoked
        )
    }
}
