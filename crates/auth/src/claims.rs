use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keyward_core::{AuthError, TokenId, TokenType, Username};

use crate::Role;

/// Claims set carried by every keyward token.
///
/// Field names are the wire names; existing tokens depend on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (username).
    pub sub: Username,

    /// Issued-at, seconds since the epoch.
    pub iat: i64,

    /// Expiry, seconds since the epoch.
    pub exp: i64,

    pub typ: TokenType,

    /// Unique token identifier.
    pub jti: TokenId,

    /// Role snapshot at issuance.
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl Claims {
    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.iat, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.as_str() == role)
    }
}

/// Check the time window and token type of already-verified claims.
///
/// Signature verification happens before this; the checks here are pure.
pub fn validate_claims(
    claims: &Claims,
    expected: TokenType,
    now: DateTime<Utc>,
) -> Result<(), AuthError> {
    if claims.exp <= claims.iat {
        return Err(AuthError::malformed("invalid time window (exp <= iat)"));
    }
    if now >= claims.expires_at() {
        return Err(AuthError::Expired);
    }
    if claims.typ != expected {
        return Err(AuthError::WrongType {
            expected,
            found: claims.typ,
        });
    }
    Ok(())
}
