//! Security-relevant events and the sink that receives them.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use keyward_core::{BackendKind, TokenId, Username};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SecurityEvent {
    AuthenticationSucceeded {
        username: Username,
        backend: BackendKind,
        at: DateTime<Utc>,
    },
    AuthenticationFailed {
        username: Username,
        /// `AuthError::kind()` of the failure.
        reason: &'static str,
        at: DateTime<Utc>,
    },
    /// A rotated-out or unknown refresh token was presented.
    RefreshReuseDetected {
        username: Username,
        token_id: TokenId,
        /// `None` when the follow-up revocation itself failed.
        sessions_revoked: Option<u64>,
        at: DateTime<Utc>,
    },
    SessionsRevoked {
        username: Username,
        count: u64,
        at: DateTime<Utc>,
    },
}

impl SecurityEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SecurityEvent::AuthenticationSucceeded { .. } => "authentication_succeeded",
            SecurityEvent::AuthenticationFailed { .. } => "authentication_failed",
            SecurityEvent::RefreshReuseDetected { .. } => "refresh_reuse_detected",
            SecurityEvent::SessionsRevoked { .. } => "sessions_revoked",
        }
    }

    pub fn username(&self) -> &Username {
        match self {
            SecurityEvent::AuthenticationSucceeded { username, .. }
            | SecurityEvent::AuthenticationFailed { username, .. }
            | SecurityEvent::RefreshReuseDetected { username, .. }
            | SecurityEvent::SessionsRevoked { username, .. } => username,
        }
    }
}

/// Receiver of security events.
///
/// Called inline on the request path; implementations must not block.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: SecurityEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: SecurityEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.name() == name)
            .count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: SecurityEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
