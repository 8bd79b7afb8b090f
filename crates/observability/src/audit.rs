//! Audit delivery through `tracing`.
//!
//! Events go out on the `audit` target so a subscriber can route them to a
//! separate sink with a target filter such as `audit=info`.

use keyward_auth::{AuditSink, SecurityEvent};
use serde_json::Value;
use tracing::{info, warn};

pub const AUDIT_TARGET: &str = "audit";

/// Emits each event as one structured log line.
///
/// Reuse detection is logged at `warn`; everything else at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl TracingAuditSink {
    pub fn new() -> Self {
        Self
    }
}

/// The JSON body attached to an audit line.
pub fn render(event: &SecurityEvent) -> Value {
    serde_json::to_value(event).unwrap_or_else(|e| Value::String(format!("unserializable audit event: {e}")))
}

impl AuditSink for TracingAuditSink {
    fn record(&self, event: SecurityEvent) {
        let body = render(&event);
        let name = event.name();
        let username = event.username().as_str();

        match &event {
            SecurityEvent::RefreshReuseDetected { .. } => {
                warn!(target: AUDIT_TARGET, event = name, username, details = %body, "security event");
            }
            _ => info!(target: AUDIT_TARGET, event = name, username, details = %body, "security event"),
        }
    }
}
